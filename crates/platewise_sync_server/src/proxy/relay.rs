//! One-direction frame pump with bounded buffering.
//!
//! Each pump runs a reader and a writer joined on the same task. Frames pass
//! between them through a bounded channel, and every buffered frame holds
//! byte permits from a per-direction semaphore until the destination has
//! accepted it. When the destination stalls the reader stops pulling from
//! the source, so the source's own flow control pushes back on the sender.

use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tracing::{debug, warn};

use super::registry::ConnectionControl;
use super::state::CloseReason;
use super::transport::{BoxSink, BoxSource, Frame};

/// Buffer bounds for a single direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayLimits {
    pub max_buffered_bytes: usize,
    pub max_buffered_frames: usize,
    /// How long buffered frames may take to flush once the source closed.
    pub drain_timeout: Duration,
}

impl Default for RelayLimits {
    fn default() -> Self {
        Self {
            max_buffered_bytes: 4 * 1024 * 1024,
            max_buffered_frames: 256,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// Which way a pump moves frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToUpstream,
    UpstreamToClient,
}

impl Direction {
    fn source_closed(self) -> CloseReason {
        match self {
            Direction::ClientToUpstream => CloseReason::ClientClosed,
            Direction::UpstreamToClient => CloseReason::UpstreamClosed,
        }
    }

    fn source_failed(self) -> CloseReason {
        match self {
            Direction::ClientToUpstream => CloseReason::ClientError,
            Direction::UpstreamToClient => CloseReason::UpstreamError,
        }
    }

    fn destination_failed(self) -> CloseReason {
        match self {
            Direction::ClientToUpstream => CloseReason::UpstreamError,
            Direction::UpstreamToClient => CloseReason::ClientError,
        }
    }
}

/// Observed buffering for one direction.
#[derive(Debug, Default)]
pub struct RelayGauge {
    buffered: AtomicUsize,
    high_water: AtomicUsize,
    frames: AtomicU64,
}

impl RelayGauge {
    /// Bytes read from the source and not yet accepted by the destination.
    pub fn buffered_bytes(&self) -> usize {
        self.buffered.load(Ordering::SeqCst)
    }

    /// Largest value `buffered_bytes` has reached.
    pub fn high_water_bytes(&self) -> usize {
        self.high_water.load(Ordering::SeqCst)
    }

    pub fn frames_relayed(&self) -> u64 {
        self.frames.load(Ordering::SeqCst)
    }

    fn reserve(&self, bytes: usize) {
        let now = self.buffered.fetch_add(bytes, Ordering::SeqCst) + bytes;
        self.high_water.fetch_max(now, Ordering::SeqCst);
    }

    fn release(&self, bytes: usize) {
        self.buffered.fetch_sub(bytes, Ordering::SeqCst);
    }
}

/// Byte budget held by one in-flight frame.
struct Reservation {
    bytes: usize,
    gauge: Arc<RelayGauge>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        // Runs before the permit field is dropped.
        self.gauge.release(self.bytes);
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ReadEnd {
    SourceClosed,
    Stopped,
}

#[derive(Debug, PartialEq, Eq)]
enum WriteEnd {
    Drained,
    Stopped,
}

/// Move frames from `source` to `sink` until either side ends or `control`
/// is closed.
///
/// A clean source close drains what is buffered, for at most
/// `limits.drain_timeout`, before closing `control`. Errors and oversized
/// frames close `control` immediately. The sink is
/// handed back so the caller can send the final close frame.
pub async fn pump(
    direction: Direction,
    mut source: BoxSource,
    mut sink: BoxSink,
    limits: RelayLimits,
    gauge: Arc<RelayGauge>,
    control: ConnectionControl,
) -> BoxSink {
    let budget_bytes = limits.max_buffered_bytes.min(u32::MAX as usize);
    let budget = Arc::new(Semaphore::new(budget_bytes));
    let (tx, mut rx) = mpsc::channel::<(Frame, Reservation)>(limits.max_buffered_frames.max(1));
    let cancel = control.token().clone();

    let read = async {
        let tx = tx;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return ReadEnd::Stopped,
                next = source.recv() => next,
            };
            let frame = match next {
                None => return ReadEnd::SourceClosed,
                Some(Err(e)) => {
                    warn!("{:?}: source failed: {}", direction, e);
                    control.close(direction.source_failed());
                    return ReadEnd::Stopped;
                }
                Some(Ok(frame)) => frame,
            };

            let bytes = frame.len();
            let permits = match u32::try_from(bytes) {
                Ok(n) if bytes <= budget_bytes => n,
                _ => {
                    warn!(
                        "{:?}: frame of {} bytes exceeds buffer of {} bytes",
                        direction, bytes, budget_bytes
                    );
                    control.close(CloseReason::FrameTooLarge);
                    return ReadEnd::Stopped;
                }
            };

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => return ReadEnd::Stopped,
                permit = Arc::clone(&budget).acquire_many_owned(permits) => match permit {
                    Ok(permit) => permit,
                    Err(_) => return ReadEnd::Stopped,
                },
            };
            gauge.reserve(bytes);
            let reservation = Reservation {
                bytes,
                gauge: Arc::clone(&gauge),
                _permit: permit,
            };

            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => return ReadEnd::Stopped,
                sent = tx.send((frame, reservation)) => sent,
            };
            if sent.is_err() {
                return ReadEnd::Stopped;
            }
        }
    };

    let write = async {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return WriteEnd::Stopped,
                next = rx.recv() => next,
            };
            let Some((frame, reservation)) = next else {
                return WriteEnd::Drained;
            };

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return WriteEnd::Stopped,
                result = sink.send(frame) => result,
            };
            drop(reservation);

            if let Err(e) = result {
                warn!("{:?}: destination failed: {}", direction, e);
                control.close(direction.destination_failed());
                return WriteEnd::Stopped;
            }
            gauge.frames.fetch_add(1, Ordering::Relaxed);
        }
    };

    {
        let mut read = pin!(read);
        let mut write = pin!(write);
        let mut write_end = None;
        let read_end = loop {
            tokio::select! {
                end = &mut read => break end,
                end = &mut write, if write_end.is_none() => write_end = Some(end),
            }
        };

        let write_end = match write_end {
            Some(end) => end,
            None if read_end == ReadEnd::SourceClosed => {
                match tokio::time::timeout(limits.drain_timeout, &mut write).await {
                    Ok(end) => end,
                    Err(_) => {
                        warn!(
                            "{:?}: destination did not drain within {:?}",
                            direction, limits.drain_timeout
                        );
                        WriteEnd::Drained
                    }
                }
            }
            None => write.await,
        };

        if read_end == ReadEnd::SourceClosed && write_end == WriteEnd::Drained {
            debug!("{:?}: source closed", direction);
            control.close(direction.source_closed());
        }
    }
    sink
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::transport::{FrameSink, FrameSource, TransportError};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::time::Duration;

    struct ChannelSource {
        rx: mpsc::Receiver<Frame>,
        pulled: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl FrameSource for ChannelSource {
        async fn recv(&mut self) -> Option<Result<Frame, TransportError>> {
            let frame = self.rx.recv().await?;
            self.pulled.fetch_add(1, Ordering::SeqCst);
            Some(Ok(frame))
        }
    }

    /// Records frames; each send waits for one permit from `gate`.
    struct GatedSink {
        out: mpsc::UnboundedSender<Frame>,
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl FrameSink for GatedSink {
        async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| TransportError::SendFailed(e.to_string()))?;
            permit.forget();
            self.out
                .send(frame)
                .map_err(|e| TransportError::SendFailed(e.to_string()))
        }

        async fn close(&mut self, _reason: CloseReason) {}
    }

    struct FailingSink;

    #[async_trait]
    impl FrameSink for FailingSink {
        async fn send(&mut self, _frame: Frame) -> Result<(), TransportError> {
            Err(TransportError::SendFailed("peer gone".into()))
        }

        async fn close(&mut self, _reason: CloseReason) {}
    }

    struct StuckSink;

    #[async_trait]
    impl FrameSink for StuckSink {
        async fn send(&mut self, _frame: Frame) -> Result<(), TransportError> {
            std::future::pending().await
        }

        async fn close(&mut self, _reason: CloseReason) {}
    }

    fn source(capacity: usize) -> (mpsc::Sender<Frame>, ChannelSource, Arc<AtomicUsize>) {
        let (tx, rx) = mpsc::channel(capacity);
        let pulled = Arc::new(AtomicUsize::new(0));
        let source = ChannelSource {
            rx,
            pulled: Arc::clone(&pulled),
        };
        (tx, source, pulled)
    }

    fn sink(open_permits: usize) -> (GatedSink, mpsc::UnboundedReceiver<Frame>, Arc<Semaphore>) {
        let (out, received) = mpsc::unbounded_channel();
        let gate = Arc::new(Semaphore::new(open_permits));
        (
            GatedSink {
                out,
                gate: Arc::clone(&gate),
            },
            received,
            gate,
        )
    }

    fn binary(byte: u8, len: usize) -> Frame {
        Frame::Binary(Bytes::from(vec![byte; len]))
    }

    #[tokio::test]
    async fn relays_frames_in_order_and_verbatim() {
        let (tx, source, _) = source(256);
        let (sink, mut received, _) = sink(Semaphore::MAX_PERMITS);
        let control = ConnectionControl::new();
        let gauge = Arc::new(RelayGauge::default());

        let mut sent = Vec::new();
        for i in 0..100u8 {
            let frame = if i % 3 == 0 {
                Frame::Text(format!("update-{i}"))
            } else {
                binary(i, usize::from(i) + 1)
            };
            sent.push(frame.clone());
            tx.send(frame).await.unwrap();
        }
        drop(tx);

        pump(
            Direction::ClientToUpstream,
            Box::new(source),
            Box::new(sink),
            RelayLimits::default(),
            Arc::clone(&gauge),
            control.clone(),
        )
        .await;

        let mut got = Vec::new();
        while let Ok(frame) = received.try_recv() {
            got.push(frame);
        }
        assert_eq!(got, sent);
        assert_eq!(gauge.frames_relayed(), 100);
        assert_eq!(gauge.buffered_bytes(), 0);
        assert_eq!(control.reason(), Some(CloseReason::ClientClosed));
    }

    #[tokio::test]
    async fn stalled_destination_bounds_buffer_and_stops_reading() {
        let (tx, source, pulled) = source(50);
        for i in 0..50u8 {
            tx.send(binary(i, 100)).await.unwrap();
        }
        drop(tx);

        let (sink, mut received, gate) = sink(0);
        let control = ConnectionControl::new();
        let gauge = Arc::new(RelayGauge::default());
        let limits = RelayLimits {
            max_buffered_bytes: 1000,
            max_buffered_frames: 64,
            ..RelayLimits::default()
        };

        let handle = tokio::spawn(pump(
            Direction::UpstreamToClient,
            Box::new(source),
            Box::new(sink),
            limits,
            Arc::clone(&gauge),
            control.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(gauge.high_water_bytes(), 1000);
        assert!(gauge.buffered_bytes() <= 1000);
        // Ten frames fill the budget; at most one more waits for permits.
        assert!(pulled.load(Ordering::SeqCst) <= 11);
        assert!(received.try_recv().is_err());

        gate.add_permits(50);
        handle.await.unwrap();

        let mut count = 0;
        while let Ok(Frame::Binary(data)) = received.try_recv() {
            assert_eq!(data.len(), 100);
            assert_eq!(data[0], count);
            count += 1;
        }
        assert_eq!(count, 50);
        assert!(gauge.high_water_bytes() <= 1000);
        assert_eq!(control.reason(), Some(CloseReason::UpstreamClosed));
    }

    #[tokio::test]
    async fn oversized_frame_closes_connection() {
        let (tx, source, _) = source(4);
        let (sink, mut received, _) = sink(Semaphore::MAX_PERMITS);
        let control = ConnectionControl::new();
        tx.send(binary(1, 11)).await.unwrap();

        pump(
            Direction::ClientToUpstream,
            Box::new(source),
            Box::new(sink),
            RelayLimits {
                max_buffered_bytes: 10,
                max_buffered_frames: 4,
                ..RelayLimits::default()
            },
            Arc::new(RelayGauge::default()),
            control.clone(),
        )
        .await;

        assert!(received.try_recv().is_err());
        assert_eq!(control.reason(), Some(CloseReason::FrameTooLarge));
        drop(tx);
    }

    #[tokio::test]
    async fn destination_failure_stops_idle_reader() {
        let (tx, source, _) = source(4);
        let control = ConnectionControl::new();
        tx.send(binary(7, 3)).await.unwrap();

        // `tx` stays alive: the reader would wait forever without cancellation.
        tokio::time::timeout(
            Duration::from_secs(5),
            pump(
                Direction::ClientToUpstream,
                Box::new(source),
                Box::new(FailingSink),
                RelayLimits::default(),
                Arc::new(RelayGauge::default()),
                control.clone(),
            ),
        )
        .await
        .expect("pump should stop after destination failure");

        assert_eq!(control.reason(), Some(CloseReason::UpstreamError));
        drop(tx);
    }

    #[tokio::test]
    async fn external_close_stops_pump() {
        let (tx, source, _) = source(4);
        let (sink, _received, _) = sink(Semaphore::MAX_PERMITS);
        let control = ConnectionControl::new();

        let handle = tokio::spawn(pump(
            Direction::UpstreamToClient,
            Box::new(source),
            Box::new(sink),
            RelayLimits::default(),
            Arc::new(RelayGauge::default()),
            control.clone(),
        ));

        control.close(CloseReason::SessionRevoked);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("pump should observe cancellation")
            .unwrap();
        assert_eq!(control.reason(), Some(CloseReason::SessionRevoked));
        drop(tx);
    }

    #[tokio::test]
    async fn source_close_with_stuck_destination_still_closes() {
        let (tx, source, _) = source(4);
        let control = ConnectionControl::new();
        tx.send(binary(1, 8)).await.unwrap();
        drop(tx);

        tokio::time::timeout(
            Duration::from_secs(5),
            pump(
                Direction::UpstreamToClient,
                Box::new(source),
                Box::new(StuckSink),
                RelayLimits {
                    drain_timeout: Duration::from_millis(100),
                    ..RelayLimits::default()
                },
                Arc::new(RelayGauge::default()),
                control.clone(),
            ),
        )
        .await
        .expect("pump should give up on a destination that never drains");

        assert_eq!(control.reason(), Some(CloseReason::UpstreamClosed));
    }
}
