//! Per-session resolved context.
//!
//! A [`ResolvedContext`] is the (identity, selected group, group record)
//! triple a client is working with. It is built in one go by
//! [`ContextLoader`] and never mutated: switching groups produces a new
//! value, and a cancelled or failed load produces none.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::backoff::{BackoffConfig, retry_pending};
use crate::doc_ref::DocRef;
use crate::group::{GroupRecord, GroupResolver};
use crate::identity::{RootIdentity, RootResolver};
use crate::resolution::{Resolution, ResolveError};
use crate::store::DocumentStore;

/// The identity and group a session currently works in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedContext {
    root_doc_id: DocRef,
    identity: RootIdentity,
    group_doc_id: DocRef,
    group: GroupRecord,
}

impl ResolvedContext {
    /// Root identity document this context was resolved from.
    pub fn root_doc_id(&self) -> &DocRef {
        &self.root_doc_id
    }

    /// The resolved identity.
    pub fn identity(&self) -> &RootIdentity {
        &self.identity
    }

    /// The selected group's document.
    pub fn group_doc_id(&self) -> &DocRef {
        &self.group_doc_id
    }

    /// The selected group's datasets.
    pub fn group(&self) -> &GroupRecord {
        &self.group
    }
}

/// Resolves identities and groups with pending-retry applied.
#[derive(Clone)]
pub struct ContextLoader {
    store: Arc<dyn DocumentStore>,
    roots: RootResolver,
    groups: GroupResolver,
    backoff: BackoffConfig,
}

impl ContextLoader {
    /// Create a loader over `store`.
    pub fn new(store: Arc<dyn DocumentStore>, backoff: BackoffConfig) -> Self {
        Self {
            roots: RootResolver::new(store.clone()),
            groups: GroupResolver::new(store.clone()),
            store,
            backoff,
        }
    }

    /// Resolve a root identity, retrying while it is pending.
    pub async fn resolve_identity(
        &self,
        root: &DocRef,
        cancel: &CancellationToken,
    ) -> Result<Resolution<RootIdentity>, ResolveError> {
        let wake = self.store.subscribe(root);
        retry_pending(&self.backoff, Some(wake), cancel, || {
            self.roots.resolve(root, cancel)
        })
        .await
    }

    /// Resolve a group of `identity`, retrying while it is pending.
    pub async fn resolve_group(
        &self,
        identity: &RootIdentity,
        group: &DocRef,
        cancel: &CancellationToken,
    ) -> Result<Resolution<GroupRecord>, ResolveError> {
        // Don't even subscribe to documents outside the identity's graph.
        if !identity.has_group(group) {
            return Err(ResolveError::NotAMember {
                group: group.clone(),
            });
        }
        let wake = self.store.subscribe(group);
        retry_pending(&self.backoff, Some(wake), cancel, || {
            self.groups.resolve(identity, group, cancel)
        })
        .await
    }

    /// Resolve `root` and then `group` into a fresh context.
    pub async fn load(
        &self,
        root: &DocRef,
        group: &DocRef,
        cancel: &CancellationToken,
    ) -> Result<Resolution<ResolvedContext>, ResolveError> {
        let identity = match self.resolve_identity(root, cancel).await? {
            Resolution::Ready(identity) => identity,
            Resolution::Pending => return Ok(Resolution::Pending),
        };
        self.with_group(root.clone(), identity, group, cancel).await
    }

    /// Build a context for another group of the same identity.
    ///
    /// `current` is left untouched whatever the outcome.
    pub async fn switch_group(
        &self,
        current: &ResolvedContext,
        group: &DocRef,
        cancel: &CancellationToken,
    ) -> Result<Resolution<ResolvedContext>, ResolveError> {
        self.with_group(
            current.root_doc_id.clone(),
            current.identity.clone(),
            group,
            cancel,
        )
        .await
    }

    async fn with_group(
        &self,
        root_doc_id: DocRef,
        identity: RootIdentity,
        group: &DocRef,
        cancel: &CancellationToken,
    ) -> Result<Resolution<ResolvedContext>, ResolveError> {
        let record = self.resolve_group(&identity, group, cancel).await?;
        Ok(record.map(|record| {
            info!("Context ready: root={} group={}", root_doc_id, group);
            ResolvedContext {
                root_doc_id,
                identity,
                group_doc_id: group.clone(),
                group: record,
            }
        }))
    }
}

/// What replacing the configured root identity implies.
///
/// Identities are not migrated: anything not yet synced under the old root
/// is left behind, so a replacement must be acknowledged by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootChange {
    /// No root was configured before.
    Initial(DocRef),
    /// The same root is configured again.
    Unchanged,
    /// A different root replaces the current one.
    Replace {
        /// Root being abandoned.
        from: DocRef,
        /// Root taking over.
        to: DocRef,
    },
}

impl RootChange {
    /// Classify a change from `current` to `next`.
    pub fn plan(current: Option<&DocRef>, next: DocRef) -> Self {
        match current {
            None => RootChange::Initial(next),
            Some(current) if *current == next => RootChange::Unchanged,
            Some(current) => RootChange::Replace {
                from: current.clone(),
                to: next,
            },
        }
    }

    /// Whether local state tied to the old root will be orphaned.
    pub fn discards_local_state(&self) -> bool {
        matches!(self, RootChange::Replace { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::encode_payload;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::time::Duration;

    fn r(s: &str) -> DocRef {
        DocRef::new(s).unwrap()
    }

    fn quick_backoff() -> BackoffConfig {
        BackoffConfig {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            max_attempts: 5,
        }
    }

    fn seed(store: &MemoryStore) {
        store.insert(
            &r("doc:root-1"),
            encode_payload(&json!({
                "personalDocId": "doc:meallogs-1",
                "groups": [
                    {"name": "Default", "docId": "doc:grp-1"},
                    {"name": "Cabin", "docId": "doc:grp-3"}
                ]
            })),
        );
        store.insert(
            &r("doc:grp-1"),
            encode_payload(&json!({
                "primaryDocId": "doc:dishes-1",
                "secondaryDocId": "doc:plans-1"
            })),
        );
        store.insert(
            &r("doc:grp-3"),
            encode_payload(&json!({
                "primaryDocId": "doc:dishes-3",
                "secondaryDocId": "doc:plans-3"
            })),
        );
        for d in ["doc:dishes-1", "doc:plans-1", "doc:dishes-3", "doc:plans-3"] {
            store.insert(&r(d), b"{}".to_vec());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn loads_and_switches_groups() {
        let store = Arc::new(MemoryStore::new());
        seed(&store);
        let loader = ContextLoader::new(store, quick_backoff());
        let cancel = CancellationToken::new();

        let ctx = loader
            .load(&r("doc:root-1"), &r("doc:grp-1"), &cancel)
            .await
            .unwrap()
            .ready()
            .unwrap();
        assert_eq!(ctx.group().primary_doc_id, r("doc:dishes-1"));
        assert_eq!(ctx.identity().personal_doc_id, r("doc:meallogs-1"));

        let switched = loader
            .switch_group(&ctx, &r("doc:grp-3"), &cancel)
            .await
            .unwrap()
            .ready()
            .unwrap();
        assert_eq!(switched.group_doc_id(), &r("doc:grp-3"));
        assert_eq!(switched.group().secondary_doc_id, r("doc:plans-3"));
        // The original context is unchanged.
        assert_eq!(ctx.group_doc_id(), &r("doc:grp-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn pending_root_becomes_ready_after_replication() {
        let store = Arc::new(MemoryStore::new());
        let loader = ContextLoader::new(store.clone(), quick_backoff());
        let cancel = CancellationToken::new();

        let first = loader
            .resolve_identity(&r("doc:root-1"), &cancel)
            .await
            .unwrap();
        assert!(first.is_pending());

        seed(&store);
        let second = loader
            .resolve_identity(&r("doc:root-1"), &cancel)
            .await
            .unwrap();
        assert_eq!(second.ready().unwrap().groups.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn document_arriving_mid_backoff_resolves() {
        let store = Arc::new(MemoryStore::new());
        let loader = ContextLoader::new(store.clone(), quick_backoff());

        let writer = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(12)).await;
            seed(&writer);
        });

        let ctx = loader
            .load(&r("doc:root-1"), &r("doc:grp-1"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(ctx.ready().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn non_member_switch_fails_without_fetch() {
        let store = Arc::new(MemoryStore::new());
        seed(&store);
        let loader = ContextLoader::new(store.clone(), quick_backoff());
        let cancel = CancellationToken::new();
        let ctx = loader
            .load(&r("doc:root-1"), &r("doc:grp-1"), &cancel)
            .await
            .unwrap()
            .ready()
            .unwrap();

        let before = store.fetch_count();
        let err = loader
            .switch_group(&ctx, &r("doc:grp-2"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::NotAMember { .. }));
        assert_eq!(store.fetch_count(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_load_yields_no_context() {
        let store = Arc::new(MemoryStore::new());
        let loader = ContextLoader::new(
            store,
            BackoffConfig {
                max_attempts: 0,
                ..quick_backoff()
            },
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });
        let result = loader
            .load(&r("doc:root-1"), &r("doc:grp-1"), &cancel)
            .await;
        assert!(matches!(result, Err(ResolveError::Cancelled)));
    }

    #[test]
    fn root_change_requires_acknowledgement_only_on_replace() {
        let a = r("doc:root-a");
        let b = r("doc:root-b");
        assert!(!RootChange::plan(None, a.clone()).discards_local_state());
        assert_eq!(RootChange::plan(Some(&a), a.clone()), RootChange::Unchanged);
        let change = RootChange::plan(Some(&a), b.clone());
        assert!(change.discards_local_state());
        assert_eq!(change, RootChange::Replace { from: a, to: b });
    }
}
