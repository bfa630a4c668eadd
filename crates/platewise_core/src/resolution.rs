//! Outcomes shared by the resolvers.

use tokio_util::sync::CancellationToken;

use crate::doc_ref::DocRef;
use crate::store::{DocumentStore, StoreError};

/// Result of resolving a replicated document.
///
/// `Pending` means the document has not propagated to this peer yet. It is
/// an expected state, not a failure; see [`crate::retry_pending`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<T> {
    /// The document was present and valid.
    Ready(T),
    /// The document is not available yet.
    Pending,
}

impl<T> Resolution<T> {
    /// `true` for [`Resolution::Pending`].
    pub fn is_pending(&self) -> bool {
        matches!(self, Resolution::Pending)
    }

    /// The resolved value, if any.
    pub fn ready(self) -> Option<T> {
        match self {
            Resolution::Ready(value) => Some(value),
            Resolution::Pending => None,
        }
    }

    /// Map the ready value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Resolution<U> {
        match self {
            Resolution::Ready(value) => Resolution::Ready(f(value)),
            Resolution::Pending => Resolution::Pending,
        }
    }
}

/// Failures that need corrective action from the user (or operator).
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// The stored payload is not structurally valid.
    #[error("document {doc} could not be parsed: {reason}")]
    Parse {
        /// Document being resolved.
        doc: DocRef,
        /// What was wrong with it.
        reason: String,
    },

    /// The payload parsed but a required field is missing.
    #[error("document {doc} is missing required field `{field}`")]
    Incomplete {
        /// Document being resolved.
        doc: DocRef,
        /// Name of the missing field.
        field: String,
    },

    /// The requested group is not listed in the identity.
    #[error("group {group} is not a member of this identity")]
    NotAMember {
        /// Group that was requested.
        group: DocRef,
    },

    /// The caller cancelled the resolution.
    #[error("resolution cancelled")]
    Cancelled,

    /// The document store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ResolveError {
    pub(crate) fn parse(doc: &DocRef, reason: impl Into<String>) -> Self {
        ResolveError::Parse {
            doc: doc.clone(),
            reason: reason.into(),
        }
    }

    pub(crate) fn incomplete(doc: &DocRef, field: &str) -> Self {
        ResolveError::Incomplete {
            doc: doc.clone(),
            field: field.to_string(),
        }
    }
}

/// Fetch a snapshot, aborting as soon as `cancel` fires.
pub(crate) async fn fetch_cancellable(
    store: &dyn DocumentStore,
    id: &DocRef,
    cancel: &CancellationToken,
) -> Result<Option<Vec<u8>>, ResolveError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ResolveError::Cancelled),
        result = store.get(id) => Ok(result?),
    }
}
