//! Group Resolver.

use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::doc_ref::DocRef;
use crate::identity::RootIdentity;
use crate::payload::{read_payload, required_ref};
use crate::resolution::{Resolution, ResolveError, fetch_cancellable};
use crate::store::DocumentStore;

/// The two shared datasets a group exposes (dishes and meal plans).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRecord {
    /// Primary dataset (dishes).
    pub primary_doc_id: DocRef,
    /// Secondary dataset (meal plans).
    pub secondary_doc_id: DocRef,
}

impl GroupRecord {
    /// Parse a group document snapshot.
    pub fn from_snapshot(group: &DocRef, bytes: &[u8]) -> Result<Self, ResolveError> {
        let payload = read_payload(group, bytes)?;
        Ok(Self {
            primary_doc_id: required_ref(group, &payload, "primaryDocId")?,
            secondary_doc_id: required_ref(group, &payload, "secondaryDocId")?,
        })
    }
}

/// Resolves a selected group into its [`GroupRecord`].
#[derive(Clone)]
pub struct GroupResolver {
    store: Arc<dyn DocumentStore>,
}

impl GroupResolver {
    /// Create a resolver over `store`.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Resolve `group` on behalf of `identity`.
    ///
    /// Membership is checked before anything is fetched, so a reference
    /// outside the identity's declared graph never reaches the store.
    /// A group whose datasets have not replicated yet is still `Pending`.
    pub async fn resolve(
        &self,
        identity: &RootIdentity,
        group: &DocRef,
        cancel: &CancellationToken,
    ) -> Result<Resolution<GroupRecord>, ResolveError> {
        if !identity.has_group(group) {
            warn!("Refusing to resolve group {}: not a member", group);
            return Err(ResolveError::NotAMember {
                group: group.clone(),
            });
        }

        let store = self.store.as_ref();
        let Some(bytes) = fetch_cancellable(store, group, cancel).await? else {
            debug!("Group document {} not replicated yet", group);
            return Ok(Resolution::Pending);
        };
        let record = GroupRecord::from_snapshot(group, &bytes)?;

        for dataset in [&record.primary_doc_id, &record.secondary_doc_id] {
            if fetch_cancellable(store, dataset, cancel).await?.is_none() {
                debug!("Group {} dataset {} not replicated yet", group, dataset);
                return Ok(Resolution::Pending);
            }
        }

        Ok(Resolution::Ready(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::GroupEntry;
    use crate::payload::encode_payload;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn r(s: &str) -> DocRef {
        DocRef::new(s).unwrap()
    }

    fn identity() -> RootIdentity {
        RootIdentity {
            personal_doc_id: r("doc:meallogs-1"),
            groups: vec![GroupEntry {
                name: "Default".into(),
                doc_id: r("doc:grp-1"),
            }],
        }
    }

    fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.insert(
            &r("doc:grp-1"),
            encode_payload(&json!({
                "primaryDocId": "doc:dishes-1",
                "secondaryDocId": "doc:plans-1"
            })),
        );
        store.insert(&r("doc:dishes-1"), b"{}".to_vec());
        store.insert(&r("doc:plans-1"), b"{}".to_vec());
        store
    }

    #[tokio::test]
    async fn resolves_member_group() {
        let store = seeded_store();
        let resolver = GroupResolver::new(store.clone());
        let record = resolver
            .resolve(&identity(), &r("doc:grp-1"), &CancellationToken::new())
            .await
            .unwrap()
            .ready()
            .unwrap();
        assert_eq!(
            record,
            GroupRecord {
                primary_doc_id: r("doc:dishes-1"),
                secondary_doc_id: r("doc:plans-1"),
            }
        );
    }

    #[tokio::test]
    async fn non_member_is_rejected_without_fetching() {
        let store = seeded_store();
        let resolver = GroupResolver::new(store.clone());
        let err = resolver
            .resolve(&identity(), &r("doc:grp-2"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::NotAMember { .. }));
        assert_eq!(store.fetch_count(), 0);
    }

    #[tokio::test]
    async fn non_member_check_ignores_store_contents() {
        // Even a group document that exists must not be read for an outsider.
        let store = seeded_store();
        store.insert(
            &r("doc:grp-2"),
            encode_payload(&json!({"primaryDocId": "doc:x", "secondaryDocId": "doc:y"})),
        );
        let resolver = GroupResolver::new(store.clone());
        assert!(
            resolver
                .resolve(&identity(), &r("doc:grp-2"), &CancellationToken::new())
                .await
                .is_err()
        );
        assert_eq!(store.fetch_count(), 0);
    }

    #[tokio::test]
    async fn absent_group_or_dataset_is_pending() {
        let store = Arc::new(MemoryStore::new());
        let resolver = GroupResolver::new(store.clone());
        let outcome = resolver
            .resolve(&identity(), &r("doc:grp-1"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.is_pending());

        store.insert(
            &r("doc:grp-1"),
            encode_payload(&json!({
                "primaryDocId": "doc:dishes-1",
                "secondaryDocId": "doc:plans-1"
            })),
        );
        store.insert(&r("doc:dishes-1"), b"{}".to_vec());
        let outcome = resolver
            .resolve(&identity(), &r("doc:grp-1"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.is_pending());
    }

    #[tokio::test]
    async fn missing_sub_field_is_incomplete() {
        let store = Arc::new(MemoryStore::new());
        store.insert(
            &r("doc:grp-1"),
            encode_payload(&json!({"primaryDocId": "doc:dishes-1"})),
        );
        let err = GroupResolver::new(store)
            .resolve(&identity(), &r("doc:grp-1"), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            ResolveError::Incomplete { field, .. } => assert_eq!(field, "secondaryDocId"),
            other => panic!("expected Incomplete, got {other}"),
        }
    }
}
