//! Root Identity Resolver.
//!
//! The root identity document anchors a user: it names their personal
//! document (meal logs) and lists the groups they belong to.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::doc_ref::DocRef;
use crate::payload::{read_payload, required_ref};
use crate::resolution::{Resolution, ResolveError, fetch_cancellable};
use crate::store::DocumentStore;

/// A group listed in a root identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupEntry {
    /// Display name chosen by the members.
    pub name: String,
    /// Group document reference.
    pub doc_id: DocRef,
}

/// Structured content of a root identity document.
///
/// `groups` keeps document order and never holds the same `doc_id` twice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RootIdentity {
    /// The user's personal document.
    pub personal_doc_id: DocRef,
    /// Groups the user belongs to. Empty for a brand new identity.
    pub groups: Vec<GroupEntry>,
}

impl RootIdentity {
    /// Parse a root identity snapshot.
    pub fn from_snapshot(root: &DocRef, bytes: &[u8]) -> Result<Self, ResolveError> {
        let payload = read_payload(root, bytes)?;
        let personal_doc_id = required_ref(root, &payload, "personalDocId")?;

        let entries = match payload.get("groups") {
            None | Some(Value::Null) => return Err(ResolveError::incomplete(root, "groups")),
            Some(Value::Array(entries)) => entries,
            Some(_) => return Err(ResolveError::parse(root, "`groups` must be an array")),
        };

        let mut seen = HashSet::new();
        let mut groups = Vec::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            let Value::Object(entry) = entry else {
                return Err(ResolveError::parse(
                    root,
                    format!("groups[{}] must be an object", i),
                ));
            };
            let name = match entry.get("name") {
                None | Some(Value::Null) => {
                    return Err(ResolveError::incomplete(root, &format!("groups[{}].name", i)));
                }
                Some(Value::String(name)) => name.clone(),
                Some(_) => {
                    return Err(ResolveError::parse(
                        root,
                        format!("groups[{}].name must be a string", i),
                    ));
                }
            };
            let doc_id = required_ref(root, entry, "docId").map_err(|e| match e {
                ResolveError::Incomplete { doc, .. } => ResolveError::Incomplete {
                    doc,
                    field: format!("groups[{}].docId", i),
                },
                other => other,
            })?;
            if !seen.insert(doc_id.clone()) {
                return Err(ResolveError::parse(
                    root,
                    format!("group {} is listed more than once", doc_id),
                ));
            }
            groups.push(GroupEntry { name, doc_id });
        }

        Ok(Self {
            personal_doc_id,
            groups,
        })
    }

    /// Whether `group` is one of this identity's groups.
    pub fn has_group(&self, group: &DocRef) -> bool {
        self.groups.iter().any(|g| &g.doc_id == group)
    }

    /// Look up a group entry by document reference.
    pub fn group(&self, group: &DocRef) -> Option<&GroupEntry> {
        self.groups.iter().find(|g| &g.doc_id == group)
    }
}

/// Turns a root document reference into a [`RootIdentity`].
///
/// Nothing is cached: every call asks the store again, since a document
/// that was absent a moment ago may have arrived since.
#[derive(Clone)]
pub struct RootResolver {
    store: Arc<dyn DocumentStore>,
}

impl RootResolver {
    /// Create a resolver over `store`.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Resolve `root` once.
    pub async fn resolve(
        &self,
        root: &DocRef,
        cancel: &CancellationToken,
    ) -> Result<Resolution<RootIdentity>, ResolveError> {
        let Some(bytes) = fetch_cancellable(self.store.as_ref(), root, cancel).await? else {
            debug!("Root document {} not replicated yet", root);
            return Ok(Resolution::Pending);
        };

        let identity = RootIdentity::from_snapshot(root, &bytes)?;
        debug!(
            "Resolved root {}: {} group(s)",
            root,
            identity.groups.len()
        );
        Ok(Resolution::Ready(identity))
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }
}
