use std::sync::Arc;

use platewise_core::{DocRef, Resolution, RootChange, RootIdentity, RootResolver};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::args::IdentityCommand;
use super::{CliError, Status, Workspace};

pub async fn handle(
    command: IdentityCommand,
    workspace: &mut Workspace,
    cancel: &CancellationToken,
) -> Result<Status, CliError> {
    match command {
        IdentityCommand::Show { root } => {
            let root = match root {
                Some(root) => root,
                None => workspace.root()?.clone(),
            };
            match show(workspace, &root, cancel).await? {
                Resolution::Ready(identity) => {
                    print_identity(&root, &identity);
                    Ok(Status::Done)
                }
                Resolution::Pending => Ok(Status::Pending),
            }
        }
        IdentityCommand::Set {
            root,
            discard_local_state,
        } => {
            match set(workspace, root, discard_local_state, cancel).await? {
                SetOutcome::Unchanged => println!("Root identity unchanged"),
                SetOutcome::Set {
                    root,
                    pending,
                    discarded,
                } => {
                    println!("Root identity set to {}", root);
                    if let Some(count) = discarded {
                        println!("Discarded {} local document(s) of the previous root", count);
                    }
                    if pending {
                        println!("The identity document has not replicated to this device yet");
                    }
                }
            }
            Ok(Status::Done)
        }
    }
}

fn print_identity(root: &DocRef, identity: &RootIdentity) {
    println!("Root:     {}", root);
    println!("Personal: {}", identity.personal_doc_id);
    if identity.groups.is_empty() {
        println!("Groups:   (none)");
        return;
    }
    println!("Groups:");
    for group in &identity.groups {
        println!("  {}  {}", group.doc_id, group.name);
    }
}

/// Resolve `root`, waiting for it to replicate if needed.
pub async fn show(
    workspace: &Workspace,
    root: &DocRef,
    cancel: &CancellationToken,
) -> Result<Resolution<RootIdentity>, CliError> {
    Ok(workspace
        .loader(root)
        .resolve_identity(root, cancel)
        .await?)
}

#[derive(Debug, PartialEq, Eq)]
pub enum SetOutcome {
    Unchanged,
    Set {
        root: DocRef,
        /// The identity document is not in the replica yet.
        pending: bool,
        /// Documents removed from the previous root's replica, if any was replaced.
        discarded: Option<usize>,
    },
}

/// Configure `root` as the identity to use.
///
/// Replacing an existing root requires `discard_local_state`; the old
/// root's replica and the group selection are dropped in that case. A root
/// whose document is present but invalid is refused.
pub async fn set(
    workspace: &mut Workspace,
    root: DocRef,
    discard_local_state: bool,
    cancel: &CancellationToken,
) -> Result<SetOutcome, CliError> {
    let change = RootChange::plan(workspace.config().root_doc_id.as_ref(), root.clone());
    match &change {
        RootChange::Unchanged => return Ok(SetOutcome::Unchanged),
        RootChange::Replace { from, to } if !discard_local_state => {
            return Err(CliError::RootChangeNotAcknowledged {
                from: from.clone(),
                to: to.clone(),
            });
        }
        _ => {}
    }

    // One look only: a root that hasn't replicated yet is still accepted.
    let resolver = RootResolver::new(Arc::new(workspace.replica(&root)));
    let pending = resolver.resolve(&root, cancel).await?.is_pending();
    if pending {
        warn!("Root {} is not in the local replica yet", root);
    }

    // Persist the switch before deleting anything, so a failed save leaves
    // the old root and its data intact.
    let previous = match change {
        RootChange::Replace { from, .. } => Some(from),
        _ => None,
    };
    let mut next = workspace.config.clone();
    next.root_doc_id = Some(root.clone());
    if previous.is_some() {
        next.selected_group = None;
    }
    next.save(&workspace.config_path)?;
    workspace.config = next;

    let mut discarded = None;
    if let Some(from) = previous {
        let old = workspace.replica(&from);
        let removed = old.discard().await?;
        info!(
            "Discarded {} document(s) stored for {} under {}",
            removed,
            from,
            old.dir().display()
        );
        discarded = Some(removed);
    }

    Ok(SetOutcome::Set {
        root,
        pending,
        discarded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::test_support::{doc, put, workspace};
    use crate::config::CliConfig;
    use platewise_core::{DocumentStore, ResolveError};
    use serde_json::json;

    #[tokio::test]
    async fn first_root_is_saved_even_when_pending() {
        let dir = tempfile::tempdir().unwrap();
        let mut ws = workspace(dir.path());
        let cancel = CancellationToken::new();

        let outcome = set(&mut ws, doc("doc:root-1"), false, &cancel).await.unwrap();
        assert_eq!(
            outcome,
            SetOutcome::Set {
                root: doc("doc:root-1"),
                pending: true,
                discarded: None,
            }
        );

        let saved = CliConfig::load(&dir.path().join("config.toml")).unwrap();
        assert_eq!(saved.root_doc_id, Some(doc("doc:root-1")));
    }

    #[tokio::test]
    async fn setting_the_same_root_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let mut ws = workspace(dir.path());
        let cancel = CancellationToken::new();
        set(&mut ws, doc("doc:root-1"), false, &cancel).await.unwrap();

        let outcome = set(&mut ws, doc("doc:root-1"), false, &cancel).await.unwrap();
        assert_eq!(outcome, SetOutcome::Unchanged);
    }

    #[tokio::test]
    async fn replacing_root_requires_acknowledgement() {
        let dir = tempfile::tempdir().unwrap();
        let mut ws = workspace(dir.path());
        let cancel = CancellationToken::new();
        set(&mut ws, doc("doc:root-1"), false, &cancel).await.unwrap();
        put(&ws, "doc:root-1", "doc:kept", json!({ "x": 1 })).await;

        let err = set(&mut ws, doc("doc:root-2"), false, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, CliError::RootChangeNotAcknowledged { .. }));
        assert_eq!(ws.config().root_doc_id, Some(doc("doc:root-1")));

        let old = ws.replica(&doc("doc:root-1"));
        assert!(old.get(&doc("doc:kept")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn acknowledged_replacement_discards_old_replica_and_selection() {
        let dir = tempfile::tempdir().unwrap();
        let mut ws = workspace(dir.path());
        let cancel = CancellationToken::new();
        set(&mut ws, doc("doc:root-1"), false, &cancel).await.unwrap();
        ws.config.selected_group = Some(doc("doc:grp-1"));
        put(&ws, "doc:root-1", "doc:a", json!({ "x": 1 })).await;
        put(&ws, "doc:root-1", "doc:b", json!({ "x": 2 })).await;

        let outcome = set(&mut ws, doc("doc:root-2"), true, &cancel).await.unwrap();
        assert_eq!(
            outcome,
            SetOutcome::Set {
                root: doc("doc:root-2"),
                pending: true,
                discarded: Some(2),
            }
        );
        assert_eq!(ws.config().selected_group, None);
        assert!(!ws.replica(&doc("doc:root-1")).dir().exists());
    }

    #[tokio::test]
    async fn failed_save_keeps_old_root_and_its_documents() {
        let dir = tempfile::tempdir().unwrap();
        let mut ws = workspace(dir.path());
        let cancel = CancellationToken::new();
        set(&mut ws, doc("doc:root-1"), false, &cancel).await.unwrap();
        ws.config.selected_group = Some(doc("doc:grp-1"));
        put(&ws, "doc:root-1", "doc:a", json!({ "x": 1 })).await;

        // A regular file where the config directory should be.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        ws.config_path = blocker.join("config.toml");

        let err = set(&mut ws, doc("doc:root-2"), true, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, CliError::Config(_)));
        assert_eq!(ws.config().root_doc_id, Some(doc("doc:root-1")));
        assert_eq!(ws.config().selected_group, Some(doc("doc:grp-1")));

        let old = ws.replica(&doc("doc:root-1"));
        assert!(old.get(&doc("doc:a")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn malformed_root_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut ws = workspace(dir.path());
        let cancel = CancellationToken::new();
        put(&ws, "doc:root-1", "doc:root-1", json!({ "groups": [] })).await;

        let err = set(&mut ws, doc("doc:root-1"), false, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CliError::Resolve(ResolveError::Incomplete { .. })
        ));
        assert_eq!(ws.config().root_doc_id, None);
    }

    #[tokio::test]
    async fn show_reads_identity_from_replica() {
        let dir = tempfile::tempdir().unwrap();
        let ws = workspace(dir.path());
        let cancel = CancellationToken::new();
        put(
            &ws,
            "doc:root-1",
            "doc:root-1",
            json!({
                "personalDocId": "doc:personal-1",
                "groups": [{ "name": "Flatmates", "docId": "doc:grp-1" }]
            }),
        )
        .await;

        let identity = show(&ws, &doc("doc:root-1"), &cancel)
            .await
            .unwrap()
            .ready()
            .unwrap();
        assert_eq!(identity.personal_doc_id, doc("doc:personal-1"));
        assert_eq!(identity.groups.len(), 1);

        let missing = show(&ws, &doc("doc:root-2"), &cancel).await.unwrap();
        assert!(missing.is_pending());
    }
}
