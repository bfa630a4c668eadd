use std::path::Path;

use platewise_core::{DocRef, DocumentStore, encode_payload};
use serde_json::Value;

use super::args::ReplicaCommand;
use super::{CliError, Status, Workspace};

pub async fn handle(command: ReplicaCommand, workspace: &Workspace) -> Result<Status, CliError> {
    match command {
        ReplicaCommand::Put {
            doc,
            file,
            raw,
            root,
        } => {
            let root = match root {
                Some(root) => root,
                None => workspace.root()?.clone(),
            };
            let written = put(workspace, &root, &doc, &file, raw).await?;
            println!("Stored {} ({} bytes) in the replica of {}", doc, written, root);
            Ok(Status::Done)
        }
    }
}

/// Write `file` as the snapshot of `doc` in the replica of `root`.
///
/// Unless `raw` is set the file holds the bare payload object and is
/// wrapped in the reserved field first.
pub async fn put(
    workspace: &Workspace,
    root: &DocRef,
    doc: &DocRef,
    file: &Path,
    raw: bool,
) -> Result<usize, CliError> {
    let contents = tokio::fs::read(file)
        .await
        .map_err(|source| CliError::ReadInput {
            path: file.to_path_buf(),
            source,
        })?;

    let snapshot = if raw {
        contents
    } else {
        let payload: Value = serde_json::from_slice(&contents)?;
        encode_payload(&payload)
    };

    let written = snapshot.len();
    workspace.replica(root).put(doc, snapshot).await?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::identity;
    use crate::cli::test_support::{doc, workspace};
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn put_payload_file_makes_identity_resolvable() {
        let dir = tempfile::tempdir().unwrap();
        let ws = workspace(dir.path());
        let file = dir.path().join("root.json");
        std::fs::write(&file, r#"{"personalDocId":"doc:personal-1","groups":[]}"#).unwrap();

        put(&ws, &doc("doc:root-1"), &doc("doc:root-1"), &file, false)
            .await
            .unwrap();

        let identity = identity::show(&ws, &doc("doc:root-1"), &CancellationToken::new())
            .await
            .unwrap()
            .ready()
            .unwrap();
        assert!(identity.groups.is_empty());
    }

    #[tokio::test]
    async fn raw_put_stores_bytes_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let ws = workspace(dir.path());
        let file = dir.path().join("snapshot.bin");
        std::fs::write(&file, b"not json at all").unwrap();

        let written = put(&ws, &doc("doc:root-1"), &doc("doc:x"), &file, true)
            .await
            .unwrap();
        assert_eq!(written, 15);
        let stored = ws
            .replica(&doc("doc:root-1"))
            .get(&doc("doc:x"))
            .await
            .unwrap();
        assert_eq!(stored, Some(b"not json at all".to_vec()));
    }

    #[tokio::test]
    async fn invalid_json_payload_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ws = workspace(dir.path());
        let file = dir.path().join("broken.json");
        std::fs::write(&file, "{ nope").unwrap();

        let err = put(&ws, &doc("doc:root-1"), &doc("doc:x"), &file, false)
            .await
            .unwrap_err();
        assert!(matches!(err, CliError::InvalidJson(_)));
    }

    #[tokio::test]
    async fn missing_input_file_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let ws = workspace(dir.path());
        let file = dir.path().join("absent.json");

        let err = put(&ws, &doc("doc:root-1"), &doc("doc:x"), &file, false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("absent.json"));
    }
}
