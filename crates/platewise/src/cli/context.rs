use platewise_core::{Resolution, ResolvedContext};
use tokio_util::sync::CancellationToken;

use super::{CliError, Status, Workspace};

pub async fn handle(workspace: &Workspace, cancel: &CancellationToken) -> Result<Status, CliError> {
    match load(workspace, cancel).await? {
        Resolution::Ready(context) => {
            print_context(&context);
            Ok(Status::Done)
        }
        Resolution::Pending => Ok(Status::Pending),
    }
}

pub(super) fn print_context(context: &ResolvedContext) {
    let name = context
        .identity()
        .group(context.group_doc_id())
        .map(|entry| entry.name.as_str())
        .unwrap_or("");
    println!("Root:      {}", context.root_doc_id());
    println!("Personal:  {}", context.identity().personal_doc_id);
    println!("Group:     {}  {}", context.group_doc_id(), name);
    println!("Primary:   {}", context.group().primary_doc_id);
    println!("Secondary: {}", context.group().secondary_doc_id);
}

/// Resolve the configured root and selected group.
pub async fn load(
    workspace: &Workspace,
    cancel: &CancellationToken,
) -> Result<Resolution<ResolvedContext>, CliError> {
    let root = workspace.root()?;
    let group = workspace
        .config()
        .selected_group
        .as_ref()
        .ok_or(CliError::NoGroup)?;
    Ok(workspace.loader(root).load(root, group, cancel).await?)
}
