use platewise_core::{DocRef, Resolution, ResolvedContext, RootIdentity};
use tokio_util::sync::CancellationToken;

use super::args::GroupCommand;
use super::context::print_context;
use super::{CliError, Status, Workspace};

pub async fn handle(
    command: GroupCommand,
    workspace: &mut Workspace,
    cancel: &CancellationToken,
) -> Result<Status, CliError> {
    match command {
        GroupCommand::List => {
            let Resolution::Ready(identity) = list(workspace, cancel).await? else {
                return Ok(Status::Pending);
            };
            if identity.groups.is_empty() {
                println!("No groups yet");
            }
            let selected = workspace.config().selected_group.as_ref();
            for group in &identity.groups {
                let marker = if Some(&group.doc_id) == selected { "*" } else { " " };
                println!("{} {}  {}", marker, group.doc_id, group.name);
            }
            Ok(Status::Done)
        }
        GroupCommand::Select { group } => match select(workspace, group, cancel).await? {
            Resolution::Ready(context) => {
                print_context(&context);
                Ok(Status::Done)
            }
            Resolution::Pending => Ok(Status::Pending),
        },
    }
}

/// Groups of the configured identity.
pub async fn list(
    workspace: &Workspace,
    cancel: &CancellationToken,
) -> Result<Resolution<RootIdentity>, CliError> {
    let root = workspace.root()?;
    Ok(workspace
        .loader(root)
        .resolve_identity(root, cancel)
        .await?)
}

/// Resolve `group` and, once it is ready, remember it as the selection.
///
/// The saved selection is left alone on any other outcome.
pub async fn select(
    workspace: &mut Workspace,
    group: DocRef,
    cancel: &CancellationToken,
) -> Result<Resolution<ResolvedContext>, CliError> {
    let root = workspace.root()?.clone();
    let resolution = workspace.loader(&root).load(&root, &group, cancel).await?;
    if let Resolution::Ready(_) = &resolution {
        workspace.config.selected_group = Some(group);
        workspace.save()?;
    }
    Ok(resolution)
}
