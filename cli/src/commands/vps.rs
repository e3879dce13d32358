//! `keel vps`: provision, power and remove servers.

use anyhow::Result;
use clap::{Subcommand, ValueEnum};
use keel_common::PowerOp;

use crate::app::AppContext;
use crate::application::Orchestrator;
use crate::commands::ProvisionArgs;
use crate::infra::platform::LivePlatform;
use crate::infra::ssh::{attach_terminal, default_runtime_dir};
use crate::output::JsonRenderer;

/// VPS subcommands.
#[derive(Subcommand)]
pub enum VpsCommand {
    /// List servers
    List,
    /// Provision a server, or register an existing one
    Create {
        /// VPS id
        id: String,
        #[command(flatten)]
        provision: ProvisionArgs,
    },
    /// Start, stop or reboot a server
    Power {
        /// VPS id
        id: String,
        #[arg(value_enum)]
        action: PowerAction,
    },
    /// Delete a server and its instance
    Delete {
        /// VPS id
        id: String,
        /// Delete even when applications still reference it
        #[arg(long)]
        force: bool,
    },
    /// Open a terminal on a server
    Ssh {
        /// VPS id
        id: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum PowerAction {
    Start,
    Stop,
    Reboot,
}

impl From<PowerAction> for PowerOp {
    fn from(action: PowerAction) -> Self {
        match action {
            PowerAction::Start => Self::Start,
            PowerAction::Stop => Self::Stop,
            PowerAction::Reboot => Self::Reboot,
        }
    }
}

/// Run the vps command.
///
/// # Errors
///
/// Returns the orchestrator error for the chosen operation.
pub async fn run(app: &AppContext, cmd: VpsCommand) -> Result<()> {
    let orchestrator = app.orchestrator()?;
    let result = dispatch(app, &orchestrator, cmd).await;
    orchestrator.pool().close_all().await;
    result
}

async fn dispatch(
    app: &AppContext,
    orchestrator: &Orchestrator<LivePlatform>,
    cmd: VpsCommand,
) -> Result<()> {
    match cmd {
        VpsCommand::List => app.renderer().render_vps_list(&orchestrator.list_vps().await?),
        VpsCommand::Create { id, provision } => {
            let Some(req) = provision.into_request(&id)? else {
                anyhow::bail!("--provider is required");
            };
            let reporter = app.reporter(&format!("Provisioning {id}"));
            let result = orchestrator.provision(&req, &reporter).await;
            reporter.finish(&result);
            match result {
                Ok(vps) => app.renderer().render_vps(&vps),
                Err(e) => Err(e),
            }
        }
        VpsCommand::Power { id, action } => {
            let vps = orchestrator.power_vps(&id, action.into()).await?;
            app.renderer().render_vps(&vps)
        }
        VpsCommand::Delete { id, force } => {
            if !app.confirm(&format!("Delete {id} and its cloud instance?"), true)? {
                app.output.info("Cancelled.");
                return Ok(());
            }
            let teardown = orchestrator.delete_vps(&id, force).await?;
            app.renderer().render_teardown(&teardown)
        }
        VpsCommand::Ssh { id } => {
            let session = orchestrator.open_terminal(&id).await?;
            if app.is_json() {
                JsonRenderer::emit(&session)
            } else {
                let status = attach_terminal(
                    &default_runtime_dir()?,
                    &session.vps_id,
                    &session.host,
                    &session.user,
                    session.port,
                )
                .await?;
                if !status.success() {
                    app.output.warn(&format!("ssh exited with {status}"));
                }
                Ok(())
            }
        }
    }
}
