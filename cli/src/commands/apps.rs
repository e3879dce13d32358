//! `keel app`: deploy, upgrade, inspect and remove applications.

use anyhow::Result;
use clap::{Args, Subcommand};

use crate::app::AppContext;
use crate::application::Orchestrator;
use crate::commands::ProvisionArgs;
use crate::domain::{CreateRequest, DeleteRequest, UpgradeRequest};
use crate::infra::platform::LivePlatform;

/// App subcommands.
#[derive(Subcommand)]
pub enum AppCommand {
    /// Deploy a new application
    Create(CreateArgs),
    /// Move an application to another release
    Upgrade {
        /// Application id
        id: String,
        /// Target version (semver)
        #[arg(long)]
        version: String,
    },
    /// Remove an application
    Delete {
        /// Application id
        id: String,
        /// Also delete the namespace and its persistent volumes
        #[arg(long)]
        remove_namespace: bool,
    },
    /// Show one application
    Show {
        /// Application id
        id: String,
    },
    /// List applications
    List,
    /// Print the application's admin password
    Password {
        /// Application id
        id: String,
    },
    /// List deployable application types
    Catalog,
}

/// Arguments for `keel app create`.
#[derive(Args)]
pub struct CreateArgs {
    /// Application id
    pub id: String,
    /// Catalog type, e.g. code-server
    #[arg(long = "type")]
    pub app_type: String,
    #[arg(long)]
    pub subdomain: String,
    #[arg(long)]
    pub domain: String,
    /// VPS to deploy onto
    #[arg(long)]
    pub vps: String,
    /// Release to deploy (catalog default when omitted)
    #[arg(long)]
    pub version: Option<String>,
    /// Provision the VPS first when it does not exist yet
    #[command(flatten)]
    pub provision: ProvisionArgs,
}

impl CreateArgs {
    fn into_request(self) -> Result<CreateRequest> {
        let provision = self.provision.into_request(&self.vps)?;
        Ok(CreateRequest {
            app_id: self.id,
            app_type: self.app_type,
            subdomain: self.subdomain,
            domain: self.domain,
            vps_id: self.vps,
            version: self.version,
            provision,
        })
    }
}

/// Run the app command.
///
/// # Errors
///
/// Returns the orchestrator error for the chosen operation.
pub async fn run(app: &AppContext, cmd: AppCommand) -> Result<()> {
    if let AppCommand::Catalog = cmd {
        return app.renderer().render_catalog(&app.catalog()?);
    }
    let orchestrator = app.orchestrator()?;
    let result = dispatch(app, &orchestrator, cmd).await;
    orchestrator.pool().close_all().await;
    result
}

async fn dispatch(
    app: &AppContext,
    orchestrator: &Orchestrator<LivePlatform>,
    cmd: AppCommand,
) -> Result<()> {
    match cmd {
        AppCommand::Create(args) => {
            let req = args.into_request()?;
            let reporter = app.reporter(&format!("Deploying {}", req.app_id));
            let result = orchestrator.create(&req, &reporter).await;
            reporter.finish(&result);
            match result {
                Ok(created) => app.renderer().render_app(&created),
                Err(e) => Err(e),
            }
        }
        AppCommand::Upgrade { id, version } => {
            let req = UpgradeRequest { app_id: id, version };
            let reporter = app.reporter(&format!("Upgrading {}", req.app_id));
            let result = orchestrator.upgrade(&req, &reporter).await;
            reporter.finish(&result);
            match result {
                Ok(upgraded) => app.renderer().render_app(&upgraded),
                Err(e) => Err(e),
            }
        }
        AppCommand::Delete { id, remove_namespace } => {
            let prompt = if remove_namespace {
                format!("Delete {id} and all of its data?")
            } else {
                format!("Delete {id}? Persistent volumes are kept.")
            };
            if !app.confirm(&prompt, true)? {
                app.output.info("Cancelled.");
                return Ok(());
            }
            let req = DeleteRequest {
                app_id: id,
                remove_namespace,
            };
            let reporter = app.reporter(&format!("Deleting {}", req.app_id));
            let result = orchestrator.delete(&req, &reporter).await;
            reporter.finish(&result);
            match result {
                Ok(outcome) => app.renderer().render_delete(&outcome),
                Err(e) => Err(e),
            }
        }
        AppCommand::Show { id } => {
            let found = orchestrator.get(&id).await?;
            app.renderer().render_app(&found)
        }
        AppCommand::List => app.renderer().render_app_list(&orchestrator.list().await?),
        AppCommand::Password { id } => {
            let password = orchestrator.password(&id).await?;
            app.renderer().render_password(&id, &password)
        }
        AppCommand::Catalog => app.renderer().render_catalog(orchestrator.catalog()),
    }
}
