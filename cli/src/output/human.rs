//! Human-readable terminal renderer.

use std::path::Path;

use keel_common::{AppStatus, Application, VpsConfig};
use owo_colors::OwoColorize as _;

use crate::application::services::orchestrator::{CleanupFailure, DeleteOutcome, VpsTeardown};
use crate::application::services::record_store::FetchMany;
use crate::domain::Catalog;
use crate::domain::config::KeelConfig;
use crate::output::OutputContext;

/// Renders results as human-readable terminal output using `OutputContext`.
pub struct HumanRenderer<'a> {
    ctx: &'a OutputContext,
}

impl<'a> HumanRenderer<'a> {
    #[must_use]
    pub fn new(ctx: &'a OutputContext) -> Self {
        Self { ctx }
    }

    pub fn render_version(&self, version: &str) {
        if !self.ctx.quiet {
            println!("keel {version}");
        }
    }

    /// Render one application in detail.
    pub fn render_app(&self, app: &Application) {
        if self.ctx.quiet {
            return;
        }
        println!();
        self.ctx.header(&app.id);
        self.ctx.kv("Type:      ", &app.app_type);
        println!(
            "  {}  {}",
            "Status:    ".style(self.ctx.styles.dim),
            app.status.style(self.ctx.styles.status(app.status))
        );
        if !app.url.is_empty() {
            self.ctx.kv("URL:       ", &app.url);
        }
        self.ctx.kv("Version:   ", or_dash(&app.version));
        self.ctx.kv("VPS:       ", &app.vps_id);
        self.ctx.kv("Namespace: ", &app.namespace);
        self.ctx.kv("Release:   ", &app.release_name);
        if let Some(stage) = &app.stage {
            self.ctx.kv("Last step: ", stage);
        }
        self.ctx.kv("Updated:   ", &app.updated_at.format("%Y-%m-%d %H:%M UTC").to_string());
        if let Some(err) = &app.error_message {
            println!();
            self.ctx.warn(err);
        }
        println!();
    }

    pub fn render_app_list(&self, list: &FetchMany<Application>) {
        if list.records.is_empty() && list.is_complete() {
            if !self.ctx.quiet {
                println!("No applications. Deploy one: keel app create <id> --type <type> ...");
            }
            return;
        }
        println!(
            "  {}",
            format!(
                "{:<14} {:<12} {:<10} {:<10} {}",
                "ID", "TYPE", "STATUS", "VERSION", "URL"
            )
            .style(self.ctx.styles.bold)
        );
        for app in &list.records {
            let status = format!("{:<10}", app.status);
            println!(
                "  {:<14} {:<12} {} {:<10} {}",
                app.id,
                app.app_type,
                status.style(self.ctx.styles.status(app.status)),
                or_dash(&app.version),
                or_dash(&app.url),
            );
        }
        self.render_missing(list.missing(), "application");
    }

    pub fn render_catalog(&self, catalog: &Catalog) {
        println!(
            "  {}",
            format!("{:<14} {:<10} {:<10} {}", "TYPE", "VERSION", "CHART", "DESCRIPTION")
                .style(self.ctx.styles.bold)
        );
        for entry in catalog.entries() {
            println!(
                "  {:<14} {:<10} {:<10} {}",
                entry.name,
                entry.default_version,
                entry.chart.kind(),
                entry.description
            );
        }
    }

    pub fn render_delete(&self, outcome: &DeleteOutcome) {
        if outcome.cleanup_failures.is_empty() {
            self.ctx.success(&format!("Application {} removed", outcome.app_id));
        } else {
            self.ctx.warn(&format!(
                "Application {} removed with {} cleanup failure(s)",
                outcome.app_id,
                outcome.cleanup_failures.len()
            ));
            self.render_failures(&outcome.cleanup_failures);
        }
    }

    /// The only place a secret is written to the terminal; never suppressed.
    pub fn render_password(&self, password: &str) {
        println!("{password}");
    }

    pub fn render_vps(&self, vps: &VpsConfig) {
        if self.ctx.quiet {
            return;
        }
        println!();
        self.ctx.header(&vps.id);
        self.ctx.kv("Provider:  ", vps.provider.as_str());
        self.ctx.kv("Address:   ", &vps.public_ip);
        self.ctx.kv("SSH user:  ", &vps.ssh_user);
        self.ctx.kv("Power:     ", &vps.power_state.to_string());
        self.ctx.kv("Cost:      ", &format_cost(vps.monthly_cost));
        if !vps.provider_instance_id.is_empty() {
            self.ctx.kv("Instance:  ", &vps.provider_instance_id);
        }
        println!();
    }

    pub fn render_vps_list(&self, list: &FetchMany<VpsConfig>) {
        if list.records.is_empty() && list.is_complete() {
            if !self.ctx.quiet {
                println!("No servers. Provision one: keel vps create <id> --provider hetzner");
            }
            return;
        }
        println!(
            "  {}",
            format!(
                "{:<12} {:<9} {:<16} {:<9} {}",
                "ID", "PROVIDER", "ADDRESS", "POWER", "COST"
            )
            .style(self.ctx.styles.bold)
        );
        for vps in &list.records {
            let power = format!("{:<9}", vps.power_state);
            println!(
                "  {:<12} {:<9} {:<16} {} {}",
                vps.id,
                vps.provider.as_str(),
                vps.public_ip,
                power.style(self.ctx.styles.power(vps.power_state)),
                format_cost(vps.monthly_cost)
            );
        }
        self.render_missing(list.missing(), "server");
    }

    pub fn render_teardown(&self, teardown: &VpsTeardown) {
        if teardown.cleanup_failures.is_empty() {
            self.ctx.success(&format!("VPS {} deleted", teardown.vps_id));
        } else {
            self.ctx.warn(&format!("VPS {} deleted; some local state remains", teardown.vps_id));
            self.render_failures(&teardown.cleanup_failures);
        }
    }

    /// Render the current keel configuration.
    pub fn render_config(&self, config: &KeelConfig, path: &Path) {
        println!();
        println!(
            "  {}",
            format!("Configuration ({})", path.display()).style(self.ctx.styles.header)
        );
        println!();
        let rows = [
            ("store.url:", config.store.url.clone()),
            ("store.fetch_concurrency:", config.store.fetch_concurrency.to_string()),
            ("ssh.user:", config.ssh.user.clone()),
            ("provisioning.server_type:", config.provisioning.server_type.clone()),
            ("provisioning.image:", config.provisioning.image.clone()),
            ("provisioning.location:", config.provisioning.location.clone()),
            ("deploy.cluster_issuer:", config.deploy.cluster_issuer.clone()),
            ("dns.zone:", config.dns.zone.clone().unwrap_or_else(|| "(app domain)".to_string())),
            ("catalog.path:", config.catalog.path.clone().unwrap_or_else(|| "(built-in)".to_string())),
        ];
        for (key, value) in rows {
            println!("  {key:<26} {value}");
        }
        println!();
        println!("  {}", "Environment:".style(self.ctx.styles.bold));
        for var in ["KEEL_CONFIG", "KEEL_STORE_TOKEN", "KEEL_HCLOUD_TOKEN", "KEEL_DNS_TOKEN"] {
            println!("    {:<20} {}", format!("{var}:"), env_presence(var));
        }
        println!();
    }

    fn render_failures(&self, failures: &[CleanupFailure]) {
        for failure in failures {
            println!(
                "    {} {}: {}",
                "✗".style(self.ctx.styles.error),
                failure.step,
                failure.message
            );
        }
    }

    fn render_missing(&self, missing: usize, noun: &str) {
        if missing > 0 {
            self.ctx.warn(&format!("{missing} {noun} record(s) could not be read"));
        }
    }
}

// ── Display helpers ──────────────────────────────────────────────────────────

/// Monthly cost for display; providers without pricing show a dash.
#[must_use]
pub fn format_cost(monthly: f64) -> String {
    if monthly > 0.0 {
        format!("€{monthly:.2}/mo")
    } else {
        "-".to_string()
    }
}

fn or_dash(value: &str) -> &str {
    if value.is_empty() { "-" } else { value }
}

/// Whether `var` is set, without revealing its value.
fn env_presence(var: &str) -> String {
    match std::env::var(var) {
        Ok(v) if var == "KEEL_CONFIG" => v,
        Ok(_) => "(set)".to_string(),
        Err(_) => "(not set)".to_string(),
    }
}
