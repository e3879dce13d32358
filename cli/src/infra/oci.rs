//! Oracle Cloud compute through the `oci` CLI.
//!
//! `OciCompute<R>` routes every call through a `CommandRunner` so tests can
//! inject a mock runner without spawning real processes.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::Engine as _;
use keel_common::PowerOp;
use serde::Deserialize;
use tracing::info;

use crate::application::ports::{CommandRunner, ComputeProvider, Instance, InstanceSpec};
use crate::domain::config::OciConfig;

/// Launch and terminate wait for the lifecycle state change.
const LIFECYCLE_TIMEOUT: Duration = Duration::from_secs(900);

const FLEX_SHAPE_CONFIG: &str = r#"{"ocpus":1,"memoryInGBs":6}"#;

pub struct OciCompute<R> {
    runner: Arc<R>,
    config: OciConfig,
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct LaunchedInstance {
    id: String,
}

#[derive(Deserialize)]
struct Vnic {
    #[serde(rename = "public-ip")]
    public_ip: Option<String>,
}

fn power_action(op: PowerOp) -> &'static str {
    match op {
        PowerOp::Start => "START",
        PowerOp::Stop => "SOFTSTOP",
        PowerOp::Reboot => "SOFTRESET",
    }
}

impl<R: CommandRunner> OciCompute<R> {
    pub fn new(runner: Arc<R>, config: OciConfig) -> Self {
        Self { runner, config }
    }

    async fn oci(&self, args: &[&str], timeout: Duration) -> Result<Vec<u8>> {
        let out = self
            .runner
            .run_with_timeout("oci", args, timeout)
            .await
            .context("running oci CLI")?;
        if !out.status.success() {
            anyhow::bail!(
                "oci {} failed: {}",
                args.iter().take(3).copied().collect::<Vec<_>>().join(" "),
                String::from_utf8_lossy(&out.stderr).trim()
            );
        }
        Ok(out.stdout)
    }

    fn launch_args(&self, spec: &InstanceSpec, metadata: &str) -> Vec<String> {
        let mut args = vec![
            "compute".to_string(),
            "instance".to_string(),
            "launch".to_string(),
            "--compartment-id".to_string(),
            self.config.compartment_id.clone(),
            "--availability-domain".to_string(),
            self.config.availability_domain.clone(),
            "--subnet-id".to_string(),
            self.config.subnet_id.clone(),
            "--image-id".to_string(),
            self.config.image_id.clone(),
            "--shape".to_string(),
            self.config.shape.clone(),
            "--display-name".to_string(),
            spec.name.clone(),
            "--assign-public-ip".to_string(),
            "true".to_string(),
            "--metadata".to_string(),
            metadata.to_string(),
            "--wait-for-state".to_string(),
            "RUNNING".to_string(),
        ];
        // Flex shapes have no default sizing.
        if self.config.shape.ends_with(".Flex") {
            args.push("--shape-config".to_string());
            args.push(FLEX_SHAPE_CONFIG.to_string());
        }
        args
    }
}

impl<R: CommandRunner> ComputeProvider for OciCompute<R> {
    async fn create_instance(&self, spec: &InstanceSpec) -> Result<Instance> {
        let user_data = base64::engine::general_purpose::STANDARD.encode(&spec.user_data);
        let metadata = serde_json::json!({ "user_data": user_data }).to_string();
        let args = self.launch_args(spec, &metadata);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let launched: Envelope<LaunchedInstance> =
            serde_json::from_slice(&self.oci(&args, LIFECYCLE_TIMEOUT).await?)
                .context("parsing oci launch output")?;
        let id = launched.data.id;

        let vnics: Envelope<Vec<Vnic>> = serde_json::from_slice(
            &self
                .oci(
                    &["compute", "instance", "list-vnics", "--instance-id", &id],
                    Duration::from_secs(60),
                )
                .await?,
        )
        .context("parsing oci vnic output")?;
        let public_ip = vnics
            .data
            .into_iter()
            .find_map(|v| v.public_ip)
            .ok_or_else(|| anyhow::anyhow!("instance {id} has no public IP"))?;
        info!(id = %id, ip = %public_ip, "oci instance launched");
        Ok(Instance {
            provider_instance_id: id,
            public_ip,
            hourly_cost: 0.0,
            monthly_cost: 0.0,
        })
    }

    async fn delete_instance(&self, provider_instance_id: &str) -> Result<()> {
        if provider_instance_id.is_empty() {
            return Ok(());
        }
        self.oci(
            &[
                "compute",
                "instance",
                "terminate",
                "--instance-id",
                provider_instance_id,
                "--force",
                "--wait-for-state",
                "TERMINATED",
            ],
            LIFECYCLE_TIMEOUT,
        )
        .await?;
        Ok(())
    }

    async fn power(&self, provider_instance_id: &str, op: PowerOp) -> Result<()> {
        self.oci(
            &[
                "compute",
                "instance",
                "action",
                "--instance-id",
                provider_instance_id,
                "--action",
                power_action(op),
            ],
            LIFECYCLE_TIMEOUT,
        )
        .await?;
        Ok(())
    }
}
