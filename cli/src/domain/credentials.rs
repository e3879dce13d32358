//! Live credential probes.
//!
//! A probe names one place a deployed workload keeps its generated admin
//! credential and knows how to build the remote command that reads it and how
//! to pull the value out of that command's output. Probes are tried in the
//! canonical order defined by [`ProbeKind`].

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use super::command::RemoteCommand;

/// kubeconfig written by k3s on the host.
pub const KUBECONFIG: &str = "/etc/rancher/k3s/k3s.yaml";

/// Where a probe looks, in canonical priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProbeKind {
    KubernetesSecret,
    ConfigFile,
    Environment,
    Logs,
}

/// One candidate location for a workload's credential.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeSpec {
    /// A key inside a Kubernetes secret. `name` may use `{{RELEASE_NAME}}`.
    KubernetesSecret { name: String, key: String },
    /// A YAML file inside the workload container, read with `cat`.
    ConfigFile { path: String, field: String },
    /// An environment variable of the workload container.
    Environment { variable: String },
    /// The first capture group of `pattern` in the workload's recent logs.
    Logs { pattern: String },
}

/// The deployed workload a probe runs against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub namespace: String,
    pub release_name: String,
    /// `kubectl` resource reference, e.g. `deploy/code-server-app-1001`.
    pub workload: String,
}

impl ProbeSpec {
    #[must_use]
    pub fn kind(&self) -> ProbeKind {
        match self {
            Self::KubernetesSecret { .. } => ProbeKind::KubernetesSecret,
            Self::ConfigFile { .. } => ProbeKind::ConfigFile,
            Self::Environment { .. } => ProbeKind::Environment,
            Self::Logs { .. } => ProbeKind::Logs,
        }
    }

    /// Short human label used in logs.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::KubernetesSecret { name, key } => format!("secret {name}/{key}"),
            Self::ConfigFile { path, field } => format!("file {path}#{field}"),
            Self::Environment { variable } => format!("env {variable}"),
            Self::Logs { .. } => "logs".to_string(),
        }
    }

    /// Remote command that reads the raw material for this probe.
    #[must_use]
    pub fn command(&self, target: &ProbeTarget) -> RemoteCommand {
        let kubectl = || {
            RemoteCommand::new("kubectl")
                .args(["--kubeconfig", KUBECONFIG, "-n"])
                .arg(&target.namespace)
        };
        match self {
            Self::KubernetesSecret { name, key } => kubectl()
                .args(["get", "secret"])
                .arg(name.replace("{{RELEASE_NAME}}", &target.release_name))
                .arg(format!("-o=jsonpath={{.data.{key}}}")),
            Self::ConfigFile { path, .. } => kubectl()
                .arg("exec")
                .arg(&target.workload)
                .args(["--", "cat"])
                .arg(path),
            Self::Environment { .. } => kubectl()
                .arg("exec")
                .arg(&target.workload)
                .args(["--", "env"]),
            Self::Logs { .. } => kubectl()
                .arg("logs")
                .arg(&target.workload)
                .arg("--tail=500"),
        }
    }

    /// Pull the credential out of the probe command's stdout.
    #[must_use]
    pub fn extract(&self, stdout: &str) -> Option<String> {
        let value = match self {
            Self::KubernetesSecret { .. } => decode_secret_value(stdout),
            Self::ConfigFile { field, .. } => extract_yaml_field(stdout, field),
            Self::Environment { variable } => extract_env_var(stdout, variable),
            Self::Logs { pattern } => extract_log_match(stdout, pattern),
        }?;
        let value = value.trim().to_string();
        (!value.is_empty()).then_some(value)
    }
}

/// Stable-sort `probes` into canonical priority order.
#[must_use]
pub fn canonical_order(probes: &[ProbeSpec]) -> Vec<ProbeSpec> {
    let mut ordered = probes.to_vec();
    ordered.sort_by_key(ProbeSpec::kind);
    ordered
}

fn decode_secret_value(stdout: &str) -> Option<String> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(stdout.trim())
        .ok()?;
    String::from_utf8(bytes).ok()
}

/// Top-level scalar `field` of a YAML document.
#[must_use]
pub fn extract_yaml_field(doc: &str, field: &str) -> Option<String> {
    let value: serde_yaml::Value = serde_yaml::from_str(doc).ok()?;
    match value.get(field)? {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Value of `variable` in `env`-style `KEY=value` output.
#[must_use]
pub fn extract_env_var(env_output: &str, variable: &str) -> Option<String> {
    env_output.lines().find_map(|line| {
        line.split_once('=')
            .filter(|(k, _)| *k == variable)
            .map(|(_, v)| v.to_string())
    })
}

/// First capture group of the last line matching `pattern`.
#[must_use]
pub fn extract_log_match(logs: &str, pattern: &str) -> Option<String> {
    let re = regex::Regex::new(pattern).ok()?;
    logs.lines()
        .rev()
        .find_map(|line| re.captures(line)?.get(1).map(|m| m.as_str().to_string()))
}
