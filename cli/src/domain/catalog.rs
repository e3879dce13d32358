//! Application catalog: what can be deployed and how.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::credentials::{ProbeSpec, canonical_order};
use super::error::{ConfigError, PipelineError};
use super::values::{TemplateVars, render_template};

/// Where a chart comes from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChartSource {
    /// A chart shipped with keel, packed locally and extracted on the host.
    LocalBundled { path: String },
    /// A chart directory inside a git repository, shallow-cloned on the host.
    Git {
        url: String,
        reference: String,
        chart_dir: String,
    },
    /// A chart published in a Helm repository.
    HelmRepository {
        name: String,
        url: String,
        chart: String,
    },
}

impl ChartSource {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LocalBundled { .. } => "bundled",
            Self::Git { .. } => "git",
            Self::HelmRepository { .. } => "helm-repo",
        }
    }
}

fn default_workload() -> String {
    "deploy/{{RELEASE_NAME}}".to_string()
}

/// One deployable application type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub chart: ChartSource,
    /// YAML values document with `{{PLACEHOLDER}}` markers.
    pub values_template: String,
    pub default_version: String,
    /// GitHub `owner/repo` whose latest release bounds upgrades.
    #[serde(default)]
    pub version_source: Option<String>,
    /// `kubectl` reference of the main workload; may use `{{RELEASE_NAME}}`.
    #[serde(default = "default_workload")]
    pub workload: String,
    #[serde(default)]
    pub credential_probes: Vec<ProbeSpec>,
}

impl CatalogEntry {
    #[must_use]
    pub fn workload_for(&self, release_name: &str) -> String {
        self.workload.replace("{{RELEASE_NAME}}", release_name)
    }

    fn check(&self) -> Result<(), ConfigError> {
        let sample = TemplateVars {
            domain: "example.com".to_string(),
            subdomain: "app".to_string(),
            version: self.default_version.clone(),
            release_name: "release".to_string(),
            namespace: "namespace".to_string(),
        };
        render_template(&self.values_template, &sample).map_err(|e| ConfigError::InvalidValue {
            key: format!("catalog.{}.values_template", self.name),
            reason: e.to_string(),
        })?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    apps: Vec<CatalogEntry>,
}

/// The set of deployable application types, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: BTreeMap<String, CatalogEntry>,
}

impl Catalog {
    /// Entries shipped with keel.
    #[must_use]
    pub fn builtin() -> Self {
        let mut catalog = Self::default();
        for entry in [code_server(), gitea(), uptime_kuma()] {
            catalog.insert(entry);
        }
        catalog
    }

    /// Parse a catalog document (`apps: [...]`).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if the YAML is malformed or an
    /// entry's values template uses an unknown placeholder.
    pub fn from_yaml(doc: &str) -> Result<Self, ConfigError> {
        let file: CatalogFile =
            serde_yaml::from_str(doc).map_err(|e| ConfigError::InvalidValue {
                key: "catalog".to_string(),
                reason: e.to_string(),
            })?;
        let mut catalog = Self::default();
        for entry in file.apps {
            entry.check()?;
            catalog.insert(entry);
        }
        Ok(catalog)
    }

    /// Overlay `other` on top of `self`; entries with the same name are replaced.
    #[must_use]
    pub fn merged_with(mut self, other: Catalog) -> Self {
        self.entries.extend(other.entries);
        self
    }

    /// Look up an application type.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Validation` listing the known types when
    /// `name` is not in the catalog.
    pub fn get(&self, name: &str) -> Result<&CatalogEntry, PipelineError> {
        self.entries.get(name).ok_or_else(|| {
            PipelineError::validation(format!(
                "unknown application type '{name}' (available: {})",
                self.names().join(", ")
            ))
        })
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Entries in name order.
    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.values()
    }

    fn insert(&mut self, mut entry: CatalogEntry) {
        entry.credential_probes = canonical_order(&entry.credential_probes);
        self.entries.insert(entry.name.clone(), entry);
    }
}

fn code_server() -> CatalogEntry {
    CatalogEntry {
        name: "code-server".to_string(),
        description: "VS Code in the browser".to_string(),
        chart: ChartSource::Git {
            url: "https://github.com/coder/code-server".to_string(),
            reference: "main".to_string(),
            chart_dir: "ci/helm-chart".to_string(),
        },
        values_template: "\
image:
  tag: \"{{VERSION}}\"
ingress:
  enabled: true
  hosts:
    - host: {{HOST}}
      paths:
        - /
  tls:
    - secretName: {{RELEASE_NAME}}-tls
      hosts:
        - {{HOST}}
persistence:
  enabled: true
  size: 10Gi
"
        .to_string(),
        default_version: "4.19.0".to_string(),
        version_source: Some("coder/code-server".to_string()),
        workload: default_workload(),
        credential_probes: vec![
            ProbeSpec::KubernetesSecret {
                name: "{{RELEASE_NAME}}".to_string(),
                key: "password".to_string(),
            },
            ProbeSpec::ConfigFile {
                path: "/home/coder/.config/code-server/config.yaml".to_string(),
                field: "password".to_string(),
            },
            ProbeSpec::Environment {
                variable: "PASSWORD".to_string(),
            },
            ProbeSpec::Logs {
                pattern: r"[Pp]assword(?: is|:)\s+(\S+)".to_string(),
            },
        ],
    }
}

fn gitea() -> CatalogEntry {
    CatalogEntry {
        name: "gitea".to_string(),
        description: "Self-hosted Git service".to_string(),
        chart: ChartSource::HelmRepository {
            name: "gitea-charts".to_string(),
            url: "https://dl.gitea.com/charts/".to_string(),
            chart: "gitea".to_string(),
        },
        values_template: "\
image:
  tag: \"{{VERSION}}\"
ingress:
  enabled: true
  hosts:
    - host: {{HOST}}
      paths:
        - path: /
          pathType: Prefix
  tls:
    - secretName: {{RELEASE_NAME}}-tls
      hosts:
        - {{HOST}}
gitea:
  config:
    server:
      DOMAIN: {{HOST}}
      ROOT_URL: https://{{HOST}}/
"
        .to_string(),
        default_version: "1.22.3".to_string(),
        version_source: Some("go-gitea/gitea".to_string()),
        workload: default_workload(),
        credential_probes: vec![
            ProbeSpec::Environment {
                variable: "GITEA_ADMIN_PASSWORD".to_string(),
            },
            ProbeSpec::Logs {
                pattern: r"admin password:\s+(\S+)".to_string(),
            },
        ],
    }
}

fn uptime_kuma() -> CatalogEntry {
    CatalogEntry {
        name: "uptime-kuma".to_string(),
        description: "Self-hosted uptime monitoring".to_string(),
        chart: ChartSource::LocalBundled {
            path: "uptime-kuma".to_string(),
        },
        values_template: "\
image:
  tag: \"{{VERSION}}\"
host: {{HOST}}
tlsSecretName: {{RELEASE_NAME}}-tls
"
        .to_string(),
        default_version: "1.23.16".to_string(),
        version_source: Some("louislam/uptime-kuma".to_string()),
        workload: default_workload(),
        credential_probes: vec![],
    }
}
