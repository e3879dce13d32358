//! Latest upstream release lookup on GitHub.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::application::ports::VersionSource;
use crate::domain::values::parse_version;

pub const GITHUB_API: &str = "https://api.github.com";

pub struct GithubReleases {
    client: Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct Release {
    tag_name: String,
}

impl GithubReleases {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(token: Option<String>, timeout: Duration) -> Result<Self> {
        Self::with_url(GITHUB_API, token, timeout)
    }

    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_url(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        // GitHub rejects requests without a User-Agent.
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("keel/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            token: token.filter(|t| !t.is_empty()),
        })
    }

    fn release_url(&self, project: &str) -> String {
        format!("{}/repos/{project}/releases/latest", self.base_url)
    }
}

impl VersionSource for GithubReleases {
    async fn latest_version(&self, project: &str) -> Result<semver::Version> {
        let mut request = self
            .client
            .get(self.release_url(project))
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("fetching latest release of {project}"))?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("GitHub returned HTTP {} for {project}", status.as_u16());
        }
        let release: Release = response
            .json()
            .await
            .with_context(|| format!("parsing release of {project}"))?;
        let version = parse_version(&release.tag_name)?;
        debug!(project, %version, "latest upstream release");
        Ok(version)
    }
}
