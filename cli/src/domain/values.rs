//! Naming rules and values-template rendering.

use std::sync::LazyLock;

use regex::Regex;

use super::error::PipelineError;

/// Helm caps release names at 53 characters.
pub const MAX_RELEASE_NAME_LEN: usize = 53;

/// Kubernetes caps namespace names at 63 characters.
pub const MAX_NAMESPACE_LEN: usize = 63;

#[allow(clippy::expect_used)] // compile-time constant pattern
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").expect("valid placeholder pattern")
});

/// Values substituted into a per-type values template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateVars {
    pub domain: String,
    pub subdomain: String,
    pub version: String,
    pub release_name: String,
    pub namespace: String,
}

impl TemplateVars {
    #[must_use]
    pub fn host(&self) -> String {
        format!("{}.{}", self.subdomain, self.domain)
    }

    fn lookup(&self, name: &str) -> Option<String> {
        match name {
            "DOMAIN" => Some(self.domain.clone()),
            "SUBDOMAIN" => Some(self.subdomain.clone()),
            "HOST" => Some(self.host()),
            "VERSION" => Some(self.version.clone()),
            "RELEASE_NAME" => Some(self.release_name.clone()),
            "NAMESPACE" => Some(self.namespace.clone()),
            _ => None,
        }
    }
}

/// Substitute every `{{NAME}}` placeholder in `template`.
///
/// # Errors
///
/// Returns `PipelineError::Validation` naming the first unknown placeholder.
pub fn render_template(template: &str, vars: &TemplateVars) -> Result<String, PipelineError> {
    if let Some(unknown) = PLACEHOLDER
        .captures_iter(template)
        .filter_map(|c| c.get(1))
        .find(|m| vars.lookup(m.as_str()).is_none())
    {
        return Err(PipelineError::validation(format!(
            "unknown placeholder {{{{{}}}}} in values template",
            unknown.as_str()
        )));
    }
    Ok(PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| {
            vars.lookup(&caps[1]).unwrap_or_default()
        })
        .into_owned())
}

/// Lowercase DNS-1123 label derived from `raw`, at most `max` characters.
#[must_use]
pub fn dns_label(raw: &str, max: usize) -> String {
    let mapped: String = raw
        .chars()
        .map(|c| match c {
            'A'..='Z' => c.to_ascii_lowercase(),
            'a'..='z' | '0'..='9' => c,
            _ => '-',
        })
        .take(max)
        .collect();
    mapped.trim_matches('-').to_string()
}

/// Helm release name for `app_id` of type `app_type`.
#[must_use]
pub fn release_name(app_type: &str, app_id: &str) -> String {
    dns_label(&format!("{app_type}-{app_id}"), MAX_RELEASE_NAME_LEN)
}

/// Namespace the application is installed into.
#[must_use]
pub fn namespace_for(app_id: &str) -> String {
    dns_label(app_id, MAX_NAMESPACE_LEN)
}

#[must_use]
pub fn app_url(subdomain: &str, domain: &str) -> String {
    format!("https://{subdomain}.{domain}")
}

/// Validate a single DNS label such as a subdomain.
///
/// # Errors
///
/// Returns `PipelineError::Validation` when `label` is not a lowercase
/// DNS-1123 label.
pub fn validate_subdomain(label: &str) -> Result<(), PipelineError> {
    let valid = !label.is_empty()
        && label.len() <= 63
        && label
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && !label.starts_with('-')
        && !label.ends_with('-');
    if valid {
        Ok(())
    } else {
        Err(PipelineError::validation(format!(
            "invalid subdomain '{label}': use lowercase letters, digits and '-'"
        )))
    }
}

/// Validate a dotted domain name such as `example.com`.
///
/// # Errors
///
/// Returns `PipelineError::Validation` when any label is invalid or the name
/// has fewer than two labels.
pub fn validate_domain(domain: &str) -> Result<(), PipelineError> {
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 || domain.len() > 253 {
        return Err(PipelineError::validation(format!(
            "invalid domain '{domain}'"
        )));
    }
    for label in labels {
        validate_subdomain(label)
            .map_err(|_| PipelineError::validation(format!("invalid domain '{domain}'")))?;
    }
    Ok(())
}

/// Validate a release version as semver (a leading `v` is accepted).
///
/// # Errors
///
/// Returns `PipelineError::Validation` when `version` is not semver.
pub fn parse_version(version: &str) -> Result<semver::Version, PipelineError> {
    semver::Version::parse(version.trim_start_matches('v'))
        .map_err(|e| PipelineError::validation(format!("invalid version '{version}': {e}")))
}
