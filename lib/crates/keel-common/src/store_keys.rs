/// Store scopes (the part before `:` in a qualified key)
pub mod scopes {
    /// Application records
    /// Format: apps:{app_id}
    /// Value: JSON-serialized Application
    pub const APPS: &str = "apps";

    /// VPS records
    /// Format: vps:{vps_id}
    /// Value: JSON-serialized VpsConfig
    pub const VPS: &str = "vps";
}

/// Reserved suffix marking encrypted secret entries.
/// Keys ending with it are excluded from generic record listings.
pub const SECRET_SUFFIX: &str = ".secret";

/// Maximum length of an entity identifier.
pub const MAX_ENTITY_ID_LEN: usize = 63;

/// Build the wire key `{scope}:{key}`.
pub fn qualified_key(scope: &str, key: &str) -> String {
    format!("{scope}:{key}")
}

/// Key under which the secret belonging to `entity_id` is stored.
pub fn secret_key(entity_id: &str) -> String {
    format!("{entity_id}{SECRET_SUFFIX}")
}

/// Whether `key` names a secret entry.
pub fn is_secret_key(key: &str) -> bool {
    key.ends_with(SECRET_SUFFIX)
}

/// Vault entity holding the SSH private key of a VPS.
pub fn ssh_key_entity(vps_id: &str) -> String {
    format!("{vps_id}-ssh-key")
}

/// Validate an application or VPS identifier.
///
/// Identifiers end up in store keys, file names and shell arguments, so
/// only `[A-Za-z0-9_-]` is accepted, 1 to 63 characters, starting with an
/// alphanumeric character.
/// SECURITY: Always call before building keys or paths from user input.
pub fn validate_entity_id(id: &str) -> Result<(), &'static str> {
    if id.is_empty() {
        return Err("identifier must not be empty");
    }
    if id.len() > MAX_ENTITY_ID_LEN {
        return Err("identifier must be at most 63 characters");
    }
    if !id.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        return Err("identifier must start with a letter or digit");
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err("identifier may only contain letters, digits, '-' and '_'");
    }
    Ok(())
}
