pub mod store_keys;
pub mod types;

pub use store_keys::{
    SECRET_SUFFIX, is_secret_key, qualified_key, scopes, secret_key, ssh_key_entity,
    validate_entity_id,
};
pub use types::*;
