//! age passphrase encryption keyed to the caller's store token.

use std::io::{Read as _, Write as _};

use age::secrecy::Secret;
use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use crate::application::ports::SecretCipher;

/// Domain separation for the key derivation.
const KEY_TAG: &[u8] = b"keel/credential-vault/v1";

/// Encrypts secrets with an age passphrase derived from the account token,
/// so only holders of the same token can read them back.
pub struct AgeCipher {
    passphrase: Secret<String>,
}

impl AgeCipher {
    #[must_use]
    pub fn from_token(token: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(KEY_TAG);
        hasher.update(token.as_bytes());
        let digest = hasher.finalize();
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        Self {
            passphrase: Secret::new(hex),
        }
    }
}

impl SecretCipher for AgeCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let encryptor = age::Encryptor::with_user_passphrase(self.passphrase.clone());
        let mut encrypted = vec![];
        let mut writer = encryptor
            .wrap_output(&mut encrypted)
            .context("starting age stream")?;
        writer.write_all(plaintext).context("writing age stream")?;
        writer.finish().context("finishing age stream")?;
        Ok(encrypted)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let age::Decryptor::Passphrase(decryptor) =
            age::Decryptor::new(ciphertext).context("reading age header")?
        else {
            anyhow::bail!("secret was not sealed with a passphrase");
        };
        let mut reader = decryptor
            .decrypt(&self.passphrase, None)
            .context("wrong account token or corrupted secret")?;
        let mut decrypted = vec![];
        reader
            .read_to_end(&mut decrypted)
            .context("reading age stream")?;
        Ok(decrypted)
    }

    fn name(&self) -> &'static str {
        "age-scrypt"
    }
}
