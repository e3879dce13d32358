//! SSH key handling through the local `ssh-keygen`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::application::ports::{CommandRunner, KeyGenerator, KeyPair};

const KEYGEN_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SshKeygen<R> {
    runner: Arc<R>,
}

impl<R: CommandRunner> SshKeygen<R> {
    pub fn new(runner: Arc<R>) -> Self {
        Self { runner }
    }

    async fn keygen(&self, args: &[&str]) -> Result<String> {
        let out = self
            .runner
            .run_with_timeout("ssh-keygen", args, KEYGEN_TIMEOUT)
            .await
            .context("running ssh-keygen")?;
        if !out.status.success() {
            anyhow::bail!(
                "ssh-keygen failed: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }
}

fn write_private(path: &std::path::Path, material: &str) -> Result<()> {
    let mut content = material.trim_end().to_string();
    content.push('\n');
    std::fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("chmod {}", path.display()))?;
    }
    Ok(())
}

impl<R: CommandRunner> KeyGenerator for SshKeygen<R> {
    async fn generate(&self, comment: &str) -> Result<KeyPair> {
        let dir = tempfile::tempdir().context("creating key directory")?;
        let path = dir.path().join("id_ed25519");
        let path_str = path.display().to_string();
        self.keygen(&[
            "-t", "ed25519", "-N", "", "-C", comment, "-f", &path_str, "-q",
        ])
        .await?;
        let private_key = tokio::fs::read_to_string(&path)
            .await
            .context("reading generated key")?;
        let public_key = tokio::fs::read_to_string(path.with_extension("pub"))
            .await
            .context("reading generated public key")?;
        Ok(KeyPair {
            public_key: public_key.trim().to_string(),
            private_key,
        })
    }

    async fn public_key(&self, private_key: &str) -> Result<String> {
        let dir = tempfile::tempdir().context("creating key directory")?;
        let path = dir.path().join("key");
        write_private(&path, private_key)?;
        let path_str = path.display().to_string();
        let public = self
            .keygen(&["-y", "-f", &path_str])
            .await
            .context("private key is not a usable OpenSSH key")?;
        Ok(public.trim().to_string())
    }
}
