// Encryption-at-rest for secret wizard fields.
//
// Values are sealed with AES-256-GCM under a per-installation master key that lives next to
// the durable step store. Sealed values carry the `ENCv1:` prefix so plaintext written by an
// older store can still be read back.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::{Context, Result};
use base64::Engine;
use log::{debug, warn};
use ring::rand::{SecureRandom, SystemRandom};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::OnceCell;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

const ENC_PREFIX: &str = "ENCv1:";
const KEY_BYTES: usize = 32;
const NONCE_BYTES: usize = 12;

#[derive(Debug)]
pub struct SecretProtector {
    key_path: PathBuf,
    key: OnceCell<[u8; KEY_BYTES]>,
}

impl SecretProtector {
    pub fn new(key_path: PathBuf) -> Self {
        Self {
            key_path,
            key: OnceCell::new(),
        }
    }

    pub fn is_encrypted(&self, value: &str) -> bool {
        value.starts_with(ENC_PREFIX)
    }

    pub async fn encrypt(&self, plaintext: &str) -> Result<String> {
        if plaintext.is_empty() {
            return Ok(ENC_PREFIX.to_string());
        }

        let cipher = self.cipher().await?;
        let mut nonce_bytes = [0u8; NONCE_BYTES];
        SystemRandom::new()
            .fill(&mut nonce_bytes)
            .map_err(|_| anyhow::anyhow!("Failed to generate nonce"))?;

        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|_| anyhow::anyhow!("Secret encryption failed"))?;

        // nonce || ciphertext+tag
        let mut blob = Vec::with_capacity(NONCE_BYTES + sealed.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&sealed);

        Ok(format!(
            "{}{}",
            ENC_PREFIX,
            base64::engine::general_purpose::STANDARD.encode(blob)
        ))
    }

    pub async fn decrypt(&self, value: &str) -> Result<String> {
        let Some(encoded) = value.strip_prefix(ENC_PREFIX) else {
            return Ok(value.to_string());
        };
        if encoded.is_empty() {
            return Ok(String::new());
        }

        let blob = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .context("Failed to base64-decode encrypted secret")?;
        if blob.len() < NONCE_BYTES {
            anyhow::bail!("Encrypted secret blob is too short");
        }
        let (nonce_bytes, sealed) = blob.split_at(NONCE_BYTES);

        let cipher = self.cipher().await?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), sealed)
            .map_err(|_| anyhow::anyhow!("Secret decryption failed (wrong key or tampered value)"))?;
        String::from_utf8(plaintext).context("Decrypted secret is not valid UTF-8")
    }

    async fn cipher(&self) -> Result<Aes256Gcm> {
        let key = self.master_key().await?;
        Aes256Gcm::new_from_slice(key)
            .map_err(|_| anyhow::anyhow!("Internal error: invalid AES-256 key length"))
    }

    async fn master_key(&self) -> Result<&[u8; KEY_BYTES]> {
        self.key
            .get_or_try_init(|| async {
                if let Some(existing) = self.read_key_file().await? {
                    return Ok(existing);
                }

                let mut key = [0u8; KEY_BYTES];
                SystemRandom::new()
                    .fill(&mut key)
                    .map_err(|_| anyhow::anyhow!("Failed to generate master key"))?;

                match self.persist_new_key(&key).await {
                    Ok(()) => {
                        debug!(
                            "[PHASE: security] [STEP: master_key] Created master key at {:?}",
                            self.key_path
                        );
                        Ok(key)
                    }
                    // Another process won the create race; use its key.
                    Err(e) => match self.read_key_file().await? {
                        Some(theirs) => Ok(theirs),
                        None => Err(e),
                    },
                }
            })
            .await
    }

    async fn read_key_file(&self) -> Result<Option<[u8; KEY_BYTES]>> {
        if !tokio::fs::try_exists(&self.key_path).await.unwrap_or(false) {
            return Ok(None);
        }
        let raw = tokio::fs::read(&self.key_path)
            .await
            .with_context(|| format!("Failed to read master key file: {:?}", self.key_path))?;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(String::from_utf8_lossy(&raw).trim())
            .context("Failed to decode master key file (base64)")?;
        if decoded.len() != KEY_BYTES {
            anyhow::bail!("Master key file has invalid length (expected {KEY_BYTES} bytes)");
        }
        let mut key = [0u8; KEY_BYTES];
        key.copy_from_slice(&decoded);
        Ok(Some(key))
    }

    async fn persist_new_key(&self, key: &[u8; KEY_BYTES]) -> Result<()> {
        if let Some(parent) = self.key_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create key directory: {:?}", parent))?;
        }

        let encoded = base64::engine::general_purpose::STANDARD.encode(key);
        let write_once = || async {
            let mut file = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.key_path)
                .await
                .with_context(|| format!("Failed to create master key file: {:?}", self.key_path))?;
            file.write_all(encoded.as_bytes()).await?;
            file.flush().await?;
            restrict_to_owner(&self.key_path).await;
            Ok::<(), anyhow::Error>(())
        };

        let retry_strategy = ExponentialBackoff::from_millis(50)
            .factor(2)
            .max_delay(std::time::Duration::from_millis(750))
            .take(3)
            .map(jitter);

        RetryIf::spawn(retry_strategy, write_once, |e: &anyhow::Error| {
            crate::installation::files::is_transient_fs_error(e)
        })
        .await
    }
}

#[cfg(unix)]
async fn restrict_to_owner(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) =
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await
    {
        warn!(
            "[PHASE: security] [STEP: master_key] Could not restrict key file permissions: {}",
            e
        );
    }
}

#[cfg(not(unix))]
async fn restrict_to_owner(_path: &Path) {}

/// Master key location under the installer state folder.
pub fn default_key_path(state_folder: &Path) -> PathBuf {
    state_folder.join("secrets").join("step_store_master_key.b64")
}
