//! AES-256-GCM encrypted on-disk credential storage (spec.md §4.1,
//! "file backend encrypts at rest").

use crate::{TokenStore, TokenStoreError};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use async_trait::async_trait;
use base64::Engine;
use ingest_core::domain::Credentials;
use rand::RngCore;
use std::path::PathBuf;

const NONCE_LEN: usize = 12;

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct EncryptedFile {
    nonce: String,
    ciphertext: String,
}

/// Credentials encrypted with AES-256-GCM and written with `0o600`
/// permissions. The encryption key is supplied by the caller (typically
/// derived from a passphrase or machine-specific secret outside this
/// crate's concern).
pub struct FileTokenStore {
    path: PathBuf,
    cipher: Aes256Gcm,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>, key: &[u8; 32]) -> Self {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
        Self {
            path: path.into(),
            cipher,
        }
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedFile, TokenStoreError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| TokenStoreError::Crypto(e.to_string()))?;

        let engine = base64::engine::general_purpose::STANDARD;
        Ok(EncryptedFile {
            nonce: engine.encode(nonce_bytes),
            ciphertext: engine.encode(ciphertext),
        })
    }

    fn decrypt(&self, file: &EncryptedFile) -> Result<Vec<u8>, TokenStoreError> {
        let engine = base64::engine::general_purpose::STANDARD;
        let nonce_bytes = engine
            .decode(&file.nonce)
            .map_err(|e| TokenStoreError::Crypto(e.to_string()))?;
        let ciphertext = engine
            .decode(&file.ciphertext)
            .map_err(|e| TokenStoreError::Crypto(e.to_string()))?;
        let nonce = Nonce::from_slice(&nonce_bytes);
        self.cipher
            .decrypt(nonce, ciphertext.as_ref())
            .map_err(|e| TokenStoreError::Crypto(e.to_string()))
    }

    async fn write_with_restricted_perms(&self, bytes: &[u8]) -> Result<(), TokenStoreError> {
        use tokio::io::AsyncWriteExt;

        #[cfg(unix)]
        let mut file = {
            use tokio::fs::OpenOptions;
            use std::os::unix::fs::OpenOptionsExt;
            OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&self.path)
                .await?
        };

        // create(...).mode(0o600) sets the permissions atomically at
        // creation, so there's no window where the file briefly exists
        // world-readable before a follow-up chmod narrows it.
        #[cfg(not(unix))]
        let mut file = tokio::fs::File::create(&self.path).await?;

        file.write_all(bytes).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self) -> Result<Option<Credentials>, TokenStoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let encrypted: EncryptedFile = serde_json::from_slice(&bytes)?;
        let plaintext = self.decrypt(&encrypted)?;
        let credentials: Credentials = serde_json::from_slice(&plaintext)?;
        Ok(Some(credentials))
    }

    async fn store(&self, credentials: &Credentials) -> Result<(), TokenStoreError> {
        let plaintext = serde_json::to_vec(credentials)?;
        let encrypted = self.encrypt(&plaintext)?;
        let bytes = serde_json::to_vec(&encrypted)?;
        self.write_with_restricted_perms(&bytes).await
    }

    async fn clear(&self) -> Result<(), TokenStoreError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::sample_credentials;

    fn temp_path() -> PathBuf {
        let dir = tempfile::tempdir().unwrap();
        dir.into_path().join("credentials.enc")
    }

    #[tokio::test]
    async fn round_trips_credentials_through_encryption() {
        let key = [7u8; 32];
        let store = FileTokenStore::new(temp_path(), &key);
        let creds = sample_credentials();

        store.store(&creds).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.access_token, creds.access_token);
        assert_eq!(loaded.refresh_token, creds.refresh_token);
    }

    #[tokio::test]
    async fn load_returns_none_when_file_absent() {
        let key = [1u8; 32];
        let store = FileTokenStore::new(temp_path(), &key);
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_removes_the_file() {
        let key = [3u8; 32];
        let store = FileTokenStore::new(temp_path(), &key);
        store.store(&sample_credentials()).await.unwrap();
        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn wrong_key_fails_to_decrypt() {
        let path = temp_path();
        let store_a = FileTokenStore::new(path.clone(), &[1u8; 32]);
        store_a.store(&sample_credentials()).await.unwrap();

        let store_b = FileTokenStore::new(path, &[2u8; 32]);
        assert!(store_b.load().await.is_err());
    }
}
