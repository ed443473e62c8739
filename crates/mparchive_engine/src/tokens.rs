use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use chrono::{DateTime, Utc};
use mparchive_logging::{archive_debug, archive_info};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::feishu::{FeishuClient, FeishuCredentials, FeishuError, UserTokenGrant};
use crate::persist::AtomicFileWriter;

const NONCE_LEN: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token api call failed: {0}")]
    Api(#[from] FeishuError),
    #[error("encryption key must be 64 hex characters")]
    InvalidKey,
    #[error("stored token is malformed")]
    Malformed,
    #[error("stored token could not be decrypted")]
    Decrypt,
    #[error("token encryption failed")]
    Encrypt,
    #[error("no delegated token stored for {0}")]
    Missing(String),
    #[error("delegated tokens are not configured")]
    NotConfigured,
    #[error("token store failed: {0}")]
    Store(String),
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Service-wide token owned by one publisher.
///
/// The lock is held across the exchange, so concurrent callers wait for a
/// single refresh instead of each issuing their own.
#[derive(Debug)]
pub struct TenantTokenCache {
    credentials: FeishuCredentials,
    safety_margin: Duration,
    cached: Mutex<Option<CachedToken>>,
}

impl TenantTokenCache {
    pub fn new(credentials: FeishuCredentials, safety_margin: Duration) -> Self {
        Self {
            credentials,
            safety_margin,
            cached: Mutex::new(None),
        }
    }

    pub fn credentials(&self) -> &FeishuCredentials {
        &self.credentials
    }

    pub async fn token(&self, client: &FeishuClient) -> Result<String, TokenError> {
        let mut cached = self.cached.lock().await;
        if let Some(current) = cached.as_ref() {
            if Instant::now() < current.expires_at {
                return Ok(current.token.clone());
            }
        }

        let fresh = client.tenant_token(&self.credentials).await?;
        let lifetime = Duration::from_secs(fresh.expire).saturating_sub(self.safety_margin);
        archive_info!("tokens: tenant token refreshed, valid for {:?}", lifetime);
        *cached = Some(CachedToken {
            token: fresh.tenant_access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(fresh.tenant_access_token)
    }
}

/// AES-256-GCM for delegated tokens at rest, encoded as `hex(nonce):hex(ciphertext)`.
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenCipher(..)")
    }
}

impl TokenCipher {
    pub fn from_hex_key(key_hex: &str) -> Result<Self, TokenError> {
        let key = hex::decode(key_hex.trim()).map_err(|_| TokenError::InvalidKey)?;
        if key.len() != 32 {
            return Err(TokenError::InvalidKey);
        }
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| TokenError::InvalidKey)?;
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, TokenError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| TokenError::Encrypt)?;
        Ok(format!("{}:{}", hex::encode(nonce), hex::encode(ciphertext)))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String, TokenError> {
        let (nonce_hex, ciphertext_hex) = encoded.split_once(':').ok_or(TokenError::Malformed)?;
        let nonce = hex::decode(nonce_hex).map_err(|_| TokenError::Malformed)?;
        let ciphertext = hex::decode(ciphertext_hex).map_err(|_| TokenError::Malformed)?;
        if nonce.len() != NONCE_LEN {
            return Err(TokenError::Malformed);
        }
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
            .map_err(|_| TokenError::Decrypt)?;
        String::from_utf8(plaintext).map_err(|_| TokenError::Decrypt)
    }
}

/// Encrypted delegated token pair of one owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredUserToken {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait UserTokenStore: Send + Sync {
    async fn load(&self, owner: &str) -> Result<Option<StoredUserToken>, TokenError>;
    async fn store(&self, owner: &str, token: StoredUserToken) -> Result<(), TokenError>;
}

#[derive(Debug, Default)]
pub struct MemoryUserTokenStore {
    tokens: RwLock<HashMap<String, StoredUserToken>>,
}

impl MemoryUserTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl UserTokenStore for MemoryUserTokenStore {
    async fn load(&self, owner: &str) -> Result<Option<StoredUserToken>, TokenError> {
        Ok(self.tokens.read().await.get(owner).cloned())
    }

    async fn store(&self, owner: &str, token: StoredUserToken) -> Result<(), TokenError> {
        self.tokens.write().await.insert(owner.to_string(), token);
        Ok(())
    }
}

/// Token store persisted as one JSON object keyed by owner. Values stay encrypted on disk.
#[derive(Debug)]
pub struct FileUserTokenStore {
    path: PathBuf,
    writer: AtomicFileWriter,
    tokens: RwLock<HashMap<String, StoredUserToken>>,
}

impl FileUserTokenStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, TokenError> {
        let path = path.into();
        let tokens = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(store_err)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(store_err(err)),
        };
        let dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(Self {
            writer: AtomicFileWriter::new(dir),
            path,
            tokens: RwLock::new(tokens),
        })
    }
}

#[async_trait::async_trait]
impl UserTokenStore for FileUserTokenStore {
    async fn load(&self, owner: &str) -> Result<Option<StoredUserToken>, TokenError> {
        Ok(self.tokens.read().await.get(owner).cloned())
    }

    async fn store(&self, owner: &str, token: StoredUserToken) -> Result<(), TokenError> {
        let mut tokens = self.tokens.write().await;
        let mut next = tokens.clone();
        next.insert(owner.to_string(), token);
        let json = serde_json::to_vec_pretty(&next).map_err(store_err)?;
        let filename = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "user_tokens.json".to_string());
        let writer = self.writer.clone();
        tokio::task::spawn_blocking(move || writer.write(&filename, &json))
            .await
            .map_err(store_err)?
            .map_err(store_err)?;
        *tokens = next;
        Ok(())
    }
}

fn store_err(err: impl std::fmt::Display) -> TokenError {
    TokenError::Store(err.to_string())
}

/// Per-owner delegated tokens: decrypt, refresh near expiry, persist re-encrypted.
pub struct DelegatedTokens {
    store: std::sync::Arc<dyn UserTokenStore>,
    cipher: TokenCipher,
    refresh_window: chrono::Duration,
}

impl DelegatedTokens {
    pub fn new(
        store: std::sync::Arc<dyn UserTokenStore>,
        cipher: TokenCipher,
        refresh_window: Duration,
    ) -> Self {
        Self {
            store,
            cipher,
            refresh_window: chrono::Duration::from_std(refresh_window)
                .unwrap_or_else(|_| chrono::Duration::minutes(5)),
        }
    }

    pub async fn access_token(
        &self,
        client: &FeishuClient,
        credentials: &FeishuCredentials,
        owner: &str,
    ) -> Result<String, TokenError> {
        let stored = self
            .store
            .load(owner)
            .await?
            .ok_or_else(|| TokenError::Missing(owner.to_string()))?;
        if stored.expires_at - self.refresh_window > Utc::now() {
            archive_debug!("tokens: using stored token for {}", owner);
            return self.cipher.decrypt(&stored.access_token);
        }

        archive_info!("tokens: refreshing delegated token for {}", owner);
        let refresh_token = self.cipher.decrypt(&stored.refresh_token)?;
        let grant = client.refresh_user_token(credentials, &refresh_token).await?;
        self.save_grant(owner, &grant).await?;
        Ok(grant.access_token)
    }

    pub async fn save_grant(&self, owner: &str, grant: &UserTokenGrant) -> Result<(), TokenError> {
        let expires_in = i64::try_from(grant.expires_in).unwrap_or(i64::MAX);
        let token = StoredUserToken {
            access_token: self.cipher.encrypt(&grant.access_token)?,
            refresh_token: self.cipher.encrypt(&grant.refresh_token)?,
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in.min(i64::from(u32::MAX))),
        };
        self.store.store(owner, token).await
    }
}

#[cfg(test)]
mod tests {
    use super::{TokenCipher, TokenError};

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn ciphertext_round_trips_and_is_randomised() {
        let cipher = TokenCipher::from_hex_key(KEY).unwrap();
        let first = cipher.encrypt("u-access").unwrap();
        let second = cipher.encrypt("u-access").unwrap();
        assert_ne!(first, second);
        assert_eq!(cipher.decrypt(&first).unwrap(), "u-access");
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let cipher = TokenCipher::from_hex_key(KEY).unwrap();
        let encoded = cipher.encrypt("secret").unwrap();
        let (nonce, body) = encoded.split_once(':').unwrap();
        let flipped = if body.starts_with('0') {
            format!("1{}", &body[1..])
        } else {
            format!("0{}", &body[1..])
        };
        let tampered = format!("{nonce}:{flipped}");
        assert!(matches!(cipher.decrypt(&tampered), Err(TokenError::Decrypt)));
        assert!(matches!(cipher.decrypt("nonsense"), Err(TokenError::Malformed)));
    }

    #[test]
    fn short_keys_are_rejected() {
        assert!(matches!(TokenCipher::from_hex_key("abcd"), Err(TokenError::InvalidKey)));
    }
}
