use std::env;
use std::path::PathBuf;

use crate::feishu::{FeishuCredentials, DEFAULT_BASE_URL};
use crate::fetch::FetchSettings;
use crate::localize::LocalizeSettings;
use crate::publish::PublishSettings;
use crate::render::RenderSettings;
use mparchive_core::{EmojiRules, NoiseRules};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} has invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererKind {
    Chrome,
    Http,
}

/// Everything needed to assemble a pipeline.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub upload_dir: PathBuf,
    pub records_path: PathBuf,
    /// Encrypted delegated tokens, keyed by owner.
    pub tokens_path: PathBuf,
    pub renderer: RendererKind,
    pub render: RenderSettings,
    pub fetch: FetchSettings,
    pub localize: LocalizeSettings,
    pub publish: PublishSettings,
    pub noise: NoiseRules,
    pub emoji: EmojiRules,
    /// Publishing is enabled only when present.
    pub feishu: Option<FeishuCredentials>,
    /// 64 hex characters; enables delegated tokens.
    pub encryption_key: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("./public/uploads"),
            records_path: PathBuf::from("./data/articles.json"),
            tokens_path: PathBuf::from("./data/user_tokens.json"),
            renderer: RendererKind::Chrome,
            render: RenderSettings::default(),
            fetch: FetchSettings::default(),
            localize: LocalizeSettings::default(),
            publish: PublishSettings::default(),
            noise: NoiseRules::default(),
            emoji: EmojiRules::default(),
            feishu: None,
            encryption_key: None,
        }
    }
}

impl EngineConfig {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the config from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut config = Self::default();

        if let Some(dir) = var("MPARCHIVE_UPLOAD_DIR") {
            config.upload_dir = PathBuf::from(dir);
        }
        if let Some(path) = var("MPARCHIVE_RECORDS_PATH") {
            config.records_path = PathBuf::from(path);
        }
        if let Some(path) = var("MPARCHIVE_TOKENS_PATH") {
            config.tokens_path = PathBuf::from(path);
        }
        if let Some(chrome) = var("MPARCHIVE_CHROME_PATH") {
            config.render.chrome_executable = Some(PathBuf::from(chrome));
        }
        if let Some(kind) = var("MPARCHIVE_RENDERER") {
            config.renderer = match kind.to_ascii_lowercase().as_str() {
                "chrome" => RendererKind::Chrome,
                "http" => RendererKind::Http,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "MPARCHIVE_RENDERER",
                        value: kind,
                        reason: "expected chrome or http",
                    });
                }
            };
        }

        config.publish.base_url = var("FEISHU_BASE_URL")
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        config.feishu = match (var("FEISHU_APP_ID"), var("FEISHU_APP_SECRET")) {
            (Some(app_id), Some(app_secret)) => Some(FeishuCredentials { app_id, app_secret }),
            _ => None,
        };

        if let Some(key) = var("ENCRYPTION_KEY") {
            if key.len() != 64 || !key.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(ConfigError::Invalid {
                    name: "ENCRYPTION_KEY",
                    value: "<redacted>".to_string(),
                    reason: "expected 64 hex characters",
                });
            }
            config.encryption_key = Some(key);
        }
        Ok(config)
    }
}
