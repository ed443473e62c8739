use std::time::Duration;

use mparchive_logging::archive_debug;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

pub const DEFAULT_BASE_URL: &str = "https://open.feishu.cn/open-apis";

/// Folder listing page size; the API caps it at 200.
const LIST_PAGE_SIZE: &str = "200";

#[derive(Debug, thiserror::Error)]
pub enum FeishuError {
    #[error("{endpoint}: request failed: {message}")]
    Transport {
        endpoint: &'static str,
        message: String,
    },
    #[error("{endpoint}: request timed out")]
    Timeout { endpoint: &'static str },
    #[error("{endpoint}: api error {code}: {msg}")]
    Api {
        endpoint: &'static str,
        code: i64,
        msg: String,
    },
    #[error("{endpoint}: http {status}: {body}")]
    HttpStatus {
        endpoint: &'static str,
        status: u16,
        body: String,
    },
    #[error("{endpoint}: unexpected response: {message}")]
    Decode {
        endpoint: &'static str,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeishuCredentials {
    pub app_id: String,
    pub app_secret: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TenantToken {
    pub tenant_access_token: String,
    /// Lifetime in seconds.
    pub expire: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserTokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    /// Lifetime of the access token in seconds.
    pub expires_in: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FolderEntry {
    pub token: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[derive(Debug, Deserialize)]
struct FolderPage {
    #[serde(default)]
    files: Vec<FolderEntry>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenData {
    token: String,
}

#[derive(Debug, Deserialize)]
struct UploadData {
    file_token: String,
}

#[derive(Debug, Deserialize)]
struct TicketData {
    ticket: String,
}

#[derive(Debug, Deserialize)]
struct ImportData {
    result: ImportJob,
}

/// Snapshot of an import task.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImportJob {
    pub job_status: i64,
    #[serde(default)]
    pub job_error_msg: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportState {
    Succeeded,
    InProgress,
    Failed,
}

impl ImportJob {
    pub fn state(&self) -> ImportState {
        match self.job_status {
            0 => ImportState::Succeeded,
            1 | 2 => ImportState::InProgress,
            _ => ImportState::Failed,
        }
    }
}

/// Typed wrapper over the document workspace open API.
#[derive(Debug, Clone)]
pub struct FeishuClient {
    http: reqwest::Client,
    base_url: String,
}

impl FeishuClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FeishuError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| FeishuError::Transport {
                endpoint: "client",
                message: err.to_string(),
            })?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn parse_url(&self, endpoint: &'static str, path: &str) -> Result<Url, FeishuError> {
        Url::parse(&self.url(path)).map_err(|err| FeishuError::Transport {
            endpoint,
            message: err.to_string(),
        })
    }

    pub async fn tenant_token(
        &self,
        credentials: &FeishuCredentials,
    ) -> Result<TenantToken, FeishuError> {
        const ENDPOINT: &str = "tenant_access_token";
        let request = self
            .http
            .post(self.url("/auth/v3/tenant_access_token/internal"))
            .json(&json!({
                "app_id": credentials.app_id,
                "app_secret": credentials.app_secret,
            }));
        let body = self.call(ENDPOINT, request).await?;
        decode(ENDPOINT, body)
    }

    /// Exchanges an OAuth authorization code for a delegated user token.
    pub async fn exchange_code(
        &self,
        credentials: &FeishuCredentials,
        code: &str,
    ) -> Result<UserTokenGrant, FeishuError> {
        const ENDPOINT: &str = "oauth_token";
        let request = self
            .http
            .post(self.url("/authen/v2/oauth/token"))
            .json(&json!({
                "grant_type": "authorization_code",
                "client_id": credentials.app_id,
                "client_secret": credentials.app_secret,
                "code": code,
            }));
        let body = self.call(ENDPOINT, request).await?;
        decode(ENDPOINT, body)
    }

    pub async fn refresh_user_token(
        &self,
        credentials: &FeishuCredentials,
        refresh_token: &str,
    ) -> Result<UserTokenGrant, FeishuError> {
        const ENDPOINT: &str = "oauth_refresh";
        let request = self
            .http
            .post(self.url("/authen/v2/oauth/token"))
            .json(&json!({
                "grant_type": "refresh_token",
                "client_id": credentials.app_id,
                "client_secret": credentials.app_secret,
                "refresh_token": refresh_token,
            }));
        let body = self.call(ENDPOINT, request).await?;
        decode(ENDPOINT, body)
    }

    pub async fn root_folder(&self, token: &str) -> Result<String, FeishuError> {
        const ENDPOINT: &str = "root_folder_meta";
        let request = self
            .http
            .get(self.url("/drive/explorer/v2/root_folder/meta"))
            .bearer_auth(token);
        let data: TokenData = decode_data(ENDPOINT, self.call(ENDPOINT, request).await?)?;
        Ok(data.token)
    }

    /// All entries of a folder, following pagination.
    pub async fn list_folder(
        &self,
        token: &str,
        folder_token: &str,
    ) -> Result<Vec<FolderEntry>, FeishuError> {
        const ENDPOINT: &str = "list_files";
        let mut entries = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut url = self.parse_url(ENDPOINT, "/drive/v1/files")?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("folder_token", folder_token);
                query.append_pair("page_size", LIST_PAGE_SIZE);
                if let Some(page) = page_token.as_deref() {
                    query.append_pair("page_token", page);
                }
            }
            let request = self.http.get(url).bearer_auth(token);
            let page: FolderPage = decode_data(ENDPOINT, self.call(ENDPOINT, request).await?)?;
            entries.extend(page.files);
            match page.next_page_token.filter(|next| !next.is_empty()) {
                Some(next) if page.has_more => page_token = Some(next),
                _ => return Ok(entries),
            }
        }
    }

    pub async fn create_folder(
        &self,
        token: &str,
        parent: &str,
        name: &str,
    ) -> Result<String, FeishuError> {
        const ENDPOINT: &str = "create_folder";
        let request = self
            .http
            .post(self.url("/drive/v1/files/create_folder"))
            .bearer_auth(token)
            .json(&json!({ "name": name, "folder_token": parent }));
        let data: TokenData = decode_data(ENDPOINT, self.call(ENDPOINT, request).await?)?;
        Ok(data.token)
    }

    /// Uploads `bytes` into `parent` and returns the opaque file token.
    pub async fn upload_file(
        &self,
        token: &str,
        parent: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<String, FeishuError> {
        const ENDPOINT: &str = "upload_all";
        let size = bytes.len().to_string();
        let form = Form::new()
            .text("file_name", file_name.to_string())
            .text("parent_type", "explorer")
            .text("parent_node", parent.to_string())
            .text("size", size)
            .part("file", Part::bytes(bytes).file_name(file_name.to_string()));
        let request = self
            .http
            .post(self.url("/drive/v1/files/upload_all"))
            .bearer_auth(token)
            .multipart(form);
        let data: UploadData = decode_data(ENDPOINT, self.call(ENDPOINT, request).await?)?;
        Ok(data.file_token)
    }

    /// Starts converting an uploaded Markdown file into a native document under `mount_folder`.
    pub async fn create_import_task(
        &self,
        token: &str,
        file_token: &str,
        file_name: &str,
        mount_folder: &str,
    ) -> Result<String, FeishuError> {
        const ENDPOINT: &str = "create_import_task";
        let request = self
            .http
            .post(self.url("/drive/v1/import_tasks"))
            .bearer_auth(token)
            .json(&json!({
                "file_extension": "md",
                "file_token": file_token,
                "type": "docx",
                "file_name": file_name,
                "point": { "mount_type": 1, "mount_key": mount_folder },
            }));
        let data: TicketData = decode_data(ENDPOINT, self.call(ENDPOINT, request).await?)?;
        Ok(data.ticket)
    }

    pub async fn import_result(&self, token: &str, ticket: &str) -> Result<ImportJob, FeishuError> {
        const ENDPOINT: &str = "import_result";
        let request = self
            .http
            .get(self.url(&format!("/drive/v1/import_tasks/{ticket}")))
            .bearer_auth(token);
        let data: ImportData = decode_data(ENDPOINT, self.call(ENDPOINT, request).await?)?;
        Ok(data.result)
    }

    /// Sends the request and checks the `code` field every response carries.
    async fn call(
        &self,
        endpoint: &'static str,
        request: RequestBuilder,
    ) -> Result<Value, FeishuError> {
        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                FeishuError::Timeout { endpoint }
            } else {
                FeishuError::Transport {
                    endpoint,
                    message: err.to_string(),
                }
            }
        })?;
        let status = response.status();
        let text = response.text().await.map_err(|err| FeishuError::Transport {
            endpoint,
            message: err.to_string(),
        })?;
        archive_debug!("feishu: {} -> http {}", endpoint, status.as_u16());

        let body: Value = match serde_json::from_str(&text) {
            Ok(body) => body,
            Err(_) if !status.is_success() => {
                return Err(FeishuError::HttpStatus {
                    endpoint,
                    status: status.as_u16(),
                    body: text,
                });
            }
            Err(err) => {
                return Err(FeishuError::Decode {
                    endpoint,
                    message: err.to_string(),
                });
            }
        };

        let code = body.get("code").and_then(Value::as_i64).unwrap_or(0);
        if code != 0 {
            let msg = ["msg", "error_description", "error"]
                .iter()
                .find_map(|key| body.get(*key).and_then(Value::as_str))
                .unwrap_or_default()
                .to_string();
            return Err(FeishuError::Api {
                endpoint,
                code,
                msg,
            });
        }
        if !status.is_success() {
            return Err(FeishuError::HttpStatus {
                endpoint,
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(body)
    }
}

fn decode<T: DeserializeOwned>(endpoint: &'static str, body: Value) -> Result<T, FeishuError> {
    serde_json::from_value(body).map_err(|err| FeishuError::Decode {
        endpoint,
        message: err.to_string(),
    })
}

fn decode_data<T: DeserializeOwned>(
    endpoint: &'static str,
    mut body: Value,
) -> Result<T, FeishuError> {
    match body.get_mut("data").map(Value::take) {
        Some(data) if !data.is_null() => decode(endpoint, data),
        _ => Err(FeishuError::Decode {
            endpoint,
            message: "missing data".to_string(),
        }),
    }
}
