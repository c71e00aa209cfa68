//! HTTP Uploader - 宛先プラットフォームの「URL から取り込み」API を叩く
//!
//! 1 回の POST で 1 枚。リトライはしない（queue 側の責務）。
//!
//! 対応する形:
//! - form: `imgUrl=...&token=...`、応答 `{"errcode": 0, "url": "..."}`
//! - json: `{"imageUrl": "..."}`、応答 `{"success": true, "url": "..."}`

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{PlatformConfig, RequestEncoding};
use crate::domain::AttemptError;
use crate::ports::Uploader;

const USER_AGENT: &str = concat!("ferry/", env!("CARGO_PKG_VERSION"));

/// Upload response, lenient about which platform dialect produced it.
#[derive(Debug, Default, Deserialize)]
struct UploadResponse {
    #[serde(default, alias = "code")]
    errcode: Option<i64>,

    #[serde(default)]
    success: Option<bool>,

    #[serde(default)]
    url: Option<String>,

    #[serde(default, alias = "error", alias = "msg", alias = "message")]
    errmsg: Option<String>,
}

impl UploadResponse {
    fn message_or(&self, fallback: impl FnOnce() -> String) -> String {
        self.errmsg
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map_or_else(fallback, str::to_string)
    }

    fn into_result(self, status: StatusCode) -> Result<String, AttemptError> {
        let accepted = match (self.errcode, self.success) {
            (Some(code), _) => code == 0,
            (None, Some(success)) => success,
            (None, None) => true,
        };
        if !accepted {
            let message = self.message_or(|| "upload rejected".to_string());
            return Err(match self.errcode {
                Some(code) => AttemptError::upstream(Some(status.as_u16()), code, message),
                None => AttemptError::status(status.as_u16(), message),
            });
        }

        match self.url {
            Some(url) if !url.trim().is_empty() => Ok(url),
            _ => Err(AttemptError::status(
                status.as_u16(),
                "malformed response: missing url",
            )),
        }
    }
}

/// `Uploader` backed by the destination platform's HTTP endpoint.
pub struct HttpUploader {
    client: Client,
    endpoint: String,
    encoding: RequestEncoding,
    source_field: String,
    token_field: String,
    token: Option<String>,
    bearer_auth: bool,
    extra_params: BTreeMap<String, String>,
}

impl HttpUploader {
    /// Creates an uploader for `platform` with a per-request timeout.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(
        platform: &PlatformConfig,
        attempt_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(attempt_timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint: platform.endpoint.clone(),
            encoding: platform.encoding,
            source_field: platform.source_field().to_string(),
            token_field: platform.token_field.clone(),
            token: platform.token.clone(),
            bearer_auth: platform.bearer_auth,
            extra_params: platform.extra_params.clone(),
        })
    }

    fn body<'a>(&'a self, source_url: &'a str) -> BTreeMap<&'a str, &'a str> {
        let mut body: BTreeMap<&str, &str> = self
            .extra_params
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        if let Some(token) = &self.token {
            body.insert(&self.token_field, token);
        }
        body.insert(&self.source_field, source_url);
        body
    }

    async fn read_error_response(status: StatusCode, response: reqwest::Response) -> AttemptError {
        let text = response.text().await.unwrap_or_default();
        let parsed = serde_json::from_str::<UploadResponse>(&text).unwrap_or_default();
        let message = parsed.message_or(|| format!("HTTP {status}"));
        AttemptError::Protocol {
            status: Some(status.as_u16()),
            code: parsed.errcode,
            message,
        }
    }
}

fn map_transport_error(e: &reqwest::Error) -> AttemptError {
    if e.is_timeout() {
        AttemptError::Transport {
            message: "request timed out".to_string(),
            timed_out: true,
        }
    } else if e.is_connect() {
        AttemptError::transport(format!("failed to connect: {e}"))
    } else {
        AttemptError::transport(e.to_string())
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn upload(&self, source_url: &str) -> Result<String, AttemptError> {
        let body = self.body(source_url);
        let mut request = self.client.post(&self.endpoint);
        if self.bearer_auth
            && let Some(token) = &self.token
        {
            request = request.bearer_auth(token);
        }
        request = match self.encoding {
            RequestEncoding::Form => request.form(&body),
            RequestEncoding::Json => request.json(&body),
        };

        let response = request.send().await.map_err(|e| {
            warn!(error = %e, source_url, "upload request failed");
            map_transport_error(&e)
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::read_error_response(status, response).await);
        }

        let text = response.text().await.map_err(|e| map_transport_error(&e))?;
        let parsed: UploadResponse = serde_json::from_str(&text).map_err(|e| {
            warn!(error = %e, source_url, "failed to parse upload response");
            AttemptError::status(status.as_u16(), format!("malformed response: {e}"))
        })?;

        let result = parsed.into_result(status);
        if let Ok(url) = &result {
            debug!(source_url, result_url = %url, "platform accepted image");
        }
        result
    }
}
