//! RewriterBuilder - DocumentRewriter の構築とワイヤリング
//!
//! # Fail-fast
//! - build() 時に設定を検証する（不正な設定で rewrite が始まらないように）
//! - Uploader が無ければ BuildError

use std::sync::Arc;

use crate::config::{ConfigError, UploadConfig};
use crate::impls::HttpUploader;
use crate::ports::{NoopProgressSink, ProgressSink, Uploader};

use super::{AssetFilter, DocumentRewriter};

/// Builds a [`DocumentRewriter`].
///
/// # 使用例
/// ```ignore
/// let rewriter = RewriterBuilder::new(config)
///     .http_uploader()?
///     .progress_sink(Arc::new(TracingProgressSink))
///     .build()?;
/// ```
pub struct RewriterBuilder {
    config: UploadConfig,
    uploader: Option<Arc<dyn Uploader>>,
    sink: Arc<dyn ProgressSink>,
    destination_hosts: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no uploader configured; call uploader() or http_uploader() before build()")]
    MissingUploader,

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),

    #[error("failed to create HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

impl RewriterBuilder {
    /// Destination hosts start out as `config.platform.destination_hosts`.
    pub fn new(config: UploadConfig) -> Self {
        let destination_hosts = config.platform.destination_hosts.clone();
        Self {
            config,
            uploader: None,
            sink: Arc::new(NoopProgressSink),
            destination_hosts,
        }
    }

    pub fn uploader(mut self, uploader: Arc<dyn Uploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    /// Use the HTTP uploader described by `config.platform`.
    pub fn http_uploader(self) -> Result<Self, BuildError> {
        self.config.platform.validate()?;
        let uploader = HttpUploader::new(&self.config.platform, self.config.attempt_timeout())?;
        Ok(self.uploader(Arc::new(uploader)))
    }

    pub fn progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Add hosts whose images are already on the destination platform.
    pub fn destination_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.destination_hosts
            .extend(hosts.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> Result<DocumentRewriter, BuildError> {
        self.config.validate()?;
        let uploader = self.uploader.ok_or(BuildError::MissingUploader)?;
        Ok(DocumentRewriter {
            filter: AssetFilter::new(&self.destination_hosts),
            config: self.config,
            uploader,
            sink: self.sink,
        })
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::domain::AttemptError;

    struct Unreachable;

    #[async_trait]
    impl Uploader for Unreachable {
        async fn upload(&self, _source_url: &str) -> Result<String, AttemptError> {
            Err(AttemptError::transport("unreachable"))
        }
    }

    #[test]
    fn build_success() {
        let rewriter = RewriterBuilder::new(UploadConfig::default())
            .uploader(Arc::new(Unreachable))
            .destination_hosts(["cdn.example.com"])
            .build()
            .unwrap();
        assert!(!rewriter.filter().is_external("https://cdn.example.com/a.png"));
        assert_eq!(rewriter.config().max_concurrent_uploads, 3);
    }

    #[test]
    fn build_without_uploader_fails() {
        let result = RewriterBuilder::new(UploadConfig::default()).build();
        assert!(matches!(result, Err(BuildError::MissingUploader)));
    }

    #[test]
    fn build_rejects_invalid_config() {
        let config = UploadConfig {
            max_concurrent_uploads: 0,
            ..UploadConfig::default()
        };
        let result = RewriterBuilder::new(config)
            .uploader(Arc::new(Unreachable))
            .build();
        assert!(matches!(result, Err(BuildError::InvalidConfig(_))));
    }

    #[test]
    fn http_uploader_requires_endpoint() {
        let result = RewriterBuilder::new(UploadConfig::default()).http_uploader();
        assert!(matches!(result, Err(BuildError::InvalidConfig(ConfigError::Invalid(_)))));
    }

    #[test]
    fn config_destination_hosts_are_kept() {
        let mut config = UploadConfig::default();
        config.platform.endpoint = "https://upload.example.com/api".to_string();
        config.platform.destination_hosts = vec!["mmbiz.qpic.cn".to_string()];

        let rewriter = RewriterBuilder::new(config)
            .http_uploader()
            .unwrap()
            .build()
            .unwrap();
        assert!(!rewriter.filter().is_external("https://mmbiz.qpic.cn/x.png"));
        assert!(rewriter.filter().is_external("https://img.example/x.png"));
    }
}
