//! DocumentRewriter - 外部画像を宛先プラットフォームに載せ替えて文書を書き換える
//!
//! 流れ: extract → filter (外部のみ) → dedup → submit → 全件待ち → replace
//!
//! 失敗した画像は元の URL のまま残す。1 枚の失敗で rewrite 全体は失敗しない。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::UploadConfig;
use crate::domain::{FailureReason, ProgressEvent};
use crate::observability::QueueStats;
use crate::ports::{ImageDocument, ProgressSink, Uploader};
use crate::queue::UploadQueue;

/// Decides which image addresses need re-hosting.
///
/// External means: absolute http(s) URL whose host is not one of the
/// destination hosts (or a subdomain of one). Inline `data:` images and
/// relative paths are never external.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetFilter {
    destination_hosts: Vec<String>,
}

impl AssetFilter {
    pub fn new<I, S>(destination_hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let destination_hosts = destination_hosts
            .into_iter()
            .map(|h| h.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect();
        Self { destination_hosts }
    }

    pub fn is_external(&self, address: &str) -> bool {
        let Ok(url) = Url::parse(address.trim()) else {
            return false;
        };
        if !matches!(url.scheme(), "http" | "https") {
            return false;
        }
        match url.host_str() {
            Some(host) => !self.is_destination_host(host),
            None => false,
        }
    }

    fn is_destination_host(&self, host: &str) -> bool {
        self.destination_hosts.iter().any(|dest| {
            host == dest
                || host
                    .strip_suffix(dest.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedImage {
    pub source: String,
    pub destination: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedImage {
    pub source: String,
    pub reason: FailureReason,
    pub message: String,
}

/// Per-address result of one rewrite, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteManifest {
    pub succeeded: Vec<UploadedImage>,
    pub failed: Vec<FailedImage>,
}

impl RewriteManifest {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

#[derive(Debug)]
pub struct RewriteOutcome<D> {
    pub document: D,
    pub manifest: RewriteManifest,
    pub stats: QueueStats,
}

/// Rewrites documents, one fresh `UploadQueue` per call.
///
/// Built through [`RewriterBuilder`](super::RewriterBuilder).
pub struct DocumentRewriter {
    pub(super) config: UploadConfig,
    pub(super) uploader: Arc<dyn Uploader>,
    pub(super) sink: Arc<dyn ProgressSink>,
    pub(super) filter: AssetFilter,
}

impl DocumentRewriter {
    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub fn filter(&self) -> &AssetFilter {
        &self.filter
    }

    /// Distinct external image addresses of `document`, in document order.
    pub fn external_sources<D: ImageDocument>(&self, document: &D) -> Vec<String> {
        let mut seen = HashSet::new();
        document
            .extract_image_refs()
            .into_iter()
            .filter(|address| self.filter.is_external(address))
            .filter(|address| seen.insert(address.clone()))
            .collect()
    }

    /// Upload every external image and substitute the results.
    ///
    /// Always returns the document; images that failed keep their original
    /// address and are listed in `manifest.failed`.
    pub async fn rewrite<D: ImageDocument>(&self, mut document: D) -> RewriteOutcome<D> {
        let sources = self.external_sources(&document);
        if sources.is_empty() {
            debug!("no external images to upload");
            return RewriteOutcome {
                document,
                manifest: RewriteManifest::default(),
                stats: QueueStats::default(),
            };
        }

        info!(images = sources.len(), "uploading external images");
        let queue = UploadQueue::start(
            &self.config,
            Arc::clone(&self.uploader),
            Arc::clone(&self.sink),
        );
        let handles: Vec<_> = sources
            .into_iter()
            .map(|source| {
                let handle = queue.submit(&source);
                (source, handle)
            })
            .collect();

        let mut replacements = HashMap::new();
        let mut manifest = RewriteManifest::default();
        for (source, handle) in handles {
            match handle.wait().await {
                Ok(destination) => {
                    replacements.insert(source.clone(), destination.clone());
                    manifest.succeeded.push(UploadedImage {
                        source,
                        destination,
                    });
                }
                Err(err) => {
                    warn!(
                        source_url = %source,
                        reason = ?err.reason(),
                        error = %err,
                        "image left unmodified"
                    );
                    manifest.failed.push(FailedImage {
                        source,
                        reason: err.reason(),
                        message: err.to_string(),
                    });
                }
            }
        }
        let stats = queue.shutdown().await;
        self.sink.emit(ProgressEvent::Snapshot(stats));

        document.replace_image_refs(&replacements);
        info!(
            succeeded = stats.succeeded,
            failed = stats.failed,
            success_rate = format_args!("{:.1}", stats.success_rate()),
            "document rewritten"
        );
        RewriteOutcome {
            document,
            manifest,
            stats,
        }
    }
}
