//! ferry-core
//!
//! Re-hosts externally hosted images on a destination platform and rewrites
//! the document to point at the new copies.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, errors, events）
//! - **ports**: 抽象化レイヤー（Uploader, ProgressSink, ImageDocument）
//! - **queue**: UploadQueue と部品（state, retry, rate_limit, classify, cache）
//! - **app**: DocumentRewriter と RewriterBuilder
//! - **impls**: 実装（HttpUploader, HtmlDocument, MarkdownDocument, sinks）
//! - **config** / **observability** / **error**

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod queue;

pub use app::{DocumentRewriter, RewriteManifest, RewriteOutcome, RewriterBuilder};
pub use config::UploadConfig;
pub use error::FerryError;
