//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **HttpUploader**: 宛先プラットフォームの HTTP API（form / json）
//! - **HtmlDocument** / **MarkdownDocument**: 画像参照の抽出と置換
//! - **TracingProgressSink** / **ChannelProgressSink**: 進捗の通知先

pub mod html;
pub mod http_uploader;
pub mod markdown;
pub mod progress;

// 主要な型を再エクスポート
pub use self::html::HtmlDocument;
pub use self::http_uploader::HttpUploader;
pub use self::markdown::MarkdownDocument;
pub use self::progress::{ChannelProgressSink, TracingProgressSink};
