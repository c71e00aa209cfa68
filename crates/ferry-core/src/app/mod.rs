//! App - アプリケーション層
//!
//! ports と queue を組み合わせて「文書を書き換える」処理を実装します。
//!
//! # 主要コンポーネント
//! - **RewriterBuilder**: 構築とワイヤリング（起動時検証）
//! - **DocumentRewriter**: extract → upload → replace

pub mod builder;
pub mod rewriter;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, RewriterBuilder};
pub use self::rewriter::{
    AssetFilter, DocumentRewriter, FailedImage, RewriteManifest, RewriteOutcome, UploadedImage,
};
