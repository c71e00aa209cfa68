//! Ports - 抽象化レイヤー
//!
//! 外部とのつなぎ目（宛先プラットフォーム、進捗 UI、ドキュメント形式）を
//! trait で切り出し、実装は `impls` に置く。

pub mod document;
pub mod progress_sink;
pub mod uploader;

pub use self::document::ImageDocument;
pub use self::progress_sink::{NoopProgressSink, ProgressSink};
pub use self::uploader::Uploader;
