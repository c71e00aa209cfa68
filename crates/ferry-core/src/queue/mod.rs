//! Queue module: task state, retry timing, error classification, rate limiting,
//! result cache, and the upload queue that ties them together.

mod cache;
mod classify;
mod manager;
mod rate_limit;
mod record;
mod retry;
mod state;

pub use cache::ResultCache;
pub use classify::{ClassificationRules, ErrorClassifier};
pub use manager::{UploadHandle, UploadQueue};
pub use rate_limit::RateLimiter;
pub use record::UploadTask;
pub use retry::BackoffPolicy;
pub use state::UploadState;
