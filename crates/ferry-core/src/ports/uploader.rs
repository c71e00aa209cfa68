//! Uploader port - 1 回分のアップロード
//!
//! リトライはしない。リトライ・分類・レート制御は queue 側の責務。

use async_trait::async_trait;

use crate::domain::AttemptError;

/// Re-hosts one external image on the destination platform.
///
/// Implementations attach whatever authentication the platform needs and
/// return the destination URL. The per-attempt timeout is enforced by the
/// caller as well, so an implementation that hangs still fails the attempt.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, source_url: &str) -> Result<String, AttemptError>;
}
