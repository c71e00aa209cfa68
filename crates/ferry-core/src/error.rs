use thiserror::Error;

use crate::app::BuildError;
use crate::config::ConfigError;

/// Setup failures. Per-image upload failures never surface here; they end
/// up in the rewrite manifest.
#[derive(Debug, Error)]
pub enum FerryError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Build(#[from] BuildError),
}
