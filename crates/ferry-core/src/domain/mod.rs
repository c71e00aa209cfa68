//! Domain model (ids, errors, progress events).

pub mod errors;
pub mod events;
pub mod ids;

pub use errors::{AttemptError, ErrorKind, FailureReason, UploadError};
pub use events::{ProgressEvent, TaskEvent};
pub use ids::{Id, IdMarker, UploadId};
