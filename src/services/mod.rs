//! Stage services used by the pipeline processor
//!
//! Each service is a stateless unit operating on bytes or decoded pixels.

pub mod encoding;
pub mod metadata;
pub mod progress;
pub mod resize;
pub mod validation;

pub use encoding::{flatten_onto_white, ImageEncoder};
pub use metadata::MetadataStripper;
pub use progress::{
    ConsoleProgressReporter, NoOpProgressReporter, ProcessingStage, ProgressReporter,
    ProgressTracker, ProgressUpdate,
};
pub use resize::{fit_within, ImageResizer};
pub use validation::{detect_format, ImageValidator, ValidationReport};
