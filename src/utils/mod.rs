//! Shared helpers for segmentation backends

pub mod preprocessing;

pub use preprocessing::{ImagePreprocessor, Letterbox, PreprocessingConfig};
