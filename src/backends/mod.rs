//! Segmentation backend implementations
//!
//! - Tract backend (pure Rust ONNX inference, `tract` feature)
//! - Remote backend (delegates to a processing service over HTTP)

pub mod remote;

#[cfg(feature = "tract")]
pub mod tract;

// Test utilities for backend testing
#[cfg(test)]
pub mod test_utils;

pub use self::remote::RemoteSegmenter;

#[cfg(feature = "tract")]
pub use self::tract::TractSegmenter;
