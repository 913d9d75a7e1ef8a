//! Upload validation
//!
//! Hard failures (size, signature) make an image invalid; out-of-range pixel
//! dimensions only produce warnings.

use crate::config::PipelineConfig;
use image::ImageFormat;
use serde::Serialize;
use std::io::Cursor;

const JPEG_SIGNATURE: &[u8] = &[0xFF, 0xD8, 0xFF];
const PNG_SIGNATURE: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
const RIFF_SIGNATURE: &[u8] = b"RIFF";
const WEBP_FOURCC: &[u8] = b"WEBP";

/// Outcome of validating one upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    #[serde(skip)]
    pub format: Option<ImageFormat>,
    pub dimensions: Option<(u32, u32)>,
}

impl ValidationReport {
    /// All hard failures joined for display
    #[must_use]
    pub fn error_summary(&self) -> String {
        self.errors.join("; ")
    }
}

/// Detect one of the three accepted containers from leading bytes
#[must_use]
pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
    if bytes.starts_with(JPEG_SIGNATURE) {
        Some(ImageFormat::Jpeg)
    } else if bytes.starts_with(PNG_SIGNATURE) {
        Some(ImageFormat::Png)
    } else if bytes.len() >= 12
        && bytes.starts_with(RIFF_SIGNATURE)
        && bytes.get(8..12) == Some(WEBP_FOURCC)
    {
        Some(ImageFormat::WebP)
    } else {
        None
    }
}

/// Validator for submitted image payloads
pub struct ImageValidator;

impl ImageValidator {
    /// Validate `bytes` declared as `filename` against `config`
    ///
    /// Checks run in order: byte size, signature, then header dimensions.
    #[must_use]
    pub fn validate(bytes: &[u8], filename: &str, config: &PipelineConfig) -> ValidationReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if bytes.len() > config.max_file_size {
            errors.push(format!(
                "File '{}' is {} bytes, exceeding the maximum of {} bytes",
                filename,
                bytes.len(),
                config.max_file_size
            ));
        }

        let format = detect_format(bytes);
        if format.is_none() {
            errors.push(format!(
                "File '{}' is not a supported image (expected JPEG, PNG or WebP)",
                filename
            ));
        }

        let dimensions = format.and_then(|fmt| read_dimensions(bytes, fmt));
        match dimensions {
            Some((width, height)) => {
                let bounds = config.min_edge_px..=config.max_edge_px;
                if !bounds.contains(&width) || !bounds.contains(&height) {
                    warnings.push(format!(
                        "Image dimensions {}x{} are outside the recommended range of {}-{} px",
                        width, height, config.min_edge_px, config.max_edge_px
                    ));
                }
            },
            None if format.is_some() => {
                warnings.push(format!("Could not read dimensions of '{}'", filename));
            },
            None => {},
        }

        ValidationReport {
            is_valid: errors.is_empty(),
            errors,
            warnings,
            format,
            dimensions,
        }
    }
}

fn read_dimensions(bytes: &[u8], format: ImageFormat) -> Option<(u32, u32)> {
    let mut reader = image::ImageReader::new(Cursor::new(bytes));
    reader.set_format(format);
    reader.into_dimensions().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};

    fn encoded(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let image = DynamicImage::ImageRgb8(RgbImage::new(width, height));
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, format).unwrap();
        buffer.into_inner()
    }

    #[test]
    fn test_detect_format_signatures() {
        assert_eq!(
            detect_format(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00]),
            Some(ImageFormat::Jpeg)
        );
        assert_eq!(
            detect_format(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]),
            Some(ImageFormat::Png)
        );
        assert_eq!(
            detect_format(b"RIFF\0\0\0\0WEBPVP8 "),
            Some(ImageFormat::WebP)
        );
        assert_eq!(detect_format(b"RIFF\0\0\0\0WAVE"), None);
        assert_eq!(detect_format(b"GIF89a"), None);
        assert_eq!(detect_format(&[]), None);
    }

    #[test]
    fn test_valid_image_in_range() {
        let bytes = encoded(600, 800, ImageFormat::Png);
        let report = ImageValidator::validate(&bytes, "a.png", &PipelineConfig::default());
        assert!(report.is_valid);
        assert!(report.errors.is_empty());
        assert!(report.warnings.is_empty());
        assert_eq!(report.dimensions, Some((600, 800)));
        assert_eq!(report.format, Some(ImageFormat::Png));
    }

    #[test]
    fn test_small_dimensions_only_warn() {
        let bytes = encoded(120, 90, ImageFormat::Jpeg);
        let report = ImageValidator::validate(&bytes, "small.jpg", &PipelineConfig::default());
        assert!(report.is_valid);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("120x90"));
    }

    #[test]
    fn test_oversized_file_is_hard_failure() {
        let config = PipelineConfig::builder().max_file_size(16).build().unwrap();
        let bytes = encoded(10, 10, ImageFormat::Png);
        let report = ImageValidator::validate(&bytes, "big.png", &config);
        assert!(!report.is_valid);
        assert!(report.error_summary().contains("exceeding the maximum"));
    }

    #[test]
    fn test_unknown_signature_is_hard_failure() {
        let report =
            ImageValidator::validate(b"not an image", "notes.txt", &PipelineConfig::default());
        assert!(!report.is_valid);
        assert_eq!(report.errors.len(), 1);
        assert!(report.dimensions.is_none());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_truncated_header_warns_about_dimensions() {
        let report = ImageValidator::validate(
            &[0xFF, 0xD8, 0xFF, 0xE0],
            "broken.jpg",
            &PipelineConfig::default(),
        );
        assert!(report.is_valid);
        assert!(report.warnings[0].contains("Could not read dimensions"));
    }
}
