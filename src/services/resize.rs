//! Edge-bounded resizing

use image::{imageops::FilterType, DynamicImage, GenericImageView};

/// Dimensions that fit `(width, height)` inside a `max_edge` square
///
/// Returns the input unchanged when both edges already fit. Otherwise the
/// longer edge becomes exactly `max_edge` and the shorter edge is rounded to
/// the nearest pixel (never below 1).
#[must_use]
pub fn fit_within(dimensions: (u32, u32), max_edge: u32) -> (u32, u32) {
    let (width, height) = dimensions;
    if width <= max_edge && height <= max_edge {
        return dimensions;
    }

    let scale_edge = |edge: u32, longer: u32| -> u32 {
        let scaled = (f64::from(edge) * f64::from(max_edge) / f64::from(longer)).round();
        (scaled as u32).max(1)
    };

    if width >= height {
        (max_edge, scale_edge(height, width))
    } else {
        (scale_edge(width, height), max_edge)
    }
}

/// Resizer bounding the longer edge of an image
pub struct ImageResizer;

impl ImageResizer {
    /// Downsize `image` so that neither edge exceeds `max_edge`
    ///
    /// Images already within bounds are returned untouched.
    #[must_use]
    pub fn resize_to_fit(image: DynamicImage, max_edge: u32) -> DynamicImage {
        let current = image.dimensions();
        let (width, height) = fit_within(current, max_edge);
        if (width, height) == current {
            return image;
        }
        image.resize_exact(width, height, FilterType::CatmullRom)
    }
}
