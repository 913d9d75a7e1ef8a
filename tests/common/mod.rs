//! Shared fixtures for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use image::{DynamicImage, GenericImageView, ImageFormat, Rgb, RgbImage};
use listing_pipeline::{
    inference::SegmentationProgress, JobQueue, ProcessingStage, ProcessingTimings,
    ProgressReporter, ProgressUpdate, Result, SegmentationMask, Segmenter,
};
use std::{
    io::Cursor,
    sync::{Arc, Mutex, OnceLock},
};
use tokio::sync::Notify;

/// Encode a gradient photo of `width`x`height` in `format`
pub fn photo(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| {
        let shade = ((x + y) % 200) as u8;
        Rgb([shade, 128, 255 - shade])
    });
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), format)
        .unwrap();
    bytes
}

pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
    photo(width, height, ImageFormat::Jpeg)
}

/// A JPEG signature followed by `size` bytes of padding
pub fn oversized_upload(size: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; size];
    bytes[..3].copy_from_slice(&[0xFF, 0xD8, 0xFF]);
    bytes
}

/// Decode `bytes` and return their dimensions
pub fn decoded_dimensions(bytes: &[u8]) -> (u32, u32) {
    image::load_from_memory(bytes).unwrap().dimensions()
}

/// Segmenter keeping a centred disc as foreground
#[derive(Debug, Default)]
pub struct DiscSegmenter {
    pub calls: Mutex<Vec<(u32, u32)>>,
}

#[async_trait]
impl Segmenter for DiscSegmenter {
    async fn segment(
        &self,
        image: &DynamicImage,
        progress: SegmentationProgress<'_>,
    ) -> Result<SegmentationMask> {
        let (width, height) = image.dimensions();
        self.calls.lock().unwrap().push((width, height));
        progress(0.5);

        let (cx, cy) = (width as f32 / 2.0, height as f32 / 2.0);
        let radius = width.min(height) as f32 / 3.0;
        let mut data = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                let (dx, dy) = (x as f32 - cx, y as f32 - cy);
                data.push(if dx * dx + dy * dy <= radius * radius { 255 } else { 0 });
            }
        }
        progress(1.0);
        Ok(SegmentationMask::new(data, (width, height)))
    }

    fn name(&self) -> &'static str {
        "disc"
    }
}

/// Segmenter that never finishes; announces each call through `entered`
#[derive(Debug, Default)]
pub struct StuckSegmenter {
    pub entered: Notify,
}

#[async_trait]
impl Segmenter for StuckSegmenter {
    async fn segment(
        &self,
        _image: &DynamicImage,
        _progress: SegmentationProgress<'_>,
    ) -> Result<SegmentationMask> {
        self.entered.notify_one();
        std::future::pending().await
    }

    fn name(&self) -> &'static str {
        "stuck"
    }
}

/// What a queue should do when a job completes
#[derive(Debug, Clone, Copy)]
pub enum OnCompletion {
    Nothing,
    Cancel,
    Pause,
}

/// Reporter recording progress and errors, optionally steering a queue
/// the moment a job completes
pub struct RecordingReporter {
    pub progress: Mutex<Vec<u8>>,
    pub errors: Mutex<Vec<(ProcessingStage, String)>>,
    pub completions: Mutex<usize>,
    pub queue: OnceLock<JobQueue>,
    action: OnCompletion,
}

impl RecordingReporter {
    pub fn new(action: OnCompletion) -> Arc<Self> {
        Arc::new(Self {
            progress: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            completions: Mutex::new(0),
            queue: OnceLock::new(),
            action,
        })
    }

    /// Progress values since the most recent 0
    pub fn last_job_progress(&self) -> Vec<u8> {
        let progress = self.progress.lock().unwrap();
        let start = progress.iter().rposition(|p| *p == 0).unwrap_or(0);
        progress[start..].to_vec()
    }
}

impl ProgressReporter for RecordingReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        self.progress.lock().unwrap().push(update.progress);
    }

    fn report_completion(&self, _timings: &ProcessingTimings) {
        *self.completions.lock().unwrap() += 1;
        if let Some(queue) = self.queue.get() {
            match self.action {
                OnCompletion::Nothing => {},
                OnCompletion::Cancel => queue.cancel(),
                OnCompletion::Pause => queue.pause(),
            }
        }
    }

    fn report_error(&self, stage: ProcessingStage, error: &str) {
        self.errors.lock().unwrap().push((stage, error.to_string()));
    }
}
