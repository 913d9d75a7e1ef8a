use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use image::{DynamicImage, Rgb, RgbImage};
use listing_pipeline::{
    processor::PipelineProcessor, services::fit_within, OutputFormat, ProcessingOptions,
};

fn product_photo(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        let shade = ((x * 3 + y * 5) % 256) as u8;
        Rgb([shade, 255 - shade, 128])
    }))
}

fn bench_fit_within(c: &mut Criterion) {
    c.bench_function("fit_within", |b| {
        b.iter(|| fit_within(black_box((4032, 3024)), black_box(2000)));
    });
}

fn bench_transform_pixels(c: &mut Criterion) {
    let mut group = c.benchmark_group("transform_pixels");
    group.sample_size(10);

    for format in [OutputFormat::PhotographicLossy, OutputFormat::ModernLossy] {
        let options = ProcessingOptions::builder()
            .max_edge_px(1000)
            .format(format)
            .quality(0.8)
            .build()
            .unwrap();
        let photo = product_photo(2000, 1500);

        group.bench_with_input(BenchmarkId::from_parameter(format), &options, |b, options| {
            b.iter(|| PipelineProcessor::transform_pixels(photo.clone(), black_box(options)).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_fit_within, bench_transform_pixels);
criterion_main!(benches);
