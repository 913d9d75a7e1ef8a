//! Remote delegate against an in-process processing server
#![cfg(feature = "server")]

mod common;

use common::{decoded_dimensions, jpeg, DiscSegmenter, StuckSegmenter};
use listing_pipeline::{
    server::{self, ServerConfig},
    ErrorKind, OutputFormat, PipelineProcessor, ProcessingOptions, RemoteDelegate,
    RemoteDelegateConfig, RemoteSegmenter, Segmenter,
};
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Serve `processor` on an ephemeral port and return its base URL
async fn spawn_server(processor: PipelineProcessor, config: ServerConfig) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        server::serve(listener, processor, &config, std::future::pending()).await
    });
    format!("http://{addr}")
}

fn processor_with(segmenter: Arc<dyn Segmenter>) -> PipelineProcessor {
    PipelineProcessor::builder()
        .segmenter(segmenter)
        .build()
        .unwrap()
}

fn delegate(base_url: &str, token: Option<&str>) -> RemoteDelegate {
    let mut config = RemoteDelegateConfig::new(base_url).with_timeout(Duration::from_secs(60));
    if let Some(token) = token {
        config = config.with_token(token);
    }
    RemoteDelegate::new(config).unwrap()
}

fn webp_options(max_edge: u32, remove_background: bool) -> ProcessingOptions {
    ProcessingOptions::builder()
        .max_edge_px(max_edge)
        .format(OutputFormat::ModernLossy)
        .quality(0.9)
        .remove_background(remove_background)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_remote_processing_returns_image_and_sizes() {
    let base = spawn_server(
        processor_with(Arc::new(DiscSegmenter::default())),
        ServerConfig::default(),
    )
    .await;
    let input = jpeg(1200, 900);
    let input_size = input.len();

    let result = delegate(&base, None)
        .process(input, "chair.jpg", &webp_options(600, true), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.content_type, "image/webp");
    assert_eq!(result.format(), Some(OutputFormat::ModernLossy));
    assert_eq!(result.original_size, input_size);
    assert_eq!(result.processed_size, result.bytes.len());
    assert_eq!(decoded_dimensions(&result.bytes), (600, 450));
}

#[tokio::test]
async fn test_capabilities_describe_server() {
    let base = spawn_server(
        processor_with(Arc::new(DiscSegmenter::default())),
        ServerConfig::default(),
    )
    .await;

    let capabilities = delegate(&base, None).capabilities().await.unwrap();
    assert!(capabilities.features.background_removal);
    assert_eq!(capabilities.max_file_size, 25 * 1024 * 1024);
    assert_eq!(capabilities.min_edge_size, 500);
    assert_eq!(capabilities.max_edge_size, 5000);
    assert!(capabilities.supported_formats.iter().any(|f| f == "webp"));
}

#[tokio::test]
async fn test_bearer_token_is_enforced() {
    let config = ServerConfig {
        api_token: Some("secret".to_string()),
        ..ServerConfig::default()
    };
    let base = spawn_server(processor_with(Arc::new(DiscSegmenter::default())), config).await;
    let options = webp_options(600, false);

    let err = delegate(&base, Some("wrong"))
        .process(jpeg(600, 600), "a.jpg", &options, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);

    let ok = delegate(&base, Some("secret"))
        .process(jpeg(600, 600), "a.jpg", &options, &CancellationToken::new())
        .await;
    assert!(ok.is_ok());
}

#[tokio::test]
async fn test_invalid_upload_maps_to_validation() {
    let base = spawn_server(
        processor_with(Arc::new(DiscSegmenter::default())),
        ServerConfig::default(),
    )
    .await;

    let err = delegate(&base, None)
        .process(
            b"definitely not an image".to_vec(),
            "notes.txt",
            &webp_options(600, false),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn test_out_of_range_options_fail_before_sending() {
    let options = ProcessingOptions {
        quality: 0.0,
        ..ProcessingOptions::default()
    };
    // Nothing listens here; the request must never be attempted
    let err = delegate("http://127.0.0.1:9", None)
        .process(jpeg(600, 600), "a.jpg", &options, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOptions);
}

#[tokio::test]
async fn test_server_at_capacity_answers_quota_exceeded() {
    let stuck = Arc::new(StuckSegmenter::default());
    let config = ServerConfig {
        capacity: 1,
        ..ServerConfig::default()
    };
    let base = spawn_server(processor_with(stuck.clone()), config).await;

    let busy = {
        let delegate = delegate(&base, None);
        tokio::spawn(async move {
            delegate
                .process(
                    jpeg(600, 600),
                    "slow.jpg",
                    &webp_options(600, true),
                    &CancellationToken::new(),
                )
                .await
        })
    };
    tokio::time::timeout(Duration::from_secs(30), stuck.entered.notified())
        .await
        .unwrap();

    let err = delegate(&base, None)
        .process(
            jpeg(600, 600),
            "second.jpg",
            &webp_options(600, false),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::QuotaExceeded);
    busy.abort();
}

#[tokio::test]
async fn test_cancelled_token_aborts_request() {
    let stuck = Arc::new(StuckSegmenter::default());
    let base = spawn_server(processor_with(stuck.clone()), ServerConfig::default()).await;
    let cancel = CancellationToken::new();

    let request = {
        let delegate = delegate(&base, None);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            delegate
                .process(jpeg(600, 600), "slow.jpg", &webp_options(600, true), &cancel)
                .await
        })
    };
    tokio::time::timeout(Duration::from_secs(30), stuck.entered.notified())
        .await
        .unwrap();
    cancel.cancel();

    let err = request.await.unwrap().unwrap_err();
    assert!(err.is_cancelled());
}

#[tokio::test]
async fn test_remote_segmenter_drives_local_pipeline() {
    let base = spawn_server(
        processor_with(Arc::new(DiscSegmenter::default())),
        ServerConfig::default(),
    )
    .await;
    let local = processor_with(Arc::new(RemoteSegmenter::new(delegate(&base, None))));

    let result = local
        .process_bytes(
            jpeg(800, 800),
            "remote-cut.jpg",
            &webp_options(500, true),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(result.dimensions, (500, 500));
    let rgba = image::load_from_memory(&result.bytes).unwrap().to_rgba8();
    assert_eq!(rgba.dimensions(), (500, 500));
    assert!(rgba.get_pixel(0, 0)[3] < 32);
    assert!(rgba.get_pixel(250, 250)[3] > 220);
}
