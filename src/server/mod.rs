//! HTTP server and process lifecycle.
//!
//! Shutdown order matters: the listener stops accepting and in-flight
//! requests finish first, so nothing is submitting when the pipeline closes
//! its queues.

mod error;
mod routes;

pub use error::{ApiError, ApiErrorResponse, ApiResult};
pub use routes::router;

use crate::pipeline::{Metrics, MetricsReporter};
use crate::{start_pipeline, Config};
use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Bind the configured address and serve until Ctrl-C or SIGTERM.
pub async fn serve(config: Config) -> Result<()> {
    let listener = TcpListener::bind(&config.server.addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.addr))?;

    serve_with_shutdown(listener, config, shutdown_signal()).await
}

/// Serve on `listener` until `shutdown` resolves, then drain the pipeline.
pub async fn serve_with_shutdown<F>(listener: TcpListener, config: Config, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let metrics = Metrics::new();
    let pipeline = Arc::new(start_pipeline(&config, metrics.clone())?);

    let reporter = if config.server.enable_metrics {
        let (tx, rx) = mpsc::channel(1);
        let reporter = MetricsReporter::new(metrics.clone(), config.server.metrics_interval_secs);
        Some((tx, tokio::spawn(reporter.run(rx))))
    } else {
        None
    };

    let app = router(pipeline.clone(), config.processing.max_image_size_bytes);
    tracing::info!("Starting server at {}", listener.local_addr()?);

    let served = axum::serve(listener, app).with_graceful_shutdown(shutdown).await;

    pipeline.shutdown().await;

    if let Some((tx, handle)) = reporter {
        let _ = tx.send(()).await;
        if let Err(e) = handle.await {
            tracing::error!("Metrics reporter terminated abnormally: {}", e);
        }
    }

    if let Some(path) = &config.server.metrics_output_path {
        metrics.snapshot().save_to_file(path)?;
    }

    served.context("Server error")?;
    tracing::info!("Server stopped");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        _ = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Stopping program...");
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn png_bytes() -> Vec<u8> {
        let mut out = std::io::Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::new(40, 30))
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_serve_until_shutdown() {
        let thumbs = tempfile::TempDir::new().unwrap();
        let metrics_file = thumbs.path().join("metrics.json");

        let mut config = Config::default();
        config.storage.local_path = Some(thumbs.path().join("out").to_string_lossy().to_string());
        config.server.enable_metrics = true;
        config.server.metrics_output_path = Some(metrics_file.to_string_lossy().to_string());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(serve_with_shutdown(listener, config, async move {
            let _ = stop_rx.await;
        }));

        let body = format!(
            r#"{{"image":"{}"}}"#,
            base64::engine::general_purpose::STANDARD.encode(png_bytes())
        );
        let response = reqwest::Client::new()
            .post(format!("http://{}/", addr))
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);

        stop_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(10), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        let written: Vec<_> = std::fs::read_dir(thumbs.path().join("out")).unwrap().collect();
        assert_eq!(written.len(), 1);

        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&metrics_file).unwrap()).unwrap();
        assert_eq!(saved["jobs_succeeded"], 1);
    }

    #[tokio::test]
    async fn test_invalid_config_fails_before_serving() {
        let mut config = Config::default();
        config.processing.job_timeout_secs = 0;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let result = serve_with_shutdown(listener, config, async {}).await;
        assert!(result.is_err());
    }
}
