use anyhow::Result;
use bytes::Bytes;
use http_body_util::Full;
use std::convert::Infallible;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{body::Incoming as IncomingBody, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;

pub mod auth;
pub mod broadcast;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod fanout;
pub mod health;
pub mod history;
pub mod kafka;
pub mod lock;
pub mod message;
pub mod metrics;
pub mod pipeline;
pub mod presence;
pub mod utils;
pub mod writer;

use cache::PipelineCache;
use config::Config;
use db::DbPool;
use pipeline::{PipelineStatus, PipelineSupervisor};

type HttpResult = Result<Response<Full<Bytes>>, Infallible>;

async fn http_handler(
    req: Request<IncomingBody>,
    pool: Arc<DbPool>,
    cache: Arc<Mutex<PipelineCache>>,
    status: Arc<PipelineStatus>,
) -> HttpResult {
    let response = match req.uri().path() {
        "/health" => {
            let report = health::health_check(&pool, cache, &status).await;
            let code = if report.healthy() {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            let body = serde_json::to_vec(&report)
                .unwrap_or_else(|_| b"{\"error\":\"health serialization failed\"}".to_vec());
            let mut res = Response::new(Full::new(Bytes::from(body)));
            *res.status_mut() = code;
            if let Ok(content_type) = "application/json".parse() {
                res.headers_mut().insert("content-type", content_type);
            }
            res
        }
        "/metrics" => match metrics::gather_metrics() {
            Ok(metrics_data) => {
                let mut res = Response::new(Full::new(Bytes::from(metrics_data)));
                res.headers_mut()
                    .insert("Content-Type", "text/plain; version=0.0.4".parse().unwrap());
                res
            }
            Err(e) => {
                tracing::error!("Failed to gather metrics: {}", e);
                let mut res = Response::new(Full::new(Bytes::from("Internal Server Error")));
                *res.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                res
            }
        },
        _ => {
            let mut not_found = Response::new(Full::new(Bytes::from("Not Found")));
            *not_found.status_mut() = StatusCode::NOT_FOUND;
            not_found
        }
    };
    Ok(response)
}

/// Health/metrics listener. Deliberately separate from any client-facing
/// surface so operational probes keep working when the pipeline degrades.
pub async fn run_http_server(
    health_port: u16,
    pool: Arc<DbPool>,
    cache: Arc<Mutex<PipelineCache>>,
    status: Arc<PipelineStatus>,
) -> Result<()> {
    let http_addr = format!("0.0.0.0:{}", health_port);
    let listener = TcpListener::bind(&http_addr).await?;
    tracing::info!("Health server listening on http://{}", http_addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);

        let pool = pool.clone();
        let cache = cache.clone();
        let status = status.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| {
                http_handler(req, pool.clone(), cache.clone(), status.clone())
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                tracing::error!("Error serving HTTP connection: {:?}", err);
            }
        });
    }
}

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env()?);

    let supervisor = PipelineSupervisor::new(config.clone()).await?;
    let handles = supervisor.spawn_pipeline().await?;
    tracing::info!(
        deployment = %config.writer.deployment,
        "Cascade pipeline started"
    );

    let http_server = run_http_server(
        config.health_port,
        supervisor.pool.clone(),
        supervisor.cache.clone(),
        supervisor.status.clone(),
    );

    tokio::select! {
        res = http_server => {
            if let Err(e) = res {
                tracing::error!("Health server failed: {}", e);
            }
        },
        _ = signal::ctrl_c() => {
            tracing::info!("Shutdown signal received. Shutting down...");
        }
    }

    supervisor.shutdown().await;
    for handle in handles {
        let _ = tokio::time::timeout(std::time::Duration::from_secs(5), handle).await;
    }

    Ok(())
}
