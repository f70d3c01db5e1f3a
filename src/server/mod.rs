//! HTTP服务：`/report`、`/stream`、`/health`

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Extension, Router};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::generator::context::GeneratorContext;
use crate::generator::workflow::ReportPipeline;

pub mod error;
pub mod routes;

pub use error::ApiError;

/// 所有请求共享的状态
pub struct AppState {
    pub pipeline: ReportPipeline,
}

#[tracing::instrument(level = "debug", skip_all)]
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(routes::router())
        .layer(Extension(Arc::new(state)))
        .layer(TraceLayer::new_for_http())
}

/// 启动HTTP服务，直到进程退出
pub async fn serve(config: &Config) -> Result<()> {
    let addr = config.bind_address();
    let context = GeneratorContext::new(config.clone()).await?;
    let pipeline = ReportPipeline::new(context)?;
    let app = router(AppState { pipeline });

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context(format!("Failed to bind {}", addr))?;
    info!(addr = %addr, "🚀 报告服务已启动");
    axum::serve(listener, app).await?;
    Ok(())
}
