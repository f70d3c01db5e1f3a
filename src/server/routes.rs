use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Extension, Query};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::routing::get;
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::generator::workflow::report_context_of;
use crate::server::AppState;
use crate::server::error::ApiError;

pub fn router() -> Router {
    Router::new()
        .route("/report", get(get_report))
        .route("/stream", get(stream_report))
        .route("/health", get(get_health))
}

/// 报告来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportMode {
    /// 读取已发布的报告
    Static,
    /// 现场运行流水线
    Live,
}

impl std::str::FromStr for ReportMode {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "static" => Ok(ReportMode::Static),
            "live" => Ok(ReportMode::Live),
            _ => Err(ApiError::InvalidMode(s.to_string())),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    pub mode: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReportBody {
    pub markdown: String,
}

/// GET /report?mode=static|live
#[tracing::instrument(level = "info", skip_all)]
async fn get_report(
    Extension(state): Extension<Arc<AppState>>,
    Query(q): Query<ReportQuery>,
) -> Result<Json<ReportBody>, ApiError> {
    let mode = match q.mode.as_deref() {
        Some(mode) => mode.parse::<ReportMode>()?,
        None => ReportMode::Live,
    };

    let markdown = match mode {
        ReportMode::Static => {
            let key = &state.pipeline.context().config.storage.static_report_key;
            state.pipeline.context().store.read_text(key).await
        }
        ReportMode::Live => {
            let input_data = state.pipeline.load_input().map_err(ApiError::Input)?;
            let pipeline_state = state.pipeline.prepare(input_data).await;
            let report_context = report_context_of(&pipeline_state)
                .map_err(|e| ApiError::Pipeline(e.to_string()))?;
            state
                .pipeline
                .generator()
                .generate(&report_context)
                .await
                .map_err(ApiError::Generation)?
        }
    };

    info!(?mode, chars = markdown.len(), "报告已返回");
    Ok(Json(ReportBody { markdown }))
}

/// GET /stream
///
/// 运行流水线后逐段转发报告；失败以一个`error`事件结束。
#[tracing::instrument(level = "info", skip_all)]
async fn stream_report(
    Extension(state): Extension<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>> + Send> {
    let (tx, rx) = tokio::sync::mpsc::channel::<SseEvent>(64);

    tokio::spawn(async move {
        let report_context = match state.pipeline.load_input() {
            Ok(input_data) => report_context_of(&state.pipeline.prepare(input_data).await),
            Err(e) => Err(e),
        };
        let report_context = match report_context {
            Ok(report_context) => report_context,
            Err(e) => {
                warn!(error = %e, "流水线失败，无法生成报告流");
                let _ = tx
                    .send(SseEvent::default().event("error").data(format!("{:#}", e)))
                    .await;
                return;
            }
        };

        let mut fragments = state.pipeline.generator().stream(report_context);
        while let Some(fragment) = fragments.next().await {
            let event = if fragment.is_error() {
                SseEvent::default().event("error").data(fragment.into_text())
            } else {
                SseEvent::default().data(fragment.into_text())
            };
            if tx.send(event).await.is_err() {
                return; // Client disconnected.
            }
        }
    });

    let stream = tokio_stream::wrappers::ReceiverStream::new(rx).map(Ok);
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn get_health() -> &'static str {
    "ok"
}
