//! HTTP API (`POST /detect`, `GET /health`)

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::error::Error;
use crate::pipeline::{DetectionRequest, DetectionResponse, Pipeline};

/// ハンドラ間で共有する状態
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    /// 最後に受信した画像の保存先
    pub debug_dump: Option<Arc<PathBuf>>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            debug_dump: None,
        }
    }

    pub fn with_debug_dump(mut self, path: Option<PathBuf>) -> Self {
        self.debug_dump = path.map(Arc::new);
        self
    }
}

/// `POST /detect` のリクエストボディ
#[derive(Debug, Deserialize)]
pub struct DetectBody {
    #[serde(alias = "image_b64")]
    pub image: String,
    pub target: String,
    #[serde(default)]
    pub threshold: Option<f32>,
}

/// APIのエラーレスポンス
#[derive(Debug)]
pub enum ApiError {
    Detect(Error),
    /// JSONとして読めないボディ
    Body(JsonRejection),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError::Detect(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::Body(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::Detect(e) if e.is_client_error() => {
                debug!("rejected request: {}", e);
                (StatusCode::BAD_REQUEST, e.to_string())
            }
            ApiError::Detect(e) => {
                error!("{}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            ApiError::Body(rejection) => {
                debug!("rejected body: {}", rejection.body_text());
                let status = match rejection.status() {
                    StatusCode::PAYLOAD_TOO_LARGE => StatusCode::PAYLOAD_TOO_LARGE,
                    _ => StatusCode::BAD_REQUEST,
                };
                (status, format!("invalid request body: {}", rejection.body_text()))
            }
            ApiError::Internal(msg) => {
                error!("{}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };
        (status, Json(ErrorResponse { detail })).into_response()
    }
}

/// APIのルーターを作成します。
///
/// # Args
/// * `state` - 共有状態
/// * `max_body_size` - リクエストボディの上限 (バイト)
pub fn create_router(state: AppState, max_body_size: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/detect", post(detect))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_size))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// 死活監視。モデルの状態には依存しません
async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

/// base64文字列を画像にデコードします。
///
/// `data:image/...;base64,` の接頭辞と、76桁などで折り返された改行入りのペイロードも受け付けます。
fn decode_image(b64: &str) -> Result<(Vec<u8>, image::DynamicImage), Error> {
    let payload = match b64.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => b64,
    };
    let payload: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = STANDARD
        .decode(&payload)
        .map_err(|e| Error::invalid_input(format!("invalid image: {}", e)))?;
    let img = image::load_from_memory(&bytes)
        .map_err(|e| Error::invalid_input(format!("invalid image: {}", e)))?;
    Ok((bytes, img))
}

async fn detect(
    State(state): State<AppState>,
    body: Result<Json<DetectBody>, JsonRejection>,
) -> Result<Json<DetectionResponse>, ApiError> {
    let Json(body) = body?;
    let (bytes, img) = decode_image(&body.image)?;
    let req = DetectionRequest::new(img, &body.target, body.threshold)?;

    if let Some(path) = state.debug_dump.clone() {
        if let Err(e) = tokio::fs::write(path.as_ref(), &bytes).await {
            warn!("can't save received image to {}: {}", path.display(), e);
        }
    }

    let pipeline = Arc::clone(&state.pipeline);
    let resp = tokio::task::spawn_blocking(move || pipeline.run(&req))
        .await
        .map_err(|e| ApiError::Internal(format!("detection task panicked: {}", e)))??;

    Ok(Json(resp))
}
