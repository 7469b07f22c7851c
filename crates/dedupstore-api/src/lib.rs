//! # dedupstore-api
//!
//! HTTP surface of the deduplicated file store: multipart uploads that
//! dedupe on arrival, object metadata, and blob download/streaming by hash.

pub mod error;
pub mod files;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use dedupstore_core::StoreConfig;
use dedupstore_engine::StorageEngine;

pub use error::ApiError;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<StorageEngine>,
    /// `Cache-Control` sent with inline streams.
    pub cache_control: String,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(engine: Arc<StorageEngine>, config: &StoreConfig) -> Self {
        Self {
            engine,
            cache_control: config.download.cache_control.clone(),
            max_upload_bytes: config.api.max_upload_bytes,
        }
    }
}

/// Generates UUIDv7 request ids (time-ordered, so logs sort by arrival).
#[derive(Clone, Copy)]
struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let max_upload_bytes = state.max_upload_bytes;

    Router::new()
        .route("/health", get(files::health))
        .route("/files", post(files::upload_file))
        .route("/files/batch", post(files::upload_batch))
        .route("/files/:hash", get(files::show_file))
        .route("/files/:hash/download", get(files::download_file))
        .route("/files/:hash/stream", get(files::stream_file))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .with_state(state)
}
