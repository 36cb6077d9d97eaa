use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::pipeline::{PipelineError, PipelineState, StreamPipeline, STREAM_CONTENT_TYPE};
use crate::source::{FrameSource, SourceError};

/// Opens a fresh frame source when a viewer arrives after the previous
/// stream closed.
pub type SourceOpener = Arc<dyn Fn() -> Result<Box<dyn FrameSource>, SourceError> + Send + Sync>;

type Slot = Arc<Mutex<Option<StreamPipeline>>>;

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    slot: Slot,
    opener: SourceOpener,
}

impl AppState {
    pub fn new(pipeline: StreamPipeline, opener: SourceOpener) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(pipeline))),
            opener,
        }
    }

    /// Take the pipeline for one viewer. `None` while another viewer has it.
    fn lease(&self) -> Option<Lease> {
        let pipeline = lock(&self.slot).take()?;
        Some(Lease {
            slot: self.slot.clone(),
            pipeline: Some(pipeline),
        })
    }
}

fn lock(slot: &Slot) -> MutexGuard<'_, Option<StreamPipeline>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Exclusive use of the pipeline for the lifetime of one response body.
/// Dropping it puts the pipeline back.
struct Lease {
    slot: Slot,
    pipeline: Option<StreamPipeline>,
}

impl Lease {
    fn is_closed(&self) -> bool {
        self.pipeline
            .as_ref()
            .map_or(true, |p| p.state() == PipelineState::Closed)
    }

    fn reopen(&mut self, source: Box<dyn FrameSource>) {
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.reopen(source);
        }
    }

    fn tick(&mut self) -> Result<Option<Bytes>, PipelineError> {
        match self.pipeline.as_mut() {
            Some(pipeline) => pipeline.tick(),
            None => Ok(None),
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            *lock(&self.slot) = Some(pipeline);
            info!("viewer released stream");
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET / streams annotated frames as MJPEG
async fn stream(State(state): State<AppState>) -> Response {
    let Some(mut lease) = state.lease() else {
        warn!("stream requested while another viewer is connected");
        return (StatusCode::SERVICE_UNAVAILABLE, "stream already has a viewer").into_response();
    };

    if lease.is_closed() {
        let opener = state.opener.clone();
        match tokio::task::spawn_blocking(move || opener()).await {
            Ok(Ok(source)) => lease.reopen(source),
            Ok(Err(e)) => {
                error!(error = %e, "failed to reopen video source");
                return (StatusCode::SERVICE_UNAVAILABLE, "video source unavailable")
                    .into_response();
            }
            Err(e) => {
                error!(error = %e, "spawn_blocking failed");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }
    }

    info!("viewer connected");
    let chunks = futures_util::stream::unfold(Some(lease), next_chunk);
    (
        [
            (header::CONTENT_TYPE, STREAM_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(chunks),
    )
        .into_response()
}

/// Run one pipeline tick on a blocking thread. Ending the stream drops the
/// lease.
async fn next_chunk(lease: Option<Lease>) -> Option<(Result<Bytes, Infallible>, Option<Lease>)> {
    let mut lease = lease?;
    let result = tokio::task::spawn_blocking(move || {
        let tick = lease.tick();
        (lease, tick)
    })
    .await;

    match result {
        Ok((lease, Ok(Some(chunk)))) => Some((Ok(chunk), Some(lease))),
        Ok((_, Ok(None))) => None,
        Ok((_, Err(e))) => {
            error!(error = %e, "stream stopped");
            None
        }
        Err(e) => {
            error!(error = %e, "spawn_blocking failed");
            None
        }
    }
}

/// GET /healthz
async fn healthz() -> &'static str {
    "ok"
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(stream))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
