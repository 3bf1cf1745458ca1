//! Route handlers.

use std::convert::Infallible;

use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info};
use url::form_urlencoded;

use replica_core::Origins;
use replica_scanner::crawler::{content_type, is_html};
use replica_scanner::{CaptureJob, Collector, RewriteEngine, ScanError};

use crate::error::{ApiError, Result};
use crate::state::AppState;

/// Largest request body relayed to the source origin.
const MAX_FORWARD_BODY: usize = 32 * 1024 * 1024;

/// Chunks of a capture document buffered ahead of a slow client.
const CAPTURE_CHANNEL_DEPTH: usize = 16;

/// Hop-by-hop headers, plus those the relay negotiates on its own.
const SKIPPED_REQUEST_HEADERS: &[&str] = &[
    "host",
    "accept-encoding",
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

const SKIPPED_RESPONSE_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Query parameters understood by every route. They override configuration
/// for a single request.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct MirrorParams {
    pub proxy_origin: Option<String>,
    pub rewrite_origin: Option<String>,
    pub rewrite_paths: Option<String>,
    pub resource_types: Option<String>,
}

impl MirrorParams {
    /// Picks the overrides out of a query string. Other keys are left for
    /// the source origin, and a repeated key keeps its first value.
    pub fn from_query(query: Option<&str>) -> Self {
        let mut params = Self::default();
        let query = query.unwrap_or_default();
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            let slot = match key.as_ref() {
                "proxy-origin" => &mut params.proxy_origin,
                "rewrite-origin" => &mut params.rewrite_origin,
                "rewrite-paths" => &mut params.rewrite_paths,
                "resource-types" => &mut params.resource_types,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into_owned());
            }
        }
        params
    }

    fn origins(&self, state: &AppState) -> Result<Origins> {
        Ok(state
            .config
            .origins(self.proxy_origin.as_deref(), self.rewrite_origin.as_deref())?)
    }

    fn tag_resources(&self, state: &AppState) -> bool {
        match self.resource_types.as_deref() {
            Some(value) => matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true"),
            None => state.config.tag_resources,
        }
    }
}

/// ANY /* - Relay a request to the source origin, rewriting HTML responses.
pub async fn proxy(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response> {
    let params = MirrorParams::from_query(request.uri().query());
    let origins = params.origins(&state)?;
    let (parts, body) = request.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let url = origins.source.resolve(&path_and_query);

    let body = to_bytes(body, MAX_FORWARD_BODY)
        .await
        .map_err(|e| ApiError::BadRequest(format!("Unreadable request body: {}", e)))?;

    let mut upstream = state
        .passthrough
        .client()
        .request(parts.method.clone(), url.clone())
        .headers(forwarded_headers(&parts.headers, SKIPPED_REQUEST_HEADERS));
    if !body.is_empty() {
        upstream = upstream.body(body);
    }

    let response = upstream.send().await.map_err(|e| {
        error!("Error fetching {}: {}", url, e);
        ApiError::Upstream(e.to_string())
    })?;

    let status = response.status();
    let content_type = content_type(response.headers()).map(str::to_string);

    if !status.is_success() || !is_html(content_type.as_deref()) {
        info!(
            "PROXY: {} {} {} {}",
            parts.method,
            url,
            status.as_u16(),
            content_type.as_deref().unwrap_or("-")
        );
        if status.is_success() || status == StatusCode::NOT_MODIFIED {
            state.tracker.record(path_and_query).await;
        }

        let mut headers = forwarded_headers(response.headers(), SKIPPED_RESPONSE_HEADERS);
        strip_location(&mut headers, &origins);
        let mut relayed = Response::new(Body::from_stream(response.bytes_stream()));
        *relayed.status_mut() = status;
        *relayed.headers_mut() = headers;
        return Ok(relayed);
    }

    debug!("Rewriting {}", url);
    let engine = RewriteEngine::new(origins.rewrite.clone());
    let body = engine
        .rewrite_stream(
            response.bytes_stream(),
            Collector::disabled(origins.rewrite.clone()),
        )
        .into_body();

    let mut rewritten = Response::new(Body::from_stream(body));
    *rewritten.status_mut() = status;
    if let Some(value) = content_type.and_then(|ct| HeaderValue::from_str(&ct).ok()) {
        rewritten.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    Ok(rewritten)
}

/// GET /html-json/* and /rewrite-page/* - Stream a capture document.
pub async fn capture(
    State(state): State<AppState>,
    uri: Uri,
) -> Result<Response> {
    let params = MirrorParams::from_query(uri.query());
    let origins = params.origins(&state)?;
    let requested = uri
        .path()
        .strip_prefix("/html-json")
        .or_else(|| uri.path().strip_prefix("/rewrite-page"))
        .filter(|p| !p.is_empty())
        .unwrap_or("/");

    let paths = state
        .config
        .paths(params.rewrite_paths.as_deref(), requested);
    let job = CaptureJob::new(origins.source, Some(origins.rewrite), paths)
        .with_tagged_resources(params.tag_resources(&state));

    let (tx, rx) = mpsc::channel::<Bytes>(CAPTURE_CHANNEL_DEPTH);
    let crawler = state.crawler.clone();
    tokio::spawn(async move {
        match crawler.capture(&job, tx).await {
            Ok(summary) => debug!("Capture job done: {:?}", summary),
            Err(ScanError::StreamClosed) => debug!("Capture job abandoned by client"),
            Err(e) => error!("Capture job failed: {}", e),
        }
    });

    let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>));
    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}

/// GET /reset-proxy-capture - Forget every tracked resource.
pub async fn reset_proxy_capture(State(state): State<AppState>) -> &'static str {
    state.tracker.reset().await;
    info!("Proxy capture reset");
    "Proxy capture mode reset\n"
}

/// GET /proxy-capture - Tracked resources as a pretty-printed snapshot.
pub async fn proxy_capture(State(state): State<AppState>) -> Result<Response> {
    let snapshot = state.tracker.snapshot().await;
    let text = serde_json::to_string_pretty(&snapshot)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(([(header::CONTENT_TYPE, "application/json")], text).into_response())
}

fn forwarded_headers(headers: &HeaderMap, skipped: &[&str]) -> HeaderMap {
    let mut forwarded = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !skipped.contains(&name.as_str()) {
            forwarded.append(name.clone(), value.clone());
        }
    }
    forwarded
}

/// Keeps redirects inside the mirror.
fn strip_location(headers: &mut HeaderMap, origins: &Origins) {
    let name = HeaderName::from_static("location");
    let Some(location) = headers.get(&name).and_then(|v| v.to_str().ok()) else {
        return;
    };
    let stripped = origins.rewrite.strip(&origins.source.strip(location));
    let stripped = if stripped.is_empty() { "/".to_string() } else { stripped };
    if let Ok(value) = HeaderValue::from_str(&stripped) {
        headers.insert(name, value);
    }
}
