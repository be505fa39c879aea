// ABOUTME: HTTP entry point for the reel-relay service
// ABOUTME: Routes media resolution, streaming proxy, and Drive relay requests

mod config;
mod drive;
mod error;
mod instagram;
mod media;
mod proxy;
mod resolver;
mod token;

use crate::config::Config;
use crate::drive::DriveClient;
use crate::error::{RelayError, Result};
use crate::instagram::InstagramExtractor;
use crate::media::PostResolution;
use crate::resolver::Resolver;
use crate::token::ServiceAccountTokenProvider;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, options, post},
    Router,
};
use bytes::Bytes;
use hyper_util::rt::TokioIo;
use hyper_util::server::conn::auto::Builder;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tower::Service;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

/// Bound on the buffered relay hop; payloads beyond this belong on the
/// streaming /upload/remote path
const MAX_RELAY_BODY_BYTES: usize = 256 * 1024 * 1024;

/// Connect timeout for all outbound requests
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

// App state shared across handlers
struct AppState {
    http: reqwest::Client,
    resolver: Resolver,
    drive: Option<DriveClient>,
}

#[derive(Deserialize)]
struct ResolveRequest {
    url: Option<String>,
}

#[derive(Serialize)]
struct ResolveResponse {
    success: bool,
    #[serde(flatten)]
    resolution: PostResolution,
}

#[derive(Deserialize)]
struct ProxyParams {
    url: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionRequest {
    file_name: Option<String>,
    mime_type: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    upload_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteRelayRequest {
    source_url: Option<String>,
    upload_url: Option<String>,
    mime_type: Option<String>,
}

#[derive(Serialize)]
struct RelaySuccess {
    success: bool,
}

#[derive(Serialize)]
struct RemoteRelayResponse {
    success: bool,
    bytes: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("reel_relay=info".parse()?),
        )
        .init();

    let config = Config::from_env()?;
    let port = config.port;

    let http = reqwest::Client::builder()
        .user_agent(proxy::BROWSER_USER_AGENT)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()?;

    let extractor = Arc::new(InstagramExtractor::new(
        http.clone(),
        config.instagram_doc_id.clone(),
    ));
    let resolver = Resolver::new(extractor, http.clone());

    // Credentials are validated here, once; a bad key fails startup
    let drive = match &config.drive {
        Some(drive_config) => {
            let tokens = Arc::new(ServiceAccountTokenProvider::new(http.clone(), drive_config)?);
            Some(DriveClient::new(
                http.clone(),
                tokens,
                drive_config.folder_id.clone(),
            ))
        }
        None => {
            info!("Drive credentials not configured, upload sessions disabled");
            None
        }
    };

    let state = Arc::new(AppState {
        http,
        resolver,
        drive,
    });

    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .max_age(Duration::from_secs(86400));

    // Build router
    let app = Router::new()
        .route("/resolve", post(handle_resolve))
        .route("/resolve", options(handle_cors_preflight))
        .route("/proxy", get(handle_proxy))
        .route("/upload/session", post(handle_create_session))
        .route("/upload/session", options(handle_cors_preflight))
        .route("/upload/relay", post(handle_relay))
        .route("/upload/relay", options(handle_cors_preflight))
        .route("/upload/remote", post(handle_remote_relay))
        .route("/upload/remote", options(handle_cors_preflight))
        .route("/health", get(handle_health))
        .route("/", get(handle_health))
        .layer(DefaultBodyLimit::max(MAX_RELAY_BODY_BYTES))
        .layer(cors)
        .with_state(state);

    let addr = format!("0.0.0.0:{}", port);
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    // Use hyper's auto builder which supports both HTTP/1 and HTTP/2
    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let app = app.clone();

        tokio::spawn(async move {
            let builder = Builder::new(hyper_util::rt::TokioExecutor::new());
            if let Err(e) = builder
                .serve_connection(
                    io,
                    hyper::service::service_fn(move |req| {
                        let mut app = app.clone();
                        async move { app.call(req).await }
                    }),
                )
                .await
            {
                error!("Connection error: {}", e);
            }
        });
    }
}

async fn handle_cors_preflight() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "driveConfigured": state.drive.is_some(),
    }))
}

/// POST /resolve - resolve a post URL into media items
async fn handle_resolve(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ResolveRequest>,
) -> Response {
    match process_resolve(&state, request).await {
        Ok(resolution) => (
            StatusCode::OK,
            Json(ResolveResponse {
                success: true,
                resolution,
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Resolve error: {}", e);
            e.into_response()
        }
    }
}

async fn process_resolve(state: &AppState, request: ResolveRequest) -> Result<PostResolution> {
    let url = request
        .url
        .filter(|u| !u.is_empty())
        .ok_or_else(|| RelayError::InvalidInput("URL is required".into()))?;
    state.resolver.resolve(&url).await
}

/// GET /proxy?url= - stream a remote payload through to the caller
async fn handle_proxy(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ProxyParams>,
) -> Response {
    match process_proxy(&state, params).await {
        Ok(response) => response,
        Err(e) => {
            error!("Proxy error: {}", e);
            e.into_response()
        }
    }
}

async fn process_proxy(state: &AppState, params: ProxyParams) -> Result<Response> {
    let url = params
        .url
        .filter(|u| !u.is_empty())
        .ok_or_else(|| RelayError::InvalidInput("Missing URL parameter".into()))?;

    let upstream = proxy::fetch_upstream(&state.http, &url).await?;

    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let content_length = upstream.content_length();
    let file_name = proxy::file_name_for(&url);

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", file_name),
        );
    if let Some(length) = content_length {
        builder = builder.header(header::CONTENT_LENGTH, length);
    }

    // The body is piped through chunk by chunk, never buffered whole
    builder
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|e| RelayError::upstream(format!("Failed to build proxy response: {}", e)))
}

/// POST /upload/session - negotiate a resumable upload session
async fn handle_create_session(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SessionRequest>,
) -> Response {
    match process_create_session(&state, request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => {
            error!("Session creation error: {}", e);
            e.into_response()
        }
    }
}

async fn process_create_session(
    state: &AppState,
    request: SessionRequest,
) -> Result<SessionResponse> {
    let drive = state.drive.as_ref().ok_or_else(|| {
        RelayError::Configuration("Google Drive credentials not configured".into())
    })?;

    let (file_name, mime_type) = match (
        request.file_name.filter(|f| !f.is_empty()),
        request.mime_type.filter(|m| !m.is_empty()),
    ) {
        (Some(file_name), Some(mime_type)) => (file_name, mime_type),
        _ => {
            return Err(RelayError::InvalidInput(
                "Missing fileName or mimeType".into(),
            ))
        }
    };

    let session = drive.create_session(&file_name, &mime_type).await?;
    Ok(SessionResponse {
        upload_url: session.upload_url,
    })
}

/// POST /upload/relay - push a multipart payload into an upload session
async fn handle_relay(State(state): State<Arc<AppState>>, multipart: Multipart) -> Response {
    match process_relay(&state, multipart).await {
        Ok(()) => (StatusCode::OK, Json(RelaySuccess { success: true })).into_response(),
        Err(e) => {
            error!("Relay error: {}", e);
            e.into_response()
        }
    }
}

async fn process_relay(state: &AppState, mut multipart: Multipart) -> Result<()> {
    let mut file: Option<Bytes> = None;
    let mut upload_url: Option<String> = None;
    let mut mime_type: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| RelayError::InvalidInput(format!("Malformed multipart body: {}", e)))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            // The payload is buffered on this hop; the router's body limit
            // bounds how much
            Some("file") => {
                file = Some(field.bytes().await.map_err(|e| {
                    RelayError::InvalidInput(format!("Failed to read file field: {}", e))
                })?)
            }
            Some("uploadUrl") => {
                upload_url = Some(field.text().await.map_err(|e| {
                    RelayError::InvalidInput(format!("Failed to read uploadUrl field: {}", e))
                })?)
            }
            Some("mimeType") => {
                mime_type = Some(field.text().await.map_err(|e| {
                    RelayError::InvalidInput(format!("Failed to read mimeType field: {}", e))
                })?)
            }
            _ => {}
        }
    }

    let (Some(file), Some(upload_url), Some(mime_type)) = (file, upload_url, mime_type) else {
        return Err(RelayError::InvalidInput("Missing parameters".into()));
    };

    drive::relay_bytes(&state.http, &upload_url, &mime_type, file).await
}

/// POST /upload/remote - fetch a source URL and stream it into a session
async fn handle_remote_relay(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RemoteRelayRequest>,
) -> Response {
    match process_remote_relay(&state, request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => {
            error!("Remote relay error: {}", e);
            e.into_response()
        }
    }
}

async fn process_remote_relay(
    state: &AppState,
    request: RemoteRelayRequest,
) -> Result<RemoteRelayResponse> {
    let (source_url, upload_url, mime_type) = match (
        request.source_url.filter(|u| !u.is_empty()),
        request.upload_url.filter(|u| !u.is_empty()),
        request.mime_type.filter(|m| !m.is_empty()),
    ) {
        (Some(source_url), Some(upload_url), Some(mime_type)) => {
            (source_url, upload_url, mime_type)
        }
        _ => {
            return Err(RelayError::InvalidInput(
                "Missing sourceUrl, uploadUrl, or mimeType".into(),
            ))
        }
    };

    let source = proxy::fetch_upstream(&state.http, &source_url).await?;
    let bytes = drive::relay_stream(&state.http, &upload_url, &mime_type, source).await?;

    Ok(RemoteRelayResponse {
        success: true,
        bytes,
    })
}
