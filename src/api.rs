use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Config;
use crate::error::RelayError;
use crate::events::ClientEvent;
use crate::lifecycle::Relay;
use crate::model::FileInfo;

/// Headroom on top of the per-file cap for multipart framing; the file-size
/// limit itself is enforced in [`Relay::upload`].
const MULTIPART_OVERHEAD: usize = 256 * 1024;

/// Header carrying the host token for host-only upload deployments.
const HOST_TOKEN_HEADER: &str = "x-host-token";

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub relay: Arc<Relay>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let relay = Arc::new(Relay::new(
            config.max_upload_bytes(),
            config.host_only_uploads,
        ));
        Self { config, relay }
    }
}

/// Build the HTTP application router.
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes() as usize + MULTIPART_OVERHEAD;
    Router::new()
        .route("/api", get(banner))
        .route("/api/health", get(health))
        .route("/api/rooms", post(create_room))
        .route("/api/rooms/:code/join", post(join_room))
        .route("/api/rooms/:code/verify-host", post(verify_host))
        .route("/api/rooms/:code/upload", post(upload_file))
        .route("/api/rooms/:code/files", get(list_files))
        .route("/api/rooms/:code/files/:file_id", get(download_file))
        .route("/ws", get(ws_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

#[derive(Serialize)]
struct ErrorResp {
    error: String,
}

fn err(status: StatusCode, msg: &str) -> (StatusCode, Json<ErrorResp>) {
    (status, Json(ErrorResp { error: msg.into() }))
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = match self {
            RelayError::RoomNotFound | RelayError::FileNotFound => StatusCode::NOT_FOUND,
            RelayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            RelayError::Unauthorized => StatusCode::FORBIDDEN,
            RelayError::CodeSpaceExhausted => StatusCode::INTERNAL_SERVER_ERROR,
        };
        err(status, &self.to_string()).into_response()
    }
}

#[derive(Serialize)]
struct StatusResp {
    status: &'static str,
    timestamp: i64,
}

async fn health() -> Json<StatusResp> {
    Json(StatusResp {
        status: "OK",
        timestamp: OffsetDateTime::now_utc().unix_timestamp(),
    })
}

#[derive(Serialize)]
struct BannerResp {
    status: &'static str,
    version: &'static str,
    timestamp: i64,
}

async fn banner() -> Json<BannerResp> {
    Json(BannerResp {
        status: "FastTransfer API",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc().unix_timestamp(),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRoomResp {
    room_id: String,
    host_id: String,
}

async fn create_room(State(state): State<AppState>) -> Result<Json<CreateRoomResp>, RelayError> {
    let (room_id, host_id) = state.relay.create_room()?;
    Ok(Json(CreateRoomResp { room_id, host_id }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JoinResp {
    user_id: String,
    room_id: String,
    is_host: bool,
    files: Vec<FileInfo>,
}

async fn join_room(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<JoinResp>, RelayError> {
    let files = state.relay.join_snapshot(&code)?;
    Ok(Json(JoinResp {
        user_id: Uuid::new_v4().to_string(),
        room_id: code.to_ascii_uppercase(),
        is_host: false,
        files,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyHostReq {
    host_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyHostResp {
    is_host: bool,
}

async fn verify_host(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(req): Json<VerifyHostReq>,
) -> Result<Json<VerifyHostResp>, RelayError> {
    let is_host = state.relay.verify_host(&code, &req.host_id)?;
    Ok(Json(VerifyHostResp { is_host }))
}

#[derive(Serialize)]
struct UploadResp {
    file: FileInfo,
}

async fn upload_file(
    State(state): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let host_token = headers
        .get(HOST_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let field = match multipart.next_field().await {
        Ok(Some(field)) => field,
        _ => return err(StatusCode::BAD_REQUEST, "no file was uploaded").into_response(),
    };
    let name = field
        .file_name()
        .map(str::to_owned)
        .unwrap_or_else(|| "file".into());
    let mimetype = field
        .content_type()
        .map(str::to_owned)
        .or_else(|| mime_guess::from_path(&name).first().map(|m| m.to_string()))
        .unwrap_or_else(|| "application/octet-stream".into());
    let data = match field.bytes().await {
        Ok(data) => data,
        Err(_) => return err(StatusCode::BAD_REQUEST, "malformed upload body").into_response(),
    };
    match state
        .relay
        .upload(&code, data, name, mimetype, host_token.as_deref())
    {
        Ok(file) => (StatusCode::OK, Json(UploadResp { file })).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Serialize)]
struct FileListResp {
    files: Vec<FileInfo>,
}

async fn list_files(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<FileListResp>, RelayError> {
    let files = state.relay.list_files(&code)?;
    Ok(Json(FileListResp { files }))
}

async fn download_file(
    State(state): State<AppState>,
    Path((code, file_id)): Path<(String, String)>,
) -> Result<Response, RelayError> {
    let blob = state.relay.get_blob(&code, &file_id)?;
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&blob.mimetype)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    // images and PDFs render in the browser, everything else downloads
    let kind = if blob.mimetype.starts_with("image/") || blob.mimetype == "application/pdf" {
        "inline"
    } else {
        "attachment"
    };
    let disposition = format!("{kind}; filename=\"{}\"", sanitize_filename(&blob.name));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&disposition)
            .unwrap_or_else(|_| HeaderValue::from_static("attachment")),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    Ok((headers, blob.bytes).into_response())
}

/// Strip characters that would break the quoted filename parameter.
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '"' && *c != '\\' && !c.is_control())
        .collect()
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn = Uuid::new_v4();
    debug!(%conn, "websocket connected");
    let (mut sink, mut stream) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel();
    state.relay.connect(conn, tx);

    let mut outbound = UnboundedReceiverStream::new(rx);
    let forward = tokio::spawn(async move {
        while let Some(event) = outbound.next().await {
            let Ok(text) = serde_json::to_string(&event) else {
                continue;
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        // channel closed: the relay severed us (room teardown) or the
        // connection is going away on its own
        let _ = sink.send(Message::Close(None)).await;
    });

    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => state.relay.handle(conn, event),
                Err(_) => debug!(%conn, "ignoring malformed client event"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.relay.disconnect(conn);
    debug!(%conn, "websocket disconnected");
    forward.abort();
}

/// Run the HTTP server bound to the configured address.
pub async fn run_http_server(config: Config) -> Result<()> {
    let addr: SocketAddr = config.bind.parse()?;
    let state = AppState::new(config);
    info!(%addr, "fasttransfer listening");
    axum::Server::bind(&addr)
        .serve(build_router(state).into_make_service())
        .await?;
    Ok(())
}
