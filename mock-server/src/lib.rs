use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{any, get},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::{net::TcpListener, sync::RwLock};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use uuid::Uuid;

pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Request bodies above this size are rejected with 413.
pub const MAX_BODY_BYTES: usize = 1_048_576;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Album {
    pub id: u64,
    #[serde(rename = "userId")]
    pub user_id: u64,
    pub title: String,
}

/// Payload envelope used by every `/albums` route.
#[derive(Debug, Serialize, Deserialize)]
pub struct Data<T> {
    pub data: T,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// What `/inspect` saw on the wire.
#[derive(Debug, Serialize, Deserialize)]
pub struct Inspection {
    pub method: String,
    pub accept: Option<String>,
    pub content_type: Option<String>,
    pub body: String,
}

#[derive(Clone, Debug)]
pub struct CorrelationId(pub String);

pub struct Store {
    albums: RwLock<BTreeMap<u64, Album>>,
    next_id: AtomicU64,
}

pub type Db = Arc<Store>;

/// The album list served from `/static/albums.json` and used to seed the
/// store.
pub fn static_albums() -> Vec<Album> {
    [
        (1, 1, "quidem molestiae enim"),
        (2, 1, "sunt qui excepturi placeat culpa"),
        (3, 2, "omnis laborum odio"),
    ]
    .into_iter()
    .map(|(id, user_id, title)| Album {
        id,
        user_id,
        title: title.to_string(),
    })
    .collect()
}

pub fn app() -> Router {
    let seed = static_albums();
    let next_id = seed.iter().map(|a| a.id).max().unwrap_or(0) + 1;
    let db: Db = Arc::new(Store {
        albums: RwLock::new(seed.into_iter().map(|a| (a.id, a)).collect()),
        next_id: AtomicU64::new(next_id),
    });

    Router::new()
        .route("/health", get(health))
        .route("/static/albums.json", get(albums_file))
        .route("/albums", get(list_albums).post(create_album))
        .route(
            "/albums/{id}",
            get(get_album).put(update_album).delete(delete_album),
        )
        .route("/errors/{code}", get(check_error))
        .route("/slow/{millis}", get(slow))
        .route("/inspect", any(inspect))
        .route("/malformed", get(malformed))
        .route("/empty", get(empty))
        .route("/null", get(null))
        .route("/panic", get(always_panics))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CatchPanicLayer::custom(recover_panic))
        .layer(middleware::from_fn(correlation_id))
        .layer(TraceLayer::new_for_http())
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

/// Turn a handler panic into a 500 and close the connection.
fn recover_panic(err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| err.downcast_ref::<String>().cloned())
        .unwrap_or_default();
    tracing::error!(panic = %detail, "handler panicked");

    let mut response = error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "the server encountered a problem",
    );
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

/// Reuse the caller's correlation ID or mint a UUID v4, and echo it back.
async fn correlation_id(mut request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(CorrelationId(id.clone()));
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(CORRELATION_ID_HEADER, value);
    }
    response
}

async fn health(Extension(CorrelationId(id)): Extension<CorrelationId>) -> Json<serde_json::Value> {
    Json(json!({ "health": "OK", "correlationID": id }))
}

async fn albums_file() -> Json<Vec<Album>> {
    Json(static_albums())
}

async fn list_albums(State(db): State<Db>) -> Json<Data<Vec<Album>>> {
    let albums = db.albums.read().await;
    Json(Data {
        data: albums.values().cloned().collect(),
    })
}

#[derive(Deserialize)]
pub struct NewAlbum {
    #[serde(rename = "userId", default)]
    pub user_id: u64,
    pub title: String,
}

async fn create_album(
    State(db): State<Db>,
    Json(input): Json<NewAlbum>,
) -> (StatusCode, Json<Data<Album>>) {
    let album = Album {
        id: db.next_id.fetch_add(1, Ordering::Relaxed),
        user_id: input.user_id,
        title: input.title,
    };
    db.albums.write().await.insert(album.id, album.clone());
    (StatusCode::CREATED, Json(Data { data: album }))
}

async fn get_album(State(db): State<Db>, Path(id): Path<u64>) -> Response {
    match db.albums.read().await.get(&id) {
        Some(album) => Json(Data {
            data: album.clone(),
        })
        .into_response(),
        None => error_response(StatusCode::NOT_FOUND, "Not Found"),
    }
}

async fn update_album(
    State(db): State<Db>,
    Path(id): Path<u64>,
    Json(input): Json<NewAlbum>,
) -> Response {
    let mut albums = db.albums.write().await;
    match albums.get_mut(&id) {
        Some(album) => {
            album.user_id = input.user_id;
            album.title = input.title;
            Json(Data {
                data: album.clone(),
            })
            .into_response()
        }
        None => error_response(StatusCode::NOT_FOUND, "Not Found"),
    }
}

async fn delete_album(State(db): State<Db>, Path(id): Path<u64>) -> Response {
    match db.albums.write().await.remove(&id) {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => error_response(StatusCode::NOT_FOUND, "Not Found"),
    }
}

/// Answer with the error envelope for `code`.
async fn check_error(Path(code): Path<String>) -> Response {
    let status = match code.parse::<u16>() {
        Ok(400) => return error_response(StatusCode::BAD_REQUEST, "logged 400"),
        Ok(401) => StatusCode::UNAUTHORIZED,
        Ok(403) => StatusCode::FORBIDDEN,
        Ok(404) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
        "the server encountered a problem"
    } else {
        status.canonical_reason().unwrap_or_default()
    };
    error_response(status, message)
}

async fn slow(Path(millis): Path<u64>) -> Json<serde_json::Value> {
    tokio::time::sleep(Duration::from_millis(millis)).await;
    Json(json!({ "slept_ms": millis }))
}

async fn inspect(method: Method, headers: HeaderMap, body: Bytes) -> Json<Inspection> {
    let header_value = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    Json(Inspection {
        method: method.to_string(),
        accept: header_value(header::ACCEPT),
        content_type: header_value(header::CONTENT_TYPE),
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

async fn malformed() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/json")],
        "{\"id\": 1, \"name\": \"Test Decode\",}\n",
    )
}

async fn empty() -> StatusCode {
    StatusCode::OK
}

async fn null() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/json")], "null\n")
}

async fn always_panics() -> StatusCode {
    panic!("deliberate panic")
}

async fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not Found")
}
