use axum::{
    Json, Router,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::accounts::UserDirectory;
use crate::config::DashboardConfig;
use crate::derive;
use crate::entity::{Attributes, EntityId};
use crate::error::{DashboardError, DashboardResult};
use crate::i18n::LocalizationResolver;
use crate::object_storage::{Blob, DirectoryStorage};
use crate::persistence::{FileStore, PersistenceBridge};
use crate::session::{Credentials, Gate, Intent, SessionGuard};
use crate::store::{BucketKind, DocumentLibrary, FacilityStore};

type Kv = Arc<FileStore>;

/// Shared state behind every route.
pub struct AppState {
    facilities: Mutex<FacilityStore<Kv>>,
    documents: Mutex<DocumentLibrary<Kv, DirectoryStorage>>,
    session: Mutex<SessionGuard<Kv, Arc<UserDirectory>>>,
    resolver: LocalizationResolver,
}

impl AppState {
    /// Open every store under the configured directories.
    pub async fn open(config: &DashboardConfig, users: Arc<UserDirectory>) -> DashboardResult<Self> {
        let kv = Arc::new(FileStore::open(&config.data_dir)?);
        let storage = DirectoryStorage::new(&config.object_dir, &config.public_base_url);

        let facilities = FacilityStore::open(PersistenceBridge::new(Arc::clone(&kv)));
        let documents = DocumentLibrary::open(PersistenceBridge::new(Arc::clone(&kv)), Some(storage));
        let session = SessionGuard::restore(
            PersistenceBridge::new(Arc::clone(&kv)),
            users,
            config.session_restore,
        )
        .await;

        Ok(AppState {
            facilities: Mutex::new(facilities),
            documents: Mutex::new(documents),
            session: Mutex::new(session),
            resolver: LocalizationResolver::bundled_with_default(&config.default_language),
        })
    }
}

#[derive(Deserialize)]
struct LangQuery {
    lang: Option<String>,
}

#[derive(Serialize)]
struct StatusResponse {
    status: String,
    message: Option<String>,
}

impl StatusResponse {
    fn ok() -> Self {
        StatusResponse {
            status: "ok".to_string(),
            message: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        StatusResponse {
            status: "error".to_string(),
            message: Some(message.into()),
        }
    }
}

fn error_response(e: &DashboardError) -> Response {
    let status = match e {
        DashboardError::NotFound { .. } => StatusCode::NOT_FOUND,
        DashboardError::Validation(_) => StatusCode::BAD_REQUEST,
        DashboardError::Network(_) | DashboardError::RemoteUpload(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(StatusResponse::error(e.to_string()))).into_response()
}

/// Build the API routes, plus static serving of stored objects.
///
/// # Arguments
///
/// * `state` - Stores and session shared by all handlers.
/// * `config` - Supplies the object directory and its public URL prefix.
pub fn router(state: Arc<AppState>, config: &DashboardConfig) -> Router {
    let objects_route = format!("/{}", config.public_base_url.trim_matches('/'));

    Router::new()
        .route("/api/facilities", get(list_facilities))
        .route("/api/map", get(map_facilities))
        .route("/api/documents", get(list_documents).post(add_document))
        .route("/api/documents/:id", delete(delete_document))
        .route("/api/login", post(login))
        .route("/api/logout", post(logout))
        .route("/api/translate/:lang/:key", get(translate))
        .nest_service(&objects_route, ServeDir::new(&config.object_dir))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Open the stores and serve the API until the listener fails.
pub async fn run(config: DashboardConfig) -> Result<(), Box<dyn std::error::Error>> {
    let users = Arc::new(UserDirectory::open(&config.data_dir)?);
    let state = Arc::new(AppState::open(&config, users).await?);
    let app = router(state, &config);

    let listener = TcpListener::bind(&config.bind_address).await?;
    log::info!("listening on http://{}", config.bind_address);
    axum::serve(listener, app).await?;

    Ok(())
}

fn language(state: &AppState, query: &LangQuery) -> String {
    query
        .lang
        .clone()
        .unwrap_or_else(|| state.resolver.default_language().to_string())
}

async fn list_facilities(
    Query(query): Query<LangQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let lang = language(&state, &query);
    let facilities = state.facilities.lock().await;

    Json(json!({
        "facilities": facilities.views(&state.resolver, &lang),
        "error": facilities.last_error(),
    }))
}

async fn map_facilities(
    Query(query): Query<LangQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let lang = language(&state, &query);
    let facilities = state.facilities.lock().await;

    let markers: Vec<_> = facilities
        .map_entries()
        .into_iter()
        .map(|entity| derive::present(entity, &state.resolver, &lang))
        .collect();
    Json(json!({ "markers": markers }))
}

async fn list_documents(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let known = state.facilities.lock().await.list();
    let documents = state.documents.lock().await;

    let buckets: Vec<Value> = documents
        .buckets(&known)
        .into_iter()
        .map(|bucket| {
            let (kind, key) = match &bucket.kind {
                BucketKind::General => ("general", None),
                BucketKind::Facility(id) => ("facility", Some(id.to_string())),
                BucketKind::UnknownGroup(key) => ("unknown", Some(key.clone())),
            };
            json!({ "kind": kind, "key": key, "documents": bucket.documents })
        })
        .collect();

    Json(json!({ "buckets": buckets, "error": documents.last_error() }))
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

/// Let a protected request through, or answer with a login redirect.
async fn authorize(state: &AppState, headers: &HeaderMap, target: &str) -> Result<(), Response> {
    let mut session = state.session.lock().await;

    // Anonymous callers present no token; their intent is kept for after login.
    let gate = if session.session().token.as_deref() == bearer(headers) {
        session.gate(Intent::new(target))
    } else {
        Gate::RedirectToLogin
    };

    match gate {
        Gate::Proceed(_) => Ok(()),
        Gate::RedirectToLogin => Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "status": "error",
                "message": state.resolver.resolve(state.resolver.default_language(), "login_required"),
                "redirect": "/login",
            })),
        )
            .into_response()),
    }
}

async fn add_document(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    if let Err(redirect) = authorize(&state, &headers, "/api/documents").await {
        return redirect;
    }

    let mut record = Attributes::new();
    let mut blob = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return (StatusCode::BAD_REQUEST, Json(StatusResponse::error(e.to_string())))
                    .into_response();
            }
        };

        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            let file_name = field.file_name().unwrap_or("document").to_string();
            let content_type = field.content_type().map(str::to_string);
            match field.bytes().await {
                Ok(bytes) => {
                    let mut file = Blob::new(file_name, bytes.to_vec());
                    if let Some(content_type) = content_type {
                        file = file.with_content_type(content_type);
                    }
                    blob = Some(file);
                }
                Err(e) => {
                    return (StatusCode::BAD_REQUEST, Json(StatusResponse::error(e.to_string())))
                        .into_response();
                }
            }
        } else {
            match field.text().await {
                Ok(text) if name == "foundryId" => {
                    let value = EntityId::from_value(&Value::from(text))
                        .map_or(Value::Null, |id| id.to_value());
                    record.insert(name, value);
                }
                Ok(text) => {
                    record.insert(name, Value::from(text));
                }
                Err(e) => {
                    return (StatusCode::BAD_REQUEST, Json(StatusResponse::error(e.to_string())))
                        .into_response();
                }
            }
        }
    }

    let mut documents = state.documents.lock().await;
    match documents.add(record, blob).await {
        Ok(document) => (StatusCode::CREATED, Json(document)).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn delete_document(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    if let Err(redirect) = authorize(&state, &headers, "/api/documents").await {
        return redirect;
    }

    let mut documents = state.documents.lock().await;
    match documents.remove(&EntityId::new(id)).await {
        Ok(()) => Json(StatusResponse::ok()).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(credentials): Json<Credentials>,
) -> Response {
    let mut session = state.session.lock().await;

    match session.login(&credentials).await {
        Ok(()) => {
            let resume = session.take_resume().map(|intent| intent.0);
            Json(json!({
                "status": "ok",
                "token": session.session().token,
                "user": session.user(),
                "resume": resume,
            }))
            .into_response()
        }
        Err(DashboardError::Validation(message)) => {
            let text = state.resolver.resolve(state.resolver.default_language(), &message);
            (StatusCode::UNAUTHORIZED, Json(StatusResponse::error(text))).into_response()
        }
        Err(e) => error_response(&e),
    }
}

/// Whether a request presents the token of the live session.
fn holds_session(session_token: Option<&str>, presented: Option<&str>) -> bool {
    session_token.is_some() && session_token == presented
}

/// End the session. Only the holder of the session token may do so; anyone
/// else gets 401 and the session is left alone.
async fn logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let mut session = state.session.lock().await;

    if !holds_session(session.session().token.as_deref(), bearer(&headers)) {
        log::warn!("logout refused: request does not hold the session token");
        return (
            StatusCode::UNAUTHORIZED,
            Json(StatusResponse::error(
                state.resolver.resolve(state.resolver.default_language(), "login_required"),
            )),
        )
            .into_response();
    }

    session.logout().await;
    Json(StatusResponse::ok()).into_response()
}

async fn translate(
    Path((lang, key)): Path<(String, String)>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let text = state.resolver.resolve(&lang, &key);
    Json(json!({ "language": lang, "key": key, "text": text }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn with_bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        headers
    }

    async fn signed_in_state(dir: &std::path::Path) -> (Arc<AppState>, String) {
        let config = DashboardConfig {
            data_dir: dir.join("data"),
            object_dir: dir.join("objects"),
            ..DashboardConfig::default()
        };
        let users = Arc::new(UserDirectory::open(&config.data_dir).unwrap());
        users.register("admin", "admin@example.com", "secret").unwrap();

        let state = Arc::new(AppState::open(&config, users).await.unwrap());
        let token = {
            let mut session = state.session.lock().await;
            session.login(&Credentials::new("admin", "secret")).await.unwrap();
            session.session().token.clone().unwrap()
        };
        (state, token)
    }

    #[test]
    fn only_the_session_token_holds_the_session() {
        assert!(holds_session(Some("abc"), Some("abc")));
        assert!(!holds_session(Some("abc"), Some("xyz")));
        assert!(!holds_session(Some("abc"), None));
        assert!(!holds_session(None, None));
    }

    #[tokio::test]
    async fn logout_without_the_token_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _token) = signed_in_state(dir.path()).await;

        let anonymous = logout(State(Arc::clone(&state)), HeaderMap::new()).await;
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

        let forged = logout(State(Arc::clone(&state)), with_bearer("forged")).await;
        assert_eq!(forged.status(), StatusCode::UNAUTHORIZED);

        assert!(state.session.lock().await.is_authenticated());
    }

    #[tokio::test]
    async fn logout_with_the_token_ends_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let (state, token) = signed_in_state(dir.path()).await;

        let response = logout(State(Arc::clone(&state)), with_bearer(&token)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!state.session.lock().await.is_authenticated());
    }
}
