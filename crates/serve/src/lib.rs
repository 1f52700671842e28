//! Development HTTP facade: a read-only bridge over the storage contract
//! plus label-resolved content reads. Not a production surface — it exists
//! so editors and tooling can poke at a local store over HTTP.

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use storage::Store;

#[derive(Clone)]
pub struct App {
    store: Store,
}

impl App {
    pub fn new(store: Store) -> App {
        App { store }
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/storage/read", get(storage_read))
            .route("/storage/exists", get(storage_exists))
            .route("/storage/list", get(storage_list))
            .route("/:label/*path", get(content))
            .with_state(self)
    }
}

/// Error wrapper mapping engine failures to HTTP statuses. Anything not
/// clearly the caller's fault is a 500 with the chain logged.
#[derive(Debug)]
pub struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.0.is_server_error() {
            tracing::error!(status = %self.0, error = %self.1, "request failed");
        }
        (self.0, Json(serde_json::json!({ "error": self.1 }))).into_response()
    }
}

impl From<storage::Error> for ApiError {
    fn from(err: storage::Error) -> ApiError {
        match &err {
            storage::Error::NotFound { .. } => ApiError(StatusCode::NOT_FOUND, err.to_string()),
            _ => ApiError(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        }
    }
}

impl From<kronoa::Error> for ApiError {
    fn from(err: kronoa::Error) -> ApiError {
        match &err {
            kronoa::Error::NotFound { .. } => ApiError(StatusCode::NOT_FOUND, err.to_string()),
            kronoa::Error::InvalidPath { .. } => ApiError(StatusCode::BAD_REQUEST, err.to_string()),
            kronoa::Error::Storage(inner) if inner.is_not_found() => {
                ApiError(StatusCode::NOT_FOUND, err.to_string())
            }
            _ => ApiError(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Deserialize)]
struct PathQuery {
    path: String,
}

async fn storage_read(
    State(app): State<App>,
    Query(query): Query<PathQuery>,
) -> Result<Response, ApiError> {
    let data = app.store.read(&query.path).await?;
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        data.to_vec(),
    )
        .into_response())
}

async fn storage_exists(
    State(app): State<App>,
    Query(query): Query<PathQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let exists = app.store.exists(&query.path).await?;
    Ok(Json(serde_json::json!({ "exists": exists })))
}

#[derive(Deserialize)]
struct ListQuery {
    #[serde(default)]
    prefix: String,
    delimiter: Option<char>,
}

async fn storage_list(
    State(app): State<App>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<String>>, ApiError> {
    let keys = app.store.list(&query.prefix, query.delimiter).await?;
    Ok(Json(keys))
}

/// `GET /{label}/{path}` — read `path` as resolved by the named session:
/// `production` and `staging` read their pointers, anything else is a
/// working label.
async fn content(
    State(app): State<App>,
    Path((label, path)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let session = match label.as_str() {
        "production" => kronoa::Session::production(app.store.clone()).await?,
        "staging" => kronoa::Session::staging(app.store.clone()).await?,
        other => kronoa::Session::resume(app.store.clone(), other).await?,
    };
    let data = session.read(&path).await?;
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        data.to_vec(),
    )
        .into_response())
}

#[cfg(test)]
mod test {
    use super::*;
    use bytes::Bytes;
    use std::sync::Arc;

    async fn app() -> App {
        let store: Store = Arc::new(storage::MemoryBackend::new());
        kronoa::bootstrap(&store).await.unwrap();
        let mut session = kronoa::Session::checkout(store.clone(), "draft", kronoa::Source::Staging)
            .await
            .unwrap();
        session.write("articles/a.md", Bytes::from_static(b"# hi\n")).await.unwrap();
        session.submit("first").await.unwrap();
        let admin = kronoa::Session::staging(store.clone()).await.unwrap();
        admin.stage(session.edition()).await.unwrap();
        admin.deploy().await.unwrap();
        App::new(store)
    }

    #[tokio::test]
    async fn exists_and_list_bridge_the_store() {
        let app = app().await;
        let Json(exists) = storage_exists(
            State(app.clone()),
            Query(PathQuery {
                path: "contents/.production.json".to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(exists, serde_json::json!({ "exists": true }));

        let Json(keys) = storage_list(
            State(app),
            Query(ListQuery {
                prefix: "editions/".to_string(),
                delimiter: Some('/'),
            }),
        )
        .await
        .unwrap();
        assert!(keys.contains(&"editions/.head".to_string()));
        assert!(keys.contains(&"editions/10001/".to_string()));
    }

    #[tokio::test]
    async fn content_resolves_through_the_production_label() {
        let app = app().await;
        let response = content(
            State(app.clone()),
            Path(("production".to_string(), "articles/a.md".to_string())),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let missing = content(
            State(app),
            Path(("production".to_string(), "articles/nope.md".to_string())),
        )
        .await;
        match missing {
            Err(ApiError(status, _)) => assert_eq!(status, StatusCode::NOT_FOUND),
            Ok(_) => panic!("expected a 404"),
        }
    }
}
