//! Read-only HTTP view of the reading store.
//!
//! - `GET /` serves the dashboard page
//! - `GET /api/data` returns the current [`Snapshot`] as JSON

use std::sync::Arc;

use axum::extract::State;
use axum::response::Html;
use axum::routing::get;
use axum::Json;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::acquisition::shutdown_requested;
use crate::reading_store::ReadingStore;
use crate::reading_store::Snapshot;

const INDEX_HTML: &str = include_str!("../assets/index.html");

pub fn router(store: Arc<ReadingStore>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/data", get(api_data))
        .with_state(store)
}

/// Serve until `shutdown` turns `true`.
pub async fn serve(
    listener: TcpListener,
    store: Arc<ReadingStore>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Server listening on http://{addr}");
    }
    axum::serve(listener, router(store))
        .with_graceful_shutdown(async move { shutdown_requested(&mut shutdown).await })
        .await
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn api_data(State(store): State<Arc<ReadingStore>>) -> Json<Snapshot> {
    Json(store.snapshot())
}

#[tokio::test]
async fn test_api_data_is_snapshot() {
    use crate::reading_store::ConnectionStatus;

    let store = Arc::new(ReadingStore::default());
    store.set_status(ConnectionStatus::WaitingForData);
    let Json(snapshot) = api_data(State(store.clone())).await;
    assert_eq!(snapshot, store.snapshot());
}

#[tokio::test]
async fn test_index_polls_api() {
    let Html(page) = index().await;
    assert!(page.contains("/api/data"));
}
