use std::sync::Arc;

use chrono::NaiveDate;
use glucoread::ConnectionStatus;
use glucoread::Reading;
use glucoread::ReadingStore;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::watch;

async fn get(addr: std::net::SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

#[tokio::test]
async fn test_serve_api_data() {
    let store = Arc::new(ReadingStore::default());
    store.set_status(ConnectionStatus::Scanning);
    let timestamp = NaiveDate::from_ymd_opt(2024, 3, 15)
        .unwrap()
        .and_hms_opt(8, 30, 0)
        .unwrap();
    store.commit_reading(Reading::from_mgdl(timestamp, 104));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, shutdown) = watch::channel(false);
    let server = tokio::spawn(glucoread::http::serve(listener, store.clone(), shutdown));

    let response = get(addr, "/api/data").await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    let body = response.split("\r\n\r\n").nth(1).unwrap();
    let json: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(
        json,
        serde_json::json!({
            "status": "Scanning...",
            "readings": [{"timestamp": "2024-03-15 08:30:00", "mgdl": 104, "mmol": 5.8}],
        })
    );

    let page = get(addr, "/").await;
    assert!(page.contains("text/html"), "{page}");

    stop.send(true).unwrap();
    server.await.unwrap().unwrap();
}
