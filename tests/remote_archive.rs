//! End-to-end archive cycles against an in-process reporting server.
//!
//! The stand-in server speaks the same HTTP paths as the real one, so these
//! tests exercise the reqwest client, zip extraction and the SQLite store
//! together.

use std::collections::HashMap;
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get};
use axum::{Json, Router};
use chrono::Utc;
use report_archiver::archiver::{CycleError, ReportsArchiver};
use report_archiver::config::ArchiverConfig;
use report_archiver::remote::{HttpReportClient, ReportClient};
use report_archiver::storage::{MetadataPersistency, SqliteMetadataStore};
use serde_json::{json, Value};

/// Execution id whose size endpoint never answers in time.
const SLOW_ID: u32 = 99;

#[derive(Default)]
struct RemoteServer {
    listing: Value,
    /// id -> (zip bytes, reported size)
    reports: HashMap<u32, (Vec<u8>, String)>,
    deletes: Mutex<Vec<(u32, String)>>,
}

fn report_zip(id: u32, files: &[(&str, usize)]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);
    for (name, size) in files {
        zip.start_file(format!("exec_{id}/{name}"), options).unwrap();
        zip.write_all(&vec![b'x'; *size]).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

async fn meta(State(s): State<Arc<RemoteServer>>) -> Json<Value> {
    Json(s.listing.clone())
}

async fn report(State(s): State<Arc<RemoteServer>>, UrlPath(id): UrlPath<u32>) -> Result<Bytes, StatusCode> {
    s.reports
        .get(&id)
        .map(|(zip, _)| Bytes::from(zip.clone()))
        .ok_or(StatusCode::NOT_FOUND)
}

async fn size(State(s): State<Arc<RemoteServer>>, UrlPath(id): UrlPath<u32>) -> Result<String, StatusCode> {
    if id == SLOW_ID {
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
    s.reports
        .get(&id)
        .map(|(_, size)| size.clone())
        .ok_or(StatusCode::NOT_FOUND)
}

async fn delete_execution(
    State(s): State<Arc<RemoteServer>>,
    UrlPath(id): UrlPath<u32>,
    Query(params): Query<HashMap<String, String>>,
) -> StatusCode {
    let from_elastic = params.get("fromElastic").cloned().unwrap_or_default();
    s.deletes.lock().unwrap().push((id, from_elastic));
    StatusCode::NO_CONTENT
}

async fn spawn_server(state: Arc<RemoteServer>) -> SocketAddr {
    let app = Router::new()
        .route("/reports/meta.json", get(meta))
        .route("/api/reports/{id}", get(report))
        .route("/api/reports/{id}/size", get(size))
        .route("/api/executions/{id}", delete(delete_execution))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn days_ago(days: i64) -> String {
    (Utc::now() - chrono::Duration::days(days)).format("%Y/%m/%d").to_string()
}

fn scenario(reported_size_of_2: &str) -> RemoteServer {
    RemoteServer {
        listing: json!({
            "1": {"id": 1, "date": days_ago(60), "active": true},
            "2": {"id": 2, "date": days_ago(40), "active": false, "numOfTests": 4},
            "3": {"id": 3, "date": days_ago(2), "active": false}
        }),
        reports: HashMap::from([
            (1, (report_zip(1, &[("index.html", 10)]), "10".to_string())),
            (
                2,
                (
                    report_zip(2, &[("index.html", 300), ("tests/test_1/test.js", 200)]),
                    reported_size_of_2.to_string(),
                ),
            ),
            (3, (report_zip(3, &[("index.html", 10)]), "10".to_string())),
            (SLOW_ID, (Vec::new(), "1".to_string())),
        ]),
        deletes: Mutex::new(Vec::new()),
    }
}

fn config(dir: &Path, addr: SocketAddr) -> ArchiverConfig {
    let mut cfg = ArchiverConfig::default();
    cfg.archiver.enabled = true;
    cfg.archiver.remote_server = format!("http://{addr}");
    cfg.archiver.min_reports_age_days = 30;
    cfg.archiver.max_to_archive = 5;
    cfg.archiver.delete_after_archive = true;
    cfg.archiver.delete_from_elastic = true;
    cfg.archiver.request_timeout_secs = 2;
    cfg.archiver.download_dir = Some(dir.join("downloads"));
    cfg.storage.docroot = dir.join("docRoot");
    cfg.storage.db_path = dir.join("data/meta.db");
    cfg
}

#[tokio::test]
async fn test_cycle_archives_old_finished_execution() {
    let server = Arc::new(scenario("500"));
    let addr = spawn_server(server.clone()).await;
    let dir = tempfile::TempDir::new().unwrap();
    let cfg = config(dir.path(), addr);
    let archiver = report_archiver::build_archiver(&cfg).unwrap();

    let report = archiver.run_cycle().await.unwrap().unwrap();

    assert_eq!(report.remote_executions, 3);
    assert_eq!(report.selected, vec![2]);
    assert_eq!(report.archived, vec![2]);

    let store = SqliteMetadataStore::open(&cfg.storage.db_path).unwrap();
    let stored = store.get_all().unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, 2);
    assert_eq!(stored[0].num_of_tests, 4);
    assert!(stored[0].dirty);

    let folder = cfg.reports_folder().join("exec_2");
    assert!(folder.join("tests/test_1/test.js").exists());
    assert!(!dir.path().join("downloads/exec_2.zip").exists());
    assert_eq!(
        *server.deletes.lock().unwrap(),
        vec![(2, "true".to_string())]
    );

    let history = archiver.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].archived_ids, vec![2]);
}

#[tokio::test]
async fn test_size_mismatch_leaves_no_trace() {
    let server = Arc::new(scenario("520"));
    let addr = spawn_server(server.clone()).await;
    let dir = tempfile::TempDir::new().unwrap();
    let cfg = config(dir.path(), addr);
    let archiver = report_archiver::build_archiver(&cfg).unwrap();

    let report = archiver.run_cycle().await.unwrap().unwrap();

    assert!(report.archived.is_empty());
    assert_eq!(report.failures.len(), 1);
    assert!(!cfg.reports_folder().join("exec_2").exists());
    assert!(!dir.path().join("downloads/exec_2.zip").exists());
    assert!(server.deletes.lock().unwrap().is_empty());

    let store = SqliteMetadataStore::open(&cfg.storage.db_path).unwrap();
    assert!(store.get_all().unwrap().is_empty());

    // The attempt is still recorded.
    assert_eq!(archiver.history()[0].archived_ids, vec![2]);
}

#[tokio::test]
async fn test_unreachable_server_aborts_cycle() {
    // Bind and immediately drop a listener to get a port nobody serves.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let dir = tempfile::TempDir::new().unwrap();
    let cfg = config(dir.path(), addr);
    let archiver: Arc<ReportsArchiver> = report_archiver::build_archiver(&cfg).unwrap();

    let err = archiver.run_cycle().await.unwrap_err();

    assert!(matches!(err, CycleError::RemoteListing(_)));
    assert!(archiver.history().is_empty());
    assert!(archiver.is_enabled());
}

#[tokio::test]
async fn test_client_reports_missing_and_slow_resources() {
    let server = Arc::new(scenario("500"));
    let addr = spawn_server(server).await;
    let dir = tempfile::TempDir::new().unwrap();
    let client = HttpReportClient::new(&format!("http://{addr}"), Duration::from_millis(300)).unwrap();

    assert_eq!(client.get_string("/api/reports/2/size").await.unwrap(), "500");
    assert!(client.get_string("/api/reports/42/size").await.is_err());
    assert!(client
        .get_file("/api/reports/42", dir.path(), "exec_42.zip")
        .await
        .is_err());
    assert!(!dir.path().join("exec_42.zip").exists());

    let slow = format!("/api/reports/{SLOW_ID}/size");
    assert!(client.get_string(&slow).await.is_err());
}

#[tokio::test]
async fn test_client_write_failure_returns_error() {
    let server = Arc::new(scenario("500"));
    let addr = spawn_server(server).await;
    let dir = tempfile::TempDir::new().unwrap();
    let client = HttpReportClient::new(&format!("http://{addr}"), Duration::from_secs(2)).unwrap();
    // A directory sitting where the zip should go makes the write fail.
    std::fs::create_dir_all(dir.path().join("exec_2.zip")).unwrap();

    let err = client
        .get_file("/api/reports/2", dir.path(), "exec_2.zip")
        .await
        .unwrap_err();

    assert!(format!("{err:#}").contains("Failed to write"));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}
