//! End-to-end backups against an in-process change-tracking service.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::stream;
use rct_backup::executor::tracking;
use rct_backup::remote::http::{HttpDiskService, TrustPolicy};
use rct_backup::remote::{ChangeTrackingStatus, DiskInfo, RangeRequest};
use rct_backup::{BackupError, BackupRequest, BackupRunner, ChangeDescriptor, Stage};
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const AUTH_KEY: &str = "test-key";

struct FakeDisk {
    name: String,
    data: Vec<u8>,
    changes: Vec<ChangeDescriptor>,
    enabled: Mutex<bool>,
    chunk_size: usize,
    truncate_by: usize,
    requests: Mutex<Vec<String>>,
}

type Shared = Arc<FakeDisk>;

#[derive(Deserialize)]
struct EnabledQuery {
    enabled: bool,
}

#[derive(Deserialize)]
struct ContentQuery {
    offset: u64,
    length: u64,
}

fn check(disk: &FakeDisk, headers: &HeaderMap, path: &str) -> Result<(), Response> {
    if headers.get("auth_key").and_then(|v| v.to_str().ok()) != Some(AUTH_KEY) {
        return Err(StatusCode::UNAUTHORIZED.into_response());
    }
    if path != disk.name {
        return Err((StatusCode::NOT_FOUND, format!("Bad vdisk path: {}", path)).into_response());
    }
    Ok(())
}

fn content_body(disk: &FakeDisk, ranges: &[ChangeDescriptor]) -> Response {
    let mut body = Vec::new();
    for r in ranges {
        body.extend_from_slice(&disk.data[r.offset as usize..(r.offset + r.length) as usize]);
    }
    body.truncate(body.len().saturating_sub(disk.truncate_by));

    let chunks: Vec<Result<Vec<u8>, std::io::Error>> =
        body.chunks(disk.chunk_size).map(|c| Ok(c.to_vec())).collect();
    Body::from_stream(stream::iter(chunks)).into_response()
}

async fn disk_info(
    State(disk): State<Shared>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Result<Json<DiskInfo>, Response> {
    check(&disk, &headers, &path)?;
    Ok(Json(DiskInfo {
        virtual_size: disk.data.len() as u64,
        parent_path: None,
    }))
}

async fn get_rct(
    State(disk): State<Shared>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ChangeTrackingStatus>, Response> {
    check(&disk, &headers, &path)?;
    Ok(Json(ChangeTrackingStatus {
        enabled: *disk.enabled.lock().unwrap(),
        newer_changes: false,
        most_recent_id: "rct-2".to_string(),
    }))
}

async fn set_rct(
    State(disk): State<Shared>,
    Path(path): Path<String>,
    Query(query): Query<EnabledQuery>,
    headers: HeaderMap,
) -> Result<StatusCode, Response> {
    check(&disk, &headers, &path)?;
    *disk.enabled.lock().unwrap() = query.enabled;
    Ok(StatusCode::OK)
}

async fn get_changes(
    State(disk): State<Shared>,
    Path((path, rct_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<Vec<ChangeDescriptor>>, Response> {
    check(&disk, &headers, &path)?;
    disk.requests.lock().unwrap().push(format!("changes {}", rct_id));
    Ok(Json(disk.changes.clone()))
}

async fn get_content(
    State(disk): State<Shared>,
    Path(path): Path<String>,
    Query(query): Query<ContentQuery>,
    headers: HeaderMap,
) -> Result<Response, Response> {
    check(&disk, &headers, &path)?;
    disk.requests
        .lock()
        .unwrap()
        .push(format!("GET content {}+{}", query.offset, query.length));
    Ok(content_body(&disk, &[ChangeDescriptor::new(query.offset, query.length)]))
}

async fn post_content(
    State(disk): State<Shared>,
    Path(path): Path<String>,
    headers: HeaderMap,
    Json(request): Json<RangeRequest>,
) -> Result<Response, Response> {
    check(&disk, &headers, &path)?;
    disk.requests
        .lock()
        .unwrap()
        .push(format!("POST content {}", request.ranges.len()));
    Ok(content_body(&disk, &request.ranges))
}

struct Harness {
    disk: Shared,
    base_url: String,
}

impl Harness {
    async fn start(name: &str, size: usize, changes: Vec<ChangeDescriptor>) -> Self {
        Self::start_with(name, size, changes, 5, 0).await
    }

    async fn start_with(
        name: &str,
        size: usize,
        changes: Vec<ChangeDescriptor>,
        chunk_size: usize,
        truncate_by: usize,
    ) -> Self {
        let disk = Arc::new(FakeDisk {
            name: name.to_string(),
            data: (0..size).map(|i| (i % 253 + 1) as u8).collect(),
            changes,
            enabled: Mutex::new(true),
            chunk_size,
            truncate_by,
            requests: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/vdisk/{path}/info", get(disk_info))
            .route("/vdisk/{path}/rct", get(get_rct).put(set_rct))
            .route("/vdisk/{path}/rct/{rct_id}/changes", get(get_changes))
            .route("/vdisk/{path}/content", get(get_content).post(post_content))
            .with_state(disk.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            disk,
            base_url: format!("http://{}", addr),
        }
    }

    fn service(&self, auth_key: &str) -> HttpDiskService {
        HttpDiskService::new(
            &self.base_url,
            auth_key,
            &TrustPolicy::System,
            Some(Duration::from_secs(10)),
        )
        .unwrap()
    }

    fn requests(&self) -> Vec<String> {
        self.disk.requests.lock().unwrap().clone()
    }
}

fn ranges(pairs: &[(u64, u64)]) -> Vec<ChangeDescriptor> {
    pairs.iter()
        .map(|&(offset, length)| ChangeDescriptor::new(offset, length))
        .collect()
}

fn request(dir: &TempDir, disk: &str) -> BackupRequest {
    BackupRequest {
        disk_path: disk.to_string(),
        checkpoint_id: None,
        local_path: dir.path().join("disk.raw"),
        preserve_existing: false,
    }
}

fn assert_image(local: &[u8], source: &[u8], changes: &[ChangeDescriptor]) {
    assert_eq!(local.len(), source.len());
    for (i, (&got, &want)) in local.iter().zip(source).enumerate() {
        let i = i as u64;
        if changes.iter().any(|c| i >= c.offset && i < c.offset + c.length) {
            assert_eq!(got, want, "byte {} should match the source", i);
        } else {
            assert_eq!(got, 0, "byte {} should be zero", i);
        }
    }
}

#[tokio::test]
async fn test_multi_range_batch_over_http() {
    let changes = ranges(&[(0, 10), (50, 20)]);
    let harness = Harness::start("disk0.vhdx", 100, changes.clone()).await;
    let dir = TempDir::new().unwrap();
    let runner = BackupRunner::new(harness.service(AUTH_KEY), 100);

    let report = runner.run(&request(&dir, "disk0.vhdx")).await.unwrap();

    assert_eq!(report.batches, 1);
    assert_eq!(report.bytes_transferred, 30);
    assert_eq!(report.checkpoint_id, "rct-2");
    assert_eq!(harness.requests(), vec!["changes rct-2", "POST content 2"]);

    let local = std::fs::read(dir.path().join("disk.raw")).unwrap();
    assert_image(&local, &harness.disk.data, &changes);
}

#[tokio::test]
async fn test_one_request_per_range_over_http() {
    let changes = ranges(&[(0, 10), (50, 20)]);
    let harness = Harness::start("disk0.vhdx", 100, changes.clone()).await;
    let dir = TempDir::new().unwrap();
    let runner = BackupRunner::new(harness.service(AUTH_KEY), 5);

    let mut req = request(&dir, "disk0.vhdx");
    req.checkpoint_id = Some("rct-1".to_string());
    let report = runner.run(&req).await.unwrap();

    assert_eq!(report.batches, 2);
    assert_eq!(
        harness.requests(),
        vec!["changes rct-1", "GET content 0+10", "GET content 50+20"]
    );

    let local = std::fs::read(dir.path().join("disk.raw")).unwrap();
    assert_image(&local, &harness.disk.data, &changes);
}

#[tokio::test]
async fn test_disk_path_with_separators() {
    let changes = ranges(&[(3, 4)]);
    let harness = Harness::start("vms/disk1.vhdx", 16, changes.clone()).await;
    let dir = TempDir::new().unwrap();
    let runner = BackupRunner::new(harness.service(AUTH_KEY), 0);

    runner.run(&request(&dir, "vms/disk1.vhdx")).await.unwrap();

    let local = std::fs::read(dir.path().join("disk.raw")).unwrap();
    assert_image(&local, &harness.disk.data, &changes);
}

#[tokio::test]
async fn test_truncated_body_is_transfer_fault() {
    let changes = ranges(&[(0, 10), (50, 20)]);
    let harness = Harness::start_with("disk0.vhdx", 100, changes, 4, 6).await;
    let dir = TempDir::new().unwrap();
    let runner = BackupRunner::new(harness.service(AUTH_KEY), 100);

    let err = runner.run(&request(&dir, "disk0.vhdx")).await.unwrap_err();

    assert_eq!(err.stage(), Some(Stage::Batch { index: 1, total: 1 }));
    assert!(matches!(
        err.root(),
        BackupError::ShortStream {
            expected: 30,
            received: 24,
            range_index: 1
        }
    ));
}

#[tokio::test]
async fn test_bad_auth_key_is_remote_fault() {
    let harness = Harness::start("disk0.vhdx", 100, Vec::new()).await;
    let dir = TempDir::new().unwrap();
    let req = request(&dir, "disk0.vhdx");
    let runner = BackupRunner::new(harness.service("wrong"), 100);

    let err = runner.run(&req).await.unwrap_err();

    assert_eq!(err.stage(), Some(Stage::DiskInfo));
    assert!(matches!(err.root(), BackupError::Remote { status: 401, .. }));
    assert!(!req.local_path.exists());
}

#[tokio::test]
async fn test_unknown_disk_is_not_found() {
    let harness = Harness::start("disk0.vhdx", 100, Vec::new()).await;
    let service = harness.service(AUTH_KEY);

    let err = tracking::show_status(&service, "other.vhdx").await.unwrap_err();

    match err.root() {
        BackupError::Remote { status, message } => {
            assert_eq!(*status, 404);
            assert_eq!(message, "Bad vdisk path: other.vhdx");
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_toggle_tracking_then_backup_refused() {
    let harness = Harness::start("disk0.vhdx", 100, ranges(&[(0, 10)])).await;
    let service = harness.service(AUTH_KEY);

    let status = tracking::set_change_tracking(&service, "disk0.vhdx", false)
        .await
        .unwrap();
    assert!(!status.enabled);

    let dir = TempDir::new().unwrap();
    let req = request(&dir, "disk0.vhdx");
    let runner = BackupRunner::new(service, 100);
    let err = runner.run(&req).await.unwrap_err();
    assert!(matches!(err, BackupError::ChangeTrackingDisabled { .. }));
    assert!(!req.local_path.exists());

    let status = tracking::set_change_tracking(runner.service(), "disk0.vhdx", true)
        .await
        .unwrap();
    assert!(status.enabled);
}
