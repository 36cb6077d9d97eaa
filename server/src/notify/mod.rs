//! Outgoing notifications for gated detections.
//!
//! Sinks are synchronous: the pipeline calls them from its blocking thread.
//! `CloudNotifier` drives its async clients on the runtime through a
//! [`Handle`].

pub mod keys;
pub mod mint;
pub mod storage;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Local};
use fire_watch_common::frame::Detection;
use tokio::runtime::Handle;
use tracing::{info, warn};

use keys::{artifact_key, notification_timestamp};
use mint::MintClient;
use storage::{S3Storage, StorageError};

/// A detection that passed the gate, with the encoded frame it was seen in.
#[derive(Debug, Clone)]
pub struct Notification {
    pub label: String,
    pub confidence: f32,
    pub jpeg: Bytes,
    pub timestamp: String,
}

impl Notification {
    pub fn new(detection: &Detection, jpeg: Bytes, at: DateTime<Local>) -> Self {
        Self {
            label: detection.label.clone(),
            confidence: detection.confidence,
            jpeg,
            timestamp: notification_timestamp(&at),
        }
    }
}

pub trait NotificationSink: Send + Sync {
    /// Persist and deliver one notification, returning the stored artifact
    /// reference. Not retried.
    fn notify(&self, notification: &Notification) -> Result<String, NotifyError>;
}

/// Uploads the snapshot to object storage, then tells the mint endpoint
/// where it lives.
pub struct CloudNotifier {
    storage: Arc<S3Storage>,
    mint: MintClient,
    prefix: String,
    archive_dir: Option<PathBuf>,
    runtime: Handle,
}

impl CloudNotifier {
    pub fn new(
        storage: Arc<S3Storage>,
        mint: MintClient,
        prefix: String,
        archive_dir: Option<PathBuf>,
        runtime: Handle,
    ) -> Self {
        Self {
            storage,
            mint,
            prefix,
            archive_dir,
            runtime,
        }
    }
}

impl NotificationSink for CloudNotifier {
    fn notify(&self, notification: &Notification) -> Result<String, NotifyError> {
        let key = artifact_key(&self.prefix, &notification.timestamp, &notification.label);

        if let Some(dir) = &self.archive_dir {
            if let Err(e) = archive_copy(dir, &key, &notification.jpeg) {
                warn!(dir = %dir.display(), key, error = %e, "failed to keep local copy");
            }
        }

        let url = self.runtime.block_on(async {
            let url = self
                .storage
                .put_jpeg(&key, notification.jpeg.to_vec())
                .await?;
            self.mint.submit(&url).await?;
            Ok::<_, NotifyError>(url)
        })?;

        info!(
            label = notification.label,
            confidence = notification.confidence,
            url,
            bucket = self.storage.bucket(),
            endpoint = self.mint.endpoint(),
            "notification delivered"
        );
        Ok(url)
    }
}

/// Logs notifications without delivering them. Used when notifications
/// are disabled in the config.
pub struct LogNotifier {
    prefix: String,
}

impl LogNotifier {
    pub fn new(prefix: String) -> Self {
        Self { prefix }
    }
}

impl NotificationSink for LogNotifier {
    fn notify(&self, notification: &Notification) -> Result<String, NotifyError> {
        let key = artifact_key(&self.prefix, &notification.timestamp, &notification.label);
        info!(
            label = notification.label,
            confidence = notification.confidence,
            bytes = notification.jpeg.len(),
            key,
            "notification (delivery disabled)"
        );
        Ok(format!("log://{key}"))
    }
}

fn archive_copy(dir: &Path, key: &str, jpeg: &[u8]) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let file_name = key.rsplit('/').next().unwrap_or(key);
    let path = dir.join(file_name);
    std::fs::write(&path, jpeg)?;
    Ok(path)
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("notification request failed: {0}")]
    Http(reqwest::Error),
    #[error("notification endpoint returned HTTP {0}")]
    Status(u16),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use axum::extract::State;
    use axum::http::{Method, StatusCode, Uri};
    use axum::Router;
    use chrono::TimeZone;
    use fire_watch_common::config::StorageConfig;

    type Requests = Arc<Mutex<Vec<String>>>;

    /// Accepts any S3 request with 200 and records `METHOD /path`.
    async fn fake_s3() -> (String, Requests) {
        let requests: Requests = Arc::default();
        let app = Router::new()
            .fallback(
                |State(requests): State<Requests>, method: Method, uri: Uri| async move {
                    requests
                        .lock()
                        .unwrap()
                        .push(format!("{method} {}", uri.path()));
                    StatusCode::OK
                },
            )
            .with_state(requests.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), requests)
    }

    async fn closed_endpoint() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{addr}")
    }

    fn storage_config(endpoint: &str, archive_dir: Option<String>) -> StorageConfig {
        StorageConfig {
            bucket: "alerts".into(),
            region: "us-east-1".into(),
            prefix: "images/".into(),
            endpoint: Some(endpoint.to_string()),
            access_key: Some("test".into()),
            secret_key: Some("test-secret".into()),
            public_base_url: Some(endpoint.to_string()),
            archive_dir,
            verify_on_startup: false,
            require_credentials: true,
        }
    }

    async fn notifier(storage_endpoint: &str, mint_endpoint: &str, archive: Option<&Path>) -> CloudNotifier {
        let config = storage_config(
            storage_endpoint,
            archive.map(|p| p.display().to_string()),
        );
        let storage = Arc::new(S3Storage::new(&config).await);
        let mint = MintClient::new(mint_endpoint, Duration::from_secs(5)).unwrap();
        CloudNotifier::new(
            storage,
            mint,
            config.prefix.clone(),
            archive.map(Path::to_path_buf),
            Handle::current(),
        )
    }

    fn fire_notification() -> Notification {
        let at = Local.with_ymd_and_hms(2026, 2, 18, 9, 30, 0).unwrap();
        Notification::new(
            &Detection::new("fire", 0.91, 0),
            Bytes::from_static(b"\xFF\xD8jpeg\xFF\xD9"),
            at,
        )
    }

    async fn notify_blocking(
        notifier: CloudNotifier,
        notification: Notification,
    ) -> Result<String, NotifyError> {
        tokio::task::spawn_blocking(move || notifier.notify(&notification))
            .await
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upload_then_mint() {
        let (s3, uploads) = fake_s3().await;
        let (mint, received) = mint::tests::serve(StatusCode::OK).await;
        let archive = tempfile::tempdir().unwrap();
        let notifier = notifier(&s3, &mint, Some(archive.path())).await;

        let url = notify_blocking(notifier, fire_notification()).await.unwrap();

        let key = "images/02-18-2026_09-30-00-000000_fire.jpg";
        assert_eq!(url, format!("{s3}/alerts/{key}"));
        assert_eq!(
            uploads.lock().unwrap().as_slice(),
            [format!("PUT /alerts/{key}")]
        );
        assert_eq!(
            received.lock().unwrap().as_slice(),
            [serde_json::json!({ "nftUri": url })]
        );
        let copy = archive.path().join("02-18-2026_09-30-00-000000_fire.jpg");
        assert_eq!(std::fs::read(copy).unwrap(), b"\xFF\xD8jpeg\xFF\xD9");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn storage_failure_skips_the_mint_request() {
        let s3 = closed_endpoint().await;
        let (mint, received) = mint::tests::serve(StatusCode::OK).await;
        let notifier = notifier(&s3, &mint, None).await;

        let result = notify_blocking(notifier, fire_notification()).await;

        assert!(matches!(result, Err(NotifyError::Storage(_))), "{result:?}");
        assert!(received.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn mint_rejection_is_reported_after_upload() {
        let (s3, uploads) = fake_s3().await;
        let (mint, received) = mint::tests::serve(StatusCode::INTERNAL_SERVER_ERROR).await;
        let notifier = notifier(&s3, &mint, None).await;

        let result = notify_blocking(notifier, fire_notification()).await;

        assert!(matches!(result, Err(NotifyError::Status(500))), "{result:?}");
        assert_eq!(uploads.lock().unwrap().len(), 1);
        assert_eq!(received.lock().unwrap().len(), 1);
    }

    #[test]
    fn notification_copies_detection_fields() {
        let at = Local.with_ymd_and_hms(2026, 2, 18, 9, 30, 0).unwrap();
        let detection = Detection::new("fire", 0.93, 0);
        let n = Notification::new(&detection, Bytes::from_static(b"jpeg"), at);
        assert_eq!(n.label, "fire");
        assert_eq!(n.confidence, 0.93);
        assert_eq!(n.timestamp, "02-18-2026_09-30-00-000000");
        assert_eq!(&n.jpeg[..], b"jpeg");
    }

    #[test]
    fn log_notifier_returns_key_reference() {
        let at = Local.with_ymd_and_hms(2026, 2, 18, 9, 30, 0).unwrap();
        let n = Notification::new(&Detection::new("smoke", 0.8, 1), Bytes::new(), at);
        let reference = LogNotifier::new("images/".into()).notify(&n).unwrap();
        assert_eq!(reference, "log://images/02-18-2026_09-30-00-000000_smoke.jpg");
    }

    #[test]
    fn archive_copy_writes_file_named_after_key() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("images");
        let path = archive_copy(&target, "images/ts_fire.jpg", b"\xFF\xD8data").unwrap();
        assert_eq!(path, target.join("ts_fire.jpg"));
        assert_eq!(std::fs::read(path).unwrap(), b"\xFF\xD8data");
    }
}
