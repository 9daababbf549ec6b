//! Image upload pipeline.
//!
//! Uploads go through [`retry_with_backoff`]: transient storage failures are
//! retried per file, terminal ones (bad content type, missing bucket) fail
//! immediately. Each file gets its own backoff state and its own outcome so
//! handlers can answer with a partial result instead of all-or-nothing.

use bytes::Bytes;
use tracing::warn;
use uuid::Uuid;

use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::state::AppState;
use crate::storage::StorageError;

pub struct UploadItem {
    pub body: Bytes,
    pub content_type: String,
}

#[derive(Debug)]
pub enum FileOutcome {
    Stored { key: String, attempts: u32 },
    Failed { error: String, attempts: u32 },
}

#[derive(Debug)]
pub struct UploadReport {
    pub outcomes: Vec<FileOutcome>,
}

impl UploadReport {
    pub fn stored_keys(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                FileOutcome::Stored { key, .. } => Some(key.clone()),
                FileOutcome::Failed { .. } => None,
            })
            .collect()
    }

    pub fn stored_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, FileOutcome::Stored { .. }))
            .count()
    }

    pub fn all_failed(&self) -> bool {
        !self.outcomes.is_empty() && self.stored_count() == 0
    }
}

/// Upload every item under `prefix`, one retry loop per file. Never fails as
/// a whole; inspect the report.
pub async fn upload_many(
    st: &AppState,
    prefix: &str,
    items: Vec<UploadItem>,
    policy: &RetryPolicy,
) -> UploadReport {
    let mut outcomes = Vec::with_capacity(items.len());

    for item in items {
        let Some(ext) = ext_from_mime(&item.content_type) else {
            warn!(content_type = %item.content_type, "rejected upload with unsupported type");
            outcomes.push(FileOutcome::Failed {
                error: StorageError::Validation(format!(
                    "unsupported content type {}",
                    item.content_type
                ))
                .to_string(),
                attempts: 1,
            });
            continue;
        };

        let key = format!("{}/{}.{}", prefix, Uuid::new_v4(), ext);
        let body = item.body.clone();
        let content_type = item.content_type.clone();

        let report = retry_with_backoff(
            policy,
            || st.storage.put_object(&key, body.clone(), &content_type),
            StorageError::is_retryable,
            None,
            "put_object",
        )
        .await;

        outcomes.push(match report.result {
            Ok(()) => FileOutcome::Stored {
                key: key.clone(),
                attempts: report.attempts,
            },
            Err(e) => FileOutcome::Failed {
                error: e.to_string(),
                attempts: report.attempts,
            },
        });
    }

    UploadReport { outcomes }
}

pub async fn presign_many(
    st: &AppState,
    keys: Vec<String>,
    expires_seconds: u64,
) -> Result<Vec<String>, StorageError> {
    let mut out = Vec::with_capacity(keys.len());
    for k in keys {
        out.push(st.storage.presign_get(&k, expires_seconds).await?);
    }
    Ok(out)
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn instant_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn ext_from_mime_known_and_unknown() {
        assert_eq!(ext_from_mime("image/jpeg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/png"), Some("png"));
        assert_eq!(ext_from_mime("image/webp"), Some("webp"));
        assert_eq!(ext_from_mime("application/octet-stream"), None);
    }

    #[tokio::test]
    async fn upload_many_stores_supported_files() {
        let state = AppState::fake();
        let items = vec![
            UploadItem {
                body: Bytes::from_static(b"jpg bytes"),
                content_type: "image/jpeg".into(),
            },
            UploadItem {
                body: Bytes::from_static(b"png bytes"),
                content_type: "image/png".into(),
            },
        ];

        let report = upload_many(&state, "pages/test", items, &instant_policy()).await;
        assert_eq!(report.stored_count(), 2);
        assert!(!report.all_failed());
        let keys = report.stored_keys();
        assert!(keys[0].starts_with("pages/test/") && keys[0].ends_with(".jpg"));
        assert!(keys[1].ends_with(".png"));
    }

    #[tokio::test]
    async fn unsupported_type_fails_without_retry() {
        let state = AppState::fake();
        let items = vec![UploadItem {
            body: Bytes::from_static(b"???"),
            content_type: "video/mp4".into(),
        }];

        let report = upload_many(&state, "pages/test", items, &instant_policy()).await;
        assert!(report.all_failed());
        match &report.outcomes[0] {
            FileOutcome::Failed { error, attempts } => {
                assert_eq!(*attempts, 1);
                assert!(error.contains("video/mp4"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn partial_failure_is_reported_per_file() {
        use crate::storage::StorageClient;
        use axum::async_trait;
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        // Fails every put for .png content, succeeds otherwise.
        struct FlakyStorage {
            puts: AtomicU32,
        }
        #[async_trait]
        impl StorageClient for FlakyStorage {
            async fn put_object(
                &self,
                _k: &str,
                _b: Bytes,
                ct: &str,
            ) -> Result<(), StorageError> {
                self.puts.fetch_add(1, Ordering::SeqCst);
                if ct == "image/png" {
                    Err(StorageError::Transient("connection reset".into()))
                } else {
                    Ok(())
                }
            }
            async fn delete_object(&self, _k: &str) -> Result<(), StorageError> {
                Ok(())
            }
            async fn presign_get(&self, k: &str, _s: u64) -> Result<String, StorageError> {
                Ok(k.to_string())
            }
        }

        let fake = AppState::fake();
        let storage = Arc::new(FlakyStorage {
            puts: AtomicU32::new(0),
        });
        let state = AppState::from_parts(fake.db.clone(), fake.config.clone(), storage.clone());

        let items = vec![
            UploadItem {
                body: Bytes::from_static(b"ok"),
                content_type: "image/jpeg".into(),
            },
            UploadItem {
                body: Bytes::from_static(b"always fails"),
                content_type: "image/png".into(),
            },
        ];

        let report = upload_many(&state, "samples/x", items, &instant_policy()).await;
        assert_eq!(report.stored_count(), 1);
        assert!(!report.all_failed());
        match &report.outcomes[1] {
            FileOutcome::Failed { attempts, .. } => assert_eq!(*attempts, 3),
            other => panic!("expected failure, got {other:?}"),
        }
        // 1 successful put + 3 attempts for the transient failure.
        assert_eq!(storage.puts.load(Ordering::SeqCst), 4);
    }
}
