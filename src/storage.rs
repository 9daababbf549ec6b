use aws_config::{defaults, BehaviorVersion};
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    error::{ProvideErrorMetadata, SdkError},
    presigning::PresigningConfig,
    Client,
};
use aws_smithy_types::byte_stream::ByteStream;
use axum::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Object-storage failure, tagged at the point where the SDK error is first
/// seen so callers can decide whether to retry without inspecting messages.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Bad input (unsupported content type, invalid key, bad presign TTL).
    #[error("invalid storage request: {0}")]
    Validation(String),
    /// Misconfiguration: missing bucket, rejected credentials. Retrying
    /// cannot help.
    #[error("permanent storage failure: {0}")]
    Permanent(String),
    /// Network-level failure: timeout, connection refused, truncated
    /// response.
    #[error("transient storage failure: {0}")]
    Transient(String),
    #[error("storage failure: {0}")]
    Unknown(String),
}

impl StorageError {
    pub fn is_retryable(&self) -> bool {
        // Unclassified errors are treated as retryable.
        matches!(self, StorageError::Transient(_) | StorageError::Unknown(_))
    }
}

fn classify_sdk_error<E>(op: &'static str, err: &SdkError<E>) -> StorageError
where
    E: ProvideErrorMetadata,
{
    match err {
        SdkError::ConstructionFailure(_) => {
            StorageError::Permanent(format!("{op}: request construction failed"))
        }
        SdkError::TimeoutError(_) => StorageError::Transient(format!("{op}: request timed out")),
        SdkError::DispatchFailure(_) => {
            StorageError::Transient(format!("{op}: could not reach storage endpoint"))
        }
        SdkError::ResponseError(_) => {
            StorageError::Transient(format!("{op}: malformed response from storage"))
        }
        SdkError::ServiceError(ctx) => {
            let code = ctx.err().code().unwrap_or("unknown");
            let message = ctx.err().message().unwrap_or("no message");
            match code {
                "NoSuchBucket" | "AccessDenied" | "InvalidAccessKeyId"
                | "SignatureDoesNotMatch" => {
                    StorageError::Permanent(format!("{op}: {code}: {message}"))
                }
                "SlowDown" | "InternalError" | "ServiceUnavailable" | "RequestTimeout" => {
                    StorageError::Transient(format!("{op}: {code}: {message}"))
                }
                _ => StorageError::Unknown(format!("{op}: {code}: {message}")),
            }
        }
        _ => StorageError::Unknown(format!("{op}: unrecognized sdk error")),
    }
}

#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError>;
    async fn delete_object(&self, key: &str) -> Result<(), StorageError>;
    async fn presign_get(&self, key: &str, seconds: u64) -> Result<String, StorageError>;
}

#[derive(Clone)]
pub struct Storage {
    client: Client,
    bucket: String,
}

impl Storage {
    pub async fn new(
        endpoint: &str,
        bucket: &str,
        access_key: &str,
        secret_key: &str,
        region: &str,
    ) -> anyhow::Result<Self> {
        let shared = defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(Credentials::new(
                access_key, secret_key, None, None, "static",
            ))
            .endpoint_url(endpoint)
            .load()
            .await;

        let conf = S3ConfigBuilder::from(&shared)
            .endpoint_url(endpoint)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(conf),
            bucket: bucket.to_string(),
        })
    }
}

#[async_trait]
impl StorageClient for Storage {
    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| classify_sdk_error("put_object", &e))?;
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify_sdk_error("delete_object", &e))?;
        Ok(())
    }

    async fn presign_get(&self, key: &str, seconds: u64) -> Result<String, StorageError> {
        let presigning = PresigningConfig::expires_in(std::time::Duration::from_secs(seconds))
            .map_err(|e| StorageError::Validation(format!("presign ttl: {e}")))?;
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| classify_sdk_error("presign_get", &e))?;
        Ok(presigned.uri().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(StorageError::Transient("timeout".into()).is_retryable());
        assert!(StorageError::Unknown("???".into()).is_retryable());
        assert!(!StorageError::Permanent("NoSuchBucket".into()).is_retryable());
        assert!(!StorageError::Validation("bad mime".into()).is_retryable());
    }
}
