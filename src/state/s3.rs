//! S3-based snapshot storage backend.
//!
//! Stores the snapshot in an S3 bucket (or a compatible service) for shared
//! use across machines. The serial check is read-compare-write: good enough
//! for cooperating writers, not a substitute for a transactional store.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use crate::error::{Result, StateError, StratusError};

use super::store::{check_serial, stamped, SnapshotStore};
use super::types::Snapshot;

/// Snapshot object key suffix.
const SNAPSHOT_KEY: &str = "snapshot.json";

/// S3-based snapshot store.
#[derive(Debug)]
pub struct S3SnapshotStore {
    /// S3 client.
    client: Client,
    /// Bucket name.
    bucket: String,
    /// Key prefix.
    prefix: String,
}

impl S3SnapshotStore {
    /// Creates a new S3 snapshot store.
    ///
    /// # Errors
    ///
    /// Returns an error if the S3 client cannot be initialized.
    pub async fn new(bucket: &str, prefix: Option<&str>, region: Option<&str>) -> Result<Self> {
        let config = if let Some(region_str) = region {
            aws_config::from_env()
                .region(aws_config::Region::new(region_str.to_string()))
                .load()
                .await
        } else {
            aws_config::load_from_env().await
        };

        let client = Client::new(&config);
        Ok(Self::with_client(client, bucket, prefix))
    }

    /// Creates a new S3 snapshot store with an existing client.
    #[must_use]
    pub fn with_client(client: Client, bucket: &str, prefix: Option<&str>) -> Self {
        let prefix = prefix
            .map(|p| {
                let p = p.trim_matches('/');
                if p.is_empty() {
                    String::new()
                } else {
                    format!("{p}/")
                }
            })
            .unwrap_or_default();

        Self {
            client,
            bucket: bucket.to_string(),
            prefix,
        }
    }

    /// Gets the full S3 key for the snapshot object.
    fn key(&self) -> String {
        format!("{}{SNAPSHOT_KEY}", self.prefix)
    }

    /// Gets an object from S3.
    async fn get_object(&self, key: &str) -> Result<Option<String>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(response) => {
                let bytes = response.body.collect().await.map_err(|e| {
                    StratusError::State(StateError::backend(format!(
                        "Failed to read S3 object: {e}"
                    )))
                })?;

                let content = String::from_utf8(bytes.to_vec()).map_err(|e| {
                    StratusError::State(StateError::Corrupted {
                        message: format!("Invalid UTF-8 in S3 object: {e}"),
                    })
                })?;

                Ok(Some(content))
            }
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(StratusError::State(StateError::backend(format!(
                        "S3 get error: {service_err}"
                    ))))
                }
            }
        }
    }

    /// Puts an object to S3.
    async fn put_object(&self, key: &str, content: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(content.as_bytes().to_vec().into())
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| StratusError::State(StateError::backend(format!("S3 put error: {e}"))))?;

        Ok(())
    }

    /// Fetches and parses the stored snapshot, if any.
    async fn fetch_snapshot(&self) -> Result<Option<Snapshot>> {
        let Some(json) = self.get_object(&self.key()).await? else {
            return Ok(None);
        };

        let snapshot: Snapshot = serde_json::from_str(&json).map_err(|e| {
            StratusError::State(StateError::Corrupted {
                message: format!("Failed to parse snapshot: {e}"),
            })
        })?;

        Ok(Some(snapshot))
    }
}

#[async_trait]
impl SnapshotStore for S3SnapshotStore {
    async fn load(&self) -> Result<Option<Snapshot>> {
        debug!("Loading snapshot from s3://{}/{}", self.bucket, self.key());

        let snapshot = self.fetch_snapshot().await?;
        match &snapshot {
            Some(s) => info!(
                "Loaded snapshot serial {} for project: {}/{}",
                s.serial, s.project, s.environment
            ),
            None => debug!("No snapshot found in S3"),
        }
        Ok(snapshot)
    }

    async fn save(&self, snapshot: &Snapshot, expected_serial: u64) -> Result<u64> {
        let found = self.fetch_snapshot().await?.map_or(0, |s| s.serial);
        check_serial(expected_serial, found)?;

        let new_serial = expected_serial + 1;
        let content = serde_json::to_string_pretty(&stamped(snapshot, new_serial)).map_err(|e| {
            StratusError::State(StateError::serialization(format!(
                "Failed to serialize snapshot: {e}"
            )))
        })?;

        info!(
            "Saving snapshot serial {new_serial} to s3://{}/{}",
            self.bucket,
            self.key()
        );
        self.put_object(&self.key(), &content).await?;

        Ok(new_serial)
    }

    async fn delete(&self) -> Result<()> {
        let key = self.key();
        info!("Deleting snapshot from s3://{}/{key}", self.bucket);

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                StratusError::State(StateError::backend(format!("S3 delete error: {e}")))
            })?;

        Ok(())
    }

    async fn exists(&self) -> Result<bool> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.key())
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(StratusError::State(StateError::backend(format!(
                        "S3 head error: {service_err}"
                    ))))
                }
            }
        }
    }

    fn backend_type(&self) -> &'static str {
        "s3"
    }
}
