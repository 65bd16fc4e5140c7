//! Object store facade for the bronze layer and for universe reads.
//!
//! Bronze keys are deterministic, so writing the same (symbol, month) twice
//! overwrites the previous object with identical content.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use crate::errors::StorageError;
use crate::models::{Config, YearMonth};

const SOURCE: &str = "alpha_vantage";

/// Bronze key for one month of 1-minute bars.
///
/// `<prefix>/alpha_vantage/intraday_1min/symbol=<SYMBOL>/month=<YYYY-MM>/raw.json`
pub fn intraday_key(prefix: &str, symbol: &str, month: YearMonth) -> String {
    join_key(
        prefix,
        &[
            SOURCE,
            "intraday_1min",
            &format!("symbol={symbol}"),
            &format!("month={month}"),
            "raw.json",
        ],
    )
}

/// Timestamped key for a monthly adjusted snapshot.
pub fn monthly_adjusted_key(prefix: &str, symbol: &str, at: DateTime<Utc>) -> String {
    join_key(
        prefix,
        &[
            SOURCE,
            "monthly_adjusted",
            &format!("symbol={symbol}"),
            &format!("raw_{}.json", file_timestamp(at)),
        ],
    )
}

/// Timestamped key for a symbol search snapshot.
pub fn symbol_search_key(prefix: &str, keywords: &str, at: DateTime<Utc>) -> String {
    join_key(
        prefix,
        &[
            SOURCE,
            "symbol_search",
            &format!("keywords={keywords}"),
            &format!("raw_{}.json", file_timestamp(at)),
        ],
    )
}

fn file_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339().replace(':', "-")
}

fn join_key(prefix: &str, parts: &[&str]) -> String {
    let prefix = prefix.trim_matches('/');
    let tail = parts.join("/");
    if prefix.is_empty() {
        tail
    } else {
        format!("{prefix}/{tail}")
    }
}

/// Writes raw upstream payloads into the bronze layer.
#[derive(Clone)]
pub struct BronzeStore {
    store: Arc<dyn ObjectStore>,
    location: String,
    prefix: String,
}

impl BronzeStore {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        location: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            location: location.into(),
            prefix: prefix.into(),
        }
    }

    /// Local directory when `BRONZE_LOCAL_DIR` is set, S3 bucket otherwise.
    pub fn from_config(config: &Config) -> Result<Self, StorageError> {
        if let Some(dir) = &config.bronze_local_dir {
            std::fs::create_dir_all(dir)?;
            let store = LocalFileSystem::new_with_prefix(dir)?;
            info!("🗂️  Bronze store: local directory {}", dir.display());
            return Ok(Self::new(Arc::new(store), dir.display().to_string(), &config.bronze_prefix));
        }

        let bucket = config
            .bronze_bucket
            .as_deref()
            .ok_or_else(|| StorageError::NotConfigured("S3_BRONZE_BUCKET not set".into()))?;
        let store = AmazonS3Builder::from_env().with_bucket_name(bucket).build()?;
        info!("🪣 Bronze store: s3://{}/{}", bucket, config.bronze_prefix);
        Ok(Self::new(Arc::new(store), format!("s3://{bucket}"), &config.bronze_prefix))
    }

    /// In-memory store, handy for dry runs and tests.
    pub fn in_memory(prefix: impl Into<String>) -> Self {
        Self::new(Arc::new(InMemory::new()), "memory://", prefix)
    }

    pub fn object_store(&self) -> Arc<dyn ObjectStore> {
        self.store.clone()
    }

    /// Overwrite the intraday object for (symbol, month). Returns its URI.
    pub async fn put_intraday(
        &self,
        symbol: &str,
        month: YearMonth,
        body: Bytes,
    ) -> Result<String, StorageError> {
        self.put(intraday_key(&self.prefix, symbol, month), body).await
    }

    pub async fn put_monthly_adjusted(
        &self,
        symbol: &str,
        body: Bytes,
    ) -> Result<String, StorageError> {
        self.put(monthly_adjusted_key(&self.prefix, symbol, Utc::now()), body).await
    }

    pub async fn put_symbol_search(
        &self,
        keywords: &str,
        body: Bytes,
    ) -> Result<String, StorageError> {
        self.put(symbol_search_key(&self.prefix, keywords, Utc::now()), body).await
    }

    /// Read an object back by key.
    pub async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        let bytes = self.store.get(&Path::from(key)).await?.bytes().await?;
        Ok(bytes)
    }

    async fn put(&self, key: String, body: Bytes) -> Result<String, StorageError> {
        let size = body.len();
        self.store.put(&Path::from(key.as_str()), PutPayload::from(body)).await?;
        let uri = format!("{}/{}", self.location.trim_end_matches('/'), key);
        debug!("Saved {} bytes to {}", size, uri);
        Ok(uri)
    }
}

/// Where an input table lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    S3 { bucket: String, key: String },
    Local(std::path::PathBuf),
}

impl SourceLocation {
    /// `s3://bucket/key` is read from S3; anything else is a local path.
    pub fn parse(uri: &str) -> Result<Self, StorageError> {
        let invalid = |reason: &str| StorageError::InvalidUri {
            uri: uri.to_string(),
            reason: reason.to_string(),
        };

        if !uri.starts_with("s3://") {
            if uri.trim().is_empty() {
                return Err(invalid("empty location"));
            }
            return Ok(SourceLocation::Local(uri.into()));
        }

        let url = Url::parse(uri).map_err(|e| invalid(&e.to_string()))?;
        let bucket = url
            .host_str()
            .filter(|b| !b.is_empty())
            .ok_or_else(|| invalid("missing bucket"))?;
        let key = url.path().trim_start_matches('/');
        if key.is_empty() {
            return Err(invalid("missing object key"));
        }

        Ok(SourceLocation::S3 {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }
}

/// Reads whole input objects (the symbol universe) from S3 or local disk.
#[derive(Clone, Default)]
pub struct SourceReader {
    /// When set, serves every `s3://` read regardless of bucket.
    s3_override: Option<Arc<dyn ObjectStore>>,
}

impl SourceReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve every `s3://` read from the given store instead of AWS.
    pub fn with_object_store(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            s3_override: Some(store),
        }
    }

    pub async fn read(&self, uri: &str) -> Result<Bytes, StorageError> {
        match SourceLocation::parse(uri)? {
            SourceLocation::Local(path) => {
                debug!("Reading local source {}", path.display());
                Ok(Bytes::from(tokio::fs::read(&path).await?))
            }
            SourceLocation::S3 { bucket, key } => {
                debug!("Reading s3://{}/{}", bucket, key);
                let store = match &self.s3_override {
                    Some(store) => store.clone(),
                    None => Arc::new(
                        AmazonS3Builder::from_env()
                            .with_bucket_name(&bucket)
                            .build()?,
                    ),
                };
                let bytes = store.get(&Path::from(key.as_str())).await?.bytes().await?;
                Ok(bytes)
            }
        }
    }
}
