use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::{StorageConfig, StorageKind};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("invalid object key '{0}'")]
    InvalidKey(String),
    #[error("i/o error on '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("sdk error: {0}")]
    Sdk(String),
}

impl StoreError {
    #[cfg_attr(not(feature = "runtime"), allow(dead_code))]
    fn from_sdk(err: impl fmt::Display) -> Self {
        Self::Sdk(err.to_string())
    }

    fn io(key: &str, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(key.to_string())
        } else {
            Self::Io {
                key: key.to_string(),
                source,
            }
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Flat key/value object storage addressed by `/`-separated keys.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    inner: ObjectStoreKind,
}

#[derive(Debug, Clone)]
enum ObjectStoreKind {
    Local {
        root: PathBuf,
    },
    #[cfg(feature = "runtime")]
    S3(s3::S3Store),
}

impl ObjectStore {
    pub fn local(root: impl Into<PathBuf>) -> Self {
        ObjectStore {
            inner: ObjectStoreKind::Local { root: root.into() },
        }
    }

    pub async fn from_config(config: &StorageConfig) -> StoreResult<Self> {
        match config.kind {
            StorageKind::Local => Ok(Self::local(config.root.clone())),
            #[cfg(feature = "runtime")]
            StorageKind::S3 => Ok(ObjectStore {
                inner: ObjectStoreKind::S3(s3::S3Store::new(config).await?),
            }),
            #[cfg(not(feature = "runtime"))]
            StorageKind::S3 => Err(StoreError::Configuration(
                "the s3 backend requires the `runtime` feature".into(),
            )),
        }
    }

    /// Human-readable location of a key, used in logs and reports.
    pub fn uri(&self, key: &str) -> String {
        match &self.inner {
            ObjectStoreKind::Local { root } => root.join(key).display().to_string(),
            #[cfg(feature = "runtime")]
            ObjectStoreKind::S3(store) => format!("s3://{}/{}", store.bucket, key),
        }
    }

    pub async fn put_object(&self, key: &str, contents: Vec<u8>) -> StoreResult<()> {
        validate_key(key)?;
        match &self.inner {
            ObjectStoreKind::Local { root } => {
                let path = root.join(key);
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(|err| StoreError::io(key, err))?;
                }
                std::fs::write(&path, contents).map_err(|err| StoreError::io(key, err))
            }
            #[cfg(feature = "runtime")]
            ObjectStoreKind::S3(store) => store.put_object(key, contents).await,
        }
    }

    pub async fn get_object(&self, key: &str) -> StoreResult<Vec<u8>> {
        validate_key(key)?;
        match &self.inner {
            ObjectStoreKind::Local { root } => {
                std::fs::read(root.join(key)).map_err(|err| StoreError::io(key, err))
            }
            #[cfg(feature = "runtime")]
            ObjectStoreKind::S3(store) => store.get_object(key).await,
        }
    }

    /// All keys starting with `prefix`, sorted.
    pub async fn list_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut keys = match &self.inner {
            ObjectStoreKind::Local { root } => list_local(root, prefix)?,
            #[cfg(feature = "runtime")]
            ObjectStoreKind::S3(store) => store.list_prefix(prefix).await?,
        };
        keys.sort();
        Ok(keys)
    }

    /// Deleting a missing key is not an error.
    pub async fn delete(&self, key: &str) -> StoreResult<()> {
        validate_key(key)?;
        match &self.inner {
            ObjectStoreKind::Local { root } => match std::fs::remove_file(root.join(key)) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(StoreError::io(key, err)),
            },
            #[cfg(feature = "runtime")]
            ObjectStoreKind::S3(store) => store.delete_object(key).await,
        }
    }

    /// Removes every object under `prefix` and returns the deleted keys.
    pub async fn delete_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let keys = self.list_prefix(prefix).await?;
        for key in &keys {
            self.delete(key).await?;
        }
        if let ObjectStoreKind::Local { root } = &self.inner {
            prune_empty_dirs(&root.join(prefix.trim_end_matches('/')));
        }
        Ok(keys)
    }
}

fn validate_key(key: &str) -> StoreResult<()> {
    if key.is_empty()
        || key.starts_with('/')
        || key.ends_with('/')
        || key.split('/').any(|segment| segment.is_empty() || segment == "..")
    {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

fn list_local(root: &Path, prefix: &str) -> StoreResult<Vec<String>> {
    let root = absolute_root(root)?;
    // Only walk the deepest directory the prefix names.
    let dir_part = match prefix.rfind('/') {
        Some(idx) => &prefix[..idx],
        None => "",
    };
    let start = root.join(dir_part);
    if !start.is_dir() {
        return Ok(Vec::new());
    }

    let mut keys = Vec::new();
    for path in glob_below(&start)? {
        if !path.is_file() {
            continue;
        }
        let Ok(relative) = path.strip_prefix(&root) else {
            continue;
        };
        let key = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if key.starts_with(prefix) {
            keys.push(key);
        }
    }
    Ok(keys)
}

fn absolute_root(root: &Path) -> StoreResult<PathBuf> {
    if root.is_absolute() {
        return Ok(root.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|err| StoreError::Io {
        key: root.display().to_string(),
        source: err,
    })?;
    Ok(cwd.join(root))
}

/// Every path below `dir`, at any depth.
fn glob_below(dir: &Path) -> StoreResult<Vec<PathBuf>> {
    let base = dir.to_str().ok_or_else(|| {
        StoreError::Configuration(format!("non UTF-8 storage path: {}", dir.display()))
    })?;
    let pattern = format!("{}/**/*", glob::Pattern::escape(base.trim_end_matches('/')));
    let entries = glob::glob(&pattern)
        .map_err(|err| StoreError::Configuration(format!("bad listing pattern: {err}")))?;

    let mut paths = Vec::new();
    for entry in entries {
        match entry {
            Ok(path) => paths.push(path),
            Err(err) => {
                let key = err.path().display().to_string();
                return Err(StoreError::Io {
                    key,
                    source: err.into_error(),
                });
            }
        }
    }
    Ok(paths)
}

fn prune_empty_dirs(dir: &Path) {
    if !dir.is_dir() {
        return;
    }
    let Ok(paths) = glob_below(dir) else {
        return;
    };
    let mut dirs: Vec<PathBuf> = paths.into_iter().filter(|path| path.is_dir()).collect();
    // Deepest first so parents empty out before they are visited.
    dirs.sort_by_key(|path| std::cmp::Reverse(path.components().count()));
    dirs.push(dir.to_path_buf());
    for dir in dirs {
        // Fails harmlessly when the directory still has files.
        let _ = std::fs::remove_dir(dir);
    }
}

#[cfg(feature = "runtime")]
mod s3 {
    use aws_config::BehaviorVersion;
    use aws_credential_types::provider::SharedCredentialsProvider;
    use aws_credential_types::Credentials;
    use aws_sdk_s3::config::Region;
    use aws_sdk_s3::error::SdkError;
    use aws_sdk_s3::primitives::ByteStream;
    use aws_sdk_s3::Client;

    use super::{StoreError, StoreResult};
    use crate::config::StorageConfig;

    #[derive(Clone)]
    pub(super) struct S3Store {
        client: Client,
        pub(super) bucket: String,
    }

    impl std::fmt::Debug for S3Store {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("S3Store")
                .field("bucket", &self.bucket)
                .finish_non_exhaustive()
        }
    }

    impl S3Store {
        pub(super) async fn new(config: &StorageConfig) -> StoreResult<Self> {
            let bucket = config
                .bucket
                .clone()
                .filter(|bucket| !bucket.trim().is_empty())
                .ok_or_else(|| StoreError::Configuration("bucket name cannot be empty".into()))?;

            let mut loader = aws_config::defaults(BehaviorVersion::latest())
                .region(Region::new(config.region.clone()));

            if let (Some(access_key), Some(secret_key)) =
                (&config.access_key_id, &config.secret_access_key)
            {
                let credentials = Credentials::new(access_key, secret_key, None, None, "static");
                loader = loader.credentials_provider(SharedCredentialsProvider::new(credentials));
            }

            let shared_config = loader.load().await;
            let mut builder = aws_sdk_s3::config::Builder::from(&shared_config);

            if let Some(endpoint) = &config.endpoint {
                builder = builder.endpoint_url(endpoint);
            }

            if config.force_path_style {
                builder = builder.force_path_style(true);
            }

            Ok(Self {
                client: Client::from_conf(builder.build()),
                bucket,
            })
        }

        pub(super) async fn put_object(&self, key: &str, contents: Vec<u8>) -> StoreResult<()> {
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .body(ByteStream::from(contents))
                .send()
                .await
                .map_err(StoreError::from_sdk)?;
            Ok(())
        }

        pub(super) async fn get_object(&self, key: &str) -> StoreResult<Vec<u8>> {
            let output = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(|err| match err {
                    SdkError::ServiceError(service_err) => {
                        let message = service_err.err().to_string();
                        if message.contains("NoSuchKey") {
                            StoreError::NotFound(key.to_string())
                        } else {
                            StoreError::from_sdk(message)
                        }
                    }
                    other => StoreError::from_sdk(other),
                })?;

            let data = output.body.collect().await.map_err(StoreError::from_sdk)?;
            Ok(data.into_bytes().to_vec())
        }

        pub(super) async fn list_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
            let mut keys = Vec::new();
            let mut continuation: Option<String> = None;
            loop {
                let output = self
                    .client
                    .list_objects_v2()
                    .bucket(&self.bucket)
                    .prefix(prefix)
                    .set_continuation_token(continuation.take())
                    .send()
                    .await
                    .map_err(StoreError::from_sdk)?;

                keys.extend(
                    output
                        .contents()
                        .iter()
                        .filter_map(|object| object.key().map(str::to_string)),
                );

                match output.next_continuation_token() {
                    Some(token) if output.is_truncated().unwrap_or(false) => {
                        continuation = Some(token.to_string());
                    }
                    _ => break,
                }
            }
            Ok(keys)
        }

        pub(super) async fn delete_object(&self, key: &str) -> StoreResult<()> {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(StoreError::from_sdk)?;
            Ok(())
        }
    }
}
