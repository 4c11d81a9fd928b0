use crate::config::S3Config;
use crate::error::{Result, StorageError};
use crate::spool::spool;
use crate::{NARINFO_SUFFIX, NarStream, StorageBackend, narinfo_filename, validate_key};
use aws_sdk_s3::Client;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use futures::StreamExt;
use tokio_util::io::ReaderStream;
use tracing::debug;

const NARINFO_PREFIX: &str = "narinfo/";
const NAR_PREFIX: &str = "nar/";

/// Narinfo and NAR objects under two key prefixes of one bucket.
#[derive(Clone, Debug)]
pub struct S3Backend {
    client: Client,
    bucket: String,
    key_prefix: String,
}

impl S3Backend {
    pub fn new(client: Client, bucket: impl Into<String>, key_prefix: Option<String>) -> Self {
        let key_prefix = match key_prefix {
            Some(p) if !p.is_empty() && !p.ends_with('/') => format!("{p}/"),
            Some(p) => p,
            None => String::new(),
        };
        Self {
            client,
            bucket: bucket.into(),
            key_prefix,
        }
    }

    pub async fn from_config(config: &S3Config) -> Result<Self> {
        if config.bucket.is_empty() {
            return Err(StorageError::config("s3 bucket must not be empty"));
        }

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(config.force_path_style)
            .build();

        Ok(Self::new(
            Client::from_conf(s3_config),
            config.bucket.clone(),
            config.key_prefix.clone(),
        ))
    }

    fn narinfo_key(&self, hash: &str) -> Result<String> {
        validate_key(hash)?;
        Ok(format!(
            "{}{NARINFO_PREFIX}{}",
            self.key_prefix,
            narinfo_filename(hash)
        ))
    }

    fn nar_key(&self, filename: &str) -> Result<String> {
        validate_key(filename)?;
        Ok(format!("{}{NAR_PREFIX}{filename}", self.key_prefix))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|e| e.is_not_found()) => Ok(false),
            Err(e) => Err(StorageError::transient(
                format!("HeadObject {key}"),
                DisplayErrorContext(&e),
            )),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<ByteStream>> {
        match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => Ok(Some(output.body)),
            Err(e) if e.as_service_error().is_some_and(|e| e.is_no_such_key()) => Ok(None),
            Err(e) => Err(StorageError::transient(
                format!("GetObject {key}"),
                DisplayErrorContext(&e),
            )),
        }
    }

    async fn put(&self, key: &str, body: ByteStream, len: u64) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_length(len as i64)
            .body(body)
            .send()
            .await
            .map_err(|e| StorageError::transient(format!("PutObject {key}"), DisplayErrorContext(&e)))?;
        debug!("stored s3://{}/{key} ({len} bytes)", self.bucket);
        Ok(())
    }
}

/// Whatever the SDK hands back, callers get a plain byte stream.
fn into_nar_stream(body: ByteStream) -> NarStream {
    ReaderStream::new(body.into_async_read()).boxed()
}

impl StorageBackend for S3Backend {
    async fn has_narinfo(&self, hash: &str) -> Result<bool> {
        self.exists(&self.narinfo_key(hash)?).await
    }

    async fn get_narinfo(&self, hash: &str) -> Result<Option<String>> {
        let key = self.narinfo_key(hash)?;
        let Some(body) = self.get(&key).await? else {
            return Ok(None);
        };
        let bytes = body
            .collect()
            .await
            .map_err(|e| StorageError::transient(format!("GetObject {key}"), e))?
            .into_bytes();
        String::from_utf8(bytes.to_vec())
            .map(Some)
            .map_err(|e| StorageError::transient(format!("GetObject {key}"), e))
    }

    async fn put_narinfo(&self, hash: &str, content: &str) -> Result<()> {
        let key = self.narinfo_key(hash)?;
        let len = content.len() as u64;
        self.put(&key, ByteStream::from(content.as_bytes().to_vec()), len)
            .await
    }

    async fn has_nar(&self, filename: &str) -> Result<bool> {
        self.exists(&self.nar_key(filename)?).await
    }

    async fn get_nar_stream(&self, filename: &str) -> Result<Option<NarStream>> {
        let key = self.nar_key(filename)?;
        Ok(self.get(&key).await?.map(into_nar_stream))
    }

    async fn put_nar_stream(&self, filename: &str, stream: NarStream) -> Result<()> {
        let key = self.nar_key(filename)?;
        let spooled = spool(stream, None).await?;
        let body = ByteStream::from_path(spooled.path())
            .await
            .map_err(|e| StorageError::transient(format!("PutObject {key}"), e))?;
        self.put(&key, body, spooled.len).await
    }

    async fn list_narinfo(&self) -> Result<Vec<String>> {
        let prefix = format!("{}{NARINFO_PREFIX}", self.key_prefix);
        let mut hashes = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| StorageError::transient("ListObjectsV2", DisplayErrorContext(&e)))?;

            hashes.extend(output.contents().iter().filter_map(|object| {
                object
                    .key()
                    .and_then(|k| k.strip_prefix(&prefix))
                    .and_then(|k| k.strip_suffix(NARINFO_SUFFIX))
                    .filter(|k| !k.is_empty() && !k.contains('/'))
                    .map(str::to_string)
            }));

            match output.next_continuation_token() {
                Some(token) if output.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        hashes.sort();
        Ok(hashes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(prefix: Option<&str>) -> S3Backend {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new("us-east-1"))
            .build();
        S3Backend::new(
            Client::from_conf(config),
            "bucket",
            prefix.map(str::to_string),
        )
    }

    #[test]
    fn test_keys_without_prefix() {
        let b = backend(None);
        assert_eq!(b.narinfo_key("abc").unwrap(), "narinfo/abc.narinfo");
        assert_eq!(b.nar_key("x.nar").unwrap(), "nar/x.nar");
    }

    #[test]
    fn test_keys_with_prefix() {
        let b = backend(Some("cache"));
        assert_eq!(b.narinfo_key("abc").unwrap(), "cache/narinfo/abc.narinfo");
        assert_eq!(b.nar_key("x.nar").unwrap(), "cache/nar/x.nar");
    }

    #[test]
    fn test_keys_are_validated() {
        let b = backend(None);
        assert!(matches!(
            b.nar_key("../narinfo/abc.narinfo"),
            Err(StorageError::InvalidKey { .. })
        ));
    }
}
