//! S3 object store based on `rust-s3`.

use std::{collections::BTreeSet, time::Duration};

use backoff::{backoff::Backoff, ExponentialBackoff, ExponentialBackoffBuilder};
use log::{debug, info, trace, warn};
use s3::{bucket::Bucket, creds::Credentials, error::S3Error, BucketConfiguration, Region};

use crate::{
    config::ConfigSection,
    error::{BackupsResult, StorageErrorKind},
    interpolate::render_environment,
    storage::{ObjectStore, StoreConnector},
};

mod constants {
    pub(super) const DEFAULT_RETRY: usize = 5;
    pub(super) const DEFAULT_REGION: &str = "us-east-1";
    pub(super) const NOT_FOUND: u16 = 404;
}

#[derive(Clone, Debug)]
struct RetryBackoff {
    max_retries: usize,
    retries: usize,
    exp: ExponentialBackoff,
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self {
            max_retries: constants::DEFAULT_RETRY,
            retries: 0,
            exp: ExponentialBackoffBuilder::new()
                .with_max_elapsed_time(None) // we count the number of retries instead
                .build(),
        }
    }
}

impl Backoff for RetryBackoff {
    fn next_backoff(&mut self) -> Option<Duration> {
        self.retries += 1;
        if self.retries > self.max_retries {
            None
        } else {
            self.exp.next_backoff()
        }
    }

    fn reset(&mut self) {
        self.retries = 0;
        self.exp.reset();
    }
}

fn notify(err: S3Error, duration: Duration) {
    info!("Error {err} at {duration:?}, retrying");
}

/// Run `f`, retrying when the credentials lock is contended.
fn call_with_retry<T>(mut f: impl FnMut() -> Result<T, S3Error>) -> Result<T, S3Error> {
    let retry = || {
        f().map_err(|err| match err {
            S3Error::WLCredentials | S3Error::RLCredentials => backoff::Error::Transient {
                err,
                retry_after: None,
            },
            _ => backoff::Error::Permanent(err),
        })
    };
    backoff::retry_notify(RetryBackoff::default(), retry, notify).map_err(|err| match err {
        backoff::Error::Permanent(err) | backoff::Error::Transient { err, .. } => err,
    })
}

fn is_not_found(err: &S3Error) -> bool {
    matches!(err, S3Error::Http(code, _) if *code == constants::NOT_FOUND)
}

/// Creates [`S3Store`] clients from the settings of a backup config.
#[derive(Clone, Debug)]
pub struct S3Connector {
    region: Region,
    credentials: Credentials,
    path_style: bool,
}

impl S3Connector {
    /// Build a connector for `section`.
    ///
    /// Credentials are taken from the section's `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`
    /// and `AWS_SESSION_TOKEN` entries, falling back to the default credential chain.
    /// The region is read from `AWS_REGION` or `AWS_DEFAULT_REGION`. An `s3-endpoint`
    /// directive selects a custom, path-style endpoint.
    ///
    /// # Errors
    ///
    /// * [`StorageErrorKind::Credentials`] - If no credentials can be found.
    /// * Any error of [`render_environment`].
    pub fn from_section<F>(section: &ConfigSection, env: F) -> BackupsResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let rendered = render_environment(section, &env)?;
        let var = |name: &str| rendered.get(name).cloned().or_else(|| env(name));

        let credentials = match (var("AWS_ACCESS_KEY_ID"), var("AWS_SECRET_ACCESS_KEY")) {
            (Some(access_key), Some(secret_key)) => Credentials::new(
                Some(&access_key),
                Some(&secret_key),
                None,
                var("AWS_SESSION_TOKEN").as_deref(),
                None,
            ),
            _ => Credentials::default(),
        }
        .map_err(StorageErrorKind::Credentials)?;

        let region_name = var("AWS_REGION")
            .or_else(|| var("AWS_DEFAULT_REGION"))
            .unwrap_or_else(|| constants::DEFAULT_REGION.to_string());
        let (endpoint, path_style) = match section.get("s3-endpoint") {
            Some(endpoint) => (endpoint.trim_end_matches('/').to_string(), true),
            None => (format!("https://s3.{region_name}.amazonaws.com"), false),
        };
        debug!("using S3 endpoint {endpoint} in region {region_name}");

        Ok(Self {
            region: Region::Custom {
                region: region_name,
                endpoint,
            },
            credentials,
            path_style,
        })
    }
}

impl StoreConnector for S3Connector {
    type Store = S3Store;

    fn connect(&self) -> BackupsResult<S3Store> {
        Ok(S3Store {
            connector: self.clone(),
        })
    }
}

/// A client for one S3 endpoint, able to access any bucket on it.
#[derive(Clone, Debug)]
pub struct S3Store {
    connector: S3Connector,
}

impl S3Store {
    fn bucket(&self, name: &str) -> BackupsResult<Bucket> {
        let bucket = Bucket::new(
            name,
            self.connector.region.clone(),
            self.connector.credentials.clone(),
        )
        .map_err(StorageErrorKind::S3)?;
        Ok(if self.connector.path_style {
            bucket.with_path_style()
        } else {
            bucket
        })
    }

    fn list(bucket: &Bucket) -> Result<Vec<String>, S3Error> {
        let results = call_with_retry(|| bucket.list(String::new(), None))?;
        Ok(results
            .into_iter()
            .flat_map(|result| result.contents)
            .map(|object| object.key)
            .collect())
    }
}

impl ObjectStore for S3Store {
    fn create_bucket(&self, bucket: &str) -> BackupsResult<()> {
        trace!("creating bucket {bucket}");
        let config = &self.connector;
        let create = if config.path_style {
            Bucket::create_with_path_style
        } else {
            Bucket::create
        };
        let response = create(
            bucket,
            config.region.clone(),
            config.credentials.clone(),
            BucketConfiguration::default(),
        )
        .map_err(StorageErrorKind::S3)?;

        if !response.success() {
            return Err(StorageErrorKind::CreateBucketFailed {
                bucket: bucket.to_string(),
                status: response.response_code,
                response: response.response_text,
            }
            .into());
        }
        Ok(())
    }

    fn delete_bucket_if_exists(&self, bucket: &str) -> BackupsResult<bool> {
        let handle = self.bucket(bucket)?;
        let keys = match Self::list(&handle) {
            Ok(keys) => keys,
            Err(err) if is_not_found(&err) => return Ok(false),
            Err(err) => return Err(StorageErrorKind::S3(err).into()),
        };
        trace!("deleting {} objects from bucket {bucket}", keys.len());
        for key in &keys {
            _ = call_with_retry(|| handle.delete_object(key)).map_err(StorageErrorKind::S3)?;
        }
        match call_with_retry(|| handle.delete()) {
            Ok(status) if (200..300).contains(&status) => Ok(true),
            Ok(status) => Err(StorageErrorKind::DeleteBucketFailed {
                bucket: bucket.to_string(),
                status,
            }
            .into()),
            Err(err) if is_not_found(&err) => {
                warn!("bucket {bucket} vanished while deleting it");
                Ok(true)
            }
            Err(err) => Err(StorageErrorKind::S3(err).into()),
        }
    }

    fn list_keys(&self, bucket: &str) -> BackupsResult<BTreeSet<String>> {
        let handle = self.bucket(bucket)?;
        match Self::list(&handle) {
            Ok(keys) => Ok(keys.into_iter().collect()),
            Err(err) if is_not_found(&err) => {
                Err(StorageErrorKind::NoSuchBucket(bucket.to_string()).into())
            }
            Err(err) => Err(StorageErrorKind::S3(err).into()),
        }
    }

    /// Copies by downloading the object and uploading it again, so every copy in
    /// flight holds one whole object in memory (one duplicity volume per worker).
    fn copy_object(
        &self,
        source_bucket: &str,
        key: &str,
        destination_bucket: &str,
    ) -> BackupsResult<u64> {
        trace!("copying {key} from {source_bucket} to {destination_bucket}");
        let source = self.bucket(source_bucket)?;
        let destination = self.bucket(destination_bucket)?;

        let object = match call_with_retry(|| source.get_object(key)) {
            Ok(object) => object,
            Err(err) if is_not_found(&err) => {
                return Err(StorageErrorKind::NoSuchKey {
                    bucket: source_bucket.to_string(),
                    key: key.to_string(),
                }
                .into())
            }
            Err(err) => return Err(StorageErrorKind::S3(err).into()),
        };
        let data = object.bytes();
        _ = call_with_retry(|| destination.put_object(key, data)).map_err(StorageErrorKind::S3)?;
        Ok(data.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    fn section(entries: &[(&str, &str)]) -> ConfigSection {
        ConfigSection::from_entries("s3", entries.iter().copied())
    }

    #[test]
    fn credentials_and_region_come_from_the_section() {
        let connector = S3Connector::from_section(
            &section(&[
                ("AWS_ACCESS_KEY_ID", "access"),
                ("AWS_SECRET_ACCESS_KEY", "secret"),
                ("AWS_REGION", "eu-west-1"),
            ]),
            |_| None,
        )
        .unwrap();

        assert_eq!(connector.credentials.access_key.as_deref(), Some("access"));
        assert_eq!(connector.credentials.secret_key.as_deref(), Some("secret"));
        assert_eq!(connector.region.to_string(), "eu-west-1");
        assert_eq!(connector.region.endpoint(), "https://s3.eu-west-1.amazonaws.com");
        assert!(!connector.path_style);
    }

    #[test]
    fn custom_endpoint_uses_path_style() {
        let connector = S3Connector::from_section(
            &section(&[
                ("AWS_ACCESS_KEY_ID", "access"),
                ("AWS_SECRET_ACCESS_KEY", "secret"),
                ("s3-endpoint", "http://localhost:9000/"),
            ]),
            |name| (name == "AWS_DEFAULT_REGION").then(|| "local".to_string()),
        )
        .unwrap();

        assert_eq!(connector.region.endpoint(), "http://localhost:9000");
        assert_eq!(connector.region.to_string(), "local");
        assert!(connector.path_style);
    }

    #[test]
    fn not_found_is_detected() {
        assert!(is_not_found(&S3Error::Http(404, String::new())));
        assert!(!is_not_found(&S3Error::Http(403, String::new())));
    }
}
