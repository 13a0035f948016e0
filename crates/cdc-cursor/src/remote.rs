//! A [`CursorStore`] backed by an object in a remote object store (S3),
//! chosen at assembly when AWS credentials are present (spec.md §6).

use async_trait::async_trait;
use aws_sdk_s3::{primitives::ByteStream, Client};

use crate::{CursorStore, Error};

/// Stores the cursor token as the body of a single S3 object. Atomicity
/// relies on the object store's PUT being atomic (spec.md §4.5).
pub struct RemoteCursorStore {
    client: Client,
    bucket: String,
    key: String,
}

impl RemoteCursorStore {
    /// Targets `bucket`/`key` through an already-configured `client`.
    pub fn new(client: Client, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

#[async_trait]
impl CursorStore for RemoteCursorStore {
    async fn load(&self) -> Result<Option<Vec<u8>>, Error> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .send()
            .await;

        match result {
            Ok(output) => {
                let bytes = output.body.collect().await.map_err(|err| Error::Unavailable {
                    reason: err.to_string(),
                })?;
                Ok(Some(bytes.into_bytes().to_vec()))
            }
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(Error::Unavailable {
                reason: err.to_string(),
            }),
        }
    }

    async fn save(&self, token: Vec<u8>) -> Result<(), Error> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .body(ByteStream::from(token))
            .send()
            .await
            .map(|_output| ())
            .map_err(|err| Error::Unavailable {
                reason: err.to_string(),
            })
    }
}

fn is_not_found(err: &aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::get_object::GetObjectError>) -> bool {
    use aws_sdk_s3::operation::get_object::GetObjectError;

    matches!(
        err,
        aws_sdk_s3::error::SdkError::ServiceError(context) if matches!(context.err(), GetObjectError::NoSuchKey(_))
    )
}
