//! Production `SourceClient` backed by the MongoDB driver.

use bson::{doc, Document};
use futures::StreamExt;
use mongodb::{
    change_stream::event::ResumeToken,
    options::{ChangeStreamOptions, ClientOptions, FindOptions, FullDocumentType},
    Client, Collection, Database,
};

use crate::{change_feed_pipeline, ChangeEvent, ChangeEventStream, DocumentStream, Error, SourceClient};

/// A `SourceClient` over a single MongoDB collection.
pub struct MongoSourceClient {
    database: Database,
    collection: Collection<Document>,
}

impl MongoSourceClient {
    /// Connects to `uri` and targets `database.collection`, applying the
    /// configured pool sizes and timeouts.
    pub async fn connect(
        uri: &str,
        database: &str,
        collection: &str,
        pool_min: u32,
        pool_max: u32,
        connect_timeout: std::time::Duration,
    ) -> Result<Self, Error> {
        let mut options = ClientOptions::parse(uri).await.map_err(|err| Error::Connection {
            reason: err.to_string(),
        })?;
        options.min_pool_size = Some(pool_min);
        options.max_pool_size = Some(pool_max);
        options.connect_timeout = Some(connect_timeout);

        let client = Client::with_options(options).map_err(|err| Error::Connection {
            reason: err.to_string(),
        })?;
        let db = client.database(database);
        let collection = db.collection::<Document>(collection);

        Ok(Self { database: db, collection })
    }
}

#[async_trait::async_trait]
impl SourceClient for MongoSourceClient {
    async fn open_change_feed(&self, resume_token: Option<crate::CursorToken>) -> Result<ChangeEventStream, Error> {
        let mut options = ChangeStreamOptions::builder()
            .full_document(Some(FullDocumentType::UpdateLookup))
            .build();

        if let Some(bytes) = resume_token {
            // `ResumeToken` round-trips through its own `Serialize`/`Deserialize`
            // impl; this mirrors the driver's documented persist-then-resume
            // pattern rather than inventing a parsing API.
            let token: ResumeToken = bson::from_slice(&bytes).map_err(|err| Error::Cursor {
                reason: format!("invalid stored resume token: {err}"),
            })?;
            options.resume_after = Some(token);
        }

        let stream = self
            .collection
            .watch(change_feed_pipeline(), options)
            .await
            .map_err(|err| Error::Connection {
                reason: err.to_string(),
            })?;

        let mapped = stream.map(|item| {
            let event = item.map_err(|err| Error::Cursor {
                reason: err.to_string(),
            })?;
            // Every change-stream event carries a resume token (unlike
            // `document_key`/`full_document`, which are operation-dependent);
            // serialize it directly rather than through an `Option`.
            let cursor_token = bson::to_vec(&event.id).unwrap_or_default();

            Ok(ChangeEvent {
                op_type: Some(format!("{:?}", event.operation_type).to_lowercase()),
                document_key: event
                    .document_key
                    .unwrap_or_default(),
                full_document: event.full_document,
                cursor_token,
            })
        });

        Ok(Box::pin(mapped))
    }

    async fn open_snapshot(&self, batch_size: u32) -> Result<DocumentStream, Error> {
        let options = FindOptions::builder().batch_size(batch_size).build();
        let cursor = self.collection.find(doc! {}, options).await.map_err(|err| Error::Connection {
            reason: err.to_string(),
        })?;

        let mapped = cursor.map(|item| item.map_err(|err| Error::Cursor {
            reason: err.to_string(),
        }));

        Ok(Box::pin(mapped))
    }

    async fn ping(&self) -> Result<(), Error> {
        self.database
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map(|_| ())
            .map_err(|err| Error::Connection {
                reason: err.to_string(),
            })
    }
}
