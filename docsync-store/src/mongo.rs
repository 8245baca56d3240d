//! [`DocumentStore`] over the official MongoDB driver.
//!
//! Bulk writes go through the `update` / `delete` commands with
//! `ordered: false` so partial failures come back as per-index write errors
//! instead of aborting the batch.

use async_trait::async_trait;
use docsync_core::types::{CollectionName, Document, Namespace};
use docsync_core::StoreConfig;
use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, Document as BsonDocument};
use mongodb::error::{Error as MongoError, ErrorKind};
use mongodb::options::{ClientOptions, FindOptions};
use mongodb::{Client, Cursor};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{BulkWriteFailure, StoreError, WriteConcernErrorDetail, WriteErrorDetail};
use crate::model::{BulkWriteOutcome, FindQuery, ValidatorOutcome, WriteModel};
use crate::store::{DocumentCursor, DocumentStore};

const NAMESPACE_NOT_FOUND: i32 = 26;

/// Driver-backed store. Cloning shares the connection pool.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
}

impl MongoStore {
    /// Parse `config.uri` and build a client with the configured pool bounds.
    ///
    /// No connection is made until the first operation.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let mut options = ClientOptions::parse(&config.uri).await.map_err(classify)?;
        let bounds = config.pool_bounds();
        options.min_pool_size = Some(bounds.min);
        options.max_pool_size = Some(bounds.max);
        options.app_name = Some("docsync".into());
        let client = Client::with_options(options).map_err(classify)?;
        debug!(min = bounds.min, max = bounds.max, "mongo client configured");
        Ok(Self { client })
    }

    fn collection(&self, namespace: &Namespace) -> mongodb::Collection<BsonDocument> {
        self.client
            .database(&namespace.database)
            .collection(&namespace.collection.0)
    }

    async fn run_update(
        &self,
        namespace: &Namespace,
        ops: &[(usize, &WriteModel)],
        outcome: &mut BulkWriteOutcome,
        errors: &mut Vec<WriteErrorDetail>,
    ) -> Result<Option<WriteConcernErrorDetail>, StoreError> {
        let mut updates = Vec::with_capacity(ops.len());
        for (_, model) in ops {
            if let WriteModel::UpdateOne {
                filter,
                update,
                upsert,
            } = model
            {
                let stages = update
                    .0
                    .iter()
                    .map(|stage| to_bson_doc(stage).map(Bson::Document))
                    .collect::<Result<Vec<_>, _>>()?;
                updates.push(Bson::Document(doc! {
                    "q": to_bson_doc(filter)?,
                    "u": Bson::Array(stages),
                    "upsert": *upsert,
                }));
            }
        }
        let reply = self
            .client
            .database(&namespace.database)
            .run_command(
                doc! {
                    "update": namespace.collection.0.as_str(),
                    "updates": updates,
                    "ordered": false,
                },
                None,
            )
            .await
            .map_err(classify)?;

        let upserted = match reply.get("upserted") {
            Some(Bson::Array(items)) => items.len() as u64,
            _ => 0,
        };
        outcome.upserted += upserted;
        outcome.matched += reply_count(&reply, "n").saturating_sub(upserted);
        outcome.modified += reply_count(&reply, "nModified");
        Ok(collect_errors(&reply, ops, errors))
    }

    async fn run_delete(
        &self,
        namespace: &Namespace,
        ops: &[(usize, &WriteModel)],
        outcome: &mut BulkWriteOutcome,
        errors: &mut Vec<WriteErrorDetail>,
    ) -> Result<Option<WriteConcernErrorDetail>, StoreError> {
        let mut deletes = Vec::with_capacity(ops.len());
        for (_, model) in ops {
            let limit = match model {
                WriteModel::DeleteOne { .. } => 1,
                _ => 0,
            };
            deletes.push(Bson::Document(doc! {
                "q": to_bson_doc(model.filter())?,
                "limit": limit,
            }));
        }
        let reply = self
            .client
            .database(&namespace.database)
            .run_command(
                doc! {
                    "delete": namespace.collection.0.as_str(),
                    "deletes": deletes,
                    "ordered": false,
                },
                None,
            )
            .await
            .map_err(classify)?;
        outcome.deleted += reply_count(&reply, "n");
        Ok(collect_errors(&reply, ops, errors))
    }
}

// ---------------------------------------------------------------------------
// Conversion helpers
// ---------------------------------------------------------------------------

fn to_bson_doc(doc: &Document) -> Result<BsonDocument, StoreError> {
    match Bson::try_from(Value::Object(doc.clone())) {
        Ok(Bson::Document(d)) => Ok(d),
        Ok(other) => Err(StoreError::Codec(format!(
            "expected a document, got {other}"
        ))),
        Err(e) => Err(StoreError::Codec(e.to_string())),
    }
}

fn from_bson_doc(doc: BsonDocument) -> Result<Document, StoreError> {
    match Bson::Document(doc).into_relaxed_extjson() {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Codec(format!(
            "expected an object, got {other}"
        ))),
    }
}

fn reply_count(reply: &BsonDocument, key: &str) -> u64 {
    match reply.get(key) {
        Some(Bson::Int32(n)) => (*n).max(0) as u64,
        Some(Bson::Int64(n)) => (*n).max(0) as u64,
        Some(Bson::Double(n)) => n.max(0.0) as u64,
        _ => 0,
    }
}

fn reply_code(doc: &BsonDocument) -> i32 {
    match doc.get("code") {
        Some(Bson::Int32(n)) => *n,
        Some(Bson::Int64(n)) => *n as i32,
        _ => 0,
    }
}

/// Map command-local write-error indices back to batch positions.
fn collect_errors(
    reply: &BsonDocument,
    ops: &[(usize, &WriteModel)],
    errors: &mut Vec<WriteErrorDetail>,
) -> Option<WriteConcernErrorDetail> {
    if let Ok(items) = reply.get_array("writeErrors") {
        for item in items {
            let Bson::Document(err) = item else { continue };
            let local = reply_count(err, "index") as usize;
            let index = ops.get(local).map(|(i, _)| *i).unwrap_or(local);
            errors.push(WriteErrorDetail {
                index,
                code: reply_code(err),
                message: err.get_str("errmsg").unwrap_or_default().to_string(),
            });
        }
    }
    reply
        .get_document("writeConcernError")
        .ok()
        .map(|wce| WriteConcernErrorDetail {
            code: reply_code(wce),
            message: wce.get_str("errmsg").unwrap_or_default().to_string(),
        })
}

/// Translate a driver error into the store's vocabulary.
fn classify(err: MongoError) -> StoreError {
    if err.contains_label("RetryableWriteError") {
        return StoreError::Disconnected(err.to_string());
    }
    match err.kind.as_ref() {
        ErrorKind::Io(_) | ErrorKind::ConnectionPoolCleared { .. } => {
            StoreError::Disconnected(err.to_string())
        }
        ErrorKind::ServerSelection { message, .. } => StoreError::Disconnected(message.clone()),
        ErrorKind::Command(command) => StoreError::Command {
            code: command.code,
            message: command.message.clone(),
        },
        ErrorKind::InvalidArgument { message, .. } => StoreError::InvalidQuery(message.clone()),
        _ => StoreError::Driver(err.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

struct MongoCursor {
    inner: Option<Cursor<BsonDocument>>,
}

#[async_trait]
impl DocumentCursor for MongoCursor {
    async fn next(&mut self) -> Result<Option<Document>, StoreError> {
        let Some(cursor) = self.inner.as_mut() else {
            return Ok(None);
        };
        match cursor.try_next().await.map_err(classify)? {
            Some(doc) => from_bson_doc(doc).map(Some),
            None => Ok(None),
        }
    }

    async fn close(&mut self) {
        // dropping the driver cursor issues killCursors in the background
        self.inner.take();
    }
}

// ---------------------------------------------------------------------------
// DocumentStore
// ---------------------------------------------------------------------------

#[async_trait]
impl DocumentStore for MongoStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn find(
        &self,
        namespace: &Namespace,
        query: &FindQuery,
    ) -> Result<Box<dyn DocumentCursor>, StoreError> {
        let mut options = FindOptions::default();
        if !query.sort.is_empty() {
            // built key by key: sort order is positional
            let mut sort = BsonDocument::new();
            for key in &query.sort {
                sort.insert(key.field.clone(), key.direction.as_i32());
            }
            options.sort = Some(sort);
        }
        options.projection = query.projection.as_ref().map(to_bson_doc).transpose()?;
        options.batch_size = Some(query.batch_size);
        options.no_cursor_timeout = Some(true);

        let cursor = self
            .collection(namespace)
            .find(to_bson_doc(&query.filter)?, options)
            .await
            .map_err(classify)?;
        Ok(Box::new(MongoCursor {
            inner: Some(cursor),
        }))
    }

    async fn bulk_write(
        &self,
        namespace: &Namespace,
        models: &[WriteModel],
    ) -> Result<BulkWriteOutcome, StoreError> {
        let (updates, deletes): (Vec<_>, Vec<_>) = models
            .iter()
            .enumerate()
            .partition(|(_, m)| matches!(m, WriteModel::UpdateOne { .. }));

        let mut outcome = BulkWriteOutcome::default();
        let mut write_errors = Vec::new();
        let mut write_concern_error = None;
        if !updates.is_empty() {
            write_concern_error = self
                .run_update(namespace, &updates, &mut outcome, &mut write_errors)
                .await?;
        }
        if !deletes.is_empty() {
            let wce = self
                .run_delete(namespace, &deletes, &mut outcome, &mut write_errors)
                .await?;
            write_concern_error = write_concern_error.or(wce);
        }

        if write_errors.is_empty() && write_concern_error.is_none() {
            return Ok(outcome);
        }
        warn!(
            %namespace,
            errors = write_errors.len(),
            write_concern = write_concern_error.is_some(),
            "bulk write reported failures"
        );
        write_errors.sort_by_key(|e| e.index);
        Err(StoreError::BulkWrite(BulkWriteFailure {
            outcome,
            write_errors,
            write_concern_error,
        }))
    }

    async fn delete_one(
        &self,
        namespace: &Namespace,
        filter: &Document,
    ) -> Result<u64, StoreError> {
        let result = self
            .collection(namespace)
            .delete_one(to_bson_doc(filter)?, None)
            .await
            .map_err(classify)?;
        Ok(result.deleted_count)
    }

    async fn delete_many(
        &self,
        namespace: &Namespace,
        filter: &Document,
    ) -> Result<u64, StoreError> {
        let result = self
            .collection(namespace)
            .delete_many(to_bson_doc(filter)?, None)
            .await
            .map_err(classify)?;
        Ok(result.deleted_count)
    }

    async fn list_collections(&self, database: &str) -> Result<Vec<CollectionName>, StoreError> {
        let mut names = self
            .client
            .database(database)
            .list_collection_names(None)
            .await
            .map_err(classify)?;
        names.sort();
        Ok(names.into_iter().map(CollectionName::from).collect())
    }

    async fn drop_collection(&self, namespace: &Namespace) -> Result<(), StoreError> {
        match self.collection(namespace).drop(None).await.map_err(classify) {
            Err(StoreError::Command { code, .. }) if code == NAMESPACE_NOT_FOUND => Ok(()),
            other => other,
        }
    }

    async fn apply_validator(
        &self,
        namespace: &Namespace,
        validator: &Document,
    ) -> Result<ValidatorOutcome, StoreError> {
        let database = self.client.database(&namespace.database);
        let name = namespace.collection.0.as_str();
        let exists = database
            .list_collection_names(doc! { "name": name })
            .await
            .map_err(classify)?
            .iter()
            .any(|existing| existing == name);
        let (verb, outcome) = if exists {
            ("collMod", ValidatorOutcome::Updated)
        } else {
            ("create", ValidatorOutcome::Created)
        };
        // the command name must be the first key
        let mut command = BsonDocument::new();
        command.insert(verb, name);
        command.insert("validator", to_bson_doc(validator)?);
        command.insert("validationLevel", "strict");
        command.insert("validationAction", "error");
        database.run_command(command, None).await.map_err(classify)?;
        debug!(%namespace, verb, "validator installed");
        Ok(outcome)
    }
}
