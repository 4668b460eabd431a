use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use scylla::{IntoTypedRows, QueryResult};
use uuid::Uuid;

use crate::models::{Comment, ImageKey, ImagePatch, ImageRecord, RecordFilter};
use crate::repository::{AlbumDirectory, MetadataRepository};

const RECORD_COLUMNS: &str = "album_id, image_id, object_ref, filename, content_type, \
    size, tags, person, favorite, comments, created_at";

const MAX_TOGGLE_ATTEMPTS: usize = 5;

type RecordRow = (
    String,
    Uuid,
    String,
    String,
    String,
    i64,
    Option<Vec<String>>,
    Option<String>,
    Option<bool>,
    Option<Vec<String>>,
    i64,
);

/// Image records stored in a Scylla (or Cassandra) table.
///
/// Records are partitioned by album so every album scoped query stays
/// within a single partition.
pub struct ScyllaRepository {
    table: String,
    connection: session::Session,
}

impl ScyllaRepository {
    pub async fn connect(
        keyspace: String,
        table: Option<String>,
        known_nodes: &[String],
        user: Option<String>,
        password: Option<String>,
    ) -> anyhow::Result<Self> {
        let connection = session::Session::connect(keyspace, known_nodes, user, password).await?;

        let table = table.unwrap_or_else(|| "album_images".to_string());
        let qry = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
            album_id text, \
            image_id uuid, \
            object_ref text, \
            filename text, \
            content_type text, \
            size bigint, \
            tags list<text>, \
            person text, \
            favorite boolean, \
            comments list<text>, \
            created_at bigint, \
            PRIMARY KEY ((album_id), image_id)
        )",
            table
        );
        connection.query(&qry, ()).await?;

        Ok(Self { table, connection })
    }

    async fn select(&self, qry: &str, values: impl scylla::frame::value::ValueList + std::fmt::Debug) -> anyhow::Result<Vec<ImageRecord>> {
        self.connection
            .query_prepared(qry, values)
            .await?
            .rows
            .unwrap_or_default()
            .into_typed::<RecordRow>()
            .map(|row| from_row(row?))
            .collect()
    }

    /// Flips the favorite flag with a compare-and-set so concurrent toggles
    /// each take effect.
    async fn toggle_favorite(&self, image_id: Uuid, album_id: &str) -> anyhow::Result<Option<ImageRecord>> {
        let qry = format!(
            "UPDATE {table} SET favorite = ? WHERE album_id = ? AND image_id = ? IF favorite = ?;",
            table = self.table
        );

        for _ in 0..MAX_TOGGLE_ATTEMPTS {
            let current = match self.find_one(image_id, album_id).await? {
                Some(record) => record.is_favorite,
                None => return Ok(None),
            };

            let result = self
                .connection
                .query_prepared(&qry, (!current, album_id, image_id, current))
                .await?;

            if was_applied(&result) {
                return self.find_one(image_id, album_id).await;
            }
        }

        Err(anyhow!(
            "favorite flag of image {} kept changing, gave up after {} attempts",
            image_id,
            MAX_TOGGLE_ATTEMPTS,
        ))
    }

    async fn delete_key(&self, key: &ImageKey) -> anyhow::Result<u64> {
        let qry = format!(
            "DELETE FROM {table} WHERE album_id = ? AND image_id = ? IF EXISTS;",
            table = self.table
        );

        let result = self
            .connection
            .query_prepared(&qry, (key.album_id.as_str(), key.image_id))
            .await?;

        Ok(if was_applied(&result) { 1 } else { 0 })
    }
}

#[async_trait]
impl MetadataRepository for ScyllaRepository {
    async fn insert(&self, record: ImageRecord) -> anyhow::Result<()> {
        let qry = format!(
            "INSERT INTO {table} ({columns}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?);",
            table = self.table,
            columns = RECORD_COLUMNS,
        );

        let comments = encode_comments(&record.comments)?;
        self.connection
            .query_prepared(
                &qry,
                (
                    record.album_id,
                    record.image_id,
                    record.object_ref,
                    record.filename,
                    record.content_type,
                    record.size as i64,
                    record.tags,
                    record.person,
                    record.is_favorite,
                    comments,
                    record.created_at.timestamp_millis(),
                ),
            )
            .await?;

        Ok(())
    }

    async fn find_all(&self) -> anyhow::Result<Vec<ImageRecord>> {
        let qry = format!(
            "SELECT {columns} FROM {table};",
            columns = RECORD_COLUMNS,
            table = self.table,
        );

        self.select(&qry, ()).await
    }

    async fn find_by_album(&self, album_id: &str) -> anyhow::Result<Vec<ImageRecord>> {
        let qry = format!(
            "SELECT {columns} FROM {table} WHERE album_id = ?;",
            columns = RECORD_COLUMNS,
            table = self.table,
        );

        self.select(&qry, (album_id,)).await
    }

    async fn find_one(&self, image_id: Uuid, album_id: &str) -> anyhow::Result<Option<ImageRecord>> {
        let qry = format!(
            "SELECT {columns} FROM {table} WHERE album_id = ? AND image_id = ?;",
            columns = RECORD_COLUMNS,
            table = self.table,
        );

        Ok(self.select(&qry, (album_id, image_id)).await?.into_iter().next())
    }

    async fn update_one(
        &self,
        image_id: Uuid,
        album_id: &str,
        patch: ImagePatch,
    ) -> anyhow::Result<Option<ImageRecord>> {
        let table = &self.table;
        let applied = match patch {
            ImagePatch::ToggleFavorite => return self.toggle_favorite(image_id, album_id).await,
            ImagePatch::AppendComment(comment) => {
                let qry = format!(
                    "UPDATE {table} SET comments = comments + ? WHERE album_id = ? AND image_id = ? IF EXISTS;",
                    table = table
                );
                let encoded = encode_comments(&[comment])?;
                let result = self
                    .connection
                    .query_prepared(&qry, (encoded, album_id, image_id))
                    .await?;
                was_applied(&result)
            },
            ImagePatch::Metadata { tags, person } => {
                let mut applied = true;

                if let Some(tags) = tags {
                    let qry = format!(
                        "UPDATE {table} SET tags = ? WHERE album_id = ? AND image_id = ? IF EXISTS;",
                        table = table
                    );
                    let result = self
                        .connection
                        .query_prepared(&qry, (tags, album_id, image_id))
                        .await?;
                    applied &= was_applied(&result);
                }

                if let Some(person) = person {
                    let qry = format!(
                        "UPDATE {table} SET person = ? WHERE album_id = ? AND image_id = ? IF EXISTS;",
                        table = table
                    );
                    let result = self
                        .connection
                        .query_prepared(&qry, (person, album_id, image_id))
                        .await?;
                    applied &= was_applied(&result);
                }

                applied
            },
        };

        if !applied {
            return Ok(None);
        }

        self.find_one(image_id, album_id).await
    }

    async fn delete_one(&self, image_id: Uuid, album_id: &str) -> anyhow::Result<u64> {
        let key = ImageKey {
            album_id: album_id.to_string(),
            image_id,
        };

        self.delete_key(&key).await
    }

    async fn delete_many(&self, filter: RecordFilter) -> anyhow::Result<u64> {
        match filter {
            RecordFilter::ByKeys(keys) => {
                let mut removed = 0;
                for key in keys.iter() {
                    removed += self.delete_key(key).await?;
                }

                Ok(removed)
            },
        }
    }
}

/// Reads album existence from the album service's table.
pub struct ScyllaAlbumDirectory {
    table: String,
    connection: session::Session,
}

impl ScyllaAlbumDirectory {
    pub async fn connect(
        keyspace: String,
        table: Option<String>,
        known_nodes: &[String],
        user: Option<String>,
        password: Option<String>,
    ) -> anyhow::Result<Self> {
        let connection = session::Session::connect(keyspace, known_nodes, user, password).await?;

        let table = table.unwrap_or_else(|| "albums".to_string());
        let qry = format!(
            "CREATE TABLE IF NOT EXISTS {} (album_id text PRIMARY KEY)",
            table
        );
        connection.query(&qry, ()).await?;

        Ok(Self { table, connection })
    }
}

#[async_trait]
impl AlbumDirectory for ScyllaAlbumDirectory {
    async fn exists(&self, album_id: &str) -> anyhow::Result<bool> {
        let qry = format!(
            "SELECT album_id FROM {table} WHERE album_id = ?;",
            table = self.table
        );

        let found = self
            .connection
            .query_prepared(&qry, (album_id,))
            .await?
            .rows
            .map(|rows| !rows.is_empty())
            .unwrap_or(false);

        Ok(found)
    }
}

fn from_row(row: RecordRow) -> anyhow::Result<ImageRecord> {
    let (
        album_id,
        image_id,
        object_ref,
        filename,
        content_type,
        size,
        tags,
        person,
        favorite,
        comments,
        created_at,
    ) = row;

    let comments = comments
        .unwrap_or_default()
        .iter()
        .map(|raw| serde_json::from_str::<Comment>(raw))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ImageRecord {
        image_id,
        album_id,
        object_ref,
        filename,
        content_type,
        size: size.max(0) as u64,
        tags: tags.unwrap_or_default(),
        person,
        is_favorite: favorite.unwrap_or(false),
        comments,
        created_at: from_millis(created_at)?,
    })
}

fn from_millis(millis: i64) -> anyhow::Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| anyhow!("Invalid record timestamp {}", millis))
}

fn encode_comments(comments: &[Comment]) -> anyhow::Result<Vec<String>> {
    comments
        .iter()
        .map(|comment| serde_json::to_string(comment).map_err(anyhow::Error::from))
        .collect()
}

/// Whether a lightweight transaction was applied, read from the
/// `[applied]` column the server returns.
fn was_applied(result: &QueryResult) -> bool {
    result
        .rows
        .as_ref()
        .and_then(|rows| rows.first())
        .and_then(|row| row.columns.first())
        .and_then(|column| column.as_ref())
        .and_then(|value| value.as_boolean())
        .unwrap_or(false)
}

mod session {
    use std::fmt::Debug;

    use scylla::frame::value::ValueList;
    use scylla::query::Query;
    use scylla::transport::errors::{DbError, QueryError};
    use scylla::QueryResult;

    pub struct Session(scylla::CachingSession);

    impl From<scylla::Session> for Session {
        fn from(s: scylla::Session) -> Self {
            Self(scylla::CachingSession::from(s, 100))
        }
    }

    impl Session {
        pub async fn connect(
            keyspace: String,
            known_nodes: &[String],
            user: Option<String>,
            password: Option<String>,
        ) -> anyhow::Result<Self> {
            let mut cfg = scylla::SessionConfig::new();
            cfg.add_known_nodes(known_nodes);
            cfg.auth_username = user;
            cfg.auth_password = password;

            let base = scylla::Session::connect(cfg).await?;
            base.use_keyspace(keyspace, false).await?;

            Ok(Self::from(base))
        }

        #[instrument(skip(self, query), level = "debug")]
        pub async fn query(
            &self,
            query: &str,
            values: impl ValueList + Debug,
        ) -> Result<QueryResult, QueryError> {
            debug!("executing query {}", query);
            let result = self.0.execute(query, &values).await;

            if let Err(ref e) = result {
                consider_logging_error(e);
            }

            result
        }

        #[instrument(skip(self, query), level = "debug")]
        pub async fn query_prepared(
            &self,
            query: &str,
            values: impl ValueList + Debug,
        ) -> Result<QueryResult, QueryError> {
            debug!("preparing new statement: {}", query);
            let result = self.0.execute(Query::from(query), &values).await;

            match result {
                Ok(res) => Ok(res),
                Err(e) => {
                    consider_logging_error(&e);
                    Err(e)
                },
            }
        }
    }

    fn consider_logging_error(e: &QueryError) {
        if let QueryError::DbError(DbError::AlreadyExists { .. }, ..) = e {
            info!("Table already exists, skipping...");
        } else {
            error!("Query failed: {}", e);
        }
    }
}
