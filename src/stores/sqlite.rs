//! SQLite backend built on `sqlx`.
//!
//! Schema lives in `migrations/`; [`SqliteStore::connect`] applies it when the
//! `sqlite-migrations` feature is enabled. Ids and timestamps are stored as
//! TEXT (UUID / RFC 3339), embeddings as little-endian `f32` BLOBs, and
//! provenance as JSON TEXT columns. Rows that fail to decode surface as
//! [`StoreError::Corrupt`] rather than being silently skipped.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqliteRow};
use tracing::instrument;
use uuid::Uuid;

use super::{ChatStore, DocumentStore, Result, RetrievalCandidate, StoreError};
use crate::models::{
    ChatMessage, Chunk, Conversation, Document, DocumentStatus, Feedback, MessagePage, SourceRef,
};

const DOCUMENT_COLUMNS: &str = "id, owner_id, title, mime_type, size_bytes, status, \
     error_message, chunk_count, total_tokens, created_at, updated_at";

const CONVERSATION_COLUMNS: &str = "id, owner_id, title, system_prompt, created_at, updated_at";

const MESSAGE_COLUMNS: &str = "id, conversation_id, role, content, sources_json, model, \
     latency_ms, token_count, feedback, created_at";

fn backend(context: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend {
        message: format!("{context}: {e}"),
    }
}

fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| StoreError::Corrupt {
        message: format!("invalid uuid {raw:?}: {e}"),
    })
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            message: format!("invalid timestamp {raw:?}: {e}"),
        })
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

fn decode_embedding(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(StoreError::Corrupt {
            message: format!("embedding blob length {} is not a multiple of 4", blob.len()),
        });
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

fn document_from_row(row: &SqliteRow) -> Result<Document> {
    let id: String = row.try_get("id").map_err(|e| backend("id read", e))?;
    let status: String = row
        .try_get("status")
        .map_err(|e| backend("status read", e))?;
    let created_at: String = row
        .try_get("created_at")
        .map_err(|e| backend("created_at read", e))?;
    let updated_at: String = row
        .try_get("updated_at")
        .map_err(|e| backend("updated_at read", e))?;
    let size_bytes: i64 = row
        .try_get("size_bytes")
        .map_err(|e| backend("size_bytes read", e))?;

    Ok(Document {
        id: parse_id(&id)?,
        owner_id: row
            .try_get("owner_id")
            .map_err(|e| backend("owner_id read", e))?,
        title: row.try_get("title").map_err(|e| backend("title read", e))?,
        mime_type: row
            .try_get("mime_type")
            .map_err(|e| backend("mime_type read", e))?,
        size_bytes: size_bytes.max(0) as u64,
        status: DocumentStatus::parse(&status).ok_or_else(|| StoreError::Corrupt {
            message: format!("unknown document status {status:?}"),
        })?,
        error_message: row
            .try_get("error_message")
            .map_err(|e| backend("error_message read", e))?,
        chunk_count: row
            .try_get::<i64, _>("chunk_count")
            .map_err(|e| backend("chunk_count read", e))? as u32,
        total_tokens: row
            .try_get::<i64, _>("total_tokens")
            .map_err(|e| backend("total_tokens read", e))? as u32,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn chunk_from_row(row: &SqliteRow) -> Result<Chunk> {
    let id: String = row.try_get("id").map_err(|e| backend("id read", e))?;
    let document_id: String = row
        .try_get("document_id")
        .map_err(|e| backend("document_id read", e))?;
    let created_at: String = row
        .try_get("created_at")
        .map_err(|e| backend("created_at read", e))?;
    let embedding: Option<Vec<u8>> = row
        .try_get("embedding")
        .map_err(|e| backend("embedding read", e))?;
    let metadata_json: String = row
        .try_get("metadata_json")
        .map_err(|e| backend("metadata_json read", e))?;

    Ok(Chunk {
        id: parse_id(&id)?,
        document_id: parse_id(&document_id)?,
        chunk_index: row
            .try_get::<i64, _>("chunk_index")
            .map_err(|e| backend("chunk_index read", e))? as u32,
        content: row
            .try_get("content")
            .map_err(|e| backend("content read", e))?,
        token_count: row
            .try_get::<i64, _>("token_count")
            .map_err(|e| backend("token_count read", e))? as u32,
        embedding: embedding.as_deref().map(decode_embedding).transpose()?,
        metadata: serde_json::from_str(&metadata_json).map_err(|e| StoreError::Corrupt {
            message: format!("chunk metadata decode: {e}"),
        })?,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn conversation_from_row(row: &SqliteRow) -> Result<Conversation> {
    let id: String = row.try_get("id").map_err(|e| backend("id read", e))?;
    let created_at: String = row
        .try_get("created_at")
        .map_err(|e| backend("created_at read", e))?;
    let updated_at: String = row
        .try_get("updated_at")
        .map_err(|e| backend("updated_at read", e))?;

    Ok(Conversation {
        id: parse_id(&id)?,
        owner_id: row
            .try_get("owner_id")
            .map_err(|e| backend("owner_id read", e))?,
        title: row.try_get("title").map_err(|e| backend("title read", e))?,
        system_prompt: row
            .try_get("system_prompt")
            .map_err(|e| backend("system_prompt read", e))?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn message_from_row(row: &SqliteRow) -> Result<ChatMessage> {
    let id: String = row.try_get("id").map_err(|e| backend("id read", e))?;
    let conversation_id: String = row
        .try_get("conversation_id")
        .map_err(|e| backend("conversation_id read", e))?;
    let created_at: String = row
        .try_get("created_at")
        .map_err(|e| backend("created_at read", e))?;
    let sources_json: Option<String> = row
        .try_get("sources_json")
        .map_err(|e| backend("sources_json read", e))?;
    let latency_ms: Option<i64> = row
        .try_get("latency_ms")
        .map_err(|e| backend("latency_ms read", e))?;
    let token_count: Option<i64> = row
        .try_get("token_count")
        .map_err(|e| backend("token_count read", e))?;
    let feedback_raw: i64 = row
        .try_get("feedback")
        .map_err(|e| backend("feedback read", e))?;

    let sources: Vec<SourceRef> = match sources_json {
        Some(json) => serde_json::from_str(&json).map_err(|e| StoreError::Corrupt {
            message: format!("sources decode: {e}"),
        })?,
        None => Vec::new(),
    };
    let feedback = i8::try_from(feedback_raw)
        .ok()
        .and_then(|v| Feedback::try_from(v).ok())
        .ok_or_else(|| StoreError::Corrupt {
            message: format!("invalid feedback value {feedback_raw}"),
        })?;

    Ok(ChatMessage {
        id: parse_id(&id)?,
        conversation_id: parse_id(&conversation_id)?,
        role: row.try_get("role").map_err(|e| backend("role read", e))?,
        content: row
            .try_get("content")
            .map_err(|e| backend("content read", e))?,
        sources,
        model: row.try_get("model").map_err(|e| backend("model read", e))?,
        latency_ms: latency_ms.map(|v| v.max(0) as u64),
        token_count: token_count.map(|v| v.max(0) as u32),
        feedback,
        created_at: parse_timestamp(&created_at)?,
    })
}

/// SQLite-backed store implementing both [`DocumentStore`] and [`ChatStore`].
///
/// Clones share the underlying connection pool, so one value can serve both
/// trait positions.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Arc<SqlitePool>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish()
    }
}

impl SqliteStore {
    /// Connects to (creating if missing) the SQLite database at
    /// `database_url`, e.g. `sqlite://ragweave.db`.
    ///
    /// With the `sqlite-migrations` feature the embedded migrations run on
    /// every connect; they are idempotent. Without it, an external migration
    /// step is expected to have applied the schema.
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| backend("connect options", e))?
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(|e| backend("connect error", e))?;
        #[cfg(feature = "sqlite-migrations")]
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| backend("migration failure", e))?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    #[instrument(skip(self, document), err)]
    async fn create_document(&self, document: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (
                id, owner_id, title, mime_type, size_bytes, status,
                error_message, chunk_count, total_tokens, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(document.id.to_string())
        .bind(&document.owner_id)
        .bind(&document.title)
        .bind(&document.mime_type)
        .bind(document.size_bytes as i64)
        .bind(document.status.as_str())
        .bind(document.error_message.as_deref())
        .bind(i64::from(document.chunk_count))
        .bind(i64::from(document.total_tokens))
        .bind(document.created_at.to_rfc3339())
        .bind(document.updated_at.to_rfc3339())
        .execute(&*self.pool)
        .await
        .map_err(|e| backend("insert document", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn get_document(&self, owner_id: &str, document_id: Uuid) -> Result<Option<Document>> {
        let row_opt: Option<SqliteRow> = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1 AND owner_id = ?2"
        ))
        .bind(document_id.to_string())
        .bind(owner_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| backend("select document", e))?;

        row_opt.as_ref().map(document_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_documents(
        &self,
        owner_id: &str,
        status: Option<DocumentStatus>,
    ) -> Result<Vec<Document>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {DOCUMENT_COLUMNS} FROM documents \
                     WHERE owner_id = ?1 AND status = ?2 \
                     ORDER BY created_at DESC, id DESC"
                ))
                .bind(owner_id)
                .bind(status.as_str())
                .fetch_all(&*self.pool)
                .await
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {DOCUMENT_COLUMNS} FROM documents \
                     WHERE owner_id = ?1 \
                     ORDER BY created_at DESC, id DESC"
                ))
                .bind(owner_id)
                .fetch_all(&*self.pool)
                .await
            }
        }
        .map_err(|e| backend("list documents", e))?;

        rows.iter().map(document_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn count_documents(&self, owner_id: &str) -> Result<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM documents WHERE owner_id = ?1")
            .bind(owner_id)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| backend("count documents", e))?;
        let count: i64 = row.try_get("n").map_err(|e| backend("count read", e))?;
        Ok(count.max(0) as usize)
    }

    #[instrument(skip(self), err)]
    async fn delete_document(&self, owner_id: &str, document_id: Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(|e| backend("tx begin", e))?;

        let owned: Option<SqliteRow> =
            sqlx::query("SELECT id FROM documents WHERE id = ?1 AND owner_id = ?2")
                .bind(document_id.to_string())
                .bind(owner_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| backend("ownership check", e))?;
        if owned.is_none() {
            return Ok(false);
        }

        sqlx::query("DELETE FROM chunks WHERE document_id = ?1")
            .bind(document_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| backend("delete chunks", e))?;
        sqlx::query("DELETE FROM conversation_documents WHERE document_id = ?1")
            .bind(document_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| backend("delete links", e))?;
        sqlx::query("DELETE FROM documents WHERE id = ?1")
            .bind(document_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| backend("delete document", e))?;

        tx.commit().await.map_err(|e| backend("tx commit", e))?;
        Ok(true)
    }

    #[instrument(skip(self), err)]
    async fn mark_processing(&self, document_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE documents SET status = 'processing', updated_at = ?1 \
             WHERE id = ?2 AND status = 'pending'",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(document_id.to_string())
        .execute(&*self.pool)
        .await
        .map_err(|e| backend("mark processing", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, chunks), err)]
    async fn complete_document(
        &self,
        document_id: Uuid,
        chunks: Vec<Chunk>,
        total_tokens: u32,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(|e| backend("tx begin", e))?;

        // Claim the transition first; chunk inserts ride the same transaction
        // so a failure leaves no partial chunk set behind.
        let claimed = sqlx::query(
            "UPDATE documents SET status = 'ready', chunk_count = ?1, total_tokens = ?2, \
             error_message = NULL, updated_at = ?3 \
             WHERE id = ?4 AND status = 'processing'",
        )
        .bind(chunks.len() as i64)
        .bind(i64::from(total_tokens))
        .bind(Utc::now().to_rfc3339())
        .bind(document_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| backend("complete document", e))?;
        if claimed.rows_affected() == 0 {
            return Ok(false);
        }

        for chunk in &chunks {
            let metadata_json =
                serde_json::to_string(&chunk.metadata).map_err(|e| backend("encode metadata", e))?;
            sqlx::query(
                r#"
                INSERT INTO chunks (
                    id, document_id, chunk_index, content, token_count,
                    embedding, metadata_json, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )
            .bind(chunk.id.to_string())
            .bind(chunk.document_id.to_string())
            .bind(i64::from(chunk.chunk_index))
            .bind(&chunk.content)
            .bind(i64::from(chunk.token_count))
            .bind(chunk.embedding.as_deref().map(encode_embedding))
            .bind(metadata_json)
            .bind(chunk.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(|e| backend("insert chunk", e))?;
        }

        tx.commit().await.map_err(|e| backend("tx commit", e))?;
        Ok(true)
    }

    #[instrument(skip(self, error_message), err)]
    async fn fail_document(&self, document_id: Uuid, error_message: &str) -> Result<()> {
        sqlx::query(
            "UPDATE documents SET status = 'failed', error_message = ?1, updated_at = ?2 \
             WHERE id = ?3",
        )
        .bind(error_message)
        .bind(Utc::now().to_rfc3339())
        .bind(document_id.to_string())
        .execute(&*self.pool)
        .await
        .map_err(|e| backend("fail document", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn list_chunks(&self, owner_id: &str, document_id: Uuid) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.document_id, c.chunk_index, c.content, c.token_count,
                   c.embedding, c.metadata_json, c.created_at
            FROM chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE c.document_id = ?1 AND d.owner_id = ?2
            ORDER BY c.chunk_index
            "#,
        )
        .bind(document_id.to_string())
        .bind(owner_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| backend("list chunks", e))?;

        rows.iter().map(chunk_from_row).collect()
    }

    #[instrument(skip(self, document_ids), err)]
    async fn candidate_chunks(
        &self,
        owner_id: &str,
        document_ids: Option<&[Uuid]>,
    ) -> Result<Vec<RetrievalCandidate>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.document_id, c.chunk_index, c.content, c.token_count,
                   c.embedding, c.metadata_json, c.created_at,
                   d.title AS document_title
            FROM chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE d.owner_id = ?1 AND d.status = 'ready' AND c.embedding IS NOT NULL
            "#,
        )
        .bind(owner_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| backend("candidate chunks", e))?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            let chunk = chunk_from_row(row)?;
            let document_title: String = row
                .try_get("document_title")
                .map_err(|e| backend("document_title read", e))?;
            candidates.push(RetrievalCandidate {
                chunk,
                document_title,
            });
        }
        if let Some(ids) = document_ids {
            candidates.retain(|c| ids.contains(&c.chunk.document_id));
        }
        Ok(candidates)
    }
}

#[async_trait]
impl ChatStore for SqliteStore {
    #[instrument(skip(self, conversation, document_ids), err)]
    async fn create_conversation(
        &self,
        conversation: &Conversation,
        document_ids: &[Uuid],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| backend("tx begin", e))?;

        sqlx::query(
            "INSERT INTO conversations (id, owner_id, title, system_prompt, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(conversation.id.to_string())
        .bind(&conversation.owner_id)
        .bind(&conversation.title)
        .bind(conversation.system_prompt.as_deref())
        .bind(conversation.created_at.to_rfc3339())
        .bind(conversation.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| backend("insert conversation", e))?;

        for document_id in document_ids {
            sqlx::query(
                "INSERT OR IGNORE INTO conversation_documents (conversation_id, document_id) \
                 VALUES (?1, ?2)",
            )
            .bind(conversation.id.to_string())
            .bind(document_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| backend("insert link", e))?;
        }

        tx.commit().await.map_err(|e| backend("tx commit", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn get_conversation(
        &self,
        owner_id: &str,
        conversation_id: Uuid,
    ) -> Result<Option<Conversation>> {
        let row_opt: Option<SqliteRow> = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1 AND owner_id = ?2"
        ))
        .bind(conversation_id.to_string())
        .bind(owner_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| backend("select conversation", e))?;

        row_opt.as_ref().map(conversation_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_conversations(&self, owner_id: &str) -> Result<Vec<Conversation>> {
        let rows = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE owner_id = ?1 ORDER BY updated_at DESC, id DESC"
        ))
        .bind(owner_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| backend("list conversations", e))?;

        rows.iter().map(conversation_from_row).collect()
    }

    #[instrument(skip(self, title, system_prompt), err)]
    async fn update_conversation(
        &self,
        owner_id: &str,
        conversation_id: Uuid,
        title: Option<&str>,
        system_prompt: Option<&str>,
    ) -> Result<Option<Conversation>> {
        let Some(existing) = self.get_conversation(owner_id, conversation_id).await? else {
            return Ok(None);
        };

        let new_title = title.unwrap_or(&existing.title);
        let new_prompt = system_prompt.or(existing.system_prompt.as_deref());
        sqlx::query(
            "UPDATE conversations SET title = ?1, system_prompt = ?2, updated_at = ?3 \
             WHERE id = ?4",
        )
        .bind(new_title)
        .bind(new_prompt)
        .bind(Utc::now().to_rfc3339())
        .bind(conversation_id.to_string())
        .execute(&*self.pool)
        .await
        .map_err(|e| backend("update conversation", e))?;

        self.get_conversation(owner_id, conversation_id).await
    }

    #[instrument(skip(self), err)]
    async fn delete_conversation(&self, owner_id: &str, conversation_id: Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(|e| backend("tx begin", e))?;

        let owned: Option<SqliteRow> =
            sqlx::query("SELECT id FROM conversations WHERE id = ?1 AND owner_id = ?2")
                .bind(conversation_id.to_string())
                .bind(owner_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| backend("ownership check", e))?;
        if owned.is_none() {
            return Ok(false);
        }

        sqlx::query("DELETE FROM messages WHERE conversation_id = ?1")
            .bind(conversation_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| backend("delete messages", e))?;
        sqlx::query("DELETE FROM conversation_documents WHERE conversation_id = ?1")
            .bind(conversation_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| backend("delete links", e))?;
        sqlx::query("DELETE FROM conversations WHERE id = ?1")
            .bind(conversation_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| backend("delete conversation", e))?;

        tx.commit().await.map_err(|e| backend("tx commit", e))?;
        Ok(true)
    }

    #[instrument(skip(self), err)]
    async fn linked_document_ids(&self, conversation_id: Uuid) -> Result<Vec<Uuid>> {
        let rows = sqlx::query(
            "SELECT document_id FROM conversation_documents \
             WHERE conversation_id = ?1 ORDER BY rowid",
        )
        .bind(conversation_id.to_string())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| backend("list links", e))?;

        rows.iter()
            .map(|row| {
                let raw: String = row
                    .try_get("document_id")
                    .map_err(|e| backend("document_id read", e))?;
                parse_id(&raw)
            })
            .collect()
    }

    #[instrument(skip(self, message), err)]
    async fn append_message(&self, message: &ChatMessage) -> Result<()> {
        let sources_json =
            serde_json::to_string(&message.sources).map_err(|e| backend("encode sources", e))?;

        let mut tx = self.pool.begin().await.map_err(|e| backend("tx begin", e))?;

        sqlx::query(&format!(
            "INSERT INTO messages ({MESSAGE_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
        ))
        .bind(message.id.to_string())
        .bind(message.conversation_id.to_string())
        .bind(&message.role)
        .bind(&message.content)
        .bind(sources_json)
        .bind(message.model.as_deref())
        .bind(message.latency_ms.map(|v| v as i64))
        .bind(message.token_count.map(i64::from))
        .bind(i64::from(message.feedback.as_i8()))
        .bind(message.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| backend("insert message", e))?;

        sqlx::query("UPDATE conversations SET updated_at = ?1 WHERE id = ?2")
            .bind(Utc::now().to_rfc3339())
            .bind(message.conversation_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| backend("touch conversation", e))?;

        tx.commit().await.map_err(|e| backend("tx commit", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn list_messages(
        &self,
        conversation_id: Uuid,
        limit: usize,
        before: Option<Uuid>,
    ) -> Result<MessagePage> {
        // Fetch one extra row to learn whether an older page exists. Cursor
        // comparison uses rowid, which follows insertion order; an unknown
        // cursor makes the subquery NULL and the page empty.
        let fetch = (limit as i64).saturating_add(1);
        let rows = match before {
            Some(cursor) => {
                sqlx::query(&format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages \
                     WHERE conversation_id = ?1 \
                       AND rowid < (SELECT rowid FROM messages \
                                    WHERE id = ?2 AND conversation_id = ?1) \
                     ORDER BY rowid DESC LIMIT ?3"
                ))
                .bind(conversation_id.to_string())
                .bind(cursor.to_string())
                .bind(fetch)
                .fetch_all(&*self.pool)
                .await
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages \
                     WHERE conversation_id = ?1 \
                     ORDER BY rowid DESC LIMIT ?2"
                ))
                .bind(conversation_id.to_string())
                .bind(fetch)
                .fetch_all(&*self.pool)
                .await
            }
        }
        .map_err(|e| backend("list messages", e))?;

        let has_more = rows.len() > limit;
        let mut messages = rows
            .iter()
            .take(limit)
            .map(message_from_row)
            .collect::<Result<Vec<_>>>()?;
        messages.reverse();
        Ok(MessagePage { messages, has_more })
    }

    #[instrument(skip(self), err)]
    async fn set_feedback(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        feedback: Feedback,
    ) -> Result<Option<ChatMessage>> {
        let result = sqlx::query(
            "UPDATE messages SET feedback = ?1 WHERE id = ?2 AND conversation_id = ?3",
        )
        .bind(i64::from(feedback.as_i8()))
        .bind(message_id.to_string())
        .bind(conversation_id.to_string())
        .execute(&*self.pool)
        .await
        .map_err(|e| backend("set feedback", e))?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }

        let row_opt: Option<SqliteRow> = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1 AND conversation_id = ?2"
        ))
        .bind(message_id.to_string())
        .bind(conversation_id.to_string())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| backend("reload message", e))?;

        row_opt.as_ref().map(message_from_row).transpose()
    }
}
