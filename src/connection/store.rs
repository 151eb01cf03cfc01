//! The persistent store (§6): a document store for connection records and
//! token records, shared across server instances and partitioned in
//! practice by `serverId` (§5). Treated as an external collaborator by the
//! spec, but a concrete backend is needed for this crate to run — the
//! Postgres implementation below keeps the teacher's stack (`sqlx`) while
//! modeling each collection as a JSONB document, since the spec describes a
//! document store rather than a relational schema.
//!
//! Collection names (`morrigan.connections`, `morrigan.connections.tokens`)
//! are compatibility-critical per §6 and are used verbatim as quoted
//! Postgres identifiers.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppResult;

use super::record::ConnectionRecord;

/// A token record (§3 `I5`): cleanup deletes both this and its owning
/// `ConnectionRecord`. The token's cryptographic validity is owned by the
/// `ConnectionTokenIssuer`; this row only tracks the id/expiry pairing so
/// the store can enforce I5 and so an expired, never-upgraded token can be
/// garbage-collected independently of its connection record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionTokenRecord {
    pub token_id: Uuid,
    pub connection_id: Uuid,
    pub expires: DateTime<Utc>,
}

#[async_trait]
pub trait ConnectionStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<ConnectionRecord>>;
    async fn find_by_client_id(&self, client_id: &str) -> AppResult<Option<ConnectionRecord>>;
    async fn find_all(&self) -> AppResult<Vec<ConnectionRecord>>;
    async fn upsert(&self, record: &ConnectionRecord) -> AppResult<()>;
    async fn delete_by_id(&self, id: Uuid) -> AppResult<()>;

    async fn insert_token(&self, token: &ConnectionTokenRecord) -> AppResult<()>;
    async fn delete_token(&self, token_id: Uuid) -> AppResult<()>;
}

// ============================================================================
// Postgres-backed document store
// ============================================================================

pub struct PgConnectionStore {
    pool: PgPool,
}

impl PgConnectionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the two compatibility-critical collections if they do not
    /// already exist. Safe to call on every startup.
    pub async fn ensure_schema(&self) -> AppResult<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS "morrigan.connections" (
                id UUID PRIMARY KEY,
                client_id TEXT NOT NULL,
                document JSONB NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE INDEX IF NOT EXISTS "morrigan_connections_client_id_idx"
               ON "morrigan.connections" (client_id)"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS "morrigan.connections.tokens" (
                token_id UUID PRIMARY KEY,
                connection_id UUID NOT NULL,
                expires TIMESTAMPTZ NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ConnectionStore for PgConnectionStore {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<ConnectionRecord>> {
        let row: Option<(serde_json::Value,)> = sqlx::query_as(
            r#"SELECT document FROM "morrigan.connections" WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .map(|(doc,)| serde_json::from_value(doc))
            .transpose()
            .map_err(|_| sqlx::Error::Decode("corrupt connection document".into()))?)
    }

    async fn find_by_client_id(&self, client_id: &str) -> AppResult<Option<ConnectionRecord>> {
        let row: Option<(serde_json::Value,)> = sqlx::query_as(
            r#"SELECT document FROM "morrigan.connections" WHERE client_id = $1
               ORDER BY (document->>'timeout') DESC NULLS FIRST LIMIT 1"#,
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .map(|(doc,)| serde_json::from_value(doc))
            .transpose()
            .map_err(|_| sqlx::Error::Decode("corrupt connection document".into()))?)
    }

    async fn find_all(&self) -> AppResult<Vec<ConnectionRecord>> {
        let rows: Vec<(serde_json::Value,)> =
            sqlx::query_as(r#"SELECT document FROM "morrigan.connections""#)
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter()
            .map(|(doc,)| {
                serde_json::from_value(doc)
                    .map_err(|_| sqlx::Error::Decode("corrupt connection document".into()).into())
            })
            .collect()
    }

    async fn upsert(&self, record: &ConnectionRecord) -> AppResult<()> {
        let document = serde_json::to_value(record)
            .map_err(|_| sqlx::Error::Encode("failed to encode connection document".into()))?;

        sqlx::query(
            r#"INSERT INTO "morrigan.connections" (id, client_id, document)
               VALUES ($1, $2, $3)
               ON CONFLICT (id) DO UPDATE SET client_id = $2, document = $3"#,
        )
        .bind(record.id)
        .bind(&record.client_id)
        .bind(document)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_by_id(&self, id: Uuid) -> AppResult<()> {
        sqlx::query(r#"DELETE FROM "morrigan.connections" WHERE id = $1"#)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_token(&self, token: &ConnectionTokenRecord) -> AppResult<()> {
        sqlx::query(
            r#"INSERT INTO "morrigan.connections.tokens" (token_id, connection_id, expires)
               VALUES ($1, $2, $3)
               ON CONFLICT (token_id) DO UPDATE SET connection_id = $2, expires = $3"#,
        )
        .bind(token.token_id)
        .bind(token.connection_id)
        .bind(token.expires)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_token(&self, token_id: Uuid) -> AppResult<()> {
        sqlx::query(r#"DELETE FROM "morrigan.connections.tokens" WHERE token_id = $1"#)
            .bind(token_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ============================================================================
// In-memory store — test double, and good enough for local experimentation
// without a Postgres instance.
// ============================================================================

#[derive(Default)]
pub struct InMemoryConnectionStore {
    records: RwLock<HashMap<Uuid, ConnectionRecord>>,
    tokens: RwLock<HashMap<Uuid, ConnectionTokenRecord>>,
}

impl InMemoryConnectionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConnectionStore for InMemoryConnectionStore {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<ConnectionRecord>> {
        Ok(self.records.read().unwrap().get(&id).cloned())
    }

    async fn find_by_client_id(&self, client_id: &str) -> AppResult<Option<ConnectionRecord>> {
        Ok(self
            .records
            .read()
            .unwrap()
            .values()
            .find(|r| r.client_id == client_id)
            .cloned())
    }

    async fn find_all(&self) -> AppResult<Vec<ConnectionRecord>> {
        Ok(self.records.read().unwrap().values().cloned().collect())
    }

    async fn upsert(&self, record: &ConnectionRecord) -> AppResult<()> {
        self.records
            .write()
            .unwrap()
            .insert(record.id, record.clone());
        Ok(())
    }

    async fn delete_by_id(&self, id: Uuid) -> AppResult<()> {
        self.records.write().unwrap().remove(&id);
        Ok(())
    }

    async fn insert_token(&self, token: &ConnectionTokenRecord) -> AppResult<()> {
        self.tokens
            .write()
            .unwrap()
            .insert(token.token_id, token.clone());
        Ok(())
    }

    async fn delete_token(&self, token_id: Uuid) -> AppResult<()> {
        self.tokens.write().unwrap().remove(&token_id);
        Ok(())
    }
}
