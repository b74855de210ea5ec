//! Link index on Postgres, keyed by invite digest.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::error;
use uuid::Uuid;

use super::Db;
use crate::error::{Error, Result};
use crate::model::{Digest, LinkEntry, RequestId};
use crate::store::LinkIndex;

#[async_trait]
impl LinkIndex for Db {
    async fn put_link(&self, entry: &LinkEntry) -> Result<()> {
        let inserted = sqlx::query(
            "INSERT INTO invite_links (digest, request_id, user_id, correlation_id, member_id, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (digest) DO NOTHING",
        )
        .bind(entry.digest.as_str())
        .bind(entry.request_id.0)
        .bind(&entry.user_id)
        .bind(&entry.correlation_id)
        .bind(&entry.member_id)
        .bind(entry.created_at)
        .execute(self.pool())
        .await?
        .rows_affected();

        if inserted > 0 {
            return Ok(());
        }

        let (owner,): (Uuid,) =
            sqlx::query_as("SELECT request_id FROM invite_links WHERE digest = $1")
                .bind(entry.digest.as_str())
                .fetch_one(self.pool())
                .await?;
        if owner == entry.request_id.0 {
            return Ok(());
        }

        error!(
            digest = %entry.digest,
            existing = %owner,
            rejected = %entry.request_id,
            "link digest collision, keeping existing owner"
        );
        Err(Error::LinkConflict {
            digest: entry.digest.to_string(),
            existing: owner.to_string(),
        })
    }

    async fn get_link(&self, digest: &Digest) -> Result<Option<LinkEntry>> {
        let row: Option<LinkEntryRow> = sqlx::query_as(
            "SELECT digest, request_id, user_id, correlation_id, member_id, created_at
             FROM invite_links WHERE digest = $1",
        )
        .bind(digest.as_str())
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(LinkEntryRow::into_entry))
    }

    async fn backfill_member(&self, digest: &Digest, member_id: &str) -> Result<bool> {
        let rows = sqlx::query(
            "UPDATE invite_links SET member_id = $2 WHERE digest = $1 AND member_id IS NULL",
        )
        .bind(digest.as_str())
        .bind(member_id)
        .execute(self.pool())
        .await?
        .rows_affected();
        Ok(rows > 0)
    }
}

#[derive(sqlx::FromRow)]
struct LinkEntryRow {
    digest: String,
    request_id: Uuid,
    user_id: String,
    correlation_id: Option<String>,
    member_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl LinkEntryRow {
    fn into_entry(self) -> LinkEntry {
        LinkEntry {
            digest: Digest(self.digest),
            request_id: RequestId(self.request_id),
            user_id: self.user_id,
            correlation_id: self.correlation_id,
            member_id: self.member_id,
            created_at: self.created_at,
        }
    }
}
