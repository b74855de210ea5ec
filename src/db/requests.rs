//! Request store on Postgres.
//!
//! Every transition is one `UPDATE ... WHERE <precondition> RETURNING`, so a
//! racing writer either sees the new row or matches zero rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use uuid::Uuid;

use super::Db;
use crate::backoff::RetryPolicy;
use crate::error::{Error, Result};
use crate::model::{InviteRequest, RequestId, RequestStatus};
use crate::store::{JoinTransition, RequestStore};
use crate::telemetry::metrics;

const COLUMNS: &str = "id, user_id, correlation_id, status, attempts, invite_link, \
     created_notified, joined, member_id, joined_at, last_error, created_at, updated_at";

fn record_transition(from: &str, to: RequestStatus) {
    metrics::request_state_transitions().add(
        1,
        &[
            KeyValue::new("from", from.to_string()),
            KeyValue::new("to", to.to_string()),
        ],
    );
}

#[async_trait]
impl RequestStore for Db {
    async fn insert_request(&self, request: &InviteRequest) -> Result<()> {
        sqlx::query(
            "INSERT INTO invite_requests (id, user_id, correlation_id, status, attempts, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $6)",
        )
        .bind(request.id.0)
        .bind(&request.user_id)
        .bind(&request.correlation_id)
        .bind(request.status.as_str())
        .bind(request.attempts as i32)
        .bind(request.created_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn get_request(&self, id: RequestId) -> Result<Option<InviteRequest>> {
        let row: Option<InviteRequestRow> =
            sqlx::query_as(&format!("SELECT {COLUMNS} FROM invite_requests WHERE id = $1"))
                .bind(id.0)
                .fetch_optional(self.pool())
                .await?;
        row.map(InviteRequestRow::try_into_request).transpose()
    }

    async fn claim_attempt(
        &self,
        id: RequestId,
        policy: &RetryPolicy,
    ) -> Result<Option<InviteRequest>> {
        // SET expressions see the pre-update row, so `attempts + 1` is the new count.
        // The CASE is `RetryPolicy::exhausted` in SQL.
        let row: Option<InviteRequestRow> = sqlx::query_as(&format!(
            "UPDATE invite_requests
             SET attempts = attempts + 1,
                 status = CASE WHEN attempts + 1 > $2 THEN 'failed' ELSE 'processing' END,
                 updated_at = now()
             WHERE id = $1 AND status IN ('queued', 'processing')
             RETURNING {COLUMNS}"
        ))
        .bind(id.0)
        .bind(i32::try_from(policy.max_attempts).unwrap_or(i32::MAX))
        .fetch_optional(self.pool())
        .await?;

        let claimed = row.map(InviteRequestRow::try_into_request).transpose()?;
        if let Some(ref request) = claimed {
            debug_assert_eq!(
                policy.exhausted(request.attempts),
                request.status == RequestStatus::Failed
            );
            record_transition("claimable", request.status);
        }
        Ok(claimed)
    }

    async fn requeue(&self, id: RequestId, error: &str) -> Result<bool> {
        let rows = sqlx::query(
            "UPDATE invite_requests
             SET status = 'queued', last_error = $2, updated_at = now()
             WHERE id = $1 AND status = 'processing'",
        )
        .bind(id.0)
        .bind(error)
        .execute(self.pool())
        .await?
        .rows_affected();

        if rows > 0 {
            record_transition("processing", RequestStatus::Queued);
        }
        Ok(rows > 0)
    }

    async fn complete(&self, id: RequestId, invite_link: &str) -> Result<Option<InviteRequest>> {
        let row: Option<InviteRequestRow> = sqlx::query_as(&format!(
            "UPDATE invite_requests
             SET status = 'done', invite_link = $2, last_error = NULL, updated_at = now()
             WHERE id = $1 AND status = 'processing'
             RETURNING {COLUMNS}"
        ))
        .bind(id.0)
        .bind(invite_link)
        .fetch_optional(self.pool())
        .await?;

        let done = row.map(InviteRequestRow::try_into_request).transpose()?;
        if done.is_some() {
            record_transition("processing", RequestStatus::Done);
        }
        Ok(done)
    }

    async fn mark_created_notified(&self, id: RequestId) -> Result<bool> {
        let rows = sqlx::query(
            "UPDATE invite_requests SET created_notified = true, updated_at = now()
             WHERE id = $1 AND created_notified = false",
        )
        .bind(id.0)
        .execute(self.pool())
        .await?
        .rows_affected();
        Ok(rows > 0)
    }

    async fn mark_joined(
        &self,
        id: RequestId,
        member_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<JoinTransition> {
        let row: Option<InviteRequestRow> = sqlx::query_as(&format!(
            "UPDATE invite_requests
             SET joined = true, joined_at = $2, member_id = COALESCE(member_id, $3), updated_at = now()
             WHERE id = $1 AND joined = false
             RETURNING {COLUMNS}"
        ))
        .bind(id.0)
        .bind(at)
        .bind(member_id)
        .fetch_optional(self.pool())
        .await?;

        if let Some(row) = row {
            return Ok(JoinTransition::Joined(row.try_into_request()?));
        }

        // Zero rows: either already joined or no such record.
        let exists: Option<(bool,)> = sqlx::query_as("SELECT joined FROM invite_requests WHERE id = $1")
            .bind(id.0)
            .fetch_optional(self.pool())
            .await?;
        Ok(match exists {
            Some(_) => JoinTransition::AlreadyJoined,
            None => JoinTransition::Missing,
        })
    }
}

impl Db {
    /// Most recent requests, newest first. Used by the CLI.
    pub async fn list_requests(
        &self,
        status: Option<RequestStatus>,
        limit: i64,
    ) -> Result<Vec<InviteRequest>> {
        let rows: Vec<InviteRequestRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM invite_requests
             WHERE ($1::text IS NULL OR status = $1)
             ORDER BY created_at DESC
             LIMIT $2"
        ))
        .bind(status.map(|s| s.as_str()))
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter()
            .map(InviteRequestRow::try_into_request)
            .collect()
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct InviteRequestRow {
    id: Uuid,
    user_id: String,
    correlation_id: Option<String>,
    status: String,
    attempts: i32,
    invite_link: Option<String>,
    created_notified: bool,
    joined: bool,
    member_id: Option<String>,
    joined_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl InviteRequestRow {
    fn try_into_request(self) -> Result<InviteRequest> {
        let attempts = u32::try_from(self.attempts)
            .map_err(|_| Error::Other(format!("negative attempts on request {}", self.id)))?;
        Ok(InviteRequest {
            id: RequestId(self.id),
            user_id: self.user_id,
            correlation_id: self.correlation_id,
            status: self.status.parse()?,
            attempts,
            invite_link: self.invite_link,
            created_notified: self.created_notified,
            joined: self.joined,
            member_id: self.member_id,
            joined_at: self.joined_at,
            last_error: self.last_error,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
