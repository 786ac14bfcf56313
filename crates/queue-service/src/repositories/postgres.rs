//! PostgreSQL implementation of [`QueueStore`].
//!
//! # Concurrency
//!
//! - Join and leave lock the queue row (`SELECT ... FOR UPDATE`) inside their
//!   transaction, so position assignment and compaction are serialized per
//!   queue even across processes. Join re-checks the open window on the
//!   locked row, so it cannot land in a queue closed after validation.
//! - A partial unique index on `(queue_id, user_id) WHERE exited_at IS NULL`
//!   backs the one-active-entry rule; a violation maps to `AlreadyMember`.
//! - The close flip is one conditional `UPDATE ... RETURNING`, so concurrent
//!   runs can never both observe the same transition.

use super::store::QueueStore;
use crate::errors::QueueError;
use crate::models::{
    split_group_ids, NewQueue, Participant, Queue, QueueEntry, QueueSnapshot, Schedule,
    UserQueueItem,
};
use chrono::{DateTime, Utc};
use common::types::{QueueId, ScheduleId, UserId};
use sqlx::PgPool;
use tracing::instrument;

const QUEUE_COLUMNS: &str = "id, schedule_id, opens_at, closes_at, is_active, max_participants";

/// Store backed by a PostgreSQL pool.
#[derive(Clone)]
pub struct PgQueueStore {
    pool: PgPool,
}

impl PgQueueStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl QueueStore for PgQueueStore {
    #[instrument(skip_all, fields(queue_id = %queue_id))]
    async fn get_queue(&self, queue_id: QueueId) -> Result<Option<Queue>, QueueError> {
        let row: Option<QueueRow> =
            sqlx::query_as(&format!("SELECT {QUEUE_COLUMNS} FROM queues WHERE id = $1"))
                .bind(queue_id.0)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(Queue::from))
    }

    #[instrument(skip_all, fields(queue_id = %queue_id, user_id = %user_id))]
    async fn find_active_entry(
        &self,
        queue_id: QueueId,
        user_id: UserId,
    ) -> Result<Option<QueueEntry>, QueueError> {
        let row: Option<EntryRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, queue_id, position, exited_at
            FROM queue_entries
            WHERE queue_id = $1 AND user_id = $2 AND exited_at IS NULL
            "#,
        )
        .bind(queue_id.0)
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(QueueEntry::from))
    }

    #[instrument(skip_all, fields(queue_id = %queue_id))]
    async fn count_active_entries(&self, queue_id: QueueId) -> Result<i64, QueueError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM queue_entries WHERE queue_id = $1 AND exited_at IS NULL",
        )
        .bind(queue_id.0)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    #[instrument(skip_all, fields(queue_id = %queue_id, user_id = %user_id))]
    async fn append_entry(
        &self,
        queue_id: QueueId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry, QueueError> {
        let mut tx = self.pool.begin().await?;

        // The row lock also blocks the close flip until this commits.
        let locked: Option<QueueRow> = sqlx::query_as(&format!(
            "SELECT {QUEUE_COLUMNS} FROM queues WHERE id = $1 FOR UPDATE"
        ))
        .bind(queue_id.0)
        .fetch_optional(&mut *tx)
        .await?;
        match locked.map(Queue::from) {
            None => return Err(QueueError::NotFound),
            Some(queue) if !queue.is_open_at(now) => return Err(QueueError::Inactive),
            Some(_) => {}
        }

        let next_position: i32 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(MAX(position), 0) + 1
            FROM queue_entries
            WHERE queue_id = $1 AND exited_at IS NULL
            "#,
        )
        .bind(queue_id.0)
        .fetch_one(&mut *tx)
        .await?;

        let inserted: Result<EntryRow, sqlx::Error> = sqlx::query_as(
            r#"
            INSERT INTO queue_entries (user_id, queue_id, position)
            VALUES ($1, $2, $3)
            RETURNING id, user_id, queue_id, position, exited_at
            "#,
        )
        .bind(user_id.0)
        .bind(queue_id.0)
        .bind(next_position)
        .fetch_one(&mut *tx)
        .await;

        let row = match inserted {
            Ok(row) => row,
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                return Err(QueueError::AlreadyMember);
            }
            Err(e) => return Err(e.into()),
        };

        tx.commit().await?;
        Ok(QueueEntry::from(row))
    }

    #[instrument(skip_all, fields(queue_id = %queue_id, user_id = %user_id))]
    async fn exit_entry(
        &self,
        queue_id: QueueId,
        user_id: UserId,
        exited_at: DateTime<Utc>,
    ) -> Result<Option<i32>, QueueError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT id FROM queues WHERE id = $1 FOR UPDATE")
            .bind(queue_id.0)
            .execute(&mut *tx)
            .await?;

        let left_position: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE queue_entries
            SET exited_at = $3
            WHERE queue_id = $1 AND user_id = $2 AND exited_at IS NULL
            RETURNING position
            "#,
        )
        .bind(queue_id.0)
        .bind(user_id.0)
        .bind(exited_at)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(left_position) = left_position else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query(
            r#"
            UPDATE queue_entries
            SET position = position - 1
            WHERE queue_id = $1 AND exited_at IS NULL AND position > $2
            "#,
        )
        .bind(queue_id.0)
        .bind(left_position)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(left_position))
    }

    #[instrument(skip_all, fields(queue_id = %queue_id))]
    async fn queue_snapshot(&self, queue_id: QueueId) -> Result<Option<QueueSnapshot>, QueueError> {
        // Both reads see the same committed state.
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await?;

        let queue: Option<QueueRow> =
            sqlx::query_as(&format!("SELECT {QUEUE_COLUMNS} FROM queues WHERE id = $1"))
                .bind(queue_id.0)
                .fetch_optional(&mut *tx)
                .await?;

        let Some(queue) = queue.map(Queue::from) else {
            tx.rollback().await?;
            return Ok(None);
        };

        let rows: Vec<ParticipantRow> = sqlx::query_as(PARTICIPANTS_QUERY)
            .bind(queue_id.0)
            .fetch_all(&mut *tx)
            .await?;

        tx.commit().await?;

        let participants = rows.into_iter().map(Participant::from).collect();
        Ok(Some(QueueSnapshot::new(&queue, participants)))
    }

    #[instrument(skip_all)]
    async fn list_active_queues(&self) -> Result<Vec<Queue>, QueueError> {
        let rows: Vec<QueueRow> = sqlx::query_as(&format!(
            "SELECT {QUEUE_COLUMNS} FROM queues WHERE is_active ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Queue::from).collect())
    }

    #[instrument(skip_all)]
    async fn expired_active_queues(&self, now: DateTime<Utc>) -> Result<Vec<Queue>, QueueError> {
        let rows: Vec<QueueRow> = sqlx::query_as(&format!(
            "SELECT {QUEUE_COLUMNS} FROM queues WHERE is_active AND closes_at <= $1 ORDER BY id"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Queue::from).collect())
    }

    #[instrument(skip_all, fields(queue_id = %queue_id))]
    async fn close_queue_if_expired(
        &self,
        queue_id: QueueId,
        now: DateTime<Utc>,
    ) -> Result<Option<Queue>, QueueError> {
        let row: Option<QueueRow> = sqlx::query_as(&format!(
            r#"
            UPDATE queues
            SET is_active = false
            WHERE id = $1 AND is_active AND closes_at <= $2
            RETURNING {QUEUE_COLUMNS}
            "#
        ))
        .bind(queue_id.0)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Queue::from))
    }

    #[instrument(skip_all)]
    async fn upcoming_schedules_without_queue(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Schedule>, QueueError> {
        let rows: Vec<ScheduleRow> = sqlx::query_as(
            r#"
            SELECT s.id, s.external_id, s.name, s.start_time, s.end_time, s.group_ids
            FROM schedules s
            WHERE s.start_time BETWEEN $1 AND $2
              AND NOT EXISTS (SELECT 1 FROM queues q WHERE q.schedule_id = s.id)
            ORDER BY s.start_time, s.id
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Schedule::from).collect())
    }

    #[instrument(skip_all, fields(schedule_id = %new_queue.schedule_id))]
    async fn create_queue(&self, new_queue: NewQueue) -> Result<Option<Queue>, QueueError> {
        let row: Option<QueueRow> = sqlx::query_as(&format!(
            r#"
            INSERT INTO queues (schedule_id, opens_at, closes_at, is_active, max_participants)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (schedule_id) DO NOTHING
            RETURNING {QUEUE_COLUMNS}
            "#
        ))
        .bind(new_queue.schedule_id.0)
        .bind(new_queue.opens_at)
        .bind(new_queue.closes_at)
        .bind(new_queue.is_active)
        .bind(new_queue.max_participants)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Queue::from))
    }

    #[instrument(skip_all)]
    async fn purge_schedules_ended_before(&self, cutoff: DateTime<Utc>) -> Result<u64, QueueError> {
        let result = sqlx::query("DELETE FROM schedules WHERE end_time < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    #[instrument(skip_all)]
    async fn purge_queues_closed_before(&self, cutoff: DateTime<Utc>) -> Result<u64, QueueError> {
        let result = sqlx::query("DELETE FROM queues WHERE NOT is_active AND closes_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    #[instrument(skip_all, fields(user_id = %user_id))]
    async fn active_entries_for_user(&self, user_id: UserId) -> Result<Vec<UserQueueItem>, QueueError> {
        let rows: Vec<UserQueueRow> = sqlx::query_as(
            r#"
            SELECT
                qe.queue_id,
                qe.position,
                q.schedule_id,
                s.name AS schedule_name,
                s.start_time,
                s.end_time,
                s.group_ids,
                q.opens_at,
                q.closes_at,
                q.is_active
            FROM queue_entries qe
            JOIN queues q ON q.id = qe.queue_id
            JOIN schedules s ON s.id = q.schedule_id
            WHERE qe.user_id = $1 AND qe.exited_at IS NULL
            ORDER BY s.start_time, qe.queue_id
            "#,
        )
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(UserQueueItem::from).collect())
    }

    async fn ping(&self) -> Result<(), QueueError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

const PARTICIPANTS_QUERY: &str = r#"
    SELECT
        qe.user_id,
        COALESCE(u.name, '') AS name,
        COALESCE(u.surname, '') AS surname,
        qe.position
    FROM queue_entries qe
    LEFT JOIN users u ON u.id = qe.user_id
    WHERE qe.queue_id = $1 AND qe.exited_at IS NULL
    ORDER BY qe.position
"#;

// ============================================================================
// Database Row Types
// ============================================================================

#[derive(sqlx::FromRow)]
struct QueueRow {
    id: i64,
    schedule_id: i64,
    opens_at: DateTime<Utc>,
    closes_at: DateTime<Utc>,
    is_active: bool,
    max_participants: Option<i32>,
}

impl From<QueueRow> for Queue {
    fn from(row: QueueRow) -> Self {
        Queue {
            id: QueueId(row.id),
            schedule_id: ScheduleId(row.schedule_id),
            opens_at: row.opens_at,
            closes_at: row.closes_at,
            is_active: row.is_active,
            max_participants: row.max_participants,
        }
    }
}

#[derive(sqlx::FromRow)]
struct EntryRow {
    id: i64,
    user_id: i64,
    queue_id: i64,
    position: i32,
    exited_at: Option<DateTime<Utc>>,
}

impl From<EntryRow> for QueueEntry {
    fn from(row: EntryRow) -> Self {
        QueueEntry {
            id: row.id,
            user_id: UserId(row.user_id),
            queue_id: QueueId(row.queue_id),
            position: row.position,
            exited_at: row.exited_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ParticipantRow {
    user_id: i64,
    name: String,
    surname: String,
    position: i32,
}

impl From<ParticipantRow> for Participant {
    fn from(row: ParticipantRow) -> Self {
        Participant {
            user_id: UserId(row.user_id),
            name: row.name,
            surname: row.surname,
            position: row.position,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ScheduleRow {
    id: i64,
    external_id: String,
    name: String,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    group_ids: String,
}

impl From<ScheduleRow> for Schedule {
    fn from(row: ScheduleRow) -> Self {
        Schedule {
            id: ScheduleId(row.id),
            external_id: row.external_id,
            name: row.name,
            start_time: row.start_time,
            end_time: row.end_time,
            group_ids: row.group_ids,
        }
    }
}

#[derive(sqlx::FromRow)]
struct UserQueueRow {
    queue_id: i64,
    position: i32,
    schedule_id: i64,
    schedule_name: String,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    group_ids: String,
    opens_at: DateTime<Utc>,
    closes_at: DateTime<Utc>,
    is_active: bool,
}

impl From<UserQueueRow> for UserQueueItem {
    fn from(row: UserQueueRow) -> Self {
        UserQueueItem {
            queue_id: QueueId(row.queue_id),
            position: row.position,
            schedule_id: ScheduleId(row.schedule_id),
            schedule_name: row.schedule_name,
            start_time: row.start_time,
            end_time: row.end_time,
            group_ids: split_group_ids(&row.group_ids),
            opens_at: row.opens_at,
            closes_at: row.closes_at,
            is_active: row.is_active,
        }
    }
}
