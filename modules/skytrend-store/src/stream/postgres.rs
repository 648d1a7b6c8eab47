use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use skytrend_common::StreamFields;
use sqlx::types::Json;
use sqlx::PgPool;

use super::{EntryId, StreamEntry, StreamLog};

/// Postgres-backed log. Entry ids come from one BIGSERIAL, drawn under a
/// per-stream row lock, so they are monotonic and commit in order within
/// every stream.
#[derive(Clone)]
pub struct PgStreamLog {
    pool: PgPool,
}

impl PgStreamLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

type EntryRow = (i64, Json<StreamFields>, i32);

fn to_entries(rows: Vec<EntryRow>) -> Vec<StreamEntry> {
    rows.into_iter()
        .map(|(id, fields, deliveries)| StreamEntry {
            id: EntryId(id),
            fields: fields.0,
            deliveries: deliveries.max(1) as u32,
        })
        .collect()
}

#[async_trait]
impl StreamLog for PgStreamLog {
    async fn append(&self, stream: &str, fields: &StreamFields, max_len: u64) -> Result<EntryId> {
        let mut tx = self.pool.begin().await?;

        // Locks the stream's length row until commit. The id is drawn after
        // the lock, so ids become visible in order and `read_group` never
        // moves its cursor past an entry that is still uncommitted.
        let (length,) = sqlx::query_as::<_, (i64,)>(
            r#"
            INSERT INTO stream_lengths (stream, length)
            VALUES ($1, 1)
            ON CONFLICT (stream) DO UPDATE SET length = stream_lengths.length + 1
            RETURNING length
            "#,
        )
        .bind(stream)
        .fetch_one(&mut *tx)
        .await?;

        let (id,) = sqlx::query_as::<_, (i64,)>(
            r#"
            INSERT INTO stream_entries (stream, fields)
            VALUES ($1, $2)
            RETURNING id
            "#,
        )
        .bind(stream)
        .bind(Json(fields))
        .fetch_one(&mut *tx)
        .await?;

        // Exact trim: drop only the oldest rows over the cap.
        let excess = length - max_len as i64;
        if excess > 0 {
            let trimmed = sqlx::query(
                r#"
                DELETE FROM stream_entries
                WHERE id IN (
                    SELECT id FROM stream_entries
                    WHERE stream = $1
                    ORDER BY id ASC
                    LIMIT $2
                )
                "#,
            )
            .bind(stream)
            .bind(excess)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            sqlx::query("UPDATE stream_lengths SET length = length - $2 WHERE stream = $1")
                .bind(stream)
                .bind(trimmed as i64)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(EntryId(id))
    }

    async fn create_group(&self, stream: &str, group: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stream_groups (stream, group_name, last_delivered)
            VALUES ($1, $2, 0)
            ON CONFLICT (stream, group_name) DO NOTHING
            "#,
        )
        .bind(stream)
        .bind(group)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let mut tx = self.pool.begin().await?;

        // Row lock serialises consumers of one group so each entry goes to exactly one of them.
        let cursor = sqlx::query_as::<_, (i64,)>(
            r#"
            SELECT last_delivered FROM stream_groups
            WHERE stream = $1 AND group_name = $2
            FOR UPDATE
            "#,
        )
        .bind(stream)
        .bind(group)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((last_delivered,)) = cursor else {
            bail!("NOGROUP no such group '{group}' on stream '{stream}'");
        };

        let rows = sqlx::query_as::<_, EntryRow>(
            r#"
            SELECT id, fields, 1 AS deliveries
            FROM stream_entries
            WHERE stream = $1 AND id > $2
            ORDER BY id ASC
            LIMIT $3
            "#,
        )
        .bind(stream)
        .bind(last_delivered)
        .bind(count as i64)
        .fetch_all(&mut *tx)
        .await?;

        if let Some((max_id, _, _)) = rows.last() {
            let ids: Vec<i64> = rows.iter().map(|(id, _, _)| *id).collect();

            sqlx::query(
                r#"
                INSERT INTO stream_pending (stream, group_name, entry_id, consumer)
                SELECT $1, $2, entry_id, $3 FROM UNNEST($4::bigint[]) AS t(entry_id)
                ON CONFLICT (stream, group_name, entry_id) DO NOTHING
                "#,
            )
            .bind(stream)
            .bind(group)
            .bind(consumer)
            .bind(&ids)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "UPDATE stream_groups SET last_delivered = $3 WHERE stream = $1 AND group_name = $2",
            )
            .bind(stream)
            .bind(group)
            .bind(*max_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(to_entries(rows))
    }

    async fn read_pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let mut tx = self.pool.begin().await?;

        // Entries trimmed while pending can never be redelivered.
        sqlx::query(
            r#"
            DELETE FROM stream_pending p
            WHERE p.stream = $1 AND p.group_name = $2
              AND NOT EXISTS (
                SELECT 1 FROM stream_entries e WHERE e.stream = p.stream AND e.id = p.entry_id
              )
            "#,
        )
        .bind(stream)
        .bind(group)
        .execute(&mut *tx)
        .await?;

        let rows = sqlx::query_as::<_, EntryRow>(
            r#"
            WITH redelivered AS (
                UPDATE stream_pending p
                SET deliveries = p.deliveries + 1, delivered_at = now()
                WHERE (p.stream, p.group_name, p.entry_id) IN (
                    SELECT stream, group_name, entry_id FROM stream_pending
                    WHERE stream = $1 AND group_name = $2 AND consumer = $3
                    ORDER BY entry_id ASC
                    LIMIT $4
                )
                RETURNING p.entry_id, p.deliveries
            )
            SELECT e.id, e.fields, r.deliveries
            FROM redelivered r
            JOIN stream_entries e ON e.stream = $1 AND e.id = r.entry_id
            ORDER BY e.id ASC
            "#,
        )
        .bind(stream)
        .bind(group)
        .bind(consumer)
        .bind(count as i64)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(to_entries(rows))
    }

    async fn claim_idle(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let rows = sqlx::query_as::<_, EntryRow>(
            r#"
            WITH claimed AS (
                UPDATE stream_pending p
                SET consumer = $3, deliveries = p.deliveries + 1, delivered_at = now()
                WHERE (p.stream, p.group_name, p.entry_id) IN (
                    SELECT stream, group_name, entry_id FROM stream_pending
                    WHERE stream = $1 AND group_name = $2 AND consumer <> $3
                      AND delivered_at <= now() - make_interval(secs => $4)
                    ORDER BY entry_id ASC
                    LIMIT $5
                    FOR UPDATE SKIP LOCKED
                )
                RETURNING p.entry_id, p.deliveries
            )
            SELECT e.id, e.fields, c.deliveries
            FROM claimed c
            JOIN stream_entries e ON e.stream = $1 AND e.id = c.entry_id
            ORDER BY e.id ASC
            "#,
        )
        .bind(stream)
        .bind(group)
        .bind(consumer)
        .bind(min_idle.as_secs_f64())
        .bind(count as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(to_entries(rows))
    }

    async fn ack(&self, stream: &str, group: &str, id: EntryId) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM stream_pending WHERE stream = $1 AND group_name = $2 AND entry_id = $3",
        )
        .bind(stream)
        .bind(group)
        .bind(id.0)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn len(&self, stream: &str) -> Result<u64> {
        let row = sqlx::query_as::<_, (i64,)>("SELECT length FROM stream_lengths WHERE stream = $1")
            .bind(stream)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map_or(0, |(n,)| n as u64))
    }

    async fn pending_count(&self, stream: &str, group: &str) -> Result<u64> {
        let (n,) = sqlx::query_as::<_, (i64,)>(
            "SELECT COUNT(*) FROM stream_pending WHERE stream = $1 AND group_name = $2",
        )
        .bind(stream)
        .bind(group)
        .fetch_one(&self.pool)
        .await?;
        Ok(n as u64)
    }
}
