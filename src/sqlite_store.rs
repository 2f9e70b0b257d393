//! SQLite-backed [`DecisionStore`].
//!
//! Maps each store operation onto the schema created by [`crate::migrate`].
//! Component membership lives in `decision_components` so the structured
//! filter runs as an indexed `EXISTS` instead of a JSON scan.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use decision_relay_core::embedding::{blob_to_vec, vec_to_blob};
use decision_relay_core::error::{CoreError, Result};
use decision_relay_core::models::{Decision, EmbeddingStatus, Gap};
use decision_relay_core::store::{
    check_dims, check_transition, DecisionQuery, DecisionStore, EmbeddingCounts, GapInsert,
};

const DECISION_COLUMNS: &str = "d.id, d.thread_id, d.ts, d.author_id, d.decision_type, d.text, \
     d.components_json, d.requirements_json, d.embedding_status, d.embedding";

/// SQLite implementation of [`DecisionStore`].
pub struct SqliteDecisionStore {
    pool: SqlitePool,
}

impl SqliteDecisionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn status_of(&self, decision_id: &str) -> Result<EmbeddingStatus> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT embedding_status FROM decisions WHERE id = ?")
                .bind(decision_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err("read embedding status"))?;
        match status {
            Some(s) => s.parse(),
            None => Err(CoreError::Inconsistency(format!(
                "decision not found: {}",
                decision_id
            ))),
        }
    }

    /// Apply `from -> to` with a compare-and-set on the current status.
    async fn transition(
        &self,
        decision_id: &str,
        to: EmbeddingStatus,
        vector: Option<&[f32]>,
    ) -> Result<()> {
        let from = self.status_of(decision_id).await?;
        check_transition(decision_id, from, to)?;

        let (blob, dims) = match vector {
            Some(v) => (Some(vec_to_blob(v)), Some(v.len() as i64)),
            None => (None, None),
        };

        let result = sqlx::query(
            "UPDATE decisions SET embedding_status = ?, embedding = ?, embedding_dims = ? \
             WHERE id = ? AND embedding_status = ?",
        )
        .bind(to.as_str())
        .bind(blob)
        .bind(dims)
        .bind(decision_id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err("update embedding status"))?;

        if result.rows_affected() == 0 {
            return Err(CoreError::storage(format!(
                "decision {} changed status concurrently",
                decision_id
            )));
        }
        Ok(())
    }
}

fn db_err(op: &'static str) -> impl FnOnce(sqlx::Error) -> CoreError {
    move |e| CoreError::storage_with(format!("sqlite: {} failed", op), e)
}

fn millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| CoreError::Inconsistency(format!("timestamp out of range: {}", ms)))
}

fn encode_set(set: &BTreeSet<String>) -> Result<String> {
    serde_json::to_string(set)
        .map_err(|e| CoreError::Inconsistency(format!("cannot encode set: {}", e)))
}

fn decode_set(raw: &str) -> Result<BTreeSet<String>> {
    serde_json::from_str(raw)
        .map_err(|e| CoreError::Inconsistency(format!("malformed JSON set '{}': {}", raw, e)))
}

fn decision_from_row(row: &SqliteRow) -> Result<Decision> {
    let decision_type: String = row.get("decision_type");
    let status: String = row.get("embedding_status");
    let components: String = row.get("components_json");
    let requirements: String = row.get("requirements_json");
    let blob: Option<Vec<u8>> = row.get("embedding");
    Ok(Decision {
        decision_id: row.get("id"),
        thread_id: row.get("thread_id"),
        timestamp: from_millis(row.get("ts"))?,
        author_id: row.get("author_id"),
        decision_type: decision_type.parse()?,
        text: row.get("text"),
        affected_components: decode_set(&components)?,
        referenced_requirements: decode_set(&requirements)?,
        embedding_status: status.parse()?,
        embedding_vector: blob.map(|b| blob_to_vec(&b)),
    })
}

fn gap_from_row(row: &SqliteRow) -> Result<Gap> {
    let gap_type: String = row.get("gap_type");
    let severity: String = row.get("severity");
    Ok(Gap {
        gap_id: row.get("id"),
        gap_type: gap_type.parse()?,
        severity: severity.parse()?,
        description: row.get("description"),
        assignee_id: row.get("assignee_id"),
        related_decision_id: row.get("related_decision_id"),
        recommendation: row.get("recommendation"),
        created_at: from_millis(row.get("created_at"))?,
        fingerprint: row.get("fingerprint"),
    })
}

/// Decode rows, skipping and logging the ones that fail.
fn decode_rows<T>(rows: &[SqliteRow], decode: fn(&SqliteRow) -> Result<T>) -> Vec<T> {
    rows.iter()
        .filter_map(|row| match decode(row) {
            Ok(v) => Some(v),
            Err(e) => {
                let id: String = row.try_get("id").unwrap_or_default();
                tracing::warn!(id = %id, error = %e, "skipping undecodable row");
                None
            }
        })
        .collect()
}

#[async_trait]
impl DecisionStore for SqliteDecisionStore {
    async fn create_decision(&self, decision: &Decision) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err("begin"))?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO decisions (id, thread_id, ts, author_id, decision_type, text,
                                   components_json, requirements_json, embedding_status,
                                   embedding, embedding_dims)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&decision.decision_id)
        .bind(&decision.thread_id)
        .bind(millis(decision.timestamp))
        .bind(&decision.author_id)
        .bind(decision.decision_type.as_str())
        .bind(&decision.text)
        .bind(encode_set(&decision.affected_components)?)
        .bind(encode_set(&decision.referenced_requirements)?)
        .bind(decision.embedding_status.as_str())
        .bind(decision.embedding_vector.as_deref().map(vec_to_blob))
        .bind(decision.embedding_vector.as_ref().map(|v| v.len() as i64))
        .execute(&mut *tx)
        .await
        .map_err(db_err("insert decision"))?;

        if inserted.rows_affected() == 0 {
            return Err(CoreError::Inconsistency(format!(
                "decision already exists: {}",
                decision.decision_id
            )));
        }

        for component in &decision.affected_components {
            sqlx::query("INSERT INTO decision_components (decision_id, component) VALUES (?, ?)")
                .bind(&decision.decision_id)
                .bind(component)
                .execute(&mut *tx)
                .await
                .map_err(db_err("insert decision component"))?;
        }

        tx.commit().await.map_err(db_err("commit"))?;
        Ok(())
    }

    async fn get_decision(&self, decision_id: &str) -> Result<Option<Decision>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM decisions d WHERE d.id = ?",
            DECISION_COLUMNS
        ))
        .bind(decision_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("get decision"))?;

        row.as_ref().map(decision_from_row).transpose()
    }

    async fn query_decisions(&self, query: &DecisionQuery) -> Result<Vec<Decision>> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM decisions d WHERE 1 = 1",
            DECISION_COLUMNS
        ));

        if !query.components.is_empty() {
            builder.push(
                " AND EXISTS (SELECT 1 FROM decision_components c \
                 WHERE c.decision_id = d.id AND c.component IN (",
            );
            let mut separated = builder.separated(", ");
            for component in &query.components {
                separated.push_bind(component.as_str());
            }
            separated.push_unseparated("))");
        }
        if let Some(author) = &query.author_id {
            builder.push(" AND d.author_id = ").push_bind(author.as_str());
        }
        if let Some(t) = query.decision_type {
            builder.push(" AND d.decision_type = ").push_bind(t.as_str());
        }
        if let Some(since) = query.since {
            builder.push(" AND d.ts >= ").push_bind(millis(since));
        }
        if let Some(until) = query.until {
            builder.push(" AND d.ts <= ").push_bind(millis(until));
        }
        if let Some(status) = query.embedding_status {
            builder
                .push(" AND d.embedding_status = ")
                .push_bind(status.as_str());
        }
        builder.push(" ORDER BY d.ts DESC, d.id ASC");
        if let Some(limit) = query.limit {
            builder.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("query decisions"))?;

        Ok(decode_rows(&rows, decision_from_row))
    }

    async fn mark_embedded(&self, decision_id: &str, vector: &[f32], dims: usize) -> Result<()> {
        check_dims(decision_id, vector, dims)?;
        self.transition(decision_id, EmbeddingStatus::Embedded, Some(vector))
            .await
    }

    async fn mark_failed(&self, decision_id: &str) -> Result<()> {
        self.transition(decision_id, EmbeddingStatus::Failed, None)
            .await
    }

    async fn reset_failed(&self, decision_id: &str) -> Result<()> {
        self.transition(decision_id, EmbeddingStatus::Pending, None)
            .await
    }

    async fn pending_embeddings(&self, limit: usize) -> Result<Vec<Decision>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM decisions d WHERE d.embedding_status = 'pending' \
             ORDER BY d.ts ASC, d.id DESC LIMIT ?",
            DECISION_COLUMNS
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("list pending embeddings"))?;

        Ok(decode_rows(&rows, decision_from_row))
    }

    async fn embedding_counts(&self) -> Result<EmbeddingCounts> {
        let rows = sqlx::query(
            "SELECT embedding_status, COUNT(*) AS n FROM decisions GROUP BY embedding_status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("count embeddings"))?;

        let mut counts = EmbeddingCounts::default();
        for row in &rows {
            let status: String = row.get("embedding_status");
            let n: i64 = row.get("n");
            match status.parse::<EmbeddingStatus>() {
                Ok(EmbeddingStatus::Pending) => counts.pending += n as u64,
                Ok(EmbeddingStatus::Embedded) => counts.embedded += n as u64,
                Ok(EmbeddingStatus::Failed) => counts.failed += n as u64,
                Err(e) => tracing::warn!(error = %e, "ignoring unknown embedding status"),
            }
        }
        Ok(counts)
    }

    async fn record_participant(&self, thread_id: &str, user_id: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO thread_participants (thread_id, user_id) VALUES (?, ?) \
             ON CONFLICT(thread_id, user_id) DO NOTHING",
        )
        .bind(thread_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(db_err("record participant"))?;
        Ok(())
    }

    async fn thread_participants(&self, thread_id: &str) -> Result<BTreeSet<String>> {
        let users: Vec<String> =
            sqlx::query_scalar("SELECT user_id FROM thread_participants WHERE thread_id = ?")
                .bind(thread_id)
                .fetch_all(&self.pool)
                .await
                .map_err(db_err("list participants"))?;
        Ok(users.into_iter().collect())
    }

    async fn create_gap(&self, gap: &Gap) -> Result<GapInsert> {
        if let Some(related) = &gap.related_decision_id {
            let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM decisions WHERE id = ?")
                .bind(related)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err("check gap decision"))?;
            if exists.is_none() {
                return Err(CoreError::Inconsistency(format!(
                    "gap references missing decision: {}",
                    related
                )));
            }
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO gaps (id, gap_type, severity, description, assignee_id,
                              related_decision_id, recommendation, created_at, fingerprint)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(fingerprint) DO NOTHING
            "#,
        )
        .bind(&gap.gap_id)
        .bind(gap.gap_type.as_str())
        .bind(gap.severity.as_str())
        .bind(&gap.description)
        .bind(&gap.assignee_id)
        .bind(&gap.related_decision_id)
        .bind(&gap.recommendation)
        .bind(millis(gap.created_at))
        .bind(&gap.fingerprint)
        .execute(&self.pool)
        .await
        .map_err(db_err("insert gap"))?;

        if inserted.rows_affected() == 1 {
            return Ok(GapInsert {
                gap_id: gap.gap_id.clone(),
                created: true,
            });
        }

        let existing: String = sqlx::query_scalar("SELECT id FROM gaps WHERE fingerprint = ?")
            .bind(&gap.fingerprint)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err("read existing gap"))?;
        Ok(GapInsert {
            gap_id: existing,
            created: false,
        })
    }

    async fn list_gaps(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Gap>> {
        let rows = sqlx::query(
            r#"
            SELECT g.id, g.gap_type, g.severity, g.description, g.assignee_id,
                   g.related_decision_id, g.recommendation, g.created_at, g.fingerprint,
                   d.id AS resolved_decision
            FROM gaps g
            LEFT JOIN decisions d ON d.id = g.related_decision_id
            WHERE g.created_at >= ?
            ORDER BY g.created_at ASC, g.rowid ASC
            "#,
        )
        .bind(since.map(millis).unwrap_or(i64::MIN))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("list gaps"))?;

        let live: Vec<SqliteRow> = rows
            .into_iter()
            .filter(|row| {
                let related: Option<String> = row.get("related_decision_id");
                let resolved: Option<String> = row.get("resolved_decision");
                match (related, resolved) {
                    (Some(id), None) => {
                        let gap_id: String = row.get("id");
                        tracing::warn!(gap_id = %gap_id, decision_id = %id, "skipping gap with dangling decision reference");
                        false
                    }
                    _ => true,
                }
            })
            .collect();

        Ok(decode_rows(&live, gap_from_row))
    }

    async fn set_gap_priority(&self, gap_id: &str, user_id: &str, priority: i64) -> Result<()> {
        let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM gaps WHERE id = ?")
            .bind(gap_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("check gap"))?;
        if exists.is_none() {
            return Err(CoreError::Inconsistency(format!("gap not found: {}", gap_id)));
        }

        sqlx::query(
            "INSERT INTO gap_priorities (gap_id, user_id, priority) VALUES (?, ?, ?) \
             ON CONFLICT(gap_id, user_id) DO UPDATE SET priority = excluded.priority",
        )
        .bind(gap_id)
        .bind(user_id)
        .bind(priority)
        .execute(&self.pool)
        .await
        .map_err(db_err("set gap priority"))?;
        Ok(())
    }

    async fn gap_priority(&self, gap_id: &str, user_id: &str) -> Result<Option<i64>> {
        sqlx::query_scalar("SELECT priority FROM gap_priorities WHERE gap_id = ? AND user_id = ?")
            .bind(gap_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("read gap priority"))
    }
}
