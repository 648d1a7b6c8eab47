use anyhow::{bail, Result};
use async_trait::async_trait;
use pgvector::Vector;
use skytrend_common::{FilteredDocument, PostEvent};
use sqlx::PgPool;

use super::{DocumentStore, FieldUpdate};
use crate::pg::verify_schema;
use crate::schema::IndexSchema;

#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const COLUMNS: &str = "id, did, rkey, text, time_us, operation, parent_uri, root_uri, langs, created_at, topics, text_embedding";

struct DocumentRow(FilteredDocument);

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for DocumentRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> std::result::Result<Self, sqlx::Error> {
        use sqlx::Row;
        let operation: String = row.try_get("operation")?;
        let operation = operation.parse().map_err(|e: skytrend_common::SkytrendError| {
            sqlx::Error::Decode(e.to_string().into())
        })?;
        let embedding: Option<Vector> = row.try_get("text_embedding")?;
        let id: String = row.try_get("id")?;

        Ok(DocumentRow(FilteredDocument {
            post: PostEvent {
                uri: id.clone(),
                did: row.try_get("did")?,
                rkey: row.try_get("rkey")?,
                text: row.try_get("text")?,
                time_us: row.try_get("time_us")?,
                operation,
                parent_uri: row.try_get("parent_uri")?,
                root_uri: row.try_get("root_uri")?,
                langs: row.try_get("langs")?,
                created_at: row.try_get("created_at")?,
            },
            id,
            text_embedding: embedding.map(|v| v.to_vec()),
            topics: row.try_get("topics")?,
        }))
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn register_schema(&self, schema: &IndexSchema) -> Result<()> {
        verify_schema(&self.pool, schema).await?;
        tracing::info!(index = schema.name, table = schema.table, "Index schema verified");
        Ok(())
    }

    async fn upsert(&self, doc: &FilteredDocument) -> Result<()> {
        if doc.id != doc.post.uri {
            bail!("document id {} does not match uri {}", doc.id, doc.post.uri);
        }
        let p = &doc.post;
        sqlx::query(
            r#"
            INSERT INTO filtered_documents
                (id, did, rkey, text, time_us, operation, parent_uri, root_uri, langs, created_at, topics)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                did = EXCLUDED.did,
                rkey = EXCLUDED.rkey,
                text = EXCLUDED.text,
                time_us = EXCLUDED.time_us,
                operation = EXCLUDED.operation,
                parent_uri = EXCLUDED.parent_uri,
                root_uri = EXCLUDED.root_uri,
                langs = EXCLUDED.langs,
                created_at = EXCLUDED.created_at
            "#,
        )
        .bind(&doc.id)
        .bind(&p.did)
        .bind(&p.rkey)
        .bind(&p.text)
        .bind(p.time_us)
        .bind(p.operation.as_str())
        .bind(&p.parent_uri)
        .bind(&p.root_uri)
        .bind(&p.langs)
        .bind(&p.created_at)
        .bind(&doc.topics)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<FilteredDocument>> {
        let row = sqlx::query_as::<_, DocumentRow>(&format!(
            "SELECT {COLUMNS} FROM filtered_documents WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.0))
    }

    async fn update_field(&self, id: &str, update: FieldUpdate) -> Result<bool> {
        let result = match update {
            FieldUpdate::TextEmbedding(vector) => {
                sqlx::query("UPDATE filtered_documents SET text_embedding = $2 WHERE id = $1")
                    .bind(id)
                    .bind(Vector::from(vector))
                    .execute(&self.pool)
                    .await?
            }
            FieldUpdate::Topics(topics) => {
                sqlx::query("UPDATE filtered_documents SET topics = $2 WHERE id = $1")
                    .bind(id)
                    .bind(&topics)
                    .execute(&self.pool)
                    .await?
            }
        };
        Ok(result.rows_affected() > 0)
    }

    async fn find_by_topic_intersection(&self, topics: &[String]) -> Result<Vec<FilteredDocument>> {
        if topics.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, DocumentRow>(&format!(
            "SELECT {COLUMNS} FROM filtered_documents WHERE topics && $1 ORDER BY time_us DESC"
        ))
        .bind(topics)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    async fn vector_knn(
        &self,
        vector: &[f32],
        k: usize,
        max_distance: Option<f64>,
    ) -> Result<Vec<(FilteredDocument, f64)>> {
        let query = Vector::from(vector.to_vec());
        let rows = sqlx::query_as::<_, (String, f64)>(
            r#"
            SELECT id, (text_embedding <=> $1) AS distance
            FROM filtered_documents
            WHERE text_embedding IS NOT NULL
              AND ($2::float8 IS NULL OR (text_embedding <=> $1) <= $2)
            ORDER BY text_embedding <=> $1
            LIMIT $3
            "#,
        )
        .bind(&query)
        .bind(max_distance)
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for (id, distance) in rows {
            if let Some(doc) = self.get(&id).await? {
                out.push((doc, distance));
            }
        }
        Ok(out)
    }

    async fn count(&self) -> Result<u64> {
        let (n,) = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM filtered_documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as u64)
    }
}
