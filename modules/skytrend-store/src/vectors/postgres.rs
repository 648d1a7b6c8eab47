use anyhow::Result;
use async_trait::async_trait;
use pgvector::Vector;
use skytrend_common::{CacheEntry, RoutingReference};
use sqlx::PgPool;
use uuid::Uuid;

use super::{CacheStore, RoutingStore};
use crate::pg::verify_schema;
use crate::schema::IndexSchema;

// --- Routing ---

#[derive(Clone)]
pub struct PgRoutingStore {
    pool: PgPool,
}

impl PgRoutingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoutingStore for PgRoutingStore {
    async fn register_schema(&self, schema: &IndexSchema) -> Result<()> {
        verify_schema(&self.pool, schema).await
    }

    async fn count(&self) -> Result<u64> {
        let (n,) = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM routing_references")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as u64)
    }

    async fn insert(&self, reference: &RoutingReference) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO routing_references (id, text, route, max_distance, text_embedding)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(reference.id)
        .bind(&reference.text)
        .bind(reference.route.as_str())
        .bind(reference.max_distance)
        .bind(Vector::from(reference.text_embedding.clone()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn nearest_per_route(&self, vector: &[f32]) -> Result<Vec<(RoutingReference, f64)>> {
        let query = Vector::from(vector.to_vec());
        let rows = sqlx::query_as::<_, (Uuid, String, String, f64, Vector, f64)>(
            r#"
            SELECT * FROM (
                SELECT DISTINCT ON (route)
                    id, text, route, max_distance, text_embedding,
                    (text_embedding <=> $1) AS distance
                FROM routing_references
                ORDER BY route, text_embedding <=> $1
            ) nearest
            ORDER BY distance ASC
            "#,
        )
        .bind(&query)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, text, route, max_distance, embedding, distance)| {
                Ok((
                    RoutingReference {
                        id,
                        text,
                        route: route.parse::<skytrend_common::Route>()?,
                        max_distance,
                        text_embedding: embedding.to_vec(),
                    },
                    distance,
                ))
            })
            .collect()
    }
}

// --- Semantic cache ---

#[derive(Clone)]
pub struct PgCacheStore {
    pool: PgPool,
}

impl PgCacheStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CacheStore for PgCacheStore {
    async fn register_schema(&self, schema: &IndexSchema) -> Result<()> {
        verify_schema(&self.pool, schema).await
    }

    async fn upsert(&self, entry: &CacheEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO semantic_cache (id, post, answer, post_embedding)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET
                post = EXCLUDED.post,
                answer = EXCLUDED.answer,
                post_embedding = EXCLUDED.post_embedding,
                updated_at = now()
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.post)
        .bind(&entry.answer)
        .bind(Vector::from(entry.post_embedding.clone()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn nearest(&self, vector: &[f32]) -> Result<Option<(CacheEntry, f64)>> {
        let query = Vector::from(vector.to_vec());
        let row = sqlx::query_as::<_, (String, String, String, Vector, f64)>(
            r#"
            SELECT id, post, answer, post_embedding, (post_embedding <=> $1) AS distance
            FROM semantic_cache
            ORDER BY post_embedding <=> $1
            LIMIT 1
            "#,
        )
        .bind(&query)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, post, answer, embedding, distance)| {
            (
                CacheEntry {
                    id,
                    post,
                    answer,
                    post_embedding: embedding.to_vec(),
                },
                distance,
            )
        }))
    }

    async fn count(&self) -> Result<u64> {
        let (n,) = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM semantic_cache")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as u64)
    }
}
