use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;

use super::bloom::word_masks;
use super::{BloomParams, CountMinSketch, Sketches, TopKParams};

/// Postgres-backed sketches shared by every replica.
///
/// Bloom filters are stored as sparse 64-bit words merged with `|`, so
/// concurrent adds never lose bits. Top-K keeps exact per-item counts and
/// ranks on read; the declared `k` bounds the list.
#[derive(Clone)]
pub struct PgSketches {
    pool: PgPool,
}

impl PgSketches {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn bloom_shape(&self, name: &str) -> Result<Option<(u64, u32)>> {
        let row = sqlx::query_as::<_, (i64, i32)>("SELECT bits, hashes FROM sketch_blooms WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(bits, hashes)| (bits as u64, hashes as u32)))
    }

    async fn cms_shape(&self, name: &str) -> Result<Option<(usize, usize)>> {
        let row = sqlx::query_as::<_, (i32, i32)>("SELECT width, depth FROM sketch_cms WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(w, d)| (w as usize, d as usize)))
    }

    async fn topk_k(&self, name: &str) -> Result<Option<usize>> {
        let row = sqlx::query_as::<_, (i32,)>("SELECT k FROM sketch_topk WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(k,)| k as usize))
    }
}

#[async_trait]
impl Sketches for PgSketches {
    async fn bloom_reserve(&self, name: &str, params: BloomParams) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sketch_blooms (name, bits, hashes)
            VALUES ($1, $2, $3)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(name)
        .bind(params.bits() as i64)
        .bind(params.hashes() as i32)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn bloom_exists(&self, name: &str, item: &str) -> Result<bool> {
        let Some((bits, hashes)) = self.bloom_shape(name).await? else {
            return Ok(false);
        };
        let masks = word_masks(item, bits, hashes);
        let words: Vec<i64> = masks.keys().map(|w| *w as i64).collect();

        let rows = sqlx::query_as::<_, (i64, i64)>(
            "SELECT word, bits FROM sketch_bloom_words WHERE name = $1 AND word = ANY($2)",
        )
        .bind(name)
        .bind(&words)
        .fetch_all(&self.pool)
        .await?;

        Ok(masks.iter().all(|(word, mask)| {
            rows.iter()
                .find(|(w, _)| *w as u64 == *word)
                .is_some_and(|(_, stored)| (*stored as u64) & mask == *mask)
        }))
    }

    async fn bloom_add(&self, name: &str, item: &str) -> Result<bool> {
        if self.bloom_shape(name).await?.is_none() {
            self.bloom_reserve(name, BloomParams::default()).await?;
        }
        let existed = self.bloom_exists(name, item).await?;

        let Some((bits, hashes)) = self.bloom_shape(name).await? else {
            anyhow::bail!("bloom filter {name} vanished during add");
        };
        let masks = word_masks(item, bits, hashes);
        let words: Vec<i64> = masks.keys().map(|w| *w as i64).collect();
        let values: Vec<i64> = masks.values().map(|m| *m as i64).collect();

        sqlx::query(
            r#"
            INSERT INTO sketch_bloom_words (name, word, bits)
            SELECT $1, w, b FROM UNNEST($2::bigint[], $3::bigint[]) AS t(w, b)
            ON CONFLICT (name, word) DO UPDATE SET bits = sketch_bloom_words.bits | EXCLUDED.bits
            "#,
        )
        .bind(name)
        .bind(&words)
        .bind(&values)
        .execute(&self.pool)
        .await?;

        Ok(!existed)
    }

    async fn topk_reserve(&self, name: &str, params: TopKParams) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sketch_topk (name, k, width, depth, decay)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(name)
        .bind(params.k as i32)
        .bind(params.width as i32)
        .bind(params.depth as i32)
        .bind(params.decay)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn topk_incr_by(&self, name: &str, items: &[(String, u64)]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        if self.topk_k(name).await?.is_none() {
            self.topk_reserve(name, TopKParams::default()).await?;
        }
        let names: Vec<&str> = items.iter().map(|(i, _)| i.as_str()).collect();
        let counts: Vec<i64> = items.iter().map(|(_, n)| *n as i64).collect();

        sqlx::query(
            r#"
            INSERT INTO sketch_topk_counts (name, item, count)
            SELECT $1, item, SUM(n) FROM UNNEST($2::text[], $3::bigint[]) AS t(item, n)
            GROUP BY item
            ON CONFLICT (name, item) DO UPDATE SET count = sketch_topk_counts.count + EXCLUDED.count
            "#,
        )
        .bind(name)
        .bind(&names)
        .bind(&counts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn topk_list(&self, name: &str) -> Result<Vec<(String, u64)>> {
        let Some(k) = self.topk_k(name).await? else {
            return Ok(Vec::new());
        };
        let rows = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT item, count FROM sketch_topk_counts
            WHERE name = $1
            ORDER BY count DESC, item ASC
            LIMIT $2
            "#,
        )
        .bind(name)
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(item, n)| (item, n as u64)).collect())
    }

    async fn cms_reserve(&self, name: &str, width: usize, depth: usize) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sketch_cms (name, width, depth)
            VALUES ($1, $2, $3)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(name)
        .bind(width as i32)
        .bind(depth as i32)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn cms_incr_by(&self, name: &str, items: &[(String, u64)]) -> Result<()> {
        let (width, depth) = match self.cms_shape(name).await? {
            Some(shape) => shape,
            None => {
                self.cms_reserve(name, 3000, 10).await?;
                (3000, 10)
            }
        };

        let mut rows = Vec::new();
        let mut cols = Vec::new();
        let mut incs = Vec::new();
        for (item, n) in items {
            for (row, col) in CountMinSketch::cells(item, width, depth) {
                rows.push(row as i32);
                cols.push(col as i32);
                incs.push(*n as i64);
            }
        }
        if rows.is_empty() {
            return Ok(());
        }

        sqlx::query(
            r#"
            INSERT INTO sketch_cms_cells (name, row_idx, col_idx, count)
            SELECT $1, r, c, SUM(n) FROM UNNEST($2::int[], $3::int[], $4::bigint[]) AS t(r, c, n)
            GROUP BY r, c
            ON CONFLICT (name, row_idx, col_idx) DO UPDATE SET count = sketch_cms_cells.count + EXCLUDED.count
            "#,
        )
        .bind(name)
        .bind(&rows)
        .bind(&cols)
        .bind(&incs)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn cms_query(&self, name: &str, item: &str) -> Result<u64> {
        let Some((width, depth)) = self.cms_shape(name).await? else {
            return Ok(0);
        };
        let cells = CountMinSketch::cells(item, width, depth);
        let rows: Vec<i32> = cells.iter().map(|(r, _)| *r as i32).collect();
        let cols: Vec<i32> = cells.iter().map(|(_, c)| *c as i32).collect();

        // A cell that was never written counts as zero, which makes the minimum zero.
        let found = sqlx::query_as::<_, (i64,)>(
            r#"
            SELECT count FROM sketch_cms_cells cc
            JOIN UNNEST($2::int[], $3::int[]) AS t(r, c) ON cc.row_idx = t.r AND cc.col_idx = t.c
            WHERE cc.name = $1
            "#,
        )
        .bind(name)
        .bind(&rows)
        .bind(&cols)
        .fetch_all(&self.pool)
        .await?;

        if found.len() < cells.len() {
            return Ok(0);
        }
        Ok(found.into_iter().map(|(n,)| n as u64).min().unwrap_or(0))
    }

    async fn set_add(&self, name: &str, members: &[String]) -> Result<()> {
        if members.is_empty() {
            return Ok(());
        }
        sqlx::query(
            r#"
            INSERT INTO sketch_sets (name, member)
            SELECT $1, m FROM UNNEST($2::text[]) AS t(m)
            ON CONFLICT (name, member) DO NOTHING
            "#,
        )
        .bind(name)
        .bind(members)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_members(&self, name: &str) -> Result<Vec<String>> {
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT member FROM sketch_sets WHERE name = $1 ORDER BY member ASC",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(m,)| m).collect())
    }
}
