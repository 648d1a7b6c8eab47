//! Postgres plumbing shared by the stores.

use anyhow::{bail, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::schema::IndexSchema;

/// Connect and apply the embedded migrations.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!(max_connections, "Connected to database, migrations complete");
    Ok(pool)
}

/// pgvector stores the dimension as the column's type modifier.
pub(crate) async fn column_dimensions(pool: &PgPool, table: &str, column: &str) -> Result<Option<i32>> {
    let row = sqlx::query_as::<_, (i32,)>(
        r#"
        SELECT a.atttypmod
        FROM pg_attribute a
        WHERE a.attrelid = to_regclass($1) AND a.attname = $2 AND NOT a.attisdropped
        "#,
    )
    .bind(table)
    .bind(column)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| r.0))
}

pub(crate) async fn verify_schema(pool: &PgPool, schema: &IndexSchema) -> Result<()> {
    let Some((field, dims)) = schema.vector_field() else {
        return Ok(());
    };
    match column_dimensions(pool, schema.table, field).await? {
        None => bail!("{}: column {}.{} does not exist; run migrations", schema.name, schema.table, field),
        Some(actual) if actual != dims as i32 => bail!(
            "{}: {}.{} holds {} dimensions, configured {}",
            schema.name,
            schema.table,
            field,
            actual,
            dims
        ),
        Some(_) => Ok(()),
    }
}

