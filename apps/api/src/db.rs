use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS personas (
        id          TEXT PRIMARY KEY,
        name        TEXT NOT NULL,
        role        TEXT NOT NULL,
        is_system   BOOLEAN NOT NULL DEFAULT FALSE,
        profile     JSONB NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at  TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id             UUID PRIMARY KEY,
        file_name      TEXT NOT NULL,
        document_text  TEXT NOT NULL,
        persona_ids    TEXT[] NOT NULL,
        status         TEXT NOT NULL DEFAULT 'uploaded',
        created_at     TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at     TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    // Personas are referenced by id only: deleting one must not touch past units.
    r#"
    CREATE TABLE IF NOT EXISTS evaluation_units (
        job_id        UUID NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
        persona_id    TEXT NOT NULL,
        position      INTEGER NOT NULL,
        status        TEXT NOT NULL DEFAULT 'pending',
        result        JSONB,
        error         TEXT,
        created_at    TIMESTAMPTZ NOT NULL DEFAULT now(),
        completed_at  TIMESTAMPTZ,
        PRIMARY KEY (job_id, persona_id),
        CHECK (result IS NULL OR error IS NULL)
    )
    "#,
];

/// Creates and returns a PostgreSQL connection pool.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    info!("Connecting to PostgreSQL...");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    info!("PostgreSQL connection pool established");
    Ok(pool)
}

/// Creates the roundtable tables if they do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .context("Failed to apply schema")?;
    }
    info!("Database schema ready");
    Ok(())
}
