use anyhow::Result;
use sqlx::SqlitePool;

/// Create both vector index tiers. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Summary tier: one record per document
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS summary_vectors (
            doc_id TEXT PRIMARY KEY,
            text TEXT NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Passage tier: many records per document
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            id TEXT PRIMARY KEY,
            doc_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            page INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            embedding BLOB NOT NULL,
            UNIQUE(doc_id, chunk_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunk_vectors_doc_id ON chunk_vectors(doc_id)")
        .execute(pool)
        .await?;

    Ok(())
}
