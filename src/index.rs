//! The two vector index tiers.
//!
//! Both tiers live in SQLite: `summary_vectors` holds one record per
//! document for coarse document selection, `chunk_vectors` holds the
//! passages for fine-grained retrieval. Vectors are stored as BLOBs and
//! scored with cosine similarity in Rust — the corpus is small, so a
//! full scan of a tier is cheaper than maintaining an ANN structure.
//!
//! Records are written once per ingestion and deleted en masse by
//! document id; they are never mutated in place.

use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::EngineError;
use crate::models::{Passage, PassageHit, SummaryRecord};

/// Write the document's summary record. Upserts so that a retried
/// ingestion cannot collide with leftovers of a failed attempt.
pub async fn add_summary(
    pool: &SqlitePool,
    record: &SummaryRecord,
    vector: &[f32],
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO summary_vectors (doc_id, text, embedding) VALUES (?, ?, ?)
        ON CONFLICT(doc_id) DO UPDATE SET text = excluded.text, embedding = excluded.embedding
        "#,
    )
    .bind(&record.doc_id)
    .bind(&record.text)
    .bind(vec_to_blob(vector))
    .execute(pool)
    .await?;
    Ok(())
}

/// Write a batch of passages with their vectors in one transaction.
pub async fn add_passages(
    pool: &SqlitePool,
    passages: &[Passage],
    vectors: &[Vec<f32>],
) -> anyhow::Result<()> {
    anyhow::ensure!(
        passages.len() == vectors.len(),
        "passage/vector count mismatch: {} vs {}",
        passages.len(),
        vectors.len()
    );

    let mut tx = pool.begin().await?;
    for (passage, vector) in passages.iter().zip(vectors.iter()) {
        let mut hasher = Sha256::new();
        hasher.update(passage.text.as_bytes());
        let hash = format!("{:x}", hasher.finalize());

        sqlx::query(
            r#"
            INSERT INTO chunk_vectors (id, doc_id, chunk_index, page, text, hash, embedding)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(doc_id, chunk_index) DO UPDATE SET
                page = excluded.page,
                text = excluded.text,
                hash = excluded.hash,
                embedding = excluded.embedding
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&passage.doc_id)
        .bind(passage.chunk_index)
        .bind(passage.page)
        .bind(&passage.text)
        .bind(&hash)
        .bind(vec_to_blob(vector))
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Search the summary tier, restricted to `candidates`, returning the
/// top `k` records by similarity.
pub async fn search_summaries(
    pool: &SqlitePool,
    query_vec: &[f32],
    k: usize,
    candidates: &[String],
) -> Result<Vec<(SummaryRecord, f32)>, EngineError> {
    let rows = sqlx::query("SELECT doc_id, text, embedding FROM summary_vectors")
        .fetch_all(pool)
        .await
        .map_err(|e| EngineError::Retrieval(format!("summary index unavailable: {e}")))?;

    let mut scored: Vec<(SummaryRecord, f32)> = rows
        .iter()
        .filter_map(|row| {
            let doc_id: String = row.get("doc_id");
            if !candidates.iter().any(|c| c == &doc_id) {
                return None;
            }
            let blob: Vec<u8> = row.get("embedding");
            let score = cosine_similarity(query_vec, &blob_to_vec(&blob));
            Some((
                SummaryRecord {
                    doc_id,
                    text: row.get("text"),
                },
                score,
            ))
        })
        .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.doc_id.cmp(&b.0.doc_id))
    });
    scored.truncate(k);
    Ok(scored)
}

/// Search the passage tier, restricted to exactly one document.
pub async fn search_passages(
    pool: &SqlitePool,
    query_vec: &[f32],
    k: usize,
    doc_id: &str,
) -> Result<Vec<PassageHit>, EngineError> {
    let rows = sqlx::query(
        "SELECT doc_id, chunk_index, page, text, embedding FROM chunk_vectors WHERE doc_id = ?",
    )
    .bind(doc_id)
    .fetch_all(pool)
    .await
    .map_err(|e| EngineError::Retrieval(format!("chunk index unavailable: {e}")))?;

    let mut hits: Vec<PassageHit> = rows
        .iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            let score = cosine_similarity(query_vec, &blob_to_vec(&blob));
            PassageHit {
                passage: Passage {
                    doc_id: row.get("doc_id"),
                    chunk_index: row.get("chunk_index"),
                    page: row.get("page"),
                    text: row.get("text"),
                },
                score,
            }
        })
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.passage.chunk_index.cmp(&b.passage.chunk_index))
    });
    hits.truncate(k);
    Ok(hits)
}

/// Remove every record for `doc_id` from both tiers.
pub async fn delete_document(pool: &SqlitePool, doc_id: &str) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM summary_vectors WHERE doc_id = ?")
        .bind(doc_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM chunk_vectors WHERE doc_id = ?")
        .bind(doc_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

/// Number of summary records for a document (0 or 1 when consistent).
pub async fn summary_count(pool: &SqlitePool, doc_id: &str) -> anyhow::Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM summary_vectors WHERE doc_id = ?")
        .bind(doc_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Number of passage records for a document.
pub async fn passage_count(pool: &SqlitePool, doc_id: &str) -> anyhow::Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors WHERE doc_id = ?")
        .bind(doc_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};

    fn passage(doc_id: &str, index: i64, text: &str) -> Passage {
        Passage {
            doc_id: doc_id.to_string(),
            chunk_index: index,
            page: 1,
            text: text.to_string(),
        }
    }

    async fn test_pool() -> SqlitePool {
        let pool = db::connect_memory().await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn summary_search_respects_candidate_filter() {
        let pool = test_pool().await;

        add_summary(
            &pool,
            &SummaryRecord {
                doc_id: "a.pdf".into(),
                text: "about dosage".into(),
            },
            &[1.0, 0.0],
        )
        .await
        .unwrap();
        add_summary(
            &pool,
            &SummaryRecord {
                doc_id: "b.pdf".into(),
                text: "about triage".into(),
            },
            &[0.9, 0.1],
        )
        .await
        .unwrap();

        // Both match the query direction, but only b.pdf is a candidate.
        let hits = search_summaries(&pool, &[1.0, 0.0], 1, &["b.pdf".to_string()])
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.doc_id, "b.pdf");

        let hits = search_summaries(&pool, &[1.0, 0.0], 1, &[]).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn passage_search_is_single_document_and_ranked() {
        let pool = test_pool().await;

        let passages = vec![
            passage("a.pdf", 0, "far"),
            passage("a.pdf", 1, "near"),
            passage("a.pdf", 2, "middle"),
        ];
        let vectors = vec![
            vec![0.0, 1.0],
            vec![1.0, 0.0],
            vec![0.7, 0.7],
        ];
        add_passages(&pool, &passages, &vectors).await.unwrap();
        add_passages(
            &pool,
            &[passage("other.pdf", 0, "decoy")],
            &[vec![1.0, 0.0]],
        )
        .await
        .unwrap();

        let hits = search_passages(&pool, &[1.0, 0.0], 6, "a.pdf").await.unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits.iter().all(|h| h.passage.doc_id == "a.pdf"));
        assert_eq!(hits[0].passage.text, "near");
        assert_eq!(hits[1].passage.text, "middle");
        assert_eq!(hits[2].passage.text, "far");
    }

    #[tokio::test]
    async fn k_bounds_passage_results() {
        let pool = test_pool().await;
        let passages: Vec<Passage> = (0..10).map(|i| passage("a.pdf", i, "p")).collect();
        let vectors: Vec<Vec<f32>> = (0..10).map(|i| vec![1.0, i as f32 * 0.01]).collect();
        add_passages(&pool, &passages, &vectors).await.unwrap();

        let hits = search_passages(&pool, &[1.0, 0.0], 6, "a.pdf").await.unwrap();
        assert_eq!(hits.len(), 6);
    }

    #[tokio::test]
    async fn delete_removes_both_tiers() {
        let pool = test_pool().await;

        add_summary(
            &pool,
            &SummaryRecord {
                doc_id: "a.pdf".into(),
                text: "s".into(),
            },
            &[1.0],
        )
        .await
        .unwrap();
        add_passages(
            &pool,
            &[passage("a.pdf", 0, "x"), passage("a.pdf", 1, "y")],
            &[vec![1.0], vec![1.0]],
        )
        .await
        .unwrap();
        add_passages(&pool, &[passage("keep.pdf", 0, "z")], &[vec![1.0]])
            .await
            .unwrap();

        delete_document(&pool, "a.pdf").await.unwrap();

        assert_eq!(summary_count(&pool, "a.pdf").await.unwrap(), 0);
        assert_eq!(passage_count(&pool, "a.pdf").await.unwrap(), 0);
        assert_eq!(passage_count(&pool, "keep.pdf").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn mismatched_batch_is_rejected() {
        let pool = test_pool().await;
        let err = add_passages(&pool, &[passage("a.pdf", 0, "x")], &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("mismatch"));
    }
}
