//! Grounded-answer orchestration.
//!
//! Builds the model prompt from retrieved context (or the bare question
//! when retrieval finds nothing or fails), streams the model through the
//! segmenter, and interleaves progress thoughts so the consumer sees the
//! retrieval steps as they happen. Retrieval failures never fail the
//! request — the answer degrades to general knowledge.

use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::llm::LanguageModel;
use crate::models::Segment;
use crate::registry::Registry;
use crate::search;
use crate::segment::{self, RESPONSE_SENTINEL};

/// Build the generation prompt. The model is instructed to think first,
/// then emit the sentinel, then answer; grounded prompts prepend the
/// retrieved passages with a strictly-from-context instruction.
pub fn build_prompt(question: &str, context: Option<&str>) -> String {
    let body = match context {
        Some(ctx) => format!(
            "Context from the document library:\n{ctx}\n\nUser question: {question}\n\n\
             Instruction: answer strictly from the context provided."
        ),
        None => question.to_string(),
    };
    format!(
        "<start_of_turn>user\n\
         Step 1: think through the context and the question.\n\
         Step 2: when ready, write exactly '{RESPONSE_SENTINEL}'.\n\
         Step 3: write the final answer.\n\n\
         {body}\n\
         <end_of_turn>\n\
         <start_of_turn>model\n"
    )
}

/// Answer `question` as a stream of [`Segment`]s.
///
/// With `use_context`, hierarchical search runs first and its outcome is
/// narrated through `Thought` segments; the winning document's id is
/// delivered in the trailing `Sources` segment. Without context (or when
/// retrieval yields nothing), the model answers from general knowledge
/// and `Sources` is empty.
pub fn answer_stream(
    config: Arc<Config>,
    pool: SqlitePool,
    model: Arc<dyn LanguageModel>,
    question: String,
    use_context: bool,
) -> impl Stream<Item = Segment> + Send {
    async_stream::stream! {
        let mut context: Option<String> = None;
        let mut sources: Vec<String> = Vec::new();

        if use_context {
            yield Segment::Thought("Scanning document summaries...\n".to_string());

            let registry = Registry::load(&config.storage.registry_path);
            match search::hierarchical_search(&config, &pool, &registry, &question).await {
                Ok(outcome) if !outcome.is_empty() => {
                    yield Segment::Thought(format!(
                        "Relevant document found ({}).\n",
                        outcome.sources[0]
                    ));
                    yield Segment::Thought("Extracting matching passages...\n".to_string());
                    context = Some(
                        outcome
                            .passages
                            .iter()
                            .map(|hit| hit.passage.text.as_str())
                            .collect::<Vec<_>>()
                            .join("\n\n"),
                    );
                    sources = outcome.sources;
                }
                Ok(_) => {
                    yield Segment::Thought(
                        "No relevant document. Falling back to general knowledge.\n".to_string(),
                    );
                }
                Err(e) => {
                    tracing::warn!(error = %e, "retrieval failed; answering ungrounded");
                    yield Segment::Thought(
                        "Document search failed. Falling back to general knowledge.\n".to_string(),
                    );
                }
            }
        }

        yield Segment::Thought("Formulating the final answer...\n".to_string());

        let prompt = build_prompt(&question, context.as_deref());
        match model.stream(&prompt).await {
            Ok(tokens) => {
                let inner = segment::segment_stream(tokens, sources);
                futures_util::pin_mut!(inner);
                while let Some(seg) = inner.next().await {
                    yield seg;
                }
            }
            Err(e) => {
                yield Segment::Error(e.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::llm::TokenStream;
    use async_trait::async_trait;

    #[test]
    fn ungrounded_prompt_carries_question_and_sentinel() {
        let prompt = build_prompt("What is the dosage?", None);
        assert!(prompt.contains("What is the dosage?"));
        assert!(prompt.contains(RESPONSE_SENTINEL));
        assert!(!prompt.contains("Context from the document library"));
    }

    #[test]
    fn grounded_prompt_embeds_context_before_question() {
        let prompt = build_prompt("What is the dosage?", Some("Passage one.\n\nPassage two."));
        let ctx_pos = prompt.find("Passage one.").unwrap();
        let q_pos = prompt.find("What is the dosage?").unwrap();
        assert!(ctx_pos < q_pos);
        assert!(prompt.contains("strictly from the context"));
    }

    /// Model that replays a fixed token script.
    struct ScriptedModel {
        tokens: Vec<String>,
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn summarize(&self, _text: &str) -> Result<String, EngineError> {
            Ok("summary".to_string())
        }

        async fn stream(&self, _prompt: &str) -> Result<TokenStream, EngineError> {
            let items: Vec<Result<String, EngineError>> =
                self.tokens.iter().cloned().map(Ok).collect();
            Ok(Box::pin(futures_util::stream::iter(items)))
        }

        async fn available(&self) -> bool {
            true
        }
    }

    /// Model that is down.
    struct OfflineModel;

    #[async_trait]
    impl LanguageModel for OfflineModel {
        async fn summarize(&self, _text: &str) -> Result<String, EngineError> {
            Err(EngineError::ModelUnavailable("down".to_string()))
        }

        async fn stream(&self, _prompt: &str) -> Result<TokenStream, EngineError> {
            Err(EngineError::ModelUnavailable("down".to_string()))
        }

        async fn available(&self) -> bool {
            false
        }
    }

    fn test_config(dir: &std::path::Path) -> Arc<Config> {
        let toml = format!(
            r#"
[storage]
documents_dir = "{0}/docs"
registry_path = "{0}/registry.json"
db_path = "{0}/gw.sqlite"

[llm]
model = "test"

[server]
bind = "127.0.0.1:0"
"#,
            dir.display()
        );
        Arc::new(toml::from_str(&toml).unwrap())
    }

    #[tokio::test]
    async fn ungrounded_answer_streams_segments_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let pool = crate::db::connect_memory().await.unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();

        let model = Arc::new(ScriptedModel {
            tokens: vec!["pre###RESPONSE###".to_string(), "answer".to_string()],
        });

        let stream = answer_stream(config, pool, model, "q".to_string(), false);
        futures_util::pin_mut!(stream);
        let out: Vec<Segment> = stream.collect().await;

        assert_eq!(out[0], Segment::Thought("Formulating the final answer...\n".into()));
        assert!(out.contains(&Segment::FinalAnswer("answer".into())));
        assert_eq!(out[out.len() - 2], Segment::Sources(Vec::new()));
        assert_eq!(*out.last().unwrap(), Segment::Done);
    }

    #[tokio::test]
    async fn empty_corpus_falls_back_and_still_answers() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let pool = crate::db::connect_memory().await.unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();

        let model = Arc::new(ScriptedModel {
            tokens: vec!["###RESPONSE###from general knowledge".to_string()],
        });

        let stream = answer_stream(config, pool, model, "q".to_string(), true);
        futures_util::pin_mut!(stream);
        let out: Vec<Segment> = stream.collect().await;

        assert!(out.contains(&Segment::Thought(
            "No relevant document. Falling back to general knowledge.\n".into()
        )));
        assert!(out.contains(&Segment::FinalAnswer("from general knowledge".into())));
        assert_eq!(*out.last().unwrap(), Segment::Done);
    }

    #[tokio::test]
    async fn offline_model_yields_single_error_segment() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let pool = crate::db::connect_memory().await.unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();

        let stream = answer_stream(config, pool, Arc::new(OfflineModel), "q".to_string(), false);
        futures_util::pin_mut!(stream);
        let out: Vec<Segment> = stream.collect().await;

        assert!(matches!(out.last().unwrap(), Segment::Error(_)));
        assert!(!out.contains(&Segment::Done));
        assert_eq!(
            out.iter().filter(|s| matches!(s, Segment::Error(_))).count(),
            1
        );
    }
}
