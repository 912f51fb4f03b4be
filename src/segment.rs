//! Streaming thought/answer segmentation.
//!
//! The model is prompted to think first, then write the sentinel marker,
//! then write the answer — all in one continuous token stream. Token
//! boundaries do not align with the marker, so per-token matching would
//! miss a marker split as `"...###RESP"` + `"ONSE###"`. Instead every
//! token is appended to an accumulation buffer and the buffer is
//! rescanned; thinking phases are short, so the rescan cost is
//! negligible. Tokens are still forwarded to the consumer immediately —
//! the buffer exists for detection, not for delaying output.
//!
//! The sentinel-in-stream protocol is inherently fragile: the model can
//! quote the marker, never emit it, or split it unpredictably. The
//! end-of-stream fallback treats an undetected marker as "the whole
//! output was the answer"; anything stronger belongs in the generator,
//! not here.

use futures_util::{Stream, StreamExt};

use crate::llm::TokenStream;
use crate::models::Segment;

/// Marker separating the thought phase from the final answer.
pub const RESPONSE_SENTINEL: &str = "###RESPONSE###";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Thinking,
    Answering,
}

/// Pure segmentation core. Feed tokens with [`push`](Self::push), close
/// with [`finish`](Self::finish); each call returns the segments to emit.
pub struct Segmenter {
    phase: Phase,
    buffer: String,
}

impl Segmenter {
    pub fn new() -> Self {
        Self {
            phase: Phase::Thinking,
            buffer: String::new(),
        }
    }

    /// Consume one incoming token.
    pub fn push(&mut self, token: &str) -> Vec<Segment> {
        match self.phase {
            Phase::Answering => vec![Segment::FinalAnswer(token.to_string())],
            Phase::Thinking => {
                self.buffer.push_str(token);

                let Some(pos) = self.buffer.find(RESPONSE_SENTINEL) else {
                    // Marker not complete yet; forward the token so the
                    // consumer sees live progress.
                    return vec![Segment::Thought(token.to_string())];
                };

                let mut out = Vec::new();
                let thought = self.buffer[..pos].trim();
                if !thought.is_empty() {
                    out.push(Segment::Thought(thought.to_string()));
                }
                let answer = &self.buffer[pos + RESPONSE_SENTINEL.len()..];
                if !answer.is_empty() {
                    out.push(Segment::FinalAnswer(answer.to_string()));
                }
                self.buffer.clear();
                self.phase = Phase::Answering;
                out
            }
        }
    }

    /// Close the stream. If the marker never appeared and the buffer
    /// holds non-whitespace content, that content becomes the answer —
    /// mislabeling beats silently dropping the model's entire output.
    pub fn finish(self) -> Vec<Segment> {
        match self.phase {
            Phase::Thinking if !self.buffer.trim().is_empty() => {
                vec![Segment::FinalAnswer(self.buffer.trim().to_string())]
            }
            _ => Vec::new(),
        }
    }
}

impl Default for Segmenter {
    fn default() -> Self {
        Self::new()
    }
}

/// Drive a [`Segmenter`] over a raw token stream, then append the
/// trailing `Sources` and `Done` segments.
///
/// A mid-stream token error terminates with a single `Error` segment;
/// no `Sources`/`Done` follow a failed generation.
pub fn segment_stream(
    tokens: TokenStream,
    sources: Vec<String>,
) -> impl Stream<Item = Segment> + Send {
    async_stream::stream! {
        let mut tokens = tokens;
        let mut segmenter = Segmenter::new();
        while let Some(item) = tokens.next().await {
            match item {
                Ok(token) => {
                    for segment in segmenter.push(&token) {
                        yield segment;
                    }
                }
                Err(e) => {
                    yield Segment::Error(e.to_string());
                    return;
                }
            }
        }
        for segment in segmenter.finish() {
            yield segment;
        }
        yield Segment::Sources(sources);
        yield Segment::Done;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    fn run(tokens: &[&str]) -> Vec<Segment> {
        let mut segmenter = Segmenter::new();
        let mut out = Vec::new();
        for token in tokens {
            out.extend(segmenter.push(token));
        }
        out.extend(segmenter.finish());
        out
    }

    #[test]
    fn sentinel_split_across_two_tokens() {
        let out = run(&["I ", "think", "...###RESP", "ONSE###", "Jawaban", "nya."]);
        assert_eq!(
            out,
            vec![
                Segment::Thought("I ".into()),
                Segment::Thought("think".into()),
                Segment::Thought("...###RESP".into()),
                // The completing token triggers the consolidated,
                // trimmed thought; its post-marker remainder is empty.
                Segment::Thought("I think...".into()),
                Segment::FinalAnswer("Jawaban".into()),
                Segment::FinalAnswer("nya.".into()),
            ]
        );
    }

    #[test]
    fn answer_begins_inside_the_splitting_token() {
        let out = run(&["thinking###RESPON", "SE###right away", " more"]);
        assert_eq!(
            out,
            vec![
                Segment::Thought("thinking###RESPON".into()),
                Segment::Thought("thinking".into()),
                Segment::FinalAnswer("right away".into()),
                Segment::FinalAnswer(" more".into()),
            ]
        );
    }

    #[test]
    fn sentinel_in_a_single_token() {
        let out = run(&["a###RESPONSE###b"]);
        assert_eq!(
            out,
            vec![
                Segment::Thought("a".into()),
                Segment::FinalAnswer("b".into()),
            ]
        );
    }

    #[test]
    fn sentinel_first_means_no_thought() {
        // The marker completes within the first token: the empty
        // pre-part emits no thought at all.
        let out = run(&["###RESPONSE###", "answer"]);
        assert_eq!(out, vec![Segment::FinalAnswer("answer".into())]);
    }

    #[test]
    fn missing_sentinel_falls_back_to_final_answer() {
        let out = run(&["The ", "whole ", "reply."]);
        let last = out.last().unwrap();
        assert_eq!(*last, Segment::FinalAnswer("The whole reply.".into()));
        // Everything before the fallback is thought-labeled; the answer
        // itself arrives exactly once.
        let answers: Vec<_> = out
            .iter()
            .filter(|s| matches!(s, Segment::FinalAnswer(_)))
            .collect();
        assert_eq!(answers.len(), 1);
    }

    #[test]
    fn whitespace_only_stream_yields_nothing_on_finish() {
        let out = run(&["  ", "\n"]);
        assert!(out
            .iter()
            .all(|s| matches!(s, Segment::Thought(_))));
    }

    #[test]
    fn empty_stream_is_silent() {
        assert!(run(&[]).is_empty());
    }

    fn scripted(tokens: Vec<Result<String, EngineError>>) -> TokenStream {
        Box::pin(futures_util::stream::iter(tokens))
    }

    #[tokio::test]
    async fn stream_appends_sources_and_done() {
        let tokens = scripted(vec![
            Ok("x###RESPONSE###y".to_string()),
            Ok("!".to_string()),
        ]);
        let out: Vec<Segment> =
            segment_stream(tokens, vec!["guide.pdf".to_string()]).collect().await;
        assert_eq!(
            out,
            vec![
                Segment::Thought("x".into()),
                Segment::FinalAnswer("y".into()),
                Segment::FinalAnswer("!".into()),
                Segment::Sources(vec!["guide.pdf".into()]),
                Segment::Done,
            ]
        );
    }

    #[tokio::test]
    async fn stream_without_sources_sends_empty_list() {
        let tokens = scripted(vec![Ok("###RESPONSE###hi".to_string())]);
        let out: Vec<Segment> = segment_stream(tokens, Vec::new()).collect().await;
        assert!(out.contains(&Segment::Sources(Vec::new())));
        assert_eq!(*out.last().unwrap(), Segment::Done);
    }

    #[tokio::test]
    async fn mid_stream_error_terminates_without_done() {
        let tokens = scripted(vec![
            Ok("partial".to_string()),
            Err(EngineError::ModelUnavailable("gone".to_string())),
        ]);
        let out: Vec<Segment> = segment_stream(tokens, Vec::new()).collect().await;
        assert_eq!(out[0], Segment::Thought("partial".into()));
        assert!(matches!(out[1], Segment::Error(_)));
        assert_eq!(out.len(), 2);
    }
}
