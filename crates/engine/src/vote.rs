use futures::future::join_all;
use serde::Serialize;

use lodestar_llm::{Generate, LlmRequest};

use crate::budget::Usage;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoteResult {
    pub winner: String,
    pub tally: usize,
    pub considered: usize,
}

/// Majority over the first `k` candidates, compared after trimming. Ties go to the
/// candidate seen first.
pub fn self_consistency_vote<S: AsRef<str>>(candidates: &[S], k: usize) -> Option<VoteResult> {
    let considered: Vec<&str> = candidates
        .iter()
        .take(k)
        .map(|c| c.as_ref().trim())
        .collect();
    let mut tallies: Vec<(&str, usize)> = Vec::new();
    for candidate in &considered {
        match tallies.iter_mut().find(|(text, _)| text == candidate) {
            Some((_, count)) => *count += 1,
            None => tallies.push((*candidate, 1)),
        }
    }
    let mut best: Option<(&str, usize)> = None;
    for (text, count) in tallies {
        if best.map_or(true, |(_, top)| count > top) {
            best = Some((text, count));
        }
    }
    best.map(|(winner, tally)| VoteResult {
        winner: winner.to_string(),
        tally,
        considered: considered.len(),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct CandidateOutcome {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct Arbitration {
    pub candidates: Vec<CandidateOutcome>,
    pub vote: Option<VoteResult>,
    pub usage: Usage,
}

/// One concurrent call per model; failures stay with their candidate. The vote
/// runs over the successes among the first `k` models, so a failed slot is not
/// backfilled by a later model.
pub async fn arbitrate<G: Generate>(
    generator: &G,
    models: &[String],
    req: &LlmRequest,
    k: usize,
) -> Arbitration {
    let calls = models.iter().map(|model| generator.generate(model, req));
    let results = join_all(calls).await;
    let mut usage = Usage::default();
    let candidates: Vec<CandidateOutcome> = models
        .iter()
        .zip(results)
        .map(|(model, result)| match result {
            Ok(response) => {
                usage.record(response.prompt_tokens, response.completion_tokens);
                CandidateOutcome {
                    model: model.clone(),
                    reply: Some(response.content),
                    error: None,
                }
            }
            Err(err) => {
                tracing::warn!(model = %model, error = %err, "candidate generation failed");
                CandidateOutcome {
                    model: model.clone(),
                    reply: None,
                    error: Some(err.to_string()),
                }
            }
        })
        .collect();
    let successes: Vec<&str> = candidates
        .iter()
        .take(k)
        .filter_map(|c| c.reply.as_deref())
        .collect();
    let vote = self_consistency_vote(&successes, successes.len());
    Arbitration {
        candidates,
        vote,
        usage,
    }
}

#[cfg(test)]
mod tests {
    use anyhow::{anyhow, Result};
    use lodestar_llm::LlmResponse;

    use super::*;

    /// Replies with the text after `=` in the model name, or fails for `down`.
    struct Panel;

    impl Generate for Panel {
        async fn generate(&self, model: &str, _req: &LlmRequest) -> Result<LlmResponse> {
            match model.split_once('=') {
                Some((_, reply)) => Ok(LlmResponse {
                    content: reply.to_string(),
                    prompt_tokens: 3,
                    completion_tokens: 1,
                }),
                None => Err(anyhow!("{model} unreachable")),
            }
        }
    }

    fn models(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn majority_wins_after_trimming() {
        let vote = self_consistency_vote(&["b", " a ", "a", "b", "a"], 5).unwrap();
        assert_eq!(vote.winner, "a");
        assert_eq!(vote.tally, 3);
        assert_eq!(vote.considered, 5);
    }

    #[test]
    fn ties_go_to_the_earliest() {
        let vote = self_consistency_vote(&["b", "a", "a", "b"], 4).unwrap();
        assert_eq!(vote.winner, "b");
        assert_eq!(vote.tally, 2);
    }

    #[test]
    fn only_first_k_count() {
        let vote = self_consistency_vote(&["x", "y", "y", "y"], 1).unwrap();
        assert_eq!(vote.winner, "x");
        assert_eq!(vote.considered, 1);
    }

    #[test]
    fn empty_input_has_no_winner() {
        let empty: [&str; 0] = [];
        assert!(self_consistency_vote(&empty, 3).is_none());
        assert!(self_consistency_vote(&["a"], 0).is_none());
    }

    #[tokio::test]
    async fn failed_slots_inside_k_are_not_backfilled() {
        let panel = models(&["a=yes", "down", "c=no", "d=no"]);
        let arbitration = arbitrate(&Panel, &panel, &LlmRequest::user("q"), 2).await;
        assert_eq!(arbitration.candidates.len(), 4);
        assert_eq!(arbitration.candidates[1].reply, None);
        assert!(arbitration.candidates[1].error.is_some());
        let vote = arbitration.vote.unwrap();
        assert_eq!(vote.winner, "yes");
        assert_eq!(vote.considered, 1);
        assert_eq!(arbitration.usage.calls, 3);
    }

    #[tokio::test]
    async fn all_failures_inside_k_leave_no_winner() {
        let panel = models(&["down", "b=late"]);
        let arbitration = arbitrate(&Panel, &panel, &LlmRequest::user("q"), 1).await;
        assert!(arbitration.vote.is_none());
    }
}
