//! Rendering of upstream payloads.
//!
//! A combined payload lists every request of a batch under its 1-based position; the single-item
//! payload lists one request's candidates. Both bound the candidate list to cap upstream cost.
//! The expected answer formats are the ones parsed in [`crate::reconcile`].

use crate::request::Request;
use crate::settings::PromptConfig;

/// Prefix of the line carrying a request's candidate keys.
pub const KEYS_LINE_PREFIX: &str = "keys:";

const BATCH_RESPONSE_FORMAT: &str = "Respond with one line per entry, numbered to match, \
listing the selected keys separated by commas.\nExample:\n1. key_a, key_b\n2. key_c";

const SINGLE_RESPONSE_FORMAT: &str =
    "Respond with the selected keys separated by commas and nothing else.";

/// Builds upstream payloads from requests.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    batch_instructions: String,
    single_instructions: String,
    max_candidates: usize,
}

impl PromptBuilder {
    pub fn new(config: &PromptConfig, max_candidates: usize) -> Self {
        Self {
            batch_instructions: config.batch_instructions.clone(),
            single_instructions: config.single_instructions.clone(),
            max_candidates,
        }
    }

    pub fn max_candidates(&self) -> usize {
        self.max_candidates
    }

    /// Render one payload enumerating every request of the batch by position.
    pub fn batch(&self, requests: &[Request]) -> String {
        let mut parts = Vec::with_capacity(requests.len() * 2 + 2);
        parts.push(self.batch_instructions.trim_end().to_string());

        for (i, request) in requests.iter().enumerate() {
            let position = i + 1;
            let label = match &request.subject {
                Some(subject) => single_line(subject),
                None => format!("request {position}"),
            };
            parts.push(format!("\n{position}. {label}:"));
            parts.push(self.keys_line(request));
        }

        parts.push(format!("\n{BATCH_RESPONSE_FORMAT}"));
        parts.join("\n")
    }

    /// Render the single-item payload used by the degraded fallback.
    pub fn single(&self, request: &Request) -> String {
        let mut parts = vec![self.single_instructions.trim_end().to_string()];
        if let Some(subject) = &request.subject {
            parts.push(format!("\nsubject: {}", single_line(subject)));
        }
        parts.push(self.keys_line(request));
        parts.push(format!("\n{SINGLE_RESPONSE_FORMAT}"));
        parts.join("\n")
    }

    fn keys_line(&self, request: &Request) -> String {
        let keys: Vec<String> = request
            .payload
            .candidate_keys(self.max_candidates)
            .into_iter()
            .map(single_line)
            .collect();
        format!("{KEYS_LINE_PREFIX} {}", keys.join(", "))
    }
}

/// Candidate key lists found in a rendered payload, in position order.
///
/// Used by simulated upstreams to answer with the keys they were offered.
pub fn offered_keys(payload: &str) -> Vec<Vec<String>> {
    payload
        .lines()
        .filter_map(|line| line.trim().strip_prefix(KEYS_LINE_PREFIX))
        .map(|rest| {
            rest.split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect()
        })
        .collect()
}

fn single_line(s: &str) -> String {
    s.replace(['\r', '\n'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyweights::KeyWeights;
    use tokio::time::Instant;

    fn builder(max_candidates: usize) -> PromptBuilder {
        PromptBuilder::new(&PromptConfig::default(), max_candidates)
    }

    fn request(subject: Option<&str>, payload: KeyWeights) -> Request {
        Request::new(subject.map(str::to_string), payload, 5, Instant::now())
    }

    #[test]
    fn batch_payload_enumerates_positions() {
        let requests = vec![
            request(Some("Acme"), KeyWeights::from([("alpha", 5), ("beta", 3)])),
            request(None, KeyWeights::from([("gamma", 4)])),
        ];
        let payload = builder(50).batch(&requests);

        assert!(payload.contains("1. Acme:\nkeys: alpha, beta"));
        assert!(payload.contains("2. request 2:\nkeys: gamma"));
        assert_eq!(
            offered_keys(&payload),
            vec![vec!["alpha", "beta"], vec!["gamma"]]
        );
    }

    #[test]
    fn candidates_are_bounded_in_insertion_order() {
        let payload: KeyWeights = (0..80).map(|i| (format!("k{i}"), 100 - i)).collect();
        let rendered = builder(50).single(&request(None, payload));
        let offered = offered_keys(&rendered);
        assert_eq!(offered.len(), 1);
        assert_eq!(offered[0].len(), 50);
        assert_eq!(offered[0][0], "k0");
        assert_eq!(offered[0][49], "k49");
    }

    #[test]
    fn subjects_are_flattened_to_one_line() {
        let r = request(Some("multi\nline"), KeyWeights::from([("a", 1)]));
        let payload = builder(50).batch(std::slice::from_ref(&r));
        assert!(payload.contains("1. multi line:"));
    }
}
