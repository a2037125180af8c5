//! Reconciliation of upstream responses against each request's original candidates.
//!
//! A combined response carries one line per batch position (`"<n>. label, label"`); a single-item
//! response is a bare comma-separated label list. Labels are bound back to original keys with a
//! two-phase match scoped to one request:
//!
//! 1. exact: the label equals an unmatched original key
//! 2. fuzzy (only when exact misses): the first unmatched key, in insertion order, where either
//!    string contains the other and the label is at least two characters long
//!
//! Unbound labels are dropped. Binding nothing at all is an error rather than an empty result.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::keyweights::KeyWeights;
use crate::outcome::{FailureKind, Reconciled, ResultError};

/// Labels shorter than this never take part in substring matching.
const MIN_FUZZY_LABEL_CHARS: usize = 2;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("no corresponding result in upstream response for position {0}")]
    MissingPosition(usize),
    #[error("no usable result: none of {labels} returned labels matched a candidate")]
    NoUsableResult { labels: usize },
}

impl From<ReconcileError> for ResultError {
    fn from(e: ReconcileError) -> Self {
        ResultError::new(FailureKind::ReconciliationMiss, e.to_string())
    }
}

/// Split a combined response into label lists keyed by 0-based batch index.
///
/// Lines that are blank, do not start with a digit, have no `.` after the number, or carry no
/// labels are ignored. A later line for a position replaces an earlier one.
pub fn parse_batch_response(response: &str) -> HashMap<usize, Vec<String>> {
    let mut by_index = HashMap::new();

    for line in response.lines() {
        let line = line.trim();
        if !line.starts_with(|c: char| c.is_ascii_digit()) {
            continue;
        }
        let Some((number, rest)) = line.split_once('.') else {
            continue;
        };
        let Ok(position) = number.trim().parse::<usize>() else {
            continue;
        };
        if position == 0 {
            continue;
        }
        let labels = split_labels(rest);
        if labels.is_empty() {
            continue;
        }
        by_index.insert(position - 1, labels);
    }

    by_index
}

/// Parse a single-item response into its labels.
pub fn parse_single_response(response: &str) -> Vec<String> {
    split_labels(response)
}

fn split_labels(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .map(str::to_string)
        .collect()
}

/// Bind upstream labels to original keys. Returns the bound keys with their original weights in
/// binding order.
pub fn match_labels<S: AsRef<str>>(labels: &[S], original: &KeyWeights) -> KeyWeights {
    let mut bound = KeyWeights::new();
    let mut matched: HashSet<&str> = HashSet::new();

    for label in labels {
        let label = label.as_ref();

        let exact = original
            .iter()
            .find(|(key, _)| *key == label && !matched.contains(key));
        if let Some((key, weight)) = exact {
            matched.insert(key);
            bound.insert(key, weight);
            continue;
        }

        if label.chars().count() < MIN_FUZZY_LABEL_CHARS {
            continue;
        }
        let hit = original.iter().find(|(key, _)| {
            !matched.contains(key) && (key.contains(label) || label.contains(key))
        });
        if let Some((key, weight)) = hit {
            matched.insert(key);
            bound.insert(key, weight);
        }
    }

    bound
}

/// Reconcile one request's labels into its ranked, truncated output.
pub fn reconcile<S: AsRef<str>>(
    labels: &[S],
    original: &KeyWeights,
    max_results: usize,
) -> Result<Reconciled, ReconcileError> {
    let bound = match_labels(labels, original);
    if bound.is_empty() {
        return Err(ReconcileError::NoUsableResult {
            labels: labels.len(),
        });
    }

    let output = bound.top_n(max_results);
    let top_keys = output.keys().map(str::to_string).collect();
    Ok(Reconciled { output, top_keys })
}
