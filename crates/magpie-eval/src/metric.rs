// Copyright © 2025 lituus-io <spicyzhug@gmail.com>
// All Rights Reserved.
// Licensed under PolyForm Noncommercial 1.0.0

//! Metric trait and implementations
//!
//! Includes token-level F1 metrics with stop word filtering.

use magpie::{Trace, Values};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Result of a metric evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    /// Score in `[0, 1]`
    pub score: f64,

    /// Whether the prediction passed
    pub passed: bool,

    /// Optional per-field scores
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<BTreeMap<String, f64>>,

    /// Optional details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl MetricResult {
    /// Create a new metric result. Scores are clamped to `[0, 1]`; NaN
    /// becomes 0.
    pub fn new(score: f64) -> Self {
        let score = if score.is_nan() {
            0.0
        } else {
            score.clamp(0.0, 1.0)
        };
        Self {
            score,
            passed: score > 0.0,
            breakdown: None,
            details: None,
        }
    }

    /// Create a passed result
    pub fn pass() -> Self {
        Self::new(1.0)
    }

    /// Create a failed result
    pub fn fail() -> Self {
        Self::new(0.0)
    }

    /// Add per-field scores
    pub fn with_breakdown(mut self, breakdown: BTreeMap<String, f64>) -> Self {
        self.breakdown = Some(breakdown);
        self
    }

    /// Add details
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Scores a pipeline output against the expected output.
///
/// Implementations may panic; the harness contains it and records a
/// failed example.
pub trait Metric: Send + Sync {
    /// Score `actual` against `expected`. The trace of the run is available
    /// for metrics that judge intermediate steps.
    fn score(&self, expected: &Values, actual: &Values, trace: Option<&Trace>) -> MetricResult;

    /// Get metric name
    fn name(&self) -> &str;
}

/// Metric backed by a closure
pub struct FnMetric<F> {
    name: &'static str,
    f: F,
}

/// Wrap a closure as a [`Metric`].
pub fn metric_fn<F>(name: &'static str, f: F) -> FnMetric<F>
where
    F: Fn(&Values, &Values, Option<&Trace>) -> f64 + Send + Sync,
{
    FnMetric { name, f }
}

impl<F> Metric for FnMetric<F>
where
    F: Fn(&Values, &Values, Option<&Trace>) -> f64 + Send + Sync,
{
    fn score(&self, expected: &Values, actual: &Values, trace: Option<&Trace>) -> MetricResult {
        MetricResult::new((self.f)(expected, actual, trace))
    }

    fn name(&self) -> &str {
        self.name
    }
}

/// Exact match on every expected field (or a chosen subset).
#[derive(Debug, Clone, Default)]
pub struct ExactMatch {
    fields: Option<Vec<String>>,
    normalize: bool,
}

impl ExactMatch {
    /// Compare every expected field
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare only the named fields
    pub fn fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: Some(fields.into_iter().map(Into::into).collect()),
            normalize: false,
        }
    }

    /// Trim and lowercase both sides before comparing
    pub fn normalized(mut self) -> Self {
        self.normalize = true;
        self
    }

    fn same(&self, a: &str, b: &str) -> bool {
        if self.normalize {
            a.trim().to_lowercase() == b.trim().to_lowercase()
        } else {
            a == b
        }
    }
}

impl Metric for ExactMatch {
    fn score(&self, expected: &Values, actual: &Values, _trace: Option<&Trace>) -> MetricResult {
        let keys: Vec<&str> = match &self.fields {
            Some(fields) => fields.iter().map(String::as_str).collect(),
            None => expected.keys().map(String::as_str).collect(),
        };
        if keys.is_empty() {
            return MetricResult::fail().with_details("No expected outputs in example");
        }

        let breakdown: BTreeMap<String, f64> = keys
            .iter()
            .map(|key| {
                let hit = match (expected.get(*key), actual.get(*key)) {
                    (Some(e), Some(a)) => self.same(e, a),
                    _ => false,
                };
                (key.to_string(), if hit { 1.0 } else { 0.0 })
            })
            .collect();

        let all_match = breakdown.values().all(|s| *s == 1.0);
        let result = if all_match {
            MetricResult::pass()
        } else {
            MetricResult::fail()
        };
        result.with_breakdown(breakdown)
    }

    fn name(&self) -> &str {
        "exact_match"
    }
}

/// F1 score metric (for token-level comparison)
pub struct F1Score;

impl F1Score {
    fn tokenize(s: &str) -> Vec<&str> {
        s.split_whitespace().collect()
    }

    fn calculate_f1(prediction_tokens: &[&str], gold_tokens: &[&str]) -> f64 {
        if prediction_tokens.is_empty() || gold_tokens.is_empty() {
            return 0.0;
        }

        let pred_set: HashSet<_> = prediction_tokens.iter().collect();
        let gold_set: HashSet<_> = gold_tokens.iter().collect();

        let intersection = pred_set.intersection(&gold_set).count();

        let precision = intersection as f64 / pred_set.len() as f64;
        let recall = intersection as f64 / gold_set.len() as f64;

        if precision + recall == 0.0 {
            0.0
        } else {
            2.0 * (precision * recall) / (precision + recall)
        }
    }
}

impl Metric for F1Score {
    fn score(&self, expected: &Values, actual: &Values, _trace: Option<&Trace>) -> MetricResult {
        let breakdown: BTreeMap<String, f64> = expected
            .iter()
            .map(|(key, gold)| {
                let score = actual
                    .get(key)
                    .map(|pred| Self::calculate_f1(&Self::tokenize(pred), &Self::tokenize(gold)))
                    .unwrap_or(0.0);
                (key.clone(), score)
            })
            .collect();

        mean_with_breakdown(breakdown)
    }

    fn name(&self) -> &str {
        "f1_score"
    }
}

/// Default English stop words for semantic comparison.
const DEFAULT_STOP_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "as", "is", "was", "are", "were", "been", "be", "have", "has", "had", "do", "does",
    "did", "will", "would", "could", "should", "may", "might", "must", "shall", "can", "it",
    "its", "this", "that", "these", "those", "i", "you", "he", "she", "we", "they", "me", "him",
    "her", "us", "them", "my", "your", "his", "our", "their", "what", "which", "who", "whom",
    "whose", "when", "where", "why", "how", "all", "each", "every", "both", "few", "more",
    "most", "other", "some", "such", "no", "nor", "not", "only", "own", "same", "so", "than",
    "too", "very", "just", "also", "now", "here",
];

/// Semantic F1 metric with stop word filtering.
///
/// Computes F1 score while ignoring common stop words and punctuation.
pub struct SemanticF1 {
    stop_words: HashSet<&'static str>,
    normalize: bool,
}

impl Default for SemanticF1 {
    fn default() -> Self {
        Self::new()
    }
}

impl SemanticF1 {
    /// Create a new SemanticF1 metric with default stop words.
    pub fn new() -> Self {
        Self {
            stop_words: DEFAULT_STOP_WORDS.iter().copied().collect(),
            normalize: true,
        }
    }

    /// Create without stop words.
    pub fn without_stop_words() -> Self {
        Self {
            stop_words: HashSet::new(),
            normalize: true,
        }
    }

    /// Set normalization.
    pub fn normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    fn tokenize(&self, s: &str) -> HashSet<String> {
        s.split(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
            .filter(|t| !t.is_empty())
            .map(|t| {
                if self.normalize {
                    t.to_lowercase()
                } else {
                    t.to_string()
                }
            })
            .filter(|t| !self.stop_words.contains(t.as_str()))
            .collect()
    }

    fn calculate_f1(pred: &HashSet<String>, gold: &HashSet<String>) -> f64 {
        if pred.is_empty() && gold.is_empty() {
            return 1.0;
        }
        if pred.is_empty() || gold.is_empty() {
            return 0.0;
        }

        let intersection = pred.intersection(gold).count();
        if intersection == 0 {
            return 0.0;
        }

        let precision = intersection as f64 / pred.len() as f64;
        let recall = intersection as f64 / gold.len() as f64;

        2.0 * (precision * recall) / (precision + recall)
    }
}

impl Metric for SemanticF1 {
    fn score(&self, expected: &Values, actual: &Values, _trace: Option<&Trace>) -> MetricResult {
        let breakdown: BTreeMap<String, f64> = expected
            .iter()
            .map(|(key, gold)| {
                let score = actual
                    .get(key)
                    .map(|pred| Self::calculate_f1(&self.tokenize(pred), &self.tokenize(gold)))
                    .unwrap_or(0.0);
                (key.clone(), score)
            })
            .collect();

        mean_with_breakdown(breakdown)
    }

    fn name(&self) -> &str {
        "semantic_f1"
    }
}

fn mean_with_breakdown(breakdown: BTreeMap<String, f64>) -> MetricResult {
    if breakdown.is_empty() {
        return MetricResult::fail().with_details("No expected outputs in example");
    }
    let mean = breakdown.values().sum::<f64>() / breakdown.len() as f64;
    MetricResult::new(mean).with_breakdown(breakdown)
}
