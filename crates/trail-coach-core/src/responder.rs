//! Confidence gate and answer payload.
//!
//! A retrieval result is classified against two thresholds:
//!
//! | Best score | Outcome | Text | Sources / related |
//! |------------|---------|------|-------------------|
//! | none, or `< min` | [`Confidence::NoMatch`] | fallback | empty |
//! | `min ≤ s < confident` | [`Confidence::Low`] | fallback | empty, `confidence` set |
//! | `≥ confident` | [`Confidence::Confident`] | top answer | every match `≥ min` |
//!
//! Scores leave this module as integer percentages (`round(score × 100)`).

use serde::Serialize;

use crate::error::{CoachError, Result};
use crate::models::ScoredMatch;

/// Default lower bound: below this nothing is relevant.
pub const DEFAULT_MIN_THRESHOLD: f32 = 0.45;
/// Default upper bound: at or above this the top match is answered directly.
pub const DEFAULT_CONFIDENT_THRESHOLD: f32 = 0.55;

/// Default reply when no confident answer exists.
pub const DEFAULT_FALLBACK_MESSAGE: &str = "I couldn't find specific information on this topic \
in my knowledge base. Try rephrasing the question, or ask about plant-based nutrition, \
running and trail training, or the reference books (The Plant-Based Athlete, Eat & Run, \
Finding Ultra, Andiamo a correre).";

/// The two-threshold confidence policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    min: f32,
    confident: f32,
}

impl Thresholds {
    /// Both values must lie in `[0, 1]` with `min < confident`.
    pub fn new(min: f32, confident: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&min) || !(0.0..=1.0).contains(&confident) {
            return Err(CoachError::Config(format!(
                "thresholds must be in [0, 1], got min={} confident={}",
                min, confident
            )));
        }
        if min >= confident {
            return Err(CoachError::Config(format!(
                "min threshold {} must be below confident threshold {}",
                min, confident
            )));
        }
        Ok(Self { min, confident })
    }

    pub fn min(&self) -> f32 {
        self.min
    }

    pub fn confident(&self) -> f32 {
        self.confident
    }

    /// Classify a best score.
    pub fn classify(&self, best: Option<f32>) -> Confidence {
        match best {
            Some(s) if s >= self.confident => Confidence::Confident,
            Some(s) if s >= self.min => Confidence::Low,
            _ => Confidence::NoMatch,
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min: DEFAULT_MIN_THRESHOLD,
            confident: DEFAULT_CONFIDENT_THRESHOLD,
        }
    }
}

/// Three-way classification of a retrieval result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Confident,
    Low,
    NoMatch,
}

/// Attribution for a relevant match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceRef {
    pub source: String,
    pub category: String,
    /// Percent similarity.
    pub score: i32,
}

/// An alternative relevant answer shown next to the primary one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelatedAnswer {
    pub answer: String,
    pub source: String,
    /// Percent similarity.
    pub score: i32,
}

/// Final answer payload for one query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Response {
    pub confidence: Confidence,
    pub text: String,
    pub sources: Vec<SourceRef>,
    pub related: Vec<RelatedAnswer>,
    /// Percent similarity of the best match, for low-confidence and
    /// confident results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_score: Option<i32>,
}

/// Cosine similarity as a rounded integer percentage.
pub fn to_percent(score: f32) -> i32 {
    (score * 100.0).round() as i32
}

/// Turns ranked matches into a [`Response`].
#[derive(Debug, Clone)]
pub struct Responder {
    thresholds: Thresholds,
    fallback_message: String,
}

impl Default for Responder {
    fn default() -> Self {
        Self::new(Thresholds::default(), DEFAULT_FALLBACK_MESSAGE)
    }
}

impl Responder {
    pub fn new(thresholds: Thresholds, fallback_message: impl Into<String>) -> Self {
        Self {
            thresholds,
            fallback_message: fallback_message.into(),
        }
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Build the response for `matches`, which must be sorted by score
    /// descending (as returned by [`top_k`](crate::retriever::top_k)).
    pub fn respond(&self, matches: &[ScoredMatch<'_>]) -> Response {
        let best = matches.first().map(|m| m.score);
        match self.thresholds.classify(best) {
            Confidence::NoMatch => self.fallback(Confidence::NoMatch, None),
            Confidence::Low => self.fallback(Confidence::Low, best.map(to_percent)),
            Confidence::Confident => {
                let relevant: Vec<&ScoredMatch<'_>> = matches
                    .iter()
                    .filter(|m| m.score >= self.thresholds.min)
                    .collect();
                let sources = relevant
                    .iter()
                    .map(|m| SourceRef {
                        source: m.entry.source.clone(),
                        category: m.entry.category.clone(),
                        score: to_percent(m.score),
                    })
                    .collect();
                let related = relevant
                    .iter()
                    .skip(1)
                    .map(|m| RelatedAnswer {
                        answer: m.entry.answer.clone(),
                        source: m.entry.source.clone(),
                        score: to_percent(m.score),
                    })
                    .collect();
                Response {
                    confidence: Confidence::Confident,
                    text: relevant[0].entry.answer.clone(),
                    sources,
                    related,
                    best_score: best.map(to_percent),
                }
            }
        }
    }

    fn fallback(&self, confidence: Confidence, best_score: Option<i32>) -> Response {
        Response {
            confidence,
            text: self.fallback_message.clone(),
            sources: Vec::new(),
            related: Vec::new(),
            best_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::KnowledgeEntry;

    fn entry(id: i64) -> KnowledgeEntry {
        KnowledgeEntry {
            id,
            category: "nutrizione".to_string(),
            phrasings: vec![format!("q{}", id)],
            answer: format!("A{}", id),
            source: format!("S{}", id),
            rank_hint: 0,
        }
    }

    fn matches<'a>(entries: &'a [KnowledgeEntry], scores: &[f32]) -> Vec<ScoredMatch<'a>> {
        entries
            .iter()
            .zip(scores)
            .map(|(entry, &score)| ScoredMatch { entry, score })
            .collect()
    }

    #[test]
    fn no_matches_is_no_match() {
        let r = Responder::default().respond(&[]);
        assert_eq!(r.confidence, Confidence::NoMatch);
        assert_eq!(r.text, DEFAULT_FALLBACK_MESSAGE);
        assert!(r.sources.is_empty());
        assert_eq!(r.best_score, None);
    }

    #[test]
    fn below_min_is_no_match() {
        let kb = [entry(1)];
        let r = Responder::default().respond(&matches(&kb, &[0.30]));
        assert_eq!(r.confidence, Confidence::NoMatch);
        assert!(r.sources.is_empty());
        assert!(r.related.is_empty());
    }

    #[test]
    fn exactly_min_is_low_confidence_with_score() {
        let kb = [entry(1)];
        let r = Responder::default().respond(&matches(&kb, &[DEFAULT_MIN_THRESHOLD]));
        assert_eq!(r.confidence, Confidence::Low);
        assert_eq!(r.text, DEFAULT_FALLBACK_MESSAGE);
        assert!(r.sources.is_empty());
        assert_eq!(r.best_score, Some(45));
    }

    #[test]
    fn just_below_confident_is_not_answered() {
        let kb = [entry(1)];
        let just_below = f32::from_bits(DEFAULT_CONFIDENT_THRESHOLD.to_bits() - 1);
        let r = Responder::default().respond(&matches(&kb, &[just_below]));
        assert_eq!(r.confidence, Confidence::Low);
        assert_ne!(r.text, "A1");
    }

    #[test]
    fn exactly_confident_is_answered() {
        let kb = [entry(1)];
        let r = Responder::default().respond(&matches(&kb, &[DEFAULT_CONFIDENT_THRESHOLD]));
        assert_eq!(r.confidence, Confidence::Confident);
        assert_eq!(r.text, "A1");
    }

    #[test]
    fn confident_attaches_relevant_sources_and_related() {
        let kb = [entry(1), entry(2), entry(3)];
        let r = Responder::default().respond(&matches(&kb, &[0.91, 0.48, 0.20]));
        assert_eq!(r.confidence, Confidence::Confident);
        assert_eq!(r.text, "A1");
        assert_eq!(
            r.sources,
            vec![
                SourceRef {
                    source: "S1".into(),
                    category: "nutrizione".into(),
                    score: 91
                },
                SourceRef {
                    source: "S2".into(),
                    category: "nutrizione".into(),
                    score: 48
                },
            ]
        );
        assert_eq!(
            r.related,
            vec![RelatedAnswer {
                answer: "A2".into(),
                source: "S2".into(),
                score: 48
            }]
        );
        assert_eq!(r.best_score, Some(91));
    }

    #[test]
    fn single_confident_match_has_no_related() {
        let kb = [entry(1)];
        let r = Responder::default().respond(&matches(&kb, &[0.999]));
        assert_eq!(r.sources.len(), 1);
        assert_eq!(r.sources[0].score, 100);
        assert!(r.related.is_empty());
    }

    #[test]
    fn custom_fallback_message() {
        let responder = Responder::new(Thresholds::default(), "Prova a riformulare la domanda.");
        assert_eq!(responder.respond(&[]).text, "Prova a riformulare la domanda.");
    }

    #[test]
    fn thresholds_validation() {
        assert!(Thresholds::new(0.35, 0.55).is_ok());
        assert!(Thresholds::new(0.55, 0.55).is_err());
        assert!(Thresholds::new(0.6, 0.5).is_err());
        assert!(Thresholds::new(-0.1, 0.5).is_err());
        assert!(Thresholds::new(0.1, 1.5).is_err());
    }

    #[test]
    fn percent_rounding() {
        assert_eq!(to_percent(0.994), 99);
        assert_eq!(to_percent(0.996), 100);
        assert_eq!(to_percent(0.0), 0);
        assert_eq!(to_percent(-0.126), -13);
    }

    #[test]
    fn serializes_snake_case_confidence() {
        let r = Responder::default().respond(&[]);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["confidence"], "no_match");
        assert!(json.get("best_score").is_none());
    }
}
