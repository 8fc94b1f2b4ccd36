//! Text correction for recognizer output.
//!
//! Recognized text is normalized, rewritten by an ordered rule table until it
//! stops changing, and then searched for the configured trigger phrases with
//! a bounded edit distance.

mod matcher;
mod normalize;
mod rules;

use normalize::normalize;
pub use rules::{CorrectionRule, default_rules};

use crate::config::CorrectionConfig;
use crate::error::CorrectionConfigError;
use rules::CompiledRule;

/// A trigger phrase found in corrected text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TriggerMatch {
    pub phrase: String,
    pub distance: usize,
}

#[derive(Debug)]
struct TriggerPhrase {
    text: String,
    tolerance: usize,
}

/// Compiled rule table and trigger phrases. Immutable after construction.
#[derive(Debug)]
pub struct TextCorrector {
    rules: Vec<CompiledRule>,
    phrases: Vec<TriggerPhrase>,
    max_passes: usize,
}

impl TextCorrector {
    pub fn new(config: &CorrectionConfig) -> Result<Self, CorrectionConfigError> {
        if !(0.0..1.0).contains(&config.tolerance_ratio) {
            return Err(CorrectionConfigError::InvalidTolerance(config.tolerance_ratio));
        }
        if config.trigger_phrases.is_empty() {
            return Err(CorrectionConfigError::NoTriggerPhrases);
        }

        let mut phrases = Vec::with_capacity(config.trigger_phrases.len());
        for (index, phrase) in config.trigger_phrases.iter().enumerate() {
            let text = normalize(phrase);
            if text.is_empty() {
                return Err(CorrectionConfigError::EmptyTriggerPhrase { index });
            }
            let len = text.chars().count();
            let tolerance = config
                .min_tolerance
                .max((len as f32 * config.tolerance_ratio).floor() as usize);
            phrases.push(TriggerPhrase { text, tolerance });
        }

        let rules = rules::compile_rules(&config.rules)?;
        log::debug!(
            "Text corrector ready: {} rule(s), phrases {:?}",
            rules.len(),
            phrases.iter().map(|p| p.text.as_str()).collect::<Vec<_>>()
        );

        Ok(Self {
            rules,
            phrases,
            max_passes: config.max_passes.max(1),
        })
    }

    /// Canonical form of `raw`. `correct(&correct(x)) == correct(x)`.
    ///
    /// Passes repeat until the text stops changing. Literal rules cannot
    /// create new matches except where a deletion joins its neighbours, and
    /// every such pass shortens the text, so the loop is bounded by the input
    /// length. `max_passes` only raises that bound for regex rules.
    pub fn correct(&self, raw: &str) -> String {
        let mut current = normalize(raw);
        let limit = self.max_passes.max(2 * current.chars().count() + 2);
        for _ in 0..limit {
            let next = self.apply_rules(&current);
            if next == current {
                return current;
            }
            current = next;
        }
        log::warn!("Correction of {:?} did not settle after {} passes", raw, limit);
        current
    }

    fn apply_rules(&self, text: &str) -> String {
        let mut out = text.to_string();
        for rule in &self.rules {
            out = rule.apply(&out).into_owned();
        }
        normalize(&out)
    }

    /// Corrects `raw` and looks for a trigger phrase in it.
    pub fn check_trigger(&self, raw: &str) -> Option<TriggerMatch> {
        self.match_corrected(&self.correct(raw))
    }

    /// Looks for a trigger phrase in already corrected text.
    ///
    /// The closest phrase wins; equal distances go to the earlier phrase.
    pub fn match_corrected(&self, corrected: &str) -> Option<TriggerMatch> {
        if corrected.is_empty() {
            return None;
        }

        let mut best: Option<TriggerMatch> = None;
        for phrase in &self.phrases {
            let distance = matcher::substring_distance(corrected, &phrase.text, phrase.tolerance);
            if distance > phrase.tolerance {
                continue;
            }
            if best.as_ref().is_none_or(|b| distance < b.distance) {
                best = Some(TriggerMatch {
                    phrase: phrase.text.clone(),
                    distance,
                });
            }
        }
        best
    }
}
