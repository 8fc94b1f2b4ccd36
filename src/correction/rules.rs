//! Correction rule table: declaration, compilation and validation.

use std::borrow::Cow;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::normalize::normalize;
use crate::error::CorrectionConfigError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    #[default]
    Literal,
    Regex,
}

/// One `pattern → replacement` rewrite, applied in declaration order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionRule {
    pub pattern: String,
    pub replacement: String,
    #[serde(default)]
    pub kind: RuleKind,
}

impl CorrectionRule {
    pub fn literal(pattern: &str, replacement: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            replacement: replacement.to_string(),
            kind: RuleKind::Literal,
        }
    }
}

#[derive(Debug)]
pub(crate) enum CompiledRule {
    Literal { pattern: String, replacement: String },
    Regex { regex: Regex, replacement: String },
}

impl CompiledRule {
    pub(crate) fn apply<'a>(&self, text: &'a str) -> Cow<'a, str> {
        match self {
            CompiledRule::Literal {
                pattern,
                replacement,
            } => {
                if text.contains(pattern.as_str()) {
                    Cow::Owned(text.replace(pattern.as_str(), replacement))
                } else {
                    Cow::Borrowed(text)
                }
            }
            CompiledRule::Regex { regex, replacement } => {
                regex.replace_all(text, replacement.as_str())
            }
        }
    }

    fn matches(&self, text: &str) -> bool {
        match self {
            CompiledRule::Literal { pattern, .. } => text.contains(pattern.as_str()),
            CompiledRule::Regex { regex, .. } => regex.is_match(text),
        }
    }

    fn replacement(&self) -> &str {
        match self {
            CompiledRule::Literal { replacement, .. } | CompiledRule::Regex { replacement, .. } => {
                replacement
            }
        }
    }
}

/// Compiles the table. Literal patterns and replacements are normalized so
/// they line up with normalized text.
pub(crate) fn compile_rules(
    rules: &[CorrectionRule],
) -> Result<Vec<CompiledRule>, CorrectionConfigError> {
    let mut compiled = Vec::with_capacity(rules.len());

    for (index, rule) in rules.iter().enumerate() {
        let rule = match rule.kind {
            RuleKind::Literal => {
                let pattern = normalize(&rule.pattern);
                if pattern.is_empty() {
                    return Err(CorrectionConfigError::EmptyPattern { index });
                }
                CompiledRule::Literal {
                    pattern,
                    replacement: normalize(&rule.replacement),
                }
            }
            RuleKind::Regex => {
                if rule.pattern.is_empty() {
                    return Err(CorrectionConfigError::EmptyPattern { index });
                }
                let regex = Regex::new(&rule.pattern).map_err(|source| {
                    CorrectionConfigError::InvalidRegex {
                        index,
                        pattern: rule.pattern.clone(),
                        source,
                    }
                })?;
                CompiledRule::Regex {
                    regex,
                    replacement: rule.replacement.clone(),
                }
            }
        };
        compiled.push(rule);
    }

    // A replacement that some pattern matches again would keep rewriting.
    for (index, rule) in compiled.iter().enumerate() {
        if let Some(matched_by) = compiled.iter().position(|other| other.matches(rule.replacement())) {
            return Err(CorrectionConfigError::NonConvergent {
                index,
                replacement: rule.replacement().to_string(),
                matched_by,
            });
        }
    }

    // Literal replacements must not share characters with any literal
    // pattern across their edges either, or the rewritten text plus its
    // neighbours forms a fresh match ("..." under ".." → "." yields "..").
    for (index, rule) in compiled.iter().enumerate() {
        let CompiledRule::Literal { replacement, .. } = rule else {
            continue;
        };
        let overlapping = compiled.iter().position(|other| match other {
            CompiledRule::Literal { pattern, .. } => overlaps(replacement, pattern),
            CompiledRule::Regex { .. } => false,
        });
        if let Some(overlaps) = overlapping {
            return Err(CorrectionConfigError::OverlappingReplacement {
                index,
                replacement: replacement.clone(),
                overlaps,
            });
        }
    }

    Ok(compiled)
}

/// True when `pattern` can be laid over `replacement` at some offset with at
/// least one shared position and every shared character equal.
fn overlaps(replacement: &str, pattern: &str) -> bool {
    let r: Vec<char> = replacement.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    if r.is_empty() || p.is_empty() {
        return false;
    }

    // `shift` is where p[0] lands relative to r[0].
    let first = 1 - p.len() as isize;
    let last = r.len() as isize - 1;
    (first..=last).any(|shift| {
        p.iter().enumerate().all(|(i, c)| {
            let j = shift + i as isize;
            j < 0 || j >= r.len() as isize || r[j as usize] == *c
        })
    })
}

/// Observed Hangul misreads of the join/entry announcements.
pub fn default_rules() -> Vec<CorrectionRule> {
    const TABLE: &[(&str, &str)] = &[
        ("들머왔습니다", "들어왔습니다"),
        ("둘어왔습니다", "들어왔습니다"),
        ("틀어왔습니다", "들어왔습니다"),
        ("들머왔읍니다", "들어왔습니다"),
        ("들어왔시니다", "들어왔습니다"),
        ("들어왔느니다", "들어왔습니다"),
        ("들어왔습니타", "들어왔습니다"),
        ("들어왔스니다", "들어왔습니다"),
        ("들어왔슴니다", "들어왔습니다"),
        ("들어왔읍니다", "들어왔습니다"),
        ("들어왔ㅅ니다", "들어왔습니다"),
        ("들어왔ㅁ니다", "들어왔습니다"),
        ("들어왔7니다", "들어왔습니다"),
        ("들어왔5니다", "들어왔습니다"),
        ("들어와습니다", "들어왔습니다"),
        ("들어왔슴다", "들어왔습니다"),
        ("들어왔니다", "들어왔습니다"),
        ("입정했습니다", "입장했습니다"),
        ("입잠했습니다", "입장했습니다"),
        ("입창했습니다", "입장했습니다"),
        ("입장햤습니다", "입장했습니다"),
        ("입장했스니다", "입장했습니다"),
        ("입장했슴니다", "입장했습니다"),
        ("입장했읍니다", "입장했습니다"),
        ("참어했습니다", "참여했습니다"),
        ("잠여했습니다", "참여했습니다"),
        ("참야했습니다", "참여했습니다"),
        ("참여햤습니다", "참여했습니다"),
        ("참여했스니다", "참여했습니다"),
        ("참여했슴니다", "참여했습니다"),
        ("참여했읍니다", "참여했습니다"),
    ];

    TABLE
        .iter()
        .map(|(pattern, replacement)| CorrectionRule::literal(pattern, replacement))
        .collect()
}
