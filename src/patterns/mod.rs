// SPDX-License-Identifier: MIT
//! Pattern registry types.
//!
//! A `Pattern` is a versioned signature of a known issue/action class:
//! a matcher predicate, a severity, a base confidence, and the approach
//! templates that have historically resolved it. Matchers are a tagged enum
//! (exact / regex / structural) resolved by first-match registry traversal —
//! no reflection-style dispatch.

pub mod library;

pub use library::PatternLibrary;

use crate::error::EngineError;
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ─── Severity ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

// ─── Signature & matcher ──────────────────────────────────────────────────────

/// What a detector observed about a proposed action: free text plus
/// structured attributes (e.g. `{"kind": "broken-link", "scope": "docs"}`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signature {
    pub text: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Signature {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attributes: BTreeMap::new(),
        }
    }
}

/// Matcher predicate for a pattern. Textual kinds match case-insensitively.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SignatureMatcher {
    /// Whole-text equality.
    Exact { value: String },
    /// Regular expression over the signature text.
    Regex { pattern: String },
    /// Every required attribute key must be present with the given value.
    Structural { required: BTreeMap<String, String> },
}

/// Match specificity fed into the `patternMatch` factor: an exact signature
/// hit is stronger evidence than a regex hit, which is stronger than a
/// structural (attribute-shape) hit.
pub const EXACT_MATCH_QUALITY: f64 = 1.0;
pub const REGEX_MATCH_QUALITY: f64 = 0.85;
pub const STRUCTURAL_MATCH_QUALITY: f64 = 0.7;

/// A matcher with its regex pre-compiled at registration time.
#[derive(Debug, Clone)]
pub(crate) struct CompiledMatcher {
    matcher: SignatureMatcher,
    regex: Option<regex::Regex>,
}

impl CompiledMatcher {
    pub(crate) fn compile(pattern_id: &str, matcher: SignatureMatcher) -> Result<Self, EngineError> {
        let regex = match &matcher {
            SignatureMatcher::Regex { pattern } => Some(
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| EngineError::InvalidMatcher {
                        pattern_id: pattern_id.to_string(),
                        reason: e.to_string(),
                    })?,
            ),
            SignatureMatcher::Structural { required } if required.is_empty() => {
                return Err(EngineError::InvalidMatcher {
                    pattern_id: pattern_id.to_string(),
                    reason: "structural matcher requires at least one attribute".to_string(),
                });
            }
            _ => None,
        };
        Ok(Self { matcher, regex })
    }

    /// Returns the match quality in (0, 1], or `None` on no match.
    pub(crate) fn match_quality(&self, signature: &Signature) -> Option<f64> {
        match &self.matcher {
            SignatureMatcher::Exact { value } => value
                .eq_ignore_ascii_case(signature.text.trim())
                .then_some(EXACT_MATCH_QUALITY),
            SignatureMatcher::Regex { .. } => {
                let re = self.regex.as_ref()?;
                re.is_match(&signature.text).then_some(REGEX_MATCH_QUALITY)
            }
            SignatureMatcher::Structural { required } => required
                .iter()
                .all(|(key, value)| {
                    signature
                        .attributes
                        .get(key)
                        .is_some_and(|v| v.eq_ignore_ascii_case(value))
                })
                .then_some(STRUCTURAL_MATCH_QUALITY),
        }
    }
}

// ─── Pattern ──────────────────────────────────────────────────────────────────

/// A registered issue/action signature.
///
/// Patterns referenced by outcome history are never deleted — `enabled` is
/// the soft-disable flag honored by registry matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pattern {
    pub id: String,
    pub name: String,
    pub matcher: SignatureMatcher,
    pub category: String,
    pub severity: Severity,
    /// Author-supplied prior in [0, 1] for actions matching this pattern.
    /// Detector-facing metadata: surfaced through `find_match`/`list` and
    /// the learning export for detectors composing their signals. The
    /// scorer reads only the factors on the candidate, where match quality
    /// carries the registry evidence.
    pub base_confidence: f64,
    /// Ordered approach templates, most preferred first.
    #[serde(default)]
    pub suggested_approaches: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// A successful registry lookup: the pattern plus the specificity of the hit.
#[derive(Debug, Clone)]
pub struct PatternMatch {
    pub pattern: Pattern,
    pub quality: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig_with(attrs: &[(&str, &str)]) -> Signature {
        Signature {
            text: String::new(),
            attributes: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn exact_matcher_is_case_insensitive() {
        let m = CompiledMatcher::compile(
            "p1",
            SignatureMatcher::Exact {
                value: "Broken Link".to_string(),
            },
        )
        .expect("compile");
        assert_eq!(
            m.match_quality(&Signature::text("broken link")),
            Some(EXACT_MATCH_QUALITY)
        );
        assert_eq!(m.match_quality(&Signature::text("broken links")), None);
    }

    #[test]
    fn regex_matcher_compiles_once_and_matches() {
        let m = CompiledMatcher::compile(
            "p2",
            SignatureMatcher::Regex {
                pattern: r"timeout after \d+s".to_string(),
            },
        )
        .expect("compile");
        assert_eq!(
            m.match_quality(&Signature::text("Timeout after 30s on deploy")),
            Some(REGEX_MATCH_QUALITY)
        );
        assert_eq!(m.match_quality(&Signature::text("no timeout")), None);
    }

    #[test]
    fn bad_regex_is_rejected_at_compile() {
        let err = CompiledMatcher::compile(
            "p3",
            SignatureMatcher::Regex {
                pattern: "(unclosed".to_string(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidMatcher { .. }));
    }

    #[test]
    fn structural_matcher_requires_all_attributes() {
        let m = CompiledMatcher::compile(
            "p4",
            SignatureMatcher::Structural {
                required: [("kind".to_string(), "drift".to_string())].into(),
            },
        )
        .expect("compile");
        assert_eq!(
            m.match_quality(&sig_with(&[("kind", "DRIFT"), ("scope", "infra")])),
            Some(STRUCTURAL_MATCH_QUALITY)
        );
        assert_eq!(m.match_quality(&sig_with(&[("scope", "infra")])), None);
    }

    #[test]
    fn empty_structural_matcher_is_rejected() {
        let err = CompiledMatcher::compile(
            "p5",
            SignatureMatcher::Structural {
                required: BTreeMap::new(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidMatcher { .. }));
    }
}
