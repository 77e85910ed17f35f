//! Fact checking against the context bundle.
//!
//! Only fields that overlap with a known fact are compared. What happens on
//! a mismatch is a per-field policy, never an implicit choice.

use crate::error::AnalysisError;
use crate::models::{AnalysisResult, ContextBundle, Sentiment};
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactPolicy {
    /// Overwrite the field with the known value
    Correct,
    /// Reject the whole result
    Reject,
}

impl FromStr for FactPolicy {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "correct" | "auto_correct" => Ok(FactPolicy::Correct),
            "reject" => Ok(FactPolicy::Reject),
            other => Err(AnalysisError::Config(format!("unknown fact policy '{}'", other))),
        }
    }
}

/// Treatment of figures and citations with no backing fact. They overlap
/// nothing in the bundle, so the default leaves them alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UntraceablePolicy {
    Allow,
    Drop,
    Reject,
}

impl FromStr for UntraceablePolicy {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "allow" => Ok(UntraceablePolicy::Allow),
            "drop" => Ok(UntraceablePolicy::Drop),
            "reject" => Ok(UntraceablePolicy::Reject),
            other => Err(AnalysisError::Config(format!(
                "unknown untraceable policy '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FactCheckConfig {
    /// Relative tolerance; absolute when the known value is zero
    pub tolerance: f64,
    pub numeric_policy: FactPolicy,
    pub categorical_policy: FactPolicy,
    pub overrides: HashMap<String, FactPolicy>,
    pub untraceable: UntraceablePolicy,
}

impl Default for FactCheckConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.01,
            numeric_policy: FactPolicy::Correct,
            categorical_policy: FactPolicy::Reject,
            overrides: HashMap::new(),
            untraceable: UntraceablePolicy::Allow,
        }
    }
}

impl FactCheckConfig {
    pub fn policy_for(&self, field: &str, numeric: bool) -> FactPolicy {
        self.overrides.get(field).copied().unwrap_or(if numeric {
            self.numeric_policy
        } else {
            self.categorical_policy
        })
    }
}

/// What fact checking did to a candidate
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FactFindings {
    /// Fields rewritten or removed, as human-readable notes
    pub adjusted: Vec<String>,
    /// Mismatches that reject the result
    pub rejected: Vec<String>,
}

impl FactFindings {
    pub fn is_clean(&self) -> bool {
        self.adjusted.is_empty() && self.rejected.is_empty()
    }
}

pub fn within_tolerance(claimed: f64, known: f64, tolerance: f64) -> bool {
    let diff = (claimed - known).abs();
    if known == 0.0 {
        diff <= tolerance
    } else {
        diff / known.abs() <= tolerance
    }
}

/// Compare a candidate with the bundle, applying the configured policies in
/// place. The caller decides what a non-empty `rejected` list means.
pub fn check_facts(
    result: &mut AnalysisResult,
    bundle: &ContextBundle,
    config: &FactCheckConfig,
) -> FactFindings {
    let mut findings = FactFindings::default();

    check_figures(result, bundle, config, &mut findings);
    check_subject(result, bundle, config, &mut findings);
    check_sentiment(result, bundle, config, &mut findings);
    check_citations(result, bundle, config, &mut findings);

    findings
}

fn check_figures(
    result: &mut AnalysisResult,
    bundle: &ContextBundle,
    config: &FactCheckConfig,
    findings: &mut FactFindings,
) {
    let mut untraceable = Vec::new();

    for (name, claimed) in result.figures.iter_mut() {
        let Some(known) = bundle.number(name) else {
            untraceable.push(name.clone());
            continue;
        };
        if within_tolerance(*claimed, known, config.tolerance) {
            continue;
        }

        match config.policy_for(name, true) {
            FactPolicy::Correct => {
                findings
                    .adjusted
                    .push(format!("figure '{}' corrected from {} to {}", name, claimed, known));
                *claimed = known;
            }
            FactPolicy::Reject => findings
                .rejected
                .push(format!("figure '{}' is {} but the known value is {}", name, claimed, known)),
        }
    }

    for name in untraceable {
        match config.untraceable {
            UntraceablePolicy::Allow => {}
            UntraceablePolicy::Drop => {
                result.figures.remove(&name);
                findings
                    .adjusted
                    .push(format!("figure '{}' dropped: no supporting fact", name));
            }
            UntraceablePolicy::Reject => findings
                .rejected
                .push(format!("figure '{}' has no supporting fact", name)),
        }
    }
}

fn check_subject(
    result: &mut AnalysisResult,
    bundle: &ContextBundle,
    config: &FactCheckConfig,
    findings: &mut FactFindings,
) {
    let (Some(claimed), Some(symbol)) = (result.subject.as_deref(), bundle.text("symbol")) else {
        return;
    };

    let mentions_symbol = claimed
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| word.eq_ignore_ascii_case(symbol));
    if mentions_symbol {
        return;
    }

    match config.policy_for("subject", false) {
        FactPolicy::Correct => {
            findings
                .adjusted
                .push(format!("subject corrected from '{}' to '{}'", claimed, symbol));
            result.subject = Some(symbol.to_string());
        }
        FactPolicy::Reject => findings
            .rejected
            .push(format!("subject '{}' does not match '{}'", claimed, symbol)),
    }
}

fn check_sentiment(
    result: &mut AnalysisResult,
    bundle: &ContextBundle,
    config: &FactCheckConfig,
    findings: &mut FactFindings,
) {
    let (Some(claimed), Some(known)) = (result.sentiment, bundle.text("sentiment")) else {
        return;
    };
    if claimed.as_str() == known {
        return;
    }

    match config.policy_for("sentiment", false) {
        FactPolicy::Correct => {
            let parsed = serde_json::from_value::<Sentiment>(Value::String(known.to_string()));
            let Ok(parsed) = parsed else {
                findings
                    .rejected
                    .push(format!("sentiment '{}' does not match '{}'", claimed.as_str(), known));
                return;
            };
            findings.adjusted.push(format!(
                "sentiment corrected from '{}' to '{}'",
                claimed.as_str(),
                known
            ));
            result.sentiment = Some(parsed);
        }
        FactPolicy::Reject => findings.rejected.push(format!(
            "sentiment '{}' does not match '{}'",
            claimed.as_str(),
            known
        )),
    }
}

fn check_citations(
    result: &mut AnalysisResult,
    bundle: &ContextBundle,
    config: &FactCheckConfig,
    findings: &mut FactFindings,
) {
    let known = bundle.citations();
    let (traceable, untraceable): (Vec<String>, Vec<String>) = result
        .citations
        .drain(..)
        .partition(|c| known.contains(c));

    if untraceable.is_empty() {
        result.citations = traceable;
        return;
    }

    match config.untraceable {
        UntraceablePolicy::Allow => {
            result.citations = traceable;
            result.citations.extend(untraceable);
        }
        UntraceablePolicy::Drop => {
            findings.adjusted.push(format!(
                "citations dropped, no matching source: {}",
                untraceable.join(", ")
            ));
            result.citations = traceable;
        }
        UntraceablePolicy::Reject => {
            findings.rejected.push(format!(
                "citations name no known source: {}",
                untraceable.join(", ")
            ));
            result.citations = traceable;
            result.citations.extend(untraceable);
        }
    }
}
