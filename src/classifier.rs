//! Risk classification for incoming prompts.
//!
//! The classifier is a pure function from prompt text to a [`RiskVerdict`].
//! It performs case-insensitive literal matching against three rule sets
//! (injection, sensitive data, fraud) compiled into shared Aho-Corasick
//! automata.  No I/O, no failure mode: every prompt gets a verdict.

use std::collections::BTreeSet;
use std::sync::Arc;

use aho_corasick::AhoCorasick;
use serde::{Deserialize, Serialize};

use crate::util::ac_for;

/// Rule sets driving the classifier.  Loaded from a JSON file via
/// `SENTINEL_RULES_CONFIG` so rule tuning never touches call sites; the
/// defaults mirror the shipped detection lists.
#[derive(Clone, Debug, Deserialize)]
pub struct RuleSet {
    /// Markers of prompt-injection attempts.  Lower case.
    #[serde(default = "default_injection_rules", alias = "injectionMarkers")]
    pub injection: Vec<String>,
    /// Markers of sensitive-data disclosure.  All matches are collected,
    /// not just the first.
    #[serde(default = "default_sensitive_rules", alias = "sensitiveMarkers")]
    pub sensitive: Vec<String>,
    /// Markers of fraud-adjacent requests.
    #[serde(default = "default_fraud_rules", alias = "fraudMarkers")]
    pub fraud: Vec<String>,
}

fn default_injection_rules() -> Vec<String> {
    [
        "ignore previous instructions",
        "system prompt",
        "dan mode",
        "jailbreak",
        "bypass",
        "you are chatgpt",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_sensitive_rules() -> Vec<String> {
    ["ssn", "credit card", "password", "api key", "secret_key"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_fraud_rules() -> Vec<String> {
    ["fake identity", "bank hack", "social security"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            injection: default_injection_rules(),
            sensitive: default_sensitive_rules(),
            fraud: default_fraud_rules(),
        }
    }
}

/// Severity of a verdict.  `High` means the request must not reach the model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    High,
}

/// Which rule family fired.  Precedence when several fire on the same
/// prompt: injection > sensitive data leak > fraud.  Injection is the
/// control-plane threat and must not be masked by a simultaneous
/// sensitive-data match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
    Clean,
    Injection,
    SensitiveDataLeak,
    Fraud,
}

impl RiskCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskCategory::Clean => "clean",
            RiskCategory::Injection => "injection",
            RiskCategory::SensitiveDataLeak => "sensitive_data_leak",
            RiskCategory::Fraud => "fraud",
        }
    }
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::High => "high",
        }
    }
}

/// Classification result for a single prompt.  Created once per request and
/// immutable thereafter.
///
/// Invariants: `risk == High` iff `injection_detected || policy_violation`;
/// `category == Clean` iff `risk == Low`.
#[derive(Clone, Debug, Serialize)]
pub struct RiskVerdict {
    pub risk: RiskLevel,
    pub category: RiskCategory,
    pub injection_detected: bool,
    pub policy_violation: bool,
    /// Sensitive rule identifiers that matched, in rule order, deduplicated.
    pub sensitive_matches: Vec<String>,
}

impl RiskVerdict {
    pub fn is_high_risk(&self) -> bool {
        self.risk == RiskLevel::High
    }
}

/// Compiled classifier.  Construction compiles (or fetches from the shared
/// cache) one automaton per rule family; classification itself allocates
/// only for the collected sensitive matches.
pub struct RiskClassifier {
    rules: RuleSet,
    injection_ac: Arc<AhoCorasick>,
    sensitive_ac: Arc<AhoCorasick>,
    fraud_ac: Arc<AhoCorasick>,
}

impl RiskClassifier {
    pub fn new(rules: RuleSet) -> Self {
        let injection_ac = ac_for(&rules.injection);
        let sensitive_ac = ac_for(&rules.sensitive);
        let fraud_ac = ac_for(&rules.fraud);
        Self {
            rules,
            injection_ac,
            sensitive_ac,
            fraud_ac,
        }
    }

    /// Classify a prompt.  Pure and deterministic: repeated calls with the
    /// same input always produce the same verdict.
    pub fn classify(&self, prompt: &str) -> RiskVerdict {
        let injection_detected = self.injection_ac.is_match(prompt);

        // Collect every sensitive rule that fired, keeping rule order.
        let mut matched: BTreeSet<usize> = BTreeSet::new();
        for m in self.sensitive_ac.find_overlapping_iter(prompt) {
            matched.insert(m.pattern().as_usize());
        }
        let sensitive_matches: Vec<String> = matched
            .into_iter()
            .filter_map(|idx| self.rules.sensitive.get(idx).cloned())
            .collect();
        let is_sensitive = !sensitive_matches.is_empty();

        let is_fraud = self.fraud_ac.is_match(prompt);
        let policy_violation = is_sensitive || is_fraud;

        let (risk, category) = if injection_detected {
            (RiskLevel::High, RiskCategory::Injection)
        } else if is_sensitive {
            (RiskLevel::High, RiskCategory::SensitiveDataLeak)
        } else if is_fraud {
            (RiskLevel::High, RiskCategory::Fraud)
        } else {
            (RiskLevel::Low, RiskCategory::Clean)
        };

        RiskVerdict {
            risk,
            category,
            injection_detected,
            policy_violation,
            sensitive_matches,
        }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }
}
