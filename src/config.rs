//! Runtime settings
//!
//! Loaded from the process environment (binaries read `.env` first via dotenv).
//! Unset variables fall back to defaults; malformed values fail fast.

use crate::classifier::ClassifierStrategy;
use crate::context::AssemblerConfig;
use crate::engine::EngineConfig;
use crate::error::AnalysisError;
use crate::guardrail::{FactCheckConfig, FactPolicy, GuardrailConfig, UntraceablePolicy};
use crate::llm::DecodingParams;
use crate::models::Category;
use crate::Result;
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Decoding above this temperature defeats downstream fact checking
pub const MAX_TEMPERATURE: f32 = 0.5;

#[derive(Debug, Clone)]
pub struct Settings {
    pub app_name: String,
    pub log_level: String,
    pub port: u16,

    // LLM
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub llm_timeout: Duration,
    pub llm_max_retries: u32,
    pub llm_temperature: f32,

    // External data
    pub financial_api_base_url: Option<String>,
    pub knowledge_base_path: Option<PathBuf>,
    pub assembler_timeout: Duration,
    pub retrieval_top_k: usize,
    pub retrieval_score_threshold: f32,

    // Categorizer
    pub classifier_strategy: ClassifierStrategy,
    pub category_precedence: Vec<Category>,
    pub classifier_timeout: Duration,

    // Pipeline
    pub request_deadline: Duration,
    pub max_prompt_chars: usize,

    // Guardrails
    pub correction_budget: u32,
    pub fact_tolerance: f64,
    pub numeric_fact_policy: FactPolicy,
    pub categorical_fact_policy: FactPolicy,
    pub fact_policy_overrides: HashMap<String, FactPolicy>,
    pub untraceable_policy: UntraceablePolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: "Financial Research AI".to_string(),
            log_level: "info".to_string(),
            port: 8080,
            gemini_api_key: String::new(),
            gemini_model: "gemini-2.0-flash".to_string(),
            llm_timeout: Duration::from_millis(20_000),
            llm_max_retries: 2,
            llm_temperature: 0.1,
            financial_api_base_url: None,
            knowledge_base_path: None,
            assembler_timeout: Duration::from_millis(5_000),
            retrieval_top_k: 4,
            retrieval_score_threshold: 0.2,
            classifier_strategy: ClassifierStrategy::Keyword,
            category_precedence: default_precedence(),
            classifier_timeout: Duration::from_millis(2_000),
            request_deadline: Duration::from_millis(45_000),
            max_prompt_chars: 6_000,
            correction_budget: 1,
            fact_tolerance: 0.01,
            numeric_fact_policy: FactPolicy::Correct,
            categorical_fact_policy: FactPolicy::Reject,
            fact_policy_overrides: HashMap::new(),
            untraceable_policy: UntraceablePolicy::Allow,
        }
    }
}

pub fn default_precedence() -> Vec<Category> {
    vec![
        Category::Stock,
        Category::News,
        Category::Portfolio,
        Category::General,
    ]
}

impl Settings {
    /// Read settings from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match get("PORT").or_else(|| get("API_PORT")) {
            Some(raw) => parse_value("PORT", &raw)?,
            None => defaults.port,
        };

        let llm_temperature = parse_or(&get, "LLM_TEMPERATURE", defaults.llm_temperature)?;
        if !(0.0..=MAX_TEMPERATURE).contains(&llm_temperature) {
            return Err(AnalysisError::Config(format!(
                "LLM_TEMPERATURE must be within 0.0..={}",
                MAX_TEMPERATURE
            )));
        }

        let fact_tolerance = parse_or(&get, "FACT_TOLERANCE", defaults.fact_tolerance)?;
        if !fact_tolerance.is_finite() || fact_tolerance < 0.0 {
            return Err(AnalysisError::Config(
                "FACT_TOLERANCE must be a non-negative number".to_string(),
            ));
        }

        let category_precedence = match get("CATEGORY_PRECEDENCE") {
            Some(raw) => parse_precedence(&raw)?,
            None => defaults.category_precedence,
        };

        let fact_policy_overrides = match get("FACT_POLICY_OVERRIDES") {
            Some(raw) => parse_overrides(&raw)?,
            None => HashMap::new(),
        };

        Ok(Self {
            app_name: get("APP_NAME").unwrap_or(defaults.app_name),
            log_level: get("LOG_LEVEL").unwrap_or(defaults.log_level),
            port,
            gemini_api_key: get("GEMINI_API_KEY").unwrap_or_default(),
            gemini_model: get("GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            llm_timeout: millis_or(&get, "LLM_TIMEOUT_MS", defaults.llm_timeout)?,
            llm_max_retries: parse_or(&get, "LLM_MAX_RETRIES", defaults.llm_max_retries)?,
            llm_temperature,
            financial_api_base_url: get("FINANCIAL_API_BASE_URL")
                .or_else(|| get("TOOLS_API_BASE_URL"))
                .map(|url| url.trim_end_matches('/').to_string()),
            knowledge_base_path: get("KNOWLEDGE_BASE_PATH").map(PathBuf::from),
            assembler_timeout: millis_or(&get, "ASSEMBLER_TIMEOUT_MS", defaults.assembler_timeout)?,
            retrieval_top_k: parse_or(&get, "RETRIEVAL_TOP_K", defaults.retrieval_top_k)?,
            retrieval_score_threshold: parse_or(
                &get,
                "RETRIEVAL_SCORE_THRESHOLD",
                defaults.retrieval_score_threshold,
            )?,
            classifier_strategy: parse_or(
                &get,
                "CLASSIFIER_STRATEGY",
                defaults.classifier_strategy,
            )?,
            category_precedence,
            classifier_timeout: millis_or(
                &get,
                "CLASSIFIER_TIMEOUT_MS",
                defaults.classifier_timeout,
            )?,
            request_deadline: millis_or(&get, "REQUEST_DEADLINE_MS", defaults.request_deadline)?,
            max_prompt_chars: parse_or(&get, "MAX_PROMPT_CHARS", defaults.max_prompt_chars)?,
            correction_budget: parse_or(&get, "CORRECTION_BUDGET", defaults.correction_budget)?,
            fact_tolerance,
            numeric_fact_policy: parse_or(
                &get,
                "NUMERIC_FACT_POLICY",
                defaults.numeric_fact_policy,
            )?,
            categorical_fact_policy: parse_or(
                &get,
                "CATEGORICAL_FACT_POLICY",
                defaults.categorical_fact_policy,
            )?,
            fact_policy_overrides,
            untraceable_policy: parse_or(&get, "UNTRACEABLE_POLICY", defaults.untraceable_policy)?,
        })
    }

    pub fn decoding_params(&self) -> DecodingParams {
        DecodingParams {
            temperature: self.llm_temperature,
            ..DecodingParams::default()
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            call_timeout: self.llm_timeout,
            max_retries: self.llm_max_retries,
            ..EngineConfig::default()
        }
    }

    pub fn assembler_config(&self) -> AssemblerConfig {
        AssemblerConfig {
            timeout: self.assembler_timeout,
            retrieval_top_k: self.retrieval_top_k,
            retrieval_score_threshold: self.retrieval_score_threshold,
            ..AssemblerConfig::default()
        }
    }

    pub fn guardrail_config(&self) -> GuardrailConfig {
        GuardrailConfig {
            correction_budget: self.correction_budget,
            facts: FactCheckConfig {
                tolerance: self.fact_tolerance,
                numeric_policy: self.numeric_fact_policy,
                categorical_policy: self.categorical_fact_policy,
                overrides: self.fact_policy_overrides.clone(),
                untraceable: self.untraceable_policy,
            },
            ..GuardrailConfig::default()
        }
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| AnalysisError::Config(format!("{} has invalid value '{}'", key, raw)))
}

fn parse_or<T: FromStr>(
    get: impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T> {
    match get(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn millis_or(
    get: impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration> {
    match get(key) {
        Some(raw) => parse_value::<u64>(key, &raw).map(Duration::from_millis),
        None => Ok(default),
    }
}

/// Parse a comma separated precedence list. Categories left out keep their
/// default relative order after the listed ones.
fn parse_precedence(raw: &str) -> Result<Vec<Category>> {
    let mut order: Vec<Category> = Vec::with_capacity(Category::ALL.len());

    for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let category: Category = name.parse()?;
        if order.contains(&category) {
            return Err(AnalysisError::Config(format!(
                "CATEGORY_PRECEDENCE lists '{}' twice",
                category
            )));
        }
        order.push(category);
    }

    for category in default_precedence() {
        if !order.contains(&category) {
            order.push(category);
        }
    }

    Ok(order)
}

/// `field=policy` pairs, comma separated
fn parse_overrides(raw: &str) -> Result<HashMap<String, FactPolicy>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let (field, policy) = pair.split_once('=').ok_or_else(|| {
                AnalysisError::Config(format!(
                    "FACT_POLICY_OVERRIDES entry '{}' is not field=policy",
                    pair
                ))
            })?;
            Ok((field.trim().to_string(), parse_value("FACT_POLICY_OVERRIDES", policy)?))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let settings = Settings::from_lookup(|_| None).unwrap();
        assert_eq!(settings.port, 8080);
        assert_eq!(settings.correction_budget, 1);
        assert_eq!(settings.category_precedence, default_precedence());
        assert_eq!(settings.numeric_fact_policy, FactPolicy::Correct);
        assert_eq!(settings.categorical_fact_policy, FactPolicy::Reject);
        assert_eq!(settings.untraceable_policy, UntraceablePolicy::Allow);
        assert!(settings.financial_api_base_url.is_none());
    }

    #[test]
    fn test_overrides_from_lookup() {
        let settings = Settings::from_lookup(lookup(&[
            ("API_PORT", "9000"),
            ("CATEGORY_PRECEDENCE", "portfolio, stock"),
            ("FACT_POLICY_OVERRIDES", "volume=reject,sentiment=correct"),
            ("TOOLS_API_BASE_URL", "http://localhost:8000/"),
            ("REQUEST_DEADLINE_MS", "1500"),
            ("UNTRACEABLE_POLICY", "drop"),
        ]))
        .unwrap();

        assert_eq!(settings.port, 9000);
        assert_eq!(
            settings.category_precedence,
            vec![
                Category::Portfolio,
                Category::Stock,
                Category::News,
                Category::General
            ]
        );
        assert_eq!(settings.fact_policy_overrides["volume"], FactPolicy::Reject);
        assert_eq!(settings.fact_policy_overrides["sentiment"], FactPolicy::Correct);
        assert_eq!(
            settings.financial_api_base_url.as_deref(),
            Some("http://localhost:8000")
        );
        assert_eq!(settings.request_deadline, Duration::from_millis(1500));
        assert_eq!(settings.guardrail_config().facts.untraceable, UntraceablePolicy::Drop);
    }

    #[test]
    fn test_invalid_values_fail_fast() {
        assert!(Settings::from_lookup(lookup(&[("LLM_TEMPERATURE", "0.9")])).is_err());
        assert!(Settings::from_lookup(lookup(&[("PORT", "http")])).is_err());
        assert!(Settings::from_lookup(lookup(&[("CATEGORY_PRECEDENCE", "stock,stock")])).is_err());
        assert!(Settings::from_lookup(lookup(&[("FACT_POLICY_OVERRIDES", "volume")])).is_err());
        assert!(Settings::from_lookup(lookup(&[("UNTRACEABLE_POLICY", "maybe")])).is_err());
    }
}
