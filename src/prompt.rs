//! Prompt composition
//!
//! `compose` is a pure function of (query, category, bundle): identical
//! inputs produce byte-identical prompts, so the fingerprint doubles as a
//! cache key. The prompt is bounded by a character budget; facts are
//! admitted whole, most relevant first.

use crate::guardrail::Defect;
use crate::models::{Category, ContextBundle, Fact, FactValue, Query};
use sha2::{Digest, Sha256};

/// JSON shape the model must return
pub const ANALYSIS_SCHEMA: &str = r#"{
  "summary": "string, non-empty",
  "recommendation": "one of: buy | hold | sell | none",
  "subject": "string or null (ticker or topic)",
  "sentiment": "one of: positive | neutral | negative, or null",
  "figures": { "<fact key>": number },
  "citations": ["<source id>"],
  "confidence": "number between 0 and 1"
}"#;

const PREAMBLE: &str = "You are a financial research assistant. \
Answer only from the facts listed below. \
Respond with one JSON object that matches this schema and nothing else:";

const RULES: &str = "Rules:
- Every entry in \"figures\" must use a fact key and copy its value exactly.
- Every entry in \"citations\" must be a source id shown in [brackets] below.
- Never state numbers that are not listed as facts.
- Do not promise returns or give personalized investment advice.";

/// Longest slice of a rejected reply echoed back in a correction prompt
const MAX_ECHO_CHARS: usize = 2_000;

fn instructions(category: Category) -> &'static str {
    match category {
        Category::Stock => {
            "Analyze the stock named in the question using the quote facts. \
             Put the quoted numbers you rely on in \"figures\" and set \"subject\" to the ticker."
        }
        Category::News => {
            "Summarize the headlines relevant to the question. \
             Set \"sentiment\" to the overall tone and cite each headline you use."
        }
        Category::Portfolio => {
            "Review the holdings relevant to the question. \
             Use the holding totals in \"figures\" and keep any recommendation conservative."
        }
        Category::General => {
            "Explain the financial concept in the question using the reference passages. \
             Set \"recommendation\" to \"none\"."
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComposedPrompt {
    pub text: String,
    /// Hex SHA-256 of `text`
    pub fingerprint: String,
    /// Facts that made it into the prompt, in prompt order
    pub included: Vec<Fact>,
    /// Facts left out to stay within the budget
    pub dropped: usize,
}

#[derive(Debug, Clone)]
pub struct PromptComposer {
    max_chars: usize,
}

impl PromptComposer {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    pub fn compose(
        &self,
        query: &Query,
        category: Category,
        bundle: &ContextBundle,
    ) -> ComposedPrompt {
        let mut text = String::new();
        text.push_str(PREAMBLE);
        text.push('\n');
        text.push_str(ANALYSIS_SCHEMA);
        text.push_str("\n\n");
        text.push_str(RULES);
        text.push_str("\n\n");
        text.push_str(&format!("Task ({}): {}\n", category, instructions(category)));

        if let Some(subject) = &bundle.subject {
            text.push_str(&format!("Subject: {}\n", subject));
        }

        if !bundle.missing.is_empty() {
            let absent: Vec<String> = bundle
                .missing
                .iter()
                .map(|m| format!("{} ({})", m.assembler, m.reason))
                .collect();
            text.push_str(&format!(
                "Unavailable sources, do not invent values for these: {}\n",
                absent.join(", ")
            ));
        }

        text.push_str(&format!("\nQuestion: {}\n\nFacts:\n", query.as_str()));

        // Stable sort keeps provider order among equally relevant facts
        let mut ranked: Vec<&Fact> = bundle.facts.iter().collect();
        ranked.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));

        let mut used = text.chars().count();
        let mut included = Vec::new();
        for fact in &ranked {
            let line = fact_line(fact);
            let cost = line.chars().count();
            if used + cost > self.max_chars {
                break;
            }
            used += cost;
            text.push_str(&line);
            included.push((*fact).clone());
        }

        if included.is_empty() {
            text.push_str("(none)\n");
        }

        let dropped = ranked.len() - included.len();
        let fingerprint = fingerprint(&text);

        ComposedPrompt {
            text,
            fingerprint,
            included,
            dropped,
        }
    }

    /// Original prompt plus an instruction naming the defect found in the
    /// previous reply.
    pub fn correction(
        &self,
        prompt: &ComposedPrompt,
        defect: &Defect,
        previous_output: &str,
    ) -> String {
        let echoed: String = previous_output.chars().take(MAX_ECHO_CHARS).collect();

        format!(
            "{}\nYour previous reply was rejected ({}): {}\n\
             Previous reply:\n{}\n\n\
             Return a corrected JSON object that fixes this problem \
             and follows the schema exactly.\n",
            prompt.text, defect.reason, defect.detail, echoed
        )
    }
}

fn fact_line(fact: &Fact) -> String {
    let value = match &fact.value {
        FactValue::Number(n) => n.to_string(),
        FactValue::Text(s) => format!("\"{}\"", s.replace('\n', " ")),
    };
    format!("- [{}] {} = {}\n", fact.source.citation(), fact.key, value)
}

/// Hex SHA-256 of a prompt
pub fn fingerprint(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FactSource, MissingReason, RejectionReason};

    fn bundle() -> ContextBundle {
        let source = FactSource::new("stock", "AAPL");
        ContextBundle {
            subject: Some("AAPL".into()),
            facts: vec![
                Fact::number("volume", 1_000_000.0, source.clone()).with_relevance(0.2),
                Fact::number("current_price", 150.0, source.clone()),
                Fact::number("pe_ratio", 28.5, source.clone()).with_relevance(0.8),
            ],
            missing: vec![],
        }
    }

    fn query() -> Query {
        Query::parse("What is the price of AAPL?").unwrap()
    }

    #[test]
    fn test_compose_is_deterministic() {
        let composer = PromptComposer::new(6_000);
        let a = composer.compose(&query(), Category::Stock, &bundle());
        let b = composer.compose(&query(), Category::Stock, &bundle());

        assert_eq!(a, b);
        assert_eq!(a.fingerprint.len(), 64);
        assert!(a.text.contains(ANALYSIS_SCHEMA));
        assert!(a.text.contains("- [stock:AAPL] current_price = 150\n"));
        assert_eq!(a.dropped, 0);
    }

    #[test]
    fn test_facts_ordered_by_relevance() {
        let prompt = PromptComposer::new(6_000).compose(&query(), Category::Stock, &bundle());
        let keys: Vec<&str> = prompt.included.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["current_price", "pe_ratio", "volume"]);
    }

    #[test]
    fn test_truncation_drops_least_relevant_whole_facts() {
        let full = PromptComposer::new(usize::MAX).compose(&query(), Category::Stock, &bundle());
        let volume_line = fact_line(&bundle().facts[0]);
        let budget = full.text.chars().count() - volume_line.chars().count();

        let bounded = PromptComposer::new(budget).compose(&query(), Category::Stock, &bundle());

        assert_eq!(bounded.dropped, 1);
        assert!(bounded.text.chars().count() <= budget);
        assert!(!bounded.text.contains("volume"));
        assert!(bounded.text.contains("current_price = 150"));
        assert_ne!(bounded.fingerprint, full.fingerprint);
    }

    #[test]
    fn test_missing_sources_are_named() {
        let mut bundle = bundle();
        bundle.mark_missing("news", MissingReason::TimedOut);

        let prompt = PromptComposer::new(6_000).compose(&query(), Category::Stock, &bundle);
        assert!(prompt
            .text
            .contains("do not invent values for these: news (timed out)"));
    }

    #[test]
    fn test_correction_names_defect() {
        let composer = PromptComposer::new(6_000);
        let prompt = composer.compose(&query(), Category::Stock, &bundle());
        let defect = Defect::new(RejectionReason::SchemaViolation, "missing field 'summary'");

        let corrected = composer.correction(&prompt, &defect, "{\"recommendation\":\"hold\"}");

        assert!(corrected.starts_with(&prompt.text));
        assert!(corrected.contains("schema_violation"));
        assert!(corrected.contains("missing field 'summary'"));
    }

    #[test]
    fn test_fingerprint_known_value() {
        assert_eq!(
            fingerprint(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            fingerprint("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
