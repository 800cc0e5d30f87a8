use serde::Deserialize;
use std::sync::Arc;

use crate::llm::{extract_json, GenerateRequest, LlmClient, ModelTier, Parsed};
use crate::models::{Category, IntentContext};

/// Keyword bounds for a compiled context.
const MAX_KEYWORDS: usize = 8;

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "of", "for", "to", "in", "on", "at", "about", "with", "from",
    "by", "is", "are", "was", "be", "this", "that", "these", "those", "i", "we", "you", "they",
    "it", "all", "any", "find", "get", "want", "need", "looking", "information", "info", "please",
];

/// Shape the intent-tier model is asked to return.
#[derive(Debug, Deserialize)]
struct RawIntent {
    category: String,
    keywords: Vec<String>,
    search_focus: String,
    #[serde(default)]
    priority_signals: Vec<String>,
    #[serde(default)]
    exclude_patterns: Vec<String>,
    #[serde(default)]
    analysis_background: String,
}

/// Compiles the operator's freeform intent into an [`IntentContext`].
///
/// The run never aborts on compilation failure: every error path lands on
/// the rule-based default context.
pub struct IntentCompiler {
    llm: Arc<dyn LlmClient>,
}

impl IntentCompiler {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        IntentCompiler { llm }
    }

    pub async fn compile(&self, intent: &str, start_url: &str) -> Parsed<IntentContext> {
        let request = GenerateRequest::new(
            ModelTier::Intent,
            "You compile a web crawling goal into a structured search context. \
             Respond with a single JSON object and no surrounding prose.",
            build_intent_prompt(intent, start_url),
        )
        .with_temperature(0.1);

        let raw = match self.llm.generate(request).await {
            Ok(raw) => raw,
            Err(error) => {
                tracing::warn!(%error, "Intent LLM call failed, using rule-based context");
                return Parsed::Fallback {
                    reason: format!("llm_failed: {error}"),
                    value: default_context(intent),
                };
            }
        };

        let Some(value) = extract_json(&raw) else {
            return Parsed::Fallback {
                reason: "parse_failed: no JSON object in response".to_string(),
                value: default_context(intent),
            };
        };

        let parsed: RawIntent = match serde_json::from_value(value) {
            Ok(parsed) => parsed,
            Err(error) => {
                return Parsed::Fallback {
                    reason: format!("parse_failed: {error}"),
                    value: default_context(intent),
                };
            }
        };

        let Some(category) = Category::parse(&parsed.category) else {
            return Parsed::Fallback {
                reason: format!("parse_failed: category '{}' outside closed set", parsed.category),
                value: default_context(intent),
            };
        };

        let keywords: Vec<String> = parsed
            .keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .take(MAX_KEYWORDS)
            .collect();
        if keywords.is_empty() {
            return Parsed::Fallback {
                reason: "parse_failed: empty keyword list".to_string(),
                value: default_context(intent),
            };
        }

        let analysis_background = if parsed.analysis_background.trim().is_empty() {
            default_background(intent)
        } else {
            parsed.analysis_background
        };

        Parsed::Ok(IntentContext {
            category,
            keywords,
            search_focus: parsed.search_focus,
            priority_signals: parsed.priority_signals,
            exclude_patterns: parsed.exclude_patterns,
            analysis_background,
        })
    }
}

fn build_intent_prompt(intent: &str, start_url: &str) -> String {
    format!(
        "Crawling goal: {intent}\n\
         Starting site: {start_url}\n\n\
         Return a JSON object with exactly these fields:\n\
         {{\n\
           \"category\": one of [\"content\", \"data\", \"email\", \"policy\", \"contact\", \
             \"admission\", \"research\", \"news\", \"event\", \"general\"],\n\
           \"keywords\": [3-8 short search keywords],\n\
           \"search_focus\": one sentence restating the goal,\n\
           \"priority_signals\": [URL substrings that suggest a relevant page],\n\
           \"exclude_patterns\": [URL substrings that suggest an irrelevant page],\n\
           \"analysis_background\": 2-3 sentences of context an analyst should keep \
             in mind while reading pages from this site\n\
         }}"
    )
}

fn default_background(intent: &str) -> String {
    format!("We are collecting information about '{intent}'.")
}

/// Rule-based default: category by substring table, keywords by tokenizing
/// the intent with stopwords removed.
pub fn default_context(intent: &str) -> IntentContext {
    let lowered = intent.to_lowercase();

    const CATEGORY_TABLE: &[(&str, Category)] = &[
        ("admission", Category::Admission),
        ("apply", Category::Admission),
        ("enroll", Category::Admission),
        ("email", Category::Email),
        ("e-mail", Category::Email),
        ("contact", Category::Contact),
        ("phone", Category::Contact),
        ("policy", Category::Policy),
        ("privacy", Category::Policy),
        ("terms", Category::Policy),
        ("research", Category::Research),
        ("paper", Category::Research),
        ("publication", Category::Research),
        ("news", Category::News),
        ("press", Category::News),
        ("event", Category::Event),
        ("conference", Category::Event),
        ("schedule", Category::Event),
        ("data", Category::Data),
        ("dataset", Category::Data),
        ("statistic", Category::Data),
        ("article", Category::Content),
        ("blog", Category::Content),
        ("document", Category::Content),
    ];

    let category = CATEGORY_TABLE
        .iter()
        .find(|(pattern, _)| lowered.contains(pattern))
        .map(|(_, category)| *category)
        .unwrap_or(Category::General);

    let mut keywords: Vec<String> = Vec::new();
    for token in lowered.split(|c: char| !c.is_alphanumeric()) {
        if token.len() < 3 || STOPWORDS.contains(&token) {
            continue;
        }
        if !keywords.iter().any(|k| k == token) {
            keywords.push(token.to_string());
        }
        if keywords.len() == MAX_KEYWORDS {
            break;
        }
    }
    // An intent of pure stopwords still needs something to search for
    if keywords.is_empty() && !lowered.trim().is_empty() {
        keywords.push(lowered.trim().to_string());
    }

    IntentContext {
        category,
        keywords,
        search_focus: intent.to_string(),
        priority_signals: Vec::new(),
        exclude_patterns: Vec::new(),
        analysis_background: default_background(intent),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use async_trait::async_trait;

    struct CannedLlm {
        response: Option<String>,
    }

    #[async_trait]
    impl LlmClient for CannedLlm {
        async fn generate(&self, _request: GenerateRequest) -> Result<String, LlmError> {
            match &self.response {
                Some(text) => Ok(text.clone()),
                None => Err(LlmError::Timeout),
            }
        }
    }

    fn compiler(response: Option<&str>) -> IntentCompiler {
        IntentCompiler::new(Arc::new(CannedLlm {
            response: response.map(|s| s.to_string()),
        }))
    }

    #[tokio::test]
    async fn test_compile_accepts_valid_json() {
        let response = r#"{
            "category": "admission",
            "keywords": ["Admission", "deadline", "requirements"],
            "search_focus": "Find admission requirements",
            "priority_signals": ["/admission"],
            "exclude_patterns": ["/alumni"],
            "analysis_background": "The operator is an applicant."
        }"#;
        let parsed = compiler(Some(response))
            .compile("admission info", "https://ex.com")
            .await;
        assert!(!parsed.is_fallback());
        let ctx = parsed.into_value();
        assert_eq!(ctx.category, Category::Admission);
        assert_eq!(ctx.keywords[0], "admission"); // lowercased
        assert_eq!(ctx.priority_signals, vec!["/admission"]);
    }

    #[tokio::test]
    async fn test_compile_rejects_unknown_category() {
        let response = r#"{
            "category": "misc",
            "keywords": ["a", "b", "c"],
            "search_focus": "f"
        }"#;
        let parsed = compiler(Some(response))
            .compile("admission info", "https://ex.com")
            .await;
        assert!(parsed.is_fallback());
        // fallback still classifies from the intent text
        assert_eq!(parsed.value().category, Category::Admission);
    }

    #[tokio::test]
    async fn test_compile_falls_back_on_llm_error() {
        let parsed = compiler(None)
            .compile("research papers on robotics", "https://ex.com")
            .await;
        assert!(parsed.is_fallback());
        let ctx = parsed.into_value();
        assert_eq!(ctx.category, Category::Research);
        assert!(ctx.keywords.contains(&"robotics".to_string()));
        assert!(ctx.analysis_background.contains("research papers on robotics"));
    }

    #[tokio::test]
    async fn test_compile_falls_back_on_empty_keywords() {
        let response = r#"{"category": "general", "keywords": [], "search_focus": "f"}"#;
        let parsed = compiler(Some(response))
            .compile("contact emails", "https://ex.com")
            .await;
        assert!(parsed.is_fallback());
    }

    #[test]
    fn test_default_context_tokenizes_and_filters() {
        let ctx = default_context("Find all the admission deadlines for international students");
        assert_eq!(ctx.category, Category::Admission);
        assert!(ctx.keywords.contains(&"deadlines".to_string()));
        assert!(!ctx.keywords.iter().any(|k| k == "the" || k == "for" || k == "all"));
        assert!(ctx.keywords.len() <= 8);
    }

    #[test]
    fn test_default_context_stopword_only_intent() {
        let ctx = default_context("the and of");
        assert!(!ctx.keywords.is_empty());
    }
}
