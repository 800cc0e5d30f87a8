use std::sync::Arc;

use super::extractor::ExtractedContent;
use crate::llm::{extract_json, extract_score, GenerateRequest, LlmClient, ModelTier, Parsed};
use crate::models::{AnalysisResult, IntentContext, PrioritizedUrl};

/// Characters of body text shown to the analysis-tier model.
pub const ANALYSIS_BODY_CHARS: usize = 3000;
/// Outbound links listed in the analysis prompt.
pub const ANALYSIS_MAX_LINKS: usize = 20;
/// Characters of body text shown to the quick gate.
pub const QUICK_PREVIEW_CHARS: usize = 500;

/// LLM-backed page analysis. Holds no state beyond the client reference;
/// both operations are pure with respect to their inputs.
pub struct ContentAnalyzer {
    llm: Arc<dyn LlmClient>,
}

impl ContentAnalyzer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        ContentAnalyzer { llm }
    }

    /// Fast-tier relevance check over title + preview. Falls back to
    /// keyword counting when the model is unavailable or unparseable.
    pub async fn quick_relevance(
        &self,
        title: &str,
        preview: &str,
        intent: &IntentContext,
    ) -> (f64, Vec<String>) {
        let matched = matched_keywords(intent, &format!("{title} {preview}"));

        let request = GenerateRequest::new(
            ModelTier::Fast,
            "You judge whether a web page is relevant to a research goal. \
             Respond with a single relevance score between 0 and 1, nothing else.",
            format!(
                "Goal: {}\nKeywords: {}\n\nPage title: {}\nPage preview: {}\n\nScore (0-1):",
                intent.search_focus,
                intent.keywords.join(", "),
                title,
                preview
            ),
        )
        .with_temperature(0.1)
        .with_max_tokens(16);

        match self.llm.generate(request).await {
            Ok(content) => match extract_score(&content) {
                Some(score) => (score, matched),
                None => {
                    tracing::warn!(%title, "Quick gate response unparseable, using keyword fallback");
                    (keyword_score(intent, &matched), matched)
                }
            },
            Err(error) => {
                tracing::warn!(%error, "Quick gate LLM call failed, using keyword fallback");
                (keyword_score(intent, &matched), matched)
            }
        }
    }

    /// Analysis-tier deep pass: relevance, findings, extracted data, and
    /// ranked outbound URLs. Any model or parse failure degrades to the
    /// rule-based analysis; the URL itself never fails on this stage.
    pub async fn analyze(
        &self,
        content: &ExtractedContent,
        intent: &IntentContext,
    ) -> Parsed<AnalysisResult> {
        let request = GenerateRequest::new(
            ModelTier::Analysis,
            "You are a meticulous research assistant extracting structured \
             findings from web pages. Respond with a single JSON object and \
             no surrounding prose.",
            build_analysis_prompt(content, intent),
        )
        .with_temperature(0.2);

        let raw = match self.llm.generate(request).await {
            Ok(raw) => raw,
            Err(error) => {
                tracing::warn!(url = %content.url, %error, "Analysis LLM call failed");
                return Parsed::Fallback {
                    reason: format!("llm_failed: {error}"),
                    value: rule_based_analysis(content, intent),
                };
            }
        };

        let Some(value) = extract_json(&raw) else {
            tracing::warn!(url = %content.url, "Analysis response had no JSON object");
            return Parsed::Fallback {
                reason: "parse_failed: no JSON object in response".to_string(),
                value: rule_based_analysis(content, intent),
            };
        };

        match serde_json::from_value::<AnalysisResult>(value) {
            Ok(mut result) => {
                result.relevance_score = result.relevance_score.clamp(0.0, 1.0);
                for entry in &mut result.prioritized_urls {
                    entry.priority = entry.priority.clamp(1, 3);
                }
                Parsed::Ok(result)
            }
            Err(error) => Parsed::Fallback {
                reason: format!("parse_failed: {error}"),
                value: rule_based_analysis(content, intent),
            },
        }
    }
}

fn build_analysis_prompt(content: &ExtractedContent, intent: &IntentContext) -> String {
    let links: Vec<String> = content
        .links
        .iter()
        .take(ANALYSIS_MAX_LINKS)
        .map(|link| {
            let anchor = if link.text.is_empty() { "(no text)" } else { &link.text };
            format!("- {} [{}]", link.url, anchor)
        })
        .collect();

    format!(
        "{background}\n\n\
         Page URL: {url}\n\
         Page title: {title}\n\
         Page content:\n{body}\n\n\
         Outbound links:\n{links}\n\n\
         Return a JSON object with exactly these fields:\n\
         {{\n\
           \"relevance_score\": <0..1>,\n\
           \"key_findings\": [<strings>],\n\
           \"extracted_data\": {{<any structured facts>}},\n\
           \"summary\": <one paragraph>,\n\
           \"prioritized_urls\": [{{\"url\": <absolute or relative>, \"priority\": <1|2|3>, \"reason\": <short>}}]\n\
         }}",
        background = intent.analysis_background,
        url = content.url,
        title = content.title,
        body = content.preview(ANALYSIS_BODY_CHARS),
        links = links.join("\n"),
    )
}

/// Keywords from the intent found in `haystack`, case-insensitive.
fn matched_keywords(intent: &IntentContext, haystack: &str) -> Vec<String> {
    let haystack = haystack.to_lowercase();
    intent
        .keywords
        .iter()
        .filter(|kw| !kw.is_empty() && haystack.contains(&kw.to_lowercase()))
        .cloned()
        .collect()
}

fn keyword_score(intent: &IntentContext, matched: &[String]) -> f64 {
    if intent.keywords.is_empty() {
        return 0.5;
    }
    matched.len() as f64 / intent.keywords.len() as f64
}

/// Rule-based stand-in for the deep analysis: keyword coverage as the
/// score, keyword-matching outbound links as the ranked URLs.
pub fn rule_based_analysis(content: &ExtractedContent, intent: &IntentContext) -> AnalysisResult {
    let haystack = format!("{} {}", content.title, content.text);
    let matched = matched_keywords(intent, &haystack);
    let score = keyword_score(intent, &matched);

    let key_findings = if matched.is_empty() {
        Vec::new()
    } else {
        vec![format!("keyword matches: {}", matched.join(", "))]
    };

    let mut prioritized_urls = Vec::new();
    for link in &content.links {
        let link_text = format!("{} {}", link.url, link.text).to_lowercase();
        let hits = intent
            .keywords
            .iter()
            .filter(|kw| !kw.is_empty() && link_text.contains(&kw.to_lowercase()))
            .count();
        if hits == 0 {
            continue;
        }
        prioritized_urls.push(PrioritizedUrl {
            url: link.url.clone(),
            priority: if hits >= 2 { 1 } else { 2 },
            reason: format!("{hits} keyword match(es)"),
        });
    }

    let summary: String = content.preview(200).to_string();

    AnalysisResult {
        relevance_score: score,
        key_findings,
        extracted_data: serde_json::Map::new(),
        summary,
        prioritized_urls,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::extractor::ExtractedLink;
    use crate::llm::LlmError;
    use crate::models::Category;
    use async_trait::async_trait;

    struct CannedLlm {
        response: Option<String>,
    }

    #[async_trait]
    impl LlmClient for CannedLlm {
        async fn generate(&self, _request: GenerateRequest) -> Result<String, LlmError> {
            match &self.response {
                Some(text) => Ok(text.clone()),
                None => Err(LlmError::Transport("connection refused".to_string())),
            }
        }
    }

    fn intent() -> IntentContext {
        IntentContext {
            category: Category::Admission,
            keywords: vec!["admission".to_string(), "apply".to_string(), "deadline".to_string()],
            search_focus: "admission requirements".to_string(),
            priority_signals: vec![],
            exclude_patterns: vec![],
            analysis_background: "We are collecting admission information.".to_string(),
        }
    }

    fn content() -> ExtractedContent {
        ExtractedContent {
            url: "https://ex.com/admission".to_string(),
            title: "Admission".to_string(),
            text: "Apply now. Admission deadlines are in January.".to_string(),
            description: String::new(),
            links: vec![
                ExtractedLink {
                    url: "https://ex.com/apply".to_string(),
                    text: "apply for admission".to_string(),
                    is_internal: true,
                },
                ExtractedLink {
                    url: "https://ex.com/campus-map".to_string(),
                    text: "map".to_string(),
                    is_internal: true,
                },
            ],
            emails: vec![],
            phones: vec![],
            word_count: 8,
        }
    }

    #[tokio::test]
    async fn test_quick_relevance_parses_model_score() {
        let analyzer = ContentAnalyzer::new(Arc::new(CannedLlm {
            response: Some("0.85".to_string()),
        }));
        let (score, matched) = analyzer
            .quick_relevance("Admission", "apply today", &intent())
            .await;
        assert!((score - 0.85).abs() < 1e-9);
        assert!(matched.contains(&"admission".to_string()));
    }

    #[tokio::test]
    async fn test_quick_relevance_falls_back_to_keywords() {
        let analyzer = ContentAnalyzer::new(Arc::new(CannedLlm { response: None }));
        let (score, matched) = analyzer
            .quick_relevance("Admission deadline", "apply now", &intent())
            .await;
        // all three keywords present => full score
        assert_eq!(matched.len(), 3);
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_analyze_accepts_fenced_json() {
        let response = r#"Here you go:
```json
{"relevance_score": 1.4, "key_findings": ["x"], "summary": "s",
 "prioritized_urls": [{"url": "/apply", "priority": 9, "reason": "r"}]}
```"#;
        let analyzer = ContentAnalyzer::new(Arc::new(CannedLlm {
            response: Some(response.to_string()),
        }));
        let parsed = analyzer.analyze(&content(), &intent()).await;
        assert!(!parsed.is_fallback());
        let result = parsed.into_value();
        // out-of-range values are clamped, not rejected
        assert_eq!(result.relevance_score, 1.0);
        assert_eq!(result.prioritized_urls[0].priority, 3);
    }

    #[tokio::test]
    async fn test_analyze_falls_back_on_llm_failure() {
        let analyzer = ContentAnalyzer::new(Arc::new(CannedLlm { response: None }));
        let parsed = analyzer.analyze(&content(), &intent()).await;
        assert!(parsed.is_fallback());
        assert!(parsed.fallback_reason().unwrap().starts_with("llm_failed"));
        let result = parsed.into_value();
        assert!(result.relevance_score > 0.9); // all keywords present
    }

    #[tokio::test]
    async fn test_analyze_falls_back_on_missing_field() {
        // No relevance_score key => deserialization fails => fallback
        let analyzer = ContentAnalyzer::new(Arc::new(CannedLlm {
            response: Some(r#"{"summary": "nice page"}"#.to_string()),
        }));
        let parsed = analyzer.analyze(&content(), &intent()).await;
        assert!(parsed.is_fallback());
        assert!(parsed.fallback_reason().unwrap().starts_with("parse_failed"));
    }

    #[test]
    fn test_rule_based_analysis_ranks_links() {
        let result = rule_based_analysis(&content(), &intent());
        assert_eq!(result.prioritized_urls.len(), 1);
        let top = &result.prioritized_urls[0];
        assert_eq!(top.url, "https://ex.com/apply");
        // "apply" and "admission" both hit => priority 1
        assert_eq!(top.priority, 1);
        assert!(!result.key_findings.is_empty());
    }

    #[test]
    fn test_rule_based_analysis_no_keywords() {
        let mut no_keywords = intent();
        no_keywords.keywords.clear();
        let result = rule_based_analysis(&content(), &no_keywords);
        assert_eq!(result.relevance_score, 0.5);
        assert!(result.prioritized_urls.is_empty());
    }
}
