use async_trait::async_trait;
use scraper::{Html, Selector};
use std::time::Duration;
use thiserror::Error;

use crate::models::SeedSource;

/// Browser-like user agent for HTML result pages; search engines serve
/// crawler UAs a captcha or an empty shell.
const BROWSER_UA: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/120.0 Safari/537.36";

/// Attempts each provider makes before reporting failure. Retries live
/// here, not in the seed generator.
const ATTEMPTS: u32 = 2;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Search request failed: {0}")]
    Transport(String),
    #[error("Search request timed out")]
    Timeout,
    #[error("Search engine returned HTTP {0}")]
    HttpStatus(u16),
}

/// One search engine result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub rank: u32,
}

/// Capability interface over a search engine. Implementations self-limit
/// to `max_results` and own their transport retries.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn source(&self) -> SeedSource;
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError>;
}

fn build_client(timeout_s: u64) -> Result<reqwest::Client, SearchError> {
    reqwest::Client::builder()
        .user_agent(BROWSER_UA)
        .timeout(Duration::from_secs(timeout_s))
        .gzip(true)
        .build()
        .map_err(|e| SearchError::Transport(e.to_string()))
}

async fn get_with_retry(
    client: &reqwest::Client,
    url: &str,
    query: &[(&str, &str)],
) -> Result<String, SearchError> {
    let mut last_error = SearchError::Transport("no attempt made".to_string());
    for attempt in 1..=ATTEMPTS {
        let result = client.get(url).query(query).send().await;
        match result {
            Ok(response) if response.status().is_success() => {
                return response
                    .text()
                    .await
                    .map_err(|e| SearchError::Transport(e.to_string()));
            }
            Ok(response) => {
                last_error = SearchError::HttpStatus(response.status().as_u16());
            }
            Err(e) if e.is_timeout() => last_error = SearchError::Timeout,
            Err(e) => last_error = SearchError::Transport(e.to_string()),
        }
        if attempt < ATTEMPTS {
            tokio::time::sleep(Duration::from_millis(500 * attempt as u64)).await;
        }
    }
    Err(last_error)
}

// --- DuckDuckGo instant-answer API ---

pub struct DuckDuckGoApiProvider {
    client: reqwest::Client,
    max_results: usize,
}

impl DuckDuckGoApiProvider {
    pub fn new(max_results: usize, timeout_s: u64) -> Result<Self, SearchError> {
        Ok(DuckDuckGoApiProvider {
            client: build_client(timeout_s)?,
            max_results,
        })
    }

    fn parse(body: &str, max_results: usize) -> Vec<SearchHit> {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
            return Vec::new();
        };
        let mut hits = Vec::new();

        let abstract_url = value["AbstractURL"].as_str().unwrap_or("");
        if !abstract_url.is_empty() {
            hits.push(SearchHit {
                url: abstract_url.to_string(),
                title: value["Heading"].as_str().unwrap_or("").to_string(),
                snippet: value["AbstractText"].as_str().unwrap_or("").to_string(),
                rank: 1,
            });
        }

        // RelatedTopics mixes topic entries with nested groups
        let mut queue: Vec<&serde_json::Value> = Vec::new();
        if let Some(topics) = value["RelatedTopics"].as_array() {
            queue.extend(topics.iter());
        }
        let mut index = 0;
        while index < queue.len() && hits.len() < max_results {
            let entry = queue[index];
            index += 1;
            if let Some(url) = entry["FirstURL"].as_str() {
                let text = entry["Text"].as_str().unwrap_or("");
                hits.push(SearchHit {
                    url: url.to_string(),
                    title: text.chars().take(80).collect(),
                    snippet: text.to_string(),
                    rank: hits.len() as u32 + 1,
                });
            } else if let Some(nested) = entry["Topics"].as_array() {
                queue.extend(nested.iter());
            }
        }

        hits.truncate(max_results);
        hits
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGoApiProvider {
    fn source(&self) -> SeedSource {
        SeedSource::DuckduckgoApi
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        let body = get_with_retry(
            &self.client,
            "https://api.duckduckgo.com/",
            &[("q", query), ("format", "json"), ("no_html", "1")],
        )
        .await?;
        Ok(Self::parse(&body, self.max_results))
    }
}

// --- Bing HTML results ---

pub struct BingProvider {
    client: reqwest::Client,
    max_results: usize,
}

impl BingProvider {
    pub fn new(max_results: usize, timeout_s: u64) -> Result<Self, SearchError> {
        Ok(BingProvider {
            client: build_client(timeout_s)?,
            max_results,
        })
    }

    fn parse(body: &str, max_results: usize) -> Vec<SearchHit> {
        let document = Html::parse_document(body);
        let result_sel = Selector::parse("li.b_algo").expect("valid selector");
        let link_sel = Selector::parse("h2 a").expect("valid selector");
        let snippet_sel = Selector::parse(".b_caption p").expect("valid selector");

        let mut hits = Vec::new();
        for result in document.select(&result_sel) {
            if hits.len() >= max_results {
                break;
            }
            let Some(link) = result.select(&link_sel).next() else {
                continue;
            };
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            if !href.starts_with("http") {
                continue;
            }
            let snippet = result
                .select(&snippet_sel)
                .next()
                .map(|el| el.text().collect::<String>().trim().to_string())
                .unwrap_or_default();
            hits.push(SearchHit {
                url: href.to_string(),
                title: link.text().collect::<String>().trim().to_string(),
                snippet,
                rank: hits.len() as u32 + 1,
            });
        }
        hits
    }
}

#[async_trait]
impl SearchProvider for BingProvider {
    fn source(&self) -> SeedSource {
        SeedSource::Bing
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        let body = get_with_retry(
            &self.client,
            "https://www.bing.com/search",
            &[("q", query)],
        )
        .await?;
        Ok(Self::parse(&body, self.max_results))
    }
}

// --- DuckDuckGo HTML (lite) results ---

pub struct DuckDuckGoHtmlProvider {
    client: reqwest::Client,
    max_results: usize,
}

impl DuckDuckGoHtmlProvider {
    pub fn new(max_results: usize, timeout_s: u64) -> Result<Self, SearchError> {
        Ok(DuckDuckGoHtmlProvider {
            client: build_client(timeout_s)?,
            max_results,
        })
    }

    /// Result hrefs are redirect links carrying the target in `uddg`.
    fn resolve_redirect(href: &str) -> Option<String> {
        let absolute = if href.starts_with("//") {
            format!("https:{href}")
        } else {
            href.to_string()
        };
        let parsed = url::Url::parse(&absolute).ok()?;
        if let Some((_, target)) = parsed.query_pairs().find(|(k, _)| k == "uddg") {
            return Some(target.into_owned());
        }
        if absolute.starts_with("http") {
            Some(absolute)
        } else {
            None
        }
    }

    fn parse(body: &str, max_results: usize) -> Vec<SearchHit> {
        let document = Html::parse_document(body);
        let link_sel = Selector::parse("a.result__a").expect("valid selector");
        let snippet_sel = Selector::parse("a.result__snippet").expect("valid selector");

        let snippets: Vec<String> = document
            .select(&snippet_sel)
            .map(|el| el.text().collect::<String>().trim().to_string())
            .collect();

        let mut hits = Vec::new();
        for (index, link) in document.select(&link_sel).enumerate() {
            if hits.len() >= max_results {
                break;
            }
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            let Some(url) = Self::resolve_redirect(href) else {
                continue;
            };
            hits.push(SearchHit {
                url,
                title: link.text().collect::<String>().trim().to_string(),
                snippet: snippets.get(index).cloned().unwrap_or_default(),
                rank: hits.len() as u32 + 1,
            });
        }
        hits
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGoHtmlProvider {
    fn source(&self) -> SeedSource {
        SeedSource::DuckduckgoHtml
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        let body = get_with_retry(
            &self.client,
            "https://html.duckduckgo.com/html/",
            &[("q", query)],
        )
        .await?;
        Ok(Self::parse(&body, self.max_results))
    }
}

// --- Google HTML results ---

pub struct GoogleProvider {
    client: reqwest::Client,
    max_results: usize,
}

impl GoogleProvider {
    pub fn new(max_results: usize, timeout_s: u64) -> Result<Self, SearchError> {
        Ok(GoogleProvider {
            client: build_client(timeout_s)?,
            max_results,
        })
    }

    fn parse(body: &str, max_results: usize) -> Vec<SearchHit> {
        let document = Html::parse_document(body);
        let result_sel = Selector::parse("div.g").expect("valid selector");
        let link_sel = Selector::parse("a[href]").expect("valid selector");
        let title_sel = Selector::parse("h3").expect("valid selector");

        let mut hits = Vec::new();
        for result in document.select(&result_sel) {
            if hits.len() >= max_results {
                break;
            }
            let Some(link) = result.select(&link_sel).next() else {
                continue;
            };
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            if !href.starts_with("http") {
                continue;
            }
            let Some(title) = result.select(&title_sel).next() else {
                continue;
            };
            hits.push(SearchHit {
                url: href.to_string(),
                title: title.text().collect::<String>().trim().to_string(),
                snippet: String::new(),
                rank: hits.len() as u32 + 1,
            });
        }
        hits
    }
}

#[async_trait]
impl SearchProvider for GoogleProvider {
    fn source(&self) -> SeedSource {
        SeedSource::Google
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        let body = get_with_retry(
            &self.client,
            "https://www.google.com/search",
            &[("q", query)],
        )
        .await?;
        Ok(Self::parse(&body, self.max_results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ddg_api_parse() {
        let body = r#"{
            "AbstractURL": "https://ex.com/about",
            "Heading": "Example",
            "AbstractText": "An example site",
            "RelatedTopics": [
                {"FirstURL": "https://ex.com/a", "Text": "Topic A"},
                {"Topics": [{"FirstURL": "https://ex.com/b", "Text": "Topic B"}]}
            ]
        }"#;
        let hits = DuckDuckGoApiProvider::parse(body, 10);
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].url, "https://ex.com/about");
        assert_eq!(hits[0].rank, 1);
        assert_eq!(hits[2].url, "https://ex.com/b");
    }

    #[test]
    fn test_ddg_api_parse_limits_results() {
        let topics: Vec<String> = (0..20)
            .map(|i| format!(r#"{{"FirstURL": "https://ex.com/{i}", "Text": "t{i}"}}"#))
            .collect();
        let body = format!(r#"{{"RelatedTopics": [{}]}}"#, topics.join(","));
        let hits = DuckDuckGoApiProvider::parse(&body, 5);
        assert_eq!(hits.len(), 5);
    }

    #[test]
    fn test_bing_parse() {
        let body = r#"<html><body><ol>
            <li class="b_algo">
                <h2><a href="https://ex.com/one">First Result</a></h2>
                <div class="b_caption"><p>Snippet one</p></div>
            </li>
            <li class="b_algo">
                <h2><a href="/relative">Skipped</a></h2>
            </li>
            <li class="b_algo">
                <h2><a href="https://ex.com/two">Second Result</a></h2>
            </li>
        </ol></body></html>"#;
        let hits = BingProvider::parse(body, 10);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "First Result");
        assert_eq!(hits[0].snippet, "Snippet one");
        assert_eq!(hits[1].rank, 2);
    }

    #[test]
    fn test_ddg_html_redirect_resolution() {
        let href = "//duckduckgo.com/l/?uddg=https%3A%2F%2Fex.com%2Fadmission&rut=abc";
        let resolved = DuckDuckGoHtmlProvider::resolve_redirect(href).unwrap();
        assert_eq!(resolved, "https://ex.com/admission");

        let direct = DuckDuckGoHtmlProvider::resolve_redirect("https://ex.com/x").unwrap();
        assert_eq!(direct, "https://ex.com/x");
    }

    #[test]
    fn test_ddg_html_parse() {
        let body = r##"<html><body>
            <a class="result__a" href="https://ex.com/one">One</a>
            <a class="result__snippet" href="#">snippet one</a>
            <a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fex.com%2Ftwo">Two</a>
            <a class="result__snippet" href="#">snippet two</a>
        </body></html>"##;
        let hits = DuckDuckGoHtmlProvider::parse(body, 10);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[1].url, "https://ex.com/two");
        assert_eq!(hits[0].snippet, "snippet one");
    }

    #[test]
    fn test_google_parse() {
        let body = r#"<html><body>
            <div class="g"><a href="https://ex.com/one"><h3>One</h3></a></div>
            <div class="g"><a href="https://ex.com/two"><h3>Two</h3></a></div>
            <div class="g"><a href="https://ex.com/no-title">x</a></div>
        </body></html>"#;
        let hits = GoogleProvider::parse(body, 10);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "One");
    }

    #[test]
    fn test_empty_bodies_yield_no_hits() {
        assert!(DuckDuckGoApiProvider::parse("", 10).is_empty());
        assert!(BingProvider::parse("<html></html>", 10).is_empty());
        assert!(DuckDuckGoHtmlProvider::parse("<html></html>", 10).is_empty());
        assert!(GoogleProvider::parse("<html></html>", 10).is_empty());
    }
}
