use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("No textual content found")]
    EmptyContent,
}

/// One hyperlink found on a page, with its anchor text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedLink {
    pub url: String,
    pub text: String,
    pub is_internal: bool,
}

/// Main content pulled out of one HTML document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedContent {
    pub url: String,
    pub title: String,
    pub text: String,
    pub description: String,
    pub links: Vec<ExtractedLink>,
    pub emails: Vec<String>,
    pub phones: Vec<String>,
    pub word_count: u32,
}

impl ExtractedContent {
    /// First `n` characters of the body text, on a char boundary.
    pub fn preview(&self, n: usize) -> &str {
        match self.text.char_indices().nth(n) {
            Some((idx, _)) => &self.text[..idx],
            None => &self.text,
        }
    }

    pub fn internal_links(&self) -> impl Iterator<Item = &ExtractedLink> {
        self.links.iter().filter(|l| l.is_internal)
    }
}

/// Capability interface for HTML-to-text extraction. Extraction is pure
/// CPU work and runs synchronously inside the pipeline.
pub trait ContentExtractor: Send + Sync {
    fn extract(&self, html: &str, url: &str) -> Result<ExtractedContent, ExtractError>;
}

/// scraper-backed extractor: strips boilerplate elements, resolves links
/// against the page URL, and harvests contact details from text and
/// mailto:/tel: hrefs.
#[derive(Debug, Default)]
pub struct PageExtractor;

/// Elements whose text is never page content.
const NOISE_TAGS: &[&str] = &["script", "style", "noscript", "nav", "header", "footer", "aside"];

/// Cap on harvested links per page; beyond this a page is a link farm.
const MAX_LINKS: usize = 200;

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("valid regex")
    })
}

fn phone_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\+?\d{1,3}[-.\s]?\(?\d{2,4}\)?[-.\s]?\d{3,4}[-.\s]?\d{3,4}")
            .expect("valid regex")
    })
}

impl PageExtractor {
    pub fn new() -> Self {
        PageExtractor
    }

    fn extract_title(document: &Html) -> String {
        let sel = Selector::parse("title").expect("valid selector");
        document
            .select(&sel)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .unwrap_or_default()
    }

    fn extract_description(document: &Html) -> String {
        let sel = Selector::parse(r#"meta[name="description"]"#).expect("valid selector");
        document
            .select(&sel)
            .next()
            .and_then(|el| el.value().attr("content"))
            .unwrap_or("")
            .trim()
            .to_string()
    }

    fn extract_text(document: &Html) -> String {
        let body_sel = Selector::parse("body").expect("valid selector");
        let mut segments: Vec<String> = Vec::new();
        if let Some(body) = document.select(&body_sel).next() {
            visible_text(body, &mut segments);
        }
        // Collapse whitespace runs left behind by markup
        segments
            .join(" ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn extract_links(document: &Html, base: Option<&Url>) -> Vec<ExtractedLink> {
        let sel = Selector::parse("a[href]").expect("valid selector");
        let base_host = base.and_then(|u| u.host_str().map(|h| h.to_lowercase()));
        let mut links = Vec::new();

        for el in document.select(&sel) {
            if links.len() >= MAX_LINKS {
                break;
            }
            let Some(href) = el.value().attr("href") else {
                continue;
            };
            let resolved = match base {
                Some(base) => base.join(href).ok(),
                None => Url::parse(href).ok(),
            };
            let Some(resolved) = resolved else { continue };
            if resolved.scheme() != "http" && resolved.scheme() != "https" {
                continue;
            }

            let link_host = resolved.host_str().map(|h| h.to_lowercase());
            let text = el.text().collect::<String>().trim().to_string();
            links.push(ExtractedLink {
                url: resolved.to_string(),
                text,
                is_internal: link_host == base_host,
            });
        }

        links
    }

    fn extract_emails(document: &Html, text: &str) -> Vec<String> {
        let mut emails: Vec<String> = Vec::new();

        let sel = Selector::parse(r#"a[href^="mailto:"]"#).expect("valid selector");
        for el in document.select(&sel) {
            if let Some(href) = el.value().attr("href") {
                let address = href
                    .trim_start_matches("mailto:")
                    .split('?')
                    .next()
                    .unwrap_or("")
                    .trim();
                if !address.is_empty() {
                    emails.push(address.to_lowercase());
                }
            }
        }

        for m in email_re().find_iter(text) {
            emails.push(m.as_str().to_lowercase());
        }

        emails.sort();
        emails.dedup();
        emails.truncate(50);
        emails
    }

    fn extract_phones(document: &Html, text: &str) -> Vec<String> {
        let mut phones: Vec<String> = Vec::new();

        let sel = Selector::parse(r#"a[href^="tel:"]"#).expect("valid selector");
        for el in document.select(&sel) {
            if let Some(href) = el.value().attr("href") {
                let number = href.trim_start_matches("tel:").trim();
                if !number.is_empty() {
                    phones.push(number.to_string());
                }
            }
        }

        for m in phone_re().find_iter(text) {
            // Require enough digits to be a dialable number
            let digits = m.as_str().chars().filter(char::is_ascii_digit).count();
            if digits >= 7 {
                phones.push(m.as_str().trim().to_string());
            }
        }

        phones.sort();
        phones.dedup();
        phones.truncate(50);
        phones
    }
}

impl ContentExtractor for PageExtractor {
    fn extract(&self, html: &str, url: &str) -> Result<ExtractedContent, ExtractError> {
        let document = Html::parse_document(html);
        let base = Url::parse(url).ok();

        let title = Self::extract_title(&document);
        let description = Self::extract_description(&document);
        let text = Self::extract_text(&document);
        let links = Self::extract_links(&document, base.as_ref());
        let emails = Self::extract_emails(&document, &text);
        let phones = Self::extract_phones(&document, &text);
        let word_count = text.split_whitespace().count() as u32;

        if text.is_empty() && title.is_empty() {
            return Err(ExtractError::EmptyContent);
        }

        Ok(ExtractedContent {
            url: url.to_string(),
            title,
            text,
            description,
            links,
            emails,
            phones,
            word_count,
        })
    }
}

/// Collect the text segments a reader would actually see under `element`.
/// An element whose tag is in [`NOISE_TAGS`] is pruned whole, children
/// included.
fn visible_text(element: ElementRef, segments: &mut Vec<String>) {
    if NOISE_TAGS.contains(&element.value().name()) {
        return;
    }
    for node in element.children() {
        match ElementRef::wrap(node) {
            Some(nested) => visible_text(nested, segments),
            None => {
                if let Some(fragment) = node.value().as_text() {
                    if !fragment.trim().is_empty() {
                        segments.push(fragment.trim().to_string());
                    }
                }
            }
        }
    }
}
