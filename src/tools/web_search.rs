//! Web search tool backed by DuckDuckGo
//!
//! Queries the HTML results page first and falls back to the Instant
//! Answer API when the page yields nothing usable.

use super::{Tool, ToolContext, ToolError};
use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt::Write;
use std::sync::LazyLock;
use std::time::Duration;

const HTML_ENDPOINT: &str = "https://html.duckduckgo.com/html/";
const INSTANT_ANSWER_ENDPOINT: &str = "https://api.duckduckgo.com/";
const USER_AGENT: &str = "Mozilla/5.0 (compatible; chatgemini/0.1; +https://duckduckgo.com)";
const MAX_RESULTS: usize = 5;

static RESULT_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<a([^>]*class="result__a"[^>]*)>(.*?)</a>"#).expect("valid regex")
});
static RESULT_SNIPPET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<(?:a|div|td)[^>]*class="result__snippet"[^>]*>(.*?)</(?:a|div|td)>"#)
        .expect("valid regex")
});
static HREF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"href="([^"]*)""#).expect("valid regex"));
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// A single search hit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Free-text web search returning a short text summary
pub struct WebSearchTool {
    client: Client,
}

#[derive(Debug, Deserialize)]
struct WebSearchInput {
    query: String,
}

impl WebSearchTool {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }

    async fn search_html(&self, query: &str) -> Result<Vec<SearchHit>, ToolError> {
        let response = self
            .client
            .post(HTML_ENDPOINT)
            .form(&[("q", query)])
            .send()
            .await
            .map_err(|e| ToolError::Failed(format!("DuckDuckGo request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::Failed(format!(
                "DuckDuckGo returned HTTP {}",
                status.as_u16()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ToolError::Failed(format!("Failed to read DuckDuckGo response: {e}")))?;
        Ok(parse_html_results(&body))
    }

    async fn search_instant_answer(&self, query: &str) -> Result<Vec<SearchHit>, ToolError> {
        let data: Value = self
            .client
            .get(INSTANT_ANSWER_ENDPOINT)
            .query(&[("q", query), ("format", "json"), ("no_html", "1")])
            .send()
            .await
            .map_err(|e| ToolError::Failed(format!("DuckDuckGo request failed: {e}")))?
            .json()
            .await
            .map_err(|e| ToolError::Failed(format!("Failed to parse DuckDuckGo response: {e}")))?;
        Ok(parse_instant_answer(&data))
    }
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &'static str {
        "web_search"
    }

    fn description(&self) -> String {
        "Search the web with DuckDuckGo. Use for current events, news, recent facts, or anything you are unsure about. Returns a short list of result titles, snippets and URLs.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["query"],
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                }
            }
        })
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> Result<String, ToolError> {
        let input: WebSearchInput = serde_json::from_value(input)
            .map_err(|e| ToolError::InvalidInput(e.to_string()))?;
        let query = input.query.trim();
        if query.is_empty() {
            return Err(ToolError::InvalidInput("query must not be empty".to_string()));
        }

        let mut hits = match self.search_html(query).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(thread_id = %ctx.thread_id, error = %e, "HTML search failed, trying instant answers");
                Vec::new()
            }
        };
        if hits.is_empty() {
            hits = self.search_instant_answer(query).await?;
        }

        tracing::info!(thread_id = %ctx.thread_id, query = %query, hits = hits.len(), "Web search completed");

        if hits.is_empty() {
            return Err(ToolError::NoResults(query.to_string()));
        }
        Ok(format_hits(&hits))
    }
}

/// Extract results from the DuckDuckGo HTML page.
///
/// Each result spans from its title link to the next one; its snippet is
/// looked up only inside that span, so a result without a snippet cannot
/// shift snippets onto other hits.
fn parse_html_results(html: &str) -> Vec<SearchHit> {
    let links: Vec<_> = RESULT_LINK.captures_iter(html).collect();

    links
        .iter()
        .enumerate()
        .filter_map(|(i, c)| {
            let title = clean_html(&c[2]);
            let url = HREF
                .captures(&c[1])
                .map(|h| resolve_redirect(&decode_entities(&h[1])))
                .unwrap_or_default();
            if title.is_empty() || url.is_empty() {
                return None;
            }

            let block_start = c.get(0).map_or(html.len(), |m| m.end());
            let block_end = links
                .get(i + 1)
                .and_then(|next| next.get(0))
                .map_or(html.len(), |m| m.start());
            let snippet = html
                .get(block_start..block_end)
                .and_then(|block| RESULT_SNIPPET.captures(block))
                .map(|s| clean_html(&s[1]))
                .unwrap_or_default();

            Some(SearchHit {
                title,
                url,
                snippet,
            })
        })
        .filter(|hit| !hit.url.contains("duckduckgo.com/y.js"))
        .take(MAX_RESULTS)
        .collect()
}

/// Extract results from an Instant Answer API response
fn parse_instant_answer(data: &Value) -> Vec<SearchHit> {
    let mut hits = Vec::new();
    let str_field = |v: &Value, key: &str| v.get(key).and_then(Value::as_str).unwrap_or("").to_string();

    let abstract_text = str_field(data, "AbstractText");
    if !abstract_text.is_empty() {
        let heading = str_field(data, "Heading");
        hits.push(SearchHit {
            title: if heading.is_empty() { "Result".to_string() } else { heading },
            url: str_field(data, "AbstractURL"),
            snippet: abstract_text,
        });
    }

    let answer = str_field(data, "Answer");
    if !answer.is_empty() {
        hits.push(SearchHit {
            title: "Answer".to_string(),
            url: String::new(),
            snippet: answer,
        });
    }

    if let Some(topics) = data.get("RelatedTopics").and_then(Value::as_array) {
        for topic in topics {
            if hits.len() >= MAX_RESULTS {
                break;
            }
            let text = str_field(topic, "Text");
            if text.is_empty() {
                continue;
            }
            hits.push(SearchHit {
                title: text.chars().take(80).collect(),
                url: str_field(topic, "FirstURL"),
                snippet: text,
            });
        }
    }

    hits.truncate(MAX_RESULTS);
    hits
}

fn format_hits(hits: &[SearchHit]) -> String {
    let mut out = String::new();
    for (i, hit) in hits.iter().enumerate() {
        let _ = write!(out, "{}. {}", i + 1, hit.title);
        if !hit.snippet.is_empty() && hit.snippet != hit.title {
            let _ = write!(out, " — {}", hit.snippet);
        }
        if !hit.url.is_empty() {
            let _ = write!(out, " ({})", hit.url);
        }
        out.push('\n');
    }
    out.trim_end().to_string()
}

/// DuckDuckGo wraps result links in `//duckduckgo.com/l/?uddg=<target>`
fn resolve_redirect(href: &str) -> String {
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href.to_string()
    };

    match Url::parse(&absolute) {
        Ok(url) if url.path() == "/l/" => url
            .query_pairs()
            .find(|(k, _)| k == "uddg")
            .map_or(absolute.clone(), |(_, v)| v.into_owned()),
        Ok(_) => absolute,
        Err(_) => String::new(),
    }
}

fn clean_html(fragment: &str) -> String {
    let text = TAG.replace_all(fragment, "");
    let text = decode_entities(&text);
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

fn decode_entities(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
