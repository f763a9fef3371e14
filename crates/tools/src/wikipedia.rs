//! Wikipedia lookup via the REST page-summary endpoint.

use async_trait::async_trait;
use aicrew_core::error::ToolError;
use aicrew_core::tool::{ParamKind, ParamSpec, Tool, ToolSpec};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;

const SUMMARY_CHARS: usize = 500;

pub struct WikipediaTool {
    client: reqwest::Client,
    /// `None` means `https://{lang}.wikipedia.org`
    base_url: Option<String>,
}

impl WikipediaTool {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent("aicrew/0.1")
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, base_url: None }
    }

    /// Point every language at one host. Used by tests.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    fn summary_url(&self, lang: &str, title: &str) -> Result<reqwest::Url, ToolError> {
        let base = self
            .base_url
            .clone()
            .unwrap_or_else(|| format!("https://{lang}.wikipedia.org"));
        let mut url = reqwest::Url::parse(&base).map_err(|e| Self::failed(format!("bad base url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| Self::failed("base url cannot carry a path"))?
            .pop_if_empty()
            .extend(["api", "rest_v1", "page", "summary"])
            .push(&title.trim().replace(' ', "_"));
        Ok(url)
    }

    fn failed(reason: impl Into<String>) -> ToolError {
        ToolError::ExecutionFailed {
            tool_name: "wikipedia".into(),
            reason: reason.into(),
        }
    }
}

impl Default for WikipediaTool {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct PageSummary {
    title: String,
    #[serde(default)]
    extract: String,
}

fn valid_lang(lang: &str) -> bool {
    !lang.is_empty() && lang.len() <= 12 && lang.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

#[async_trait]
impl Tool for WikipediaTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "wikipedia".into(),
            description: "Look up general, encyclopedic, or historical information. \
                          Best for questions like 'what is...' or 'who was...'."
                .into(),
            params: vec![
                ParamSpec::required("query", ParamKind::String, "The title of the page to look up."),
                ParamSpec::optional(
                    "lang",
                    ParamKind::String,
                    "Language edition to search (e.g. 'en', 'it', 'es'). Defaults to 'en'.",
                ),
            ],
        }
    }

    async fn execute(&self, arguments: Map<String, Value>) -> Result<String, ToolError> {
        let query = arguments
            .get("query")
            .and_then(Value::as_str)
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;
        let lang = arguments.get("lang").and_then(Value::as_str).unwrap_or("en");
        if !valid_lang(lang) {
            return Err(ToolError::InvalidArguments(format!("invalid language code '{lang}'")));
        }

        let url = self.summary_url(lang, query)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Self::failed(format!("request failed: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Self::failed(format!("Page '{query}' not found.")));
        }
        if !response.status().is_success() {
            return Err(Self::failed(format!("Wikipedia returned status {}", response.status())));
        }

        let page: PageSummary = response
            .json()
            .await
            .map_err(|e| Self::failed(format!("unreadable summary: {e}")))?;

        let mut summary: String = page.extract.chars().take(SUMMARY_CHARS).collect();
        summary.push_str("...");

        serde_json::to_string(&serde_json::json!({ "title": page.title, "summary": summary }))
            .map_err(|e| Self::failed(e.to_string()))
    }
}
