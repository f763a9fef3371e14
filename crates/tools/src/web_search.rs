//! Web search tool backed by the Google Custom Search JSON API.
//!
//! Needs `GOOGLE_SEARCH_API_KEY` and `GOOGLE_SEARCH_ENGINE_ID`. Without them
//! the tool still registers, but every call fails with a configuration error
//! that the model sees as the tool result.

use async_trait::async_trait;
use aicrew_core::error::ToolError;
use aicrew_core::tool::{ParamKind, ParamSpec, Tool, ToolSpec};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

pub const SEARCH_ENDPOINT: &str = "https://www.googleapis.com/customsearch/v1";

const DEFAULT_RESULTS: u64 = 3;
const MAX_RESULTS: u64 = 10;

pub struct WebSearchTool {
    client: reqwest::Client,
    api_key: Option<String>,
    engine_id: Option<String>,
    endpoint: String,
    default_lang: String,
}

impl WebSearchTool {
    pub fn new(api_key: Option<String>, engine_id: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            api_key: api_key.filter(|k| !k.is_empty()),
            engine_id: engine_id.filter(|k| !k.is_empty()),
            endpoint: SEARCH_ENDPOINT.into(),
            default_lang: "en".into(),
        }
    }

    /// Read credentials from the environment.
    pub fn from_env() -> Self {
        Self::new(
            std::env::var("GOOGLE_SEARCH_API_KEY").ok(),
            std::env::var("GOOGLE_SEARCH_ENGINE_ID").ok(),
        )
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_default_lang(mut self, lang: impl Into<String>) -> Self {
        self.default_lang = lang.into();
        self
    }

    fn failed(reason: impl Into<String>) -> ToolError {
        ToolError::ExecutionFailed {
            tool_name: "web_search".into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize, Serialize, PartialEq)]
struct SearchItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
}

#[async_trait]
impl Tool for WebSearchTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "web_search".into(),
            description: "Search the web for current events, recent information, or news on any topic. \
                          Returns results with titles, links, and snippets."
                .into(),
            params: vec![
                ParamSpec::required("query", ParamKind::String, "The search query to use."),
                ParamSpec::optional(
                    "lang",
                    ParamKind::String,
                    format!("Language of the results (e.g. 'en', 'it'). Defaults to '{}'.", self.default_lang),
                ),
                ParamSpec::optional(
                    "num_results",
                    ParamKind::Integer,
                    "Number of results to return (1-10). Defaults to 3.",
                ),
            ],
        }
    }

    async fn execute(&self, arguments: Map<String, Value>) -> Result<String, ToolError> {
        let (Some(api_key), Some(engine_id)) = (&self.api_key, &self.engine_id) else {
            return Err(Self::failed(
                "search is not configured; set GOOGLE_SEARCH_API_KEY and GOOGLE_SEARCH_ENGINE_ID",
            ));
        };

        let query = arguments
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;
        let lang = arguments
            .get("lang")
            .and_then(Value::as_str)
            .unwrap_or(&self.default_lang);
        let num = arguments
            .get("num_results")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_RESULTS)
            .clamp(1, MAX_RESULTS);

        debug!(query, lang, num, "Running web search");
        let lr = format!("lang_{lang}");
        let num_param = num.to_string();

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("key", api_key.as_str()),
                ("cx", engine_id.as_str()),
                ("q", query),
                ("lr", lr.as_str()),
                ("num", num_param.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Self::failed(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::failed(format!("search API returned status {status}")));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| Self::failed(format!("unreadable search response: {e}")))?;

        if body.items.is_empty() {
            return Ok("No results found.".into());
        }

        let results: Vec<SearchItem> = body.items.into_iter().take(num as usize).collect();
        serde_json::to_string_pretty(&serde_json::json!({ "results": results }))
            .map_err(|e| Self::failed(e.to_string()))
    }
}
