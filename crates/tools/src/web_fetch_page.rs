//! Fetch a web page and return its visible body text.

use async_trait::async_trait;
use aicrew_core::error::ToolError;
use aicrew_core::tool::{ParamKind, ParamSpec, Tool, ToolSpec};
use scraper::{Html, Selector};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, warn};

const CONTENT_CHARS: usize = 4000;
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
                          Chrome/124.0 Safari/537.36";

pub struct WebFetchPageTool {
    client: reqwest::Client,
}

impl WebFetchPageTool {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }

    fn failed(reason: impl Into<String>) -> ToolError {
        ToolError::ExecutionFailed {
            tool_name: "web_fetch_page".into(),
            reason: reason.into(),
        }
    }
}

impl Default for WebFetchPageTool {
    fn default() -> Self {
        Self::new()
    }
}

/// Whitespace-joined text of `<body>`, skipping script and style content.
/// `None` when the document has no body.
pub fn body_text(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("body").ok()?;
    let body = document.select(&selector).next()?;

    let mut parts = Vec::new();
    for node in body.descendants() {
        let Some(text) = node.value().as_text() else { continue };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| matches!(e.name(), "script" | "style" | "noscript"))
        });
        let text = text.trim();
        if !hidden && !text.is_empty() {
            parts.push(text);
        }
    }
    Some(parts.join(" "))
}

#[async_trait]
impl Tool for WebFetchPageTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "web_fetch_page".into(),
            description: "Read the full text content of a specific web page, given its URL.".into(),
            params: vec![ParamSpec::required(
                "url",
                ParamKind::String,
                "The full URL of the web page to read.",
            )],
        }
    }

    async fn execute(&self, arguments: Map<String, Value>) -> Result<String, ToolError> {
        let raw = arguments
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'url' argument".into()))?;
        let url = reqwest::Url::parse(raw)
            .map_err(|e| ToolError::InvalidArguments(format!("invalid url '{raw}': {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ToolError::InvalidArguments(format!(
                "unsupported url scheme '{}'",
                url.scheme()
            )));
        }

        debug!(%url, "Fetching page");
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Self::failed(format!("Failed to fetch content from the URL: {e}")))?;
        let html = response
            .text()
            .await
            .map_err(|e| Self::failed(format!("Failed to read page body: {e}")))?;

        let Some(text) = body_text(&html).filter(|t| !t.is_empty()) else {
            warn!(%url, "Page has no body content");
            return Err(Self::failed("The page has no visible content."));
        };
        let content: String = text.chars().take(CONTENT_CHARS).collect();

        serde_json::to_string(&serde_json::json!({ "source_url": raw, "content": content }))
            .map_err(|e| Self::failed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, response::Html as HtmlBody, routing::get};

    async fn serve() -> String {
        let long = format!("<html><body><p>{}</p></body></html>", "word ".repeat(2000));
        let router = Router::new()
            .route(
                "/page",
                get(|| async {
                    HtmlBody("<html><head><title>T</title></head><body><h1>Hi</h1>\
                              <script>track()</script><p>Some <em>text</em></p></body></html>")
                }),
            )
            .route("/long", get(move || async move { HtmlBody(long) }))
            .route("/missing", get(|| async { axum::http::StatusCode::NOT_FOUND }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn args(url: &str) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("url".into(), Value::String(url.into()));
        m
    }

    #[test]
    fn body_text_skips_scripts() {
        assert_eq!(
            body_text("<body><p>a</p><script>b()</script><style>c{}</style><p>d</p></body>").as_deref(),
            Some("a d")
        );
    }

    #[tokio::test]
    async fn fetches_visible_text() {
        let base = serve().await;
        let out = WebFetchPageTool::new().execute(args(&format!("{base}/page"))).await.unwrap();
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["content"], "Hi Some text");
        assert!(parsed["source_url"].as_str().unwrap().ends_with("/page"));
    }

    #[tokio::test]
    async fn content_is_truncated() {
        let base = serve().await;
        let out = WebFetchPageTool::new().execute(args(&format!("{base}/long"))).await.unwrap();
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["content"].as_str().unwrap().chars().count(), CONTENT_CHARS);
    }

    #[tokio::test]
    async fn http_errors_and_bad_urls_fail() {
        let base = serve().await;
        let tool = WebFetchPageTool::new();
        assert!(matches!(
            tool.execute(args(&format!("{base}/missing"))).await,
            Err(ToolError::ExecutionFailed { .. })
        ));
        assert!(matches!(
            tool.execute(args("file:///etc/passwd")).await,
            Err(ToolError::InvalidArguments(_))
        ));
        assert!(matches!(tool.execute(args("not a url")).await, Err(ToolError::InvalidArguments(_))));
    }
}
