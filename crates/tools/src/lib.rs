//! Built-in tool implementations for aicrew.
//!
//! Tools let an avatar look things up while it composes a reply:
//! do math, search the web, read Wikipedia, fetch a page.
//!
//! Discovery is a static list. Each entry pairs the name the tool is
//! declared under with its implementation; [`ToolRegistry::discover`]
//! rejects any entry whose spec disagrees with its declared name.

pub mod calculator;
pub mod web_fetch_page;
pub mod web_search;
pub mod wikipedia;

use aicrew_core::tool::{Tool, ToolRegistry};
use std::time::Duration;

fn declare(name: &str, tool: impl Tool + 'static) -> (String, Box<dyn Tool>) {
    (name.to_string(), Box::new(tool))
}

/// Every built-in tool, keyed by its declared name.
pub fn builtin_tools() -> Vec<(String, Box<dyn Tool>)> {
    vec![
        declare("calculator", calculator::CalculatorTool),
        declare("web_search", web_search::WebSearchTool::from_env()),
        declare("wikipedia", wikipedia::WikipediaTool::new()),
        declare("web_fetch_page", web_fetch_page::WebFetchPageTool::new()),
    ]
}

/// Create the registry of built-in tools with a per-invocation timeout.
pub fn default_registry(timeout: Duration) -> ToolRegistry {
    ToolRegistry::discover(builtin_tools(), timeout)
}
