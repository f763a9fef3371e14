//! Model backends for aicrew.
//!
//! All backends implement the `aicrew_core::Provider` trait. The
//! [`ModelGateway`] selects one by name per call and normalizes its answer.

pub mod gateway;
pub mod openai_compat;
pub mod router;

pub use gateway::{CompletionCall, ModelGateway, ModelReply};
pub use openai_compat::OpenAiCompatProvider;
pub use router::build_from_config;
