//! Connectors for avatars.
//!
//! Channel protocols (IMAP/SMTP, GitHub, chat bots) live outside this
//! workspace. What ships here is the in-process [`InboxConnector`], fed and
//! drained over the admin HTTP surface, and the code that turns a profile's
//! `[[connectors]]` list into live connectors.

pub mod inbox;
pub mod registry;

pub use inbox::{InboxConfig, InboxConnector, InboxMessage, SentReply};
pub use registry::{ConnectorSet, EXTERNAL_KINDS, InboxRegistry, build_connectors};
