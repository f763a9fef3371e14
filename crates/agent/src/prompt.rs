//! Prompt assembly.
//!
//! A generation request is: a system message describing the avatar (plus
//! any retrieved knowledge), the bounded conversation history, and the
//! incoming item rendered through its channel's template.

use aicrew_core::avatar::AvatarProfile;
use aicrew_core::channel::{ChannelId, IncomingItem};
use aicrew_core::conversation::ConversationContext;
use aicrew_core::message::Message;
use aicrew_core::retrieval::RetrievedSnippet;

/// Which template an item is rendered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    Email,
    Github,
    Internal,
    Chat,
}

impl Template {
    pub fn for_channel(channel: &ChannelId) -> Self {
        match channel.as_str() {
            "email" => Template::Email,
            "github" => Template::Github,
            ChannelId::INTERNAL => Template::Internal,
            _ => Template::Chat,
        }
    }
}

/// The system message: who the avatar is, and what it knows.
pub fn system_prompt(profile: &AvatarProfile, snippets: &[RetrievedSnippet]) -> String {
    let mut prompt = format!("You are {}.", profile.name);
    if !profile.personality.trim().is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(profile.personality.trim());
    }
    if !profile.skills.is_empty() {
        prompt.push_str("\n\nYour skills: ");
        prompt.push_str(&profile.skills.join(", "));
    }
    prompt.push_str(&knowledge_block(snippets));
    prompt
}

/// Retrieved snippets joined by `---` separators; empty when there are none.
pub fn knowledge_block(snippets: &[RetrievedSnippet]) -> String {
    if snippets.is_empty() {
        return String::new();
    }
    let joined = snippets
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n---\n");
    format!("\n\nRelevant information from knowledge base:\n{joined}\n")
}

/// Render the incoming item with its channel's template.
pub fn render_item(item: &IncomingItem) -> String {
    let subject = item.subject.as_deref().unwrap_or("");
    match Template::for_channel(&item.channel) {
        Template::Email => format!(
            "You received an email. Write the body of your reply.\n\nFrom: {}\nSubject: {}\n\n{}",
            item.sender, subject, item.body
        ),
        Template::Github => format!(
            "Write a comment for this GitHub thread.\n\nTitle: {subject}\n\n{}",
            item.body
        ),
        Template::Internal => format!("Message from avatar '{}':\n{}", item.sender, item.body),
        Template::Chat => format!(
            "Reply to this {} message from {}:\n{}",
            item.channel, item.sender, item.body
        ),
    }
}

/// The full message list for a GENERATE call.
pub fn build_messages(
    profile: &AvatarProfile,
    context: &ConversationContext,
    snippets: &[RetrievedSnippet],
    item: &IncomingItem,
) -> Vec<Message> {
    let mut messages = Vec::with_capacity(context.len() + 2);
    messages.push(Message::system(system_prompt(profile, snippets)));
    messages.extend(context.to_messages());
    messages.push(Message::user(render_item(item)));
    messages
}

/// Classification prompt for channels where not every item merits a reply.
pub fn filter_prompt(item: &IncomingItem) -> String {
    format!(
        "You are a strict message filter. Decide if the following message requires a reply. \
         Respond ONLY with the single word 'REPLY' or 'IGNORE'.\n\n\
         REPLY to: direct questions, requests for action, important project updates, or personal \
         messages from known contacts.\n\
         IGNORE: spam, advertisements, automatic notifications, newsletters, or messages that are \
         purely informational and don't need a response.\n\n\
         Message to analyze:\nFrom: {}\nSubject: {}\nBody: {}\n\nYour decision:",
        item.sender,
        item.subject.as_deref().unwrap_or(""),
        item.body
    )
}

/// `true` if the filter answered REPLY.
pub fn wants_reply(decision: &str) -> bool {
    decision.trim().to_uppercase().contains("REPLY")
}
