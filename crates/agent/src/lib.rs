//! Avatar generation: from an incoming item to a sent reply.
//!
//! 1. **Receive** an item from one of the avatar's connectors (or the bus)
//! 2. **Filter** items on channels where not everything merits a reply
//! 3. **Retrieve** knowledge snippets for the item text
//! 4. **Generate** with the model gateway, running enabled tools for a
//!    bounded number of rounds
//! 5. **Send** the reply through the originating connector and remember
//!    the exchange
//!
//! [`GenerationPipeline`] covers steps 2-4; [`AvatarRuntime`] owns the
//! connectors and conversation state around it.

pub mod pipeline;
pub mod prompt;
pub mod runtime;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use pipeline::{GenerationPipeline, PipelineOutcome, PipelineRun, PipelineSettings, PipelineState};
pub use runtime::{AvatarFleet, AvatarRuntime, ITEM_IGNORED_TOPIC, ItemOutcome};
