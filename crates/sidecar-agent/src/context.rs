//! Context window trimming.
//!
//! Providers see a bounded slice of the conversation. The cost proxy is
//! coarse (a third of the content length, rounded up), the budget is
//! fixed, and trimming is lossy: once the window fills, the oldest turns
//! silently drop off.

use sidecar_common::Message;

/// Token budget for one request window.
pub const MAX_TOKEN_WINDOW: usize = 15000;

/// Coarse token estimate for a message.
pub fn estimate_tokens(message: &Message) -> usize {
    message.content.len().div_ceil(3)
}

/// Produce the message window to send: the system message first, then the
/// most recent messages that fit the budget, in their original order.
///
/// The system message's cost is always reserved. Walking newest to
/// oldest, inclusion stops at the first message that would overflow the
/// budget. Deterministic for a given context and budget.
pub fn trim_context(context: &[Message], system_prompt: &str, budget: usize) -> Vec<Message> {
    let system = Message::system(system_prompt);
    let mut tokens = estimate_tokens(&system);
    let mut kept = std::collections::VecDeque::new();

    for message in context.iter().rev() {
        let cost = estimate_tokens(message);
        if tokens + cost > budget {
            break;
        }
        tokens += cost;
        kept.push_front(message.clone());
    }

    let mut result = Vec::with_capacity(kept.len() + 1);
    result.push(system);
    result.extend(kept);
    result
}
