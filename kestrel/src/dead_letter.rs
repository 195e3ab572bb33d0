//! # Dead Letters
//!
//! Reserved actor spawned under [`DEAD_LETTER_ID`] when an engine is built.
//! Every message that cannot be delivered locally reaches it as a
//! [`DeadLetterEvent`]. It keeps them until asked with [`DeadLetterFetch`].

use async_trait::async_trait;
use kestrel_api::events::DeadLetterEvent;
use kestrel_api::types::ActorResult;
use tracing::warn;

use crate::context::Context;
use crate::receiver::Receiver;

/// Id of the dead-letter sink on every engine.
pub const DEAD_LETTER_ID: &str = "deadletter";

/// Query answered with [`DeadLetters`]. With `flush` set the buffer is
/// cleared after the reply.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeadLetterFetch {
    pub flush: bool,
}

/// Dead letters observed so far, oldest first.
#[derive(Debug, Clone, Default)]
pub struct DeadLetters(pub Vec<DeadLetterEvent>);

#[derive(Debug, Default)]
pub(crate) struct DeadLetterSink {
    letters: Vec<DeadLetterEvent>,
}

#[async_trait]
impl Receiver for DeadLetterSink {
    async fn receive(&mut self, ctx: &mut Context) -> ActorResult<()> {
        if let Some(letter) = ctx.message_as::<DeadLetterEvent>() {
            warn!(
                target = %letter.target,
                sender = ?letter.sender,
                message = ?letter.message,
                "dead letter"
            );
            self.letters.push(letter.clone());
        } else if let Some(fetch) = ctx.message_as::<DeadLetterFetch>() {
            let letters = if fetch.flush {
                std::mem::take(&mut self.letters)
            } else {
                self.letters.clone()
            };
            ctx.respond(DeadLetters(letters)).await?;
        }
        Ok(())
    }
}
