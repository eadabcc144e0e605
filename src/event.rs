//! The Serenity crate we're using for the Discord API is designed around callbacks to handle
//! events.  However, this does not mesh well with our plugin framework here.  To resolve this,
//! the handler translates the callbacks to a distinct Event enum.

use crate::context::Context;
use futures::FutureExt;
use serenity::all::{Message, Reaction, Ready, VoiceState};
use std::{any::Any, panic::AssertUnwindSafe};

/// A Discord event
pub enum Event {
    Ready(Ready),
    Message(Message),
    VoiceStateUpdate {
        old: Option<VoiceState>,
        new: VoiceState,
    },
    ReactionAdd(Reaction),
}

impl Event {
    // When an event occurs, iterate over all the plugins to see if any can/should handle it.
    //
    // Nothing a plugin does, erroring or panicking, may take the connection down with it.
    pub async fn handle(self, ctx: Context<'_>) {
        for plugin in crate::plugin::plugins() {
            let handled = AssertUnwindSafe(plugin.handle(&ctx, &self))
                .catch_unwind()
                .await;

            match handled {
                Ok(Ok(EventHandled::Yes)) => return,
                Ok(Ok(EventHandled::No)) => continue,
                Ok(Err(err)) => tracing::error!("Error in plugin {}: {:#}", plugin.name(), err),
                Err(panic) => {
                    tracing::error!(
                        "Plugin {} panicked: {}",
                        plugin.name(),
                        panic_message(&*panic)
                    );
                    return;
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

pub enum EventHandled {
    Yes,
    No,
}
