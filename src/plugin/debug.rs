use crate::{event::*, log_event, logging::*, plugin::*};
use anyhow::Result;

/// Logs the events the bot acts on
pub struct Debug;

#[serenity::async_trait]
impl Plugin for Debug {
    fn name(&self) -> &'static str {
        "debug"
    }

    async fn handle(&self, ctx: &Context, event: &Event) -> Result<EventHandled> {
        match event {
            Event::Ready(ready) => {
                log_event!(
                    "Connected to {} server(s) as {}",
                    ready.guilds.len(),
                    ctx.cache.current_user().color(),
                );
            }
            // Only the request channel matters here; everything else is chatter.
            Event::Message(msg) if msg.channel_id == ctx.cfg.vote.request_channel() => {
                log_event!(
                    "{}{}{}{}{} {} (webhook: {})",
                    msg.guild_id.color(ctx.http).await,
                    Glue {}.color(),
                    msg.channel_id.color(ctx.http).await,
                    Glue {}.color(),
                    msg.author.color(),
                    msg.content_safe(ctx.cache),
                    msg.webhook_id.is_some(),
                );
            }
            Event::Message(_) => {}
            Event::VoiceStateUpdate { old, new } => match (old, new.channel_id) {
                (Some(old), Some(new_id)) if old.channel_id == Some(new_id) => {
                    // State change within same channel, e.g. mute/unmute
                }
                (Some(old), Some(_)) => log_event!(
                    "{} moved VC channel from \"{}\" to \"{}\"",
                    new.user_id.color(ctx.http).await,
                    old.channel_id.color(ctx.http).await,
                    new.channel_id.color(ctx.http).await,
                ),
                (Some(old), None) => log_event!(
                    "{} left VC channel \"{}\"",
                    new.user_id.color(ctx.http).await,
                    old.channel_id.color(ctx.http).await,
                ),
                (None, Some(_)) => log_event!(
                    "{} joined VC channel \"{}\"",
                    new.user_id.color(ctx.http).await,
                    new.channel_id.color(ctx.http).await,
                ),
                (None, None) => log_event!("Unknown voice state update"),
            },
            Event::ReactionAdd(reaction) if reaction.channel_id == ctx.cfg.vote.request_channel() => {
                log_event!(
                    "{} reacted to message {} with \"{}\"",
                    reaction.user_id.color(ctx.http).await,
                    reaction.message_id,
                    reaction.emoji,
                );
            }
            Event::ReactionAdd(_) => {}
        }

        Ok(EventHandled::No)
    }
}
