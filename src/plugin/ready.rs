use crate::{event::*, log_internal, plugin::*};
use anyhow::Result;
use serenity::all::ActivityData;

/// Sets presence and resumes in-flight votes when the connection to Discord is ready.
pub struct Ready;

#[serenity::async_trait]
impl Plugin for Ready {
    fn name(&self) -> &'static str {
        "ready"
    }

    async fn handle(&self, ctx: &Context, event: &Event) -> Result<EventHandled> {
        let Event::Ready(_) = event else {
            return Ok(EventHandled::No);
        };

        if let Some(status) = &ctx.cfg.general.status {
            ctx.cache_http
                .set_activity(Some(ActivityData::playing(status.as_str())));
            log_internal!("Set status to \"Playing {}\"", status);
        }

        ctx.ledger
            .reconcile(&ctx.platform, ctx.cfg.vote.backfill_message_count)
            .await?;

        Ok(EventHandled::Yes)
    }
}
