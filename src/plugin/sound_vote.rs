use crate::{event::*, log_event, logging::*, plugin::*, platform::Submission};
use anyhow::Result;

/// Runs community votes on intro sounds posted to the request channel
pub struct SoundVote;

#[serenity::async_trait]
impl Plugin for SoundVote {
    fn name(&self) -> &'static str {
        "sound_vote"
    }

    async fn handle(&self, ctx: &Context, event: &Event) -> Result<EventHandled> {
        match event {
            Event::Message(msg) => {
                let submission = Submission::from(msg);
                if !ctx.ledger.is_submission(&submission) {
                    return Ok(EventHandled::No);
                }

                log_event!(
                    "Sound request for {}",
                    submission.mentioned.color(ctx.http).await
                );
                ctx.ledger.open_proposal(&ctx.platform, &submission).await?;
                Ok(EventHandled::Yes)
            }
            Event::ReactionAdd(reaction) => {
                let outcome = ctx
                    .ledger
                    .on_reaction(
                        &ctx.pipeline(),
                        ctx.bot_id(),
                        reaction.user_id,
                        reaction.channel_id,
                        reaction.message_id,
                    )
                    .await?;

                match outcome {
                    Some(_) => Ok(EventHandled::Yes),
                    None => Ok(EventHandled::No),
                }
            }
            _ => Ok(EventHandled::No),
        }
    }
}
