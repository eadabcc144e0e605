use crate::{
    arbiter::{JoinOutcome, VoiceChange},
    event::*,
    log_internal,
    logging::*,
    playback::SongbirdVoice,
    plugin::*,
};
use anyhow::{anyhow, Result};

/// Plays a member's approved intro sound when they join voice chat
pub struct IntroSound;

#[serenity::async_trait]
impl Plugin for IntroSound {
    fn name(&self) -> &'static str {
        "intro_sound"
    }

    async fn handle(&self, ctx: &Context, event: &Event) -> Result<EventHandled> {
        let Event::VoiceStateUpdate { old, new } = event else {
            return Ok(EventHandled::No);
        };
        let Some(guild_id) = new.guild_id else {
            return Ok(EventHandled::No);
        };

        let manager = songbird::get(ctx.cache_http)
            .await
            .ok_or(anyhow!("Songbird voice client not registered"))?;
        let voice = SongbirdVoice::new(manager);

        let change = VoiceChange {
            guild_id,
            user_id: new.user_id,
            channel_id: new.channel_id,
            had_previous: old.is_some(),
        };

        let outcome = ctx
            .arbiter
            .on_voice_state(ctx.bot_id(), &change, ctx.clips, &voice)
            .await?;
        if outcome == JoinOutcome::Played {
            log_internal!(
                "Played intro for {} in \"{}\"",
                new.user_id.color(ctx.http).await,
                new.channel_id.color(ctx.http).await,
            );
        }

        Ok(EventHandled::Yes)
    }
}
