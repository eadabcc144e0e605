//! Decides whether a voice state change should play someone's intro clip.
//!
//! Every change for a member starts a debounce window; further changes for that member inside
//! the window are dropped, so a flaky client reconnecting in a burst triggers at most one clip.
//! Only fresh joins with a clip on file go on to play, and they take turns on the single voice
//! lease.

use crate::{clip::ClipStore, playback, playback::VoiceGateway};
use anyhow::Result;
use serenity::all::{ChannelId, GuildId, UserId};
use std::{collections::HashSet, sync::Arc, time::Duration};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Exclusive right to use the bot's voice connection.  Released on drop.
pub struct VoiceLease {
    _guard: OwnedMutexGuard<()>,
}

/// A member's voice state change, as far as intro clips are concerned
#[derive(Clone, Debug)]
pub struct VoiceChange {
    pub guild_id: GuildId,
    pub user_id: UserId,
    /// Channel the member is in now, if any
    pub channel_id: Option<ChannelId>,
    /// Whether the member had a voice state before this change, i.e. this is a move or leave
    pub had_previous: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Inside the member's debounce window
    Debounced,
    /// Moved, left, or otherwise not a fresh join
    NotAJoin,
    NoClip,
    Played,
    /// The bot's own voice state changed and its connection was dropped
    Reset,
    /// The bot's own voice state changed and nothing needed doing
    OwnChange,
}

pub struct JoinArbiter {
    join_timeout: Duration,
    max_clip_length: Duration,
    debounce: Arc<Mutex<HashSet<UserId>>>,
    voice_lock: Arc<Mutex<()>>,
}

impl JoinArbiter {
    pub fn new(join_timeout: Duration, max_clip_length: Duration) -> Self {
        Self {
            join_timeout,
            max_clip_length,
            debounce: Arc::new(Mutex::new(HashSet::new())),
            voice_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Start a debounce window for the member.  Returns false if one is already running.
    pub async fn admit(&self, user_id: UserId) -> bool {
        if !self.debounce.lock().await.insert(user_id) {
            return false;
        }

        let debounce = Arc::clone(&self.debounce);
        let join_timeout = self.join_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(join_timeout).await;
            debounce.lock().await.remove(&user_id);
        });
        true
    }

    /// Wait for the voice connection to be free
    pub async fn acquire_lease(&self) -> VoiceLease {
        VoiceLease {
            _guard: Arc::clone(&self.voice_lock).lock_owned().await,
        }
    }

    pub fn try_acquire_lease(&self) -> Option<VoiceLease> {
        Arc::clone(&self.voice_lock)
            .try_lock_owned()
            .ok()
            .map(|guard| VoiceLease { _guard: guard })
    }

    /// Handle any voice state change seen by the bot
    pub async fn on_voice_state(
        &self,
        bot_id: UserId,
        change: &VoiceChange,
        clips: &ClipStore,
        voice: &dyn VoiceGateway,
    ) -> Result<JoinOutcome> {
        if change.user_id != bot_id {
            return self.on_voice_change(change, clips, voice).await;
        }

        // Moved or kicked by a moderator.  Drop the connection so the next join starts clean.
        if change.had_previous
            && playback::reset_connection(self.try_acquire_lease(), voice, change.guild_id).await
        {
            return Ok(JoinOutcome::Reset);
        }
        Ok(JoinOutcome::OwnChange)
    }

    /// Handle a voice state change of some member other than the bot
    async fn on_voice_change(
        &self,
        change: &VoiceChange,
        clips: &ClipStore,
        voice: &dyn VoiceGateway,
    ) -> Result<JoinOutcome> {
        // Debounce before anything else so near-simultaneous events can't both get through.
        if !self.admit(change.user_id).await {
            return Ok(JoinOutcome::Debounced);
        }

        let channel_id = match (change.had_previous, change.channel_id) {
            (false, Some(channel_id)) => channel_id,
            _ => return Ok(JoinOutcome::NotAJoin),
        };

        let lease = self.acquire_lease().await;
        if !clips.exists(change.user_id).await {
            return Ok(JoinOutcome::NoClip);
        }

        let path = clips.path_for(change.user_id);
        playback::play(
            &lease,
            voice,
            change.guild_id,
            channel_id,
            &path,
            self.max_clip_length,
        )
        .await?;
        Ok(JoinOutcome::Played)
    }
}
