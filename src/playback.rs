use crate::{arbiter::VoiceLease, log_internal};
use serenity::all::{ChannelId, GuildId};
use songbird::{
    events::{Event as VoiceEvent, EventContext, EventHandler as VoiceEventHandler, TrackEvent},
    tracks::PlayMode,
    Songbird,
};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::sync::{oneshot, Mutex};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    #[error("could not join voice channel: {0}")]
    Join(#[source] BoxError),
    #[error("could not play clip: {0}")]
    Playback(#[source] BoxError),
    #[error("could not leave voice channel: {0}")]
    Leave(#[source] BoxError),
    #[error("clip still playing after {0:?}")]
    TimedOut(Duration),
    #[error("no voice connection for guild")]
    NoConnection,
}

/// The bot's outbound voice connections, one per guild
#[serenity::async_trait]
pub trait VoiceGateway: Sync + Send {
    /// Connect to a channel, reusing the guild's connection if there is one
    async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<(), VoiceError>;
    fn has_connection(&self, guild_id: GuildId) -> bool;
    /// Stream an audio file over the guild's connection until it finishes
    async fn play_to_end(&self, guild_id: GuildId, path: &Path) -> Result<(), VoiceError>;
    async fn leave(&self, guild_id: GuildId) -> Result<(), VoiceError>;
}

/// Join, play one clip, and always disconnect afterwards, even when joining or playback failed.
///
/// Requires the voice lease, so only one clip plays at a time.  Playback is cut off after
/// `max_length`, so a track that never reports its end can't hold the lease forever.
pub async fn play(
    _lease: &VoiceLease,
    voice: &dyn VoiceGateway,
    guild_id: GuildId,
    channel_id: ChannelId,
    path: &Path,
    max_length: Duration,
) -> Result<(), VoiceError> {
    let joined = match voice.join(guild_id, channel_id).await {
        Ok(()) => Ok(()),
        // A connection may already be up from a racing join or a stale handle.  Use it.
        Err(e) if voice.has_connection(guild_id) => {
            tracing::warn!("{}; using the existing connection", e);
            Ok(())
        }
        Err(e) => Err(e),
    };

    let result = match joined {
        Ok(()) => tokio::time::timeout(max_length, voice.play_to_end(guild_id, path))
            .await
            .unwrap_or_else(|_| {
                tracing::warn!(
                    "`{}` did not finish within {:?}, cutting it off",
                    path.to_string_lossy(),
                    max_length
                );
                Err(VoiceError::TimedOut(max_length))
            }),
        Err(e) => Err(e),
    };

    if let Err(e) = voice.leave(guild_id).await {
        tracing::warn!("Could not disconnect from voice in {}: {}", guild_id, e);
    }

    result
}

/// Drop the guild's voice connection, unless a clip is playing over it
pub async fn reset_connection(
    lease: Option<VoiceLease>,
    voice: &dyn VoiceGateway,
    guild_id: GuildId,
) -> bool {
    let Some(_lease) = lease else {
        return false;
    };
    if !voice.has_connection(guild_id) {
        return false;
    }

    log_internal!("Resetting voice connection in {}", guild_id);
    if let Err(e) = voice.leave(guild_id).await {
        tracing::warn!("Could not reset voice connection in {}: {}", guild_id, e);
    }
    true
}

/// [`VoiceGateway`] backed by Songbird
pub struct SongbirdVoice {
    manager: Arc<Songbird>,
}

impl SongbirdVoice {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self { manager }
    }
}

/// Outcome of a track that has stopped.  `None` when its final state is unknown.
fn stopped_track_result(mode: Option<&PlayMode>, path: &Path) -> Result<(), VoiceError> {
    match mode {
        Some(PlayMode::Errored(e)) => Err(VoiceError::Playback(
            format!("`{}` failed to play: {:?}", path.to_string_lossy(), e).into(),
        )),
        Some(_) => Ok(()),
        None => Err(VoiceError::Playback(
            format!("`{}` stopped before playback could be followed", path.to_string_lossy())
                .into(),
        )),
    }
}

/// Signals when a track stops, either by finishing or by erroring
#[derive(Clone)]
struct TrackEndNotifier(Arc<Mutex<Option<oneshot::Sender<bool>>>>);

#[serenity::async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        let finished = !matches!(ctx, EventContext::Track(tracks) if tracks
            .iter()
            .any(|(state, _)| matches!(state.playing, PlayMode::Errored(_))));
        if let Some(tx) = self.0.lock().await.take() {
            let _ = tx.send(finished);
        }
        Some(VoiceEvent::Cancel)
    }
}

#[serenity::async_trait]
impl VoiceGateway for SongbirdVoice {
    async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<(), VoiceError> {
        self.manager
            .join(guild_id, channel_id)
            .await
            .map(|_| ())
            .map_err(|e| VoiceError::Join(e.to_string().into()))
    }

    fn has_connection(&self, guild_id: GuildId) -> bool {
        self.manager.get(guild_id).is_some()
    }

    async fn play_to_end(&self, guild_id: GuildId, path: &Path) -> Result<(), VoiceError> {
        let call = self
            .manager
            .get(guild_id)
            .ok_or(VoiceError::NoConnection)?;

        let input = songbird::input::File::new(PathBuf::from(path));
        let track = call.lock().await.play_input(input.into());

        let (tx, rx) = oneshot::channel();
        let notifier = TrackEndNotifier(Arc::new(Mutex::new(Some(tx))));
        for event in [TrackEvent::End, TrackEvent::Error] {
            if track
                .add_event(VoiceEvent::Track(event), notifier.clone())
                .is_err()
            {
                // Already stopped before we could listen for it, e.g. the file failed to decode
                let state = track.get_info().await.ok();
                return stopped_track_result(state.as_ref().map(|s| &s.playing), path);
            }
        }

        match rx.await {
            Ok(true) => Ok(()),
            Ok(false) => Err(VoiceError::Playback(
                format!("`{}` failed to play", path.to_string_lossy()).into(),
            )),
            Err(e) => Err(VoiceError::Playback(e.into())),
        }
    }

    async fn leave(&self, guild_id: GuildId) -> Result<(), VoiceError> {
        self.manager
            .remove(guild_id)
            .await
            .map_err(|e| VoiceError::Leave(e.to_string().into()))
    }
}
