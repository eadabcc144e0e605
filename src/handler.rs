use crate::{
    arbiter::JoinArbiter,
    clip::{BackupStore, ClipStore, HttpBackupStore},
    config::Config,
    context::Context,
    event::Event,
    ledger::VoteLedger,
    platform::SerenityPlatform,
};
use serenity::all::{Message, Reaction, Ready, VoiceState};

/// Discord event handler
pub struct Handler {
    cfg: Config,
    ledger: VoteLedger,
    arbiter: JoinArbiter,
    clips: ClipStore,
    backup: Option<HttpBackupStore>,
    http_client: reqwest::Client,
}

impl<'a> Handler {
    pub fn new(cfg: Config) -> Self {
        let http_client = reqwest::Client::new();
        let ledger = VoteLedger::new(cfg.vote.request_channel(), cfg.vote.votes_required);
        let arbiter = JoinArbiter::new(cfg.intro.join_timeout(), cfg.intro.max_clip_length());
        let clips = ClipStore::new(cfg.intro.sounds_dir.clone());
        let backup = cfg
            .backup
            .as_ref()
            .map(|backup| HttpBackupStore::new(http_client.clone(), backup));

        Self {
            cfg,
            ledger,
            arbiter,
            clips,
            backup,
            http_client,
        }
    }

    pub fn clips(&self) -> &ClipStore {
        &self.clips
    }

    fn ctx(&'a self, discord_ctx: &'a serenity::all::Context) -> Context<'a> {
        Context {
            cfg: &self.cfg,
            ledger: &self.ledger,
            arbiter: &self.arbiter,
            clips: &self.clips,
            backup: self.backup.as_ref().map(|b| b as &dyn BackupStore),
            platform: SerenityPlatform::new(discord_ctx.clone(), self.http_client.clone()),
            cache: &discord_ctx.cache,
            http: &discord_ctx.http,
            cache_http: discord_ctx,
        }
    }
}

#[serenity::async_trait]
impl serenity::all::EventHandler for Handler {
    async fn ready(&self, discord_ctx: serenity::all::Context, ready: Ready) {
        Event::Ready(ready).handle(self.ctx(&discord_ctx)).await;
    }

    async fn message(&self, discord_ctx: serenity::all::Context, msg: Message) {
        Event::Message(msg).handle(self.ctx(&discord_ctx)).await;
    }

    async fn voice_state_update(
        &self,
        discord_ctx: serenity::all::Context,
        old: Option<VoiceState>,
        new: VoiceState,
    ) {
        Event::VoiceStateUpdate { old, new }
            .handle(self.ctx(&discord_ctx))
            .await;
    }

    async fn reaction_add(&self, discord_ctx: serenity::all::Context, reaction: Reaction) {
        Event::ReactionAdd(reaction)
            .handle(self.ctx(&discord_ctx))
            .await;
    }
}
