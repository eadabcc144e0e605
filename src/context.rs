use crate::{
    approval::ApprovalPipeline, arbiter::JoinArbiter, clip::BackupStore, clip::ClipStore,
    config::Config, ledger::VoteLedger, platform::SerenityPlatform,
};
use serenity::all::UserId;
use std::sync::Arc;

/// Collection of data that is shared across events
pub struct Context<'a> {
    // Jinglebot's own context types
    pub cfg: &'a Config,
    pub ledger: &'a VoteLedger,
    pub arbiter: &'a JoinArbiter,
    pub clips: &'a ClipStore,
    pub backup: Option<&'a dyn BackupStore>,
    pub platform: SerenityPlatform,
    // Discord/Serenity context types
    pub cache: &'a Arc<serenity::all::Cache>,
    pub http: &'a Arc<serenity::all::Http>,
    pub cache_http: &'a CacheHttp,
}

impl Context<'_> {
    pub fn pipeline(&self) -> ApprovalPipeline<'_> {
        ApprovalPipeline {
            platform: &self.platform,
            clips: self.clips,
            backup: self.backup,
        }
    }

    /// The bot's own account
    pub fn bot_id(&self) -> UserId {
        self.cache.current_user().id
    }
}

/// Many Serenity functions take a `impl CacheHttp` in order to first check the cache if the item
/// is available and fall back to an http request otherwise.  The most readily available type that
/// impl's this is named very differently in a way that could be confusing, and so we alias it.
pub type CacheHttp = serenity::all::Context;
