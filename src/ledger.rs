//! Open votes on submitted intro clips.
//!
//! A submission is a webhook-posted message in the request channel that mentions the member the
//! clip is for.  The bot seeds it with a thumbs up and a thumbs down, then recounts the reactions
//! every time someone reacts.  Once either side reaches the threshold the proposal is resolved,
//! handed to the [`ApprovalPipeline`], and its message deleted.

use crate::{
    approval::ApprovalPipeline,
    log_internal,
    platform::{ChatPlatform, Submission, DOWNVOTE, UPVOTE},
};
use anyhow::{anyhow, Result};
use serenity::all::{ChannelId, MessageId, Timestamp, UserId};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Most reactors sampled per side when counting votes
const REACTION_SAMPLE_LIMIT: u8 = 100;

#[derive(Clone, Debug, PartialEq)]
pub struct Proposal {
    pub message_id: MessageId,
    pub channel_id: ChannelId,
    /// Member whose intro clip this would become
    pub member: UserId,
    pub created_at: Timestamp,
}

impl Proposal {
    fn from_submission(submission: &Submission) -> Option<Self> {
        Some(Self {
            message_id: submission.id,
            channel_id: submission.channel_id,
            member: submission.mentioned?,
            created_at: submission.timestamp,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Approved,
    Rejected,
}

/// Decide a vote.  Approval is checked first, so meeting both thresholds at once approves.
pub fn resolve(up: usize, down: usize, votes_required: usize) -> Option<Outcome> {
    if up >= votes_required {
        Some(Outcome::Approved)
    } else if down >= votes_required {
        Some(Outcome::Rejected)
    } else {
        None
    }
}

pub struct VoteLedger {
    request_channel: ChannelId,
    votes_required: usize,
    open: Mutex<HashMap<MessageId, Proposal>>,
}

impl VoteLedger {
    pub fn new(request_channel: ChannelId, votes_required: usize) -> Self {
        Self {
            request_channel,
            votes_required,
            open: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a freshly posted message should be put up for a vote
    pub fn is_submission(&self, submission: &Submission) -> bool {
        submission.channel_id == self.request_channel
            && submission.from_webhook
            && submission.has_reactions
            && submission.mentioned.is_some()
    }

    /// Track a proposal, keeping at most one per member and channel.  Returns the message that
    /// lost out: the member's older proposal, or this one if a newer one is already open.
    async fn register(&self, proposal: Proposal) -> Option<MessageId> {
        let mut open = self.open.lock().await;
        let other = open
            .values()
            .find(|p| {
                p.message_id != proposal.message_id
                    && p.channel_id == proposal.channel_id
                    && p.member == proposal.member
            })
            .map(|p| p.message_id);

        // Message ids are snowflakes, so they order by posting time.
        match other {
            Some(newer) if newer.get() > proposal.message_id.get() => Some(proposal.message_id),
            older => {
                if let Some(older) = older {
                    open.remove(&older);
                }
                open.insert(proposal.message_id, proposal);
                older
            }
        }
    }

    /// Remove a proposal so that only the caller resolves it
    async fn claim(&self, message_id: MessageId, channel_id: ChannelId) -> Option<Proposal> {
        let mut open = self.open.lock().await;
        match open.get(&message_id) {
            Some(p) if p.channel_id == channel_id => open.remove(&message_id),
            _ => None,
        }
    }

    pub async fn is_open(&self, message_id: MessageId, channel_id: ChannelId) -> bool {
        self.open
            .lock()
            .await
            .get(&message_id)
            .is_some_and(|p| p.channel_id == channel_id)
    }

    pub async fn open_count(&self) -> usize {
        self.open.lock().await.len()
    }

    /// Put a newly posted submission up for a vote
    pub async fn open_proposal(
        &self,
        platform: &dyn ChatPlatform,
        submission: &Submission,
    ) -> Result<()> {
        // The message right before this one, if the member is re-submitting
        let preceding = match platform
            .message_before(submission.channel_id, submission.id)
            .await
        {
            Ok(preceding) => preceding,
            Err(e) => {
                tracing::warn!("Could not check for superseded submissions: {}", e);
                None
            }
        };
        self.open_after(platform, submission, preceding.as_ref())
            .await
    }

    async fn open_after(
        &self,
        platform: &dyn ChatPlatform,
        submission: &Submission,
        preceding: Option<&Submission>,
    ) -> Result<()> {
        let proposal = Proposal::from_submission(submission)
            .ok_or(anyhow!("Submission {} mentions nobody", submission.id))?;

        let mut stale = Vec::new();
        if let Some(prev) = preceding {
            if prev.from_webhook && prev.mentioned == Some(proposal.member) {
                self.claim(prev.id, prev.channel_id).await;
                stale.push(prev.id);
            }
        }
        match self.register(proposal.clone()).await {
            Some(lost) if lost == proposal.message_id => {
                log_internal!(
                    "Submission {} for {} is already superseded",
                    proposal.message_id,
                    proposal.member
                );
                if let Err(e) = platform
                    .delete_message(proposal.channel_id, proposal.message_id)
                    .await
                {
                    tracing::warn!(
                        "Could not delete superseded submission {}: {}",
                        proposal.message_id,
                        e
                    );
                }
                return Ok(());
            }
            Some(lost) if !stale.contains(&lost) => stale.push(lost),
            _ => {}
        }

        for message_id in stale {
            log_internal!(
                "Submission {} for {} supersedes {}",
                proposal.message_id,
                proposal.member,
                message_id
            );
            if let Err(e) = platform
                .delete_message(proposal.channel_id, message_id)
                .await
            {
                tracing::warn!("Could not delete superseded submission {}: {}", message_id, e);
            }
        }

        log_internal!(
            "Opened vote {} for {}",
            proposal.message_id,
            proposal.member
        );

        // Voting still works if seeding fails; members can add the reactions themselves.
        for emoji in [UPVOTE, DOWNVOTE] {
            if let Err(e) = platform
                .add_reaction(proposal.channel_id, proposal.message_id, emoji)
                .await
            {
                tracing::warn!(
                    "Could not seed {} on {}: {}",
                    emoji,
                    proposal.message_id,
                    e
                );
            }
        }

        Ok(())
    }

    /// Handle a reaction by `reactor`.  Returns the outcome if this reaction resolved the vote.
    ///
    /// The bot's own seed reactions still count as votes, but never trigger a recount.
    pub async fn on_reaction(
        &self,
        pipeline: &ApprovalPipeline<'_>,
        bot_id: UserId,
        reactor: Option<UserId>,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> Result<Option<Outcome>> {
        if reactor == Some(bot_id) {
            return Ok(None);
        }
        self.on_reaction_added(pipeline, channel_id, message_id)
            .await
    }

    /// Recount votes after a reaction
    async fn on_reaction_added(
        &self,
        pipeline: &ApprovalPipeline<'_>,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> Result<Option<Outcome>> {
        if !self.is_open(message_id, channel_id).await {
            return Ok(None);
        }

        let platform = pipeline.platform;
        let up = platform
            .reaction_count(channel_id, message_id, UPVOTE, REACTION_SAMPLE_LIMIT)
            .await?;
        let down = platform
            .reaction_count(channel_id, message_id, DOWNVOTE, REACTION_SAMPLE_LIMIT)
            .await?;

        let Some(outcome) = resolve(up, down, self.votes_required) else {
            return Ok(None);
        };

        // Another reaction may have resolved it while we were counting.
        let Some(proposal) = self.claim(message_id, channel_id).await else {
            return Ok(None);
        };

        log_internal!(
            "Vote {} for {}, open since {}, resolved {:?} ({} up, {} down)",
            message_id,
            proposal.member,
            proposal.created_at,
            outcome,
            up,
            down
        );

        if let Err(e) = platform.remove_all_reactions(channel_id, message_id).await {
            tracing::warn!("Could not clear reactions on {}: {}", message_id, e);
        }
        if let Err(e) = pipeline.conclude(&proposal, outcome).await {
            tracing::error!("Could not announce outcome of {}: {}", message_id, e);
        }
        platform.delete_message(channel_id, message_id).await?;

        Ok(Some(outcome))
    }

    /// Pick up votes that were in flight while the bot was offline.  Submissions that already
    /// have reactions are adopted as-is; the rest are opened as if just posted.
    pub async fn reconcile(&self, platform: &dyn ChatPlatform, limit: u8) -> Result<()> {
        let recent = platform.recent_messages(self.request_channel, limit).await?;

        // Oldest first, so a member's newest submission supersedes their older ones.
        let chronological: Vec<&Submission> = recent.iter().rev().collect();
        for (i, submission) in chronological.iter().enumerate() {
            if !submission.from_webhook {
                continue;
            }
            if submission.has_reactions {
                let Some(proposal) = Proposal::from_submission(submission) else {
                    continue;
                };
                if let Some(lost) = self.register(proposal).await {
                    if let Err(e) = platform.delete_message(self.request_channel, lost).await {
                        tracing::warn!("Could not delete superseded submission {}: {}", lost, e);
                    }
                }
            } else {
                let preceding = i.checked_sub(1).map(|j| chronological[j]);
                if let Err(e) = self.open_after(platform, submission, preceding).await {
                    tracing::warn!("Could not open vote on {}: {}", submission.id, e);
                }
            }
        }

        log_internal!(
            "Tracking {} open vote(s) in {}",
            self.open_count().await,
            self.request_channel
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::ClipStore;
    use crate::platform::fake::{submission, Call, FakePlatform};
    use tempfile::TempDir;

    const CHANNEL: u64 = 10;

    fn ledger() -> VoteLedger {
        VoteLedger::new(ChannelId::new(CHANNEL), 3)
    }

    fn pipeline<'a>(platform: &'a FakePlatform, clips: &'a ClipStore) -> ApprovalPipeline<'a> {
        ApprovalPipeline {
            platform,
            clips,
            backup: None,
        }
    }

    /// Post a submission with a downloadable attachment and open a vote on it
    async fn open(ledger: &VoteLedger, platform: &FakePlatform, id: u64, member: u64) {
        let msg = submission(id, CHANNEL, member);
        platform.downloads.lock().unwrap().insert(
            msg.attachment_url.clone().unwrap(),
            format!("clip-{}", id).into_bytes(),
        );
        platform.post(msg.clone());
        ledger.open_proposal(platform, &msg).await.unwrap();
    }

    #[test]
    fn test_resolve_threshold() {
        assert_eq!(resolve(2, 2, 3), None);
        assert_eq!(resolve(3, 0, 3), Some(Outcome::Approved));
        assert_eq!(resolve(4, 1, 3), Some(Outcome::Approved));
        assert_eq!(resolve(1, 3, 3), Some(Outcome::Rejected));
        // Both sides at threshold approves
        assert_eq!(resolve(3, 3, 3), Some(Outcome::Approved));
        assert_eq!(resolve(1, 1, 1), Some(Outcome::Approved));
    }

    #[test]
    fn test_is_submission() {
        let ledger = ledger();
        let mut msg = submission(1, CHANNEL, 42);
        msg.has_reactions = true;
        assert!(ledger.is_submission(&msg));

        let mut other_channel = msg.clone();
        other_channel.channel_id = ChannelId::new(11);
        assert!(!ledger.is_submission(&other_channel));

        let mut not_webhook = msg.clone();
        not_webhook.from_webhook = false;
        assert!(!ledger.is_submission(&not_webhook));

        let mut no_mention = msg.clone();
        no_mention.mentioned = None;
        assert!(!ledger.is_submission(&no_mention));

        let mut no_reactions = msg;
        no_reactions.has_reactions = false;
        assert!(!ledger.is_submission(&no_reactions));
    }

    #[tokio::test]
    async fn test_open_seeds_both_reactions() {
        let ledger = ledger();
        let platform = FakePlatform::default();
        open(&ledger, &platform, 1, 42).await;

        assert!(ledger.is_open(MessageId::new(1), ChannelId::new(CHANNEL)).await);
        assert_eq!(
            platform.calls(),
            vec![
                Call::AddReaction(MessageId::new(1), UPVOTE.to_owned()),
                Call::AddReaction(MessageId::new(1), DOWNVOTE.to_owned()),
            ]
        );
    }

    #[tokio::test]
    async fn test_resubmission_supersedes_previous() {
        let ledger = ledger();
        let platform = FakePlatform::default();
        open(&ledger, &platform, 1, 42).await;
        open(&ledger, &platform, 2, 42).await;

        assert_eq!(platform.deleted(), vec![MessageId::new(1)]);
        assert!(!ledger.is_open(MessageId::new(1), ChannelId::new(CHANNEL)).await);
        assert!(ledger.is_open(MessageId::new(2), ChannelId::new(CHANNEL)).await);
        assert_eq!(ledger.open_count().await, 1);
    }

    #[tokio::test]
    async fn test_older_submission_handled_late_keeps_newer() {
        let ledger = ledger();
        let platform = FakePlatform::default();
        let first = submission(1, CHANNEL, 42);
        let second = submission(2, CHANNEL, 42);
        platform.post(first.clone());
        platform.post(second.clone());

        // The first message's event is handled after the second was already posted
        ledger.open_proposal(&platform, &first).await.unwrap();
        assert!(platform.deleted().is_empty());

        ledger.open_proposal(&platform, &second).await.unwrap();
        assert_eq!(platform.deleted(), vec![MessageId::new(1)]);
        assert!(ledger.is_open(MessageId::new(2), ChannelId::new(CHANNEL)).await);
        assert_eq!(ledger.open_count().await, 1);
    }

    #[tokio::test]
    async fn test_older_submission_handled_last_is_dropped() {
        let ledger = ledger();
        let platform = FakePlatform::default();
        let first = submission(1, CHANNEL, 42);
        let second = submission(2, CHANNEL, 42);
        platform.post(first.clone());
        platform.post(second.clone());

        ledger.open_proposal(&platform, &second).await.unwrap();
        ledger.open_proposal(&platform, &first).await.unwrap();

        assert!(!platform.deleted().contains(&MessageId::new(2)));
        assert!(ledger.is_open(MessageId::new(2), ChannelId::new(CHANNEL)).await);
        assert!(!ledger.is_open(MessageId::new(1), ChannelId::new(CHANNEL)).await);
        assert_eq!(ledger.open_count().await, 1);
    }

    #[tokio::test]
    async fn test_other_members_are_not_superseded() {
        let ledger = ledger();
        let platform = FakePlatform::default();
        open(&ledger, &platform, 1, 42).await;
        open(&ledger, &platform, 2, 43).await;

        assert!(platform.deleted().is_empty());
        assert_eq!(ledger.open_count().await, 2);
    }

    #[tokio::test]
    async fn test_approval_scenario() {
        let temp = TempDir::new().unwrap();
        let clips = ClipStore::new(temp.path());
        let ledger = ledger();
        let platform = FakePlatform::default();
        open(&ledger, &platform, 1, 42).await;

        let pipeline = pipeline(&platform, &clips);
        let (channel, message) = (ChannelId::new(CHANNEL), MessageId::new(1));

        platform.set_votes(message, 2, 1);
        let outcome = ledger
            .on_reaction_added(&pipeline, channel, message)
            .await
            .unwrap();
        assert_eq!(outcome, None);

        platform.set_votes(message, 3, 1);
        let outcome = ledger
            .on_reaction_added(&pipeline, channel, message)
            .await
            .unwrap();
        assert_eq!(outcome, Some(Outcome::Approved));

        assert_eq!(
            clips.read(UserId::new(42)).await.unwrap().unwrap(),
            b"clip-1"
        );
        let calls = platform.calls();
        assert!(calls.contains(&Call::RemoveAllReactions(message)));
        let sent = platform.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "<@42>, your new sound has been approved!");
        assert_eq!(sent[0].2.as_ref().unwrap().bytes, b"clip-1");
        assert_eq!(platform.deleted(), vec![message]);
        assert_eq!(ledger.open_count().await, 0);
    }

    #[tokio::test]
    async fn test_rejection_scenario() {
        let temp = TempDir::new().unwrap();
        let clips = ClipStore::new(temp.path());
        let ledger = ledger();
        let platform = FakePlatform::default();
        open(&ledger, &platform, 1, 42).await;

        let pipeline = pipeline(&platform, &clips);
        let (channel, message) = (ChannelId::new(CHANNEL), MessageId::new(1));
        platform.set_votes(message, 1, 3);

        let outcome = ledger
            .on_reaction_added(&pipeline, channel, message)
            .await
            .unwrap();
        assert_eq!(outcome, Some(Outcome::Rejected));
        assert!(!clips.exists(UserId::new(42)).await);

        let sent = platform.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "<@42>, your new sound was not approved...");
        assert_eq!(sent[0].2, None);
        assert_eq!(platform.deleted(), vec![message]);
    }

    #[tokio::test]
    async fn test_resolution_happens_once() {
        let temp = TempDir::new().unwrap();
        let clips = ClipStore::new(temp.path());
        let ledger = ledger();
        let platform = FakePlatform::default();
        open(&ledger, &platform, 1, 42).await;

        let pipeline = pipeline(&platform, &clips);
        let (channel, message) = (ChannelId::new(CHANNEL), MessageId::new(1));
        platform.set_votes(message, 3, 0);

        let (first, second) = tokio::join!(
            ledger.on_reaction_added(&pipeline, channel, message),
            ledger.on_reaction_added(&pipeline, channel, message),
        );
        let outcomes = [first.unwrap(), second.unwrap()];
        assert_eq!(outcomes.iter().filter(|o| o.is_some()).count(), 1);

        // Late reactions on the resolved proposal are ignored
        let third = ledger
            .on_reaction_added(&pipeline, channel, message)
            .await
            .unwrap();
        assert_eq!(third, None);
        assert_eq!(platform.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_own_reactions_do_not_trigger_recount() {
        let temp = TempDir::new().unwrap();
        let clips = ClipStore::new(temp.path());
        let ledger = ledger();
        let platform = FakePlatform::default();
        open(&ledger, &platform, 1, 42).await;

        let pipeline = pipeline(&platform, &clips);
        let (channel, message) = (ChannelId::new(CHANNEL), MessageId::new(1));
        let bot = UserId::new(7);
        platform.set_votes(message, 3, 0);

        let outcome = ledger
            .on_reaction(&pipeline, bot, Some(bot), channel, message)
            .await
            .unwrap();
        assert_eq!(outcome, None);
        assert!(ledger.is_open(message, channel).await);
        assert!(platform.sent().is_empty());

        let outcome = ledger
            .on_reaction(&pipeline, bot, Some(UserId::new(42)), channel, message)
            .await
            .unwrap();
        assert_eq!(outcome, Some(Outcome::Approved));
    }

    #[tokio::test]
    async fn test_reactions_on_unknown_messages_are_ignored() {
        let temp = TempDir::new().unwrap();
        let clips = ClipStore::new(temp.path());
        let ledger = ledger();
        let platform = FakePlatform::default();
        let pipeline = pipeline(&platform, &clips);

        platform.set_votes(MessageId::new(5), 10, 0);
        let outcome = ledger
            .on_reaction_added(&pipeline, ChannelId::new(CHANNEL), MessageId::new(5))
            .await
            .unwrap();
        assert_eq!(outcome, None);
        assert!(platform.calls().is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_adopts_and_opens() {
        let ledger = ledger();
        let platform = FakePlatform::default();

        let mut voting = submission(1, CHANNEL, 42);
        voting.has_reactions = true;
        platform.post(voting);
        let mut chatter = submission(2, CHANNEL, 43);
        chatter.from_webhook = false;
        platform.post(chatter);
        platform.post(submission(3, CHANNEL, 44));

        ledger.reconcile(&platform, 20).await.unwrap();

        assert!(ledger.is_open(MessageId::new(1), ChannelId::new(CHANNEL)).await);
        assert!(!ledger.is_open(MessageId::new(2), ChannelId::new(CHANNEL)).await);
        assert!(ledger.is_open(MessageId::new(3), ChannelId::new(CHANNEL)).await);

        // Only the fresh submission gets seeded
        assert_eq!(
            platform.calls(),
            vec![
                Call::AddReaction(MessageId::new(3), UPVOTE.to_owned()),
                Call::AddReaction(MessageId::new(3), DOWNVOTE.to_owned()),
            ]
        );
    }

    #[tokio::test]
    async fn test_reconcile_keeps_newest_submission_per_member() {
        let ledger = ledger();
        let platform = FakePlatform::default();

        let mut older = submission(1, CHANNEL, 42);
        older.has_reactions = true;
        platform.post(older);
        platform.post(submission(2, CHANNEL, 42));

        ledger.reconcile(&platform, 20).await.unwrap();

        assert_eq!(platform.deleted(), vec![MessageId::new(1)]);
        assert_eq!(ledger.open_count().await, 1);
        assert!(ledger.is_open(MessageId::new(2), ChannelId::new(CHANNEL)).await);
    }
}
