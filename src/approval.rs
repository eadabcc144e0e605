use crate::{
    clip::{clip_key, BackupStore, ClipStore},
    ledger::{Outcome, Proposal},
    log_internal,
    platform::{ChatPlatform, OutgoingFile},
};
use anyhow::{anyhow, Result};
use serenity::all::{ChannelId, Mentionable, UserId};

/// Stores approved clips and tells the submitter how their vote went
pub struct ApprovalPipeline<'a> {
    pub platform: &'a dyn ChatPlatform,
    pub clips: &'a ClipStore,
    pub backup: Option<&'a dyn BackupStore>,
}

impl ApprovalPipeline<'_> {
    /// Act on a resolved proposal.  Storage failures are logged rather than returned so the
    /// announcement still goes out; it then carries the previous clip, or none.
    pub async fn conclude(&self, proposal: &Proposal, outcome: Outcome) -> Result<()> {
        if outcome == Outcome::Approved {
            if let Err(e) = self.approve(proposal).await {
                tracing::error!(
                    "Could not store clip for {} from message {}: {}",
                    proposal.member,
                    proposal.message_id,
                    e
                );
            }
        }

        self.announce(outcome, proposal.member, proposal.channel_id)
            .await
    }

    /// Download the submission's first attachment and make it the member's clip
    pub async fn approve(&self, proposal: &Proposal) -> Result<()> {
        let msg = self
            .platform
            .message(proposal.channel_id, proposal.message_id)
            .await?;
        let url = msg
            .attachment_url
            .ok_or(anyhow!("Message {} has no attachment", proposal.message_id))?;
        let bytes = self.platform.download(&url).await?;

        let path = self.clips.write(proposal.member, &bytes).await?;
        log_internal!(
            "Stored clip for {} at `{}`",
            proposal.member,
            path.to_string_lossy()
        );

        let key = clip_key(proposal.member);
        match self.backup {
            Some(backup) => {
                if let Err(e) = backup.put(&key, bytes).await {
                    // The local clip is already live; it just has no remote copy.
                    tracing::warn!("Clip `{}` stored locally but not backed up: {}", key, e);
                }
            }
            None => tracing::warn!("No backup store configured, `{}` is local only", key),
        }

        Ok(())
    }

    pub async fn announce(
        &self,
        outcome: Outcome,
        member: UserId,
        channel_id: ChannelId,
    ) -> Result<()> {
        let (content, file) = match outcome {
            Outcome::Approved => {
                let content = format!("{}, your new sound has been approved!", member.mention());
                let file = match self.clips.read(member).await {
                    Ok(Some(bytes)) => Some(OutgoingFile {
                        name: clip_key(member),
                        bytes,
                    }),
                    Ok(None) => None,
                    Err(e) => {
                        tracing::warn!("Announcing without attachment: {}", e);
                        None
                    }
                };
                (content, file)
            }
            Outcome::Rejected => (
                format!("{}, your new sound was not approved...", member.mention()),
                None,
            ),
        };

        self.platform.send_message(channel_id, content, file).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::fake::FakeBackup;
    use crate::platform::fake::{submission, FakePlatform};
    use serenity::all::{MessageId, Timestamp};
    use tempfile::TempDir;

    fn proposal(id: u64, member: u64) -> Proposal {
        Proposal {
            message_id: MessageId::new(id),
            channel_id: ChannelId::new(10),
            member: UserId::new(member),
            created_at: Timestamp::now(),
        }
    }

    fn platform_with_attachment(id: u64, member: u64, bytes: &[u8]) -> FakePlatform {
        let platform = FakePlatform::default();
        let msg = submission(id, 10, member);
        platform
            .downloads
            .lock()
            .unwrap()
            .insert(msg.attachment_url.clone().unwrap(), bytes.to_vec());
        platform.post(msg);
        platform
    }

    #[tokio::test]
    async fn test_approval_stores_backs_up_and_attaches() {
        let temp = TempDir::new().unwrap();
        let clips = ClipStore::new(temp.path());
        let backup = FakeBackup::default();
        let platform = platform_with_attachment(1, 42, b"honk");
        let pipeline = ApprovalPipeline {
            platform: &platform,
            clips: &clips,
            backup: Some(&backup),
        };

        pipeline
            .conclude(&proposal(1, 42), Outcome::Approved)
            .await
            .unwrap();

        assert_eq!(clips.read(UserId::new(42)).await.unwrap().unwrap(), b"honk");
        assert_eq!(backup.objects.lock().unwrap()["42.mp3"], b"honk");

        let sent = platform.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, ChannelId::new(10));
        assert_eq!(sent[0].1, "<@42>, your new sound has been approved!");
        assert_eq!(
            sent[0].2,
            Some(OutgoingFile {
                name: "42.mp3".to_owned(),
                bytes: b"honk".to_vec()
            })
        );
    }

    #[tokio::test]
    async fn test_rejection_announces_without_storing() {
        let temp = TempDir::new().unwrap();
        let clips = ClipStore::new(temp.path());
        let backup = FakeBackup::default();
        let platform = platform_with_attachment(1, 42, b"honk");
        let pipeline = ApprovalPipeline {
            platform: &platform,
            clips: &clips,
            backup: Some(&backup),
        };

        pipeline
            .conclude(&proposal(1, 42), Outcome::Rejected)
            .await
            .unwrap();

        assert!(!clips.exists(UserId::new(42)).await);
        assert!(backup.objects.lock().unwrap().is_empty());
        let sent = platform.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "<@42>, your new sound was not approved...");
        assert_eq!(sent[0].2, None);
    }

    #[tokio::test]
    async fn test_backup_failure_keeps_local_clip() {
        let temp = TempDir::new().unwrap();
        let clips = ClipStore::new(temp.path());
        let backup = FakeBackup {
            fail: true,
            ..Default::default()
        };
        let platform = platform_with_attachment(1, 42, b"honk");
        let pipeline = ApprovalPipeline {
            platform: &platform,
            clips: &clips,
            backup: Some(&backup),
        };

        pipeline.approve(&proposal(1, 42)).await.unwrap();
        assert!(clips.exists(UserId::new(42)).await);
    }

    #[tokio::test]
    async fn test_failed_download_announces_previous_clip() {
        let temp = TempDir::new().unwrap();
        let clips = ClipStore::new(temp.path());
        clips.write(UserId::new(42), b"old").await.unwrap();

        // Message exists, but its attachment cannot be fetched
        let platform = FakePlatform::default();
        platform.post(submission(1, 10, 42));
        let pipeline = ApprovalPipeline {
            platform: &platform,
            clips: &clips,
            backup: None,
        };

        pipeline
            .conclude(&proposal(1, 42), Outcome::Approved)
            .await
            .unwrap();

        let sent = platform.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].2.as_ref().unwrap().bytes, b"old");
    }
}
