//! Narrow view of the Discord API used by the vote and approval code.
//!
//! Everything the bot needs from Discord outside of voice goes through [`ChatPlatform`], which
//! keeps the vote lifecycle independent of Serenity's HTTP client.

use anyhow::{anyhow, Result};
use serenity::all::{
    ChannelId, CreateAttachment, CreateMessage, GetMessages, Message, MessageId, ReactionType,
    Timestamp, UserId,
};

pub const UPVOTE: &str = "\u{1F44D}"; // unicode thumbs up
pub const DOWNVOTE: &str = "\u{1F44E}"; // unicode thumbs down

/// The parts of a Discord message the vote lifecycle looks at
#[derive(Clone, Debug)]
pub struct Submission {
    pub id: MessageId,
    pub channel_id: ChannelId,
    /// Posted by a webhook rather than a member
    pub from_webhook: bool,
    pub has_reactions: bool,
    /// First mentioned user; the member the clip is for
    pub mentioned: Option<UserId>,
    pub attachment_url: Option<String>,
    pub timestamp: Timestamp,
}

impl From<&Message> for Submission {
    fn from(msg: &Message) -> Self {
        Self {
            id: msg.id,
            channel_id: msg.channel_id,
            from_webhook: msg.webhook_id.is_some(),
            has_reactions: !msg.reactions.is_empty(),
            mentioned: msg.mentions.first().map(|user| user.id),
            attachment_url: msg.attachments.first().map(|a| a.url.clone()),
            timestamp: msg.timestamp,
        }
    }
}

/// File attached to an outgoing message
#[derive(Clone, Debug, PartialEq)]
pub struct OutgoingFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

#[serenity::async_trait]
pub trait ChatPlatform: Sync + Send {
    /// Most recent messages in a channel, newest first
    async fn recent_messages(&self, channel_id: ChannelId, limit: u8) -> Result<Vec<Submission>>;
    /// The message posted right before `message_id`, if any
    async fn message_before(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> Result<Option<Submission>>;
    async fn message(&self, channel_id: ChannelId, message_id: MessageId) -> Result<Submission>;
    /// Number of users who reacted with `emoji`, sampling at most `limit` of them
    async fn reaction_count(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: &str,
        limit: u8,
    ) -> Result<usize>;
    async fn add_reaction(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: &str,
    ) -> Result<()>;
    async fn remove_all_reactions(&self, channel_id: ChannelId, message_id: MessageId)
        -> Result<()>;
    async fn delete_message(&self, channel_id: ChannelId, message_id: MessageId) -> Result<()>;
    async fn send_message(
        &self,
        channel_id: ChannelId,
        content: String,
        file: Option<OutgoingFile>,
    ) -> Result<()>;
    /// Fetch the bytes behind an attachment URL
    async fn download(&self, url: &str) -> Result<Vec<u8>>;
}

/// [`ChatPlatform`] backed by the Serenity context of the current event
pub struct SerenityPlatform {
    discord: serenity::all::Context,
    http_client: reqwest::Client,
}

impl SerenityPlatform {
    pub fn new(discord: serenity::all::Context, http_client: reqwest::Client) -> Self {
        Self {
            discord,
            http_client,
        }
    }
}

fn unicode(emoji: &str) -> ReactionType {
    ReactionType::Unicode(emoji.to_owned())
}

#[serenity::async_trait]
impl ChatPlatform for SerenityPlatform {
    async fn recent_messages(&self, channel_id: ChannelId, limit: u8) -> Result<Vec<Submission>> {
        let messages = channel_id
            .messages(&self.discord, GetMessages::new().limit(limit))
            .await?;
        Ok(messages.iter().map(Submission::from).collect())
    }

    async fn message_before(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> Result<Option<Submission>> {
        let messages = channel_id
            .messages(&self.discord, GetMessages::new().before(message_id).limit(1))
            .await?;
        Ok(messages.first().map(Submission::from))
    }

    async fn message(&self, channel_id: ChannelId, message_id: MessageId) -> Result<Submission> {
        let msg = channel_id.message(&self.discord, message_id).await?;
        Ok(Submission::from(&msg))
    }

    async fn reaction_count(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: &str,
        limit: u8,
    ) -> Result<usize> {
        let users = channel_id
            .reaction_users(
                &self.discord,
                message_id,
                unicode(emoji),
                Some(limit),
                None::<UserId>,
            )
            .await?;
        Ok(users.len())
    }

    async fn add_reaction(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: &str,
    ) -> Result<()> {
        channel_id
            .create_reaction(&self.discord, message_id, unicode(emoji))
            .await
            .map_err(Into::into)
    }

    async fn remove_all_reactions(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> Result<()> {
        channel_id
            .delete_reactions(&self.discord, message_id)
            .await
            .map_err(Into::into)
    }

    async fn delete_message(&self, channel_id: ChannelId, message_id: MessageId) -> Result<()> {
        channel_id
            .delete_message(&self.discord, message_id)
            .await
            .map_err(Into::into)
    }

    async fn send_message(
        &self,
        channel_id: ChannelId,
        content: String,
        file: Option<OutgoingFile>,
    ) -> Result<()> {
        let mut message = CreateMessage::new().content(content);
        if let Some(file) = file {
            message = message.add_file(CreateAttachment::bytes(file.bytes, file.name));
        }
        channel_id.send_message(&self.discord, message).await?;
        Ok(())
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| anyhow!("Could not download attachment `{}`: {}", url, e))?;
        Ok(response.bytes().await?.to_vec())
    }
}
