//! Buffered `chat.postMessage` sender for batch reports.
//!
//! Reports are queued on a bounded channel and posted by one background
//! task, so a slow or rate-limited workspace never stalls a batch run.

use std::sync::Arc;
use std::time::Duration;

use slack_morphism::errors::SlackClientError;
use slack_morphism::prelude::{
    SlackApiChatPostMessageRequest, SlackApiToken, SlackApiTokenType, SlackApiTokenValue,
    SlackChannelId, SlackClient, SlackClientHyperHttpsConnector, SlackClientSession,
    SlackMessageContent,
};
use tokio::{sync::mpsc, task::JoinHandle, time::sleep};
use tracing::{debug, error, info, warn};

use crate::{config::SlackConfig, AppError, Result};

type Connector = SlackClientHyperHttpsConnector;

const POST_QUEUE_CAPACITY: usize = 64;
const FIRST_BACKOFF: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);
const POST_ATTEMPTS: u32 = 5;

/// One pending channel post.
#[derive(Debug, Clone)]
pub struct ReportPost {
    /// Destination channel.
    pub channel: SlackChannelId,
    /// Rendered mrkdwn body.
    pub text: String,
}

impl ReportPost {
    fn to_request(&self) -> SlackApiChatPostMessageRequest {
        SlackApiChatPostMessageRequest::new(
            self.channel.clone(),
            SlackMessageContent::new().with_text(self.text.clone()),
        )
        .with_unfurl_links(false)
    }
}

/// Delay before the next post attempt.
///
/// A rate-limit response carrying `Retry-After` wins over the local
/// exponential schedule.
#[must_use]
pub fn next_delay(error: &SlackClientError, backoff: Duration) -> Duration {
    match error {
        SlackClientError::RateLimitError(limit) => limit.retry_after.unwrap_or(backoff),
        _ => backoff,
    }
}

/// Producer side of the report post queue.
pub struct SlackService {
    posts: mpsc::Sender<ReportPost>,
}

impl SlackService {
    /// Open the Slack client and spawn the sender task.
    ///
    /// The returned handle completes once every `SlackService` clone is gone
    /// and the queue has been drained.
    ///
    /// # Errors
    ///
    /// `AppError::Slack` when the bot token was not loaded or the HTTPS
    /// connector cannot be built.
    pub fn start(config: &SlackConfig) -> Result<(Self, JoinHandle<()>)> {
        if config.bot_token.is_empty() {
            return Err(AppError::Slack("bot token not loaded".into()));
        }
        let connector = Connector::new()
            .map_err(|err| AppError::Slack(format!("slack connector: {err}")))?;
        let client = Arc::new(SlackClient::new(connector));
        let token = SlackApiToken::new(SlackApiTokenValue(config.bot_token.clone()))
            .with_token_type(SlackApiTokenType::Bot);

        let (posts, queue) = mpsc::channel(POST_QUEUE_CAPACITY);
        let task = tokio::spawn(run_sender(client, token, queue));
        info!(channel = %config.channel_id, "slack report delivery enabled");
        Ok((Self { posts }, task))
    }

    /// Queue a post for delivery.
    ///
    /// # Errors
    ///
    /// `AppError::Slack` if the sender task has already stopped.
    pub async fn post(&self, post: ReportPost) -> Result<()> {
        self.posts
            .send(post)
            .await
            .map_err(|_| AppError::Slack("report sender stopped".into()))
    }
}

async fn run_sender(
    client: Arc<SlackClient<Connector>>,
    token: SlackApiToken,
    mut queue: mpsc::Receiver<ReportPost>,
) {
    let session = client.open_session(&token);
    while let Some(post) = queue.recv().await {
        deliver(&session, &post).await;
    }
    debug!("slack sender drained");
}

async fn deliver(session: &SlackClientSession<'_, Connector>, post: &ReportPost) {
    let request = post.to_request();
    let mut backoff = FIRST_BACKOFF;
    for attempt in 1..=POST_ATTEMPTS {
        match session.chat_post_message(&request).await {
            Ok(_) => {
                debug!(channel = %post.channel.0, attempt, "report posted");
                return;
            }
            Err(err) if attempt == POST_ATTEMPTS => {
                error!(error = %err, channel = %post.channel.0, "report post failed, giving up");
            }
            Err(err) => {
                let delay = next_delay(&err, backoff);
                warn!(error = %err, attempt, ?delay, "report post failed, retrying");
                sleep(delay).await;
                backoff = (backoff * 2).min(BACKOFF_CAP);
            }
        }
    }
}
