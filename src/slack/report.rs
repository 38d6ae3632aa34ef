//! Batch report delivery to a Slack channel.

use futures_util::future::BoxFuture;
use slack_morphism::prelude::SlackChannelId;

use crate::models::report::BatchReport;
use crate::orchestrator::ports::ReportSink;
use crate::Result;

use super::client::{ReportPost, SlackService};

/// Posts rendered reports to one channel through the buffered queue.
pub struct SlackReportSink {
    service: SlackService,
    channel: SlackChannelId,
}

impl SlackReportSink {
    /// Wrap a started service.
    #[must_use]
    pub fn new(service: SlackService, channel_id: &str) -> Self {
        Self {
            service,
            channel: SlackChannelId(channel_id.to_owned()),
        }
    }
}

impl ReportSink for SlackReportSink {
    fn deliver<'a>(&'a self, report: &'a BatchReport) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let text = format!("*{}*\n{}", report.user_id, report.render());
            self.service
                .post(ReportPost {
                    channel: self.channel.clone(),
                    text,
                })
                .await
        })
    }
}
