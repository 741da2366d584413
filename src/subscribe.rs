// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::FeedError;
use crate::feed::ChannelSource;
use crate::http::HttpClient;
use crate::progress::ProgressEvent;
use crate::queue::{Job, JobId, JobQueue, QueueSummary};
use crate::range::EpisodeSelection;
use crate::sync::{SyncContext, SyncOptions};

/// How often a subscription is checked unless configured otherwise
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(600);

/// A feed to keep in sync
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub url: String,
    pub interval: Duration,
    pub include_shownotes: bool,
}

impl Subscription {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            interval: DEFAULT_POLL_INTERVAL,
            include_shownotes: false,
        }
    }
}

/// Options for [`subscribe`]
#[derive(Debug, Clone, Copy)]
pub struct SubscribeOptions {
    /// Maximum number of channel jobs running at once
    pub max_active_jobs: usize,
    /// Interval between job queue scheduling passes
    pub queue_tick: Duration,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            max_active_jobs: 5,
            queue_tick: Duration::from_millis(500),
        }
    }
}

/// Periodically turns a subscription into channel jobs
pub struct Poller<C> {
    ctx: SyncContext<C>,
    source: Arc<dyn ChannelSource>,
    jobs: mpsc::Sender<Job>,
}

impl<C: HttpClient + Clone + 'static> Poller<C> {
    pub fn new(ctx: SyncContext<C>, source: Arc<dyn ChannelSource>, jobs: mpsc::Sender<Job>) -> Self {
        Self { ctx, source, jobs }
    }

    /// Fetch the channel once and hand a job covering all its episodes to the queue
    pub async fn poll_once(&self, subscription: &Subscription) -> Result<(), FeedError> {
        let url = subscription.url.as_str();
        self.ctx.reporter.report(ProgressEvent::FetchingFeed {
            url: url.to_string(),
        });

        let channel = tokio::select! {
            biased;
            _ = self.ctx.cancel.cancelled() => {
                return Err(FeedError::Cancelled { url: url.to_string() });
            }
            channel = self.source.fetch(url) => channel?,
        };

        self.ctx.reporter.report(ProgressEvent::FeedFetched {
            channel_title: channel.title.clone(),
            total_episodes: channel.episodes.len(),
        });

        let options = SyncOptions {
            range: EpisodeSelection::All,
            include_shownotes: subscription.include_shownotes,
        };
        let job = self.ctx.channel_job(JobId::new(url), channel, options);

        if self.jobs.send(job).await.is_err() {
            debug!(url, "Job queue has shut down, dropping job");
        }
        Ok(())
    }

    /// Poll immediately, then on every interval until cancelled
    pub async fn run(self, subscription: Subscription) {
        let mut ticker = tokio::time::interval(subscription.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(url = %subscription.url, interval = ?subscription.interval, "Subscribed");

        loop {
            tokio::select! {
                biased;
                _ = self.ctx.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.poll_once(&subscription).await {
                Ok(()) => {}
                Err(FeedError::Cancelled { .. }) => break,
                Err(e) => {
                    warn!(url = %subscription.url, error = %e, "Checking subscription failed");
                    self.ctx.reporter.report(ProgressEvent::FeedFailed {
                        url: subscription.url.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        debug!(url = %subscription.url, "Poller stopped");
    }
}

/// Keep every subscription in sync until `ctx.cancel` fires
///
/// Each subscription gets its own poller; all of them feed one job queue.
/// Returns once cancellation was requested and every active job settled.
pub async fn subscribe<C: HttpClient + Clone + 'static>(
    ctx: SyncContext<C>,
    source: Arc<dyn ChannelSource>,
    subscriptions: Vec<Subscription>,
    options: SubscribeOptions,
) -> QueueSummary {
    let (tx, rx) = mpsc::channel(subscriptions.len().max(1) * 2);
    let queue = JobQueue::new(
        options.max_active_jobs,
        options.queue_tick,
        ctx.reporter.clone(),
    );

    info!(
        subscriptions = subscriptions.len(),
        max_active_jobs = options.max_active_jobs,
        "Starting subscriptions"
    );

    let mut pollers = JoinSet::new();
    for subscription in subscriptions {
        let poller = Poller::new(ctx.clone(), source.clone(), tx.clone());
        pollers.spawn(poller.run(subscription));
    }
    drop(tx);

    let summary = queue.run(rx, ctx.cancel.clone()).await;

    while let Some(joined) = pollers.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "Poller ended abnormally");
        }
    }

    info!(
        completed = summary.completed,
        failed = summary.failed,
        "Subscriptions stopped"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::episode::ShownotesRenderer;
    use crate::error::ShownotesError;
    use crate::feed::{Channel, Enclosure, Episode};
    use crate::http::{ByteStream, HttpResponse};
    use crate::ledger::{Ledger, TaskKind};
    use crate::progress::NoopReporter;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::StreamExt;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;
    use tokio_util::sync::CancellationToken;
    use url::Url;

    #[derive(Clone, Default)]
    struct MockHttpClient {
        /// Bodies never finish after their first chunk
        stall: bool,
    }

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn get_bytes(&self, _url: &str) -> Result<Bytes, reqwest::Error> {
            Ok(Bytes::new())
        }

        async fn get_stream(&self, _url: &str) -> Result<HttpResponse, reqwest::Error> {
            let first = futures::stream::once(async { Ok(Bytes::from_static(b"audio")) });
            let body: ByteStream = if self.stall {
                Box::pin(first.chain(futures::stream::pending()))
            } else {
                Box::pin(first)
            };
            Ok(HttpResponse {
                status: 200,
                content_length: Some(5),
                content_type: None,
                body,
            })
        }
    }

    struct PlainRenderer;

    #[async_trait]
    impl ShownotesRenderer for PlainRenderer {
        async fn render(&self, episode: &Episode, _channel: &Channel) -> Result<String, ShownotesError> {
            Ok(episode.title.clone())
        }
    }

    /// Serves one single-episode channel per URL, titled after the URL's last segment
    #[derive(Default)]
    struct MockSource {
        calls: AtomicUsize,
        /// Number of initial fetches that fail
        failures: usize,
        /// Fetches never complete
        hang: bool,
    }

    #[async_trait]
    impl ChannelSource for MockSource {
        async fn fetch(&self, feed_url: &str) -> Result<Channel, FeedError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                futures::future::pending::<()>().await;
            }
            if call < self.failures {
                return Err(FeedError::InvalidUrl(url::ParseError::EmptyHost));
            }

            let feed_url = Url::parse(feed_url)?;
            let title = feed_url
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .unwrap_or("untitled")
                .to_string();

            Ok(Channel {
                title,
                image_url: None,
                feed_url: feed_url.clone(),
                raw: String::new(),
                episodes: vec![Episode {
                    guid: "only".to_string(),
                    title: "Only".to_string(),
                    pub_date: chrono::DateTime::parse_from_rfc3339("2021-01-01T00:00:00+00:00").ok(),
                    enclosure: Enclosure {
                        url: feed_url.join("only.mp3")?,
                        length: Some(5),
                        mime_type: Some("audio/mpeg".to_string()),
                    },
                    duration: None,
                    size: None,
                    episode_number: None,
                    description: String::new(),
                    image_url: None,
                    raw: String::new(),
                }],
            })
        }
    }

    fn context(root: &Path) -> SyncContext<MockHttpClient> {
        context_with(root, MockHttpClient::default())
    }

    fn context_with(root: &Path, client: MockHttpClient) -> SyncContext<MockHttpClient> {
        SyncContext::new(
            client,
            Arc::new(PlainRenderer),
            root,
            NoopReporter::shared(),
            CancellationToken::new(),
        )
    }

    fn subscription(url: &str, interval: Duration) -> Subscription {
        Subscription {
            url: url.to_string(),
            interval,
            include_shownotes: true,
        }
    }

    #[tokio::test]
    async fn poller_enqueues_immediately() {
        let dir = tempdir().unwrap();
        let ctx = context(dir.path());
        let (tx, mut rx) = mpsc::channel(4);
        let poller = Poller::new(ctx.clone(), Arc::new(MockSource::default()), tx);

        let handle = tokio::spawn(poller.run(subscription(
            "https://example.com/show",
            Duration::from_secs(3600),
        )));

        let job = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.id().as_str(), "https://example.com/show");

        ctx.cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn poller_retries_after_failed_fetch() {
        let dir = tempdir().unwrap();
        let ctx = context(dir.path());
        let source = Arc::new(MockSource {
            failures: 2,
            ..Default::default()
        });
        let (tx, mut rx) = mpsc::channel(4);
        let poller = Poller::new(ctx.clone(), source.clone(), tx);

        let handle = tokio::spawn(poller.run(subscription(
            "https://example.com/flaky",
            Duration::from_millis(10),
        )));

        let job = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.id().as_str(), "https://example.com/flaky");
        assert!(source.calls.load(Ordering::SeqCst) >= 3);

        ctx.cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn cancel_interrupts_pending_fetch() {
        let dir = tempdir().unwrap();
        let ctx = context(dir.path());
        let source = Arc::new(MockSource {
            hang: true,
            ..Default::default()
        });
        let (tx, _rx) = mpsc::channel(4);
        let poller = Poller::new(ctx.clone(), source, tx);
        let sub = subscription("https://example.com/slow", Duration::from_secs(3600));

        let cancel = ctx.cancel.clone();
        let (result, ()) = tokio::join!(poller.poll_once(&sub), async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        });

        assert!(matches!(result, Err(FeedError::Cancelled { .. })));
    }

    #[tokio::test]
    async fn subscribe_syncs_every_subscription_until_cancelled() {
        let dir = tempdir().unwrap();
        let ctx = context(dir.path());
        let subscriptions = vec![
            subscription("https://example.com/alpha", Duration::from_secs(3600)),
            subscription("https://example.com/beta", Duration::from_secs(3600)),
        ];
        let options = SubscribeOptions {
            max_active_jobs: 5,
            queue_tick: Duration::from_millis(10),
        };

        let running = tokio::spawn(subscribe(
            ctx.clone(),
            Arc::new(MockSource::default()),
            subscriptions,
            options,
        ));

        let expected = [
            dir.path().join("alpha/2021-01-01 - Only.mp3"),
            dir.path().join("alpha/shownotes/2021-01-01 - Only.html"),
            dir.path().join("beta/2021-01-01 - Only.mp3"),
            dir.path().join("beta/shownotes/2021-01-01 - Only.html"),
        ];
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if expected.iter().all(|path| path.exists()) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        ctx.cancel.cancel();
        let summary = running.await.unwrap();

        assert_eq!(summary.completed, 2);
        assert_eq!(summary.failed, 0);
        let ledger = Ledger::open(&dir.path().join("beta")).unwrap();
        assert!(ledger.is_done("only", TaskKind::Enclosure));
        assert!(ledger.is_done("only", TaskKind::Shownotes));
    }

    #[tokio::test]
    async fn running_job_absorbs_later_polls_of_its_feed() {
        let dir = tempdir().unwrap();
        let ctx = context_with(dir.path(), MockHttpClient { stall: true });
        let source = Arc::new(MockSource::default());
        let options = SubscribeOptions {
            max_active_jobs: 5,
            queue_tick: Duration::from_millis(5),
        };

        let running = tokio::spawn(subscribe(
            ctx.clone(),
            source.clone(),
            vec![subscription("https://example.com/long", Duration::from_millis(10))],
            options,
        ));

        tokio::time::timeout(Duration::from_secs(2), async {
            while source.calls.load(Ordering::SeqCst) < 4 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        ctx.cancel.cancel();
        let summary = running.await.unwrap();

        assert_eq!(summary.completed + summary.failed, 1);
        assert!(summary.deduplicated >= 1);
        assert!(!dir.path().join("long/2021-01-01 - Only.mp3").exists());
    }
}
