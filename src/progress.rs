// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use crate::ledger::TaskKind;

/// Events emitted while downloading channels, for progress reporting
///
/// Reporting is observational only; nothing in the download path depends on
/// what a reporter does with an event.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Feed is being fetched from URL
    FetchingFeed { url: String },

    /// Feed has been fetched and parsed
    FeedFetched {
        channel_title: String,
        total_episodes: usize,
    },

    /// Fetching or parsing a feed failed
    FeedFailed { url: String, error: String },

    /// A channel job was taken off the queue and started
    JobStarted { id: String },

    /// A channel job settled, successfully or not
    JobFinished { id: String, succeeded: bool },

    /// Tasks for an episode are about to run
    EpisodeStarting {
        channel_title: String,
        episode_title: String,
        tasks: Vec<TaskKind>,
    },

    /// An enclosure transfer is starting
    DownloadStarting {
        guid: String,
        episode_title: String,
        /// Expected content length in bytes, if known
        content_length: Option<u64>,
    },

    /// Enclosure transfer progress update
    DownloadProgress {
        guid: String,
        episode_title: String,
        bytes_downloaded: u64,
        total_bytes: Option<u64>,
    },

    /// An enclosure was downloaded and moved into place
    DownloadCompleted {
        guid: String,
        episode_title: String,
        bytes_downloaded: u64,
    },

    /// An enclosure transfer failed or was cancelled
    DownloadFailed {
        guid: String,
        episode_title: String,
        error: String,
    },

    /// Shownotes were rendered and written
    ShownotesSaved { guid: String, episode_title: String },

    /// Rendering or writing shownotes failed
    ShownotesFailed {
        guid: String,
        episode_title: String,
        error: String,
    },

    /// A channel sync completed
    SyncCompleted {
        channel_title: String,
        downloaded_count: usize,
        shownotes_count: usize,
        skipped_count: usize,
        failed_count: usize,
    },
}

/// Trait for reporting progress events during downloads.
///
/// Implementations can use this to display progress bars, log messages,
/// or collect statistics.
pub trait ProgressReporter: Send + Sync {
    /// Report a progress event
    fn report(&self, event: ProgressEvent);
}

/// A shared reference to a progress reporter
pub type SharedProgressReporter = Arc<dyn ProgressReporter>;

/// A no-op progress reporter that silently ignores all events.
/// Useful for tests or quiet mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _event: ProgressEvent) {}
}

impl NoopReporter {
    /// Create a new NoopReporter wrapped in an Arc
    pub fn shared() -> SharedProgressReporter {
        Arc::new(Self)
    }
}
