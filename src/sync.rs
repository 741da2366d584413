// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::episode::{
    SHOWNOTES_DIR, ShownotesRenderer, TaskOutcome, channel_directory_name, download_enclosure,
    generate_filename, save_shownotes, shownotes_filename,
};
use crate::error::SyncError;
use crate::feed::{Channel, Episode};
use crate::http::HttpClient;
use crate::ledger::{Ledger, TaskKind};
use crate::progress::{ProgressEvent, SharedProgressReporter};
use crate::queue::{Job, JobId};
use crate::range::EpisodeSelection;

/// Options for a single channel sync
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Which episodes to consider
    pub range: EpisodeSelection,
    /// Also render shownotes for each episode
    pub include_shownotes: bool,
}

/// Result of a channel sync
#[derive(Debug, Clone, Default)]
pub struct SyncResult {
    /// Number of enclosures transferred
    pub downloaded: usize,
    /// Number of shownotes pages written
    pub shownotes_saved: usize,
    /// Number of episodes with nothing left to do
    pub skipped: usize,
    /// Number of tasks that failed (including cancelled ones)
    pub failed: usize,
    /// Details of failed tasks (episode title, error message)
    pub failed_episodes: Vec<(String, String)>,
    /// The sync stopped early because cancellation was requested
    pub cancelled: bool,
}

/// One async lock per channel directory, shared by every clone of a context
type DirectoryLocks = Arc<Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>>;

/// Everything a channel sync needs besides the channel itself
///
/// Cheap to clone; every job gets its own copy. Clones share the directory
/// locks, so two jobs whose channels map to the same directory run one after
/// the other.
#[derive(Clone)]
pub struct SyncContext<C> {
    pub client: C,
    pub renderer: Arc<dyn ShownotesRenderer>,
    /// Channel directories are created below this directory
    pub output_root: PathBuf,
    pub reporter: SharedProgressReporter,
    pub cancel: CancellationToken,
    locks: DirectoryLocks,
}

impl<C: HttpClient + Clone + 'static> SyncContext<C> {
    pub fn new(
        client: C,
        renderer: Arc<dyn ShownotesRenderer>,
        output_root: impl Into<PathBuf>,
        reporter: SharedProgressReporter,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            renderer,
            output_root: output_root.into(),
            reporter,
            cancel,
            locks: DirectoryLocks::default(),
        }
    }

    /// Directory holding a channel's downloads and ledger
    pub fn channel_directory(&self, channel: &Channel) -> PathBuf {
        self.output_root.join(channel_directory_name(&channel.title))
    }

    /// Lock guarding the ledger and files of one channel directory
    fn directory_lock(&self, directory: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(directory.to_path_buf()).or_default().clone()
    }

    /// Wrap a sync of `channel` into a job for the job queue
    pub fn channel_job(&self, id: JobId, channel: Channel, options: SyncOptions) -> Job {
        let ctx = self.clone();
        Job::new(id, async move { ctx.sync_channel(&channel, &options).await })
    }

    /// Download the selected episodes of a channel
    ///
    /// Episodes are handled one after another, oldest first. For each one,
    /// the kinds not yet recorded in the ledger run concurrently and the
    /// ledger is persisted with whichever of them succeeded before moving on.
    /// Task failures are collected in the result; only directory and ledger
    /// problems fail the whole sync.
    ///
    /// Holds the channel directory's lock throughout, so syncs of different
    /// feeds that share a directory never interleave ledger writes.
    pub async fn sync_channel(
        &self,
        channel: &Channel,
        options: &SyncOptions,
    ) -> Result<SyncResult, SyncError> {
        let directory = self.channel_directory(channel);

        let lock = self.directory_lock(&directory);
        let _guard = match lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!(directory = %directory.display(), "Channel directory busy, waiting");
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        return Ok(SyncResult {
                            cancelled: true,
                            ..Default::default()
                        });
                    }
                    guard = lock.lock() => guard,
                }
            }
        };

        create_directory(&directory)?;

        let mut ledger = Ledger::open(&directory)?;

        let shownotes_directory = directory.join(SHOWNOTES_DIR);
        if options.include_shownotes {
            create_directory(&shownotes_directory)?;
        }

        let range = options.range.resolve(channel.episodes.len());
        info!(
            channel = %channel.title,
            first = range.first,
            last = range.last,
            "Syncing channel"
        );

        let mut result = SyncResult::default();

        for episode in range.slice(&channel.episodes) {
            if self.cancel.is_cancelled() {
                break;
            }

            let tasks = pending_tasks(&ledger, episode, options.include_shownotes);
            if tasks.is_empty() {
                trace!(guid = %episode.guid, title = %episode.title, "Nothing to do");
                result.skipped += 1;
                continue;
            }

            self.reporter.report(ProgressEvent::EpisodeStarting {
                channel_title: channel.title.clone(),
                episode_title: episode.title.clone(),
                tasks: tasks.clone(),
            });

            let succeeded = self
                .run_episode_tasks(
                    channel,
                    episode,
                    &tasks,
                    &directory,
                    &shownotes_directory,
                    &mut result,
                )
                .await;

            ledger.mark_done(&episode.guid, &episode.title, &succeeded);
            ledger.persist(&directory)?;
        }

        result.cancelled = self.cancel.is_cancelled();

        self.reporter.report(ProgressEvent::SyncCompleted {
            channel_title: channel.title.clone(),
            downloaded_count: result.downloaded,
            shownotes_count: result.shownotes_saved,
            skipped_count: result.skipped,
            failed_count: result.failed,
        });

        info!(
            channel = %channel.title,
            downloaded = result.downloaded,
            shownotes = result.shownotes_saved,
            skipped = result.skipped,
            failed = result.failed,
            cancelled = result.cancelled,
            "Channel sync finished"
        );

        Ok(result)
    }

    /// Run the given tasks for one episode concurrently and wait for all of them
    ///
    /// Returns the kinds that are satisfied on disk afterwards.
    async fn run_episode_tasks(
        &self,
        channel: &Channel,
        episode: &Episode,
        tasks: &[TaskKind],
        directory: &Path,
        shownotes_directory: &Path,
        result: &mut SyncResult,
    ) -> Vec<TaskKind> {
        let wants_enclosure = tasks.contains(&TaskKind::Enclosure);
        let wants_shownotes = tasks.contains(&TaskKind::Shownotes);

        let enclosure = async {
            if !wants_enclosure {
                return None;
            }
            let target = directory.join(generate_filename(episode));
            Some(
                download_enclosure(&self.client, episode, &target, &self.reporter, &self.cancel)
                    .await,
            )
        };

        let shownotes = async {
            if !wants_shownotes {
                return None;
            }
            let target = shownotes_directory.join(shownotes_filename(episode));
            Some(
                save_shownotes(
                    self.renderer.as_ref(),
                    episode,
                    channel,
                    &target,
                    &self.cancel,
                )
                .await,
            )
        };

        let (enclosure, shownotes) = futures::future::join(enclosure, shownotes).await;

        let mut succeeded = Vec::with_capacity(tasks.len());

        match enclosure {
            Some(Ok(outcome)) => {
                succeeded.push(TaskKind::Enclosure);
                match outcome {
                    TaskOutcome::Completed { .. } => result.downloaded += 1,
                    TaskOutcome::AlreadyExists => {
                        debug!(guid = %episode.guid, "Enclosure file exists, recording it in the ledger");
                    }
                }
            }
            Some(Err(e)) => {
                warn!(guid = %episode.guid, title = %episode.title, error = %e, "Enclosure download failed");
                self.reporter.report(ProgressEvent::DownloadFailed {
                    guid: episode.guid.clone(),
                    episode_title: episode.title.clone(),
                    error: e.to_string(),
                });
                result.failed += 1;
                result
                    .failed_episodes
                    .push((episode.title.clone(), e.to_string()));
            }
            None => {}
        }

        match shownotes {
            Some(Ok(outcome)) => {
                succeeded.push(TaskKind::Shownotes);
                if let TaskOutcome::Completed { .. } = outcome {
                    result.shownotes_saved += 1;
                    self.reporter.report(ProgressEvent::ShownotesSaved {
                        guid: episode.guid.clone(),
                        episode_title: episode.title.clone(),
                    });
                }
            }
            Some(Err(e)) => {
                warn!(guid = %episode.guid, title = %episode.title, error = %e, "Shownotes failed");
                self.reporter.report(ProgressEvent::ShownotesFailed {
                    guid: episode.guid.clone(),
                    episode_title: episode.title.clone(),
                    error: e.to_string(),
                });
                result.failed += 1;
                result
                    .failed_episodes
                    .push((episode.title.clone(), e.to_string()));
            }
            None => {}
        }

        succeeded
    }
}

/// Kinds of work still outstanding for an episode
fn pending_tasks(ledger: &Ledger, episode: &Episode, include_shownotes: bool) -> Vec<TaskKind> {
    let mut tasks = Vec::with_capacity(2);
    if !ledger.is_done(&episode.guid, TaskKind::Enclosure) {
        tasks.push(TaskKind::Enclosure);
    }
    if include_shownotes && !ledger.is_done(&episode.guid, TaskKind::Shownotes) {
        tasks.push(TaskKind::Shownotes);
    }
    tasks
}

fn create_directory(path: &Path) -> Result<(), SyncError> {
    std::fs::create_dir_all(path).map_err(|e| SyncError::CreateDirectoryFailed {
        path: path.to_path_buf(),
        source: e,
    })
}
