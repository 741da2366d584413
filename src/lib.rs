// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

pub mod config;
pub mod episode;
pub mod error;
pub mod feed;
pub mod http;
pub mod ledger;
pub mod progress;
pub mod queue;
pub mod range;
pub mod search;
pub mod shutdown;
pub mod subscribe;
pub mod sync;

// Re-export main types for convenience
pub use episode::{HtmlShownotes, ShownotesRenderer, TaskOutcome};
pub use error::{
    ConfigError, DownloadError, FeedError, LedgerError, RangeError, SearchError, ShownotesError,
    SyncError,
};
pub use feed::{Channel, ChannelSource, Enclosure, Episode, FeedSource};
pub use http::{HttpClient, HttpResponse, ReqwestClient};
pub use ledger::{Ledger, LedgerEntry, TaskKind};
pub use progress::{NoopReporter, ProgressEvent, ProgressReporter, SharedProgressReporter};
pub use queue::{Job, JobId, JobQueue, QueueSummary};
pub use range::{EpisodeRange, EpisodeSelection};
pub use search::{SearchResult, search_podcasts};
pub use shutdown::cancel_on_signal;
pub use subscribe::{SubscribeOptions, Subscription, subscribe};
pub use sync::{SyncContext, SyncOptions, SyncResult};
