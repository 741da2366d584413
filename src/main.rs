// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use console::Emoji;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use url::Url;

use poddy::config::{self, Config};
use poddy::subscribe::DEFAULT_POLL_INTERVAL;
use poddy::{
    ChannelSource, EpisodeSelection, FeedSource, HtmlShownotes, NoopReporter, ProgressEvent,
    ProgressReporter, ReqwestClient, SharedProgressReporter, SubscribeOptions, Subscription,
    SyncContext, SyncOptions, SyncResult, cancel_on_signal, search_podcasts, subscribe,
};

// Emoji with fallback for terminals without Unicode support
static MICROPHONE: Emoji<'_, '_> = Emoji("🎙️  ", "");
static SEARCH: Emoji<'_, '_> = Emoji("🔍 ", "[~] ");
static HEADPHONES: Emoji<'_, '_> = Emoji("🎧 ", "[i] ");
static DOWNLOAD: Emoji<'_, '_> = Emoji("📥 ", "[v] ");
static NOTES: Emoji<'_, '_> = Emoji("📝 ", "[n] ");
static SUCCESS: Emoji<'_, '_> = Emoji("✅ ", "[+] ");
static FAILURE: Emoji<'_, '_> = Emoji("❌ ", "[!] ");
static PARTY: Emoji<'_, '_> = Emoji("🎉 ", "[*] ");
static FOLDER: Emoji<'_, '_> = Emoji("📁 ", "");
static CROSS: Emoji<'_, '_> = Emoji("✗ ", "x ");

/// CLI podcast downloader
#[derive(Parser, Debug)]
#[command(name = "poddy")]
#[command(about = "CLI podcast downloader")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Quiet mode - suppress progress output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log more (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Extra HTTP header for every request, e.g. "Authorization: Bearer abc"
    #[arg(short = 'H', long = "header", global = true, value_parser = parse_header)]
    headers: Vec<(HeaderName, HeaderValue)>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Find a podcast's feed URL
    Search {
        /// Name of the podcast
        #[arg(short, long)]
        name: String,
    },

    /// Display the episode list of a feed
    List {
        /// URL of the podcast feed
        #[arg(short, long, value_parser = parse_url)]
        url: String,
    },

    /// Download episodes from a feed
    Download {
        /// URL of the podcast feed
        #[arg(short, long, value_parser = parse_url)]
        url: String,

        /// Destination of downloads (defaults to the configured directory)
        #[arg(short, long)]
        directory: Option<PathBuf>,

        /// Episodes to download: "42" (first 42), "2-10", or "-10" (latest 10)
        #[arg(short, long, allow_hyphen_values = true)]
        episodes: Option<EpisodeSelection>,

        /// Also save shownotes
        #[arg(short, long)]
        shownotes: bool,

        /// Skip shownotes even if the config file enables them
        #[arg(long, conflicts_with = "shownotes")]
        no_shownotes: bool,
    },

    /// Continuously download new episodes from feeds
    Subscribe {
        /// URL(s) of podcast feeds, in addition to the subscriptions file
        #[arg(short, long = "urls", num_args = 1.., value_parser = parse_url)]
        urls: Vec<String>,

        /// Destination of downloads (defaults to the configured directory)
        #[arg(short, long)]
        directory: Option<PathBuf>,

        /// Seconds between feed checks
        #[arg(short, long)]
        interval: Option<u64>,

        /// Also save shownotes
        #[arg(short, long)]
        shownotes: bool,

        /// Skip shownotes even if the config or subscriptions file enables them
        #[arg(long, conflicts_with = "shownotes")]
        no_shownotes: bool,

        /// Maximum number of channels downloading at once
        #[arg(short = 'j', long, default_value_t = SubscribeOptions::default().max_active_jobs)]
        max_jobs: usize,
    },
}

/// Shownotes choice made on the command line, if any
fn shownotes_flag(shownotes: bool, no_shownotes: bool) -> Option<bool> {
    match (shownotes, no_shownotes) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

fn parse_url(input: &str) -> Result<String, String> {
    Url::parse(input)
        .map(|_| input.to_string())
        .map_err(|e| format!("URL is invalid ({e})"))
}

fn parse_header(input: &str) -> Result<(HeaderName, HeaderValue), String> {
    let (name, value) = input
        .split_once(':')
        .ok_or_else(|| format!("expected \"Name: value\", got \"{input}\""))?;
    let name = HeaderName::from_bytes(name.trim().as_bytes()).map_err(|e| e.to_string())?;
    let value = HeaderValue::from_str(value.trim()).map_err(|e| e.to_string())?;
    Ok((name, value))
}

/// Progress reporter using indicatif for terminal output
struct IndicatifReporter {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
    main_bar: ProgressBar,
}

impl IndicatifReporter {
    fn new() -> Self {
        let multi = MultiProgress::new();

        let main_style = ProgressStyle::default_bar()
            .template("{spinner:.green} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());

        let main_bar = multi.add(ProgressBar::new_spinner());
        main_bar.set_style(main_style);
        main_bar.enable_steady_tick(Duration::from_millis(100));

        Self {
            multi,
            bars: Mutex::new(HashMap::new()),
            main_bar,
        }
    }

    fn get_or_create_bar(&self, guid: &str) -> ProgressBar {
        let mut bars = self.bars.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(bar) = bars.get(guid) {
            return bar.clone();
        }

        let style = ProgressStyle::default_bar()
            .template(&format!(
                "  {DOWNLOAD}[{{bar:30.cyan/blue}}] {{bytes}}/{{total_bytes}} {{wide_msg}}"
            ))
            .map(|style| style.progress_chars("█▓░"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());

        let bar = self.multi.add(ProgressBar::new(0));
        bar.set_style(style);
        bars.insert(guid.to_string(), bar.clone());
        bar
    }

    fn finish_bar(&self, guid: &str) {
        let mut bars = self.bars.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(bar) = bars.remove(guid) {
            bar.finish_and_clear();
        }
    }

    fn println(&self, line: String) {
        let _ = self.multi.println(line);
    }
}

impl ProgressReporter for IndicatifReporter {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::FetchingFeed { url } => {
                self.main_bar
                    .set_message(format!("{SEARCH}Fetching feed: {}", url.cyan()));
            }

            ProgressEvent::FeedFetched {
                channel_title,
                total_episodes,
            } => {
                self.main_bar.set_message(format!(
                    "{HEADPHONES}{} • {} episodes",
                    channel_title.bold().green(),
                    total_episodes.to_string().cyan(),
                ));
            }

            ProgressEvent::FeedFailed { url, error } => {
                self.println(format!("{FAILURE}{} - {}", url.red(), error.dimmed()));
            }

            ProgressEvent::JobStarted { id } => {
                self.main_bar
                    .set_message(format!("{HEADPHONES}Checking {}", id.cyan()));
            }

            ProgressEvent::JobFinished { .. } => {}

            ProgressEvent::EpisodeStarting {
                channel_title,
                episode_title,
                ..
            } => {
                self.main_bar.set_message(format!(
                    "{HEADPHONES}{} • {}",
                    channel_title.bold().green(),
                    truncate_title(&episode_title, 50)
                ));
            }

            ProgressEvent::DownloadStarting {
                guid,
                episode_title,
                content_length,
            } => {
                let bar = self.get_or_create_bar(&guid);
                bar.set_length(content_length.unwrap_or(0));
                bar.set_position(0);
                bar.set_message(truncate_title(&episode_title, 40));
            }

            ProgressEvent::DownloadProgress {
                guid,
                bytes_downloaded,
                total_bytes,
                ..
            } => {
                let bar = self.get_or_create_bar(&guid);
                if let Some(total) = total_bytes {
                    bar.set_length(total);
                }
                bar.set_position(bytes_downloaded);
            }

            ProgressEvent::DownloadCompleted {
                guid,
                episode_title,
                ..
            } => {
                self.finish_bar(&guid);
                self.println(format!(
                    "  {SUCCESS}{}",
                    truncate_title(&episode_title, 60).green()
                ));
            }

            ProgressEvent::DownloadFailed {
                guid,
                episode_title,
                error,
            } => {
                self.finish_bar(&guid);
                self.println(format!(
                    "  {FAILURE}{} - {}",
                    truncate_title(&episode_title, 40).red(),
                    error.red()
                ));
            }

            ProgressEvent::ShownotesSaved { episode_title, .. } => {
                self.println(format!(
                    "  {NOTES}{}",
                    truncate_title(&episode_title, 60).dimmed()
                ));
            }

            ProgressEvent::ShownotesFailed {
                episode_title,
                error,
                ..
            } => {
                self.println(format!(
                    "  {FAILURE}{} (shownotes) - {}",
                    truncate_title(&episode_title, 40).red(),
                    error.red()
                ));
            }

            ProgressEvent::SyncCompleted {
                channel_title,
                downloaded_count,
                shownotes_count,
                skipped_count,
                failed_count,
            } => {
                self.println(format!(
                    "{PARTY}{} {} downloaded, {} shownotes, {} up to date, {} failed",
                    format!("{channel_title}:").bold().green(),
                    downloaded_count.to_string().green().bold(),
                    shownotes_count.to_string().green(),
                    skipped_count.to_string().yellow(),
                    if failed_count > 0 {
                        failed_count.to_string().red().bold()
                    } else {
                        failed_count.to_string().green()
                    }
                ));
            }
        }
    }
}

impl Drop for IndicatifReporter {
    fn drop(&mut self) {
        self.main_bar.finish_and_clear();
    }
}

fn truncate_title(title: &str, max_len: usize) -> String {
    if title.chars().count() <= max_len {
        title.to_string()
    } else {
        let kept: String = title.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn http_client(headers: &[(HeaderName, HeaderValue)]) -> Result<ReqwestClient> {
    if headers.is_empty() {
        return Ok(ReqwestClient::new());
    }
    let map: HeaderMap = headers.iter().cloned().collect();
    ReqwestClient::with_default_headers(map).context("Failed to build HTTP client")
}

fn progress_reporter(quiet: bool) -> SharedProgressReporter {
    if quiet {
        NoopReporter::shared()
    } else {
        Arc::new(IndicatifReporter::new())
    }
}

/// Replace a leading `~` with the home directory
fn expand_home(path: &Path, home: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home.join(rest),
        Err(_) => path.to_path_buf(),
    }
}

/// Loaded config plus the home directory it was resolved against
struct Settings {
    home: PathBuf,
    config: Config,
}

impl Settings {
    fn load() -> Result<Self> {
        let home = config::home_dir()?;
        let config = config::load_config(&config::config_path(&home), &home)?;
        Ok(Self { home, config })
    }

    /// Download directory from the command line, else from the config file
    fn download_directory(&self, directory: Option<PathBuf>) -> Result<PathBuf> {
        let directory = directory
            .or_else(|| self.config.download_directory.clone())
            .context("No download directory given and none configured")?;
        let directory = expand_home(&directory, &self.home);

        if !directory.is_dir() {
            bail!("Directory '{}' does not exist", directory.display());
        }
        Ok(directory)
    }
}

async fn run_search(client: &ReqwestClient, name: &str) -> Result<()> {
    let results = search_podcasts(client, name)
        .await
        .context("Failed to search for podcasts")?;

    if results.is_empty() {
        println!("No podcasts found for '{name}'");
    }

    for result in results {
        println!("{}", result.name.bold());
        if let Some(genre) = result.genre {
            println!(" genre: {genre}");
        }
        if let Some(latest) = result.latest_release {
            println!(" latestRelease: {latest}");
        }
        if let Some(count) = result.episode_count {
            println!(" nbrOfEpisodes: {count}");
        }
        if let Some(feed_url) = result.feed_url {
            println!(" feedUrl: {}", feed_url.cyan());
        }
    }
    Ok(())
}

async fn run_list(client: ReqwestClient, url: &str) -> Result<()> {
    let channel = FeedSource::new(client)
        .fetch(url)
        .await
        .context("Failed to fetch feed")?;

    for (index, episode) in channel.episodes.iter().enumerate().rev() {
        println!("{}. {}", index + 1, episode.title.bold());
        if let Some(date) = episode.pub_date {
            println!(" pubDate: {}", date.to_rfc2822());
        }
        println!(" url: {}", episode.enclosure.url);
        if let Some(duration) = &episode.duration {
            println!(" duration: {duration}");
        }
        if let Some(size) = &episode.size {
            println!(" size: {size}");
        }
        println!();
    }
    Ok(())
}

async fn run_download(
    client: ReqwestClient,
    url: &str,
    directory: Option<PathBuf>,
    episodes: Option<EpisodeSelection>,
    shownotes: Option<bool>,
    quiet: bool,
) -> Result<()> {
    let settings = Settings::load()?;
    let directory = settings.download_directory(directory)?;
    let options = SyncOptions {
        range: episodes.unwrap_or_default(),
        include_shownotes: shownotes.unwrap_or_else(|| settings.config.include_shownotes()),
    };

    let reporter = progress_reporter(quiet);
    let cancel = CancellationToken::new();
    let watcher = cancel_on_signal(cancel.clone());

    reporter.report(ProgressEvent::FetchingFeed {
        url: url.to_string(),
    });
    let source = FeedSource::new(client.clone());
    let channel = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok(()),
        channel = source.fetch(url) => channel.context("Failed to fetch feed")?,
    };
    reporter.report(ProgressEvent::FeedFetched {
        channel_title: channel.title.clone(),
        total_episodes: channel.episodes.len(),
    });

    let ctx = SyncContext::new(
        client.clone(),
        Arc::new(HtmlShownotes::new(client)),
        &directory,
        reporter,
        cancel,
    );
    let result = ctx
        .sync_channel(&channel, &options)
        .await
        .context("Failed to download episodes")?;
    watcher.abort();

    if !quiet {
        print_failures(&result);
        println!(
            "\n{FOLDER}Output: {}\n",
            ctx.channel_directory(&channel).display().to_string().cyan()
        );
    }

    if result.failed > 0 && result.downloaded == 0 && !result.cancelled {
        std::process::exit(1);
    }
    Ok(())
}

fn print_failures(result: &SyncResult) {
    if result.failed_episodes.is_empty() {
        return;
    }
    println!("\n{}", "Failed episodes:".red().bold());
    for (title, error) in &result.failed_episodes {
        println!("  {}{} - {}", CROSS, title.yellow(), error.dimmed());
    }
}

async fn run_subscribe(
    client: ReqwestClient,
    urls: Vec<String>,
    directory: Option<PathBuf>,
    interval: Option<u64>,
    shownotes: Option<bool>,
    max_jobs: usize,
    quiet: bool,
) -> Result<()> {
    let settings = Settings::load()?;
    let directory = settings.download_directory(directory)?;
    let subscriptions_file = config::subscriptions_path(&settings.home);
    let default_shownotes = shownotes.unwrap_or_else(|| settings.config.include_shownotes());

    let mut subscriptions = config::load_subscriptions(&subscriptions_file)?
        .to_subscriptions(default_shownotes);
    subscriptions.retain(|subscription| !urls.contains(&subscription.url));
    subscriptions.extend(urls.into_iter().map(|url| Subscription {
        url,
        interval: DEFAULT_POLL_INTERVAL,
        include_shownotes: default_shownotes,
    }));
    let mut seen = HashSet::new();
    subscriptions.retain(|subscription| seen.insert(subscription.url.clone()));

    for subscription in &mut subscriptions {
        if let Some(seconds) = interval {
            subscription.interval = config::poll_interval(seconds);
        }
        if let Some(include_shownotes) = shownotes {
            subscription.include_shownotes = include_shownotes;
        }
    }

    if subscriptions.is_empty() {
        bail!(
            "No subscriptions; pass --urls or add them to {}",
            subscriptions_file.display()
        );
    }

    if !quiet {
        println!(
            "Checking {} channel subscription(s), press Ctrl-C to stop",
            subscriptions.len().to_string().cyan()
        );
    }

    let cancel = CancellationToken::new();
    let watcher = cancel_on_signal(cancel.clone());
    let ctx = SyncContext::new(
        client.clone(),
        Arc::new(HtmlShownotes::new(client.clone())),
        &directory,
        progress_reporter(quiet),
        cancel,
    );
    let source = Arc::new(FeedSource::new(client));
    let options = SubscribeOptions {
        max_active_jobs: max_jobs,
        ..Default::default()
    };

    let summary = subscribe(ctx, source, subscriptions, options).await;
    let _ = watcher.await;

    if !quiet {
        println!(
            "\n{PARTY}{} {} channel syncs, {} failed",
            "Stopped:".bold().green(),
            summary.completed.to_string().green().bold(),
            summary.failed.to_string().yellow(),
        );
        println!("{FOLDER}Output: {}\n", directory.display().to_string().cyan());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if !cli.quiet {
        println!(
            "\n{}{} {}\n",
            MICROPHONE,
            "poddy".bold().magenta(),
            "- Podcast Downloader".dimmed()
        );
    }

    let client = http_client(&cli.headers)?;

    match cli.command {
        Command::Search { name } => run_search(&client, &name).await,
        Command::List { url } => run_list(client, &url).await,
        Command::Download {
            url,
            directory,
            episodes,
            shownotes,
            no_shownotes,
        } => {
            let shownotes = shownotes_flag(shownotes, no_shownotes);
            run_download(client, &url, directory, episodes, shownotes, cli.quiet).await
        }
        Command::Subscribe {
            urls,
            directory,
            interval,
            shownotes,
            no_shownotes,
            max_jobs,
        } => {
            let shownotes = shownotes_flag(shownotes, no_shownotes);
            run_subscribe(
                client, urls, directory, interval, shownotes, max_jobs, cli.quiet,
            )
            .await
        }
    }
}
