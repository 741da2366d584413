// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashSet;

use chrono::{DateTime, FixedOffset};
use url::Url;

use crate::error::FeedError;

/// A podcast channel with its episodes in chronological order (oldest first)
#[derive(Debug, Clone)]
pub struct Channel {
    pub title: String,
    pub image_url: Option<Url>,
    pub feed_url: Url,
    /// Channel XML without its items
    pub raw: String,
    pub episodes: Vec<Episode>,
}

/// Represents a single podcast episode
#[derive(Debug, Clone)]
pub struct Episode {
    /// Stable unique id, falls back to the enclosure URL when the feed has none
    pub guid: String,
    pub title: String,
    pub pub_date: Option<DateTime<FixedOffset>>,
    pub enclosure: Enclosure,
    pub duration: Option<String>,
    /// Human readable size, e.g. "12.3 MB"
    pub size: Option<String>,
    pub episode_number: Option<u32>,
    pub description: String,
    pub image_url: Option<Url>,
    /// The feed item as pretty-printed JSON
    pub raw: String,
}

/// Represents the audio file attached to an episode
#[derive(Debug, Clone)]
pub struct Enclosure {
    pub url: Url,
    pub length: Option<u64>,
    pub mime_type: Option<String>,
}

/// Parse RSS feed XML bytes into a Channel
///
/// Items without an enclosure (ads, promos) are dropped. Episodes are
/// returned oldest first.
pub fn parse_feed(xml_bytes: &[u8], feed_url: Url) -> Result<Channel, FeedError> {
    let channel = rss::Channel::read_from(xml_bytes).map_err(|e| FeedError::ParseFailed {
        url: feed_url.to_string(),
        source: e,
    })?;

    let episodes = channel
        .items()
        .iter()
        .filter_map(|item| parse_episode(item).ok())
        .collect();

    let image_url = channel
        .itunes_ext()
        .and_then(|ext| ext.image())
        .and_then(|url| Url::parse(url).ok())
        .or_else(|| {
            channel
                .image()
                .and_then(|img| Url::parse(img.url()).ok())
        });

    let mut without_items = channel.clone();
    without_items.set_items(Vec::new());
    let raw = without_items
        .write_to(Vec::new())
        .map(|buf| String::from_utf8_lossy(&buf).into_owned())
        .unwrap_or_default();

    Ok(Channel {
        title: channel.title().trim().to_string(),
        image_url,
        feed_url,
        raw,
        episodes: into_chronological(episodes),
    })
}

fn parse_episode(item: &rss::Item) -> Result<Episode, FeedError> {
    let title = item
        .title()
        .map(|t| t.trim().to_string())
        .unwrap_or_else(|| "Untitled Episode".to_string());

    let enclosure = item
        .enclosure()
        .ok_or_else(|| FeedError::MissingEnclosure {
            title: title.clone(),
        })?;

    let enclosure_url = Url::parse(enclosure.url())?;
    let length: Option<u64> = enclosure.length().parse().ok();

    let pub_date = item.pub_date().and_then(|date_str| {
        DateTime::parse_from_rfc2822(date_str.trim())
            .ok()
            .or_else(|| parse_relaxed_date(date_str.trim()))
    });

    let guid = item
        .guid()
        .map(|g| g.value().trim().to_string())
        .filter(|g| !g.is_empty())
        .unwrap_or_else(|| enclosure.url().to_string());

    let itunes = item.itunes_ext();

    let description = item
        .content()
        .or_else(|| itunes.and_then(|ext| ext.summary()))
        .or_else(|| item.description())
        .unwrap_or_default()
        .trim()
        .to_string();

    Ok(Episode {
        guid,
        title,
        pub_date,
        enclosure: Enclosure {
            url: enclosure_url,
            length,
            mime_type: Some(enclosure.mime_type().to_string()).filter(|s| !s.is_empty()),
        },
        duration: itunes.and_then(|ext| ext.duration().map(String::from)),
        size: length.map(size_label),
        episode_number: itunes.and_then(|ext| ext.episode().and_then(|e| e.trim().parse().ok())),
        description,
        image_url: itunes
            .and_then(|ext| ext.image())
            .and_then(|url| Url::parse(url).ok()),
        raw: serde_json::to_string_pretty(item).unwrap_or_default(),
    })
}

/// Order episodes oldest first
///
/// Feeds list newest first by convention, so the feed order is reversed.
/// Feeds that don't follow the convention are corrected when every episode
/// carries an episode number, or failing that a distinct publication date.
fn into_chronological(mut episodes: Vec<Episode>) -> Vec<Episode> {
    episodes.reverse();

    if episodes.iter().all(|e| e.episode_number.is_some()) {
        episodes.sort_by_key(|e| e.episode_number);
        return episodes;
    }

    let distinct_dates: HashSet<_> = episodes.iter().filter_map(|e| e.pub_date).collect();
    if distinct_dates.len() == episodes.len() {
        episodes.sort_by_key(|e| e.pub_date);
    }

    episodes
}

fn size_label(bytes: u64) -> String {
    format!("{:.1} MB", bytes as f64 / 1024.0 / 1024.0)
}

/// Try to parse dates that don't strictly conform to RFC 2822
fn parse_relaxed_date(date_str: &str) -> Option<DateTime<FixedOffset>> {
    let formats = [
        "%a, %d %b %Y %H:%M:%S %z",
        "%Y-%m-%dT%H:%M:%S%:z",
        "%Y-%m-%d %H:%M:%S %z",
    ];

    formats
        .iter()
        .find_map(|format| DateTime::parse_from_str(date_str, format).ok())
}
