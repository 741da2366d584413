// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::error::FeedError;
use crate::http::HttpClient;

use super::parse::{Channel, parse_feed};

/// Resolves a feed URL to a channel whose episodes are ordered oldest first
#[async_trait]
pub trait ChannelSource: Send + Sync {
    async fn fetch(&self, feed_url: &str) -> Result<Channel, FeedError>;
}

/// Channel source backed by an HTTP client and the RSS parser
#[derive(Clone)]
pub struct FeedSource<C> {
    client: C,
}

impl<C: HttpClient> FeedSource<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C: HttpClient> ChannelSource for FeedSource<C> {
    async fn fetch(&self, feed_url: &str) -> Result<Channel, FeedError> {
        fetch_channel(&self.client, feed_url).await
    }
}

/// Fetch raw feed bytes from a URL (without parsing)
pub async fn fetch_feed_bytes<C: HttpClient>(client: &C, url: &str) -> Result<Bytes, FeedError> {
    client
        .get_bytes(url)
        .await
        .map_err(|e| FeedError::FetchFailed {
            url: url.to_string(),
            source: e,
        })
}

/// Fetch and parse a podcast feed from a URL
pub async fn fetch_channel<C: HttpClient>(client: &C, url: &str) -> Result<Channel, FeedError> {
    let feed_url = Url::parse(url)?;
    let bytes = fetch_feed_bytes(client, url).await?;
    parse_feed(&bytes, feed_url)
}
