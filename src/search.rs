// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde::Deserialize;
use url::Url;

use crate::error::SearchError;
use crate::http::HttpClient;

const ITUNES_SEARCH_URL: &str = "https://itunes.apple.com/search";

/// A podcast found in the directory
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SearchResult {
    #[serde(rename = "artistName")]
    pub name: String,
    #[serde(rename = "primaryGenreName")]
    pub genre: Option<String>,
    #[serde(rename = "releaseDate")]
    pub latest_release: Option<String>,
    #[serde(rename = "trackCount")]
    pub episode_count: Option<u32>,
    #[serde(rename = "feedUrl")]
    pub feed_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

/// Search URL for `term`
pub fn search_url(term: &str) -> Result<Url, SearchError> {
    Ok(Url::parse_with_params(
        ITUNES_SEARCH_URL,
        &[("entity", "podcast"), ("term", term)],
    )?)
}

/// Look up podcasts by name in the iTunes directory
pub async fn search_podcasts<C: HttpClient + ?Sized>(
    client: &C,
    term: &str,
) -> Result<Vec<SearchResult>, SearchError> {
    let url = search_url(term)?;
    let body = client
        .get_bytes(url.as_str())
        .await
        .map_err(SearchError::RequestFailed)?;
    parse_results(&body)
}

fn parse_results(body: &[u8]) -> Result<Vec<SearchResult>, SearchError> {
    let response: SearchResponse = serde_json::from_slice(body)?;
    Ok(response.results)
}
