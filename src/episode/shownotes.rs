// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::TryStreamExt;
use html_escape::{encode_double_quoted_attribute, encode_text};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ShownotesError;
use crate::feed::{Channel, Episode};
use crate::http::HttpClient;

use super::download::TaskOutcome;
use super::partial::{PartialFile, partial_path};

/// Images are cached across episodes; the cache is dropped once it grows past this
const IMAGE_CACHE_LIMIT: usize = 500;

/// Renders the shownotes page of an episode
#[async_trait]
pub trait ShownotesRenderer: Send + Sync {
    async fn render(&self, episode: &Episode, channel: &Channel) -> Result<String, ShownotesError>;
}

/// Renders standalone HTML shownotes with the cover image inlined
///
/// The image is embedded as a `data:` URI so the page keeps working when the
/// original image link dies.
pub struct HtmlShownotes<C> {
    client: C,
    images: Mutex<HashMap<String, String>>,
}

impl<C: HttpClient> HtmlShownotes<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            images: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch an image as a data URI; failures only drop the image
    async fn image_data_uri(&self, url: &str) -> Option<String> {
        if let Some(cached) = self.images.lock().await.get(url) {
            return Some(cached.clone());
        }

        let data_uri = match self.fetch_image(url).await {
            Ok(data_uri) => data_uri,
            Err(reason) => {
                warn!(url, %reason, "Failed to fetch shownotes image");
                return None;
            }
        };

        let mut images = self.images.lock().await;
        if images.len() >= IMAGE_CACHE_LIMIT {
            images.clear();
        }
        images.insert(url.to_string(), data_uri.clone());

        Some(data_uri)
    }

    async fn fetch_image(&self, url: &str) -> Result<String, String> {
        let response = self.client.get_stream(url).await.map_err(|e| e.to_string())?;
        if response.status != 200 {
            return Err(format!("HTTP error {}", response.status));
        }

        let content_type = response
            .content_type
            .unwrap_or_else(|| "image/jpeg".to_string());
        let bytes: Vec<u8> = response
            .body
            .map_ok(|chunk| chunk.to_vec())
            .try_concat()
            .await
            .map_err(|e| e.to_string())?;

        Ok(format!("data:{};base64,{}", content_type, STANDARD.encode(bytes)))
    }
}

#[async_trait]
impl<C: HttpClient> ShownotesRenderer for HtmlShownotes<C> {
    async fn render(&self, episode: &Episode, channel: &Channel) -> Result<String, ShownotesError> {
        let image_url = episode.image_url.as_ref().or(channel.image_url.as_ref());
        let image = match image_url {
            Some(url) => self.image_data_uri(url.as_str()).await,
            None => None,
        };

        Ok(render_html(episode, channel, image.as_deref()))
    }
}

fn property_html(label: &str, value: Option<String>) -> String {
    match value {
        Some(value) => format!(
            r#"<span class="property"><span class="label">{}</span> {}</span>"#,
            label,
            encode_text(&value)
        ),
        None => String::new(),
    }
}

fn render_html(episode: &Episode, channel: &Channel, image: Option<&str>) -> String {
    let title = encode_text(&episode.title);
    let image_html = image
        .map(|src| {
            format!(
                r#"<img alt="{}" src="{}" height="100">"#,
                encode_double_quoted_attribute(&episode.title),
                encode_double_quoted_attribute(src)
            )
        })
        .unwrap_or_default();

    let properties = [
        property_html(
            "Published",
            episode.pub_date.map(|d| d.format("%a %b %d %Y").to_string()),
        ),
        property_html("Duration", episode.duration.clone()),
        property_html("Size", episode.size.clone()),
        property_html("Episode", episode.episode_number.map(|n| n.to_string())),
    ]
    .concat();

    // The description is the feed's own HTML and is embedded as-is.
    format!(
        r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>{title}</title>
  <style>
    body {{ font-family: sans-serif; max-width: 48rem; margin: 2rem auto; padding: 0 1rem; }}
    header {{ display: flex; gap: 1rem; align-items: center; }}
    img {{ border-radius: 0.5rem; }}
    .property {{ margin-right: 1rem; color: #555; }}
    .label {{ font-weight: bold; }}
    pre {{ white-space: pre-wrap; font-size: 0.8rem; }}
  </style>
</head>
<body>
  <header>
    {image_html}
    <div>
      <h1>{title}</h1>
      <p>{channel_title}</p>
    </div>
  </header>
  <div>{properties}</div>
  <div class="description">{description}</div>
  <details>
    <summary>Details</summary>
    <pre>{raw}</pre>
  </details>
  <footer><a href="https://github.com/johlar/poddy">Poddy {version}</a></footer>
</body>
</html>
"#,
        channel_title = encode_text(&channel.title),
        description = episode.description,
        raw = encode_text(&episode.raw),
        version = env!("CARGO_PKG_VERSION"),
    )
}

/// Render shownotes for an episode and write them to `target`
///
/// An existing `target` is left alone and reported as
/// [`TaskOutcome::AlreadyExists`].
pub async fn save_shownotes(
    renderer: &dyn ShownotesRenderer,
    episode: &Episode,
    channel: &Channel,
    target: &Path,
    cancel: &CancellationToken,
) -> Result<TaskOutcome, ShownotesError> {
    if target.exists() {
        debug!(path = %target.display(), "Shownotes already present, skipping");
        return Ok(TaskOutcome::AlreadyExists);
    }

    let html = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            return Err(ShownotesError::Cancelled {
                title: episode.title.clone(),
            });
        }
        html = renderer.render(episode, channel) => html?,
    };

    let partial = PartialFile::new(partial_path(target));
    tokio::fs::write(partial.path(), html.as_bytes())
        .await
        .map_err(|e| ShownotesError::WriteFailed {
            path: partial.path().to_path_buf(),
            source: e,
        })?;

    let partial_location = partial.path().to_path_buf();
    partial
        .finish(target)
        .await
        .map_err(|e| ShownotesError::RenameFailed {
            from: partial_location,
            source: e,
        })?;

    Ok(TaskOutcome::Completed {
        bytes: html.len() as u64,
    })
}
