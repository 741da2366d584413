// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::Path;

use futures::StreamExt;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::DownloadError;
use crate::feed::Episode;
use crate::http::HttpClient;
use crate::progress::{ProgressEvent, SharedProgressReporter};

use super::partial::{PartialFile, partial_path};

/// How a download task was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The file was written, `bytes` long
    Completed { bytes: u64 },
    /// The target file was already present; nothing was transferred
    AlreadyExists,
}

/// Download an episode's enclosure to `target`
///
/// The body is streamed into `<target>.tmp` and renamed onto `target` once
/// complete. The temp file is removed on failure and on cancellation, and a
/// cancelled transfer resolves to [`DownloadError::Cancelled`].
pub async fn download_enclosure<C: HttpClient + ?Sized>(
    client: &C,
    episode: &Episode,
    target: &Path,
    reporter: &SharedProgressReporter,
    cancel: &CancellationToken,
) -> Result<TaskOutcome, DownloadError> {
    if target.exists() {
        debug!(path = %target.display(), "Enclosure already present, skipping");
        return Ok(TaskOutcome::AlreadyExists);
    }

    let url = episode.enclosure.url.as_str();
    let cancelled = || DownloadError::Cancelled {
        url: url.to_string(),
    };

    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(cancelled()),
        response = client.get_stream(url) => response.map_err(|e| DownloadError::HttpFailed {
            url: url.to_string(),
            source: e,
        })?,
    };

    if response.status >= 400 {
        return Err(DownloadError::HttpStatus {
            url: url.to_string(),
            status: response.status,
        });
    }

    reporter.report(ProgressEvent::DownloadStarting {
        guid: episode.guid.clone(),
        episode_title: episode.title.clone(),
        content_length: response.content_length,
    });

    let partial = PartialFile::new(partial_path(target));
    let mut file = File::create(partial.path())
        .await
        .map_err(|e| DownloadError::FileCreateFailed {
            path: partial.path().to_path_buf(),
            source: e,
        })?;

    let mut bytes_downloaded: u64 = 0;
    let mut stream = response.body;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled()),
            next = stream.next() => next,
        };

        let Some(chunk_result) = next else {
            break;
        };

        let chunk = chunk_result.map_err(|e| DownloadError::StreamFailed {
            url: url.to_string(),
            source: e,
        })?;

        file.write_all(&chunk)
            .await
            .map_err(|e| DownloadError::FileWriteFailed {
                path: partial.path().to_path_buf(),
                source: e,
            })?;

        bytes_downloaded += chunk.len() as u64;

        reporter.report(ProgressEvent::DownloadProgress {
            guid: episode.guid.clone(),
            episode_title: episode.title.clone(),
            bytes_downloaded,
            total_bytes: response.content_length,
        });
    }

    file.flush()
        .await
        .map_err(|e| DownloadError::FileWriteFailed {
            path: partial.path().to_path_buf(),
            source: e,
        })?;
    drop(file);

    let partial_location = partial.path().to_path_buf();
    partial
        .finish(target)
        .await
        .map_err(|e| DownloadError::RenameFailed {
            from: partial_location,
            source: e,
        })?;

    reporter.report(ProgressEvent::DownloadCompleted {
        guid: episode.guid.clone(),
        episode_title: episode.title.clone(),
        bytes_downloaded,
    });

    Ok(TaskOutcome::Completed {
        bytes: bytes_downloaded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::Enclosure;
    use crate::http::{ByteStream, HttpResponse};
    use crate::progress::NoopReporter;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::time::Duration;

    use tempfile::tempdir;
    use url::Url;

    struct MockHttpClient {
        response_data: Vec<u8>,
        status: u16,
        /// Never finish the body after the first chunk
        stall: bool,
    }

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn get_bytes(&self, _url: &str) -> Result<Bytes, reqwest::Error> {
            Ok(Bytes::from(self.response_data.clone()))
        }

        async fn get_stream(&self, _url: &str) -> Result<HttpResponse, reqwest::Error> {
            let data = self.response_data.clone();
            let len = data.len() as u64;

            let first = futures::stream::once(async move { Ok(Bytes::from(data)) });
            let body: ByteStream = if self.stall {
                Box::pin(first.chain(futures::stream::pending()))
            } else {
                Box::pin(first)
            };

            Ok(HttpResponse {
                status: self.status,
                content_length: Some(len),
                content_type: Some("audio/mpeg".to_string()),
                body,
            })
        }
    }

    fn make_episode() -> Episode {
        Episode {
            guid: "test-guid".to_string(),
            title: "Test Episode".to_string(),
            pub_date: None,
            enclosure: Enclosure {
                url: Url::parse("https://example.com/episode.mp3").unwrap(),
                length: Some(1000),
                mime_type: Some("audio/mpeg".to_string()),
            },
            duration: None,
            size: None,
            episode_number: None,
            description: String::new(),
            image_url: None,
            raw: String::new(),
        }
    }

    fn client(data: &[u8], status: u16) -> MockHttpClient {
        MockHttpClient {
            response_data: data.to_vec(),
            status,
            stall: false,
        }
    }

    #[tokio::test]
    async fn download_writes_file_and_removes_partial() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("episode.mp3");

        let outcome = download_enclosure(
            &client(b"test audio content", 200),
            &make_episode(),
            &target,
            &NoopReporter::shared(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome, TaskOutcome::Completed { bytes: 18 });
        assert_eq!(std::fs::read(&target).unwrap(), b"test audio content");
        assert!(!partial_path(&target).exists());
    }

    #[tokio::test]
    async fn download_skips_existing_target() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("episode.mp3");
        std::fs::write(&target, b"already here").unwrap();

        let outcome = download_enclosure(
            &client(b"new content", 200),
            &make_episode(),
            &target,
            &NoopReporter::shared(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome, TaskOutcome::AlreadyExists);
        assert_eq!(std::fs::read(&target).unwrap(), b"already here");
    }

    #[tokio::test]
    async fn download_fails_on_http_error() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("episode.mp3");

        let result = download_enclosure(
            &client(b"Not Found", 404),
            &make_episode(),
            &target,
            &NoopReporter::shared(),
            &CancellationToken::new(),
        )
        .await;

        match result.unwrap_err() {
            DownloadError::HttpStatus { status, .. } => assert_eq!(status, 404),
            other => panic!("Expected HttpStatus error, got {other:?}"),
        }
        assert!(!target.exists());
        assert!(!partial_path(&target).exists());
    }

    #[tokio::test]
    async fn download_is_not_started_when_already_cancelled() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("episode.mp3");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = download_enclosure(
            &client(b"audio", 200),
            &make_episode(),
            &target,
            &NoopReporter::shared(),
            &cancel,
        )
        .await;

        assert!(matches!(result, Err(DownloadError::Cancelled { .. })));
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn cancelling_mid_transfer_removes_partial_file() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("episode.mp3");
        let cancel = CancellationToken::new();
        let stalling = MockHttpClient {
            response_data: b"first chunk".to_vec(),
            status: 200,
            stall: true,
        };

        let canceller = {
            let cancel = cancel.clone();
            let partial = partial_path(&target);
            async move {
                while !partial.exists() {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                cancel.cancel();
            }
        };

        let episode = make_episode();
        let reporter = NoopReporter::shared();
        let (result, ()) = tokio::join!(
            download_enclosure(&stalling, &episode, &target, &reporter, &cancel),
            canceller
        );

        assert!(matches!(result, Err(DownloadError::Cancelled { .. })));
        assert!(!target.exists());
        assert!(!partial_path(&target).exists());
    }
}
