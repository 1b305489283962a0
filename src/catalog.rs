//! Remote catalog API client.
//!
//! Two read endpoints (lyric-by-id, download-url-by-id) and one streaming
//! download, all with the same retry shape: a fixed attempt budget with a
//! fixed delay between attempts. Transport errors, non-200 HTTP statuses and
//! malformed bodies are transient and retried; an API-level "no data" verdict
//! (HTTP 200 with a non-ok `code`) is permanent and never retried. The caller
//! decides which permanent verdicts get remembered across runs.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Streaming download copy granularity.
const DOWNLOAD_CHUNK_SIZE: usize = 8192;

/// Attempt-local timeout for metadata calls.
const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// Attempt-local timeout for streaming downloads.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Raw lyric response body: `{code, lrc: {lyric}}`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct LyricPayload {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub lrc: Option<LrcBlock>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct LrcBlock {
    #[serde(default)]
    pub lyric: Option<String>,
}

impl LyricPayload {
    /// The nested lyric string, when present and non-empty.
    pub fn lyric_text(&self) -> Option<&str> {
        self.lrc
            .as_ref()?
            .lyric
            .as_deref()
            .filter(|s| !s.is_empty())
    }

    /// Builds a payload around the given lyric text. Test and fixture helper.
    pub fn from_lyric_text(text: &str) -> Self {
        Self {
            code: 200,
            lrc: Some(LrcBlock {
                lyric: Some(text.to_string()),
            }),
        }
    }
}

/// Short-lived reference to one audio binary. URLs expire, so a descriptor is
/// fetched fresh for every download attempt sequence.
#[derive(Clone, Debug, PartialEq)]
pub struct DownloadDescriptor {
    pub id: String,
    pub url: String,
    pub size: Option<u64>,
    pub media_type: String,
    pub bitrate: Option<u64>,
}

/// Outcome of a lyric fetch. `Absent` is an API-level "no data" verdict and is
/// permanent for this call; `Failed` means the retry budget was exhausted and
/// the identifier stays eligible for a future run.
#[derive(Clone, Debug, PartialEq)]
pub enum LyricFetch {
    Found(LyricPayload),
    Absent,
    Failed,
}

/// Outcome of a download-URL fetch. `Unavailable` is the permanent "catalog
/// has no URL" verdict that callers record across runs.
#[derive(Clone, Debug, PartialEq)]
pub enum UrlFetch {
    Available(DownloadDescriptor),
    Unavailable,
    Failed,
}

/// Seam between the pipeline and the remote catalog, so the state machine can
/// be driven by a stub in tests.
pub trait CatalogApi: Sync {
    fn fetch_lyric(&self, id: &str) -> LyricFetch;
    fn fetch_download_url(&self, id: &str) -> UrlFetch;
    /// Streams the descriptor's URL to `tmp_path`. On error the temp file is
    /// removed; success is reported only after the stream ends cleanly.
    fn download(&self, descriptor: &DownloadDescriptor, tmp_path: &Path) -> Result<u64>;
}

#[derive(Debug, Deserialize)]
struct UrlResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    data: Vec<UrlEntry>,
}

#[derive(Debug, Deserialize)]
struct UrlEntry {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(rename = "type", default)]
    media_type: Option<String>,
    #[serde(default)]
    br: Option<u64>,
}

/// Extracts a usable descriptor from a URL response body. `None` means the
/// API answered but has nothing usable for this id.
fn descriptor_from(body: UrlResponse, id: &str) -> Option<DownloadDescriptor> {
    if body.code != 200 {
        return None;
    }
    let entry = body.data.into_iter().next()?;
    let url = entry.url.filter(|u| !u.is_empty())?;
    Some(DownloadDescriptor {
        id: id.to_string(),
        url,
        size: entry.size,
        media_type: entry.media_type.unwrap_or_else(|| "mp3".to_string()),
        bitrate: entry.br,
    })
}

/// `ureq`-backed catalog client.
pub struct HttpCatalogClient {
    agent: ureq::Agent,
    download_agent: ureq::Agent,
    base: String,
    retries: usize,
    retry_delay: Duration,
}

impl HttpCatalogClient {
    pub fn new(api_base: &str, retries: usize, retry_delay: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(METADATA_TIMEOUT)
            .timeout_read(METADATA_TIMEOUT)
            .timeout_write(METADATA_TIMEOUT)
            .build();
        let download_agent = ureq::AgentBuilder::new()
            .timeout_connect(DOWNLOAD_TIMEOUT)
            .timeout_read(DOWNLOAD_TIMEOUT)
            .timeout_write(DOWNLOAD_TIMEOUT)
            .build();
        Self {
            agent,
            download_agent,
            base: api_base.trim_end_matches('/').to_string(),
            retries: retries.max(1),
            retry_delay,
        }
    }

    fn pause_before_retry(&self, attempt: usize) {
        if attempt + 1 < self.retries {
            std::thread::sleep(self.retry_delay);
        }
    }

    fn stream_once(&self, url: &str, tmp_path: &Path) -> Result<u64> {
        let response = self
            .download_agent
            .get(url)
            .call()
            .context("download request failed")?;
        let mut reader = response.into_reader();
        let mut file = File::create(tmp_path)
            .with_context(|| format!("failed to create {}", tmp_path.display()))?;
        let mut buf = [0u8; DOWNLOAD_CHUNK_SIZE];
        let mut written: u64 = 0;
        loop {
            let n = reader.read(&mut buf).context("download stream error")?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n])
                .with_context(|| format!("write failed at {}", tmp_path.display()))?;
            written += n as u64;
        }
        file.sync_all()
            .with_context(|| format!("fsync failed for {}", tmp_path.display()))?;
        Ok(written)
    }
}

impl CatalogApi for HttpCatalogClient {
    fn fetch_lyric(&self, id: &str) -> LyricFetch {
        let url = format!("{}/lyric?id={}", self.base, id);
        for attempt in 0..self.retries {
            match self.agent.get(&url).call() {
                Ok(response) => match response.into_json::<LyricPayload>() {
                    Ok(payload) if payload.code == 200 => return LyricFetch::Found(payload),
                    Ok(payload) => {
                        log::warn!("no lyric data for song {id} (code {})", payload.code);
                        return LyricFetch::Absent;
                    }
                    Err(err) => log::warn!("malformed lyric response for song {id}: {err}"),
                },
                Err(err) => log::warn!("lyric fetch failed for song {id}: {err}"),
            }
            self.pause_before_retry(attempt);
        }
        LyricFetch::Failed
    }

    fn fetch_download_url(&self, id: &str) -> UrlFetch {
        let url = format!("{}/song/url?id={}", self.base, id);
        for attempt in 0..self.retries {
            match self.agent.get(&url).call() {
                Ok(response) => match response.into_json::<UrlResponse>() {
                    Ok(body) => match descriptor_from(body, id) {
                        Some(descriptor) => return UrlFetch::Available(descriptor),
                        None => {
                            log::warn!("no download url for song {id}");
                            return UrlFetch::Unavailable;
                        }
                    },
                    Err(err) => log::warn!("malformed url response for song {id}: {err}"),
                },
                Err(err) => log::warn!("url fetch failed for song {id}: {err}"),
            }
            self.pause_before_retry(attempt);
        }
        UrlFetch::Failed
    }

    fn download(&self, descriptor: &DownloadDescriptor, tmp_path: &Path) -> Result<u64> {
        for attempt in 0..self.retries {
            match self.stream_once(&descriptor.url, tmp_path) {
                Ok(bytes) => return Ok(bytes),
                Err(err) => {
                    log::warn!(
                        "download attempt {}/{} failed for song {}: {err:#}",
                        attempt + 1,
                        self.retries,
                        descriptor.id
                    );
                    if tmp_path.exists() {
                        let _ = std::fs::remove_file(tmp_path);
                    }
                }
            }
            self.pause_before_retry(attempt);
        }
        bail!(
            "download failed for song {} after {} attempts",
            descriptor.id,
            self.retries
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lyric_payload_parses_nested_text() {
        let payload: LyricPayload =
            serde_json::from_str(r#"{"code":200,"lrc":{"lyric":"[00:01.00]hi"}}"#).unwrap();
        assert_eq!(payload.lyric_text(), Some("[00:01.00]hi"));
    }

    #[test]
    fn lyric_payload_tolerates_missing_blocks() {
        let payload: LyricPayload = serde_json::from_str(r#"{"code":404}"#).unwrap();
        assert_eq!(payload.code, 404);
        assert_eq!(payload.lyric_text(), None);

        let payload: LyricPayload = serde_json::from_str(r#"{"code":200,"lrc":{}}"#).unwrap();
        assert_eq!(payload.lyric_text(), None);
    }

    #[test]
    fn descriptor_requires_ok_code_and_url() {
        let body: UrlResponse =
            serde_json::from_str(r#"{"code":200,"data":[{"url":null}]}"#).unwrap();
        assert_eq!(descriptor_from(body, "1"), None);

        let body: UrlResponse = serde_json::from_str(r#"{"code":404,"data":[]}"#).unwrap();
        assert_eq!(descriptor_from(body, "1"), None);

        let body: UrlResponse = serde_json::from_str(r#"{"code":200,"data":[]}"#).unwrap();
        assert_eq!(descriptor_from(body, "1"), None);
    }

    #[test]
    fn descriptor_carries_metadata_and_defaults_media_type() {
        let body: UrlResponse = serde_json::from_str(
            r#"{"code":200,"data":[{"url":"http://cdn/x.m4a","size":4096,"type":"m4a","br":128000}]}"#,
        )
        .unwrap();
        let descriptor = descriptor_from(body, "42").unwrap();
        assert_eq!(descriptor.id, "42");
        assert_eq!(descriptor.url, "http://cdn/x.m4a");
        assert_eq!(descriptor.size, Some(4096));
        assert_eq!(descriptor.media_type, "m4a");
        assert_eq!(descriptor.bitrate, Some(128000));

        let body: UrlResponse =
            serde_json::from_str(r#"{"code":200,"data":[{"url":"http://cdn/y"}]}"#).unwrap();
        let descriptor = descriptor_from(body, "7").unwrap();
        assert_eq!(descriptor.media_type, "mp3");
        assert_eq!(descriptor.size, None);
    }
}
