//! Run configuration and durable file layout.
//!
//! All pipeline tunables live in one struct, supplied explicitly by the CLI
//! instead of being scattered as module constants.

use std::path::PathBuf;
use std::time::Duration;

/// Default worker pool width.
pub const DEFAULT_WORKERS: usize = 12;

/// Default attempt budget for each catalog call.
pub const DEFAULT_RETRIES: usize = 3;

/// Default fixed delay between attempts, in seconds.
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 2;

/// Default minimum character count for a lyric to be considered at all.
pub const DEFAULT_MIN_LYRIC_CHARS: usize = 100;

/// Default minimum count of surviving segments for acceptance.
pub const DEFAULT_MIN_SEGMENTS: usize = 6;

/// Default checkpoint flush cadence, in completed items.
pub const DEFAULT_FLUSH_EVERY: usize = 100;

/// Thresholds for the quality classifier.
#[derive(Clone, Copy, Debug)]
pub struct QualityLimits {
    pub min_chars: usize,
    pub min_segments: usize,
}

impl Default for QualityLimits {
    fn default() -> Self {
        Self {
            min_chars: DEFAULT_MIN_LYRIC_CHARS,
            min_segments: DEFAULT_MIN_SEGMENTS,
        }
    }
}

/// Full configuration for one pipeline run.
#[derive(Clone, Debug)]
pub struct HarvestConfig {
    /// Base URL of the catalog API, e.g. `http://localhost:3000`.
    pub api_base: String,
    /// Root directory for artifacts and progress files.
    pub output_root: PathBuf,
    pub workers: usize,
    pub retries: usize,
    pub retry_delay: Duration,
    pub limits: QualityLimits,
    /// Flush the outcome ledger every this many completed items.
    pub flush_every: usize,
}

impl HarvestConfig {
    pub fn lyrics_dir(&self) -> PathBuf {
        self.output_root.join("lyrics")
    }

    pub fn songs_dir(&self) -> PathBuf {
        self.output_root.join("songs")
    }

    pub fn rejected_ids_file(&self) -> PathBuf {
        self.output_root.join("rejected_ids.txt")
    }

    pub fn no_url_ids_file(&self) -> PathBuf {
        self.output_root.join("no_url_ids.txt")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.lyrics_dir())?;
        std::fs::create_dir_all(self.songs_dir())?;
        Ok(())
    }
}
