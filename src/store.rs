//! Filesystem layout for completed artifacts.
//!
//! Lyric artifacts live at `lyrics/{id}.txt` and audio artifacts at
//! `songs/{id}.{ext}`. A lyric file is immutable once written; an audio file
//! becomes visible only through an atomic rename from its temp path, so a
//! crash mid-download leaves an orphaned `.tmp`, never a corrupt final file.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rustc_hash::FxHashSet;

/// Audio extensions the catalog serves.
pub const AUDIO_EXTENSIONS: [&str; 2] = ["mp3", "m4a"];

/// Ids reconstructed from the artifact directories at startup. Membership
/// tests during the run go against these sets instead of re-scanning.
#[derive(Debug, Default)]
pub struct LibraryIndex {
    pub lyrics: FxHashSet<String>,
    pub audio: FxHashSet<String>,
}

pub struct ArtifactStore {
    lyrics_dir: PathBuf,
    songs_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(lyrics_dir: PathBuf, songs_dir: PathBuf) -> Self {
        Self {
            lyrics_dir,
            songs_dir,
        }
    }

    pub fn lyric_path(&self, id: &str) -> PathBuf {
        self.lyrics_dir.join(format!("{id}.txt"))
    }

    pub fn has_lyric(&self, id: &str) -> bool {
        self.lyric_path(id).exists()
    }

    /// Writes a lyric artifact durably: temp file, fsync, rename. Callers
    /// must not call this when `has_lyric` is already true.
    pub fn write_lyric(&self, id: &str, text: &str) -> Result<()> {
        let final_path = self.lyric_path(id);
        let tmp_path = self.lyrics_dir.join(format!("{id}.txt.tmp"));
        {
            let mut file = fs::File::create(&tmp_path)
                .with_context(|| format!("failed to create {}", tmp_path.display()))?;
            file.write_all(text.as_bytes())
                .with_context(|| format!("failed to write {}", tmp_path.display()))?;
            file.sync_all()
                .with_context(|| format!("fsync failed for {}", tmp_path.display()))?;
        }
        fs::rename(&tmp_path, &final_path)
            .with_context(|| format!("failed to commit {}", final_path.display()))?;
        Ok(())
    }

    pub fn audio_path(&self, id: &str, ext: &str) -> PathBuf {
        self.songs_dir.join(format!("{id}.{ext}"))
    }

    /// Temp path for an in-flight download of the given final path.
    pub fn tmp_audio_path(&self, final_path: &Path) -> PathBuf {
        let mut name = final_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        name.push_str(".tmp");
        final_path.with_file_name(name)
    }

    /// First existing audio artifact for the id, probing each supported
    /// extension in order.
    pub fn has_audio(&self, id: &str) -> Option<PathBuf> {
        AUDIO_EXTENSIONS
            .iter()
            .map(|ext| self.audio_path(id, ext))
            .find(|path| path.exists())
    }

    /// Atomic commit of a finished download.
    pub fn commit_audio(&self, tmp_path: &Path, final_path: &Path) -> Result<()> {
        fs::rename(tmp_path, final_path)
            .with_context(|| format!("failed to commit {}", final_path.display()))
    }

    /// Completeness proof for an existing audio file. An unknown expected
    /// size passes; a size mismatch deletes the stale file and returns false
    /// so a fresh download is forced.
    pub fn is_complete(&self, path: &Path, expected_size: Option<u64>) -> bool {
        let expected = match expected_size {
            Some(size) => size,
            None => return true,
        };
        match fs::metadata(path) {
            Ok(meta) if meta.len() == expected => true,
            Ok(_) => {
                log::warn!("size mismatch for {}, removing stale file", path.display());
                if let Err(err) = fs::remove_file(path) {
                    log::error!("failed to remove stale {}: {err}", path.display());
                }
                false
            }
            Err(err) => {
                log::error!("cannot stat {}: {err}", path.display());
                false
            }
        }
    }

    /// Rebuilds the accepted/audio id sets by scanning both directories.
    /// Run once at startup; this is also the recovery path after a crash.
    pub fn scan(&self) -> Result<LibraryIndex> {
        let mut index = LibraryIndex::default();
        for entry in fs::read_dir(&self.lyrics_dir)
            .with_context(|| format!("cannot read {}", self.lyrics_dir.display()))?
        {
            let path = entry?.path();
            if path.extension().map_or(false, |ext| ext == "txt") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    index.lyrics.insert(stem.to_string());
                }
            }
        }
        for entry in fs::read_dir(&self.songs_dir)
            .with_context(|| format!("cannot read {}", self.songs_dir.display()))?
        {
            let path = entry?.path();
            let is_audio = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map_or(false, |ext| AUDIO_EXTENSIONS.contains(&ext));
            if is_audio {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    index.audio.insert(stem.to_string());
                }
            }
        }
        Ok(index)
    }
}
