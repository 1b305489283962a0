//! Durable outcome ledger.
//!
//! Two permanent sets of identifiers: quality-rejected lyrics and ids the
//! catalog has no download URL for. Loaded at startup, mutated by any worker,
//! flushed every N completed items and unconditionally at shutdown. Both sets
//! are append-only within a run; an id is never un-rejected except by
//! clearing the files by hand.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{Context, Result};
use rustc_hash::FxHashSet;

pub struct OutcomeLedger {
    rejected: Mutex<FxHashSet<String>>,
    no_url: Mutex<FxHashSet<String>>,
    rejected_path: PathBuf,
    no_url_path: PathBuf,
    completed: AtomicUsize,
    flush_every: usize,
}

fn load_id_set(path: &Path) -> Result<FxHashSet<String>> {
    if !path.exists() {
        return Ok(FxHashSet::default());
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

fn write_id_set(path: &Path, ids: &FxHashSet<String>) -> Result<()> {
    let mut sorted: Vec<&String> = ids.iter().collect();
    sorted.sort();
    let mut body = String::with_capacity(sorted.len() * 12);
    for id in sorted {
        body.push_str(id);
        body.push('\n');
    }
    // Temp-then-rename so an interrupt mid-flush never truncates the
    // previous ledger file.
    let tmp = path.with_extension("txt.tmp");
    fs::write(&tmp, body).with_context(|| format!("cannot write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("cannot commit {}", path.display()))?;
    Ok(())
}

impl OutcomeLedger {
    /// Loads both sets from disk; missing files mean empty sets.
    pub fn load(rejected_path: PathBuf, no_url_path: PathBuf, flush_every: usize) -> Result<Self> {
        let rejected = load_id_set(&rejected_path)?;
        let no_url = load_id_set(&no_url_path)?;
        Ok(Self {
            rejected: Mutex::new(rejected),
            no_url: Mutex::new(no_url),
            rejected_path,
            no_url_path,
            completed: AtomicUsize::new(0),
            flush_every: flush_every.max(1),
        })
    }

    pub fn is_rejected(&self, id: &str) -> bool {
        self.rejected.lock().unwrap().contains(id)
    }

    /// Marks the id rejected. Check and insert happen under one lock;
    /// returns true for the first marker.
    pub fn mark_rejected(&self, id: &str) -> bool {
        self.rejected.lock().unwrap().insert(id.to_string())
    }

    pub fn is_url_unavailable(&self, id: &str) -> bool {
        self.no_url.lock().unwrap().contains(id)
    }

    pub fn mark_url_unavailable(&self, id: &str) -> bool {
        self.no_url.lock().unwrap().insert(id.to_string())
    }

    pub fn rejected_count(&self) -> usize {
        self.rejected.lock().unwrap().len()
    }

    pub fn no_url_count(&self) -> usize {
        self.no_url.lock().unwrap().len()
    }

    pub fn rejected_snapshot(&self) -> FxHashSet<String> {
        self.rejected.lock().unwrap().clone()
    }

    /// Writes both sets durably. Safe to call from any thread.
    pub fn flush(&self) -> Result<()> {
        {
            let rejected = self.rejected.lock().unwrap();
            write_id_set(&self.rejected_path, &rejected)?;
        }
        let no_url = self.no_url.lock().unwrap();
        write_id_set(&self.no_url_path, &no_url)?;
        Ok(())
    }

    /// Counts a completed item and flushes at the configured cadence.
    /// Flush errors are logged, not fatal; the final flush still runs.
    pub fn note_completed(&self) {
        let done = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        if done % self.flush_every == 0 {
            if let Err(err) = self.flush() {
                log::error!("checkpoint flush failed: {err:#}");
            }
        }
    }
}
