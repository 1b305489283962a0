//! The fetch-classify-download pipeline.
//!
//! One state machine per identifier, evaluated in fixed order:
//!
//! 1. lyric artifact on disk -> lyric stage done, best-effort audio attempt;
//! 2. id in the rejected ledger -> terminal, no network;
//! 3. otherwise fetch the lyric, classify it, write the artifact on accept
//!    (then best-effort audio) or record the reject permanently.
//!
//! Fetch failures and API-level lyric absence are terminal for the run but
//! deliberately never recorded: upstream availability may change, so only a
//! classifier verdict or an explicit no-URL response is permanent.
//!
//! Identifiers are independent; the scheduler runs them on the global rayon
//! pool with no ordering guarantees. The outcome ledger is the only shared
//! mutable state and synchronizes internally.

use std::sync::atomic::{AtomicBool, Ordering};

use indicatif::ProgressBar;
use rayon::prelude::*;

use crate::catalog::{CatalogApi, DownloadDescriptor, LyricFetch, UrlFetch};
use crate::classify::{classify, Classification};
use crate::config::QualityLimits;
use crate::ledger::OutcomeLedger;
use crate::store::{ArtifactStore, LibraryIndex};

/// Lyric-stage outcome for one identifier in one run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LyricStage {
    /// Artifact already on disk; classification was not repeated.
    OnDisk,
    /// In the rejected ledger; nothing attempted.
    KnownRejected,
    /// Newly classified good and written.
    Accepted,
    /// Newly classified bad and recorded.
    Rejected,
    /// Fetch failed, API had no lyric, or a local write failed. Not recorded;
    /// eligible again next run.
    Failed,
}

/// Audio-stage outcome for one identifier in one run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AudioStage {
    Downloaded,
    AlreadyPresent,
    /// Catalog has no URL (known from the ledger or learned this run).
    NoUrl,
    /// Transient failure; eligible again next run.
    Failed,
    /// Lyric stage did not reach the audio attempt.
    NotAttempted,
}

#[derive(Clone, Copy, Debug)]
pub struct ItemReport {
    pub lyric: LyricStage,
    pub audio: AudioStage,
}

/// Aggregated per-run counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub lyrics_accepted: usize,
    pub lyrics_rejected: usize,
    pub lyrics_failed: usize,
    pub lyrics_on_disk: usize,
    pub known_rejected: usize,
    pub audio_downloaded: usize,
    pub audio_failed: usize,
    pub audio_no_url: usize,
    pub skipped: usize,
}

impl RunSummary {
    fn tally(&mut self, report: &ItemReport) {
        match report.lyric {
            LyricStage::OnDisk => self.lyrics_on_disk += 1,
            LyricStage::KnownRejected => self.known_rejected += 1,
            LyricStage::Accepted => self.lyrics_accepted += 1,
            LyricStage::Rejected => self.lyrics_rejected += 1,
            LyricStage::Failed => self.lyrics_failed += 1,
        }
        match report.audio {
            AudioStage::Downloaded => self.audio_downloaded += 1,
            AudioStage::Failed => self.audio_failed += 1,
            AudioStage::NoUrl => self.audio_no_url += 1,
            AudioStage::AlreadyPresent | AudioStage::NotAttempted => {}
        }
    }
}

pub struct Pipeline<'a, C: CatalogApi> {
    catalog: &'a C,
    store: &'a ArtifactStore,
    ledger: &'a OutcomeLedger,
    limits: QualityLimits,
}

impl<'a, C: CatalogApi> Pipeline<'a, C> {
    pub fn new(
        catalog: &'a C,
        store: &'a ArtifactStore,
        ledger: &'a OutcomeLedger,
        limits: QualityLimits,
    ) -> Self {
        Self {
            catalog,
            store,
            ledger,
            limits,
        }
    }

    /// Work set for this run: everything except fully-done items (lyric AND
    /// audio on disk) and known rejects. Lyric-only items stay in so the
    /// audio attempt can be retried; state 1 guards against lyric re-work.
    pub fn compute_work_set(&self, all_ids: &[String], index: &LibraryIndex) -> Vec<String> {
        let rejected = self.ledger.rejected_snapshot();
        all_ids
            .iter()
            .filter(|id| {
                let fully_done = index.lyrics.contains(*id) && index.audio.contains(*id);
                !fully_done && !rejected.contains(*id)
            })
            .cloned()
            .collect()
    }

    /// Best-effort audio stage. Never touches lyric status; transient
    /// failures are not recorded anywhere.
    fn try_download(&self, id: &str) -> AudioStage {
        if self.store.has_audio(id).is_some() {
            return AudioStage::AlreadyPresent;
        }
        if self.ledger.is_url_unavailable(id) {
            return AudioStage::NoUrl;
        }
        match self.catalog.fetch_download_url(id) {
            UrlFetch::Available(descriptor) => self.download_audio(&descriptor),
            UrlFetch::Unavailable => {
                self.ledger.mark_url_unavailable(id);
                AudioStage::NoUrl
            }
            UrlFetch::Failed => AudioStage::Failed,
        }
    }

    fn download_audio(&self, descriptor: &DownloadDescriptor) -> AudioStage {
        let final_path = self.store.audio_path(&descriptor.id, &descriptor.media_type);
        if final_path.exists() && self.store.is_complete(&final_path, descriptor.size) {
            return AudioStage::AlreadyPresent;
        }
        let tmp_path = self.store.tmp_audio_path(&final_path);
        match self.catalog.download(descriptor, &tmp_path) {
            Ok(_) => match self.store.commit_audio(&tmp_path, &final_path) {
                Ok(()) => AudioStage::Downloaded,
                Err(err) => {
                    log::error!("audio commit failed for song {}: {err:#}", descriptor.id);
                    let _ = std::fs::remove_file(&tmp_path);
                    AudioStage::Failed
                }
            },
            Err(err) => {
                log::warn!("audio download failed for song {}: {err:#}", descriptor.id);
                AudioStage::Failed
            }
        }
    }

    /// Runs the state machine for one identifier.
    pub fn process_song(&self, id: &str) -> ItemReport {
        if self.store.has_lyric(id) {
            return ItemReport {
                lyric: LyricStage::OnDisk,
                audio: self.try_download(id),
            };
        }

        if self.ledger.is_rejected(id) {
            return ItemReport {
                lyric: LyricStage::KnownRejected,
                audio: AudioStage::NotAttempted,
            };
        }

        match self.catalog.fetch_lyric(id) {
            LyricFetch::Found(payload) => match classify(&payload, &self.limits) {
                Classification::Accepted(text) => {
                    // The artifact must be durable before the dependent
                    // download step.
                    if let Err(err) = self.store.write_lyric(id, &text) {
                        log::error!("lyric write failed for song {id}: {err:#}");
                        return ItemReport {
                            lyric: LyricStage::Failed,
                            audio: AudioStage::NotAttempted,
                        };
                    }
                    ItemReport {
                        lyric: LyricStage::Accepted,
                        audio: self.try_download(id),
                    }
                }
                Classification::Rejected => {
                    self.ledger.mark_rejected(id);
                    ItemReport {
                        lyric: LyricStage::Rejected,
                        audio: AudioStage::NotAttempted,
                    }
                }
            },
            LyricFetch::Absent | LyricFetch::Failed => ItemReport {
                lyric: LyricStage::Failed,
                audio: AudioStage::NotAttempted,
            },
        }
    }

    /// Drives the work set on the global rayon pool. The stop flag halts
    /// dispatch of new items; in-flight items finish normally. Checkpoint
    /// flushes happen through the ledger's completion counter; the final
    /// flush is the caller's responsibility and unconditional.
    pub fn run(&self, work_set: &[String], stop: &AtomicBool, bar: &ProgressBar) -> RunSummary {
        let reports: Vec<Option<ItemReport>> = work_set
            .par_iter()
            .map(|id| {
                if stop.load(Ordering::SeqCst) {
                    return None;
                }
                let report = self.process_song(id);
                self.ledger.note_completed();
                bar.inc(1);
                Some(report)
            })
            .collect();

        let mut summary = RunSummary::default();
        for report in &reports {
            match report {
                Some(report) => summary.tally(report),
                None => summary.skipped += 1,
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::LyricPayload;
    use anyhow::Result;
    use std::collections::HashMap;
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    struct StubCatalog {
        lyrics: HashMap<String, LyricFetch>,
        urls: HashMap<String, UrlFetch>,
        audio_body: Vec<u8>,
        lyric_calls: AtomicUsize,
        url_calls: AtomicUsize,
    }

    impl StubCatalog {
        fn new() -> Self {
            Self {
                lyrics: HashMap::new(),
                urls: HashMap::new(),
                audio_body: b"audio".to_vec(),
                lyric_calls: AtomicUsize::new(0),
                url_calls: AtomicUsize::new(0),
            }
        }

        fn with_lyric(mut self, id: &str, fetch: LyricFetch) -> Self {
            self.lyrics.insert(id.to_string(), fetch);
            self
        }

        fn with_url(mut self, id: &str, fetch: UrlFetch) -> Self {
            self.urls.insert(id.to_string(), fetch);
            self
        }

        fn lyric_calls(&self) -> usize {
            self.lyric_calls.load(Ordering::SeqCst)
        }

        fn url_calls(&self) -> usize {
            self.url_calls.load(Ordering::SeqCst)
        }
    }

    impl CatalogApi for StubCatalog {
        fn fetch_lyric(&self, id: &str) -> LyricFetch {
            self.lyric_calls.fetch_add(1, Ordering::SeqCst);
            self.lyrics.get(id).cloned().unwrap_or(LyricFetch::Failed)
        }

        fn fetch_download_url(&self, id: &str) -> UrlFetch {
            self.url_calls.fetch_add(1, Ordering::SeqCst);
            self.urls.get(id).cloned().unwrap_or(UrlFetch::Failed)
        }

        fn download(&self, _descriptor: &DownloadDescriptor, tmp_path: &Path) -> Result<u64> {
            fs::write(tmp_path, &self.audio_body)?;
            Ok(self.audio_body.len() as u64)
        }
    }

    struct Fixture {
        _dir: TempDir,
        store: ArtifactStore,
        ledger: OutcomeLedger,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let lyrics = dir.path().join("lyrics");
        let songs = dir.path().join("songs");
        fs::create_dir_all(&lyrics).unwrap();
        fs::create_dir_all(&songs).unwrap();
        let ledger = OutcomeLedger::load(
            dir.path().join("rejected_ids.txt"),
            dir.path().join("no_url_ids.txt"),
            100,
        )
        .unwrap();
        Fixture {
            _dir: dir,
            store: ArtifactStore::new(lyrics, songs),
            ledger,
        }
    }

    fn limits() -> QualityLimits {
        QualityLimits {
            min_chars: 50,
            min_segments: 3,
        }
    }

    fn good_lyric() -> LyricFetch {
        let text = (1..=6)
            .map(|i| format!("[00:0{i}.00]english line number {i} here"))
            .collect::<Vec<_>>()
            .join("\n");
        LyricFetch::Found(LyricPayload::from_lyric_text(&text))
    }

    fn descriptor(id: &str) -> DownloadDescriptor {
        DownloadDescriptor {
            id: id.to_string(),
            url: format!("http://cdn/{id}.mp3"),
            size: Some(5),
            media_type: "mp3".to_string(),
            bitrate: None,
        }
    }

    #[test]
    fn work_set_excludes_fully_done_and_rejected() {
        let fx = fixture();
        let catalog = StubCatalog::new();
        let pipeline = Pipeline::new(&catalog, &fx.store, &fx.ledger, limits());

        fx.ledger.mark_rejected("3");
        let mut index = LibraryIndex::default();
        index.lyrics.insert("1".to_string()); // lyric only: stays in
        index.lyrics.insert("2".to_string());
        index.audio.insert("2".to_string()); // fully done: out

        let all: Vec<String> = ["1", "2", "3", "4"].iter().map(|s| s.to_string()).collect();
        let work = pipeline.compute_work_set(&all, &index);
        assert_eq!(work, vec!["1".to_string(), "4".to_string()]);
    }

    #[test]
    fn known_rejected_makes_no_network_calls() {
        let fx = fixture();
        let catalog = StubCatalog::new();
        let pipeline = Pipeline::new(&catalog, &fx.store, &fx.ledger, limits());

        fx.ledger.mark_rejected("8");
        let report = pipeline.process_song("8");
        assert_eq!(report.lyric, LyricStage::KnownRejected);
        assert_eq!(report.audio, AudioStage::NotAttempted);
        assert_eq!(catalog.lyric_calls(), 0);
        assert_eq!(catalog.url_calls(), 0);
    }

    #[test]
    fn absent_lyric_is_terminal_but_not_recorded() {
        let fx = fixture();
        let catalog = StubCatalog::new().with_lyric("8", LyricFetch::Absent);
        let pipeline = Pipeline::new(&catalog, &fx.store, &fx.ledger, limits());

        let report = pipeline.process_song("8");
        assert_eq!(report.lyric, LyricStage::Failed);
        assert!(!fx.ledger.is_rejected("8"));
        assert!(!fx.store.has_lyric("8"));
    }

    #[test]
    fn quality_reject_is_recorded_permanently() {
        let fx = fixture();
        let catalog = StubCatalog::new()
            .with_lyric("8", LyricFetch::Found(LyricPayload::from_lyric_text("too short")));
        let pipeline = Pipeline::new(&catalog, &fx.store, &fx.ledger, limits());

        let report = pipeline.process_song("8");
        assert_eq!(report.lyric, LyricStage::Rejected);
        assert!(fx.ledger.is_rejected("8"));
        assert!(!fx.store.has_lyric("8"));
        assert_eq!(catalog.url_calls(), 0);
    }

    #[test]
    fn accepted_lyric_writes_artifact_then_downloads_audio() {
        let fx = fixture();
        let catalog = StubCatalog::new()
            .with_lyric("8", good_lyric())
            .with_url("8", UrlFetch::Available(descriptor("8")));
        let pipeline = Pipeline::new(&catalog, &fx.store, &fx.ledger, limits());

        let report = pipeline.process_song("8");
        assert_eq!(report.lyric, LyricStage::Accepted);
        assert_eq!(report.audio, AudioStage::Downloaded);
        assert!(fx.store.has_lyric("8"));
        let audio_path = fx.store.audio_path("8", "mp3");
        assert_eq!(fs::read(&audio_path).unwrap(), b"audio");
        assert!(!fx.ledger.is_rejected("8"));
    }

    #[test]
    fn no_url_verdict_is_recorded_and_not_refetched() {
        let fx = fixture();
        let catalog = StubCatalog::new()
            .with_lyric("8", good_lyric())
            .with_url("8", UrlFetch::Unavailable);
        let pipeline = Pipeline::new(&catalog, &fx.store, &fx.ledger, limits());

        let report = pipeline.process_song("8");
        assert_eq!(report.lyric, LyricStage::Accepted);
        assert_eq!(report.audio, AudioStage::NoUrl);
        assert!(fx.ledger.is_url_unavailable("8"));
        assert_eq!(catalog.url_calls(), 1);

        // Next run: lyric on disk, url known-unavailable, no url fetch.
        let report = pipeline.process_song("8");
        assert_eq!(report.lyric, LyricStage::OnDisk);
        assert_eq!(report.audio, AudioStage::NoUrl);
        assert_eq!(catalog.url_calls(), 1);
    }

    #[test]
    fn lyric_on_disk_skips_classification_and_attempts_audio() {
        let fx = fixture();
        let catalog = StubCatalog::new().with_url("8", UrlFetch::Available(descriptor("8")));
        let pipeline = Pipeline::new(&catalog, &fx.store, &fx.ledger, limits());

        fx.store.write_lyric("8", "[00:01.00]kept").unwrap();
        let report = pipeline.process_song("8");
        assert_eq!(report.lyric, LyricStage::OnDisk);
        assert_eq!(report.audio, AudioStage::Downloaded);
        assert_eq!(catalog.lyric_calls(), 0);
        // Existing lyric artifact untouched.
        assert_eq!(
            fs::read_to_string(fx.store.lyric_path("8")).unwrap(),
            "[00:01.00]kept"
        );
    }

    #[test]
    fn transient_url_failure_leaves_id_eligible() {
        let fx = fixture();
        let catalog = StubCatalog::new()
            .with_lyric("8", good_lyric())
            .with_url("8", UrlFetch::Failed);
        let pipeline = Pipeline::new(&catalog, &fx.store, &fx.ledger, limits());

        let report = pipeline.process_song("8");
        assert_eq!(report.lyric, LyricStage::Accepted);
        assert_eq!(report.audio, AudioStage::Failed);
        assert!(!fx.ledger.is_url_unavailable("8"));
    }

    #[test]
    fn completed_run_reaches_a_fixed_point() {
        let fx = fixture();
        let catalog = StubCatalog::new()
            .with_lyric("1", good_lyric())
            .with_url("1", UrlFetch::Available(descriptor("1")));
        let pipeline = Pipeline::new(&catalog, &fx.store, &fx.ledger, limits());

        let all = vec!["1".to_string()];
        let index = fx.store.scan().unwrap();
        let work = pipeline.compute_work_set(&all, &index);
        assert_eq!(work.len(), 1);

        let stop = AtomicBool::new(false);
        let bar = ProgressBar::hidden();
        let summary = pipeline.run(&work, &stop, &bar);
        assert_eq!(summary.lyrics_accepted, 1);
        assert_eq!(summary.audio_downloaded, 1);

        // Re-scan: nothing left to do, and a second run changes nothing.
        let index = fx.store.scan().unwrap();
        let work = pipeline.compute_work_set(&all, &index);
        assert!(work.is_empty());
    }

    #[test]
    fn stop_flag_skips_remaining_items() {
        let fx = fixture();
        let catalog = StubCatalog::new();
        let pipeline = Pipeline::new(&catalog, &fx.store, &fx.ledger, limits());

        let work: Vec<String> = (0..10).map(|i| i.to_string()).collect();
        let stop = AtomicBool::new(true);
        let bar = ProgressBar::hidden();
        let summary = pipeline.run(&work, &stop, &bar);
        assert_eq!(summary.skipped, 10);
        assert_eq!(catalog.lyric_calls(), 0);
    }
}
