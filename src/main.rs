use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lyric_harvest::catalog::HttpCatalogClient;
use lyric_harvest::config::{self, HarvestConfig, QualityLimits};
use lyric_harvest::ledger::OutcomeLedger;
use lyric_harvest::pipeline::Pipeline;
use lyric_harvest::progress::{create_progress_bar, create_spinner, format_duration, set_log_only};
use lyric_harvest::store::ArtifactStore;

#[derive(Parser)]
#[command(name = "lyric-harvest")]
#[command(about = "Fetch, quality-filter and download catalog songs with usable lyrics")]
struct Args {
    /// Newline-delimited candidate song ids
    ids_file: PathBuf,

    /// Output root for artifacts and progress files
    output: PathBuf,

    /// Base URL of the catalog API
    #[arg(long, default_value = "http://localhost:3000")]
    api_base: String,

    #[arg(long, default_value_t = config::DEFAULT_WORKERS)]
    workers: usize,

    /// Attempt budget per catalog call
    #[arg(long, default_value_t = config::DEFAULT_RETRIES)]
    retries: usize,

    /// Fixed delay between attempts, in seconds
    #[arg(long, default_value_t = config::DEFAULT_RETRY_DELAY_SECS)]
    retry_delay_secs: u64,

    /// Minimum lyric length in characters
    #[arg(long, default_value_t = config::DEFAULT_MIN_LYRIC_CHARS)]
    min_lyric_chars: usize,

    /// Minimum surviving segments for acceptance
    #[arg(long, default_value_t = config::DEFAULT_MIN_SEGMENTS)]
    min_segments: usize,

    /// Flush progress sets every N completed items
    #[arg(long, default_value_t = config::DEFAULT_FLUSH_EVERY)]
    flush_every: usize,

    /// Hide progress bars for tail-friendly output
    #[arg(long)]
    log_only: bool,
}

fn read_candidate_ids(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        bail!("candidate ids file {} not found", path.display());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut clog = colog::default_builder();
    clog.filter(None, log::LevelFilter::Info);
    clog.init();

    set_log_only(args.log_only);

    let cfg = HarvestConfig {
        api_base: args.api_base,
        output_root: args.output,
        workers: args.workers,
        retries: args.retries,
        retry_delay: Duration::from_secs(args.retry_delay_secs),
        limits: QualityLimits {
            min_chars: args.min_lyric_chars,
            min_segments: args.min_segments,
        },
        flush_every: args.flush_every,
    };
    cfg.ensure_dirs()
        .with_context(|| format!("failed to create {}", cfg.output_root.display()))?;

    if cfg.workers > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(cfg.workers)
            .build_global()
            .context("failed to set worker pool size")?;
    }

    let start = Instant::now();

    let all_ids = read_candidate_ids(&args.ids_file)?;
    println!("Found {} candidate songs", all_ids.len());

    let ledger = Arc::new(OutcomeLedger::load(
        cfg.rejected_ids_file(),
        cfg.no_url_ids_file(),
        cfg.flush_every,
    )?);
    println!("Found {} songs with known bad lyrics", ledger.rejected_count());
    println!("Found {} songs with known unavailable URLs", ledger.no_url_count());

    let store = ArtifactStore::new(cfg.lyrics_dir(), cfg.songs_dir());
    let spinner = create_spinner("Scanning artifact directories");
    let index = store.scan()?;
    spinner.finish_with_message(format!(
        "Found {} lyric artifacts, {} audio artifacts",
        index.lyrics.len(),
        index.audio.len()
    ));

    let catalog = HttpCatalogClient::new(&cfg.api_base, cfg.retries, cfg.retry_delay);
    let pipeline = Pipeline::new(&catalog, &store, &ledger, cfg.limits);

    let work_set = pipeline.compute_work_set(&all_ids, &index);
    println!("Remaining songs to process: {}", work_set.len());

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || {
            eprintln!("\nInterrupted. Finishing in-flight songs and saving progress...");
            stop.store(true, Ordering::SeqCst);
        })
        .context("failed to install interrupt handler")?;
    }

    let bar = create_progress_bar(work_set.len() as u64, "Processing songs");
    let summary = pipeline.run(&work_set, &stop, &bar);
    bar.finish_and_clear();

    // Unconditional final flush; this is what makes progress survive a
    // restart after an interrupt.
    ledger.flush().context("final progress flush failed")?;

    if stop.load(Ordering::SeqCst) {
        println!(
            "\nRun interrupted: {} songs skipped, progress saved.",
            summary.skipped
        );
    }

    let final_index = store.scan()?;
    println!("\n{:=<60}", "");
    println!("Harvest finished");
    println!("  Lyrics accepted this run:  {}", summary.lyrics_accepted);
    println!("  Lyrics rejected this run:  {}", summary.lyrics_rejected);
    println!("  Audio downloaded this run: {}", summary.audio_downloaded);
    println!("  Retryable fetch failures:  {}", summary.lyrics_failed + summary.audio_failed);
    println!("  Total lyric artifacts:     {}", final_index.lyrics.len());
    println!("  Total audio artifacts:     {}", final_index.audio.len());
    println!("  Permanent rejects:         {}", ledger.rejected_count());
    println!("  Permanent no-URL ids:      {}", ledger.no_url_count());
    println!("  Elapsed: {}", format_duration(start.elapsed()));
    println!("{:=<60}", "");

    Ok(())
}
