use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::core::config::SyncSettings;
use crate::core::error::{SyncError, SyncResult};
use crate::core::manifest::{scan_directory, Manifest};
use crate::core::planner::{plan_concurrent, FetchReason, SyncAction, SyncPlan};
use crate::core::progress::{Phase, ProgressAggregator};
use crate::core::transfer::{SessionReport, TransferOrchestrator};

const DEFAULT_REPORT_FILE: &str = "files_report.json";
const PROGRESS_TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Serialize)]
pub struct CheckSummary {
    pub files: usize,
    pub up_to_date: usize,
    pub missing: Vec<String>,
    pub mismatched: Vec<String>,
    pub unreadable: Vec<String>,
    pub bytes_to_fetch: u64,
}

impl CheckSummary {
    fn from_plan(plan: &SyncPlan) -> Self {
        let mut summary = CheckSummary {
            files: plan.actions().len(),
            up_to_date: plan.skip_count(),
            missing: Vec::new(),
            mismatched: Vec::new(),
            unreadable: Vec::new(),
            bytes_to_fetch: plan.fetch_bytes(),
        };
        for action in plan.actions() {
            if let SyncAction::Fetch { record, reason } = action {
                let bucket = match reason {
                    FetchReason::Missing => &mut summary.missing,
                    FetchReason::Mismatch => &mut summary.mismatched,
                    FetchReason::ReadError => &mut summary.unreadable,
                };
                bucket.push(record.path.clone());
            }
        }
        summary
    }

    pub fn is_up_to_date(&self) -> bool {
        self.up_to_date == self.files
    }
}

// ─── scan ───

/// Fingerprint `dir` and write the manifest report; returns where it went.
pub async fn scan(dir: PathBuf, output: Option<PathBuf>) -> SyncResult<PathBuf> {
    let output = output.unwrap_or_else(|| PathBuf::from(DEFAULT_REPORT_FILE));

    let document = {
        let dir = dir.clone();
        tokio::task::spawn_blocking(move || scan_directory(&dir))
            .await
            .map_err(|e| SyncError::Other(format!("scan task failed: {e}")))??
    };

    document.write_to(&output).await?;
    info!(
        "Report for {:?} written to {:?} ({} files)",
        dir,
        output,
        document.files.len()
    );
    Ok(output)
}

// ─── check ───

async fn load_manifest(settings: &SyncSettings) -> SyncResult<Manifest> {
    Manifest::load(settings.manifest_path(), settings.aggregate_policy()).await
}

/// Plan against the destination without fetching anything.
pub async fn check(settings: &SyncSettings) -> SyncResult<CheckSummary> {
    let manifest = load_manifest(settings).await?;
    let plan = plan_concurrent(
        &manifest,
        settings.destination_root(),
        settings.transfer_options().concurrency,
        None,
    )
    .await;
    Ok(CheckSummary::from_plan(&plan))
}

// ─── sync ───

/// Full session: load, plan, transfer. `progress` sees both phases.
pub async fn sync(
    settings: &SyncSettings,
    progress: Arc<ProgressAggregator>,
    cancel: CancellationToken,
) -> SyncResult<SessionReport> {
    let manifest = load_manifest(settings).await?;
    let options = settings.transfer_options();
    let destination = settings.destination_root();

    let plan = plan_concurrent(
        &manifest,
        destination,
        options.concurrency,
        Some(progress.as_ref()),
    )
    .await;

    let resolver = settings.resolver()?;
    TransferOrchestrator::new(options)?
        .with_cancellation(cancel.child_token())
        .observe(progress)
        .execute(&plan, destination, resolver.as_ref())
        .await
}

/// `sync` with a terminal progress bar and Ctrl-C handling.
pub async fn sync_interactive(settings: &SyncSettings) -> SyncResult<SessionReport> {
    let progress = Arc::new(ProgressAggregator::new());
    let cancel = CancellationToken::new();

    let ctrl_c = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, finishing in-flight work");
                cancel.cancel();
            }
        }
    });

    let bar = progress_bar();
    let painter = tokio::spawn(paint_progress(bar.clone(), progress.clone()));

    let result = sync(settings, progress.clone(), cancel).await;

    painter.abort();
    ctrl_c.abort();
    let totals = progress.snapshot();
    bar.set_length(totals.total_bytes_expected);
    bar.set_position(totals.bytes_transferred);
    bar.finish_and_clear();
    result
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    let style = ProgressStyle::with_template(
        "{spinner:.green} {msg:>10} [{bar:30.cyan/dim}] {bytes}/{total_bytes} {prefix:.dim}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=> ");
    bar.set_style(style);
    bar.enable_steady_tick(PROGRESS_TICK);
    bar
}

async fn paint_progress(bar: ProgressBar, progress: Arc<ProgressAggregator>) {
    let mut ticker = tokio::time::interval(PROGRESS_TICK);
    loop {
        ticker.tick().await;
        let event = progress.progress_event(None);
        match event.phase {
            Phase::Idle => bar.set_message("Starting"),
            Phase::Scanning => {
                bar.set_message("Checking");
                bar.set_length(event.files_total);
                bar.set_position(event.files_done);
            }
            Phase::Fetching | Phase::Finished => {
                bar.set_message("Fetching");
                bar.set_length(event.bytes_total);
                bar.set_position(event.bytes_done);
            }
        }
        bar.set_prefix(format!("{}/{} files", event.files_done, event.files_total));
    }
}

/// Print a session report; returns whether the run counts as a success.
pub fn print_report(report: &SessionReport) -> bool {
    for failed in &report.failed {
        error!("{}: {} ({})", failed.path, failed.kind, failed.detail);
    }
    println!("{}", report.summary());
    report.is_success()
}

pub fn print_check(summary: &CheckSummary, manifest: &Path) -> bool {
    for (label, paths) in [
        ("missing", &summary.missing),
        ("mismatched", &summary.mismatched),
        ("unreadable", &summary.unreadable),
    ] {
        for path in paths {
            println!("{label:>10}  {path}");
        }
    }
    println!(
        "{:?}: {} of {} files up to date, {} bytes to fetch",
        manifest, summary.up_to_date, summary.files, summary.bytes_to_fetch
    );
    summary.is_up_to_date()
}
