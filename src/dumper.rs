//! Orchestrates a full dump.
//!
//! Every channel runs as one pipeline: harvest pages, format each message,
//! append the text to the channel's writer and ask the dashboard to redraw.
//! Pipelines run under [`run_bounded`], so at most `concurrency` channels are
//! in flight. One channel failing (error or panic) never affects the others.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info};

use crate::api::ChatApi;
use crate::dashboard::StatusBoard;
use crate::debounce::DEFAULT_THROTTLE;
use crate::error::{Error, Result};
use crate::format::{MessageFormatter, OutputFormat};
use crate::harvest::{ChannelHarvester, RetryPolicy};
use crate::limiter::{run_bounded, Settled};
use crate::metrics::{self, ChannelStatus};
use crate::model::{Channel, ChannelProgress};
use crate::paths::{ensure_parent_dir, OutputLayout};
use crate::writer::{IncrementalWriter, WriteOutcome};

pub const DEFAULT_CONCURRENCY: usize = 12;

/// Everything a run needs besides the API and the dashboard.
#[derive(Debug, Clone)]
pub struct DumpSettings {
    pub concurrency: usize,
    pub layout: OutputLayout,
    pub format: OutputFormat,
    pub retry: RetryPolicy,
    pub throttle: Duration,
}

impl DumpSettings {
    pub fn new(layout: OutputLayout) -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            layout,
            format: OutputFormat::default(),
            retry: RetryPolicy::default(),
            throttle: DEFAULT_THROTTLE,
        }
    }
}

#[derive(Debug)]
pub enum ChannelOutcome {
    Written { path: PathBuf, bytes: u64 },
    /// No messages; no file left behind.
    Empty,
    Failed(Error),
}

impl ChannelOutcome {
    pub fn status(&self) -> ChannelStatus {
        match self {
            ChannelOutcome::Written { .. } => ChannelStatus::Written,
            ChannelOutcome::Empty => ChannelStatus::Empty,
            ChannelOutcome::Failed(_) => ChannelStatus::Failed,
        }
    }
}

#[derive(Debug)]
pub struct ChannelReport {
    pub channel: Channel,
    pub fetched: u64,
    pub outcome: ChannelOutcome,
}

#[derive(Debug, Default)]
pub struct DumpSummary {
    pub reports: Vec<ChannelReport>,
    pub elapsed: Duration,
}

impl DumpSummary {
    fn count(&self, status: ChannelStatus) -> usize {
        self.reports
            .iter()
            .filter(|r| r.outcome.status() == status)
            .count()
    }

    pub fn written(&self) -> usize {
        self.count(ChannelStatus::Written)
    }

    pub fn empty(&self) -> usize {
        self.count(ChannelStatus::Empty)
    }

    pub fn failed(&self) -> usize {
        self.count(ChannelStatus::Failed)
    }

    pub fn messages(&self) -> u64 {
        self.reports.iter().map(|r| r.fetched).sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&Channel, &Error)> {
        self.reports.iter().filter_map(|r| match &r.outcome {
            ChannelOutcome::Failed(err) => Some((&r.channel, err)),
            _ => None,
        })
    }
}

pub struct Dumper<A: ChatApi + ?Sized> {
    api: Arc<A>,
    settings: Arc<DumpSettings>,
    board: Arc<StatusBoard>,
}

impl<A: ChatApi + ?Sized + 'static> Dumper<A> {
    pub fn new(api: Arc<A>, settings: DumpSettings, board: Arc<StatusBoard>) -> Self {
        Self {
            api,
            settings: Arc::new(settings),
            board,
        }
    }

    pub fn board(&self) -> &Arc<StatusBoard> {
        &self.board
    }

    pub fn settings(&self) -> &DumpSettings {
        &self.settings
    }

    /// Dump every channel and report how each one ended, in input order.
    pub async fn run(&self, channels: Vec<Channel>) -> DumpSummary {
        let started = Instant::now();
        info!(
            channels = channels.len(),
            concurrency = self.settings.concurrency,
            format = %self.settings.format,
            "Starting dump"
        );

        let progress: Vec<Arc<ChannelProgress>> = channels
            .into_iter()
            .map(|channel| Arc::new(ChannelProgress::new(channel)))
            .collect();

        let tasks: Vec<_> = progress.iter().map(|progress| {
            let api = Arc::clone(&self.api);
            let settings = Arc::clone(&self.settings);
            let board = Arc::clone(&self.board);
            let progress = Arc::clone(progress);
            async move { dump_channel(api, settings, board, progress).await }
        }).collect();

        let settled = run_bounded(tasks, self.settings.concurrency).await;

        let reports = progress
            .into_iter()
            .zip(settled)
            .map(|(progress, settled)| {
                let outcome = match settled {
                    Settled::Completed(Ok(WriteOutcome::Written { path, bytes })) => {
                        ChannelOutcome::Written { path, bytes }
                    }
                    Settled::Completed(Ok(WriteOutcome::Removed { .. })) => ChannelOutcome::Empty,
                    Settled::Completed(Err(err)) => ChannelOutcome::Failed(err),
                    Settled::Panicked(message) => {
                        self.board
                            .log(format!("{}: task panicked: {}", progress.channel().name, message));
                        ChannelOutcome::Failed(Error::TaskPanicked(message))
                    }
                };
                metrics::record_channel(outcome.status());

                ChannelReport {
                    channel: progress.channel().clone(),
                    fetched: progress.fetched(),
                    outcome,
                }
            })
            .collect();

        let summary = DumpSummary {
            reports,
            elapsed: started.elapsed(),
        };
        info!(
            written = summary.written(),
            empty = summary.empty(),
            failed = summary.failed(),
            messages = summary.messages(),
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Dump finished"
        );
        summary
    }
}

async fn dump_channel<A: ChatApi + ?Sized>(
    api: Arc<A>,
    settings: Arc<DumpSettings>,
    board: Arc<StatusBoard>,
    progress: Arc<ChannelProgress>,
) -> Result<WriteOutcome> {
    board.admit(Arc::clone(&progress));
    let finished = FinishOnDrop(Arc::clone(&progress));
    board.schedule_draw();

    let result = harvest_to_file(api, &settings, &board, &progress).await;

    drop(finished);
    board.schedule_draw();

    if let Err(err) = &result {
        let name = &progress.channel().name;
        error!(channel = %name, "Channel dump failed: {}", err);
        board.log(format!("{}: {}", name, err));
    }
    result
}

/// Marks the channel finished when dropped, including while a panic unwinds,
/// so its dashboard slot frees up before the limiter starts the next channel.
struct FinishOnDrop(Arc<ChannelProgress>);

impl Drop for FinishOnDrop {
    fn drop(&mut self) {
        self.0.mark_finished();
    }
}

async fn harvest_to_file<A: ChatApi + ?Sized>(
    api: Arc<A>,
    settings: &DumpSettings,
    board: &Arc<StatusBoard>,
    progress: &Arc<ChannelProgress>,
) -> Result<WriteOutcome> {
    let path = settings.layout.channel_path(progress.channel());
    ensure_parent_dir(&path)?;
    let writer = IncrementalWriter::create(&path, settings.throttle)?;

    let mut harvester = ChannelHarvester::new(api, Arc::clone(progress), settings.retry);
    let mut formatter = MessageFormatter::new(settings.format);

    let harvested = loop {
        match harvester.next_message().await {
            Ok(Some(message)) => {
                if let Err(err) = formatter.write(&message) {
                    break Err(err);
                }
                writer.append(&formatter.flush());
                board.schedule_draw();
            }
            Ok(None) => break Ok(()),
            Err(err) => break Err(err),
        }
    };

    // Whatever was fetched before a failure is still written out.
    let outcome = writer.finish(progress.fetched())?;
    harvested.map(|_| outcome)
}
