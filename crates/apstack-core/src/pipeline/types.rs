use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::error::{Result, StackError};

/// Pipeline processing phase, used for progress reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelinePhase {
    RankFrames,
    AlignFrames,
    AverageFrame,
    CreateAlignmentPoints,
    RankAlignmentPoints,
    StackFrames,
    MergeBuffers,
}

impl std::fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RankFrames => write!(f, "Ranking all frames"),
            Self::AlignFrames => write!(f, "Aligning all frames"),
            Self::AverageFrame => write!(f, "Computing mean frame"),
            Self::CreateAlignmentPoints => write!(f, "Creating alignment points"),
            Self::RankAlignmentPoints => write!(f, "Rank frames at APs"),
            Self::StackFrames => write!(f, "Stacking frames"),
            Self::MergeBuffers => write!(f, "Merging AP patches"),
        }
    }
}

/// Thread-safe progress reporting and cooperative cancellation.
///
/// Implementors can use this to drive progress bars, logging, or any other
/// UI feedback. All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    /// Progress of the given phase in percent (0..=100). Emitted at coarse
    /// intervals, roughly every tenth of a phase.
    fn report(&self, _phase: PipelinePhase, _percent: u32) {}

    /// Polled between frames and alignment points. Returning `true` makes the
    /// running operation stop with [`StackError::Cancelled`].
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Reporter that ignores progress and never cancels.
pub struct NoOpReporter;
impl ProgressReporter for NoOpReporter {}

/// Reporter that only carries a cancellation flag.
#[derive(Debug, Default)]
pub struct CancelFlag {
    cancelled: AtomicBool,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}

impl ProgressReporter for CancelFlag {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Counts completed work items of one phase and forwards coarse progress to
/// a reporter. Safe to advance from Rayon workers.
pub(crate) struct PhaseProgress<'a> {
    reporter: &'a dyn ProgressReporter,
    phase: PipelinePhase,
    total: usize,
    step: usize,
    done: AtomicUsize,
}

impl<'a> PhaseProgress<'a> {
    pub(crate) fn new(reporter: &'a dyn ProgressReporter, phase: PipelinePhase, total: usize) -> Self {
        reporter.report(phase, 0);
        Self {
            reporter,
            phase,
            total: total.max(1),
            step: (total / 10).max(1),
            done: AtomicUsize::new(0),
        }
    }

    /// Record one finished item. Fails if the caller requested cancellation.
    pub(crate) fn advance(&self) -> Result<()> {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        if done % self.step == 0 && done < self.total {
            self.reporter
                .report(self.phase, (done * 100 / self.total) as u32);
        }
        self.check_cancelled()
    }

    pub(crate) fn check_cancelled(&self) -> Result<()> {
        if self.reporter.is_cancelled() {
            return Err(StackError::Cancelled);
        }
        Ok(())
    }

    pub(crate) fn finish(&self) {
        self.reporter.report(self.phase, 100);
    }
}
