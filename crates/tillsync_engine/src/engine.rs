//! The sync engine: one pass of push then pull.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::shutdown::CancelSignal;
use crate::transport::RemoteAuthority;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tillsync_protocol::ConflictResolver;
use tillsync_store::LocalStore;
use tracing::{error, info, warn};

/// How a pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassOutcome {
    /// Everything pending was pushed and the pull caught up.
    Success,
    /// The pass stopped early after making some progress.
    Partial,
    /// The pass stopped before making any progress.
    Failed,
    /// No pass ran because the remote was unreachable.
    Skipped,
}

impl PassOutcome {
    /// Returns a short lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            PassOutcome::Success => "success",
            PassOutcome::Partial => "partial",
            PassOutcome::Failed => "failed",
            PassOutcome::Skipped => "skipped",
        }
    }
}

/// Result of one sync pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// How the pass ended.
    pub outcome: PassOutcome,
    /// True only for [`PassOutcome::Success`].
    pub success: bool,
    /// Records the remote acknowledged.
    pub pushed: u64,
    /// Remote records received.
    pub pulled: u64,
    /// Conflicts met while pushing or applying.
    pub conflicted: u64,
    /// Records the remote rejected.
    pub rejected: u64,
    /// Retries taken after transient failures.
    pub retries: u32,
    /// Error that ended the pass, if any.
    pub message: Option<String>,
    /// True if the error requires the host to intervene.
    pub fatal: bool,
    /// Wall time of the pass.
    pub duration: Duration,
}

impl SyncReport {
    /// A report for a pass that did not run.
    pub fn skipped(message: impl Into<String>) -> Self {
        Self {
            outcome: PassOutcome::Skipped,
            success: false,
            pushed: 0,
            pulled: 0,
            conflicted: 0,
            rejected: 0,
            retries: 0,
            message: Some(message.into()),
            fatal: false,
            duration: Duration::ZERO,
        }
    }
}

/// Counters accumulated while a pass runs.
#[derive(Debug, Default)]
pub(crate) struct PassTally {
    pub(crate) pushed: u64,
    pub(crate) pulled: u64,
    pub(crate) conflicted: u64,
    pub(crate) rejected: u64,
    pub(crate) retries: u32,
}

impl PassTally {
    fn made_progress(&self) -> bool {
        self.pushed + self.pulled + self.rejected + self.conflicted > 0
    }

    fn into_report(self, error: Option<&SyncError>, duration: Duration) -> SyncReport {
        let outcome = match error {
            None => PassOutcome::Success,
            Some(_) if self.made_progress() => PassOutcome::Partial,
            Some(_) => PassOutcome::Failed,
        };
        SyncReport {
            outcome,
            success: outcome == PassOutcome::Success,
            pushed: self.pushed,
            pulled: self.pulled,
            conflicted: self.conflicted,
            rejected: self.rejected,
            retries: self.retries,
            message: error.map(|e| e.to_string()),
            fatal: error.is_some_and(|e| e.is_fatal()),
            duration,
        }
    }
}

/// Totals across every pass run by an engine.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Passes run, whatever their outcome.
    pub passes: u64,
    /// Passes that did not succeed.
    pub failed_passes: u64,
    /// Records acknowledged by the remote.
    pub records_pushed: u64,
    /// Remote records received.
    pub records_pulled: u64,
    /// Conflicts met.
    pub conflicts: u64,
    /// Records rejected by the remote.
    pub rejected: u64,
    /// Retries after transient failures.
    pub retries: u64,
    /// When the last pass finished.
    pub last_pass_at: Option<Instant>,
    /// Error of the last failed pass, cleared by a successful one.
    pub last_error: Option<String>,
}

/// Runs sync passes between a [`LocalStore`] and a [`RemoteAuthority`].
///
/// A pass pushes pending records first, then pulls. Pushing first means a
/// conflict the remote reports on push is resolved by the pull that
/// follows in the same pass.
///
/// The engine does not guard against concurrent passes; the
/// [`SyncScheduler`](crate::SyncScheduler) does.
pub struct SyncEngine<R: RemoteAuthority> {
    config: SyncConfig,
    store: Arc<LocalStore>,
    remote: R,
    resolver: Arc<dyn ConflictResolver>,
    stats: RwLock<SyncStats>,
}

impl<R: RemoteAuthority> SyncEngine<R> {
    /// Creates an engine using the configured conflict strategy.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the store belongs to another
    /// device.
    pub fn new(config: SyncConfig, store: Arc<LocalStore>, remote: R) -> SyncResult<Self> {
        if store.device_id() != &config.device_id {
            return Err(SyncError::Config(format!(
                "store belongs to {} but the engine is configured for {}",
                store.device_id(),
                config.device_id
            )));
        }
        Ok(Self {
            resolver: config.resolver(),
            config,
            store,
            remote,
            stats: RwLock::new(SyncStats::default()),
        })
    }

    /// Replaces the conflict resolver.
    pub fn with_resolver(mut self, resolver: Arc<dyn ConflictResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the local store.
    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    /// Returns the remote.
    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Returns the conflict resolver in use.
    pub fn resolver(&self) -> &Arc<dyn ConflictResolver> {
        &self.resolver
    }

    /// Returns accumulated statistics.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Runs one pass: push, then pull.
    ///
    /// Never returns an error; failures are described by the report. A
    /// transient failure that outlasts the retry budget ends the pass
    /// early, keeping whatever was already acknowledged or applied.
    pub async fn run_pass(&self, cancel: &CancelSignal) -> SyncReport {
        let start = Instant::now();
        info!(
            device = %self.store.device_id(),
            pending = self.store.pending_count(),
            watermark = self.store.latest_remote_watermark(),
            "sync pass started"
        );

        let mut tally = PassTally::default();
        let result = self.run_phases(cancel, &mut tally).await;
        let report = tally.into_report(result.as_ref().err(), start.elapsed());

        match &result {
            Ok(()) => info!(
                pushed = report.pushed,
                pulled = report.pulled,
                conflicted = report.conflicted,
                rejected = report.rejected,
                duration_ms = report.duration.as_millis() as u64,
                "sync pass completed"
            ),
            Err(e) if report.fatal => error!(error = %e, "sync pass hit a fatal storage error"),
            Err(e) => warn!(
                outcome = report.outcome.as_str(),
                pushed = report.pushed,
                pulled = report.pulled,
                error = %e,
                "sync pass ended early"
            ),
        }

        self.record(&report);
        report
    }

    async fn run_phases(&self, cancel: &CancelSignal, tally: &mut PassTally) -> SyncResult<()> {
        self.push_pending(cancel, tally).await?;
        self.pull_remote(cancel, tally).await
    }

    fn record(&self, report: &SyncReport) {
        let mut stats = self.stats.write();
        stats.passes += 1;
        if !report.success {
            stats.failed_passes += 1;
        }
        stats.records_pushed += report.pushed;
        stats.records_pulled += report.pulled;
        stats.conflicts += report.conflicted;
        stats.rejected += report.rejected;
        stats.retries += u64::from(report.retries);
        stats.last_pass_at = Some(Instant::now());
        stats.last_error = report.message.clone();
    }
}
