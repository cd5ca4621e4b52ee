//! Batch runner: every configured list generated in one pass, strictly in
//! file order.
//!
//! Lists run sequentially so the run ledger already holds earlier picks
//! when a later list scores the same item. A fatal error (bad credentials,
//! unusable configuration) aborts the remaining lists; any other failure is
//! contained to the list it happened in.

use std::fmt::Write as _;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use console::style;
use rustc_hash::FxHashMap;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::lists::ListsFile;
use crate::model::CanonicalId;
use crate::pipeline::{ListJob, ListPipeline, ListRunOutcome};
use crate::store::history::StateStore;
use crate::store::identity::IdentityCache;
use crate::store::ratings::RatingCache;
use crate::util::error::is_fatal;
use crate::util::time;

/// Counts how many lists have already placed each item within one batch
/// run. Every list job of the run shares the same ledger, so later lists
/// pay a duplicate penalty for items earlier lists used.
#[derive(Debug, Default)]
pub struct RunLedger {
    uses: Mutex<FxHashMap<CanonicalId, u32>>,
}

impl RunLedger {
    pub fn note_selected(&self, ids: &[CanonicalId]) {
        let mut uses = self.uses.lock().unwrap_or_else(PoisonError::into_inner);
        for id in ids {
            *uses.entry(id.clone()).or_default() += 1;
        }
    }

    #[must_use]
    pub fn uses_of(&self, id: &CanonicalId) -> u32 {
        self.uses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .copied()
            .unwrap_or(0)
    }
}

/// Outcome of one list, as reported in the run summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListStatus {
    Written { items: usize, new_entries: usize },
    Unchanged { items: usize },
    KeptPrevious { items: usize, reason: String },
    Failed { reason: String },
}

impl From<ListRunOutcome> for ListStatus {
    fn from(outcome: ListRunOutcome) -> Self {
        match outcome {
            ListRunOutcome::Written { items, new_entries } => Self::Written { items, new_entries },
            ListRunOutcome::Unchanged { items } => Self::Unchanged { items },
            ListRunOutcome::KeptPrevious { items, reason } => Self::KeptPrevious { items, reason },
        }
    }
}

#[derive(Debug, Clone)]
pub struct ListReport {
    pub list_id: String,
    pub status: ListStatus,
}

/// Per-list results of a batch run, printed at the end of the process.
#[derive(Debug)]
pub struct RunSummary {
    run_id: Uuid,
    elapsed: Duration,
    reports: Vec<ListReport>,
    fatal: Option<String>,
}

impl RunSummary {
    #[must_use]
    pub fn reports(&self) -> &[ListReport] {
        &self.reports
    }

    #[must_use]
    pub fn fatal(&self) -> Option<&str> {
        self.fatal.as_deref()
    }

    /// Process exit code: 0 when every list produced an edition (a kept
    /// previous edition counts), 1 after a fatal abort, 2 when at least
    /// one list failed with nothing to fall back to.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        if self.fatal.is_some() {
            return 1;
        }
        let any_failed = self
            .reports
            .iter()
            .any(|report| matches!(report.status, ListStatus::Failed { .. }));
        if any_failed { 2 } else { 0 }
    }

    /// Human-readable table for stdout. Colors degrade to plain text when
    /// stdout is not a terminal.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "run {} finished in {:.1}s",
            style(self.run_id).cyan(),
            self.elapsed.as_secs_f64()
        );
        let width = self
            .reports
            .iter()
            .map(|report| report.list_id.len())
            .max()
            .unwrap_or(0)
            .max(12);
        for report in &self.reports {
            let (cell, detail) = match &report.status {
                ListStatus::Written { items, new_entries } => (
                    style(format!("{:<14}", "written")).green().to_string(),
                    format!("{items} items, {new_entries} new"),
                ),
                ListStatus::Unchanged { items } => (
                    style(format!("{:<14}", "unchanged")).dim().to_string(),
                    format!("{items} items"),
                ),
                ListStatus::KeptPrevious { items, reason } => (
                    style(format!("{:<14}", "kept previous")).yellow().to_string(),
                    format!("{items} items ({reason})"),
                ),
                ListStatus::Failed { reason } => (
                    style(format!("{:<14}", "failed")).red().to_string(),
                    reason.clone(),
                ),
            };
            let _ = writeln!(out, "  {:<width$}  {cell}{detail}", report.list_id);
        }
        if self.reports.is_empty() && self.fatal.is_none() {
            let _ = writeln!(out, "  no lists ran");
        }
        if let Some(reason) = &self.fatal {
            let _ = writeln!(out, "{} {reason}", style("aborted:").red().bold());
        }
        out
    }
}

/// Stores flushed once at the end of the batch.
pub(crate) struct BatchStores {
    pub(crate) state: Arc<StateStore>,
    pub(crate) identity: Arc<IdentityCache>,
    pub(crate) ratings: Arc<RatingCache>,
}

pub struct BatchRunner {
    lists: ListsFile,
    pipeline: ListPipeline,
    stores: BatchStores,
    history_max: usize,
    exposure_max: usize,
    dry_run: bool,
}

impl BatchRunner {
    pub(crate) fn new(
        lists: ListsFile,
        pipeline: ListPipeline,
        stores: BatchStores,
        history_max: usize,
        exposure_max: usize,
        dry_run: bool,
    ) -> Self {
        Self {
            lists,
            pipeline,
            stores,
            history_max,
            exposure_max,
            dry_run,
        }
    }

    /// Run every configured list, or only the ids named in `only` when it
    /// is non-empty. Lists run one at a time and in file order, so the
    /// duplicate-penalty ledger is deterministic across runs.
    pub async fn run(&self, only: &[String]) -> RunSummary {
        let run_id = Uuid::now_v7();
        let started = Instant::now();
        let now = time::now();
        let ledger = Arc::new(RunLedger::default());

        for id in only {
            if !self.lists.lists.iter().any(|list| &list.id == id) {
                warn!(list_id = %id, "only filter names an unknown list");
            }
        }
        let selected: Vec<_> = self
            .lists
            .lists
            .iter()
            .filter(|list| only.is_empty() || only.contains(&list.id))
            .collect();
        info!(
            run_id = %run_id,
            lists = selected.len(),
            dry_run = self.dry_run,
            "batch run started"
        );

        let mut reports = Vec::with_capacity(selected.len());
        let mut fatal = None;
        for list in selected {
            let strategy = list.strategy(self.lists.defaults.as_ref());
            let period_key = strategy.rotation.period_key(now);
            let job = ListJob {
                run_id,
                list: list.clone(),
                strategy,
                period_key,
                now,
                ledger: Arc::clone(&ledger),
            };
            match self.pipeline.execute(&job).await {
                Ok(outcome) => reports.push(ListReport {
                    list_id: list.id.clone(),
                    status: outcome.into(),
                }),
                Err(error) if is_fatal(&error) => {
                    error!(
                        list_id = %list.id,
                        error = format!("{error:#}"),
                        "fatal error, aborting remaining lists"
                    );
                    fatal = Some(format!("{error:#}"));
                    break;
                }
                Err(error) => {
                    warn!(
                        list_id = %list.id,
                        error = format!("{error:#}"),
                        "list failed, continuing with remaining lists"
                    );
                    reports.push(ListReport {
                        list_id: list.id.clone(),
                        status: ListStatus::Failed {
                            reason: format!("{error:#}"),
                        },
                    });
                }
            }
        }

        if self.dry_run {
            debug!("dry run, state and caches left on disk untouched");
        } else {
            self.flush_stores(now);
        }

        let summary = RunSummary {
            run_id,
            elapsed: started.elapsed(),
            reports,
            fatal,
        };
        info!(
            run_id = %run_id,
            exit_code = summary.exit_code(),
            elapsed_s = summary.elapsed.as_secs_f64(),
            "batch run finished"
        );
        summary
    }

    /// Retention caps apply once per batch, after the last list has run.
    fn flush_stores(&self, now: DateTime<Utc>) {
        self.stores.state.prune(self.history_max, self.exposure_max);
        if let Err(error) = self.stores.state.flush() {
            warn!(error = format!("{error:#}"), "failed to flush list state");
        }
        if let Err(error) = self.stores.identity.flush(now) {
            warn!(error = format!("{error:#}"), "failed to flush identity cache");
        }
        if let Err(error) = self.stores.ratings.flush(now) {
            warn!(error = format!("{error:#}"), "failed to flush rating cache");
        }
    }
}
