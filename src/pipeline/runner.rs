use crate::error::Result;
use crate::pipeline::chain::{Chain, Outcome, Probe};
use crate::types::Record;
use metrics::counter;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

/// Point-in-time view of a running flow, for progress output.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Progress {
    pub pulled: u64,
    pub passed: u64,
    pub dropped: u64,
    pub malformed: u64,
    pub ratios: Vec<(String, f64)>,
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pulled={} passed={} dropped={} malformed={}",
            self.pulled, self.passed, self.dropped, self.malformed
        )?;
        for (label, pct) in &self.ratios {
            write!(f, " {}={:.2}%", label, pct)?;
        }
        Ok(())
    }
}

/// Result of a complete run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub flow: String,
    pub pulled: u64,
    pub passed: u64,
    pub dropped: u64,
    pub malformed: u64,
    pub cancelled: bool,
    pub drops_by_stage: Vec<(String, u64)>,
    pub duration_secs: f64,
}

/// Drains a record source through a chain, one record at a time, in source
/// order.
///
/// Malformed records are logged with their identity and skipped. Any other
/// error stops the run and is returned; everything already upserted stays
/// in the store. Cancellation is checked between records.
pub struct Runner {
    flow: String,
    chain: Chain,
    identity_fields: Vec<String>,
    progress_every: u64,
    cancel: Arc<AtomicBool>,
    probes: Vec<Probe>,
    progress: Progress,
}

impl Runner {
    pub fn new(flow: impl Into<String>, chain: Chain) -> Self {
        let probes = chain.probes();
        Self {
            flow: flow.into(),
            chain,
            identity_fields: Vec::new(),
            progress_every: 1000,
            cancel: Arc::new(AtomicBool::new(false)),
            probes,
            progress: Progress::default(),
        }
    }

    /// Fields tried, in order, to name a record in error logs.
    pub fn with_identity_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.identity_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_progress_every(mut self, every: u64) -> Self {
        self.progress_every = every.max(1);
        self
    }

    /// Shares an externally owned cancel flag, e.g. one set by a signal
    /// handler installed before the runner exists.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Setting the flag stops the run before the next record is pulled.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn progress(&self) -> Progress {
        let mut snapshot = self.progress.clone();
        snapshot.ratios = self
            .probes
            .iter()
            .map(|p| (p.label.clone(), p.stats.percent()))
            .collect();
        snapshot
    }

    fn identity(&self, record: &Record) -> String {
        let fields: Vec<&str> = self.identity_fields.iter().map(String::as_str).collect();
        record.identity(&fields)
    }

    #[instrument(skip(self, records, on_progress), fields(flow = %self.flow))]
    pub async fn run<I, F>(&mut self, records: I, mut on_progress: F) -> Result<RunSummary>
    where
        I: IntoIterator<Item = Result<Record>>,
        F: FnMut(&Progress),
    {
        info!(stages = ?self.chain.stage_names(), "Starting run");
        let started = Instant::now();
        let mut cancelled = false;

        for item in records {
            if self.cancel.load(Ordering::Relaxed) {
                warn!("Run cancelled after {} records", self.progress.pulled);
                cancelled = true;
                break;
            }
            self.progress.pulled += 1;
            counter!("registry_records_total", "flow" => self.flow.clone()).increment(1);

            let record = match item {
                Ok(r) => r,
                Err(e) if e.is_recoverable() => {
                    self.progress.malformed += 1;
                    counter!("registry_records_malformed_total", "flow" => self.flow.clone()).increment(1);
                    error!(error = %e, "Skipping unreadable source record");
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "Record source failed");
                    return Err(e);
                }
            };

            let identity = self.identity(&record);
            match self.chain.process(record).await {
                Ok(Outcome::Pass(_)) => self.progress.passed += 1,
                Ok(Outcome::Dropped) => {
                    self.progress.dropped += 1;
                    counter!("registry_records_dropped_total", "flow" => self.flow.clone()).increment(1);
                }
                Err(e) if e.is_recoverable() => {
                    self.progress.malformed += 1;
                    counter!("registry_records_malformed_total", "flow" => self.flow.clone()).increment(1);
                    error!(record = %identity, error = %e, "Skipping malformed record");
                }
                Err(e) => {
                    error!(record = %identity, error = %e, "Run halted");
                    return Err(e);
                }
            }

            if self.progress.pulled % self.progress_every == 0 {
                let snapshot = self.progress();
                info!("{}", snapshot);
                on_progress(&snapshot);
            }
        }

        let snapshot = self.progress();
        on_progress(&snapshot);
        let summary = RunSummary {
            flow: self.flow.clone(),
            pulled: snapshot.pulled,
            passed: snapshot.passed,
            dropped: snapshot.dropped,
            malformed: snapshot.malformed,
            cancelled,
            drops_by_stage: self.chain.drops_by_stage(),
            duration_secs: started.elapsed().as_secs_f64(),
        };
        info!(
            "Run finished: {} ({} cancelled) in {:.1}s",
            snapshot, cancelled, summary.duration_secs
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::pipeline::processing::{BoolEqualityFilter, DateParser};
    use crate::types::Value;

    #[tokio::test]
    async fn test_malformed_records_are_skipped() {
        let chain = Chain::new().then(DateParser::new("d"));
        let mut runner = Runner::new("t", chain).with_identity_fields(["id"]);
        let records = vec![
            Ok(Record::new().with("id", "1").with("d", "2021-01-01")),
            Ok(Record::new().with("id", "2").with("d", "2021-1-1")),
            Err(PipelineError::malformed("<line 3>", "{", "eof")),
            Ok(Record::new().with("id", "4").with("d", "2021-01-04")),
        ];
        let summary = runner.run(records, |_| {}).await.unwrap();
        assert_eq!(summary.pulled, 4);
        assert_eq!(summary.passed, 2);
        assert_eq!(summary.malformed, 2);
        assert!(!summary.cancelled);
    }

    #[tokio::test]
    async fn test_fatal_errors_halt_the_run() {
        let chain = Chain::new().then(BoolEqualityFilter::new("flag", true));
        let mut runner = Runner::new("t", chain);
        let records = vec![
            Ok(Record::new().with("flag", true)),
            Ok(Record::new().with("flag", "yes")),
            Ok(Record::new().with("flag", true)),
        ];
        let err = runner.run(records, |_| {}).await.unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
        assert_eq!(runner.progress().passed, 1);
    }

    #[tokio::test]
    async fn test_cancel_stops_between_records() {
        let mut runner = Runner::new("t", Chain::new());
        let cancel = runner.cancel_handle();
        let records = (0..10).map(|i| {
            if i == 3 {
                cancel.store(true, Ordering::Relaxed);
            }
            Ok(Record::new().with("i", Value::ExternalId(i)))
        });
        let summary = runner.run(records, |_| {}).await.unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.pulled, 3);
    }

    #[tokio::test]
    async fn test_progress_reports_ratios() {
        let chain = Chain::new().then(BoolEqualityFilter::new("flag", true));
        let mut runner = Runner::new("t", chain).with_progress_every(5);
        let records: Vec<_> = (0..10).map(|i| Ok(Record::new().with("flag", i < 3))).collect();
        let mut seen = Vec::new();
        runner.run(records, |p| seen.push(p.clone())).await.unwrap();
        // every 5 records plus the final snapshot
        assert_eq!(seen.len(), 3);
        let last = seen.last().unwrap();
        assert_eq!(last.ratios[0].0, "flag!=true");
        assert_eq!(format!("{:.2}", last.ratios[0].1), "70.00");
        assert!(last.to_string().contains("flag!=true=70.00%"));
    }
}
