use crate::error::Result;
use crate::pipeline::counters::RatioStats;
use crate::types::Record;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// What a stage did with the record it was given.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Hand the (possibly modified) record to the next stage.
    Pass(Record),
    /// Stop this record's traversal. Not an error.
    Dropped,
}

impl Outcome {
    pub fn is_dropped(&self) -> bool {
        matches!(self, Outcome::Dropped)
    }

    pub fn into_record(self) -> Option<Record> {
        match self {
            Outcome::Pass(r) => Some(r),
            Outcome::Dropped => None,
        }
    }
}

/// A named ratio a stage exposes for progress output.
#[derive(Debug, Clone)]
pub struct Probe {
    pub label: String,
    pub stats: Arc<RatioStats>,
}

impl Probe {
    pub fn new(label: impl Into<String>, stats: Arc<RatioStats>) -> Self {
        Self {
            label: label.into(),
            stats,
        }
    }
}

/// One filtering, transforming or enriching step.
///
/// Stages never see their neighbours; the [`Chain`] owns ordering and
/// short-circuiting. A stage may only touch the record it was handed, apart
/// from the shared state it explicitly owns (caches, counters, the store).
#[async_trait]
pub trait Stage: Send {
    fn name(&self) -> String;

    async fn handle(&mut self, record: Record) -> Result<Outcome>;

    fn probes(&self) -> Vec<Probe> {
        Vec::new()
    }
}

/// An ordered list of stages a record is pushed through.
#[derive(Default)]
pub struct Chain {
    stages: Vec<Box<dyn Stage>>,
    drops: Vec<u64>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<S: Stage + 'static>(&mut self, stage: S) {
        self.stages.push(Box::new(stage));
        self.drops.push(0);
    }

    /// Builder form of [`Chain::push`].
    pub fn then<S: Stage + 'static>(mut self, stage: S) -> Self {
        self.push(stage);
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Drop count per stage, in chain order.
    pub fn drops_by_stage(&self) -> Vec<(String, u64)> {
        self.stages
            .iter()
            .zip(self.drops.iter())
            .map(|(s, d)| (s.name(), *d))
            .collect()
    }

    pub fn probes(&self) -> Vec<Probe> {
        self.stages.iter().flat_map(|s| s.probes()).collect()
    }

    /// Runs one record through every stage until one drops it or the last
    /// one returns. An error from any stage ends the traversal.
    pub async fn process(&mut self, record: Record) -> Result<Outcome> {
        let mut current = record;
        for (idx, stage) in self.stages.iter_mut().enumerate() {
            match stage.handle(current).await? {
                Outcome::Pass(next) => current = next,
                Outcome::Dropped => {
                    self.drops[idx] += 1;
                    trace!(stage = %stage.name(), "record dropped");
                    return Ok(Outcome::Dropped);
                }
            }
        }
        Ok(Outcome::Pass(current))
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("stages", &self.stage_names())
            .finish()
    }
}
