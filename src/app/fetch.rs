use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

use crate::app::flows::{self, BuiltFlow, FlowKind, FlowParams, SharedResolver};
use crate::config::Config;
use crate::constants::{CRM_PHONE_COLUMN, INN, LICENCE_NUM, NAME, OWNER_NAME};
use crate::infra::{
    CrmAttribute, CrmDatabase, CrmExistence, KeyDictionary, PipedriveClient, PipedriveOrganisationSearch,
    SnapshotExistence,
};
use crate::pipeline::counters::CountersSnapshot;
use crate::pipeline::ingestion::{JsonLinesSource, RecordSource};
use crate::pipeline::storage::MergeStore;
use crate::pipeline::{Progress, RunSummary, Runner};

/// What to fetch and where from.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub kind: FlowKind,
    pub params: FlowParams,
    pub input: PathBuf,
    /// Registry used to map licensee names to tax ids (resolutions only).
    pub dictionary: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub namespace: String,
    pub summary: RunSummary,
    pub counters: CountersSnapshot,
    pub stored: usize,
}

/// Runs a built flow over `source` and reports what landed in `store`.
pub async fn run_flow<S, F>(
    kind: FlowKind,
    built: BuiltFlow,
    store: &MergeStore,
    source: S,
    progress_every: u64,
    cancel: Arc<AtomicBool>,
    on_progress: F,
) -> Result<FetchOutcome>
where
    S: RecordSource,
    F: FnMut(&Progress),
{
    info!("Reading {} for {}", source.describe(), kind);
    let records = source.produce()?;
    let mut runner = Runner::new(kind.name(), built.chain)
        .with_identity_fields([INN, LICENCE_NUM, NAME, OWNER_NAME])
        .with_progress_every(progress_every)
        .with_cancel_flag(cancel);
    let summary = runner.run(records, on_progress).await?;
    let counters = built.counters.snapshot();
    let stored = store.len()?;
    info!(
        "{}: handled={} flag_false={} stored_entities={}",
        store.namespace(),
        counters.handled,
        counters.flag_false,
        stored
    );
    Ok(FetchOutcome {
        namespace: store.namespace().to_string(),
        summary,
        counters,
        stored,
    })
}

/// Wires live resolvers and the namespace store for a flow and runs it.
pub struct FetchUseCase {
    config: Config,
}

impl FetchUseCase {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    fn open_store(&self, namespace: &str) -> Result<Arc<MergeStore>> {
        let store = MergeStore::open(&self.config.storage.dir, namespace, INN)
            .with_context(|| format!("opening store for {}", namespace))?;
        Ok(Arc::new(store))
    }

    fn crm_database(&self) -> Result<Arc<CrmDatabase>> {
        CrmDatabase::open(&self.config.crm.database).context("opening CRM database")
    }

    fn org_search(&self) -> Result<SharedResolver> {
        let token = Config::pipedrive_token().context("PIPEDRIVE_API_TOKEN is not set")?;
        let client = PipedriveClient::new(&self.config.pipedrive, token)?;
        Ok(Arc::new(PipedriveOrganisationSearch::new(client)))
    }

    fn build(&self, request: &FetchRequest, store: Arc<MergeStore>) -> Result<BuiltFlow> {
        let range = match (request.kind.needs_range(), request.params.range) {
            (true, Some(range)) => Some(range),
            (true, None) => bail!("{} needs --start and --end", request.kind),
            (false, _) => None,
        };
        let built = match (request.kind, range) {
            (FlowKind::Resolutions, Some(range)) => {
                let path = request
                    .dictionary
                    .as_ref()
                    .context("resolutions needs --dictionary with the licence registry")?;
                let dictionary = KeyDictionary::from_source(JsonLinesSource::new(path), NAME, INN)?;
                let crm: SharedResolver = Arc::new(CrmExistence::new(self.crm_database()?));
                flows::resolutions_chain(range, Arc::new(dictionary), crm, self.org_search()?, store)
            }
            (FlowKind::Prolongation, Some(range)) => {
                let snapshot = SnapshotExistence::load(&self.config.crm.snapshot, self.config.crm.snapshot_key_column)
                    .context("loading client snapshot")?;
                flows::prolongation_chain(range, request.params.ours, Arc::new(snapshot), self.org_search()?, store)
            }
            (FlowKind::Commissioning, Some(range)) => {
                let crm: SharedResolver = Arc::new(CrmExistence::new(self.crm_database()?));
                flows::commissioning_chain(range, request.params.ours, crm, self.org_search()?, store)
            }
            (FlowKind::Special, _) => {
                let db = self.crm_database()?;
                let phone = CrmAttribute::new(db.clone(), CRM_PHONE_COLUMN)?;
                flows::special_chain(Arc::new(CrmExistence::new(db)), Arc::new(phone), store)
            }
            (kind, None) => bail!("{} needs a date range", kind),
        };
        Ok(built)
    }

    pub async fn execute<F>(&self, request: &FetchRequest, cancel: Arc<AtomicBool>, on_progress: F) -> Result<FetchOutcome>
    where
        F: FnMut(&Progress),
    {
        let namespace = flows::namespace(request.kind, &request.params);
        let store = self.open_store(&namespace)?;
        let built = self.build(request, store.clone())?;
        run_flow(
            request.kind,
            built,
            &store,
            JsonLinesSource::new(&request.input),
            self.config.run.progress_every,
            cancel,
            on_progress,
        )
        .await
    }
}
