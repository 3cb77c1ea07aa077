//! Labelling pipeline: load mapping → fetch records → label in batches → write back.

use std::time::Instant;

use ineo_core::MappingTable;
use ineo_label::{ClassifyError, EvaluateError, Evaluator, LabelError, LabelStats, Labeller};
use ineo_store::AssessmentCache;
use ineo_sync::{MappingLoadError, MappingSource, RecordStore, SyncError, load_mapping};
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_BATCH_SIZE: usize = 1_000;
pub const DEFAULT_QUERY: &str = "*:*";

/// Fatal errors that end a labelling run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("mapping could not be fetched")]
    MappingFetch(#[source] MappingLoadError),
    #[error("mapping is invalid")]
    MappingParse(#[source] MappingLoadError),
    #[error("record store request failed")]
    Transport(#[from] SyncError),
    #[error("record {id} has neither a data provider nor a harvester root")]
    MissingProviderKey { id: String },
    #[error("INEO record {id} has no file reference")]
    RecordIntegrity { id: String },
    #[error("assessment of {id} failed")]
    Evaluation {
        id: String,
        #[source]
        source: EvaluateError,
    },
}

impl From<MappingLoadError> for PipelineError {
    fn from(e: MappingLoadError) -> Self {
        match e {
            MappingLoadError::Fetch { .. } => Self::MappingFetch(e),
            MappingLoadError::Parse { .. } => Self::MappingParse(e),
        }
    }
}

impl From<LabelError> for PipelineError {
    fn from(e: LabelError) -> Self {
        match e {
            LabelError::Classify(ClassifyError::MissingProviderKey { id }) => {
                Self::MissingProviderKey { id }
            }
            LabelError::MissingFileReference { id } => Self::RecordIntegrity { id },
            LabelError::Evaluate { id, source } => Self::Evaluation { id, source },
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub query: String,
    pub batch_size: usize,
    /// Label and assess, but write nothing to the record store.
    pub dry_run: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            query: DEFAULT_QUERY.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            dry_run: false,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct RunSummary {
    pub fetched: usize,
    pub batches: usize,
    pub written: usize,
    pub labels: LabelStats,
    pub dry_run: bool,
    pub elapsed_secs: f64,
}

/// Record store, assessment cache, and evaluator of one labelling run.
pub struct Pipeline<'a> {
    store: &'a dyn RecordStore,
    cache: &'a AssessmentCache,
    evaluator: Option<&'a dyn Evaluator>,
}

impl<'a> Pipeline<'a> {
    /// Pipeline without an evaluator: assessments are skipped.
    pub fn new(store: &'a dyn RecordStore, cache: &'a AssessmentCache) -> Self {
        Self {
            store,
            cache,
            evaluator: None,
        }
    }

    pub fn with_evaluator(mut self, evaluator: &'a dyn Evaluator) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Load the mapping, then label every record matching the query.
    ///
    /// A mapping that cannot be fetched or parsed ends the run before any
    /// record is read.
    pub async fn run(
        &self,
        http: &reqwest::Client,
        source: &MappingSource,
        options: &PipelineOptions,
    ) -> Result<RunSummary, PipelineError> {
        let mapping = load_mapping(http, source).await?;
        self.label_all(&mapping, options).await
    }

    /// Label every record matching the query against a loaded mapping.
    ///
    /// Batches are labelled one after another; each batch is written before
    /// the next one starts. The first error stops the run; batches already
    /// written stay written.
    pub async fn label_all(
        &self,
        mapping: &MappingTable,
        options: &PipelineOptions,
    ) -> Result<RunSummary, PipelineError> {
        let mut labeller = Labeller::new(mapping, self.cache).dry_run(options.dry_run);
        if let Some(evaluator) = self.evaluator {
            labeller = labeller.with_evaluator(evaluator);
        }
        run_batches(self.store, &labeller, options).await
    }
}

async fn run_batches(
    store: &dyn RecordStore,
    labeller: &Labeller<'_>,
    options: &PipelineOptions,
) -> Result<RunSummary, PipelineError> {
    let start = Instant::now();

    let records = store.fetch_all(&options.query).await?;
    let batch_size = options.batch_size.max(1);
    let total_batches = records.len().div_ceil(batch_size);
    info!(
        records = records.len(),
        batches = total_batches,
        batch_size,
        "labelling records"
    );

    let mut summary = RunSummary {
        fetched: records.len(),
        dry_run: options.dry_run,
        ..Default::default()
    };

    for (i, batch) in records.chunks(batch_size).enumerate() {
        let from = i * batch_size;
        info!(
            batch = i + 1,
            of = total_batches,
            from,
            to = from + batch.len(),
            "processing batch"
        );

        let mut stats = LabelStats::default();
        let payloads = labeller.label_batch(batch, &mut stats).await?;
        debug!(members = stats.members, non_members = stats.non_members, "batch labelled");
        summary.labels.absorb(&stats);

        if options.dry_run {
            debug!(count = payloads.len(), "dry run, batch not written");
        } else {
            store.update_batch(&payloads).await?;
            summary.written += payloads.len();
        }
        summary.batches += 1;
    }

    summary.elapsed_secs = start.elapsed().as_secs_f64();
    info!(
        fetched = summary.fetched,
        members = summary.labels.members,
        non_members = summary.labels.non_members,
        assessed = summary.labels.assessed,
        written = summary.written,
        "labelling complete"
    );
    Ok(summary)
}
