//! Turns a batch of records into update payloads.
//!
//! Records are handled strictly in order. Assessment runs only for INEO
//! records whose mapping entry asks for it and that have no cached artifact.

use ineo_core::{MappingTable, Record, UpdatePayload};
use ineo_store::{AssessmentCache, CacheArtifact};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::assess::{EvaluateError, Evaluator, facet_bindings};
use crate::classifier::{ClassifyError, classify};

#[derive(Debug, Error)]
pub enum LabelError {
    #[error(transparent)]
    Classify(#[from] ClassifyError),
    #[error("INEO record {id} has no file reference")]
    MissingFileReference { id: String },
    #[error("assessment of {id} failed")]
    Evaluate {
        id: String,
        #[source]
        source: EvaluateError,
    },
}

/// Counters accumulated while labelling.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LabelStats {
    pub members: usize,
    pub non_members: usize,
    pub assessed: usize,
    /// Assessment wanted but an artifact already existed.
    pub skipped_cached: usize,
    /// Assessment wanted but no evaluator was configured.
    pub skipped_disabled: usize,
    pub cache_write_failures: usize,
}

impl LabelStats {
    pub fn absorb(&mut self, other: &LabelStats) {
        self.members += other.members;
        self.non_members += other.non_members;
        self.assessed += other.assessed;
        self.skipped_cached += other.skipped_cached;
        self.skipped_disabled += other.skipped_disabled;
        self.cache_write_failures += other.cache_write_failures;
    }
}

/// Classifies records and runs assessments for one labelling run.
pub struct Labeller<'a> {
    mapping: &'a MappingTable,
    cache: &'a AssessmentCache,
    evaluator: Option<&'a dyn Evaluator>,
    dry_run: bool,
}

impl<'a> Labeller<'a> {
    /// Labeller without an evaluator: assessments are skipped.
    pub fn new(mapping: &'a MappingTable, cache: &'a AssessmentCache) -> Self {
        Self {
            mapping,
            cache,
            evaluator: None,
            dry_run: false,
        }
    }

    pub fn with_evaluator(mut self, evaluator: &'a dyn Evaluator) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// In a dry run assessments still run, but nothing is written to the
    /// cache, so the next real run assesses the same records again.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Label every record in `records`, in order.
    ///
    /// The first error stops the batch and no payloads are returned for it.
    pub async fn label_batch(
        &self,
        records: &[Record],
        stats: &mut LabelStats,
    ) -> Result<Vec<UpdatePayload>, LabelError> {
        let mut payloads = Vec::with_capacity(records.len());
        for record in records {
            payloads.push(self.label(record, stats).await?);
        }
        Ok(payloads)
    }

    /// Label a single record.
    pub async fn label(
        &self,
        record: &Record,
        stats: &mut LabelStats,
    ) -> Result<UpdatePayload, LabelError> {
        let verdict = classify(record, self.mapping)?;
        debug!(
            id = %record.id,
            member = verdict.is_member,
            reason = verdict.reason.as_str(),
            entry = verdict.matched.as_deref().unwrap_or("-"),
            "classified"
        );

        if !verdict.is_member {
            stats.non_members += 1;
            return Ok(UpdatePayload::membership(&record.id, false));
        }
        stats.members += 1;

        let Some(file_reference) = record.file_reference.as_deref() else {
            error!(id = %record.id, "INEO record has no file reference");
            return Err(LabelError::MissingFileReference {
                id: record.id.clone(),
            });
        };

        if !verdict.assessment_needed {
            return Ok(UpdatePayload::membership(&record.id, true));
        }
        if self.cache.is_cached(&record.id) {
            debug!(id = %record.id, "assessment cached, skipping");
            stats.skipped_cached += 1;
            return Ok(UpdatePayload::membership(&record.id, true));
        }
        let Some(evaluator) = self.evaluator else {
            stats.skipped_disabled += 1;
            return Ok(UpdatePayload::membership(&record.id, true));
        };

        info!(id = %record.id, file = file_reference, "running assessment");
        let assessment = evaluator
            .evaluate(file_reference, &facet_bindings(&record.facets))
            .await
            .map_err(|source| LabelError::Evaluate {
                id: record.id.clone(),
                source,
            })?;
        stats.assessed += 1;

        if self.dry_run {
            debug!(id = %record.id, "dry run, assessment not archived");
        } else {
            let artifact = CacheArtifact::new(&record.id, assessment.score, assessment.report);
            if let Err(e) = self.cache.store(&artifact) {
                warn!(id = %record.id, error = ?e, "assessment not archived");
                stats.cache_write_failures += 1;
            }
        }

        Ok(UpdatePayload::assessed(&record.id, assessment.score))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use ineo_core::Provider;
    use serde_json::Value;

    use super::*;
    use crate::assess::Assessment;

    /// Records every call; fails for file references listed in `fail_on`.
    #[derive(Default)]
    struct FakeEvaluator {
        calls: Mutex<Vec<String>>,
        fail_on: Vec<String>,
    }

    impl FakeEvaluator {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Evaluator for FakeEvaluator {
        async fn evaluate(
            &self,
            file_reference: &str,
            bindings: &Value,
        ) -> Result<Assessment, EvaluateError> {
            self.calls.lock().unwrap().push(file_reference.to_string());
            if self.fail_on.iter().any(|f| f == file_reference) {
                return Err(EvaluateError::Output("boom".into()));
            }
            Ok(Assessment {
                score: 0.9,
                report: format!("report for {}", bindings["FACETS"]["id"]),
            })
        }
    }

    fn mapping() -> MappingTable {
        MappingTable::new(
            false,
            [
                Provider::new("Assessed").with_default(true).with_assessment(true),
                Provider::new("Plain").with_default(true),
                Provider::new("Excluded").with_default(false).with_assessment(true),
            ],
        )
    }

    fn record(id: &str, provider: &str) -> Record {
        let mut facets = serde_json::Map::new();
        facets.insert("id".into(), Value::String(id.into()));
        Record {
            data_provider: Some(provider.into()),
            file_reference: Some(format!("/data/{id}.xml")),
            facets,
            ..Record::new(id)
        }
    }

    #[tokio::test]
    async fn non_member_gets_minimal_payload() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (mapping, cache) = (mapping(), AssessmentCache::new(tmp.path()));
        let eval = FakeEvaluator::default();
        let labeller = Labeller::new(&mapping, &cache).with_evaluator(&eval);

        let mut stats = LabelStats::default();
        let payload = labeller.label(&record("r1", "Excluded"), &mut stats).await.unwrap();
        assert_eq!(payload, UpdatePayload::membership("r1", false));
        assert!(eval.calls().is_empty());
        assert_eq!(stats.non_members, 1);
    }

    #[tokio::test]
    async fn member_without_assessment_flag_is_not_assessed() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (mapping, cache) = (mapping(), AssessmentCache::new(tmp.path()));
        let eval = FakeEvaluator::default();
        let labeller = Labeller::new(&mapping, &cache).with_evaluator(&eval);

        let mut stats = LabelStats::default();
        let payload = labeller.label(&record("r1", "Plain"), &mut stats).await.unwrap();
        assert_eq!(payload, UpdatePayload::membership("r1", true));
        assert!(eval.calls().is_empty());
    }

    #[tokio::test]
    async fn assessment_runs_and_is_cached() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (mapping, cache) = (mapping(), AssessmentCache::new(tmp.path()));
        let eval = FakeEvaluator::default();
        let labeller = Labeller::new(&mapping, &cache).with_evaluator(&eval);

        let mut stats = LabelStats::default();
        let payload = labeller.label(&record("r1", "Assessed"), &mut stats).await.unwrap();
        assert_eq!(payload, UpdatePayload::assessed("r1", 0.9));
        assert_eq!(eval.calls(), ["/data/r1.xml"]);
        assert!(cache.is_cached("r1"));
        assert_eq!(stats.assessed, 1);

        let archived = std::fs::read_to_string(cache.artifact_path("r1")).unwrap();
        assert!(archived.contains("report for"));
    }

    #[tokio::test]
    async fn cached_record_never_reaches_evaluator() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (mapping, cache) = (mapping(), AssessmentCache::new(tmp.path()));
        let eval = FakeEvaluator::default();
        let labeller = Labeller::new(&mapping, &cache).with_evaluator(&eval);
        let batch = [record("r1", "Assessed"), record("r2", "Assessed")];

        let mut stats = LabelStats::default();
        labeller.label_batch(&batch, &mut stats).await.unwrap();
        assert_eq!(eval.calls().len(), 2);

        // Second run over the same records: everything is cached.
        let mut stats = LabelStats::default();
        let payloads = labeller.label_batch(&batch, &mut stats).await.unwrap();
        assert_eq!(eval.calls().len(), 2);
        assert_eq!(stats.skipped_cached, 2);
        assert!(payloads.iter().all(|p| p.is_member && p.assessment_score.is_none()));
    }

    #[tokio::test]
    async fn missing_key_aborts_batch() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (mapping, cache) = (mapping(), AssessmentCache::new(tmp.path()));
        let eval = FakeEvaluator::default();
        let labeller = Labeller::new(&mapping, &cache).with_evaluator(&eval);
        let keyless = Record {
            data_provider: None,
            ..record("r2", "unused")
        };
        let batch = [record("r1", "Plain"), keyless, record("r3", "Assessed")];

        let mut stats = LabelStats::default();
        let err = labeller.label_batch(&batch, &mut stats).await.unwrap_err();
        assert!(matches!(
            err,
            LabelError::Classify(ClassifyError::MissingProviderKey { ref id }) if id == "r2"
        ));
        // r3 was never reached.
        assert!(eval.calls().is_empty());
        assert!(!cache.is_cached("r3"));
    }

    #[tokio::test]
    async fn member_without_file_reference_is_an_integrity_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (mapping, cache) = (mapping(), AssessmentCache::new(tmp.path()));
        let labeller = Labeller::new(&mapping, &cache);
        let r = Record {
            file_reference: None,
            ..record("r1", "Plain")
        };

        let err = labeller.label(&r, &mut LabelStats::default()).await.unwrap_err();
        assert!(matches!(err, LabelError::MissingFileReference { ref id } if id == "r1"));

        // Non-members do not need one.
        let r = Record {
            file_reference: None,
            ..record("r2", "Excluded")
        };
        assert!(labeller.label(&r, &mut LabelStats::default()).await.is_ok());
    }

    #[tokio::test]
    async fn evaluator_failure_propagates() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (mapping, cache) = (mapping(), AssessmentCache::new(tmp.path()));
        let eval = FakeEvaluator {
            fail_on: vec!["/data/r1.xml".into()],
            ..Default::default()
        };
        let labeller = Labeller::new(&mapping, &cache).with_evaluator(&eval);

        let err = labeller
            .label(&record("r1", "Assessed"), &mut LabelStats::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LabelError::Evaluate { .. }));
        assert!(!cache.is_cached("r1"));
    }

    #[tokio::test]
    async fn cache_write_failure_is_not_fatal() {
        let tmp = tempfile::TempDir::new().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();
        let (mapping, cache) = (mapping(), AssessmentCache::new(&blocker));
        let eval = FakeEvaluator::default();
        let labeller = Labeller::new(&mapping, &cache).with_evaluator(&eval);

        let mut stats = LabelStats::default();
        let payload = labeller.label(&record("r1", "Assessed"), &mut stats).await.unwrap();
        assert_eq!(payload, UpdatePayload::assessed("r1", 0.9));
        assert_eq!(stats.cache_write_failures, 1);
    }

    #[tokio::test]
    async fn dry_run_assesses_without_archiving() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (mapping, cache) = (mapping(), AssessmentCache::new(tmp.path()));
        let eval = FakeEvaluator::default();

        let dry = Labeller::new(&mapping, &cache).with_evaluator(&eval).dry_run(true);
        let mut stats = LabelStats::default();
        let payload = dry.label(&record("r1", "Assessed"), &mut stats).await.unwrap();
        assert_eq!(payload, UpdatePayload::assessed("r1", 0.9));
        assert!(!cache.is_cached("r1"));

        // The real run still assesses and archives.
        let real = Labeller::new(&mapping, &cache).with_evaluator(&eval);
        let mut stats = LabelStats::default();
        let payload = real.label(&record("r1", "Assessed"), &mut stats).await.unwrap();
        assert_eq!(payload, UpdatePayload::assessed("r1", 0.9));
        assert_eq!(eval.calls().len(), 2);
        assert!(cache.is_cached("r1"));
    }

    #[tokio::test]
    async fn no_evaluator_skips_assessment() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (mapping, cache) = (mapping(), AssessmentCache::new(tmp.path()));
        let labeller = Labeller::new(&mapping, &cache);

        let mut stats = LabelStats::default();
        let payload = labeller.label(&record("r1", "Assessed"), &mut stats).await.unwrap();
        assert_eq!(payload, UpdatePayload::membership("r1", true));
        assert_eq!(stats.skipped_disabled, 1);
        assert!(!cache.is_cached("r1"));
    }
}
