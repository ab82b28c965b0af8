//! Upgrade Registry and Orchestrator
//!
//! Steps are registered as an explicit list. The orchestrator runs every step
//! newer than the persisted watermark in version order and advances the
//! watermark after each success, so a completed step never reruns.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cmdb_store::{doc, Datastore};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, info_span, Instrument};

use crate::config::UpgraderConfig;
use crate::error::{UpgradeError, UpgradeResult};
use crate::reshard::ReshardStep;
use crate::tables::SYSTEM_TABLE;
use crate::version::UpgradeVersion;

const WATERMARK_TYPE: &str = "version";
const CURRENT_VERSION_FIELD: &str = "current_version";
const LAST_TIME_FIELD: &str = "last_time";

/// One versioned upgrade
#[async_trait]
pub trait UpgradeStep: Send + Sync {
    /// Version string, e.g. `y3.10.202104221702`
    fn version(&self) -> &str;

    /// Human-readable summary
    fn description(&self) -> &str;

    /// Apply the step. Must be safe to rerun after a failure.
    async fn run(&self, store: Arc<dyn Datastore>, config: &UpgraderConfig) -> UpgradeResult<()>;
}

/// Steps ordered by version
pub struct StepRegistry {
    steps: Vec<(UpgradeVersion, Arc<dyn UpgradeStep>)>,
}

impl StepRegistry {
    /// Build from an explicit step list
    pub fn new(steps: Vec<Arc<dyn UpgradeStep>>) -> UpgradeResult<Self> {
        let mut parsed = steps
            .into_iter()
            .map(|step| Ok((step.version().parse::<UpgradeVersion>()?, step)))
            .collect::<UpgradeResult<Vec<_>>>()?;
        parsed.sort_by(|a, b| a.0.cmp(&b.0));

        if let Some(pair) = parsed.windows(2).find(|w| w[0].0 == w[1].0) {
            return Err(UpgradeError::DuplicateStep(pair[1].0.to_string()));
        }

        Ok(Self { steps: parsed })
    }

    /// Steps shipped with this crate
    pub fn standard() -> UpgradeResult<Self> {
        Self::new(vec![Arc::new(ReshardStep) as Arc<dyn UpgradeStep>])
    }

    /// Registered versions in run order
    pub fn versions(&self) -> Vec<&UpgradeVersion> {
        self.steps.iter().map(|(v, _)| v).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn contains(&self, version: &UpgradeVersion) -> bool {
        self.steps.iter().any(|(v, _)| v == version)
    }
}

/// Outcome of an orchestrator run
#[derive(Debug, Clone, Serialize)]
pub struct UpgradeReport {
    /// Correlates the run's log lines
    pub run_id: String,
    /// Watermark before the run
    pub from_version: Option<String>,
    /// Watermark after the run
    pub to_version: Option<String>,
    /// Steps applied by this run
    pub applied: Vec<String>,
    /// Steps at or below the watermark
    pub skipped: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Runs registered steps against a store
pub struct Orchestrator {
    store: Arc<dyn Datastore>,
    registry: StepRegistry,
    config: UpgraderConfig,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn Datastore>, registry: StepRegistry, config: UpgraderConfig) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    /// Persisted watermark; `None` for a store that was never upgraded
    pub async fn current_version(&self) -> UpgradeResult<Option<UpgradeVersion>> {
        let row = self
            .store
            .find_one(SYSTEM_TABLE, &doc(json!({ "type": WATERMARK_TYPE })))
            .await?;

        match row.as_ref().and_then(|r| r.get(CURRENT_VERSION_FIELD)) {
            Some(Value::String(version)) => Ok(Some(version.parse()?)),
            Some(other) => Err(UpgradeError::metadata(format!(
                "watermark {} is not a string: {}",
                CURRENT_VERSION_FIELD, other
            ))),
            None => Ok(None),
        }
    }

    async fn save_version(&self, version: &UpgradeVersion) -> UpgradeResult<()> {
        let filter = doc(json!({ "type": WATERMARK_TYPE }));
        let watermark = doc(json!({
            CURRENT_VERSION_FIELD: version.as_str(),
            LAST_TIME_FIELD: Utc::now().to_rfc3339(),
        }));
        self.store.upsert(SYSTEM_TABLE, &filter, watermark).await?;
        Ok(())
    }

    /// Run every pending step
    pub async fn upgrade(&self) -> UpgradeResult<UpgradeReport> {
        self.run_until(None).await
    }

    /// Run pending steps up to and including `target`
    pub async fn upgrade_to(&self, target: &str) -> UpgradeResult<UpgradeReport> {
        let target: UpgradeVersion = target.parse()?;
        if !self.registry.contains(&target) {
            return Err(UpgradeError::InvalidVersion(format!(
                "{} is not a registered upgrade step",
                target
            )));
        }
        self.run_until(Some(&target)).await
    }

    async fn run_until(&self, target: Option<&UpgradeVersion>) -> UpgradeResult<UpgradeReport> {
        self.config.validate()?;

        let run_id = uuid::Uuid::new_v4().to_string();
        let span = info_span!("upgrade", run_id = %run_id);

        let outcome: UpgradeResult<UpgradeReport> = async {
            let started_at = Utc::now();
            let from = self.current_version().await?;
            info!(
                current = from.as_ref().map(|v| v.as_str()).unwrap_or("none"),
                registered = self.registry.len(),
                "Starting upgrade"
            );

            let mut report = UpgradeReport {
                run_id: run_id.clone(),
                from_version: from.as_ref().map(|v| v.to_string()),
                to_version: from.as_ref().map(|v| v.to_string()),
                applied: Vec::new(),
                skipped: Vec::new(),
                started_at,
                finished_at: started_at,
            };

            for (version, step) in &self.registry.steps {
                if from.as_ref().is_some_and(|current| version <= current) {
                    report.skipped.push(version.to_string());
                    continue;
                }
                if target.is_some_and(|t| version > t) {
                    break;
                }

                info!(version = %version, description = step.description(), "Running upgrade step");
                if let Err(e) = step.run(self.store.clone(), &self.config).await {
                    error!(version = %version, error = %e, "Upgrade step failed");
                    return Err(UpgradeError::StepFailed {
                        version: version.to_string(),
                        source: Box::new(e),
                    });
                }

                self.save_version(version).await?;
                report.applied.push(version.to_string());
                report.to_version = Some(version.to_string());
                info!(version = %version, "Upgrade step complete");
            }

            report.finished_at = Utc::now();
            info!(
                applied = report.applied.len(),
                skipped = report.skipped.len(),
                "Upgrade finished"
            );
            Ok(report)
        }
        .instrument(span)
        .await;
        outcome
    }
}
