//! Pipeline - Runs the four stages under the run lock and records each in the audit trail
//!
//! Responsibilities:
//! - Hold the cross-run lock for a single stage or a full run
//! - Record a job run per stage invocation (running -> ok | failed)
//! - Compose Extract -> Dimensions -> Facts -> Validate, stopping at the first failure
//!
//! Every stage commits on its own. A failed run is recovered by rerunning from the
//! failed stage.

use crate::config::{Settings, SourceFiles};
use crate::conform::{conform_dimensions, ConformSummary};
use crate::error::{EtlError, Result};
use crate::extract::{extract, ExtractSummary};
use crate::resolve::{resolve_facts, ResolveSummary, UnresolvedPolicy};
use crate::store::{JobOutcome, Warehouse};
use crate::validate::{validate, QualityReport, Verdict};
use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extract,
    Dimensions,
    Facts,
    Validate,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Extract, Stage::Dimensions, Stage::Facts, Stage::Validate];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Extract => "extract",
            Stage::Dimensions => "dimensions",
            Stage::Facts => "facts",
            Stage::Validate => "validate",
        }
    }
}

/// Everything the stages need besides the warehouse.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub sources: SourceFiles,
    pub unresolved_policy: UnresolvedPolicy,
    pub null_threshold: u64,
    pub fail_on: Verdict,
    /// `None` keeps the quality report off disk.
    pub report_path: Option<PathBuf>,
}

impl PipelineOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            sources: settings.sources.clone(),
            unresolved_policy: settings.unresolved_policy,
            null_threshold: settings.null_threshold,
            fail_on: settings.fail_on,
            report_path: Some(settings.quality_report_path.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StageOutput {
    Extract(ExtractSummary),
    Dimensions(ConformSummary),
    Facts(ResolveSummary),
    Validate(QualityReport),
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub extract: ExtractSummary,
    pub dimensions: ConformSummary,
    pub facts: ResolveSummary,
    pub quality: QualityReport,
}

async fn with_run_lock<W, T, Fut>(warehouse: &W, work: Fut) -> Result<T>
where
    W: Warehouse,
    Fut: Future<Output = Result<T>>,
{
    let lock = warehouse.try_lock_run().await?.ok_or(EtlError::RunLocked)?;
    let result = work.await;
    let unlocked = warehouse.unlock_run(lock).await;
    let value = result?;
    unlocked?;
    Ok(value)
}

/// Wraps one stage in a job run. Failures are logged and re-raised unchanged.
async fn audited<W, T, Fut>(warehouse: &W, stage: Stage, work: Fut) -> Result<T>
where
    W: Warehouse,
    T: Serialize,
    Fut: Future<Output = Result<T>>,
{
    info!(stage = stage.as_str(), "Stage started");
    let job_run_id = warehouse.start_job_run(stage).await?;

    match work.await {
        Ok(output) => {
            let detail = serde_json::to_value(&output)?;
            warehouse
                .finish_job_run(job_run_id, &JobOutcome::ok(detail))
                .await?;
            info!(stage = stage.as_str(), %job_run_id, "Stage finished");
            Ok(output)
        }
        Err(e) => {
            error!(stage = stage.as_str(), %job_run_id, error = %e, "Stage failed");
            if let Err(audit) = warehouse
                .finish_job_run(job_run_id, &JobOutcome::failed(&e))
                .await
            {
                warn!(%job_run_id, error = %audit, "Could not record failed job run");
            }
            Err(e)
        }
    }
}

async fn execute_stage<W: Warehouse>(
    warehouse: &W,
    stage: Stage,
    options: &PipelineOptions,
) -> Result<StageOutput> {
    let output = match stage {
        Stage::Extract => StageOutput::Extract(
            audited(warehouse, stage, extract(warehouse, &options.sources)).await?,
        ),
        Stage::Dimensions => StageOutput::Dimensions(
            audited(warehouse, stage, conform_dimensions(warehouse)).await?,
        ),
        Stage::Facts => StageOutput::Facts(
            audited(
                warehouse,
                stage,
                resolve_facts(warehouse, options.unresolved_policy),
            )
            .await?,
        ),
        Stage::Validate => StageOutput::Validate(
            audited(
                warehouse,
                stage,
                validate(
                    warehouse,
                    options.null_threshold,
                    options.report_path.as_deref(),
                    options.fail_on,
                ),
            )
            .await?,
        ),
    };
    Ok(output)
}

/// Runs a single stage on its own, under the run lock.
pub async fn run_stage<W: Warehouse>(
    warehouse: &W,
    stage: Stage,
    options: &PipelineOptions,
) -> Result<StageOutput> {
    with_run_lock(warehouse, execute_stage(warehouse, stage, options)).await
}

async fn run_stages<W: Warehouse>(warehouse: &W, options: &PipelineOptions) -> Result<RunSummary> {
    let extracted = audited(warehouse, Stage::Extract, extract(warehouse, &options.sources)).await?;
    let conformed = audited(warehouse, Stage::Dimensions, conform_dimensions(warehouse)).await?;
    let resolved = audited(
        warehouse,
        Stage::Facts,
        resolve_facts(warehouse, options.unresolved_policy),
    )
    .await?;
    let quality = audited(
        warehouse,
        Stage::Validate,
        validate(
            warehouse,
            options.null_threshold,
            options.report_path.as_deref(),
            options.fail_on,
        ),
    )
    .await?;

    Ok(RunSummary {
        extract: extracted,
        dimensions: conformed,
        facts: resolved,
        quality,
    })
}

/// Full run: Extract -> Dimensions -> Facts -> Validate under one lock.
pub async fn run_all<W: Warehouse>(warehouse: &W, options: &PipelineOptions) -> Result<RunSummary> {
    info!("Pipeline run started");
    let summary = with_run_lock(warehouse, run_stages(warehouse, options)).await?;
    info!(
        staged = summary.extract.total_rows(),
        dimension_members = summary.dimensions.total_inserted(),
        facts = summary.facts.total_inserted(),
        verdict = %summary.quality.verdict,
        "Pipeline run finished"
    );
    Ok(summary)
}
