//! Mining warehouse ETL
//!
//! Loads three CSV extracts (equipment usage, production, financial transactions)
//! into a Postgres star schema in four independently runnable stages:
//!
//! 1. [`extract`] - full refresh of the staging tables
//! 2. [`conform`] - append new dimension members by natural key
//! 3. [`resolve`] - join staging rows to surrogate keys, append new fact rows
//! 4. [`validate`] - grade the loaded warehouse
//!
//! [`pipeline`] composes them under a cross-run lock and records every stage in
//! the job-run audit trail. [`store`] is the warehouse seam.

pub mod config;
pub mod conform;
pub mod dimension;
pub mod error;
pub mod extract;
pub mod fact;
pub mod pipeline;
pub mod resolve;
pub mod staging;
pub mod store;
pub mod validate;

pub use config::{Settings, SourceFiles};
pub use error::{EtlError, Result};
pub use pipeline::{run_all, run_stage, PipelineOptions, RunSummary, Stage, StageOutput};
pub use store::memory::MemoryWarehouse;
pub use store::postgres::PgWarehouse;
pub use store::Warehouse;
pub use validate::{QualityReport, Verdict};
