//! CIE-HARVEST - CIE-10-ES code harvester
//!
//! Builds the full set of CIE-10-ES procedure codes from the eCIEMaps
//! service and exports them as CSV and into a search index. Diagnoses
//! (CIE-10-MC) and the drug/chemical index are harvested the same way.
//!
//! ## Procedure pipeline
//! Taxonomy (type -> subtype -> procedure class) -> axis tables ->
//! cartesian expansion into seven-character codes -> per-code detail
//! enrichment -> CSV + bulk index
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cie_harvest::{
//!     EciemapsClient, Harvest, HarvestConfig, HttpIndexSink, ProcedurePipeline, RunOptions,
//! };
//!
//! # async fn run() -> cie_harvest::Result<()> {
//! let config = HarvestConfig::default();
//! let api = EciemapsClient::new(&config)?;
//! let sink = HttpIndexSink::new(&config)?;
//! let options = RunOptions {
//!     csv_path: Some("cie10-es-procedures.csv".into()),
//!     ..RunOptions::default()
//! };
//! let report = ProcedurePipeline::new(Harvest::new(&api, &sink, &config, options))
//!     .run()
//!     .await?;
//! println!("{}", report.summary());
//! # Ok(())
//! # }
//! ```

// Core error handling
pub mod error;

// Settings and failure accounting
pub mod config;
pub mod report;

// Remote service client
pub mod eciemaps;
pub mod fanout;

// Procedure stages
pub mod enricher;
pub mod expander;
pub mod taxonomy;

// Other datasets
pub mod chemicals;
pub mod diagnoses;

// Outputs
pub mod sink;

pub mod pipeline;

pub use config::HarvestConfig;
pub use eciemaps::{ClassificationApi, EciemapsClient, StaticApi};
pub use enricher::{EnrichedMap, EnrichedRecord, Enricher, Gender};
pub use error::{HarvestError, Result};
pub use expander::{CombinationKey, CombinationMap, CombinationRecord, Expander};
pub use pipeline::{
    ChemicalPipeline, DiagnosisPipeline, Harvest, IndexMode, ProcedurePipeline, RunOptions,
    RunReport,
};
pub use report::{FailureReport, FetchFailure, Stage, StageOutput};
pub use sink::{FlatRecord, HttpIndexSink, IndexReport, IndexSink, MemoryIndexSink};
pub use taxonomy::TaxonomyFetcher;
