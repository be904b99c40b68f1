//! # wmtsx-runner
//!
//! Ties the catalogue selection and the mosaic assembly together: loads the
//! YAML [`Config`], runs the [`Extractor`] over every AOI and reports a
//! [`RunSummary`].
//!
//! Output files land under
//! `<out_path>/<endpoint>/<aoi>/<YYYYmmdd_HHMMSS>/<aoi>_<YYYYmmddHHMMSS>_<zoom>_<distance>_<feature>.<ext>`
//! and are skipped on later runs unless overwrite is set.

pub mod cli;
pub mod config;
mod error;
pub mod output;
pub mod pipeline;
pub mod report;

pub use cli::Cli;
pub use config::{AoiConfig, CatalogueConfig, Config, DirLayout, EndpointConfig, OutputConfig, WorkerConfig};
pub use error::ExtractError;
pub use output::{ClaimRegistry, FsStore, MemoryStore, OutputResolver, OutputStore};
pub use pipeline::{AoiReport, ExtractSettings, Extractor, FeatureOutcome, FeatureReport};
pub use report::{inventory_table, RunSummary};

/// Result type for runner operations.
pub type Result<T> = std::result::Result<T, ExtractError>;
