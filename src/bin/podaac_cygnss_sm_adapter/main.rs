//! Converts a UCAR/CU CYGNSS L3 soil moisture file into the layout and
//! metadata conventions required for its PODAAC release.
//!
//! Each run handles one source file, writing the converted product next
//! to it with a `_` prefix on the name. The static flags file that ships
//! alongside the daily products carries no per-day data and is skipped.

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Utc;
use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use error_stack::ResultExt;

use cygnss_podaac::logging::init_logging;

use crate::config::{AdapterConfig, SchemaVariant};
use crate::constants::STATIC_FLAGS_BASENAME;
use crate::transcode::transcode;

mod config;
mod constants;
mod transcode;

#[derive(Debug, thiserror::Error)]
pub(crate) enum AdapterError {
    #[error("Path to source nc is not valid ({0})")]
    InvalidSourcePath(String),
    #[error("The source file is missing the required global attribute '{0}'")]
    MissingGlobalAttr(&'static str),
    #[error("The source file is missing the expected variable '{0}'")]
    MissingVariable(String),
    #[error("The source file contains the variable '{0}', which has no registered attribute set")]
    UnregisteredVariable(String),
    #[error("Error {0}")]
    Context(String),
}

impl AdapterError {
    pub(crate) fn context<S: ToString>(msg: S) -> Self {
        Self::Context(msg.to_string())
    }
}

fn main() -> ExitCode {
    let clargs = Cli::parse();
    init_logging(clargs.verbose.log_level_filter());
    match driver(clargs) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ERROR: {e}");
            log::debug!("Full error report:\n{e:?}");
            ExitCode::FAILURE
        }
    }
}

/// Convert a CYGNSS L3 soil moisture netCDF file for PODAAC release.
#[derive(Debug, Parser)]
struct Cli {
    /// Path to the UCAR/CU CYGNSS L3 soil moisture file to convert.
    source_nc_file: PathBuf,

    /// Which of the release layouts to produce.
    #[clap(long, value_enum, default_value_t = SchemaVariant::V1)]
    variant: SchemaVariant,

    #[clap(flatten)]
    verbose: Verbosity<InfoLevel>,
}

fn driver(clargs: Cli) -> error_stack::Result<(), AdapterError> {
    if !clargs.source_nc_file.is_file() {
        return Err(AdapterError::InvalidSourcePath(
            clargs.source_nc_file.display().to_string(),
        )
        .into());
    }

    let base_name = clargs
        .source_nc_file
        .file_name()
        .map(|f| f.to_string_lossy())
        .unwrap_or_default();
    if base_name == STATIC_FLAGS_BASENAME {
        log::info!("SKIPPING: {} carries no daily data", clargs.source_nc_file.display());
        return Ok(());
    }

    log::info!(
        "Converting {} with the {} layout",
        clargs.source_nc_file.display(),
        clargs.variant
    );
    let source = netcdf::open(&clargs.source_nc_file).change_context_lazy(|| {
        AdapterError::context(format!(
            "opening the source file {}",
            clargs.source_nc_file.display()
        ))
    })?;
    let config = AdapterConfig::derive(
        &clargs.source_nc_file,
        &source,
        clargs.variant,
        Utc::now().naive_utc(),
    )?;
    transcode(&source, &config)?;
    log::info!("Wrote {}", config.output_path.display());
    Ok(())
}
