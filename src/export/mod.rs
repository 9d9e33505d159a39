//! Export of API data to JSON or CSV files
//!
//! An export fills missing parameters from the navigation context, resolves
//! the data through the fetch client (and therefore the cache), and writes
//! either the payload as is or its flattened table.

pub mod flatten;
pub mod writer;

use chrono::Local;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

use crate::cache::{CacheKey, Params};
use crate::data::{FetchClient, FetchError, Transport};
use crate::navigation::NavigationContext;

/// Output file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ExportFormat {
    /// The payload as returned by the API, pretty-printed
    #[default]
    Json,
    /// One row per record with nested fields flattened into columns
    Csv,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            _ => Err(ExportError::UnsupportedFormat(s.to_string())),
        }
    }
}

fn describe_request(endpoint: &str, params: &Params) -> String {
    CacheKey::new(endpoint, params).canonical()
}

/// Errors that can occur during an export. No output file exists afterwards.
#[derive(Debug, Error)]
pub enum ExportError {
    /// The data could not be fetched
    #[error("export of {} failed: {source}", describe_request(.endpoint, .params))]
    Fetch {
        endpoint: String,
        params: Params,
        #[source]
        source: FetchError,
    },

    /// The API returned no records
    #[error("no data to export for {}", describe_request(.endpoint, .params))]
    NoData { endpoint: String, params: Params },

    #[error("unsupported export format '{0}', expected json or csv")]
    UnsupportedFormat(String),

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to encode JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl ExportError {
    /// Whether the export failed because the API rate limit was hit
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ExportError::Fetch { source, .. } if source.is_rate_limited())
    }
}

/// What to export and where
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRequest {
    pub endpoint: String,
    /// Explicit parameters; these always win over the navigation context
    pub params: Params,
    pub format: ExportFormat,
    pub force_refresh: bool,
    /// Exact output path; when absent a timestamped name is generated
    pub output: Option<PathBuf>,
    /// Directory for generated file names
    pub output_dir: PathBuf,
}

impl ExportRequest {
    pub fn new(endpoint: impl Into<String>, format: ExportFormat) -> Self {
        Self {
            endpoint: endpoint.into(),
            params: Params::new(),
            format,
            force_refresh: false,
            output: None,
            output_dir: PathBuf::from("."),
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn params(mut self, params: Params) -> Self {
        self.params.extend(params);
        self
    }

    pub fn force_refresh(mut self, force_refresh: bool) -> Self {
        self.force_refresh = force_refresh;
        self
    }

    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }
}

/// Description of a written export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedFile {
    pub path: PathBuf,
    pub format: ExportFormat,
    /// Number of records written
    pub records: usize,
    /// Column names, for CSV exports
    pub columns: Option<Vec<String>>,
    /// Parameters the request was sent with after auto-fill
    pub params: Params,
    pub from_cache: bool,
}

/// Runs one export
///
/// # Behavior
/// - Parameters missing from the request are filled from `context`
/// - Data is resolved through `client`, honoring `force_refresh`
/// - An empty payload aborts with `ExportError::NoData`
/// - The output file only appears once it is completely written
pub async fn export<T: Transport>(
    client: &mut FetchClient<T>,
    context: &NavigationContext,
    request: &ExportRequest,
) -> Result<ExportedFile, ExportError> {
    let endpoint = request.endpoint.as_str();
    let params = context.resolve_params(endpoint, &request.params);

    let fetched = client
        .fetch(endpoint, &params, request.force_refresh)
        .await
        .map_err(|source| ExportError::Fetch {
            endpoint: endpoint.to_string(),
            params: params.clone(),
            source,
        })?;

    let records = flatten::records(&fetched.value);
    if records.is_empty() {
        return Err(ExportError::NoData {
            endpoint: endpoint.to_string(),
            params,
        });
    }
    let record_count = records.len();

    let path = match &request.output {
        Some(path) => path.clone(),
        None => writer::unique_path(
            &request.output_dir,
            &writer::default_file_name(endpoint, request.format, Local::now()),
        ),
    };

    let columns = match request.format {
        ExportFormat::Json => {
            writer::write_json(&path, &fetched.value)?;
            None
        }
        ExportFormat::Csv => {
            let table = flatten::to_table(&records);
            writer::write_csv(&path, &table)?;
            Some(table.columns)
        }
    };

    info!(
        path = %path.display(),
        format = %request.format,
        records = record_count,
        from_cache = fetched.from_cache,
        "Exported {} data",
        endpoint
    );

    Ok(ExportedFile {
        path,
        format: request.format,
        records: record_count,
        columns,
        params,
        from_cache: fetched.from_cache,
    })
}
