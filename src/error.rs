use thiserror::Error;

/// Errors raised by the receivables dashboard.
///
/// The first four variants are the user-facing kinds that views and the
/// exporter surface; the rest wrap infrastructure failures.
#[derive(Debug, Error)]
pub enum DashboardError {
    /// No workbook has been uploaded yet (or it was reset).
    #[error("no workbook has been uploaded")]
    MissingInput,

    /// Required columns are absent for the chosen view.
    #[error("view {view} cannot run, missing columns: {}", missing.join(", "))]
    SchemaMismatch { view: String, missing: Vec<String> },

    /// Filters reduced the frame to zero rows.
    #[error("view {view} has no rows for the current filters")]
    EmptyResult { view: String },

    /// The serializer rejected the consolidated export.
    #[error("export failed: {0}")]
    ExportFailure(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("workbook read error: {0}")]
    Workbook(String),

    #[error("CSV read error: {0}")]
    Csv(#[from] csv::Error),

    #[error("snapshot error: {0}")]
    Snapshot(#[from] bincode::Error),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("mail error: {0}")]
    Mail(String),
}

impl From<calamine::Error> for DashboardError {
    fn from(e: calamine::Error) -> Self {
        DashboardError::Workbook(e.to_string())
    }
}

impl From<rust_xlsxwriter::XlsxError> for DashboardError {
    fn from(e: rust_xlsxwriter::XlsxError) -> Self {
        DashboardError::ExportFailure(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DashboardError>;
