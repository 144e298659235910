//! Error types and result definitions for snapshot export operations.
//!
//! [`ExportError`] carries a classification, a static description, optional dynamic detail and
//! source, the callsite location and a captured backtrace. Several errors can be aggregated
//! into one, which is how per-table failures are summarized.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Result type for export operations.
pub type ExportResult<T> = Result<T, ExportError>;

#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type for export operations.
///
/// Errors are cheap to clone so that one failure can be both logged, reported to the event
/// sink and returned in the final export report.
#[derive(Debug, Clone)]
pub struct ExportError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    Single(ErrorPayload),
    Many {
        errors: Vec<ExportError>,
        location: &'static Location<'static>,
    },
}

/// Categories of failures that can occur while exporting a table.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Connection Errors
    SourceConnectionFailed,
    DestinationConnectionFailed,

    // Query Errors
    SourceQueryFailed,

    // Schema Errors
    SourceSchemaError,
    MissingTableSchema,
    UnsupportedPrimaryKey,

    // Data Errors
    ConversionError,
    InvalidData,

    // Configuration Errors
    ConfigError,

    // IO & Serialization Errors
    IoError,
    SerializationError,
    DeserializationError,

    // Checkpoint Errors
    CheckpointStoreFailed,

    // Publishing Errors
    PublishFailed,
    SchemaRegistryError,

    // State & Workflow Errors
    InvalidState,
    TableExportWorkerPanic,

    // Unknown / Uncategorized
    Unknown,

    // Used by tests that inject failures through failpoints.
    #[cfg(feature = "failpoints")]
    InjectedFailure,
}

impl ExportError {
    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For aggregated errors, returns the kind of the first error or [`ErrorKind::Unknown`]
    /// when the aggregate is empty.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns every [`ErrorKind`] contained in this error, flattening aggregates.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => errors.iter().flat_map(|err| err.kinds()).collect(),
        }
    }

    /// Returns the static description of the error.
    pub fn description(&self) -> &str {
        match self.repr {
            ErrorRepr::Single(ref payload) => &payload.description,
            ErrorRepr::Many { .. } => "Multiple errors occurred",
        }
    }

    /// Returns the dynamic detail, if any.
    ///
    /// For aggregated errors, returns the first detail found.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Attaches an originating error, exposed through [`error::Error::source`].
    ///
    /// Has no effect on aggregated errors.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }
        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        ExportError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }
}

impl PartialEq for ExportError {
    fn eq(&self, other: &ExportError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (ErrorRepr::Many { errors: a, .. }, ErrorRepr::Many { errors: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                if let Some(detail) = payload.detail.as_deref() {
                    write_indented(f, "Detail:", detail)?;
                }

                if payload.backtrace.status() == BacktraceStatus::Captured {
                    write_indented(f, "Backtrace:", &payload.backtrace.to_string())?;
                }

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                let count = errors.len();
                write!(
                    f,
                    "[Many] {} error{} aggregated @ {}:{}:{}",
                    count,
                    if count == 1 { "" } else { "s" },
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                for (index, error) in errors.iter().enumerate() {
                    let rendered = error.to_string();
                    let mut lines = rendered.lines();
                    write!(f, "\n  {}. {}", index + 1, lines.next().unwrap_or_default())?;
                    for line in lines {
                        write!(f, "\n     {line}")?;
                    }
                }

                Ok(())
            }
        }
    }
}

/// Writes a titled block with every line indented under the title.
fn write_indented(f: &mut fmt::Formatter<'_>, title: &str, body: &str) -> fmt::Result {
    if body.trim().is_empty() {
        return write!(f, "\n  {title} <empty>");
    }

    write!(f, "\n  {title}")?;
    for line in body.lines() {
        if line.trim().is_empty() {
            write!(f, "\n    ")?;
        } else {
            write!(f, "\n    {line}")?;
        }
    }

    Ok(())
}

impl error::Error for ExportError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

impl From<(ErrorKind, &'static str)> for ExportError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> ExportError {
        ExportError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

impl<D> From<(ErrorKind, &'static str, D)> for ExportError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> ExportError {
        ExportError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Aggregates errors; a single error is returned unwrapped.
impl<E> From<Vec<E>> for ExportError
where
    E: Into<ExportError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> ExportError {
        let location = Location::caller();
        let mut errors: Vec<ExportError> = errors.into_iter().map(Into::into).collect();

        if errors.len() == 1
            && let Some(error) = errors.pop()
        {
            return error;
        }

        ExportError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

impl From<std::io::Error> for ExportError {
    #[track_caller]
    fn from(err: std::io::Error) -> ExportError {
        let detail = err.to_string();
        ExportError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Maps syntax and data errors to [`ErrorKind::DeserializationError`] and everything else to
/// [`ErrorKind::SerializationError`].
impl From<serde_json::Error> for ExportError {
    #[track_caller]
    fn from(err: serde_json::Error) -> ExportError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        let detail = err.to_string();
        ExportError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<apache_avro::Error> for ExportError {
    #[track_caller]
    fn from(err: apache_avro::Error) -> ExportError {
        let detail = err.to_string();
        ExportError::from_components(
            ErrorKind::SerializationError,
            Cow::Borrowed("Avro encoding failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<reqwest::Error> for ExportError {
    #[track_caller]
    fn from(err: reqwest::Error) -> ExportError {
        let kind = if err.is_connect() || err.is_timeout() {
            ErrorKind::DestinationConnectionFailed
        } else {
            ErrorKind::SchemaRegistryError
        };

        let detail = err.to_string();
        ExportError::from_components(
            kind,
            Cow::Borrowed("Schema registry request failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Maps database errors to [`ErrorKind::SourceQueryFailed`], I/O errors to
/// [`ErrorKind::IoError`] and pool errors to [`ErrorKind::SourceConnectionFailed`].
impl From<sqlx::Error> for ExportError {
    #[track_caller]
    fn from(err: sqlx::Error) -> ExportError {
        let kind = match &err {
            sqlx::Error::Io(_) => ErrorKind::IoError,
            sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Tls(_) => {
                ErrorKind::SourceConnectionFailed
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                ErrorKind::ConversionError
            }
            _ => ErrorKind::SourceQueryFailed,
        };

        let detail = err.to_string();
        ExportError::from_components(
            kind,
            Cow::Borrowed("Database operation failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<sqlx::migrate::MigrateError> for ExportError {
    #[track_caller]
    fn from(err: sqlx::migrate::MigrateError) -> ExportError {
        let detail = err.to_string();
        ExportError::from_components(
            ErrorKind::CheckpointStoreFailed,
            Cow::Borrowed("Checkpoint store migrations failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_is_rendered_below_the_description() {
        let err = ExportError::from((
            ErrorKind::SourceSchemaError,
            "Table has no primary key",
            "public.events",
        ));

        let rendered = err.to_string();

        assert!(rendered.starts_with("[SourceSchemaError] Table has no primary key @ "));
        assert!(rendered.contains("Detail:\n    public.events"));
        assert_eq!(err.detail(), Some("public.events"));
    }

    #[test]
    fn single_error_vector_is_not_wrapped() {
        let err = ExportError::from(vec![ExportError::from((
            ErrorKind::PublishFailed,
            "Broker rejected the record",
        ))]);

        assert_eq!(err.kind(), ErrorKind::PublishFailed);
        assert!(err.backtrace().is_some());
    }

    #[test]
    fn aggregated_errors_expose_all_kinds() {
        let err = ExportError::from(vec![
            ExportError::from((ErrorKind::SourceQueryFailed, "Page query failed")),
            ExportError::from((ErrorKind::CheckpointStoreFailed, "Checkpoint write failed")),
        ]);

        assert_eq!(err.kind(), ErrorKind::SourceQueryFailed);
        assert_eq!(
            err.kinds(),
            vec![ErrorKind::SourceQueryFailed, ErrorKind::CheckpointStoreFailed]
        );
        assert!(err.to_string().starts_with("[Many] 2 errors aggregated"));
    }
}
