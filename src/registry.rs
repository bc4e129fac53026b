//! Schema Registry
//!
//! Maps logical operation names and the active regulatory layout version to
//! on-disk XSD validators.
//!
//! File layout under the registry root:
//!
//! ```text
//! xsd/
//! ├── EnvioLoteEventos-v1_1_1.xsd            operation schemas
//! ├── ConsultaLoteEventos-v1_0_0.xsd
//! ├── ...
//! └── vS_1_0/                                one directory per layout version
//!     ├── evtMonit-vS_1_0.xsd                one file per event type
//!     └── ...
//! ```
//!
//! Version strings are normalized by replacing `.` and `-` with `_`; this
//! rule determines file lookup and must match the names the schema
//! distribution ships with.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use libxml::schemas::{SchemaParserContext, SchemaValidationContext};
use libxml::tree::Document;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::xml;

/// Normalize a version string for file and namespace lookup.
pub fn normalize_version(version: &str) -> String {
    version.replace(['.', '-'], "_")
}

/// The webservice operations with their own envelope or return schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Send,
    Retrieve,
    SendReturn,
    EventReturn,
    ProcessReturn,
    QueryEmployerEvents,
    QueryTableEvents,
    QueryWorkerEvents,
    QueryEventsReturn,
    DownloadById,
    DownloadByReceipt,
    DownloadReturn,
}

impl Operation {
    /// File stem of the operation's XSD.
    pub fn xsd_stem(&self) -> &'static str {
        match self {
            Operation::Send => "EnvioLoteEventos",
            Operation::Retrieve => "ConsultaLoteEventos",
            Operation::SendReturn => "RetornoEnvioLoteEventos",
            Operation::EventReturn => "RetornoEvento",
            Operation::ProcessReturn => "RetornoProcessamentoLote",
            Operation::QueryEmployerEvents => "ConsultaIdentificadoresEventosEmpregador",
            Operation::QueryTableEvents => "ConsultaIdentificadoresEventosTabela",
            Operation::QueryWorkerEvents => "ConsultaIdentificadoresEventosTrabalhador",
            Operation::QueryEventsReturn => "RetornoConsultaIdentificadoresEventos",
            Operation::DownloadById => "SolicitacaoDownloadEventosPorId",
            Operation::DownloadByReceipt => "SolicitacaoDownloadEventosPorNrRecibo",
            Operation::DownloadReturn => "RetornoSolicitacaoDownloadEventos",
        }
    }

    /// Schema version currently published for the operation.
    pub fn default_version(&self) -> &'static str {
        match self {
            Operation::Send => "1.1.1",
            Operation::Retrieve => "1.0.0",
            Operation::SendReturn => "1.1.0",
            Operation::EventReturn => "1.2.1",
            Operation::ProcessReturn => "1.3.0",
            Operation::QueryEmployerEvents
            | Operation::QueryTableEvents
            | Operation::QueryWorkerEvents
            | Operation::QueryEventsReturn
            | Operation::DownloadById
            | Operation::DownloadByReceipt
            | Operation::DownloadReturn => "1.0.0",
        }
    }
}

/// A loaded XSD validator.
pub struct SchemaValidator {
    context: SchemaValidationContext,
    source: PathBuf,
    last_errors: Vec<String>,
}

impl std::fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaValidator")
            .field("source", &self.source)
            .field("last_errors", &self.last_errors)
            .finish_non_exhaustive()
    }
}

impl SchemaValidator {
    fn structured_messages(errors: Vec<libxml::error::StructuredError>) -> Vec<String> {
        errors
            .into_iter()
            .map(|e| e.message.unwrap_or_default().trim().to_string())
            .collect()
    }

    /// Validate and return `true`/`false`, capturing the error log.
    pub fn is_valid(&mut self, doc: &Document) -> bool {
        match self.context.validate_document(doc) {
            Ok(()) => {
                self.last_errors.clear();
                true
            }
            Err(errors) => {
                self.last_errors = Self::structured_messages(errors);
                false
            }
        }
    }

    /// Validate and fail with the complete, ordered violation list.
    pub fn validate(&mut self, doc: &Document) -> Result<()> {
        if self.is_valid(doc) {
            Ok(())
        } else {
            Err(Error::Validation {
                messages: self.last_errors.clone(),
            })
        }
    }

    /// Violation messages captured by the most recent validation.
    pub fn last_errors(&self) -> &[String] {
        &self.last_errors
    }

    /// Path of the XSD file this validator was loaded from.
    pub fn source(&self) -> &Path {
        &self.source
    }
}

/// Registry of operation and per-event XSDs rooted at one directory.
pub struct SchemaRegistry {
    root: PathBuf,
    layout_version: String,
    versions: HashMap<Operation, String>,
}

impl SchemaRegistry {
    /// Create a registry over `root` with the active regulatory layout
    /// version (e.g. `"S-1.1"`) used for per-event schema lookup.
    pub fn new(root: impl AsRef<Path>, layout_version: impl Into<String>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            layout_version: layout_version.into(),
            versions: HashMap::new(),
        }
    }

    /// Override published operation versions (e.g. from configuration).
    pub fn with_versions(mut self, overrides: HashMap<Operation, String>) -> Self {
        self.versions = overrides;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Active regulatory layout version for event documents.
    pub fn layout_version(&self) -> &str {
        &self.layout_version
    }

    /// Version in effect for an operation (override or published default).
    pub fn operation_version(&self, operation: Operation) -> &str {
        self.versions
            .get(&operation)
            .map(String::as_str)
            .unwrap_or_else(|| operation.default_version())
    }

    /// Resolve the validator for an operation envelope. `version` overrides
    /// the registry's version table when given.
    pub fn resolve(&self, operation: Operation, version: Option<&str>) -> Result<SchemaValidator> {
        let version = version.unwrap_or_else(|| self.operation_version(operation));
        let file = format!(
            "{}-v{}.xsd",
            operation.xsd_stem(),
            normalize_version(version)
        );
        self.load(self.root.join(file), operation.xsd_stem(), version)
    }

    /// Resolve the validator for an event document by inspecting the local
    /// name of its single top-level child element.
    pub fn resolve_for_document(&self, doc: &Document) -> Result<SchemaValidator> {
        let root = xml::root_element(doc)?;
        let event = xml::first_child_element(&root).ok_or_else(|| {
            Error::MalformedInput("event document has no top-level child element".into())
        })?;
        let event_name = event.get_name();
        let layout = normalize_version(&self.layout_version);
        let file = self
            .root
            .join(format!("v{layout}"))
            .join(format!("{event_name}-v{layout}.xsd"));
        self.load(file, &event_name, &self.layout_version)
    }

    fn load(&self, path: PathBuf, name: &str, version: &str) -> Result<SchemaValidator> {
        if !path.is_file() {
            return Err(Error::SchemaNotFound {
                name: name.to_string(),
                version: version.to_string(),
            });
        }
        debug!(xsd = %path.display(), "loading schema");
        let mut parser = SchemaParserContext::from_file(&path.display().to_string());
        let context = SchemaValidationContext::from_parser(&mut parser).map_err(|errors| {
            Error::Xml(format!(
                "XSD {} failed to parse: {}",
                path.display(),
                SchemaValidator::structured_messages(errors).join("; ")
            ))
        })?;
        Ok(SchemaValidator {
            context,
            source: path,
            last_errors: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_version() {
        assert_eq!(normalize_version("1.1.1"), "1_1_1");
        assert_eq!(normalize_version("S-1.0"), "S_1_0");
        assert_eq!(normalize_version("S-1.1"), "S_1_1");
    }

    #[test]
    fn test_missing_operation_schema_is_not_found() {
        let registry = SchemaRegistry::new("/nonexistent", "S-1.0");
        let err = registry.resolve(Operation::Send, None).unwrap_err();
        match err {
            Error::SchemaNotFound { name, version } => {
                assert_eq!(name, "EnvioLoteEventos");
                assert_eq!(version, "1.1.1");
            }
            other => panic!("expected SchemaNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_version_override_changes_lookup() {
        let mut overrides = HashMap::new();
        overrides.insert(Operation::Send, "9.9.9".to_string());
        let registry = SchemaRegistry::new("/nonexistent", "S-1.0").with_versions(overrides);
        assert_eq!(registry.operation_version(Operation::Send), "9.9.9");
        let err = registry.resolve(Operation::Send, None).unwrap_err();
        match err {
            Error::SchemaNotFound { version, .. } => assert_eq!(version, "9.9.9"),
            other => panic!("expected SchemaNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_event_document_without_child_is_malformed() {
        let registry = SchemaRegistry::new("/nonexistent", "S-1.0");
        let doc = crate::xml::load_fromstring("<eSocial xmlns=\"urn:evt\"/>").unwrap();
        let err = registry.resolve_for_document(&doc).unwrap_err();
        assert!(matches!(err, Error::MalformedInput(_)));
    }

    #[test]
    fn test_event_lookup_reports_event_name() {
        let registry = SchemaRegistry::new("/nonexistent", "S-1.0");
        let doc = crate::xml::load_fromstring(
            "<eSocial xmlns=\"urn:evt\"><evtMonit Id=\"ID1\"/></eSocial>",
        )
        .unwrap();
        let err = registry.resolve_for_document(&doc).unwrap_err();
        match err {
            Error::SchemaNotFound { name, version } => {
                assert_eq!(name, "evtMonit");
                assert_eq!(version, "S-1.0");
            }
            other => panic!("expected SchemaNotFound, got {other:?}"),
        }
    }
}
