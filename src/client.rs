//! Client session
//!
//! Ties the pipeline together for one webservice session: the batch
//! accumulator with its credentials, the schema registry, envelope
//! construction and response decoding. The network itself stays behind the
//! [`Transport`] seam; this module never opens a connection, sleeps or
//! retries; a rejected batch is reported synchronously and the caller
//! decides what to do with it.

use std::fmt;
use std::str::FromStr;

use libxml::tree::Document;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::batch::{BatchAccumulator, SignedEvent};
use crate::envelope::EnvelopeBuilder;
use crate::error::{Error, Result};
use crate::ident::Identity;
use crate::registry::{Operation, SchemaRegistry};
use crate::response::{self, DecodedResponse};
use crate::sign::KeyMaterial;
use crate::xml;

/// Transport collaborator: posts a serialized envelope and returns the
/// parsed response document. Implementations own TLS, SOAP framing,
/// timeouts and error policy; transport failures propagate unchanged.
pub trait Transport {
    fn post(&self, url: &str, envelope: &str) -> Result<Document>;
}

/// Deployment environment of the government service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceTarget {
    Production,
    Tests,
}

impl Default for ServiceTarget {
    fn default() -> Self {
        ServiceTarget::Tests
    }
}

impl ServiceTarget {
    /// Map the `tpAmb` wire digit to a target.
    pub fn from_tp_amb(digit: &str) -> Option<Self> {
        match digit {
            "1" => Some(ServiceTarget::Production),
            "2" => Some(ServiceTarget::Tests),
            _ => None,
        }
    }

    /// Batch submission endpoint.
    pub fn send_url(&self) -> &'static str {
        match self {
            ServiceTarget::Production => {
                "https://webservices.envio.esocial.gov.br/servicos/empregador/enviarloteeventos/WsEnviarLoteEventos.svc"
            }
            ServiceTarget::Tests => {
                "https://webservices.producaorestrita.esocial.gov.br/servicos/empregador/enviarloteeventos/WsEnviarLoteEventos.svc"
            }
        }
    }

    /// Batch result retrieval endpoint.
    pub fn retrieve_url(&self) -> &'static str {
        match self {
            ServiceTarget::Production => {
                "https://webservices.consulta.esocial.gov.br/servicos/empregador/consultarloteeventos/WsConsultarLoteEventos.svc"
            }
            ServiceTarget::Tests => {
                "https://webservices.producaorestrita.esocial.gov.br/servicos/empregador/consultarloteeventos/WsConsultarLoteEventos.svc"
            }
        }
    }

    /// Event identifier query endpoint.
    pub fn query_url(&self) -> &'static str {
        match self {
            ServiceTarget::Production => {
                "https://webservices.download.esocial.gov.br/servicos/empregador/dwlcirurgico/WsConsultarIdentificadoresEventos.svc"
            }
            ServiceTarget::Tests => {
                "https://webservices.producaorestrita.esocial.gov.br/servicos/empregador/dwlcirurgico/WsConsultarIdentificadoresEventos.svc"
            }
        }
    }

    /// Event download endpoint.
    pub fn download_url(&self) -> &'static str {
        match self {
            ServiceTarget::Production => {
                "https://webservices.download.esocial.gov.br/servicos/empregador/dwlcirurgico/WsSolicitarDownloadEventos.svc"
            }
            ServiceTarget::Tests => {
                "https://webservices.producaorestrita.esocial.gov.br/servicos/empregador/dwlcirurgico/WsSolicitarDownloadEventos.svc"
            }
        }
    }
}

impl FromStr for ServiceTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "production" => Ok(ServiceTarget::Production),
            "tests" => Ok(ServiceTarget::Tests),
            other => ServiceTarget::from_tp_amb(other).ok_or_else(|| {
                Error::MalformedInput(format!(
                    "unknown service target '{other}' (expected production, tests, 1 or 2)"
                ))
            }),
        }
    }
}

impl fmt::Display for ServiceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceTarget::Production => write!(f, "production"),
            ServiceTarget::Tests => write!(f, "tests"),
        }
    }
}

/// One client session: a batch, its id history, its credentials and the
/// registry governing validation.
///
/// All mutating operations take `&mut self`; a session shared between
/// threads must be wrapped in a mutex by the caller.
pub struct BatchSession {
    registry: SchemaRegistry,
    accumulator: BatchAccumulator,
    sender: Option<Identity>,
    target: ServiceTarget,
}

impl BatchSession {
    pub fn new(registry: SchemaRegistry, target: ServiceTarget) -> Self {
        Self {
            registry,
            accumulator: BatchAccumulator::new(),
            sender: None,
            target,
        }
    }

    /// Configure the attesting employer, the transmitting sender and the
    /// signing key in one step.
    pub fn with_credentials(
        mut self,
        employer: Identity,
        sender: Identity,
        key_material: KeyMaterial,
    ) -> Self {
        self.accumulator.set_employer(employer);
        self.accumulator.set_key_material(key_material);
        self.sender = Some(sender);
        self
    }

    pub fn target(&self) -> ServiceTarget {
        self.target
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn batch(&self) -> &BatchAccumulator {
        &self.accumulator
    }

    /// Add one event document to the batch. See
    /// [`BatchAccumulator::add`] for the id-assignment contract.
    pub fn add_event(&mut self, event: Document, assign_id: bool) -> Result<&SignedEvent> {
        self.accumulator.add(&self.registry, event, assign_id)
    }

    /// Clear batch contents and id history together. Never implicit.
    pub fn clear(&mut self) {
        self.accumulator.clear();
    }

    /// Validate an already-built envelope against its operation schema.
    pub fn validate_envelope(&self, operation: Operation, envelope: &Document) -> Result<()> {
        self.registry.resolve(operation, None)?.validate(envelope)
    }

    fn employer(&self) -> Result<Identity> {
        self.accumulator
            .employer()
            .cloned()
            .ok_or(Error::MissingCredentials("employer identity"))
    }

    fn dispatch(
        &self,
        operation: Operation,
        envelope: Document,
        url: &str,
        transport: &dyn Transport,
    ) -> Result<DecodedResponse> {
        self.validate_envelope(operation, &envelope)?;
        info!(%url, operation = ?operation, "dispatching envelope");
        let response = transport.post(url, &xml::dump_tostring(&envelope))?;
        response::decode(&response)
    }

    /// Wrap the accumulated batch in a send envelope, validate it and
    /// dispatch. The batch is *not* cleared: resending the same content is
    /// a legitimate retry, so clearing stays with the caller.
    pub fn send(&self, group: u8, transport: &dyn Transport) -> Result<DecodedResponse> {
        let employer = self.employer()?;
        let sender = self.sender.clone().unwrap_or_else(|| employer.clone());
        let envelope = EnvelopeBuilder::new(&self.registry).send_batch(
            group,
            &employer,
            &sender,
            &self.accumulator,
        )?;
        debug!(events = self.accumulator.len(), group, "send envelope built");
        self.dispatch(Operation::Send, envelope, self.target.send_url(), transport)
    }

    /// Query processing results for a previously submitted batch.
    pub fn retrieve(
        &self,
        protocol_number: &str,
        transport: &dyn Transport,
    ) -> Result<DecodedResponse> {
        let envelope = EnvelopeBuilder::new(&self.registry).retrieve(protocol_number)?;
        self.dispatch(
            Operation::Retrieve,
            envelope,
            self.target.retrieve_url(),
            transport,
        )
    }

    /// Query event ids submitted by the employer for one period.
    pub fn query_employer_events(
        &self,
        event_type: &str,
        period: &str,
        transport: &dyn Transport,
    ) -> Result<DecodedResponse> {
        let envelope = EnvelopeBuilder::new(&self.registry).query_employer_events(
            &self.employer()?,
            event_type,
            period,
        )?;
        self.dispatch(
            Operation::QueryEmployerEvents,
            envelope,
            self.target.query_url(),
            transport,
        )
    }

    /// Query table event ids, optionally keyed and date-bounded.
    pub fn query_table_events(
        &self,
        event_type: &str,
        key: Option<&str>,
        from: Option<&str>,
        to: Option<&str>,
        transport: &dyn Transport,
    ) -> Result<DecodedResponse> {
        let envelope = EnvelopeBuilder::new(&self.registry).query_table_events(
            &self.employer()?,
            event_type,
            key,
            from,
            to,
        )?;
        self.dispatch(
            Operation::QueryTableEvents,
            envelope,
            self.target.query_url(),
            transport,
        )
    }

    /// Query event ids for one worker inside a date window.
    pub fn query_worker_events(
        &self,
        worker_cpf: &str,
        from: &str,
        to: &str,
        transport: &dyn Transport,
    ) -> Result<DecodedResponse> {
        let envelope = EnvelopeBuilder::new(&self.registry).query_worker_events(
            &self.employer()?,
            worker_cpf,
            from,
            to,
        )?;
        self.dispatch(
            Operation::QueryWorkerEvents,
            envelope,
            self.target.query_url(),
            transport,
        )
    }

    /// Download requests are signed with the same key that signs events.
    fn signing_key(&self) -> Result<KeyMaterial> {
        self.accumulator
            .key_material()
            .cloned()
            .ok_or(Error::MissingCredentials("signing key"))
    }

    /// Request download of full event XML by event ids.
    pub fn download_by_id(
        &self,
        ids: &[&str],
        transport: &dyn Transport,
    ) -> Result<DecodedResponse> {
        let envelope = EnvelopeBuilder::new(&self.registry).download_by_id(
            &self.employer()?,
            ids,
            &self.signing_key()?,
        )?;
        self.dispatch(
            Operation::DownloadById,
            envelope,
            self.target.download_url(),
            transport,
        )
    }

    /// Request download of full event XML by receipt numbers.
    pub fn download_by_receipt(
        &self,
        receipts: &[&str],
        transport: &dyn Transport,
    ) -> Result<DecodedResponse> {
        let envelope = EnvelopeBuilder::new(&self.registry).download_by_receipt(
            &self.employer()?,
            receipts,
            &self.signing_key()?,
        )?;
        self.dispatch(
            Operation::DownloadByReceipt,
            envelope,
            self.target.download_url(),
            transport,
        )
    }
}
