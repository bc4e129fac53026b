//! eSocial Batch Pipeline
//!
//! Client-side assembly of eSocial event batches: deterministic event-id
//! generation, enveloped XML digital signatures, multi-version XSD
//! validation, operation envelope construction and decoding of the
//! webservice's XML responses.
//!
//! ## Features
//!
//! - **Bounded batches**: up to 50 signed, validated events per dispatch
//!   unit, insertion order preserved into the envelope
//! - **Deterministic ids**: session-scoped, human-decodable identifiers
//!   that disambiguate same-second collisions
//! - **Fixed signature suite**: RSA-SHA256 / SHA-256 / XML-C14N 1.0
//!   enveloped signatures
//! - **Schema registry**: per-operation and per-event XSD resolution,
//!   versioned the way the schema distribution names its files
//! - **Typed responses**: batch receipts, per-event processing status and
//!   receipts decoded into one structure with optional blocks
//!
//! ## Pipeline
//!
//! ```text
//! event document
//!   → EventIdGenerator assigns an id
//!   → enveloped signature
//!   → XSD validation
//!   → BatchAccumulator (≤ 50 events)
//!   → EnvelopeBuilder wraps the batch, envelope validated
//!   → Transport (external) posts it
//!   → response decoded into DecodedResponse
//! ```
//!
//! Transport, TLS and PKCS#12 extraction are collaborators behind narrow
//! traits and value types; this crate never touches the network.

pub mod batch;
pub mod c14n;
pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod ident;
pub mod registry;
pub mod response;
pub mod sign;
pub mod xml;

pub use batch::{BatchAccumulator, SignedEvent};
pub use client::{BatchSession, ServiceTarget, Transport};
pub use config::EsocialConfig;
pub use envelope::EnvelopeBuilder;
pub use error::{Error, Result};
pub use ident::{EventIdGenerator, Identity, RegistrationKind};
pub use registry::{normalize_version, Operation, SchemaRegistry, SchemaValidator};
pub use response::{DecodedResponse, EventOutcome};
pub use sign::{sign, CredentialSource, KeyMaterial};
