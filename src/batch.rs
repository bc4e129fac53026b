//! Batch accumulation
//!
//! A batch is a bounded, ordered collection of signed and schema-validated
//! events forming one dispatch unit. The accumulator owns the batch
//! lifecycle together with the id-generation history that annotates it:
//! both are cleared atomically, and clearing is always caller-driven so a
//! rejected batch can be resent unchanged.

use libxml::tree::Document;
use tracing::debug;

use crate::error::{Error, Result};
use crate::ident::{EventIdGenerator, Identity};
use crate::registry::SchemaRegistry;
use crate::sign::{self, KeyMaterial};
use crate::xml;

/// One accepted event: the id actually used and the signed document.
pub struct SignedEvent {
    pub id: String,
    pub document: Document,
}

impl std::fmt::Debug for SignedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedEvent")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Bounded accumulator of signed events for one client session.
///
/// Exclusive access is required for every mutating operation; the `&mut
/// self` receivers make one in-flight mutation at a time a compile-time
/// guarantee. Wrap the accumulator in a mutex if a session must be shared.
pub struct BatchAccumulator {
    events: Vec<SignedEvent>,
    generator: EventIdGenerator,
    employer: Option<Identity>,
    key_material: Option<KeyMaterial>,
}

impl Default for BatchAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchAccumulator {
    /// Hard cap on events per dispatch unit, fixed by the webservice.
    pub const MAX_BATCH_SIZE: usize = 50;

    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            generator: EventIdGenerator::new(),
            employer: None,
            key_material: None,
        }
    }

    pub fn with_credentials(employer: Identity, key_material: KeyMaterial) -> Self {
        let mut accumulator = Self::new();
        accumulator.employer = Some(employer);
        accumulator.key_material = Some(key_material);
        accumulator
    }

    pub fn set_employer(&mut self, employer: Identity) {
        self.employer = Some(employer);
    }

    pub fn set_key_material(&mut self, key_material: KeyMaterial) {
        self.key_material = Some(key_material);
    }

    pub fn employer(&self) -> Option<&Identity> {
        self.employer.as_ref()
    }

    pub fn key_material(&self) -> Option<&KeyMaterial> {
        self.key_material.as_ref()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.events.len() >= Self::MAX_BATCH_SIZE
    }

    /// Accepted events in insertion order, the order they will take in the
    /// dispatch envelope.
    pub fn events(&self) -> &[SignedEvent] {
        &self.events
    }

    /// Ids of the accepted events, in insertion order.
    pub fn event_ids(&self) -> Vec<&str> {
        self.events.iter().map(|e| e.id.as_str()).collect()
    }

    /// Sign, validate and absorb one event document.
    ///
    /// With `assign_id` the next session id is generated and written to the
    /// `Id` attribute of the event's first top-level child element (by
    /// regulatory convention the element carrying the identifier) before
    /// signing. Otherwise the identifier already present on that element is
    /// used unchanged.
    ///
    /// Returns the accepted event (id + signed document). On any failure the
    /// batch contents are left exactly as they were.
    pub fn add(
        &mut self,
        registry: &SchemaRegistry,
        event: Document,
        assign_id: bool,
    ) -> Result<&SignedEvent> {
        let employer = self
            .employer
            .clone()
            .ok_or(Error::MissingCredentials("employer identity"))?;
        let key_material = self
            .key_material
            .clone()
            .ok_or(Error::MissingCredentials("signing key"))?;
        if self.is_full() {
            return Err(Error::BatchFull {
                max: Self::MAX_BATCH_SIZE,
            });
        }

        let root = xml::root_element(&event)?;
        let mut id_holder = xml::first_child_element(&root).ok_or_else(|| {
            Error::MalformedInput("event document has no top-level child element".into())
        })?;

        let event_id = if assign_id {
            let id = self.generator.next(&employer);
            id_holder
                .set_attribute("Id", &id)
                .map_err(|e| xml::xml_err("assign event id", e))?;
            id
        } else {
            id_holder.get_attribute("Id").ok_or_else(|| {
                Error::MalformedInput(
                    "event carries no Id attribute and id assignment was not requested".into(),
                )
            })?
        };

        let signed = sign::sign(&event, &key_material)?;
        registry.resolve_for_document(&signed)?.validate(&signed)?;

        debug!(id = %event_id, size = self.events.len() + 1, "event accepted into batch");
        self.events.push(SignedEvent {
            id: event_id,
            document: signed,
        });
        Ok(self.events.last().expect("just pushed"))
    }

    /// Empty the batch and the id-generation history together.
    ///
    /// Never called implicitly: after a dispatch (successful or not) the
    /// caller decides whether to clear or to retry the same content.
    pub fn clear(&mut self) {
        debug!(discarded = self.events.len(), "batch cleared");
        self.events.clear();
        self.generator.clear();
    }
}
