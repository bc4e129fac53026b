//! Registration identities and event-id generation

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Tax-registration kind (`tpInsc`) identifying a legal entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationKind {
    /// CNPJ, employer legal-entity registration
    Cnpj,
    /// CPF, natural-person registration
    Cpf,
    /// CAEPF, natural-person economic-activity registration
    Caepf,
    /// CNO, construction-site registration
    Cno,
}

impl RegistrationKind {
    /// The single-digit wire code.
    pub fn code(&self) -> u8 {
        match self {
            RegistrationKind::Cnpj => 1,
            RegistrationKind::Cpf => 2,
            RegistrationKind::Caepf => 3,
            RegistrationKind::Cno => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(RegistrationKind::Cnpj),
            2 => Some(RegistrationKind::Cpf),
            3 => Some(RegistrationKind::Caepf),
            4 => Some(RegistrationKind::Cno),
            _ => None,
        }
    }
}

impl fmt::Display for RegistrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A registration identity: kind plus digit string.
///
/// CNPJ numbers are truncated to their 8-digit root in identifier blocks and
/// event ids, unless `use_full_number` is set (public bodies report the full
/// 14 digits). Other kinds always use the full number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub kind: RegistrationKind,
    pub number: String,
    #[serde(default)]
    pub use_full_number: bool,
}

impl Identity {
    pub fn new(kind: RegistrationKind, number: impl Into<String>) -> Result<Self> {
        Self::build(kind, number.into(), false)
    }

    pub fn with_full_number(kind: RegistrationKind, number: impl Into<String>) -> Result<Self> {
        Self::build(kind, number.into(), true)
    }

    fn build(kind: RegistrationKind, number: String, use_full_number: bool) -> Result<Self> {
        if number.is_empty() {
            return Err(Error::MalformedInput(
                "registration number must not be empty".into(),
            ));
        }
        if !number.chars().all(|c| c.is_ascii_digit()) {
            return Err(Error::MalformedInput(format!(
                "registration number must be a digit string, got '{number}'"
            )));
        }
        Ok(Self {
            kind,
            number,
            use_full_number,
        })
    }

    /// The number as it appears in identifier blocks and event ids.
    pub fn effective_number(&self) -> &str {
        if self.kind == RegistrationKind::Cnpj && !self.use_full_number && self.number.len() > 8 {
            &self.number[..8]
        } else {
            &self.number
        }
    }
}

/// Session-scoped generator of unique event identifiers.
///
/// An id is `ID` + kind digit + number right-padded with zeros to 14 +
/// timestamp to the second (`YYYYMMDDHHMMSS`) + a 5-digit sequence. The
/// sequence is the count of identical prefixes generated so far in this
/// session, so two events for the same identity within the same second get
/// sequences 1 and 2 instead of colliding. Counters are never reused or
/// decremented; [`EventIdGenerator::clear`] resets the whole history
/// together with the batch it annotates.
#[derive(Debug, Default)]
pub struct EventIdGenerator {
    history: Vec<String>,
}

impl EventIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate the next id for `identity` at the current local time.
    pub fn next(&mut self, identity: &Identity) -> String {
        self.next_at(identity, Local::now().naive_local())
    }

    /// Generate the next id for `identity` at an explicit timestamp.
    pub fn next_at(&mut self, identity: &Identity, timestamp: NaiveDateTime) -> String {
        let prefix = format!(
            "ID{}{:0<14}{}",
            identity.kind.code(),
            identity.effective_number(),
            timestamp.format("%Y%m%d%H%M%S"),
        );
        self.history.push(prefix.clone());
        let sequence = self.history.iter().filter(|p| **p == prefix).count();
        format!("{prefix}{sequence:05}")
    }

    /// Number of ids generated since the last clear.
    pub fn generated(&self) -> usize {
        self.history.len()
    }

    /// Forget all session history. Sequences restart at 1 afterwards.
    pub fn clear(&mut self) {
        self.history.clear();
    }
}
