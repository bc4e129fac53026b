//! Configuration management
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (esocial.toml)
//! - Environment variables (ESOCIAL_*)
//!
//! ## Example config file (esocial.toml):
//! ```toml
//! [schemas]
//! path = "./xsd"
//! layout_version = "S-1.1"
//!
//! [schemas.versions]
//! send = "1.1.1"
//! retrieve = "1.0.0"
//!
//! [identity.employer]
//! kind = "cnpj"
//! number = "12345678901234"
//!
//! [certificate]
//! key_path = "./certs/client.key.pem"
//! cert_path = "./certs/client.cert.pem"
//!
//! [service]
//! target = "tests"
//! group = 1
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::client::ServiceTarget;
use crate::ident::{Identity, RegistrationKind};
use crate::registry::{Operation, SchemaRegistry};
use crate::sign::KeyMaterial;

/// Main configuration for a client session
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EsocialConfig {
    /// Schema storage settings
    #[serde(default)]
    pub schemas: SchemasConfig,

    /// Registration identities
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Certificate/key locations (PEM, already extracted)
    #[serde(default)]
    pub certificate: CertificateConfig,

    /// Webservice settings
    #[serde(default)]
    pub service: ServiceConfig,
}

/// Schema storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemasConfig {
    /// Root of the XSD directory tree
    #[serde(default = "default_schemas_path")]
    pub path: PathBuf,

    /// Active regulatory layout version for event schemas
    #[serde(default = "default_layout_version")]
    pub layout_version: String,

    /// Per-operation schema version overrides
    #[serde(default)]
    pub versions: HashMap<Operation, String>,
}

/// Identity configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IdentityConfig {
    /// The employer the events attest for
    #[serde(default)]
    pub employer: Option<IdentityEntry>,

    /// The transmitting sender (defaults to the employer)
    #[serde(default)]
    pub sender: Option<IdentityEntry>,
}

/// A configured registration identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityEntry {
    pub kind: RegistrationKind,
    pub number: String,

    /// Report the full registration number instead of the 8-digit CNPJ root
    #[serde(default)]
    pub use_full_number: bool,
}

impl IdentityEntry {
    pub fn to_identity(&self) -> crate::error::Result<Identity> {
        if self.use_full_number {
            Identity::with_full_number(self.kind, self.number.clone())
        } else {
            Identity::new(self.kind, self.number.clone())
        }
    }
}

/// Certificate configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CertificateConfig {
    /// Private key PEM path
    #[serde(default)]
    pub key_path: Option<PathBuf>,

    /// Certificate PEM path
    #[serde(default)]
    pub cert_path: Option<PathBuf>,
}

impl CertificateConfig {
    /// Load the configured key material, if both paths are set.
    pub fn key_material(&self) -> crate::error::Result<Option<KeyMaterial>> {
        match (&self.key_path, &self.cert_path) {
            (Some(key), Some(cert)) => Ok(Some(KeyMaterial::from_pem_files(key, cert)?)),
            _ => Ok(None),
        }
    }
}

/// Webservice configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Deployment environment
    #[serde(default)]
    pub target: ServiceTarget,

    /// Event group sent in the batch envelope
    #[serde(default = "default_group")]
    pub group: u8,
}

// Default value functions
fn default_schemas_path() -> PathBuf {
    PathBuf::from("xsd")
}

fn default_layout_version() -> String {
    "S-1.1".to_string()
}

fn default_group() -> u8 {
    1
}

impl Default for SchemasConfig {
    fn default() -> Self {
        Self {
            path: default_schemas_path(),
            layout_version: default_layout_version(),
            versions: HashMap::new(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            target: ServiceTarget::default(),
            group: default_group(),
        }
    }
}

impl EsocialConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from a specific file
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        // Load from default locations
        let config_locations = ["esocial.toml", ".esocial.toml", "config/esocial.toml"];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // Load from specified path
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Load from environment variables (ESOCIAL_*)
        builder = builder.add_source(
            Environment::with_prefix("ESOCIAL")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Build the schema registry this configuration describes.
    pub fn registry(&self) -> SchemaRegistry {
        SchemaRegistry::new(&self.schemas.path, self.schemas.layout_version.clone())
            .with_versions(self.schemas.versions.clone())
    }
}
