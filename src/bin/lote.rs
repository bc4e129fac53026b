//! Batch pipeline CLI
//!
//! Validates, signs and inspects event files against a local XSD tree.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use esocial_lote::{
    response, xml, EnvelopeBuilder, Error, EsocialConfig, KeyMaterial, Operation,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "esocial-lote")]
#[command(about = "Validate, sign and inspect eSocial event batches")]
struct Cli {
    /// Path to a config file (esocial.toml is picked up automatically)
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate an event file against its event schema
    Validate {
        /// Event XML file
        file: PathBuf,
    },

    /// Sign an event file and write the signed document
    Sign {
        /// Event XML file
        file: PathBuf,
        /// Private key PEM
        #[arg(short, long)]
        key: PathBuf,
        /// Certificate PEM
        #[arg(short = 'C', long)]
        cert: PathBuf,
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Build and validate a processing-retrieval envelope
    Retrieve {
        /// Protocol number returned by a batch submission
        protocol: String,
    },

    /// Decode a response file and print it as JSON
    Decode {
        /// Response XML file
        file: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        if let Some(Error::Validation { messages }) = e.downcast_ref::<Error>() {
            for message in messages {
                eprintln!("  - {}", message);
            }
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = EsocialConfig::load_from(cli.config.as_deref())?;
    let registry = config.registry();

    match cli.command {
        Commands::Validate { file } => {
            let doc = xml::load_fromfile(&file)?;
            let mut validator = registry.resolve_for_document(&doc)?;
            validator.validate(&doc)?;
            println!("✅ {} is valid against {}", file.display(), validator.source().display());
            Ok(())
        }

        Commands::Sign {
            file,
            key,
            cert,
            output,
        } => {
            let doc = xml::load_fromfile(&file)?;
            let material = KeyMaterial::from_pem_files(&key, &cert)?;
            let signed = esocial_lote::sign(&doc, &material)?;
            let serialized = xml::dump_tostring(&signed);
            match output {
                Some(path) => {
                    std::fs::write(&path, &serialized)?;
                    println!("✅ Signed document written to {}", path.display());
                }
                None => println!("{serialized}"),
            }
            Ok(())
        }

        Commands::Retrieve { protocol } => {
            let envelope = EnvelopeBuilder::new(&registry).retrieve(&protocol)?;
            registry
                .resolve(Operation::Retrieve, None)?
                .validate(&envelope)?;
            println!("{}", xml::dump_tostring(&envelope));
            Ok(())
        }

        Commands::Decode { file } => {
            let doc = xml::load_fromfile(&file)?;
            let decoded = response::decode(&doc)?;
            println!("{}", serde_json::to_string_pretty(&decoded)?);
            Ok(())
        }
    }
}
