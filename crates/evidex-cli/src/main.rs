//! evidex: inspect, verify and feed evidence ledgers
//!
//! Commands:
//! - evidex verify --ledger <path>
//! - evidex dot --ledger <path>
//! - evidex export --ledger <path>
//! - evidex ancestors --ledger <path> <id>
//! - evidex stats --ledger <path>
//! - evidex assemble --contract <path> --outputs <path>
//! - evidex validate --contract <path> --evidence <path>
//! - evidex synthesize --ledger <path> --contract <path> --outputs <path>

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use evidex_core::{
    assemble, synthesize_with_context, validate, EvidenceContract, EvidenceRegistry, LedgerConfig,
    SignalPack, SynthesisContext,
};

/// Evidence ledger and synthesis engine
#[derive(Parser, Debug)]
#[command(name = "evidex")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log at debug level (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

/// Where to find the ledger: a config file or a direct path.
#[derive(clap::Args, Debug, Clone)]
struct LedgerArgs {
    /// Ledger file (newline-delimited JSON)
    #[arg(long, default_value = "./evidence_ledger.jsonl")]
    ledger: PathBuf,

    /// Ledger configuration file (YAML or JSON); takes precedence over --ledger
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

impl LedgerArgs {
    fn load(&self) -> Result<LedgerConfig> {
        match &self.config {
            Some(path) => LedgerConfig::from_file(path)
                .with_context(|| format!("Failed to load ledger config {}", path.display())),
            None => Ok(LedgerConfig::new(&self.ledger)),
        }
    }

    fn open(&self) -> Result<EvidenceRegistry> {
        let config = self.load()?;
        let path = config.path.clone();
        EvidenceRegistry::open(config)
            .with_context(|| format!("Failed to open ledger {}", path.display()))
    }

    fn open_read_only(&self) -> Result<EvidenceRegistry> {
        let config = self.load()?;
        let path = config.path.clone();
        EvidenceRegistry::open_read_only(config)
            .with_context(|| format!("Failed to read ledger {}", path.display()))
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Re-verify every record of the ledger chain
    Verify {
        #[command(flatten)]
        ledger: LedgerArgs,
    },

    /// Print the provenance DAG in GraphViz DOT format
    Dot {
        #[command(flatten)]
        ledger: LedgerArgs,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the provenance DAG as JSON
    Export {
        #[command(flatten)]
        ledger: LedgerArgs,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List the ancestors of a record (full id or unique prefix)
    Ancestors {
        #[command(flatten)]
        ledger: LedgerArgs,

        id: String,
    },

    /// Print record counts by type and method
    Stats {
        #[command(flatten)]
        ledger: LedgerArgs,
    },

    /// Assemble method outputs under a contract and print evidence and trace
    Assemble {
        /// Evidence contract (YAML or JSON)
        #[arg(long)]
        contract: PathBuf,

        /// Method outputs JSON object
        #[arg(long)]
        outputs: PathBuf,

        /// Signal pack JSON
        #[arg(long)]
        signal_pack: Option<PathBuf>,
    },

    /// Validate an evidence map against a contract
    Validate {
        /// Evidence contract (YAML or JSON)
        #[arg(long)]
        contract: PathBuf,

        /// Evidence JSON object
        #[arg(long)]
        evidence: PathBuf,
    },

    /// Assemble, validate and record method outputs
    Synthesize {
        #[command(flatten)]
        ledger: LedgerArgs,

        /// Evidence contract (YAML or JSON)
        #[arg(long)]
        contract: PathBuf,

        /// Method outputs JSON object
        #[arg(long)]
        outputs: PathBuf,

        /// Signal pack JSON
        #[arg(long)]
        signal_pack: Option<PathBuf>,

        /// Record type
        #[arg(long = "type", default_value = evidex_core::METHOD_RESULT)]
        evidence_type: String,

        #[arg(long)]
        method: Option<String>,

        #[arg(long)]
        question: Option<String>,

        #[arg(long)]
        document: Option<String>,

        /// Parent evidence id or unique prefix (repeatable)
        #[arg(long = "parent")]
        parents: Vec<String>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli.command) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

/// Run one command. `Ok(false)` means the command ran but found a failure.
fn run(command: Command) -> Result<bool> {
    match command {
        Command::Verify { ledger } => {
            let config = ledger.load()?;
            let (ok, errors) = evidex_core::verify_ledger(&config.path);
            for error in &errors {
                println!("{}", error);
            }
            if ok {
                println!("OK: {}", config.path.display());
            }
            Ok(ok)
        }

        Command::Dot { ledger, output } => {
            let registry = ledger.open_read_only()?;
            emit(output.as_deref(), &registry.export_dot())?;
            Ok(true)
        }

        Command::Export { ledger, output } => {
            let registry = ledger.open_read_only()?;
            let json = serde_json::to_string_pretty(&registry.export_json())?;
            emit(output.as_deref(), &json)?;
            Ok(true)
        }

        Command::Ancestors { ledger, id } => {
            let registry = ledger.open_read_only()?;
            let id = registry.resolve_id(&id)?;
            for ancestor in registry.get_lineage(&id)?.ancestors {
                println!("{}", ancestor);
            }
            Ok(true)
        }

        Command::Stats { ledger } => {
            let registry = ledger.open_read_only()?;
            print_json(&registry.statistics())?;
            Ok(true)
        }

        Command::Assemble {
            contract,
            outputs,
            signal_pack,
        } => {
            let contract = load_contract(&contract)?;
            let outputs = read_object(&outputs)?;
            let pack = signal_pack.as_deref().map(read_signal_pack).transpose()?;
            let result = assemble(&outputs, &contract.assembly_rules, pack.as_ref());
            print_json(&result)?;
            Ok(true)
        }

        Command::Validate { contract, evidence } => {
            let contract = load_contract(&contract)?;
            let evidence = read_object(&evidence)?;
            let report = validate(
                &evidence,
                &contract.validation_rules,
                contract.failure_contract.as_ref(),
            )?;
            print_json(&report)?;
            Ok(report.valid)
        }

        Command::Synthesize {
            ledger,
            contract,
            outputs,
            signal_pack,
            evidence_type,
            method,
            question,
            document,
            parents,
        } => {
            let registry = ledger.open()?;
            let contract = load_contract(&contract)?;
            let outputs = read_object(&outputs)?;

            let parents = parents
                .iter()
                .map(|p| registry.resolve_id(p))
                .collect::<Result<Vec<_>, _>>()?;
            let context = SynthesisContext {
                evidence_type: Some(evidence_type),
                source_method: method,
                question_id: question,
                document_id: document,
                parents,
                signal_pack: signal_pack.as_deref().map(read_signal_pack).transpose()?,
            };

            let outcome = synthesize_with_context(&registry, &outputs, &contract, &context)?;
            print_json(&outcome)?;
            Ok(outcome.validation.valid)
        }
    }
}

fn load_contract(path: &Path) -> Result<EvidenceContract> {
    EvidenceContract::from_file(path)
        .with_context(|| format!("Failed to load contract {}", path.display()))
}

fn read_object(path: &Path) -> Result<Map<String, Value>> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse JSON in {}", path.display()))?;
    match value {
        Value::Object(map) => Ok(map),
        _ => bail!("{} must contain a JSON object", path.display()),
    }
}

fn read_signal_pack(path: &Path) -> Result<SignalPack> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse signal pack {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn emit(output: Option<&Path>, text: &str) -> Result<()> {
    match output {
        Some(path) => fs::write(path, text)
            .with_context(|| format!("Failed to write {}", path.display())),
        None => {
            print!("{}", text);
            Ok(())
        }
    }
}
