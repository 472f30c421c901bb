use clap::Parser;
use std::path::PathBuf;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use bfc::config::CompileConfig;
use bfc::listing::ModuleListing;
use bfc::pass::PassId;
use bfc::pipeline::{compute_provenance, run_pipeline, CompilationState, PipelineError};

#[derive(Debug, Clone, clap::ValueEnum)]
enum EmitStage {
    /// Complete PyNN program
    Program,
    /// Lowered network as JSON
    Network,
    /// Parameter table as JSON
    Params,
}

impl EmitStage {
    fn terminal(&self) -> PassId {
        match self {
            EmitStage::Program => PassId::Emit,
            EmitStage::Network => PassId::Verify,
            EmitStage::Params => PassId::Lower,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "bfc",
    version,
    about = "Bifrost Compiler: lowers spiking network module listings to PyNN programs"
)]
struct Cli {
    /// Module listing (.json, or the text form)
    listing: PathBuf,

    /// Compile configuration (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output file path (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Program)]
    emit: EmitStage,

    /// Layer to record mapping, `layer=record` (repeatable)
    #[arg(long = "records", value_parser = parse_record)]
    records: Vec<(String, String)>,

    /// Log passes and timing (same as RUST_LOG=bfc=debug)
    #[arg(short, long)]
    verbose: bool,
}

fn parse_record(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((layer, record)) if !layer.is_empty() && !record.is_empty() => {
            Ok((layer.to_string(), record.to_string()))
        }
        _ => Err(format!("expected `layer=record`, got `{s}`")),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "bfc=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn exit_with(err: &bfc::error::Error) -> ! {
    eprintln!("bfc: error[{}]: {}", err.code(), err);
    std::process::exit(if err.is_io() { 2 } else { 1 });
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    tracing::debug!(listing = %cli.listing.display(), emit = ?cli.emit, "starting");

    // ── Load inputs ──
    let config = match &cli.config {
        Some(path) => CompileConfig::load(path).unwrap_or_else(|e| exit_with(&e)),
        None => CompileConfig::default(),
    }
    .with_records(cli.records.iter().cloned());

    let (listing, source) = ModuleListing::load(&cli.listing).unwrap_or_else(|e| exit_with(&e));
    tracing::debug!(modules = listing.len(), "listing loaded");

    // ── Compile ──
    let provenance = compute_provenance(&source, &config);
    let mut state = CompilationState::new(listing, config).with_provenance(provenance);
    if let Err(err) = run_pipeline(&mut state, cli.emit.terminal(), |_| {}) {
        match &err {
            PipelineError::Pass { source, .. } => exit_with(source),
            PipelineError::MissingArtifact { .. } => {
                eprintln!("bfc: internal error: {err}");
                std::process::exit(1);
            }
        }
    }

    let text = match cli.emit {
        EmitStage::Program => state.generated.map(|g| g.source),
        EmitStage::Network => state
            .lowered
            .as_ref()
            .map(|l| serde_json::to_string_pretty(&l.network).map(|s| s + "\n"))
            .transpose()
            .unwrap_or_else(|e| exit_with(&e.into())),
        EmitStage::Params => state
            .lowered
            .as_ref()
            .map(|l| serde_json::to_string_pretty(&l.parameters).map(|s| s + "\n"))
            .transpose()
            .unwrap_or_else(|e| exit_with(&e.into())),
    };
    let Some(text) = text else {
        eprintln!("bfc: internal error: no output produced");
        std::process::exit(1);
    };

    // ── Write output ──
    match &cli.output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, text) {
                exit_with(&e.into());
            }
            tracing::info!(output = %path.display(), "wrote output");
        }
        None => print!("{text}"),
    }
}
