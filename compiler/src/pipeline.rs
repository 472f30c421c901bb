// pipeline.rs — Compilation state and pass orchestration
//
// Holds the listing, the configuration and every pass artifact, and runs the
// minimal set of passes for a given terminal PassId.
//
// Preconditions: listing and config set through `CompilationState::new`.
// Postconditions: artifacts for all required passes are populated, or the
//   first failing pass is reported.
// Failure modes: any pass error; stops at the first one.
// Side effects: logs each pass through `tracing`; calls `on_pass_complete`.

use std::time::Instant;

use tracing::{debug, info};

use crate::codegen::GeneratedCode;
use crate::config::CompileConfig;
use crate::context::ParameterContext;
use crate::error::Error;
use crate::listing::ModuleListing;
use crate::lower::LowerResult;
use crate::pass::{descriptor, required_passes, ArtifactId, PassId};

// ── Provenance ─────────────────────────────────────────────────────────────

/// Provenance metadata stamped on generated programs.
///
/// `source_hash`: SHA-256 of the raw listing text.
/// `config_fingerprint`: SHA-256 of the compact JSON form of the configuration.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub config_fingerprint: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    /// Hex string of the source hash (64 characters).
    pub fn source_hash_hex(&self) -> String {
        bytes_to_hex(&self.source_hash)
    }

    pub fn config_fingerprint_hex(&self) -> String {
        bytes_to_hex(&self.config_fingerprint)
    }

    /// Comment block placed at the top of generated programs.
    pub fn header(&self) -> String {
        format!(
            "# Generated by bfc {}\n# listing sha256: {}\n# config sha256: {}\n",
            self.compiler_version,
            self.source_hash_hex(),
            self.config_fingerprint_hex(),
        )
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

fn sha256(data: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Compute provenance from listing text and configuration.
pub fn compute_provenance(source: &str, config: &CompileConfig) -> Provenance {
    // Serializing plain data with string keys cannot fail.
    let canonical = serde_json::to_string(config).unwrap_or_default();
    Provenance {
        source_hash: sha256(source.as_bytes()),
        config_fingerprint: sha256(canonical.as_bytes()),
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

// ── Artifact storage ───────────────────────────────────────────────────────

/// Holds the inputs and all compilation artifacts.
pub struct CompilationState {
    pub listing: ModuleListing,
    pub config: CompileConfig,
    pub lowered: Option<LowerResult>,
    pub context: Option<Box<dyn ParameterContext>>,
    pub generated: Option<GeneratedCode>,
    pub provenance: Option<Provenance>,
}

impl CompilationState {
    pub fn new(listing: ModuleListing, config: CompileConfig) -> Self {
        Self {
            listing,
            config,
            lowered: None,
            context: None,
            generated: None,
            provenance: None,
        }
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = Some(provenance);
        self
    }
}

fn require_lowered(
    lowered: &Option<LowerResult>,
    pass: PassId,
) -> Result<&LowerResult, PipelineError> {
    lowered.as_ref().ok_or(PipelineError::MissingArtifact {
        pass,
        artifact: ArtifactId::Network,
    })
}

// ── Error type ─────────────────────────────────────────────────────────────

/// Pipeline execution stopped at a failing pass.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{pass}: {source}")]
    Pass {
        pass: PassId,
        #[source]
        source: Error,
    },
    #[error("{pass}: missing artifact {artifact:?}")]
    MissingArtifact { pass: PassId, artifact: ArtifactId },
}

impl PipelineError {
    pub fn failing_pass(&self) -> PassId {
        match self {
            PipelineError::Pass { pass, .. } | PipelineError::MissingArtifact { pass, .. } => *pass,
        }
    }

    /// The underlying compile error, if the pass itself failed.
    pub fn error(&self) -> Option<&Error> {
        match self {
            PipelineError::Pass { source, .. } => Some(source),
            PipelineError::MissingArtifact { .. } => None,
        }
    }
}

fn in_pass<T>(pass: PassId, result: crate::error::Result<T>) -> Result<T, PipelineError> {
    result.map_err(|source| PipelineError::Pass { pass, source })
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
///
/// Per-pass sequence: execute → log → on_pass_complete(callback).
pub fn run_pipeline(
    state: &mut CompilationState,
    terminal: PassId,
    mut on_pass_complete: impl FnMut(PassId),
) -> Result<(), PipelineError> {
    for pass_id in required_passes(terminal) {
        let t = Instant::now();
        run_pass(state, pass_id)?;
        let elapsed = t.elapsed();
        let desc = descriptor(pass_id);
        info!(
            pass = desc.name,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            outputs = ?desc.outputs,
            invariants = desc.invariants,
            "pass complete"
        );
        on_pass_complete(pass_id);
    }
    Ok(())
}

fn run_pass(state: &mut CompilationState, pass_id: PassId) -> Result<(), PipelineError> {
    match pass_id {
        PassId::Lower => {
            let filtered = state.listing.without_passthrough();
            debug!(
                modules = state.listing.len(),
                kept = filtered.len(),
                "dropped passthrough modules"
            );
            let config = &state.config;
            let result = crate::lower::lower_network(
                &filtered,
                config.input.clone(),
                config.output.clone(),
                &config.lower_options(),
            );
            state.lowered = Some(in_pass(pass_id, result)?);
        }
        PassId::Verify => {
            let lowered = require_lowered(&state.lowered, pass_id)?;
            in_pass(pass_id, lowered.network.validate())?;
        }
        PassId::Bind => {
            let lowered = require_lowered(&state.lowered, pass_id)?;
            debug!(kind = state.config.context.kind(), "binding parameter context");
            state.context = Some(state.config.context.bind(lowered));
        }
        PassId::Emit => {
            let lowered = require_lowered(&state.lowered, pass_id)?;
            let ctx = state
                .context
                .as_deref()
                .ok_or(PipelineError::MissingArtifact {
                    pass: pass_id,
                    artifact: ArtifactId::Context,
                })?;
            let mut generated = in_pass(
                pass_id,
                crate::codegen::emit_program(&lowered.network, ctx, &state.config.simulation),
            )?;
            if let Some(provenance) = &state.provenance {
                generated.source = format!("{}\n{}", provenance.header(), generated.source);
            }
            state.generated = Some(generated);
        }
    }
    Ok(())
}
