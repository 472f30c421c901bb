// pass.rs — Pass descriptor module: metadata, dependency resolution, artifact IDs
//
// Declares the compiler's passes (reading the listing is outside the runner),
// their dependency edges, and the artifacts they produce. Used by the pipeline
// runner to compute minimal pass subsets for each --emit target.

use std::collections::HashSet;
use std::fmt;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

/// Identifies each compiler pass (listing parse excluded).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    Lower,
    Verify,
    Bind,
    Emit,
}

impl fmt::Display for PassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(descriptor(*self).name)
    }
}

/// Machine-readable artifact identifiers. Each maps to a concrete type
/// in the compilation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Network,    // Network
    Parameters, // ParameterTable
    Context,    // Box<dyn ParameterContext>
    Generated,  // GeneratedCode
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a compiler pass.
pub struct PassDescriptor {
    /// Human-readable name for log output.
    pub name: &'static str,
    /// Pass dependencies (other passes whose outputs this pass consumes).
    pub inputs: &'static [PassId],
    /// Artifacts this pass produces.
    pub outputs: &'static [ArtifactId],
    /// Pre/post conditions, logged when the pass completes.
    pub invariants: &'static str,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::Lower => PassDescriptor {
            name: "lower",
            inputs: &[],
            outputs: &[ArtifactId::Network, ArtifactId::Parameters],
            invariants: "every module consumed, one inbound connection per neuron layer",
        },
        PassId::Verify => PassDescriptor {
            name: "verify",
            inputs: &[PassId::Lower],
            outputs: &[],
            invariants: "layer names unique, connections in declaration order",
        },
        PassId::Bind => PassDescriptor {
            name: "bind",
            inputs: &[PassId::Lower],
            outputs: &[ArtifactId::Context],
            invariants: "context of the configured kind, bound to this run's records",
        },
        PassId::Emit => PassDescriptor {
            name: "emit",
            inputs: &[PassId::Verify, PassId::Bind],
            outputs: &[ArtifactId::Generated],
            invariants: "one population per layer channel, imports hoisted",
        },
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All pass IDs in declaration order (used for iteration).
pub const ALL_PASSES: [PassId; 4] = [PassId::Lower, PassId::Verify, PassId::Bind, PassId::Emit];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ──────────────────────────────────────────────────────────────────
