// pass.rs — Pass descriptors: metadata, dependency resolution, artifact IDs
//
// Declares the six generation passes (loading the model is outside the
// runner), their dependency edges, and the artifacts they produce. The
// pipeline runner uses `required_passes` to run the minimal prefix for each
// --emit target.

use std::collections::HashSet;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

/// Identifies each generation pass (model loading excluded).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    ResolveTypes,
    ResolveAdapters,
    AnalyzeTypes,
    Generate,
    Write,
    Execute,
}

/// Machine-readable artifact identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    TypedModel,  // Model with every resolvable port type fixed
    Adapters,    // resolver cache
    Conversions, // per-adapter TypeConversionRecord
    Code,        // assembled program text
    CodeFile,    // path of the written file
    ExitCode,    // return code of the last command
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a generation pass.
pub struct PassDescriptor {
    /// Name for verbose output.
    pub name: &'static str,
    /// Passes whose outputs this pass consumes.
    pub inputs: &'static [PassId],
    pub outputs: &'static [ArtifactId],
}

pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::ResolveTypes => PassDescriptor {
            name: "resolve_types",
            inputs: &[],
            outputs: &[ArtifactId::TypedModel],
        },
        PassId::ResolveAdapters => PassDescriptor {
            name: "resolve_adapters",
            inputs: &[PassId::ResolveTypes],
            outputs: &[ArtifactId::Adapters],
        },
        PassId::AnalyzeTypes => PassDescriptor {
            name: "analyze_types",
            inputs: &[PassId::ResolveAdapters],
            outputs: &[ArtifactId::Conversions],
        },
        PassId::Generate => PassDescriptor {
            name: "generate",
            inputs: &[PassId::AnalyzeTypes],
            outputs: &[ArtifactId::Code],
        },
        PassId::Write => PassDescriptor {
            name: "write",
            inputs: &[PassId::Generate],
            outputs: &[ArtifactId::CodeFile],
        },
        PassId::Execute => PassDescriptor {
            name: "execute",
            inputs: &[PassId::Write],
            outputs: &[ArtifactId::ExitCode],
        },
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

pub const ALL_PASSES: [PassId; 6] = [
    PassId::ResolveTypes,
    PassId::ResolveAdapters,
    PassId::AnalyzeTypes,
    PassId::Generate,
    PassId::Write,
    PassId::Execute,
];

/// Minimal ordered set of passes needed to produce `terminal`, in execution
/// order.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapters_stop_before_analysis() {
        let passes = required_passes(PassId::ResolveAdapters);
        assert_eq!(passes, vec![PassId::ResolveTypes, PassId::ResolveAdapters]);
    }

    #[test]
    fn execute_includes_all() {
        assert_eq!(required_passes(PassId::Execute), ALL_PASSES.to_vec());
    }

    #[test]
    fn generate_does_not_write() {
        let passes = required_passes(PassId::Generate);
        assert!(!passes.contains(&PassId::Write));
        assert_eq!(passes.last(), Some(&PassId::Generate));
    }

    #[test]
    fn all_descriptors_have_outputs() {
        for pass in &ALL_PASSES {
            assert!(
                !descriptor(*pass).outputs.is_empty(),
                "pass {:?} has no outputs declared",
                pass
            );
        }
    }

    #[test]
    fn dependencies_precede_dependents() {
        for pass in &ALL_PASSES {
            let order = required_passes(*pass);
            let self_pos = order.iter().position(|p| p == pass).unwrap();
            for dep in descriptor(*pass).inputs {
                let dep_pos = order.iter().position(|p| p == dep).unwrap();
                assert!(dep_pos < self_pos, "{:?} runs after {:?}", dep, pass);
            }
        }
    }
}
