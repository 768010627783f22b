// pipeline.rs — Pass orchestration and provenance
//
// Runs the minimal set of generation passes for a terminal PassId, brackets
// them with the runtime collaborator's preinitialize and wrapup hooks, and
// collects the artifacts each pass produced.
//
// Preconditions: overrides have been applied to the model.
// Postconditions: artifacts for every pass in `required_passes(terminal)`
//   are populated, or the first failing pass's error is returned.
// Failure modes: any pass error; a wrapup failure when the pass succeeded
//   and the model is not exiting.
// Side effects: calls `on_pass_complete` after each pass; the Write and
//   Execute passes touch the filesystem and spawn processes.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::diag::Result;
use crate::generator::{CodeGenerator, ModelRuntime};
use crate::model::Model;
use crate::pass::{descriptor, required_passes, ArtifactId, PassId};
use crate::resolver::Resolution;

// ── Provenance ─────────────────────────────────────────────────────────────

/// Provenance metadata embedded in generated file headers.
///
/// `model_fingerprint`: SHA-256 of `Model::canonical_json()`, overrides
/// included, so the same description always yields the same header.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub model_fingerprint: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    /// Hex string of the model fingerprint (64 characters).
    pub fn model_fingerprint_hex(&self) -> String {
        bytes_to_hex(&self.model_fingerprint)
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

pub fn compute_provenance(model: &Model) -> Provenance {
    use sha2::{Digest, Sha256};

    let model_fingerprint = {
        let mut hasher = Sha256::new();
        hasher.update(model.canonical_json().as_bytes());
        let result = hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&result);
        hash
    };

    Provenance {
        model_fingerprint,
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

// ── Artifacts ──────────────────────────────────────────────────────────────

/// Everything the requested passes produced.
#[derive(Debug, Default)]
pub struct PipelineOutput {
    pub adapters: Vec<Resolution>,
    pub code: Option<String>,
    pub path: Option<PathBuf>,
    /// Return code of the last command; 0 when nothing ran.
    pub exit_code: i32,
    /// Artifacts of the completed passes, in pass order.
    pub produced: Vec<ArtifactId>,
}

fn finish_pass(
    pass_id: PassId,
    elapsed: Duration,
    output: &mut PipelineOutput,
    on_pass_complete: &mut impl FnMut(PassId, Duration),
) {
    output.produced.extend_from_slice(descriptor(pass_id).outputs);
    on_pass_complete(pass_id, elapsed);
    log::debug!(
        "{} complete, {:.1}ms",
        descriptor(pass_id).name,
        elapsed.as_secs_f64() * 1000.0
    );
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`, then wrap up.
///
/// Wrapup always runs. Its failure is logged and dropped when the model is
/// exiting after wrapup; otherwise it is returned unless a pass already
/// failed, in which case the pass error is returned.
pub fn run_pipeline(
    generator: &CodeGenerator,
    model: &mut Model,
    runtime: &mut dyn ModelRuntime,
    terminal: PassId,
    mut on_pass_complete: impl FnMut(PassId, Duration),
) -> Result<PipelineOutput> {
    let mut output = PipelineOutput::default();
    let result = run_passes(generator, model, runtime, terminal, &mut output, &mut on_pass_complete);

    let wrapup = runtime.wrapup(model);
    match (result, wrapup) {
        (Err(e), Err(w)) => {
            log::warn!("wrapup failed after an earlier error: {}", w);
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
        (Ok(()), Err(w)) if runtime.is_exiting_after_wrapup() => {
            log::warn!("ignoring wrapup failure while exiting: {}", w);
            Ok(output)
        }
        (Ok(()), Err(w)) => Err(w),
        (Ok(()), Ok(())) => Ok(output),
    }
}

fn run_passes(
    generator: &CodeGenerator,
    model: &mut Model,
    runtime: &mut dyn ModelRuntime,
    terminal: PassId,
    output: &mut PipelineOutput,
    on_pass_complete: &mut impl FnMut(PassId, Duration),
) -> Result<()> {
    let passes = required_passes(terminal);
    let mut state = None;

    for &pass_id in &passes {
        let t = Instant::now();
        match pass_id {
            PassId::ResolveTypes => runtime.preinitialize_and_resolve_types(model)?,
            PassId::ResolveAdapters => {
                state = Some(generator.begin_pass());
                let count = generator.resolve_adapters(model)?;
                log::debug!("{} adapters resolved", count);
                output.adapters = generator.resolutions(model);
            }
            PassId::AnalyzeTypes => {
                if let Some(state) = &state {
                    generator.analyze_type_conversions(model, state)?;
                }
            }
            PassId::Generate => {
                if let Some(state) = &state {
                    output.code = Some(generator.assemble(model, state)?);
                }
            }
            PassId::Write => {
                let code = output.code.as_deref().unwrap_or_default();
                output.path = Some(generator.write_code_file(model, code)?);
            }
            PassId::Execute => {
                if let Some(path) = &output.path {
                    output.exit_code = generator.execute(model, path)?;
                }
            }
        }
        finish_pass(pass_id, t.elapsed(), output, on_pass_complete);
    }
    Ok(())
}

// ── Tests ──────────────────────────────────────────────────────────────────
