// generator.rs — Code generator driver
//
// Drives one generation pass over a model: resolves adapters for every
// component and port, runs type conversion analysis, collects the phase
// code of the top-level composite, and hands the pieces to the target's
// `ProgramGenerator` for assembly. Also owns the options, the runtime
// collaborator that fixes port types before a pass, and output writing.
//
// Preconditions: the model has a top-level director; port types are
//   resolved (see `StaticRuntime`).
// Postconditions: a pass leaves the resolver cache filled for reporting;
//   the next pass resets it.
// Failure modes: unknown language/dialect (E0101), everything adapters and
//   macros raise, output directory problems (E0502/E0503, I/O).
// Side effects: `write_code_file` creates the code directory and writes
//   one file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::adapter::{GenContext, PassState};
use crate::adapters::{default_registry, EmbeddedCodeAutoAdapter};
use crate::diag::{codes, CgError, ErrorKind, Result};
use crate::lexer;
use crate::macros::{UserMacro, UserMacroRegistry};
use crate::model::{sanitize_name, ComponentKind, Model, ObjectRef};
use crate::pipeline::compute_provenance;
use crate::resolver::{AdapterRegistry, AdapterResolver, Resolution};
use crate::target::{CTarget, JavaTarget, Target};
use crate::template::TemplateStore;
use crate::types::PtType;

pub const DEFAULT_GENERATOR_PACKAGE: &str = "generic.program.procedural.c";
pub const DEFAULT_CODE_DIRECTORY: &str = "./cg";

/// Language name to generator package.
const LANGUAGES: &[(&str, &str)] = &[
    ("c", "generic.program.procedural.c"),
    ("java", "generic.program.procedural.java"),
];

/// Generator package for `language`. Unlisted languages get the
/// conventional procedural package, with a warning.
pub fn language_package(language: &str) -> String {
    match LANGUAGES.iter().find(|(l, _)| *l == language) {
        Some((_, package)) => package.to_string(),
        None => {
            log::warn!(
                "language '{}' is not in the language table; trying generic.program.procedural.{}",
                language,
                language
            );
            format!("generic.program.procedural.{}", language)
        }
    }
}

/// Last dotted segment of a package: the language it generates.
pub fn package_language(package: &str) -> &str {
    package.rsplit('.').next().unwrap_or(package)
}

// ── Options ─────────────────────────────────────────────────────────────────

/// What to do when the output file already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverwritePolicy {
    Fail,
    #[default]
    Overwrite,
    /// Keep the existing file and report its path.
    Skip,
}

#[derive(Debug, Clone)]
pub struct GeneratorOptions {
    pub generator_package: String,
    /// Adapter search packages, `;`/`:`/space/`*` separated.
    pub package_list: String,
    pub dialect: String,
    pub code_directory: PathBuf,
    pub inline: bool,
    pub run: bool,
    pub compile_command: Option<String>,
    pub run_command: Option<String>,
    pub overwrite: OverwritePolicy,
    pub timeout: Option<Duration>,
    pub template_dirs: Vec<PathBuf>,
    /// `name=value` overrides of top-level model parameters.
    pub overrides: Vec<(String, String)>,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        GeneratorOptions {
            generator_package: DEFAULT_GENERATOR_PACKAGE.to_string(),
            package_list: DEFAULT_GENERATOR_PACKAGE.to_string(),
            dialect: String::new(),
            code_directory: PathBuf::from(DEFAULT_CODE_DIRECTORY),
            inline: true,
            run: false,
            compile_command: None,
            run_command: None,
            overwrite: OverwritePolicy::default(),
            timeout: None,
            template_dirs: Vec::new(),
            overrides: Vec::new(),
        }
    }
}

/// Parse a `name=value` override.
pub fn parse_override(text: &str) -> Result<(String, String)> {
    match text.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(CgError::config(format!("malformed parameter override '{}'", text))
            .with_code(codes::E0102)
            .with_hint("use -P name=value")),
    }
}

// ── Runtime collaborator ────────────────────────────────────────────────────

/// The simulation-side hooks a top-level pass is bracketed by.
pub trait ModelRuntime {
    fn preinitialize_and_resolve_types(&mut self, model: &mut Model) -> Result<()>;

    fn wrapup(&mut self, model: &Model) -> Result<()>;

    /// The model asked to stop; wrapup failures are then not fatal.
    fn is_exiting_after_wrapup(&self) -> bool {
        false
    }
}

/// Validates single-source channels and infers unknown port types from
/// their sources.
#[derive(Debug, Default)]
pub struct StaticRuntime;

impl StaticRuntime {
    fn validate_links(model: &Model) -> Result<()> {
        for port in model.ports() {
            let width = if port.multiport { port.width } else { 1 };
            for index in 0..width {
                let sources = model.source_channels(crate::model::Channel::new(port.id, index));
                if sources.len() > 1 {
                    return Err(CgError::model(format!(
                        "{} channel {} has {} sources",
                        model.port_full_name(port.id),
                        index,
                        sources.len()
                    ))
                    .with_code(codes::E0400)
                    .with_hint("make the port a multiport or remove a link"));
                }
            }
        }
        Ok(())
    }

    /// The single known type all sources of `port` agree on.
    fn inferred_type(model: &Model, port: crate::model::PortId) -> Option<PtType> {
        let p = model.port(port);
        let width = if p.multiport { p.width } else { 1 };
        let mut found: Option<PtType> = None;
        for index in 0..width {
            for source in model.source_channels(crate::model::Channel::new(port, index)) {
                let ty = &model.port(source.port).ty;
                if ty.is_unknown() {
                    return None;
                }
                match &found {
                    Some(t) if t != ty => return None,
                    Some(_) => {}
                    None => found = Some(ty.clone()),
                }
            }
        }
        found
    }
}

impl ModelRuntime for StaticRuntime {
    fn preinitialize_and_resolve_types(&mut self, model: &mut Model) -> Result<()> {
        Self::validate_links(model)?;

        let unknown: Vec<_> = model
            .ports()
            .filter(|p| p.ty.is_unknown())
            .map(|p| p.id)
            .collect();
        let mut changed = true;
        while changed {
            changed = false;
            for &port in &unknown {
                if !model.port(port).ty.is_unknown() {
                    continue;
                }
                if let Some(ty) = Self::inferred_type(model, port) {
                    log::debug!("{} resolved to {}", model.port_full_name(port), ty);
                    model.port_mut(port).ty = ty;
                    changed = true;
                }
            }
        }
        Ok(())
    }

    fn wrapup(&mut self, _model: &Model) -> Result<()> {
        Ok(())
    }
}

// ── Program assembly ────────────────────────────────────────────────────────

/// Everything a pass produced, ready for target-specific framing.
#[derive(Debug, Clone, Default)]
pub struct ProgramParts {
    pub name: String,
    pub header: String,
    pub includes: Vec<String>,
    pub shared: Vec<String>,
    pub helpers: Vec<String>,
    pub declarations: String,
    pub preinitialize: String,
    pub initialize: String,
    pub fire_function: Option<String>,
    pub fire: String,
    pub postfire: String,
    pub wrapup: String,
    /// Zero runs forever.
    pub iterations: u64,
}

pub trait ProgramGenerator {
    fn target(&self) -> &dyn Target;

    fn assemble(&self, parts: &ProgramParts) -> String;

    /// Compile and run commands used when a run names neither.
    fn default_commands(&self) -> Option<(&'static str, &'static str)> {
        None
    }
}

/// Indent every non-blank line; leading and trailing blank lines are dropped.
fn indent(code: &str, prefix: &str) -> String {
    let mut out = String::new();
    for line in code.trim_matches('\n').lines() {
        if !line.trim().is_empty() {
            out.push_str(prefix);
            out.push_str(line);
        }
        out.push('\n');
    }
    out
}

pub struct CProgramGenerator {
    target: CTarget,
}

impl ProgramGenerator for CProgramGenerator {
    fn target(&self) -> &dyn Target {
        &self.target
    }

    fn default_commands(&self) -> Option<(&'static str, &'static str)> {
        let run = if cfg!(windows) {
            "@modelName@"
        } else {
            "./@modelName@"
        };
        Some(("cc -std=c99 -o @modelName@ @fileName@ -lm", run))
    }

    fn assemble(&self, parts: &ProgramParts) -> String {
        let mut out = parts.header.clone();
        out.push_str("#include <stdio.h>\n#include <stdlib.h>\n#include <string.h>\n#include <stdbool.h>\n");
        out.push_str("typedef bool boolean;\n");
        for block in parts.includes.iter().chain(&parts.shared).chain(&parts.helpers) {
            out.push('\n');
            out.push_str(block);
        }
        out.push('\n');
        out.push_str(&parts.declarations);
        out.push_str(&parts.preinitialize);

        out.push_str("\nvoid initialize(void) {\n");
        out.push_str(&indent(&parts.initialize, "    "));
        out.push_str("}\n");
        if let Some(function) = &parts.fire_function {
            out.push('\n');
            out.push_str(function);
        }
        out.push_str("\nvoid wrapup(void) {\n");
        out.push_str(&indent(&parts.wrapup, "    "));
        out.push_str("}\n");

        out.push_str("\nint main(int argc, char *argv[]) {\n");
        out.push_str("    initialize();\n");
        if parts.iterations == 0 {
            out.push_str("    for (;;) {\n");
        } else {
            out.push_str(&format!(
                "    for (int iteration = 0; iteration < {}; iteration++) {{\n",
                parts.iterations
            ));
        }
        out.push_str(&indent(&parts.fire, "        "));
        out.push_str(&indent(&parts.postfire, "        "));
        out.push_str("    }\n    wrapup();\n    return 0;\n}\n");
        out
    }
}

pub struct JavaProgramGenerator {
    target: JavaTarget,
}

impl ProgramGenerator for JavaProgramGenerator {
    fn target(&self) -> &dyn Target {
        &self.target
    }

    fn default_commands(&self) -> Option<(&'static str, &'static str)> {
        Some(("javac @fileName@", "java -classpath . @modelName@"))
    }

    fn assemble(&self, parts: &ProgramParts) -> String {
        let mut out = parts.header.clone();
        for block in &parts.includes {
            out.push_str(block);
        }
        out.push_str(&format!("\npublic class {} {{\n", parts.name));
        let mut body = String::new();
        for block in parts.shared.iter().chain(&parts.helpers) {
            body.push('\n');
            body.push_str(block);
        }
        body.push('\n');
        body.push_str(&parts.declarations);
        body.push_str(&parts.preinitialize);
        body.push_str("\nstatic void initialize() {\n");
        body.push_str(&indent(&parts.initialize, "    "));
        body.push_str("}\n");
        if let Some(function) = &parts.fire_function {
            body.push('\n');
            body.push_str(function);
        }
        body.push_str("\nstatic void wrapup() {\n");
        body.push_str(&indent(&parts.wrapup, "    "));
        body.push_str("}\n");

        body.push_str("\npublic static void main(String[] args) {\n");
        body.push_str("    initialize();\n");
        if parts.iterations == 0 {
            body.push_str("    while (true) {\n");
        } else {
            body.push_str(&format!(
                "    for (int iteration = 0; iteration < {}; iteration++) {{\n",
                parts.iterations
            ));
        }
        body.push_str(&indent(&parts.fire, "        "));
        body.push_str(&indent(&parts.postfire, "        "));
        body.push_str("    }\n    wrapup();\n}\n");

        out.push_str(&indent(&body, "    "));
        out.push_str("}\n");
        out
    }
}

type ProgramFactory = fn() -> Box<dyn ProgramGenerator>;

/// Program generators keyed by (language, dialect); the empty dialect is
/// the language's default.
pub struct GeneratorRegistry {
    factories: HashMap<(String, String), ProgramFactory>,
}

impl Default for GeneratorRegistry {
    fn default() -> Self {
        let mut registry = GeneratorRegistry {
            factories: HashMap::new(),
        };
        registry.register("c", "", || Box::new(CProgramGenerator { target: CTarget }));
        registry.register("java", "", || Box::new(JavaProgramGenerator { target: JavaTarget }));
        registry
    }
}

impl GeneratorRegistry {
    pub fn register(&mut self, language: &str, dialect: &str, factory: ProgramFactory) {
        self.factories
            .insert((language.to_string(), dialect.to_string()), factory);
    }

    pub fn create(&self, language: &str, dialect: &str) -> Result<Box<dyn ProgramGenerator>> {
        match self.factories.get(&(language.to_string(), dialect.to_string())) {
            Some(factory) => Ok(factory()),
            None => {
                let mut known: Vec<String> = self
                    .factories
                    .keys()
                    .map(|(l, d)| if d.is_empty() { l.clone() } else { format!("{}/{}", l, d) })
                    .collect();
                known.sort();
                Err(CgError::config(format!(
                    "no code generator for language '{}'{}",
                    language,
                    if dialect.is_empty() {
                        String::new()
                    } else {
                        format!(" dialect '{}'", dialect)
                    }
                ))
                .with_code(codes::E0101)
                .with_hint(format!("available: {}", known.join(", "))))
            }
        }
    }
}

// ── Shipped templates ───────────────────────────────────────────────────────

const C_PACKAGE: &str = "generic.program.procedural.c";
const JAVA_PACKAGE: &str = "generic.program.procedural.java";

const BUILTIN_TEMPLATES: &[(&str, &str, &str)] = &[
    (C_PACKAGE, "ptolemy.actor.lib.Const", include_str!("../../templates/generic/program/procedural/c/adapters/ptolemy/actor/lib/Const.c")),
    (C_PACKAGE, "ptolemy.actor.lib.Ramp", include_str!("../../templates/generic/program/procedural/c/adapters/ptolemy/actor/lib/Ramp.c")),
    (C_PACKAGE, "ptolemy.actor.lib.Scale", include_str!("../../templates/generic/program/procedural/c/adapters/ptolemy/actor/lib/Scale.c")),
    (C_PACKAGE, "ptolemy.actor.lib.AddSubtract", include_str!("../../templates/generic/program/procedural/c/adapters/ptolemy/actor/lib/AddSubtract.c")),
    (C_PACKAGE, "ptolemy.actor.lib.Discard", include_str!("../../templates/generic/program/procedural/c/adapters/ptolemy/actor/lib/Discard.c")),
    (C_PACKAGE, "ptolemy.actor.lib.gui.Display", include_str!("../../templates/generic/program/procedural/c/adapters/ptolemy/actor/lib/gui/Display.c")),
    (JAVA_PACKAGE, "ptolemy.actor.lib.Const", include_str!("../../templates/generic/program/procedural/java/adapters/ptolemy/actor/lib/Const.java")),
    (JAVA_PACKAGE, "ptolemy.actor.lib.Ramp", include_str!("../../templates/generic/program/procedural/java/adapters/ptolemy/actor/lib/Ramp.java")),
    (JAVA_PACKAGE, "ptolemy.actor.lib.Scale", include_str!("../../templates/generic/program/procedural/java/adapters/ptolemy/actor/lib/Scale.java")),
    (JAVA_PACKAGE, "ptolemy.actor.lib.AddSubtract", include_str!("../../templates/generic/program/procedural/java/adapters/ptolemy/actor/lib/AddSubtract.java")),
    (JAVA_PACKAGE, "ptolemy.actor.lib.gui.Display", include_str!("../../templates/generic/program/procedural/java/adapters/ptolemy/actor/lib/gui/Display.java")),
];

fn template_store(options: &GeneratorOptions, extension: &str) -> Result<TemplateStore> {
    let mut store = TemplateStore::new(extension);
    for dir in &options.template_dirs {
        store.add_root(dir);
    }
    for (package, class, text) in BUILTIN_TEMPLATES {
        store.insert_fallback(package, class, text)?;
    }
    Ok(store)
}

// ── Driver ──────────────────────────────────────────────────────────────────

pub struct CodeGenerator {
    options: GeneratorOptions,
    program: Box<dyn ProgramGenerator>,
    resolver: AdapterResolver,
    templates: TemplateStore,
    user_macros: UserMacroRegistry,
}

impl CodeGenerator {
    pub fn new(options: GeneratorOptions) -> Result<Self> {
        Self::with_registries(options, &GeneratorRegistry::default(), default_registry())
    }

    pub fn with_registries(
        options: GeneratorOptions,
        generators: &GeneratorRegistry,
        adapters: AdapterRegistry,
    ) -> Result<Self> {
        let language = package_language(&options.generator_package);
        let program = generators.create(language, &options.dialect)?;
        let resolver = AdapterResolver::new(adapters, &options.package_list)?
            .with_auto_adapter(Box::new(EmbeddedCodeAutoAdapter));
        let templates = template_store(&options, program.target().extension())?;
        log::debug!(
            "generating {} with packages [{}]",
            program.target().name(),
            resolver.packages().join(", ")
        );
        Ok(CodeGenerator {
            options,
            program,
            resolver,
            templates,
            user_macros: UserMacroRegistry::new(),
        })
    }

    pub fn with_user_macro(mut self, name: &str, user_macro: Box<dyn UserMacro>) -> Self {
        self.user_macros.register(name, user_macro);
        self
    }

    pub fn options(&self) -> &GeneratorOptions {
        &self.options
    }

    pub fn target(&self) -> &dyn Target {
        self.program.target()
    }

    /// `<sanitized model name>.<language>`.
    pub fn output_file_name(&self, model: &Model) -> String {
        format!(
            "{}.{}",
            sanitize_name(&model.name),
            package_language(&self.options.generator_package)
        )
    }

    pub fn apply_overrides(&self, model: &mut Model) {
        let root = model.root();
        for (name, value) in &self.options.overrides {
            log::debug!("override {}={}", name, value);
            model.set_parameter(root, name, value);
        }
    }

    fn context<'a>(&'a self, model: &'a Model, state: &'a PassState) -> GenContext<'a> {
        GenContext {
            model,
            target: self.program.target(),
            templates: &self.templates,
            resolver: &self.resolver,
            user_macros: &self.user_macros,
            state,
            inline: self.options.inline,
        }
    }

    /// Fresh pass state; drops every adapter cached by an earlier pass.
    pub fn begin_pass(&self) -> PassState {
        self.resolver.reset();
        PassState::new()
    }

    /// Resolve an adapter for every component and port. Returns the count.
    pub fn resolve_adapters(&self, model: &Model) -> Result<usize> {
        let mut count = 0;
        for component in model.components() {
            self.resolver.resolve(model, ObjectRef::Component(component.id))?;
            count += 1;
        }
        for port in model.ports() {
            self.resolver.resolve(model, ObjectRef::Port(port.id))?;
            count += 1;
        }
        Ok(count)
    }

    pub fn analyze_type_conversions(&self, model: &Model, state: &PassState) -> Result<()> {
        let cx = self.context(model, state);
        for component in model.components() {
            if component.kind == ComponentKind::Director {
                continue;
            }
            cx.component_adapter(component.id)?.analyze_type_convert(&cx)?;
        }
        Ok(())
    }

    fn iterations(&self, model: &Model) -> Result<u64> {
        let Some(director) = model.component(model.root()).director else {
            return Ok(0);
        };
        let value = model.evaluate_parameter(director, "iterations")?;
        Ok(value
            .and_then(|v| v.as_i64())
            .map(|n| n.max(0) as u64)
            .unwrap_or(0))
    }

    /// Assemble the program for an analyzed pass.
    pub fn assemble(&self, model: &Model, state: &PassState) -> Result<String> {
        let cx = self.context(model, state);
        let root = cx.component_adapter(model.root())?;

        // Phase code first: it fills the used type and conversion sets.
        let declarations = root.generate_variable_declaration(&cx)?;
        let preinitialize = root.generate_preinitialize_code(&cx)?;
        let initialize = root.generate_initialize_code(&cx)?;
        let fire = root.generate_fire_code(&cx)?;
        let fire_function = if self.options.inline {
            None
        } else {
            Some(root.generate_fire_function_code(&cx)?)
        };
        let postfire = root.generate_postfire_code(&cx)?;
        let wrapup = root.generate_wrapup_code(&cx)?;

        let mut includes: Vec<String> = Vec::new();
        let mut shared: Vec<String> = Vec::new();
        for component in model.components() {
            if component.kind == ComponentKind::Director {
                continue;
            }
            let adapter = cx.component_adapter(component.id)?;
            for block in adapter.generate_include_code(&cx)? {
                if !includes.contains(&block) {
                    includes.push(block);
                }
            }
            for block in adapter.generate_shared_code(&cx)? {
                if !shared.contains(&block) {
                    shared.push(block);
                }
            }
        }

        let target = self.program.target();
        let helpers: Vec<String> = state
            .used_conversions()
            .iter()
            .filter_map(|(from, to)| {
                let helper = target.conversion_function(from, to);
                if helper.is_none() {
                    log::warn!("no {} helper converts {} to {}", target.name(), from, to);
                }
                helper
            })
            .collect();

        let provenance = compute_provenance(model);
        let mut header = target.comment(&format!(
            "Generated by ptcg {} from model {}",
            provenance.compiler_version, model.name
        ));
        header.push_str(&target.comment(&format!(
            "Model fingerprint: sha256:{}",
            provenance.model_fingerprint_hex()
        )));

        let parts = ProgramParts {
            name: sanitize_name(&model.name),
            header,
            includes,
            shared,
            helpers,
            declarations,
            preinitialize,
            initialize,
            fire_function,
            fire,
            postfire,
            wrapup,
            iterations: self.iterations(model)?,
        };
        Ok(lexer::unescape_dollars(&self.program.assemble(&parts)))
    }

    /// One full pass: resolve, analyze, assemble.
    pub fn generate_code(&self, model: &Model) -> Result<String> {
        let state = self.begin_pass();
        self.resolve_adapters(model)?;
        self.analyze_type_conversions(model, &state)?;
        self.assemble(model, &state)
    }

    /// How the adapters of the last pass were found.
    pub fn resolutions(&self, model: &Model) -> Vec<Resolution> {
        self.resolver.report(model)
    }

    /// Write `code` under the code directory, honoring the overwrite policy.
    pub fn write_code_file(&self, model: &Model, code: &str) -> Result<PathBuf> {
        let dir = &self.options.code_directory;
        if dir.exists() && !dir.is_dir() {
            return Err(CgError::new(
                ErrorKind::Io,
                format!("code directory {} is not a directory", dir.display()),
            )
            .with_code(codes::E0502));
        }
        std::fs::create_dir_all(dir).map_err(|e| CgError::io("create directory", dir, e))?;

        let path = dir.join(self.output_file_name(model));
        if path.exists() {
            match self.options.overwrite {
                OverwritePolicy::Overwrite => {}
                OverwritePolicy::Skip => {
                    log::info!("{} exists; leaving it untouched", path.display());
                    return Ok(path);
                }
                OverwritePolicy::Fail => {
                    return Err(CgError::new(
                        ErrorKind::Io,
                        format!("{} already exists", path.display()),
                    )
                    .with_code(codes::E0503)
                    .with_hint("pass --overwrite overwrite or --overwrite skip"))
                }
            }
        }
        std::fs::write(&path, code).map_err(|e| CgError::io("write", &path, e))?;
        log::info!("wrote {}", path.display());
        Ok(path)
    }

    /// Compile and run commands for this run. With neither given, the
    /// program generator's defaults apply.
    pub fn run_commands(&self) -> Result<(Option<String>, Option<String>)> {
        match (&self.options.compile_command, &self.options.run_command) {
            (None, None) => {
                let (compile, run) = self.program.default_commands().ok_or_else(|| {
                    CgError::new(
                        ErrorKind::Config,
                        format!(
                            "no default compile or run command for {} (dialect '{}')",
                            self.options.generator_package, self.options.dialect
                        ),
                    )
                    .with_code(codes::E0103)
                    .with_hint("pass --compile-command and --run-command")
                })?;
                log::debug!("default commands: '{}' then '{}'", compile, run);
                Ok((Some(compile.to_string()), Some(run.to_string())))
            }
            (compile, run) => Ok((compile.clone(), run.clone())),
        }
    }

    /// Compile and run the written file; 0 when running is off.
    pub fn execute(&self, model: &Model, path: &Path) -> Result<i32> {
        if !self.options.run {
            return Ok(0);
        }
        let (compile, run) = self.run_commands()?;
        let dir = &self.options.code_directory;
        let file_name = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        let map = crate::exec::substitution_map(&sanitize_name(&model.name), dir, &file_name);
        crate::exec::compile_and_run(
            compile.as_deref(),
            run.as_deref(),
            &map,
            dir,
            self.options.timeout,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = r#"{"name": "Demo Model", "director": {"parameters": {"iterations": 4}},
        "components": [
            {"name": "Ramp", "class": "ptolemy.actor.lib.Ramp",
             "parameters": {"init": 0, "step": 1},
             "ports": [{"name": "output", "direction": "output", "type": "int"}]},
            {"name": "Out", "class": "ptolemy.actor.lib.gui.Display",
             "ports": [{"name": "input", "direction": "input", "multiport": true}]}],
        "links": [{"from": "Ramp.output", "to": "Out.input"}]}"#;

    fn model() -> Model {
        let mut m = Model::from_json_str(MODEL).unwrap();
        StaticRuntime.preinitialize_and_resolve_types(&mut m).unwrap();
        m
    }

    #[test]
    fn languages_map_to_packages() {
        assert_eq!(language_package("java"), "generic.program.procedural.java");
        assert_eq!(language_package("cuda"), "generic.program.procedural.cuda");
        assert_eq!(package_language("generic.program.procedural.c"), "c");
    }

    #[test]
    fn overrides_parse() {
        assert_eq!(parse_override("gain = 2").unwrap(), ("gain".into(), "2".into()));
        assert_eq!(parse_override("=2").unwrap_err().code, Some(codes::E0102));
    }

    #[test]
    fn unknown_dialect_is_config_error() {
        let err = GeneratorRegistry::default().create("c", "arduino").err().unwrap();
        assert_eq!(err.code, Some(codes::E0101));
        assert!(err.hint.unwrap().contains("java"));
    }

    #[test]
    fn run_commands_default_per_language() {
        let c = CodeGenerator::new(GeneratorOptions::default()).unwrap();
        let (compile, run) = c.run_commands().unwrap();
        assert!(compile.unwrap().starts_with("cc -std=c99 -o @modelName@ @fileName@"));
        assert!(run.unwrap().ends_with("@modelName@"));

        let java = CodeGenerator::new(GeneratorOptions {
            generator_package: language_package("java"),
            package_list: language_package("java"),
            ..GeneratorOptions::default()
        })
        .unwrap();
        let (compile, run) = java.run_commands().unwrap();
        assert_eq!(compile.as_deref(), Some("javac @fileName@"));
        assert_eq!(run.as_deref(), Some("java -classpath . @modelName@"));
    }

    #[test]
    fn explicit_run_command_replaces_defaults() {
        let generator = CodeGenerator::new(GeneratorOptions {
            run_command: Some("./a.out".to_string()),
            ..GeneratorOptions::default()
        })
        .unwrap();
        assert_eq!(
            generator.run_commands().unwrap(),
            (None, Some("./a.out".to_string()))
        );
    }

    struct BareC {
        target: CTarget,
    }

    impl ProgramGenerator for BareC {
        fn target(&self) -> &dyn Target {
            &self.target
        }

        fn assemble(&self, _parts: &ProgramParts) -> String {
            String::new()
        }
    }

    #[test]
    fn run_without_known_commands_is_config_error() {
        let mut generators = GeneratorRegistry::default();
        generators.register("c", "bare", || Box::new(BareC { target: CTarget }));
        let options = GeneratorOptions {
            dialect: "bare".to_string(),
            run: true,
            ..GeneratorOptions::default()
        };
        let generator =
            CodeGenerator::with_registries(options, &generators, default_registry()).unwrap();
        let m = model();
        let err = generator
            .execute(&m, Path::new("Demo_Model.c"))
            .unwrap_err();
        assert_eq!(err.code, Some(codes::E0103));
        assert_eq!(err.kind, ErrorKind::Config);
    }

    #[test]
    fn runtime_infers_sink_types() {
        let m = model();
        let out = m.find_component(".Demo Model.Out").unwrap();
        let input = m.find_port(out, "input").unwrap();
        assert_eq!(m.port(input).ty, PtType::Int);
    }

    #[test]
    fn c_program_shape() {
        let m = model();
        let generator = CodeGenerator::new(GeneratorOptions::default()).unwrap();
        assert_eq!(generator.output_file_name(&m), "Demo_Model.c");
        let code = generator.generate_code(&m).unwrap();
        assert!(code.starts_with("/* Generated by ptcg "));
        assert!(code.contains("Model fingerprint: sha256:"));
        assert!(code.contains("static int Demo_Model_Ramp_state;"));
        assert!(code.contains("for (int iteration = 0; iteration < 4; iteration++) {"));
        assert!(code.contains("Demo_Model_Out_input[0] = Demo_Model_Ramp_state;"));
        assert!(code.contains("char* InttoString(int a)"));
        assert!(code.contains("Demo_Model_Ramp_state += 1;"));
    }

    #[test]
    fn java_program_is_a_class() {
        let m = model();
        let options = GeneratorOptions {
            generator_package: language_package("java"),
            package_list: language_package("java"),
            inline: false,
            ..GeneratorOptions::default()
        };
        let generator = CodeGenerator::new(options).unwrap();
        assert_eq!(generator.output_file_name(&m), "Demo_Model.java");
        let code = generator.generate_code(&m).unwrap();
        assert!(code.contains("public class Demo_Model {"));
        assert!(code.contains("    public static void main(String[] args) {"));
        assert!(code.contains("static void Demo_Model_fire() {"));
        assert!(code.contains("Demo_Model_fire();"));
    }

    #[test]
    fn model_named_main_keeps_one_main() {
        let mut m = Model::from_json_str(&MODEL.replace("Demo Model", "main")).unwrap();
        StaticRuntime.preinitialize_and_resolve_types(&mut m).unwrap();
        let options = GeneratorOptions {
            inline: false,
            ..GeneratorOptions::default()
        };
        let code = CodeGenerator::new(options).unwrap().generate_code(&m).unwrap();
        assert!(code.contains("void main_fire(void) {"));
        assert!(code.contains("        main_fire();"));
        assert!(!code.contains("void main(void)"));
        assert_eq!(code.matches("int main(").count(), 1);
    }

    #[test]
    fn passes_are_independent() {
        let m = model();
        let generator = CodeGenerator::new(GeneratorOptions::default()).unwrap();
        let first = generator.generate_code(&m).unwrap();
        let second = generator.generate_code(&m).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn overwrite_policies() {
        let m = model();
        let dir = std::env::temp_dir().join(format!("ptcg_gen_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let mut options = GeneratorOptions {
            code_directory: dir.clone(),
            overwrite: OverwritePolicy::Fail,
            ..GeneratorOptions::default()
        };
        let generator = CodeGenerator::new(options.clone()).unwrap();
        let path = generator.write_code_file(&m, "first").unwrap();
        let err = generator.write_code_file(&m, "second").unwrap_err();
        assert_eq!(err.code, Some(codes::E0503));

        options.overwrite = OverwritePolicy::Skip;
        let generator = CodeGenerator::new(options.clone()).unwrap();
        assert_eq!(generator.write_code_file(&m, "second").unwrap(), path);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first");

        options.overwrite = OverwritePolicy::Overwrite;
        let generator = CodeGenerator::new(options).unwrap();
        generator.write_code_file(&m, "third").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "third");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
