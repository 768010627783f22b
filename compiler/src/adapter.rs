// adapter.rs — Adapter contract and built-in macros
//
// An adapter produces target-language text for one model object and one
// lifecycle phase. This module defines the `Adapter` trait, the pass-scoped
// `GenContext` every adapter works against, the shared template-driven
// behavior (`ComponentCore`), and `AdapterScope`, the macro handler that
// implements the built-in `$get`/`$ref`/`$val`/... macros for an adapter.
//
// Preconditions: the resolver's package list is non-empty; type conversion
//   analysis has run before any fire code is generated.
// Postconditions: used types, functions and conversion helpers are recorded
//   in `PassState` as macros are expanded.
// Failure modes: bad macro arguments (E0302), unknown ports or parameters
//   (E0401), expression failures (E0402/E0403), missing directors (E0400).
// Side effects: none beyond `PassState` and adapter-local caches.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use crate::convert::{self, TypeConversionRecord};
use crate::diag::{codes, CgError, ErrorKind, Result};
use crate::expr::Value;
use crate::macros::{self, parse_list, MacroHandler, UserMacroRegistry};
use crate::model::{Channel, ComponentId, ComponentKind, Model, ObjectRef, PortId};
use crate::resolver::AdapterResolver;
use crate::target::Target;
use crate::template::{BlockSet, CodeStream, TemplateStore};
use crate::types::PtType;

/// Name of the parameter holding template text that overrides class templates.
pub const EMBEDDED_CODE: &str = "embeddedCode";

// ── Pass state ──────────────────────────────────────────────────────────────

/// Bookkeeping that lives exactly as long as one generation pass.
#[derive(Debug, Default)]
pub struct PassState {
    used_types: RefCell<BTreeSet<String>>,
    used_functions: RefCell<BTreeSet<String>>,
    used_conversions: RefCell<Vec<(PtType, PtType)>>,
}

impl PassState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_type(&self, name: &str) {
        self.used_types.borrow_mut().insert(name.to_string());
    }

    pub fn record_function(&self, name: &str) {
        self.used_functions.borrow_mut().insert(name.to_string());
    }

    pub fn record_conversion(&self, from: &PtType, to: &PtType) {
        let mut used = self.used_conversions.borrow_mut();
        if !used.iter().any(|(f, t)| f == from && t == to) {
            used.push((from.clone(), to.clone()));
        }
    }

    pub fn used_types(&self) -> Vec<String> {
        self.used_types.borrow().iter().cloned().collect()
    }

    pub fn used_functions(&self) -> Vec<String> {
        self.used_functions.borrow().iter().cloned().collect()
    }

    pub fn used_conversions(&self) -> Vec<(PtType, PtType)> {
        self.used_conversions.borrow().clone()
    }
}

// ── Generation context ──────────────────────────────────────────────────────

/// Everything an adapter may consult during a pass.
pub struct GenContext<'a> {
    pub model: &'a Model,
    pub target: &'a dyn Target,
    pub templates: &'a TemplateStore,
    pub resolver: &'a AdapterResolver,
    pub user_macros: &'a UserMacroRegistry,
    pub state: &'a PassState,
    /// Fire code is inlined into the main loop rather than a function.
    pub inline: bool,
}

impl<'a> GenContext<'a> {
    pub fn adapter(&self, obj: ObjectRef) -> Result<Rc<dyn Adapter>> {
        self.resolver.resolve(self.model, obj)
    }

    pub fn component_adapter(&self, component: ComponentId) -> Result<Rc<dyn Adapter>> {
        self.adapter(ObjectRef::Component(component))
    }

    /// Adapter of the director governing `component`'s ports: the nearest
    /// director above it, or its own for the top level.
    pub fn director_for(&self, component: ComponentId) -> Result<Rc<dyn Adapter>> {
        let start = self.model.component(component).parent.unwrap_or(component);
        let director = self.model.executive_director(start).ok_or_else(|| {
            CgError::model(format!(
                "{} is not governed by any director",
                self.model.full_name(component)
            ))
            .with_code(codes::E0400)
            .with_hint("add a \"director\" entry to the top-level model")
        })?;
        let adapter = self.component_adapter(director)?;
        if adapter.as_director().is_none() {
            return Err(CgError::resolution(format!(
                "adapter for {} is not a director adapter",
                self.model.full_name(director)
            ))
            .with_code(codes::E0201));
        }
        Ok(adapter)
    }

    /// Expand every macro in `code` on behalf of `adapter`.
    pub fn process_code(&self, adapter: &dyn Adapter, code: &str) -> Result<String> {
        macros::process_code(code, &AdapterScope { cx: self, adapter })
    }

    pub fn comment(&self, text: &str) -> String {
        self.target.comment(text)
    }
}

// ── Adapter trait ───────────────────────────────────────────────────────────

pub trait Adapter {
    fn object(&self) -> ObjectRef;

    /// Short adapter kind for reports, e.g. `template-actor`.
    fn kind(&self) -> &'static str;

    fn component(&self) -> Option<ComponentId> {
        match self.object() {
            ObjectRef::Component(c) => Some(c),
            ObjectRef::Port(_) => None,
        }
    }

    fn generate_preinitialize_code(&self, _cx: &GenContext) -> Result<String> {
        Ok(String::new())
    }

    fn generate_initialize_code(&self, _cx: &GenContext) -> Result<String> {
        Ok(String::new())
    }

    fn generate_fire_code(&self, _cx: &GenContext) -> Result<String> {
        Ok(String::new())
    }

    /// The separate fire procedure used when fire code is not inlined.
    fn generate_fire_function_code(&self, _cx: &GenContext) -> Result<String> {
        Ok(String::new())
    }

    fn generate_postfire_code(&self, _cx: &GenContext) -> Result<String> {
        Ok(String::new())
    }

    fn generate_wrapup_code(&self, _cx: &GenContext) -> Result<String> {
        Ok(String::new())
    }

    fn generate_variable_declaration(&self, _cx: &GenContext) -> Result<String> {
        Ok(String::new())
    }

    /// Processed `includeFiles` blocks.
    fn generate_include_code(&self, _cx: &GenContext) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    /// Processed `.*shared.*` blocks, one entry per block.
    fn generate_shared_code(&self, _cx: &GenContext) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    /// Rebuild this adapter's type conversion record.
    fn analyze_type_convert(&self, _cx: &GenContext) -> Result<()> {
        Ok(())
    }

    fn type_conversions(&self) -> TypeConversionRecord {
        TypeConversionRecord::default()
    }

    /// Adapter-specific zero-argument macros.
    fn method_macro(&self, _name: &str, _cx: &GenContext) -> Option<Result<String>> {
        None
    }

    fn as_director(&self) -> Option<&dyn DirectorAdapter> {
        None
    }

    fn as_port(&self) -> Option<&dyn PortAdapter> {
        None
    }
}

/// Buffer references and scheduling for the actors a director governs.
pub trait DirectorAdapter {
    /// Reference to `port`'s buffer. Inputs (and composite ports read from
    /// inside) refer to their own buffer; outputs with `write` set refer to
    /// every sink they feed. `channel` may be a non-integer expression.
    fn port_reference(
        &self,
        cx: &GenContext,
        port: PortId,
        channel: &str,
        offset: Option<&str>,
        write: bool,
    ) -> Result<String>;

    /// Reference a converted value is stored into.
    fn sink_reference(&self, cx: &GenContext, sink: Channel, offset: Option<&str>) -> String;

    /// Contained actors of `container` in firing order.
    fn schedule(&self, cx: &GenContext, container: ComponentId) -> Vec<ComponentId>;

    fn generate_variable_declarations(&self, cx: &GenContext, container: ComponentId) -> Result<String>;

    fn generate_preinitialize_code(&self, cx: &GenContext, container: ComponentId) -> Result<String>;

    fn generate_initialize_code(&self, cx: &GenContext, container: ComponentId) -> Result<String>;

    fn generate_fire_code(&self, cx: &GenContext, container: ComponentId) -> Result<String>;

    fn generate_postfire_code(&self, cx: &GenContext, container: ComponentId) -> Result<String>;

    fn generate_wrapup_code(&self, cx: &GenContext, container: ComponentId) -> Result<String>;
}

/// Channel-level reads and writes on one port.
pub trait PortAdapter {
    fn port(&self) -> PortId;

    fn generate_get_code(&self, cx: &GenContext, channel: &str, offset: Option<&str>) -> Result<String>;

    fn generate_send_code(&self, cx: &GenContext, channel: &str, data: &str) -> Result<String>;
}

// ── Template-driven component behavior ──────────────────────────────────────

/// State and behavior shared by adapters whose code comes from templates.
pub struct ComponentCore {
    component: ComponentId,
    embedded: Option<Rc<CodeStream>>,
    blocks: RefCell<Option<Rc<BlockSet>>>,
    conversions: RefCell<TypeConversionRecord>,
}

impl ComponentCore {
    pub fn new(component: ComponentId) -> Self {
        ComponentCore {
            component,
            embedded: None,
            blocks: RefCell::new(None),
            conversions: RefCell::new(TypeConversionRecord::default()),
        }
    }

    /// Core whose first template scope is parsed from `text`.
    pub fn with_embedded(component: ComponentId, text: &str) -> Result<Self> {
        let stream = CodeStream::parse(text).map_err(|e| {
            CgError::macro_error(format!(
                "failed to parse the {} parameter of component #{}",
                EMBEDDED_CODE, component.0
            ))
            .with_code(codes::E0304)
            .caused_by(e)
        })?;
        let mut core = ComponentCore::new(component);
        core.embedded = Some(Rc::new(stream));
        Ok(core)
    }

    /// Core for `component`, picking up its `embeddedCode` parameter if any.
    pub fn for_component(model: &Model, component: ComponentId) -> Result<Self> {
        let embedded = model
            .component(component)
            .parameters
            .iter()
            .find(|p| p.name == EMBEDDED_CODE);
        match embedded {
            Some(p) => ComponentCore::with_embedded(component, &p.expression),
            None => Ok(ComponentCore::new(component)),
        }
    }

    pub fn id(&self) -> ComponentId {
        self.component
    }

    pub fn blocks(&self, cx: &GenContext) -> Result<Rc<BlockSet>> {
        if let Some(blocks) = self.blocks.borrow().as_ref() {
            return Ok(Rc::clone(blocks));
        }
        let chain = cx.model.class_chain(ObjectRef::Component(self.component));
        let set = Rc::new(cx.templates.block_set(
            &chain,
            cx.resolver.packages(),
            self.embedded.clone(),
        )?);
        *self.blocks.borrow_mut() = Some(Rc::clone(&set));
        Ok(set)
    }

    /// Block `name` plus its per-channel `[port]` form, unprocessed.
    fn raw_block(&self, cx: &GenContext, name: &str) -> Result<String> {
        let blocks = self.blocks(cx)?;
        let mut code = String::new();
        blocks.append_code_block(&mut code, name, &[], false)?;
        blocks.append_width_blocks(&mut code, name, |port| {
            cx.model
                .find_port(self.component, port)
                .map(|p| convert::channels(cx.model, p).count())
        })?;
        Ok(code)
    }

    /// Named block with a leading phase comment when non-empty, processed.
    pub fn generate_block_by_name(
        &self,
        adapter: &dyn Adapter,
        cx: &GenContext,
        block_name: &str,
    ) -> Result<String> {
        let code = self.raw_block(cx, block_name)?;
        if code.is_empty() {
            return Ok(code);
        }
        let phase = block_name
            .rfind("Block")
            .map(|i| &block_name[..i])
            .unwrap_or(block_name);
        let comment = cx.comment(&format!(
            "{} {}",
            phase,
            cx.model.component(self.component).name
        ));
        cx.process_code(adapter, &format!("\n{}{}", comment, code))
    }

    /// `fireBlock` processed, without a comment.
    pub fn generate_fire_block(&self, adapter: &dyn Adapter, cx: &GenContext) -> Result<String> {
        let code = self.raw_block(cx, "fireBlock")?;
        cx.process_code(adapter, &code)
    }

    fn fire_comment(&self, cx: &GenContext) -> String {
        let composite = if cx.model.is_composite(self.component) {
            "Composite Actor: "
        } else {
            ""
        };
        cx.comment(&format!(
            "Fire {}{}",
            composite,
            cx.model.generate_name(ObjectRef::Component(self.component))
        ))
    }

    /// `<generated name>_fire`, clear of `main`, `initialize` and `wrapup`.
    pub fn fire_function_name(&self, cx: &GenContext) -> String {
        format!(
            "{}_fire",
            cx.model.generate_name(ObjectRef::Component(self.component))
        )
    }

    /// Apply the fire policy to an already generated fire `body`.
    pub fn generate_fire_code(
        &self,
        adapter: &dyn Adapter,
        cx: &GenContext,
        body: impl FnOnce() -> Result<String>,
    ) -> Result<String> {
        let mut code = format!("\n{}", self.fire_comment(cx));
        let top_level = cx.model.component(self.component).parent.is_none();
        if !cx.inline && top_level {
            code.push_str(&format!("{}();\n", self.fire_function_name(cx)));
        } else {
            code.push_str(&body()?);
            code.push_str(&self.generate_type_convert_fire_code(adapter, cx, false)?);
        }
        Ok(code)
    }

    pub fn generate_fire_function_code(
        &self,
        adapter: &dyn Adapter,
        cx: &GenContext,
        body: impl FnOnce() -> Result<String>,
    ) -> Result<String> {
        let mut code = cx.target.function_open(&self.fire_function_name(cx));
        code.push_str(&body()?);
        code.push_str(&self.generate_type_convert_fire_code(adapter, cx, false)?);
        code.push_str(cx.target.function_close());
        Ok(code)
    }

    pub fn analyze_type_convert(&self, cx: &GenContext) {
        *self.conversions.borrow_mut() = convert::analyze(cx.model, self.component);
    }

    pub fn type_conversions(&self) -> TypeConversionRecord {
        self.conversions.borrow().clone()
    }

    /// Conversion statements for recorded output sources, or for input
    /// sources when `for_composite` (the transfer-in side).
    pub fn generate_type_convert_fire_code(
        &self,
        adapter: &dyn Adapter,
        cx: &GenContext,
        for_composite: bool,
    ) -> Result<String> {
        let record = self.type_conversions();
        let mut code = String::new();
        for source in record.sources() {
            let is_output = cx.model.port(source.port).is_output();
            if is_output == for_composite {
                continue;
            }
            for sink in record.sinks(source) {
                code.push_str(&self.generate_type_convert_statements(adapter, cx, source, *sink)?);
            }
        }
        Ok(code)
    }

    /// One conversion statement per offset for a converted pair.
    pub fn generate_type_convert_statements(
        &self,
        adapter: &dyn Adapter,
        cx: &GenContext,
        source: Channel,
        sink: Channel,
    ) -> Result<String> {
        let director = cx.director_for(self.component)?;
        let Some(director) = director.as_director() else {
            return Ok(String::new());
        };
        let source_type = &cx.model.port(source.port).ty;
        let sink_type = &cx.model.port(sink.port).ty;

        let mut statements = String::new();
        for offset in 0..convert::conversion_offsets(cx.model, source.port) {
            let offset = offset.to_string();
            let source_ref = director.port_reference(
                cx,
                source.port,
                &source.index.to_string(),
                Some(&offset),
                false,
            )?;
            let Some(rhs) =
                convert::conversion_expression(cx.target, source_type, sink_type, &source_ref)
            else {
                continue;
            };
            if cx.target.is_primitive(sink_type) && source_type != sink_type {
                cx.state.record_conversion(source_type, sink_type);
            }
            let sink_ref = director.sink_reference(cx, sink, Some(&offset));
            statements.push_str(&format!("{} = {};\n", sink_ref, rhs));
        }
        cx.process_code(adapter, &statements)
    }

    pub fn generate_include_code(&self, adapter: &dyn Adapter, cx: &GenContext) -> Result<Vec<String>> {
        let code = self.raw_block(cx, "includeFiles")?;
        if code.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![cx.process_code(adapter, &code)?])
    }

    pub fn generate_shared_code(&self, adapter: &dyn Adapter, cx: &GenContext) -> Result<Vec<String>> {
        let blocks = self.blocks(cx)?;
        let mut out = Vec::new();
        for name in blocks.append_code_blocks(&mut String::new(), ".*shared.*") {
            let mut code = String::new();
            blocks.append_code_block(&mut code, &name, &[], true)?;
            out.push(cx.process_code(adapter, &code)?);
        }
        Ok(out)
    }
}

// ── Built-in macros ─────────────────────────────────────────────────────────

/// Macro handler binding the built-in macros to one adapter.
pub struct AdapterScope<'s, 'a> {
    pub cx: &'s GenContext<'a>,
    pub adapter: &'s dyn Adapter,
}

fn arg_error(message: impl Into<String>) -> CgError {
    CgError::macro_error(message).with_code(codes::E0302)
}

fn unknown_name(message: impl Into<String>) -> CgError {
    CgError::new(ErrorKind::Model, message).with_code(codes::E0401)
}

/// A named thing a macro argument can refer to.
enum Named {
    Port(PortId),
    Parameter(Value),
}

impl AdapterScope<'_, '_> {
    fn model(&self) -> &Model {
        self.cx.model
    }

    fn component(&self, macro_name: &str) -> Result<ComponentId> {
        self.adapter.component().ok_or_else(|| {
            arg_error(format!(
                "${} is only available to component adapters",
                macro_name
            ))
        })
    }

    fn lookup(&self, macro_name: &str, name: &str) -> Result<Option<Named>> {
        let component = self.component(macro_name)?;
        if let Some(port) = self.model().find_port(component, name) {
            return Ok(Some(Named::Port(port)));
        }
        Ok(self
            .model()
            .evaluate_parameter(component, name)?
            .map(Named::Parameter))
    }

    fn require(&self, macro_name: &str, name: &str) -> Result<Named> {
        self.lookup(macro_name, name)?.ok_or_else(|| {
            let component = self
                .adapter
                .component()
                .map(|c| self.model().full_name(c))
                .unwrap_or_default();
            unknown_name(format!(
                "${}: '{}' is neither a port nor a parameter of {}",
                macro_name, name, component
            ))
        })
    }

    fn require_port(&self, macro_name: &str, name: &str, form: &str) -> Result<PortId> {
        match self.require(macro_name, name)? {
            Named::Port(p) => Ok(p),
            Named::Parameter(_) => Err(arg_error(format!(
                "${}: '{}' is not a port; expected {}",
                macro_name, name, form
            ))),
        }
    }

    fn director(&self, macro_name: &str) -> Result<Rc<dyn Adapter>> {
        self.cx.director_for(self.component(macro_name)?)
    }

    fn port_adapter(&self, port: PortId) -> Result<Rc<dyn Adapter>> {
        let adapter = self.cx.adapter(ObjectRef::Port(port))?;
        if adapter.as_port().is_none() {
            return Err(CgError::resolution(format!(
                "adapter for {} is not a port adapter",
                self.model().port_full_name(port)
            ))
            .with_code(codes::E0201));
        }
        Ok(adapter)
    }

    fn replace_get(&self, parameter: &str) -> Result<String> {
        const FORM: &str = "$get(port, channel)";
        let args = parse_list(parameter);
        if args.len() != 2 {
            return Err(arg_error(format!("{} takes two arguments, got '{}'", FORM, parameter))
                .with_hint(format!("use {}", FORM)));
        }
        let port = self.require_port("get", &args[0], FORM)?;
        let adapter = self.port_adapter(port)?;
        match adapter.as_port() {
            Some(p) => p.generate_get_code(self.cx, &args[1], None),
            None => Ok(String::new()),
        }
    }

    fn replace_send(&self, parameter: &str) -> Result<String> {
        const FORM: &str = "$send(port, channel[, data])";
        let args = parse_list(parameter);
        if args.len() != 2 && args.len() != 3 {
            return Err(arg_error(format!("{} takes two or three arguments, got '{}'", FORM, parameter))
                .with_hint(format!("use {}", FORM)));
        }
        let port = self.require_port("send", &args[0], FORM)?;
        let data = match args.get(2) {
            Some(d) => d.clone(),
            None => {
                let director = self.director("send")?;
                match director.as_director() {
                    Some(d) => d.port_reference(self.cx, port, &args[1], None, false)?,
                    None => String::new(),
                }
            }
        };
        let adapter = self.port_adapter(port)?;
        match adapter.as_port() {
            Some(p) => p.generate_send_code(self.cx, &args[1], &data),
            None => Ok(String::new()),
        }
    }

    fn replace_ref(&self, parameter: &str) -> Result<String> {
        let args = parse_list(parameter);
        let (target, offset) = match args.as_slice() {
            [t] => (t.as_str(), None),
            [t, o] => (t.as_str(), Some(o.as_str())),
            _ => {
                return Err(arg_error(format!(
                    "$ref(name[#channel][, offset]) got '{}'",
                    parameter
                )))
            }
        };
        let (name, channel) = match target.split_once('#') {
            Some((n, ch)) => (n.trim(), ch.trim()),
            None => (target.trim(), "0"),
        };
        match self.require("ref", name)? {
            Named::Port(port) => {
                let director = self.director("ref")?;
                let write = self.model().port(port).is_output();
                match director.as_director() {
                    Some(d) => d.port_reference(self.cx, port, channel, offset, write),
                    None => Ok(String::new()),
                }
            }
            Named::Parameter(value) => self.parameter_value(name, value, offset, None),
        }
    }

    fn replace_val(&self, parameter: &str) -> Result<String> {
        let args = parse_list(parameter);
        let (mut name, offset) = match args.as_slice() {
            [n] => (n.as_str(), None),
            [n, o] => (n.as_str(), Some(o.as_str())),
            _ => {
                return Err(arg_error(format!(
                    "$val([(Type)]name[, offset]) got '{}'",
                    parameter
                )))
            }
        };
        let mut cast = None;
        if let Some(rest) = name.strip_prefix('(') {
            if let Some((ty, n)) = rest.split_once(')') {
                cast = Some(ty.trim());
                name = n.trim();
            }
        }
        let base = name.split_once('#').map(|(n, _)| n.trim()).unwrap_or(name);
        match self.require("val", base)? {
            Named::Port(_) if cast.is_none() => self.replace_ref(parameter),
            Named::Port(port) => {
                let reference = match offset {
                    Some(o) => self.replace_ref(&format!("{}, {}", name, o))?,
                    None => self.replace_ref(name)?,
                };
                let ty = self.model().port(port).ty.cg_type();
                self.type_convert_method(&reference, cast, ty)
            }
            Named::Parameter(value) => self.parameter_value(base, value, offset, cast),
        }
    }

    fn parameter_value(
        &self,
        name: &str,
        value: Value,
        offset: Option<&str>,
        cast: Option<&str>,
    ) -> Result<String> {
        let element = match offset {
            None => value,
            Some(o) => {
                let index: usize = o.trim().parse().map_err(|_| {
                    arg_error(format!("offset '{}' of parameter '{}' is not an index", o, name))
                })?;
                match value {
                    Value::Array(mut items) if index < items.len() => items.swap_remove(index),
                    Value::Array(items) => {
                        return Err(arg_error(format!(
                            "offset {} is out of range for '{}' ({} elements)",
                            index,
                            name,
                            items.len()
                        )))
                    }
                    _ => {
                        return Err(arg_error(format!("'{}' does not contain an array", name)))
                    }
                }
            }
        };
        let literal = self.cx.target.literal(&element);
        let ty = element.pt_type();
        self.type_convert_method(&literal, cast, ty.cg_type())
    }

    /// Wrap `reference` of type `ref_type` to read as `cast`.
    fn type_convert_method(&self, reference: &str, cast: Option<&str>, ref_type: &str) -> Result<String> {
        let Some(cast) = cast else {
            return Ok(reference.to_string());
        };
        if cast == ref_type {
            return Ok(reference.to_string());
        }
        let primitive = |name: &str| {
            PtType::from_cg_type(name)
                .map(|t| self.cx.target.is_primitive(&t))
                .unwrap_or(false)
        };
        let code = if primitive(cast) {
            if let (Some(from), Some(to)) = (PtType::from_cg_type(ref_type), PtType::from_cg_type(cast)) {
                self.cx.state.record_conversion(&from, &to);
            }
            format!("{}to{}({})", ref_type, cast, reference)
        } else if primitive(ref_type) {
            format!("$new({}({}))", ref_type, reference)
        } else {
            format!("$typeFunc(TYPE_{}::convert({}))", cast, reference)
        };
        self.cx.process_code(self.adapter, &code)
    }

    fn named_type(&self, macro_name: &str, name: &str) -> Result<PtType> {
        Ok(match self.require(macro_name, name)? {
            Named::Port(p) => self.model().port(p).ty.clone(),
            Named::Parameter(v) => v.pt_type(),
        })
    }

    fn replace_size(&self, parameter: &str) -> Result<String> {
        let name = parameter.trim();
        Ok(match self.require("size", name)? {
            Named::Port(p) => {
                let port = self.model().port(p);
                if port.multiport {
                    port.width.to_string()
                } else {
                    "1".to_string()
                }
            }
            Named::Parameter(Value::Array(items)) => items.len().to_string(),
            Named::Parameter(_) => "1".to_string(),
        })
    }

    fn replace_new(&self, parameter: &str) -> Result<String> {
        let open = parameter.find('(');
        let close = parameter.rfind(')');
        match (open, close) {
            (Some(o), Some(c)) if c == parameter.len() - 1 && o < c => {
                let type_name = parameter[..o].trim();
                self.cx.state.record_type(type_name);
                Ok(format!("{}_new{}", type_name, &parameter[o..]))
            }
            _ => Err(arg_error(format!(
                "Bad Syntax with the $new() macro: '{}'",
                parameter
            ))
            .with_hint("use $new(Type(arg1, ...))")),
        }
    }

    fn replace_function(&self, parameter: &str, is_static: bool) -> Result<String> {
        let form = if is_static {
            "$typeFunc(type::func(arg1, ...))"
        } else {
            "$tokenFunc(token::func(arg1, ...))"
        };
        let bad = |what: &str| {
            arg_error(format!(
                "Bad Syntax with the {} macro: {} in '{}'",
                if is_static { "$typeFunc" } else { "$tokenFunc" },
                what,
                parameter
            ))
            .with_hint(format!("use {}", form))
        };

        let sep = parameter.find("::").ok_or_else(|| bad("\"::\" was not found"))?;
        let open = parameter[sep..]
            .find('(')
            .map(|i| i + sep)
            .ok_or_else(|| bad("no \"(\" after \"::\""))?;
        if parameter.rfind(')') != Some(parameter.len() - 1) {
            return Err(bad("the last \")\" is not the last character"));
        }

        let subject = parameter[..sep].trim();
        let function = parameter[sep + 2..open].trim();
        self.cx.state.record_function(function);
        if let Some((_, ty)) = subject.split_once('_') {
            if PtType::from_cg_type(ty).is_some_and(|t| self.cx.target.is_primitive(&t))
                || ty == "Complex"
            {
                self.cx.state.record_type(ty);
            }
        }

        // Everything after the open paren, closing paren included.
        let arguments = parameter[open + 1..].trim();
        if is_static {
            if arguments.len() <= 1 {
                return Err(bad("a static type function requires at least one argument"));
            }
            Ok(format!("functionTable[(int){}][FUNC_{}]({}", subject, function, arguments))
        } else {
            let arguments = if arguments.len() > 1 {
                format!(", {}", arguments)
            } else {
                arguments.to_string()
            };
            Ok(format!(
                "functionTable[(int){}.type][FUNC_{}]({}{}",
                subject, function, subject, arguments
            ))
        }
    }

    fn builtin(&self, name: &str, parameter: &str) -> Result<Option<String>> {
        let text = match name {
            "get" => self.replace_get(parameter)?,
            "send" => self.replace_send(parameter)?,
            "ref" => self.replace_ref(parameter)?,
            "val" => self.replace_val(parameter)?,
            "size" => self.replace_size(parameter)?,
            "targetType" => {
                let ty = self.named_type(name, parameter.trim())?;
                self.cx.target.target_type(&ty)
            }
            "type" => format!("TYPE_{}", self.named_type(name, parameter.trim())?.cg_type()),
            "cgType" => self.named_type(name, parameter.trim())?.cg_type().to_string(),
            "actorSymbol" => {
                let component = self.component(name)?;
                let base = self.model().generate_name(ObjectRef::Component(component));
                if parameter.trim().is_empty() {
                    base
                } else {
                    format!("{}_{}", base, parameter.trim())
                }
            }
            "actorClass" => {
                let component = self.component(name)?;
                format!(
                    "{}_{}",
                    self.model().component(component).class.replace('.', "_"),
                    parameter.trim()
                )
            }
            "new" => self.replace_new(parameter)?,
            "tokenFunc" => self.replace_function(parameter, false)?,
            "typeFunc" => self.replace_function(parameter, true)?,
            _ => return Ok(None),
        };
        Ok(Some(text))
    }
}

impl MacroHandler for AdapterScope<'_, '_> {
    fn replace_macro(&self, name: &str, parameter: &str) -> Result<Option<String>> {
        if let Some(text) = self.builtin(name, parameter)? {
            return Ok(Some(text));
        }
        if let Some(result) = self.adapter.method_macro(name, self.cx) {
            return result.map(Some);
        }
        if let Some(result) = self.cx.user_macros.invoke(name, parameter) {
            return result.map(Some);
        }
        Ok(None)
    }

    /// `${name}` is the raw expression of the nearest visible parameter,
    /// with string quotes dropped.
    fn replace_variable(&self, name: &str) -> Result<Option<String>> {
        let start = match self.adapter.object() {
            ObjectRef::Component(c) => c,
            ObjectRef::Port(p) => self.model().port(p).owner,
        };
        Ok(self.model().find_parameter(start, name).map(|(_, p)| {
            let expr = p.expression.trim();
            match expr.strip_prefix('"').and_then(|e| e.strip_suffix('"')) {
                Some(text) => text.to_string(),
                None => expr.to_string(),
            }
        }))
    }
}

/// True for components whose ports are addressed by generated name alone.
pub fn is_modal_controller(model: &Model, component: ComponentId) -> bool {
    model.component(component).kind == ComponentKind::ModalController
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::test_support::Fixture;
    use crate::macros::UserMacro;

    const MODEL: &str = r#"{"name": "M", "director": {}, "components": [
        {"name": "C", "class": "ptolemy.actor.lib.Const",
         "parameters": {"value": 3, "arr": [1, 2, 3], "label": "\"hi\""},
         "ports": [{"name": "output", "direction": "output", "type": "int"}]},
        {"name": "D", "class": "ptolemy.actor.lib.Discard",
         "ports": [{"name": "input", "direction": "input", "type": "int"}]}],
        "links": [{"from": "C.output", "to": "D.input"}]}"#;

    fn expand(f: &Fixture, actor: &str, code: &str) -> Result<String> {
        let cx = f.cx(true);
        let id = f.model.find_component(&format!(".M.{}", actor)).unwrap();
        let adapter = cx.component_adapter(id)?;
        cx.process_code(adapter.as_ref(), code)
    }

    #[test]
    fn symbols_and_names() {
        let f = Fixture::new(MODEL);
        assert_eq!(expand(&f, "C", "$actorSymbol()").unwrap(), "M_C");
        assert_eq!(expand(&f, "C", "$actorSymbol(state)").unwrap(), "M_C_state");
        assert_eq!(
            expand(&f, "C", "$actorClass(x)").unwrap(),
            "ptolemy_actor_lib_Const_x"
        );
        assert_eq!(expand(&f, "C", "$actorName() in $fullName()").unwrap(), "C in .M.C");
    }

    #[test]
    fn parameter_values() {
        let f = Fixture::new(MODEL);
        assert_eq!(expand(&f, "C", "$val(value)").unwrap(), "3");
        assert_eq!(expand(&f, "C", "$val(arr, 1)").unwrap(), "2");
        assert_eq!(expand(&f, "C", "$size(arr)").unwrap(), "3");
        assert_eq!(expand(&f, "C", "$ref(label)").unwrap(), "\"hi\"");
        assert_eq!(expand(&f, "C", "$val((Double)value)").unwrap(), "InttoDouble(3)");
        assert_eq!(f.state.used_conversions(), vec![(PtType::Int, PtType::Double)]);

        let err = expand(&f, "C", "$val(arr, 5)").unwrap_err();
        assert_eq!(err.code, Some(codes::E0301));
        assert!(err.cause_chain[0].message.contains("out of range"));
    }

    #[test]
    fn curly_variables_read_parameter_expressions() {
        let f = Fixture::new(MODEL);
        assert_eq!(expand(&f, "C", "int v = ${value};").unwrap(), "int v = 3;");
        assert_eq!(expand(&f, "C", "puts(\"${label}\");").unwrap(), "puts(\"hi\");");
        let err = expand(&f, "D", "${value}").unwrap_err();
        assert_eq!(err.code, Some(codes::E0308));
    }

    #[test]
    fn port_types() {
        let f = Fixture::new(MODEL);
        assert_eq!(expand(&f, "C", "$type(output)").unwrap(), "TYPE_Int");
        assert_eq!(expand(&f, "C", "$cgType(output)").unwrap(), "Int");
        assert_eq!(expand(&f, "C", "$targetType(output)").unwrap(), "int");
        assert_eq!(expand(&f, "C", "$size(output)").unwrap(), "1");
    }

    #[test]
    fn port_reads_and_writes() {
        let f = Fixture::new(MODEL);
        assert_eq!(expand(&f, "D", "$get(input, 0)").unwrap(), "M_D_input");
        assert_eq!(expand(&f, "C", "$send(output, 0, 5)").unwrap(), "M_D_input = 5;");
        assert_eq!(expand(&f, "C", "$ref(output)").unwrap(), "M_D_input");
        assert_eq!(expand(&f, "D", "$val((String)input#0)").unwrap(), "InttoString(M_D_input)");
    }

    #[test]
    fn malformed_port_macros_name_the_form() {
        let f = Fixture::new(MODEL);
        let err = expand(&f, "D", "$get(input)").unwrap_err();
        assert_eq!(err.code, Some(codes::E0301));
        assert!(err.hint.unwrap().contains("$get(port, channel)"));

        let err = expand(&f, "C", "$send(value, 0, 1)").unwrap_err();
        assert!(err.cause_chain[0].message.contains("is not a port"));

        let err = expand(&f, "C", "$val(nope)").unwrap_err();
        assert!(err.cause_chain[0]
            .message
            .contains("'nope' is neither a port nor a parameter of .M.C"));
    }

    #[test]
    fn constructors_and_function_tables() {
        let f = Fixture::new(MODEL);
        assert_eq!(expand(&f, "C", "$new(Array(3, 4))").unwrap(), "Array_new(3, 4)");
        assert!(f.state.used_types().contains(&"Array".to_string()));
        assert_eq!(
            expand(&f, "C", "$typeFunc(TYPE_Int::add(a, b))").unwrap(),
            "functionTable[(int)TYPE_Int][FUNC_add](a, b)"
        );
        assert!(f.state.used_types().contains(&"Int".to_string()));
        assert!(f.state.used_functions().contains(&"add".to_string()));
        assert_eq!(
            expand(&f, "C", "$tokenFunc(tok::print())").unwrap(),
            "functionTable[(int)tok.type][FUNC_print](tok)"
        );
        assert_eq!(
            expand(&f, "C", "$tokenFunc(tok::equals(other))").unwrap(),
            "functionTable[(int)tok.type][FUNC_equals](tok, other)"
        );

        assert!(expand(&f, "C", "$new(Array)").is_err());
        assert!(expand(&f, "C", "$typeFunc(TYPE_Int::zero())").is_err());
        assert!(expand(&f, "C", "$tokenFunc(tok.print())").is_err());
    }

    struct Twice;

    impl UserMacro for Twice {
        fn check_arguments(&self, arguments: &[String]) -> std::result::Result<(), String> {
            if arguments.len() == 1 {
                Ok(())
            } else {
                Err(format!("expected one argument, got {}", arguments.len()))
            }
        }

        fn handle_macro(&self, arguments: &[String]) -> std::result::Result<String, String> {
            Ok(format!("{0} {0}", arguments[0]))
        }
    }

    #[test]
    fn user_and_unknown_macros() {
        let mut f = Fixture::new(MODEL);
        f.macros.register("twice", Box::new(Twice));
        assert_eq!(expand(&f, "C", "$twice($val(value))").unwrap(), "3 3");
        let err = expand(&f, "C", "$twice(a, b)").unwrap_err();
        assert_eq!(err.cause_chain[0].message, "Failed to invoke user macro ($twice)");
        assert_eq!(expand(&f, "C", "$mystery(1)").unwrap(), "$mystery(1)");
    }

    #[test]
    fn component_macros_reject_port_adapters() {
        let f = Fixture::new(MODEL);
        let cx = f.cx(true);
        let c = f.model.find_component(".M.C").unwrap();
        let port = f.model.find_port(c, "output").unwrap();
        let adapter = cx.adapter(ObjectRef::Port(port)).unwrap();
        assert!(adapter.as_port().is_some());
        let err = cx.process_code(adapter.as_ref(), "$actorSymbol()").unwrap_err();
        assert!(err.cause_chain[0].message.contains("only available to component adapters"));
    }
}
