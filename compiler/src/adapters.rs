// adapters.rs — Shipped adapters
//
// Template-driven actor adapters, the composite actor adapter (transfers
// across its boundary plus its director's code), the I/O port adapter
// behind `$get`/`$send`, the embedded-code auto-adapter, and the default
// registry wiring them to framework classes.

use std::rc::Rc;

use crate::adapter::{Adapter, ComponentCore, DirectorAdapter, GenContext, PortAdapter, EMBEDDED_CODE};
use crate::convert::{self, TypeConversionRecord};
use crate::diag::{codes, CgError, Result};
use crate::director::StaticDirectorAdapter;
use crate::model::{ComponentId, Model, ObjectRef, PortId, MODAL_CONTROLLER, SDF_DIRECTOR, TYPED_COMPOSITE_ACTOR, TYPED_IO_PORT};
use crate::resolver::{AdapterRegistry, AutoAdapter};

/// Package the shipped adapters are registered under.
pub const PROCEDURAL_PACKAGE: &str = "generic.program.procedural";

/// Actor classes whose code comes entirely from templates.
const TEMPLATE_ACTORS: &[&str] = &[
    "ptolemy.actor.lib.Source",
    "ptolemy.actor.lib.Sink",
    "ptolemy.actor.lib.Transformer",
    "ptolemy.actor.lib.Const",
    "ptolemy.actor.lib.Ramp",
    "ptolemy.actor.lib.Scale",
    "ptolemy.actor.lib.AddSubtract",
    "ptolemy.actor.lib.Discard",
    "ptolemy.actor.lib.gui.Display",
    MODAL_CONTROLLER,
];

/// Registry with every shipped adapter.
pub fn default_registry() -> AdapterRegistry {
    let mut registry = AdapterRegistry::new();
    for class in TEMPLATE_ACTORS {
        registry.register(PROCEDURAL_PACKAGE, class, TemplateActorAdapter::create);
    }
    registry.register(PROCEDURAL_PACKAGE, TYPED_COMPOSITE_ACTOR, CompositeAdapter::create);
    registry.register(PROCEDURAL_PACKAGE, TYPED_IO_PORT, IoPortAdapter::create);
    registry.register(PROCEDURAL_PACKAGE, SDF_DIRECTOR, StaticDirectorAdapter::create);
    registry.register(
        PROCEDURAL_PACKAGE,
        "ptolemy.actor.sched.StaticSchedulingDirector",
        StaticDirectorAdapter::create,
    );
    registry
}

fn expect_component(model: &Model, obj: ObjectRef, role: &str) -> Result<ComponentId> {
    match obj {
        ObjectRef::Component(c) => Ok(c),
        ObjectRef::Port(p) => Err(CgError::resolution(format!(
            "{} cannot adapt port {}",
            role,
            model.port_full_name(p)
        ))
        .with_code(codes::E0201)),
    }
}

// ── Template actor ──────────────────────────────────────────────────────────

/// Atomic actor whose phases are the `preinitBlock` ... `wrapupBlock`
/// blocks of its templates.
pub struct TemplateActorAdapter {
    core: ComponentCore,
}

impl TemplateActorAdapter {
    pub fn new(core: ComponentCore) -> Self {
        TemplateActorAdapter { core }
    }

    pub fn create(model: &Model, obj: ObjectRef) -> Result<Rc<dyn Adapter>> {
        let component = expect_component(model, obj, "template actor adapter")?;
        Ok(Rc::new(TemplateActorAdapter::new(ComponentCore::for_component(
            model, component,
        )?)))
    }
}

impl Adapter for TemplateActorAdapter {
    fn object(&self) -> ObjectRef {
        ObjectRef::Component(self.core.id())
    }

    fn kind(&self) -> &'static str {
        "template-actor"
    }

    fn generate_preinitialize_code(&self, cx: &GenContext) -> Result<String> {
        self.core.generate_block_by_name(self, cx, "preinitBlock")
    }

    fn generate_initialize_code(&self, cx: &GenContext) -> Result<String> {
        self.core.generate_block_by_name(self, cx, "initBlock")
    }

    fn generate_fire_code(&self, cx: &GenContext) -> Result<String> {
        self.core
            .generate_fire_code(self, cx, || self.core.generate_fire_block(self, cx))
    }

    fn generate_fire_function_code(&self, cx: &GenContext) -> Result<String> {
        self.core
            .generate_fire_function_code(self, cx, || self.core.generate_fire_block(self, cx))
    }

    fn generate_postfire_code(&self, cx: &GenContext) -> Result<String> {
        self.core.generate_block_by_name(self, cx, "postfireBlock")
    }

    fn generate_wrapup_code(&self, cx: &GenContext) -> Result<String> {
        self.core.generate_block_by_name(self, cx, "wrapupBlock")
    }

    fn generate_include_code(&self, cx: &GenContext) -> Result<Vec<String>> {
        self.core.generate_include_code(self, cx)
    }

    fn generate_shared_code(&self, cx: &GenContext) -> Result<Vec<String>> {
        self.core.generate_shared_code(self, cx)
    }

    fn analyze_type_convert(&self, cx: &GenContext) -> Result<()> {
        self.core.analyze_type_convert(cx);
        Ok(())
    }

    fn type_conversions(&self) -> TypeConversionRecord {
        self.core.type_conversions()
    }

    fn method_macro(&self, name: &str, cx: &GenContext) -> Option<Result<String>> {
        let component = cx.model.component(self.core.id());
        match name {
            "actorName" => Some(Ok(component.name.clone())),
            "fullName" => Some(Ok(cx.model.full_name(component.id))),
            _ => None,
        }
    }
}

// ── Composite actor ─────────────────────────────────────────────────────────

/// Composite actor: transfers data across its boundary and delegates the
/// inside to its director.
pub struct CompositeAdapter {
    core: ComponentCore,
}

impl CompositeAdapter {
    pub fn create(model: &Model, obj: ObjectRef) -> Result<Rc<dyn Adapter>> {
        let component = expect_component(model, obj, "composite adapter")?;
        Ok(Rc::new(CompositeAdapter {
            core: ComponentCore::for_component(model, component)?,
        }))
    }

    /// Adapter of the director scheduling the inside: the composite's own,
    /// or the enclosing one for a transparent composite.
    fn inner_director(&self, cx: &GenContext) -> Result<Rc<dyn Adapter>> {
        let id = self.core.id();
        let director = cx.model.executive_director(id).ok_or_else(|| {
            CgError::model(format!("{} has no director", cx.model.full_name(id)))
                .with_code(codes::E0400)
                .with_hint("add a \"director\" entry to the model")
        })?;
        let adapter = cx.component_adapter(director)?;
        if adapter.as_director().is_none() {
            return Err(CgError::resolution(format!(
                "adapter for {} is not a director adapter",
                cx.model.full_name(director)
            ))
            .with_code(codes::E0201));
        }
        Ok(adapter)
    }

    fn with_director<F>(&self, cx: &GenContext, f: F) -> Result<String>
    where
        F: FnOnce(&dyn DirectorAdapter, ComponentId) -> Result<String>,
    {
        let adapter = self.inner_director(cx)?;
        match adapter.as_director() {
            Some(d) => f(d, self.core.id()),
            None => Ok(String::new()),
        }
    }

    /// Plain copies from `port`'s buffer to every sink not needing a
    /// conversion.
    fn copy_to_sinks(&self, cx: &GenContext, port: PortId) -> Result<String> {
        let record = self.core.type_conversions();
        let director = cx.director_for(self.core.id())?;
        let Some(director) = director.as_director() else {
            return Ok(String::new());
        };
        let mut code = String::new();
        for source in convert::channels(cx.model, port) {
            for sink in cx.model.sink_channels(source) {
                if record.is_converted(source, sink) {
                    continue;
                }
                for offset in 0..convert::conversion_offsets(cx.model, port) {
                    let offset = offset.to_string();
                    let own = director.port_reference(
                        cx,
                        port,
                        &source.index.to_string(),
                        Some(&offset),
                        false,
                    )?;
                    let target = director.sink_reference(cx, sink, Some(&offset));
                    code.push_str(&format!("{} = {};\n", target, own));
                }
            }
        }
        Ok(code)
    }

    fn generate_transfer_inputs_code(&self, cx: &GenContext) -> Result<String> {
        let mut code = String::new();
        for port in cx.model.input_ports(self.core.id()) {
            code.push_str(&self.copy_to_sinks(cx, port)?);
        }
        code.push_str(&self.core.generate_type_convert_fire_code(self, cx, true)?);
        Ok(code)
    }

    fn generate_transfer_outputs_code(&self, cx: &GenContext) -> Result<String> {
        let mut code = String::new();
        for port in cx.model.output_ports(self.core.id()) {
            code.push_str(&self.copy_to_sinks(cx, port)?);
        }
        Ok(code)
    }

    fn fire_body(&self, cx: &GenContext) -> Result<String> {
        let mut code = self.generate_transfer_inputs_code(cx)?;
        code.push_str(&self.core.generate_fire_block(self, cx)?);
        code.push_str(&self.with_director(cx, |d, c| d.generate_fire_code(cx, c))?);
        code.push_str(&self.generate_transfer_outputs_code(cx)?);
        Ok(code)
    }
}

impl Adapter for CompositeAdapter {
    fn object(&self) -> ObjectRef {
        ObjectRef::Component(self.core.id())
    }

    fn kind(&self) -> &'static str {
        "composite"
    }

    fn generate_preinitialize_code(&self, cx: &GenContext) -> Result<String> {
        let mut code = self.core.generate_block_by_name(self, cx, "preinitBlock")?;
        code.push_str(&self.with_director(cx, |d, c| d.generate_preinitialize_code(cx, c))?);
        Ok(code)
    }

    fn generate_initialize_code(&self, cx: &GenContext) -> Result<String> {
        let mut code = self.core.generate_block_by_name(self, cx, "initBlock")?;
        code.push_str(&self.with_director(cx, |d, c| d.generate_initialize_code(cx, c))?);
        Ok(code)
    }

    fn generate_fire_code(&self, cx: &GenContext) -> Result<String> {
        self.core.generate_fire_code(self, cx, || self.fire_body(cx))
    }

    fn generate_fire_function_code(&self, cx: &GenContext) -> Result<String> {
        self.core
            .generate_fire_function_code(self, cx, || self.fire_body(cx))
    }

    fn generate_postfire_code(&self, cx: &GenContext) -> Result<String> {
        let mut code = self.core.generate_block_by_name(self, cx, "postfireBlock")?;
        code.push_str(&self.with_director(cx, |d, c| d.generate_postfire_code(cx, c))?);
        Ok(code)
    }

    fn generate_wrapup_code(&self, cx: &GenContext) -> Result<String> {
        let mut code = self.core.generate_block_by_name(self, cx, "wrapupBlock")?;
        code.push_str(&self.with_director(cx, |d, c| d.generate_wrapup_code(cx, c))?);
        Ok(code)
    }

    fn generate_variable_declaration(&self, cx: &GenContext) -> Result<String> {
        self.with_director(cx, |d, c| d.generate_variable_declarations(cx, c))
    }

    fn generate_include_code(&self, cx: &GenContext) -> Result<Vec<String>> {
        self.core.generate_include_code(self, cx)
    }

    fn generate_shared_code(&self, cx: &GenContext) -> Result<Vec<String>> {
        self.core.generate_shared_code(self, cx)
    }

    fn analyze_type_convert(&self, cx: &GenContext) -> Result<()> {
        self.core.analyze_type_convert(cx);
        Ok(())
    }

    fn type_conversions(&self) -> TypeConversionRecord {
        self.core.type_conversions()
    }
}

// ── Ports ───────────────────────────────────────────────────────────────────

pub struct IoPortAdapter {
    port: PortId,
}

impl IoPortAdapter {
    pub fn create(model: &Model, obj: ObjectRef) -> Result<Rc<dyn Adapter>> {
        match obj {
            ObjectRef::Port(port) => Ok(Rc::new(IoPortAdapter { port })),
            ObjectRef::Component(c) => Err(CgError::resolution(format!(
                "port adapter cannot adapt component {}",
                model.full_name(c)
            ))
            .with_code(codes::E0201)),
        }
    }

    fn director(&self, cx: &GenContext) -> Result<Rc<dyn Adapter>> {
        cx.director_for(cx.model.port(self.port).owner)
    }
}

impl Adapter for IoPortAdapter {
    fn object(&self) -> ObjectRef {
        ObjectRef::Port(self.port)
    }

    fn kind(&self) -> &'static str {
        "io-port"
    }

    fn as_port(&self) -> Option<&dyn PortAdapter> {
        Some(self)
    }
}

impl PortAdapter for IoPortAdapter {
    fn port(&self) -> PortId {
        self.port
    }

    fn generate_get_code(&self, cx: &GenContext, channel: &str, offset: Option<&str>) -> Result<String> {
        let director = self.director(cx)?;
        match director.as_director() {
            Some(d) => d.port_reference(cx, self.port, channel, offset, false),
            None => Ok(String::new()),
        }
    }

    fn generate_send_code(&self, cx: &GenContext, channel: &str, data: &str) -> Result<String> {
        let director = self.director(cx)?;
        match director.as_director() {
            Some(d) => {
                let target = d.port_reference(cx, self.port, channel, None, true)?;
                Ok(format!("{} = {};", target, data))
            }
            None => Ok(String::new()),
        }
    }
}

// ── Auto adapter ────────────────────────────────────────────────────────────

/// Builds a template actor adapter for any component carrying an
/// `embeddedCode` parameter.
pub struct EmbeddedCodeAutoAdapter;

impl AutoAdapter for EmbeddedCodeAutoAdapter {
    fn create(&self, model: &Model, obj: ObjectRef) -> Result<Option<Rc<dyn Adapter>>> {
        let ObjectRef::Component(component) = obj else {
            return Ok(None);
        };
        let Some(param) = model
            .component(component)
            .parameters
            .iter()
            .find(|p| p.name == EMBEDDED_CODE)
        else {
            return Ok(None);
        };
        log::debug!(
            "using embedded code for {}",
            model.full_name(component)
        );
        let core = ComponentCore::with_embedded(component, &param.expression)?;
        Ok(Some(Rc::new(TemplateActorAdapter::new(core))))
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::Fixture;
    use super::*;
    use crate::types::PtType;

    const CONST_C: &str = "/*** fireBlock ***/\n$send(output, 0, $val(value))\n/**/\n";

    const FANOUT: &str = r#"{"name": "M", "director": {}, "components": [
        {"name": "C", "class": "ptolemy.actor.lib.Const", "parameters": {"value": 3},
         "ports": [{"name": "output", "direction": "output", "type": "int"}]},
        {"name": "D", "class": "ptolemy.actor.lib.Discard",
         "ports": [{"name": "input", "direction": "input", "type": "int"}]},
        {"name": "E", "class": "ptolemy.actor.lib.Discard",
         "ports": [{"name": "input", "direction": "input", "type": "double"}]}],
        "links": [{"from": "C.output", "to": "D.input"},
                  {"from": "C.output", "to": "E.input"}]}"#;

    #[test]
    fn default_registry_covers_shipped_classes() {
        let reg = default_registry();
        assert!(reg.get(PROCEDURAL_PACKAGE, "ptolemy.actor.lib.Ramp").is_some());
        assert!(reg.get(PROCEDURAL_PACKAGE, TYPED_IO_PORT).is_some());
        assert!(reg.get(PROCEDURAL_PACKAGE, SDF_DIRECTOR).is_some());
        assert!(reg.get(PROCEDURAL_PACKAGE, "ptolemy.actor.TypedAtomicActor").is_none());
    }

    #[test]
    fn fire_writes_sinks_then_converts() {
        let f = Fixture::new(FANOUT).with_template("ptolemy.actor.lib.Const", CONST_C);
        f.analyze();
        let cx = f.cx(true);
        let c = cx.component_adapter(f.model.find_component(".M.C").unwrap()).unwrap();
        assert_eq!(c.kind(), "template-actor");
        let code = c.generate_fire_code(&cx).unwrap();
        assert_eq!(
            code,
            "\n/* Fire M_C */\nM_D_input = M_C_output = 3;\nM_E_input = InttoDouble(M_C_output);\n"
        );
        assert_eq!(f.state.used_conversions(), vec![(PtType::Int, PtType::Double)]);
    }

    #[test]
    fn matching_types_need_no_conversion() {
        let json = FANOUT.replace("\"double\"", "\"int\"");
        let f = Fixture::new(&json).with_template("ptolemy.actor.lib.Const", CONST_C);
        f.analyze();
        let cx = f.cx(true);
        let c = cx.component_adapter(f.model.find_component(".M.C").unwrap()).unwrap();
        assert_eq!(
            c.generate_fire_code(&cx).unwrap(),
            "\n/* Fire M_C */\nM_D_input = M_E_input = 3;\n"
        );
        assert!(f.state.used_conversions().is_empty());
    }

    #[test]
    fn phase_blocks_carry_a_comment() {
        let f = Fixture::new(FANOUT).with_template(
            "ptolemy.actor.lib.Const",
            "/*** initBlock ***/\n$actorSymbol(count) = 0;\n/**/\n/*** wrapupBlock ***/\n/**/\n",
        );
        let cx = f.cx(true);
        let c = cx.component_adapter(f.model.find_component(".M.C").unwrap()).unwrap();
        assert_eq!(
            c.generate_initialize_code(&cx).unwrap(),
            "\n/* init C */\nM_C_count = 0;\n"
        );
        assert_eq!(c.generate_wrapup_code(&cx).unwrap(), "");
        assert_eq!(c.generate_preinitialize_code(&cx).unwrap(), "");
    }

    #[test]
    fn embedded_code_adapts_unknown_classes() {
        let json = r#"{"name": "M", "director": {}, "components": [
            {"name": "X", "class": "my.Custom",
             "parameters": {"embeddedCode": "/*** fireBlock ***/\n$send(output, 0, 7)\n/**/"},
             "ports": [{"name": "output", "direction": "output", "type": "int"}]}]}"#;
        let f = Fixture::new(json);
        f.analyze();
        let cx = f.cx(true);
        let x = cx.component_adapter(f.model.find_component(".M.X").unwrap()).unwrap();
        assert_eq!(x.generate_fire_code(&cx).unwrap(), "\n/* Fire M_X */\nM_X_output = 7;\n");
        let report = f.resolver.report(&f.model);
        let found = report.iter().find(|r| r.object == ".M.X").unwrap();
        assert_eq!(found.found_as, "auto");
    }

    #[test]
    fn composite_converts_on_transfer_in() {
        let json = r#"{"name": "M", "director": {}, "components": [
            {"name": "S", "class": "ptolemy.actor.lib.Const", "parameters": {"value": 1},
             "ports": [{"name": "output", "direction": "output", "type": "int"}]},
            {"name": "Sub", "class": "ptolemy.actor.TypedCompositeActor",
             "ports": [{"name": "in", "direction": "input", "type": "int"}],
             "components": [
                {"name": "D", "class": "ptolemy.actor.lib.Discard",
                 "ports": [{"name": "input", "direction": "input", "type": "double"}]}],
             "links": [{"from": "in", "to": "D.input"}]}],
            "links": [{"from": "S.output", "to": "Sub.in"}]}"#;
        let f = Fixture::new(json);
        f.analyze();
        let cx = f.cx(true);
        let sub = cx.component_adapter(f.model.find_component(".M.Sub").unwrap()).unwrap();
        assert_eq!(sub.kind(), "composite");
        let code = sub.generate_fire_code(&cx).unwrap();
        assert_eq!(
            code,
            "\n/* Fire Composite Actor: M_Sub */\nM_Sub_D_input = InttoDouble(M_Sub_in);\n\n/* Fire M_Sub_D */\n"
        );

        let root = cx.component_adapter(f.model.root()).unwrap();
        let decls = root.generate_variable_declaration(&cx).unwrap();
        assert_eq!(
            decls,
            "static int M_S_output;\nstatic int M_Sub_in;\nstatic double M_Sub_D_input;\n"
        );
    }

    #[test]
    fn top_level_fire_calls_function_when_not_inlined() {
        let f = Fixture::new(FANOUT).with_template("ptolemy.actor.lib.Const", CONST_C);
        f.analyze();
        let cx = f.cx(false);
        let root = cx.component_adapter(f.model.root()).unwrap();
        assert_eq!(
            root.generate_fire_code(&cx).unwrap(),
            "\n/* Fire Composite Actor: M */\nM_fire();\n"
        );
        let function = root.generate_fire_function_code(&cx).unwrap();
        assert!(function.starts_with("void M_fire(void) {\n"));
        assert!(function.contains("M_D_input = M_C_output = 3;"));
        assert!(function.ends_with("}\n"));
    }

    #[test]
    fn port_adapter_rejects_components() {
        let f = Fixture::new(FANOUT);
        let c = f.model.find_component(".M.C").unwrap();
        let err = match IoPortAdapter::create(&f.model, ObjectRef::Component(c)) {
            Err(e) => e,
            Ok(_) => panic!("expected failure"),
        };
        assert_eq!(err.code, Some(codes::E0201));
    }
}
