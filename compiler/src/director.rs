// director.rs — Static scheduling director adapter
//
// Orders the actors of a composite, names their port buffers and drives
// each lifecycle phase over the schedule. Every port owns one buffer,
// named after the port; outputs write straight into the buffers of the
// sinks they feed, so a fire step needs no copies except across composite
// boundaries and for type conversions.
//
// Preconditions: type conversion analysis has run for every actor whose
//   outputs are written through `port_reference(.., write = true)`.
// Postconditions: the schedule lists every contained actor exactly once;
//   producers precede consumers outside of feedback loops.
// Failure modes: adapter resolution failures of contained actors.
// Side effects: none.

use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use crate::adapter::{is_modal_controller, Adapter, DirectorAdapter, GenContext};
use crate::convert;
use crate::diag::{codes, CgError, Result};
use crate::model::{Channel, ComponentId, Model, ObjectRef, PortId};

pub struct StaticDirectorAdapter {
    director: ComponentId,
}

impl StaticDirectorAdapter {
    pub fn create(model: &Model, obj: ObjectRef) -> Result<Rc<dyn Adapter>> {
        match obj {
            ObjectRef::Component(director) => Ok(Rc::new(StaticDirectorAdapter { director })),
            ObjectRef::Port(p) => Err(CgError::resolution(format!(
                "director adapter cannot adapt port {}",
                model.port_full_name(p)
            ))
            .with_code(codes::E0201)),
        }
    }

    /// Tokens a port's buffer holds per iteration.
    pub fn buffer_size(model: &Model, port: PortId) -> usize {
        let p = model.port(port);
        let size = if p.is_input() {
            convert::channels(model, port)
                .flat_map(|ch| model.source_channels(ch))
                .map(|src| model.port(src.port).production_rate)
                .fold(p.consumption_rate, usize::max)
        } else {
            p.production_rate
        };
        size.max(1)
    }

    /// Reference to the buffer owned by `port` itself.
    fn own_reference(model: &Model, port: PortId, channel: &str, offset: Option<&str>) -> String {
        let p = model.port(port);
        let mut result = model.generate_name(ObjectRef::Port(port));
        if p.multiport {
            result.push_str(&format!("[{}]", channel.trim()));
        }
        if Self::buffer_size(model, port) > 1 {
            result.push_str(&format!("[{}]", offset.map(str::trim).unwrap_or("0")));
        }
        result
    }

    fn run_phase<F>(&self, cx: &GenContext, container: ComponentId, phase: F) -> Result<String>
    where
        F: Fn(&dyn Adapter) -> Result<String>,
    {
        let mut code = String::new();
        for actor in self.schedule(cx, container) {
            let adapter = cx.component_adapter(actor)?;
            code.push_str(&phase(adapter.as_ref())?);
        }
        Ok(code)
    }
}

/// Kahn order over `children`, ties broken by declaration order. Actors
/// left on cycles follow in declaration order.
pub fn static_schedule(model: &Model, container: ComponentId) -> Vec<ComponentId> {
    let children = model.contained(container);
    let index: HashMap<ComponentId, usize> =
        children.iter().enumerate().map(|(i, c)| (*c, i)).collect();

    let mut edges: Vec<Vec<usize>> = vec![Vec::new(); children.len()];
    let mut in_degree = vec![0usize; children.len()];
    for (i, child) in children.iter().enumerate() {
        for port in model.output_ports(*child) {
            for source in convert::channels(model, port) {
                for sink in model.sink_channels(source) {
                    let owner = model.port(sink.port).owner;
                    match index.get(&owner) {
                        Some(&j) if j != i => {
                            edges[i].push(j);
                            in_degree[j] += 1;
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    let mut ready: BTreeSet<usize> = (0..children.len()).filter(|i| in_degree[*i] == 0).collect();
    let mut placed = vec![false; children.len()];
    let mut order = Vec::with_capacity(children.len());
    while let Some(i) = ready.pop_first() {
        placed[i] = true;
        order.push(children[i]);
        for &j in &edges[i] {
            in_degree[j] -= 1;
            if in_degree[j] == 0 {
                ready.insert(j);
            }
        }
    }

    if order.len() < children.len() {
        log::warn!(
            "{} contains a feedback loop; firing the remaining actors in declaration order",
            model.full_name(container)
        );
        order.extend(
            children
                .iter()
                .enumerate()
                .filter(|(i, _)| !placed[*i])
                .map(|(_, c)| *c),
        );
    }
    order
}

impl Adapter for StaticDirectorAdapter {
    fn object(&self) -> ObjectRef {
        ObjectRef::Component(self.director)
    }

    fn kind(&self) -> &'static str {
        "static-director"
    }

    fn as_director(&self) -> Option<&dyn DirectorAdapter> {
        Some(self)
    }
}

impl DirectorAdapter for StaticDirectorAdapter {
    fn port_reference(
        &self,
        cx: &GenContext,
        port: PortId,
        channel: &str,
        offset: Option<&str>,
        write: bool,
    ) -> Result<String> {
        let model = cx.model;
        let own = Self::own_reference(model, port, channel, offset);
        let p = model.port(port);
        if !write || !p.is_output() {
            return Ok(own);
        }
        // A computed channel cannot be matched to its sinks here.
        let Ok(index) = channel.trim().parse::<usize>() else {
            return Ok(own);
        };

        let source = Channel::new(port, index);
        let sinks = model.sink_channels(source);
        let record = cx.component_adapter(p.owner)?.type_conversions();
        let mut references: Vec<String> = sinks
            .iter()
            .filter(|sink| !record.is_converted(source, **sink))
            .map(|sink| self.sink_reference(cx, *sink, offset))
            .collect();
        if references.len() < sinks.len() || sinks.is_empty() {
            // Conversions read the value back from the port's own buffer.
            references.push(own);
        }
        Ok(references.join(" = "))
    }

    fn sink_reference(&self, cx: &GenContext, sink: Channel, offset: Option<&str>) -> String {
        let model = cx.model;
        let port = model.port(sink.port);
        if is_modal_controller(model, port.owner) {
            let mut result = model.generate_name(ObjectRef::Port(sink.port));
            if port.multiport {
                result.push_str(&format!("[{}]", sink.index));
            }
            return result;
        }
        Self::own_reference(model, sink.port, &sink.index.to_string(), offset)
    }

    fn schedule(&self, cx: &GenContext, container: ComponentId) -> Vec<ComponentId> {
        static_schedule(cx.model, container)
    }

    fn generate_variable_declarations(&self, cx: &GenContext, container: ComponentId) -> Result<String> {
        let model = cx.model;
        let mut code = String::new();
        for &child in model.contained(container) {
            for &port in &model.component(child).ports {
                let p = model.port(port);
                if p.multiport && p.width == 0 {
                    continue;
                }
                let mut dims = Vec::new();
                if p.multiport {
                    dims.push(p.width);
                }
                let size = Self::buffer_size(model, port);
                if size > 1 {
                    dims.push(size);
                }
                let name = model.generate_name(ObjectRef::Port(port));
                code.push_str(&cx.target.declare_buffer(&p.ty, &name, &dims));
            }
            if model.is_composite(child) {
                code.push_str(&cx.component_adapter(child)?.generate_variable_declaration(cx)?);
            }
        }
        Ok(code)
    }

    fn generate_preinitialize_code(&self, cx: &GenContext, container: ComponentId) -> Result<String> {
        self.run_phase(cx, container, |a| a.generate_preinitialize_code(cx))
    }

    fn generate_initialize_code(&self, cx: &GenContext, container: ComponentId) -> Result<String> {
        self.run_phase(cx, container, |a| a.generate_initialize_code(cx))
    }

    fn generate_fire_code(&self, cx: &GenContext, container: ComponentId) -> Result<String> {
        self.run_phase(cx, container, |a| a.generate_fire_code(cx))
    }

    fn generate_postfire_code(&self, cx: &GenContext, container: ComponentId) -> Result<String> {
        self.run_phase(cx, container, |a| a.generate_postfire_code(cx))
    }

    fn generate_wrapup_code(&self, cx: &GenContext, container: ComponentId) -> Result<String> {
        self.run_phase(cx, container, |a| a.generate_wrapup_code(cx))
    }
}
