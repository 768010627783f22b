// model.rs — Actor model introspection
//
// Arena representation of a hierarchical actor model: components (actors,
// composites, directors), their ports and parameters, and the channel-level
// connection graph. Loaded from a JSON model description; everything the
// generator asks of a model (ports, widths, declared types, sink/source
// channels, parameter expressions, class chains) is answered here.
//
// Preconditions: link endpoints name ports reachable from the containing
//   composite.
// Postconditions: every link is expanded to one (source channel, sink
//   channel) pair; multiport widths cover every assigned channel.
// Failure modes: malformed JSON, unknown endpoints, links against the data
//   direction, unparsable types (all E0400).
// Side effects: none.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::diag::{codes, CgError, ErrorKind, Result};
use crate::expr::{self, Scope, Value};
use crate::types::PtType;

// ── Identifiers ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(pub u32);

/// Anything an adapter can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectRef {
    Component(ComponentId),
    Port(PortId),
}

/// One data lane of a port. Equal iff the port and the index are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Channel {
    pub port: PortId,
    pub index: usize,
}

impl Channel {
    pub fn new(port: PortId, index: usize) -> Self {
        Channel { port, index }
    }
}

// ── Data types ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    Actor,
    Composite,
    ModalController,
    Director,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub expression: String,
}

#[derive(Debug, Clone)]
pub struct Component {
    pub id: ComponentId,
    pub name: String,
    pub class: String,
    pub kind: ComponentKind,
    pub parent: Option<ComponentId>,
    pub children: Vec<ComponentId>,
    pub ports: Vec<PortId>,
    pub parameters: Vec<Parameter>,
    pub director: Option<ComponentId>,
}

#[derive(Debug, Clone)]
pub struct Port {
    pub id: PortId,
    pub name: String,
    pub class: String,
    pub owner: ComponentId,
    pub direction: Direction,
    pub multiport: bool,
    pub width: usize,
    pub ty: PtType,
    pub production_rate: usize,
    pub consumption_rate: usize,
}

impl Port {
    pub fn is_input(&self) -> bool {
        self.direction == Direction::Input
    }

    pub fn is_output(&self) -> bool {
        self.direction == Direction::Output
    }
}

// ── Class hierarchy ─────────────────────────────────────────────────────────

pub const NAMED_OBJ: &str = "ptolemy.kernel.util.NamedObj";
pub const TYPED_ATOMIC_ACTOR: &str = "ptolemy.actor.TypedAtomicActor";
pub const TYPED_COMPOSITE_ACTOR: &str = "ptolemy.actor.TypedCompositeActor";
pub const TYPED_IO_PORT: &str = "ptolemy.actor.TypedIOPort";
pub const DIRECTOR: &str = "ptolemy.actor.Director";
pub const SDF_DIRECTOR: &str = "ptolemy.domains.sdf.kernel.SDFDirector";
pub const MODAL_CONTROLLER: &str = "ptolemy.domains.modal.modal.ModalController";

const BUILTIN_CLASSES: &[(&str, &str)] = &[
    ("ptolemy.kernel.Entity", NAMED_OBJ),
    ("ptolemy.kernel.ComponentEntity", "ptolemy.kernel.Entity"),
    ("ptolemy.kernel.CompositeEntity", "ptolemy.kernel.ComponentEntity"),
    ("ptolemy.actor.AtomicActor", "ptolemy.kernel.ComponentEntity"),
    (TYPED_ATOMIC_ACTOR, "ptolemy.actor.AtomicActor"),
    ("ptolemy.actor.CompositeActor", "ptolemy.kernel.CompositeEntity"),
    (TYPED_COMPOSITE_ACTOR, "ptolemy.actor.CompositeActor"),
    ("ptolemy.actor.lib.Source", TYPED_ATOMIC_ACTOR),
    ("ptolemy.actor.lib.SequenceSource", "ptolemy.actor.lib.Source"),
    ("ptolemy.actor.lib.Sink", TYPED_ATOMIC_ACTOR),
    ("ptolemy.actor.lib.Transformer", TYPED_ATOMIC_ACTOR),
    ("ptolemy.actor.lib.Const", "ptolemy.actor.lib.Source"),
    ("ptolemy.actor.lib.Ramp", "ptolemy.actor.lib.SequenceSource"),
    ("ptolemy.actor.lib.Scale", "ptolemy.actor.lib.Transformer"),
    ("ptolemy.actor.lib.AddSubtract", TYPED_ATOMIC_ACTOR),
    ("ptolemy.actor.lib.Discard", "ptolemy.actor.lib.Sink"),
    ("ptolemy.actor.lib.gui.Display", "ptolemy.actor.lib.Sink"),
    ("ptolemy.domains.modal.kernel.FSMActor", "ptolemy.kernel.CompositeEntity"),
    (MODAL_CONTROLLER, "ptolemy.domains.modal.kernel.FSMActor"),
    ("ptolemy.kernel.Port", NAMED_OBJ),
    ("ptolemy.kernel.ComponentPort", "ptolemy.kernel.Port"),
    ("ptolemy.actor.IOPort", "ptolemy.kernel.ComponentPort"),
    (TYPED_IO_PORT, "ptolemy.actor.IOPort"),
    ("ptolemy.kernel.util.Attribute", NAMED_OBJ),
    (DIRECTOR, "ptolemy.kernel.util.Attribute"),
    ("ptolemy.actor.sched.StaticSchedulingDirector", DIRECTOR),
    (SDF_DIRECTOR, "ptolemy.actor.sched.StaticSchedulingDirector"),
];

/// Parent map over fully qualified class names.
#[derive(Debug, Clone)]
pub struct ClassHierarchy {
    parents: HashMap<String, String>,
}

impl Default for ClassHierarchy {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassHierarchy {
    /// Hierarchy with the built-in framework classes.
    pub fn new() -> Self {
        let parents = BUILTIN_CLASSES
            .iter()
            .map(|(c, p)| (c.to_string(), p.to_string()))
            .collect();
        ClassHierarchy { parents }
    }

    pub fn insert(&mut self, class: impl Into<String>, parent: impl Into<String>) {
        self.parents.insert(class.into(), parent.into());
    }

    pub fn parent(&self, class: &str) -> Option<&str> {
        self.parents.get(class).map(String::as_str)
    }

    /// `class` followed by its ancestors. A class with no known parent is
    /// continued through `fallback` (the base class for its kind).
    pub fn chain(&self, class: &str, fallback: &str) -> Vec<String> {
        let mut chain = vec![class.to_string()];
        let mut current = class.to_string();
        loop {
            let next = match self.parent(&current) {
                Some(p) => p.to_string(),
                None if current != NAMED_OBJ && !chain.iter().any(|c| c == fallback) => {
                    fallback.to_string()
                }
                None => break,
            };
            if chain.contains(&next) {
                break;
            }
            chain.push(next.clone());
            current = next;
        }
        chain
    }

    pub fn is_subclass(&self, class: &str, ancestor: &str) -> bool {
        self.chain(class, NAMED_OBJ).iter().any(|c| c == ancestor)
    }
}

// ── JSON description ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    #[serde(default = "default_composite_class")]
    pub class: String,
    #[serde(default)]
    pub director: Option<DirectorSpec>,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub classes: BTreeMap<String, String>,
    #[serde(default)]
    pub ports: Vec<PortSpec>,
    #[serde(default)]
    pub components: Vec<ComponentSpec>,
    #[serde(default)]
    pub links: Vec<LinkSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub name: String,
    pub class: String,
    #[serde(default)]
    pub director: Option<DirectorSpec>,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub ports: Vec<PortSpec>,
    #[serde(default)]
    pub components: Vec<ComponentSpec>,
    #[serde(default)]
    pub links: Vec<LinkSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectorSpec {
    #[serde(default = "default_director_class")]
    pub class: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortSpec {
    pub name: String,
    pub direction: Direction,
    #[serde(default = "default_port_class")]
    pub class: String,
    #[serde(default, rename = "type")]
    pub ty: Option<PtType>,
    #[serde(default)]
    pub multiport: bool,
    #[serde(default)]
    pub width: Option<usize>,
    #[serde(default)]
    pub production_rate: Option<usize>,
    #[serde(default)]
    pub consumption_rate: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkSpec {
    pub from: String,
    pub to: String,
}

fn default_composite_class() -> String {
    TYPED_COMPOSITE_ACTOR.to_string()
}

fn default_director_class() -> String {
    SDF_DIRECTOR.to_string()
}

fn default_port_class() -> String {
    TYPED_IO_PORT.to_string()
}

/// Render a JSON parameter value as expression text.
fn json_to_expression(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(json_to_expression).collect();
            format!("{{{}}}", inner.join(", "))
        }
        other => other.to_string(),
    }
}

fn model_error(message: impl Into<String>) -> CgError {
    CgError::new(ErrorKind::Model, message).with_code(codes::E0400)
}

// ── Model ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Model {
    pub name: String,
    root: ComponentId,
    components: Vec<Component>,
    ports: Vec<Port>,
    links: Vec<(Channel, Channel)>,
    sinks: HashMap<Channel, Vec<Channel>>,
    sources: HashMap<Channel, Vec<Channel>>,
    classes: ClassHierarchy,
    spec: ModelSpec,
    overrides: BTreeMap<String, String>,
}

/// Endpoint as written in a link, before channel assignment.
struct RawEnd {
    port: PortId,
    channel: Option<usize>,
}

impl Model {
    pub fn from_json_str(json: &str) -> Result<Model> {
        let spec: ModelSpec = serde_json::from_str(json).map_err(|e| {
            model_error(format!("malformed model description: {}", e)).with_source(e)
        })?;
        Model::from_spec(spec)
    }

    pub fn load(path: &Path) -> Result<Model> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CgError::io("read model", path, e))?;
        Model::from_json_str(&text).map_err(|e| {
            CgError::new(ErrorKind::Model, format!("failed to load {}", path.display()))
                .with_code(codes::E0400)
                .caused_by(e)
        })
    }

    pub fn from_spec(spec: ModelSpec) -> Result<Model> {
        let mut classes = ClassHierarchy::new();
        for (class, parent) in &spec.classes {
            classes.insert(class.clone(), parent.clone());
        }

        let mut model = Model {
            name: spec.name.clone(),
            root: ComponentId(0),
            components: Vec::new(),
            ports: Vec::new(),
            links: Vec::new(),
            sinks: HashMap::new(),
            sources: HashMap::new(),
            classes,
            spec: spec.clone(),
            overrides: BTreeMap::new(),
        };

        let root_spec = ComponentSpec {
            name: spec.name.clone(),
            class: spec.class.clone(),
            director: spec.director.clone(),
            parameters: spec.parameters.clone(),
            ports: spec.ports.clone(),
            components: spec.components.clone(),
            links: spec.links.clone(),
        };

        let mut raw_links = Vec::new();
        model.root = model.add_component(&root_spec, None, &mut raw_links)?;
        model.assign_channels(raw_links);
        Ok(model)
    }

    fn add_component(
        &mut self,
        spec: &ComponentSpec,
        parent: Option<ComponentId>,
        raw_links: &mut Vec<(RawEnd, RawEnd)>,
    ) -> Result<ComponentId> {
        let id = ComponentId(self.components.len() as u32);
        let kind = if !spec.components.is_empty() {
            ComponentKind::Composite
        } else if self.classes.is_subclass(&spec.class, MODAL_CONTROLLER) {
            ComponentKind::ModalController
        } else if parent.is_none() {
            ComponentKind::Composite
        } else {
            ComponentKind::Actor
        };

        self.components.push(Component {
            id,
            name: spec.name.clone(),
            class: spec.class.clone(),
            kind,
            parent,
            children: Vec::new(),
            ports: Vec::new(),
            parameters: spec
                .parameters
                .iter()
                .map(|(name, value)| Parameter {
                    name: name.clone(),
                    expression: json_to_expression(value),
                })
                .collect(),
            director: None,
        });

        for port_spec in &spec.ports {
            let pid = PortId(self.ports.len() as u32);
            let ty = port_spec.ty.clone().unwrap_or(PtType::Unknown);
            self.ports.push(Port {
                id: pid,
                name: port_spec.name.clone(),
                class: port_spec.class.clone(),
                owner: id,
                direction: port_spec.direction,
                multiport: port_spec.multiport,
                width: port_spec.width.unwrap_or(if port_spec.multiport { 0 } else { 1 }),
                ty,
                production_rate: port_spec.production_rate.unwrap_or(1),
                consumption_rate: port_spec.consumption_rate.unwrap_or(1),
            });
            self.components[id.0 as usize].ports.push(pid);
        }

        if let Some(dir) = &spec.director {
            let did = ComponentId(self.components.len() as u32);
            self.components.push(Component {
                id: did,
                name: "director".to_string(),
                class: dir.class.clone(),
                kind: ComponentKind::Director,
                parent: Some(id),
                children: Vec::new(),
                ports: Vec::new(),
                parameters: dir
                    .parameters
                    .iter()
                    .map(|(name, value)| Parameter {
                        name: name.clone(),
                        expression: json_to_expression(value),
                    })
                    .collect(),
                director: None,
            });
            self.components[id.0 as usize].director = Some(did);
        }

        for child in &spec.components {
            let cid = self.add_component(child, Some(id), raw_links)?;
            self.components[id.0 as usize].children.push(cid);
        }

        for link in &spec.links {
            let from = self.resolve_endpoint(id, &link.from, true)?;
            let to = self.resolve_endpoint(id, &link.to, false)?;
            raw_links.push((from, to));
        }

        Ok(id)
    }

    /// Resolve `child.port[#n]` or `port[#n]` inside composite `container`.
    /// `as_source` selects which side of the data flow the endpoint must be.
    fn resolve_endpoint(&self, container: ComponentId, text: &str, as_source: bool) -> Result<RawEnd> {
        let (path, channel) = match text.split_once('#') {
            Some((p, ch)) => {
                let n = ch.trim().parse::<usize>().map_err(|_| {
                    model_error(format!("bad channel number in link endpoint '{}'", text))
                })?;
                (p.trim(), Some(n))
            }
            None => (text.trim(), None),
        };

        let mut segments: Vec<&str> = path.split('.').collect();
        let port_name = segments.pop().unwrap_or_default();
        let mut owner = container;
        for seg in &segments {
            owner = self
                .component(owner)
                .children
                .iter()
                .copied()
                .find(|c| self.component(*c).name == *seg)
                .ok_or_else(|| {
                    model_error(format!(
                        "link endpoint '{}': no component '{}' in {}",
                        text,
                        seg,
                        self.full_name(owner)
                    ))
                })?;
        }

        let port = self.find_port(owner, port_name).ok_or_else(|| {
            model_error(format!(
                "link endpoint '{}': no port '{}' on {}",
                text,
                port_name,
                self.full_name(owner)
            ))
        })?;

        // Outside ports of children flow output→input; the container's own
        // ports flow the other way when seen from inside.
        let inside = owner == container;
        let dir = self.port(port).direction;
        let ok = match (inside, as_source) {
            (false, true) => dir == Direction::Output,
            (false, false) => dir == Direction::Input,
            (true, true) => dir == Direction::Input,
            (true, false) => dir == Direction::Output,
        };
        if !ok {
            return Err(model_error(format!(
                "link endpoint '{}' cannot be a {} in {}",
                text,
                if as_source { "source" } else { "sink" },
                self.full_name(container)
            )));
        }

        Ok(RawEnd { port, channel })
    }

    fn assign_channels(&mut self, raw_links: Vec<(RawEnd, RawEnd)>) {
        let mut next_source: HashMap<PortId, usize> = HashMap::new();
        let mut next_sink: HashMap<PortId, usize> = HashMap::new();

        for (from, to) in raw_links {
            let source = self.pick_channel(&from, &mut next_source);
            let sink = self.pick_channel(&to, &mut next_sink);
            self.links.push((source, sink));
            self.sinks.entry(source).or_default().push(sink);
            self.sources.entry(sink).or_default().push(source);
        }

        for port in &mut self.ports {
            if port.multiport {
                let used = [next_source.get(&port.id), next_sink.get(&port.id)]
                    .into_iter()
                    .flatten()
                    .copied()
                    .max()
                    .unwrap_or(0);
                port.width = port.width.max(used);
            }
        }
        // Explicit `#n` channels may exceed the counters.
        let explicit: Vec<(PortId, usize)> = self
            .links
            .iter()
            .flat_map(|(s, k)| [(s.port, s.index + 1), (k.port, k.index + 1)])
            .collect();
        for (pid, needed) in explicit {
            let port = &mut self.ports[pid.0 as usize];
            if port.multiport && port.width < needed {
                port.width = needed;
            }
        }
    }

    fn pick_channel(&self, end: &RawEnd, counters: &mut HashMap<PortId, usize>) -> Channel {
        let port = self.port(end.port);
        let index = match end.channel {
            Some(n) => n,
            None if port.multiport => {
                let counter = counters.entry(end.port).or_insert(0);
                let n = *counter;
                *counter += 1;
                n
            }
            None => 0,
        };
        Channel::new(end.port, index)
    }

    // ── Accessors ──

    pub fn root(&self) -> ComponentId {
        self.root
    }

    pub fn component(&self, id: ComponentId) -> &Component {
        &self.components[id.0 as usize]
    }

    pub fn port(&self, id: PortId) -> &Port {
        &self.ports[id.0 as usize]
    }

    pub fn port_mut(&mut self, id: PortId) -> &mut Port {
        &mut self.ports[id.0 as usize]
    }

    pub fn components(&self) -> impl Iterator<Item = &Component> {
        self.components.iter()
    }

    pub fn ports(&self) -> impl Iterator<Item = &Port> {
        self.ports.iter()
    }

    /// All channel-level links in declaration order.
    pub fn links(&self) -> &[(Channel, Channel)] {
        &self.links
    }

    pub fn classes(&self) -> &ClassHierarchy {
        &self.classes
    }

    pub fn find_component(&self, full_name: &str) -> Option<ComponentId> {
        self.components
            .iter()
            .find(|c| c.kind != ComponentKind::Director && self.full_name(c.id) == full_name)
            .map(|c| c.id)
    }

    pub fn find_port(&self, component: ComponentId, name: &str) -> Option<PortId> {
        self.component(component)
            .ports
            .iter()
            .copied()
            .find(|p| self.port(*p).name == name)
    }

    pub fn input_ports(&self, component: ComponentId) -> Vec<PortId> {
        self.component(component)
            .ports
            .iter()
            .copied()
            .filter(|p| self.port(*p).is_input())
            .collect()
    }

    pub fn output_ports(&self, component: ComponentId) -> Vec<PortId> {
        self.component(component)
            .ports
            .iter()
            .copied()
            .filter(|p| self.port(*p).is_output())
            .collect()
    }

    /// Actors and composites contained in `component` (directors excluded).
    pub fn contained(&self, component: ComponentId) -> &[ComponentId] {
        &self.component(component).children
    }

    pub fn is_composite(&self, component: ComponentId) -> bool {
        self.component(component).kind == ComponentKind::Composite
    }

    /// Channels that receive data sent on `source`.
    pub fn sink_channels(&self, source: Channel) -> Vec<Channel> {
        self.sinks.get(&source).cloned().unwrap_or_default()
    }

    /// Channels that send data into `sink`.
    pub fn source_channels(&self, sink: Channel) -> Vec<Channel> {
        self.sources.get(&sink).cloned().unwrap_or_default()
    }

    /// Nearest director governing `component`: its own, else its container's.
    pub fn executive_director(&self, component: ComponentId) -> Option<ComponentId> {
        let mut current = Some(component);
        while let Some(c) = current {
            if let Some(d) = self.component(c).director {
                return Some(d);
            }
            current = self.component(c).parent;
        }
        None
    }

    // ── Names ──

    /// Dotted full name, e.g. `.Model.Ramp`.
    pub fn full_name(&self, id: ComponentId) -> String {
        let mut parts = Vec::new();
        let mut current = Some(id);
        while let Some(c) = current {
            parts.push(self.component(c).name.as_str());
            current = self.component(c).parent;
        }
        parts.reverse();
        format!(".{}", parts.join("."))
    }

    pub fn port_full_name(&self, id: PortId) -> String {
        let port = self.port(id);
        format!("{}.{}", self.full_name(port.owner), port.name)
    }

    pub fn object_full_name(&self, obj: ObjectRef) -> String {
        match obj {
            ObjectRef::Component(c) => self.full_name(c),
            ObjectRef::Port(p) => self.port_full_name(p),
        }
    }

    pub fn class_of(&self, obj: ObjectRef) -> &str {
        match obj {
            ObjectRef::Component(c) => &self.component(c).class,
            ObjectRef::Port(p) => &self.port(p).class,
        }
    }

    /// The object's class followed by its ancestors, most specific first.
    pub fn class_chain(&self, obj: ObjectRef) -> Vec<String> {
        let fallback = match obj {
            ObjectRef::Port(_) => TYPED_IO_PORT,
            ObjectRef::Component(c) => match self.component(c).kind {
                ComponentKind::Director => DIRECTOR,
                ComponentKind::Composite => TYPED_COMPOSITE_ACTOR,
                ComponentKind::Actor | ComponentKind::ModalController => TYPED_ATOMIC_ACTOR,
            },
        };
        self.classes.chain(self.class_of(obj), fallback)
    }

    /// Identifier-safe name for generated code, e.g. `Model_Ramp_output`.
    pub fn generate_name(&self, obj: ObjectRef) -> String {
        let name = sanitize_name(&self.object_full_name(obj).replace('$', "Dollar"));
        match name.strip_prefix('_') {
            Some(rest) => rest.to_string(),
            None => name,
        }
    }

    // ── Parameters ──

    /// Find `name` on `component` or the nearest container defining it.
    pub fn find_parameter(&self, component: ComponentId, name: &str) -> Option<(ComponentId, &Parameter)> {
        let mut current = Some(component);
        while let Some(c) = current {
            let comp = self.component(c);
            if let Some(p) = comp.parameters.iter().find(|p| p.name == name) {
                return Some((c, p));
            }
            current = comp.parent;
        }
        None
    }

    /// Set (or add) a parameter expression on a component.
    pub fn set_parameter(&mut self, component: ComponentId, name: &str, expression: &str) {
        let comp = &mut self.components[component.0 as usize];
        match comp.parameters.iter_mut().find(|p| p.name == name) {
            Some(p) => p.expression = expression.to_string(),
            None => comp.parameters.push(Parameter {
                name: name.to_string(),
                expression: expression.to_string(),
            }),
        }
        if component == self.root {
            self.overrides.insert(name.to_string(), expression.to_string());
        }
    }

    /// Evaluate a parameter visible from `component`, or `None` if undefined.
    pub fn evaluate_parameter(&self, component: ComponentId, name: &str) -> Result<Option<Value>> {
        ParameterScope::new(self, component).resolve(name)
    }

    /// Compact JSON of the source description plus overrides, for fingerprints.
    pub fn canonical_json(&self) -> String {
        #[derive(Serialize)]
        struct Canonical<'a> {
            spec: &'a ModelSpec,
            overrides: &'a BTreeMap<String, String>,
        }
        serde_json::to_string(&Canonical {
            spec: &self.spec,
            overrides: &self.overrides,
        })
        .unwrap_or_default()
    }
}

/// Replace every character that cannot appear in an identifier with `_`.
pub fn sanitize_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectRef::Component(c) => write!(f, "component#{}", c.0),
            ObjectRef::Port(p) => write!(f, "port#{}", p.0),
        }
    }
}

// ── Parameter scope ─────────────────────────────────────────────────────────

/// Resolves identifiers to parameters of a component and its containers.
pub struct ParameterScope<'m> {
    model: &'m Model,
    component: ComponentId,
    active: Rc<RefCell<Vec<(ComponentId, String)>>>,
}

impl<'m> ParameterScope<'m> {
    pub fn new(model: &'m Model, component: ComponentId) -> Self {
        ParameterScope {
            model,
            component,
            active: Rc::new(RefCell::new(Vec::new())),
        }
    }
}

impl Scope for ParameterScope<'_> {
    fn resolve(&self, name: &str) -> Result<Option<Value>> {
        let Some((owner, param)) = self.model.find_parameter(self.component, name) else {
            return Ok(None);
        };

        let key = (owner, name.to_string());
        if self.active.borrow().contains(&key) {
            return Err(CgError::new(
                ErrorKind::Expression,
                format!(
                    "parameter '{}' of {} refers to itself",
                    name,
                    self.model.full_name(owner)
                ),
            )
            .with_code(codes::E0403));
        }

        let tree = expr::parse(&param.expression).map_err(|e| {
            CgError::new(
                ErrorKind::Expression,
                format!(
                    "Failed to generate parse tree for \"{}\" in {}",
                    name,
                    self.model.full_name(owner)
                ),
            )
            .with_code(codes::E0402)
            .caused_by(e)
        })?;

        self.active.borrow_mut().push(key);
        let inner = ParameterScope {
            model: self.model,
            component: owner,
            active: Rc::clone(&self.active),
        };
        let value = expr::evaluate(&tree, &inner);
        self.active.borrow_mut().pop();
        value.map(Some)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const FANOUT: &str = r#"{
        "name": "Fan",
        "director": {"parameters": {"iterations": 4}},
        "parameters": {"gain": 2},
        "components": [
            {"name": "C", "class": "ptolemy.actor.lib.Const",
             "parameters": {"value": "gain * 3"},
             "ports": [{"name": "output", "direction": "output", "type": "int"}]},
            {"name": "A", "class": "ptolemy.actor.lib.Discard",
             "ports": [{"name": "input", "direction": "input", "type": "double"}]},
            {"name": "B", "class": "ptolemy.actor.lib.Discard",
             "ports": [{"name": "input", "direction": "input", "multiport": true, "type": "int"}]}
        ],
        "links": [
            {"from": "C.output", "to": "A.input"},
            {"from": "C.output", "to": "B.input"},
            {"from": "C.output", "to": "B.input"}
        ]
    }"#;

    fn fanout() -> Model {
        Model::from_json_str(FANOUT).unwrap()
    }

    fn port(model: &Model, path: &str) -> PortId {
        let (comp, name) = path.rsplit_once('.').unwrap();
        let c = model.find_component(comp).unwrap();
        model.find_port(c, name).unwrap()
    }

    #[test]
    fn structure() {
        let m = fanout();
        assert_eq!(m.contained(m.root()).len(), 3);
        assert!(m.component(m.root()).director.is_some());
        assert_eq!(m.component(m.root()).kind, ComponentKind::Composite);
        let c = m.find_component(".Fan.C").unwrap();
        assert_eq!(m.component(c).kind, ComponentKind::Actor);
        assert_eq!(m.output_ports(c).len(), 1);
        assert!(m.input_ports(c).is_empty());
    }

    #[test]
    fn fanout_channels() {
        let m = fanout();
        let out = Channel::new(port(&m, ".Fan.C.output"), 0);
        let sinks = m.sink_channels(out);
        let a = port(&m, ".Fan.A.input");
        let b = port(&m, ".Fan.B.input");
        assert_eq!(
            sinks,
            vec![Channel::new(a, 0), Channel::new(b, 0), Channel::new(b, 1)]
        );
        assert_eq!(m.port(b).width, 2);
        assert_eq!(m.source_channels(Channel::new(b, 1)), vec![out]);
    }

    #[test]
    fn channel_equality_and_hash() {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let a = Channel::new(PortId(3), 1);
        let b = Channel::new(PortId(3), 1);
        let hash = |c: &Channel| {
            let mut h = DefaultHasher::new();
            c.hash(&mut h);
            h.finish()
        };
        assert_eq!(a, b);
        assert_eq!(hash(&a), hash(&b));
        assert_ne!(a, Channel::new(PortId(3), 0));
        assert_ne!(a, Channel::new(PortId(4), 1));
    }

    #[test]
    fn names() {
        let m = fanout();
        let c = m.find_component(".Fan.C").unwrap();
        assert_eq!(m.full_name(c), ".Fan.C");
        assert_eq!(m.generate_name(ObjectRef::Component(c)), "Fan_C");
        let out = port(&m, ".Fan.C.output");
        assert_eq!(m.generate_name(ObjectRef::Port(out)), "Fan_C_output");
        assert_eq!(sanitize_name("3 a-b$"), "_3_a_b_");
    }

    #[test]
    fn class_chain_walks_builtins() {
        let m = fanout();
        let c = m.find_component(".Fan.C").unwrap();
        let chain = m.class_chain(ObjectRef::Component(c));
        assert_eq!(chain[0], "ptolemy.actor.lib.Const");
        assert_eq!(chain[1], "ptolemy.actor.lib.Source");
        assert_eq!(chain[2], TYPED_ATOMIC_ACTOR);
        assert_eq!(chain.last().map(String::as_str), Some(NAMED_OBJ));
    }

    #[test]
    fn unknown_class_uses_kind_fallback() {
        let h = ClassHierarchy::new();
        let chain = h.chain("my.Custom", TYPED_ATOMIC_ACTOR);
        assert_eq!(chain[0], "my.Custom");
        assert_eq!(chain[1], TYPED_ATOMIC_ACTOR);
        assert_eq!(chain.last().map(String::as_str), Some(NAMED_OBJ));
    }

    #[test]
    fn parameters_resolve_through_containers() {
        let m = fanout();
        let c = m.find_component(".Fan.C").unwrap();
        assert_eq!(m.evaluate_parameter(c, "value").unwrap(), Some(Value::Int(6)));
        assert_eq!(m.evaluate_parameter(c, "missing").unwrap(), None);
    }

    #[test]
    fn self_reference_is_error() {
        let mut m = fanout();
        let root = m.root();
        m.set_parameter(root, "gain", "gain + 1");
        let c = m.find_component(".Fan.C").unwrap();
        assert!(m.evaluate_parameter(c, "value").is_err());
    }

    #[test]
    fn overrides_change_fingerprint_input() {
        let mut m = fanout();
        let before = m.canonical_json();
        let root = m.root();
        m.set_parameter(root, "gain", "5");
        assert_ne!(before, m.canonical_json());
    }

    #[test]
    fn bad_link_direction_rejected() {
        let json = r#"{"name": "M", "components": [
            {"name": "A", "class": "ptolemy.actor.lib.Const",
             "ports": [{"name": "output", "direction": "output"}]},
            {"name": "B", "class": "ptolemy.actor.lib.Discard",
             "ports": [{"name": "input", "direction": "input"}]}],
            "links": [{"from": "B.input", "to": "A.output"}]}"#;
        let err = Model::from_json_str(json).unwrap_err();
        assert_eq!(err.code, Some(codes::E0400));
    }

    #[test]
    fn composite_ports_link_both_sides() {
        let json = r#"{"name": "M", "components": [
            {"name": "S", "class": "ptolemy.actor.lib.Const",
             "ports": [{"name": "output", "direction": "output", "type": "int"}]},
            {"name": "Sub", "class": "ptolemy.actor.TypedCompositeActor",
             "ports": [{"name": "in", "direction": "input", "type": "int"}],
             "components": [
                {"name": "D", "class": "ptolemy.actor.lib.Discard",
                 "ports": [{"name": "input", "direction": "input", "type": "int"}]}],
             "links": [{"from": "in", "to": "D.input"}]}],
            "links": [{"from": "S.output", "to": "Sub.in"}]}"#;
        let m = Model::from_json_str(json).unwrap();
        let sub = m.find_component(".M.Sub").unwrap();
        assert!(m.is_composite(sub));
        let sub_in = m.find_port(sub, "in").unwrap();
        let d = m.find_component(".M.Sub.D").unwrap();
        let d_in = m.find_port(d, "input").unwrap();
        assert_eq!(
            m.sink_channels(Channel::new(sub_in, 0)),
            vec![Channel::new(d_in, 0)]
        );
        assert_eq!(m.source_channels(Channel::new(sub_in, 0)).len(), 1);
    }
}
