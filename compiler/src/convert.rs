// convert.rs — Type conversion analysis
//
// Finds every (source channel, sink channel) pair whose declared port
// types differ and builds the right-hand side of the statement that
// converts a source value into the sink's type.
//
// Preconditions: port widths are final (model loaded, types resolved).
// Postconditions: a record holds exactly the differing pairs, each sink
//   listed under its source channel in link order.
// Failure modes: none; unsupported pairs surface when the generated
//   program is compiled.
// Side effects: none.

use std::collections::BTreeMap;

use crate::model::{Channel, ComponentId, Model, PortId};
use crate::target::{conversion_name, Target};
use crate::types::PtType;

/// Source channels mapped to the sink channels needing a conversion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeConversionRecord {
    entries: BTreeMap<Channel, Vec<Channel>>,
}

impl TypeConversionRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn record(&mut self, source: Channel, sink: Channel) {
        let sinks = self.entries.entry(source).or_default();
        if !sinks.contains(&sink) {
            sinks.push(sink);
        }
    }

    pub fn sinks(&self, source: Channel) -> &[Channel] {
        self.entries.get(&source).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_converted(&self, source: Channel, sink: Channel) -> bool {
        self.sinks(source).contains(&sink)
    }

    pub fn sources(&self) -> impl Iterator<Item = Channel> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Channel indices of `port`: `0..width`, or just `0` for a plain port.
pub fn channels(model: &Model, port: PortId) -> impl Iterator<Item = Channel> {
    let p = model.port(port);
    let width = if p.multiport { p.width } else { 1 };
    (0..width).map(move |i| Channel::new(port, i))
}

/// Record every differing pair reachable from `component`'s source ports:
/// its outputs, plus its inputs when it is a composite.
pub fn analyze(model: &Model, component: ComponentId) -> TypeConversionRecord {
    let mut record = TypeConversionRecord::new();
    let mut sources = model.output_ports(component);
    if model.is_composite(component) {
        sources.extend(model.input_ports(component));
    }

    for port in sources {
        let source_type = &model.port(port).ty;
        for source in channels(model, port) {
            for sink in model.sink_channels(source) {
                if model.port(sink.port).ty != *source_type {
                    record.record(source, sink);
                }
            }
        }
    }
    record
}

/// Number of offsets a conversion covers: the larger of the source port's
/// rates, at least one.
pub fn conversion_offsets(model: &Model, source: PortId) -> usize {
    let p = model.port(source);
    p.production_rate.max(p.consumption_rate).max(1)
}

/// Right-hand side converting `reference` from `source` to `sink`, or
/// `None` when the source type is unknown (nothing flows).
///
/// The rules compose: a boxed source may be wrapped again by the array or
/// `convert` rule that follows.
pub fn conversion_expression(
    target: &dyn Target,
    source: &PtType,
    sink: &PtType,
    reference: &str,
) -> Option<String> {
    if source.is_unknown() {
        return None;
    }
    let mut result = reference.to_string();
    if source == sink {
        return Some(result);
    }

    if target.is_primitive(sink) {
        result = format!("{}({})", conversion_name(source, sink), result);
    } else if target.is_primitive(source) {
        result = format!("$new({}({}))", source.cg_type(), result);
    }

    let boxed_sink = !matches!(sink, PtType::Scalar | PtType::General) && !target.is_primitive(sink);
    if boxed_sink {
        match sink {
            PtType::Array(elem) => {
                if target.is_primitive(source) {
                    result = format!(
                        "$new({}(1, 1, {}, TYPE_{}))",
                        sink.cg_type(),
                        result,
                        source.cg_type()
                    );
                }
                if !matches!(sink.deep_element_type(), PtType::Scalar | PtType::General) {
                    result = format!(
                        "$typeFunc(TYPE_{}::convert({}, TYPE_{}))",
                        sink.cg_type(),
                        result,
                        elem.cg_type()
                    );
                }
            }
            _ => {
                result = format!("$typeFunc(TYPE_{}::convert({}))", sink.cg_type(), result);
            }
        }
    }
    Some(result)
}
