// lower.rs — Graph lowering: module listing → Network
//
// Scans the listing in ascending position order. Connector primitives
// (convolution, pooling, linear, dense) are collected into a window that is
// consumed by the next neuron module; each neuron module becomes a layer plus
// a connection from the previously appended layer.
//
// Preconditions: passthrough modules already removed
//   (`ModuleListing::without_passthrough`).
// Postconditions: layers in declaration order, each neuron layer with exactly
//   one inbound connection; the parameter table holds one record per listing
//   position. `Network::validate` is left to the verify pass.
// Failure modes: `UnknownModuleKind`, `MissingConnector`,
//   `ConflictingConnectors`, `UnconsumedModules`, `InvalidShape`. No partial
//   network is returned.
// Side effects: none.

use tracing::debug;

use crate::context::{ParameterRecord, ParameterTable, RecordMap};
use crate::error::{Error, Result};
use crate::ir::{
    Cell, Connection, Connector, InputLayer, Layer, Network, NeuronLayer, OutputLayer, Synapse,
    SynapseKind, SynapseShape, SynapseType,
};
use crate::listing::{ModuleDescriptor, ModuleListing};

// ── Options and output ──────────────────────────────────────────────────────

/// Caller-supplied choices the listing does not carry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LowerOptions {
    pub synapse_type: SynapseType,
}

#[derive(Debug, Clone)]
pub struct LowerResult {
    pub network: Network,
    /// One record per listing position, keyed by the position.
    pub parameters: ParameterTable,
    /// Neuron layer name → record holding its cell parameters.
    pub records: RecordMap,
}

/// Placeholder weights key of the connection into the output layer.
pub const OUTPUT_WEIGHTS_KEY: &str = "0";

// ── Module classification ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModuleKind {
    Convolution,
    Pooling,
    Linear,
    Dense,
    Neuron(Cell),
}

fn classify(tag: &str) -> Option<ModuleKind> {
    match tag {
        "conv2d" => Some(ModuleKind::Convolution),
        "avgpool2d" | "maxpool2d" => Some(ModuleKind::Pooling),
        "linear" => Some(ModuleKind::Linear),
        "dense" => Some(ModuleKind::Dense),
        "licell" => Some(ModuleKind::Neuron(Cell::LeakyIntegrate)),
        "lifcell" => Some(ModuleKind::Neuron(Cell::LeakyIntegrateAndFire)),
        _ => None,
    }
}

/// `(channels, size, (rows, cols))` of a declared output shape.
fn layer_geometry(position: usize, shape: &[usize]) -> Result<(usize, usize, (usize, usize))> {
    match *shape {
        [_, c, h, w] => h
            .checked_mul(w)
            .map(|size| (c, size, (h, w)))
            .ok_or_else(|| invalid_shape(position, shape)),
        [_, c, n] => Ok((c, n, (1, n))),
        [_, n] => Ok((1, n, (1, n))),
        _ => Err(invalid_shape(position, shape)),
    }
}

fn invalid_shape(position: usize, shape: &[usize]) -> Error {
    Error::InvalidShape {
        position,
        shape: shape.to_vec(),
    }
}

fn module_name(position: usize, module: &ModuleDescriptor) -> String {
    format!("{}_{}", module.tag(), position)
}

// ── Connector windows ───────────────────────────────────────────────────────

/// Connector primitives seen since the last neuron layer, in listing order.
#[derive(Debug, Default)]
struct Window {
    modules: Vec<(ModuleKind, usize, String)>,
}

impl Window {
    fn push(&mut self, kind: ModuleKind, position: usize, name: String) {
        self.modules.push((kind, position, name));
    }

    fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    fn positions(&self) -> Vec<usize> {
        self.modules.iter().map(|(_, p, _)| *p).collect()
    }

    /// Resolve the window into the connector feeding neuron layer `layer`.
    /// Pooling never decides the kind; when several pooling modules share a
    /// window the last one is attached.
    fn connector(self, layer: &str) -> Result<Connector> {
        let conflict = |first: &str, second: &str| Error::ConflictingConnectors {
            layer: layer.to_string(),
            first: first.to_string(),
            second: second.to_string(),
        };

        let mut connector: Option<(ModuleKind, usize, String)> = None;
        let mut pooling: Option<(usize, String)> = None;
        for (kind, position, name) in self.modules {
            if kind == ModuleKind::Pooling {
                pooling = Some((position, name));
            } else if let Some((_, _, first)) = &connector {
                return Err(conflict(first, &name));
            } else {
                connector = Some((kind, position, name));
            }
        }

        let Some((kind, position, name)) = connector else {
            return Err(Error::MissingConnector {
                layer: layer.to_string(),
            });
        };
        let weights_key = position.to_string();
        let pooling_key = pooling.as_ref().map(|(p, _)| p.to_string());
        match (kind, pooling) {
            (ModuleKind::Convolution, _) => Ok(Connector::Convolution {
                padding_key: weights_key.clone(),
                weights_key,
                pooling_key,
            }),
            (ModuleKind::Dense, _) => Ok(Connector::Dense {
                weights_key,
                pooling_key,
            }),
            (ModuleKind::Linear, None) => Ok(Connector::Matrix { weights_key }),
            // A matrix projection has no pooling stage.
            (ModuleKind::Linear, Some((_, pool))) => {
                debug!(
                    layer,
                    connector = %name,
                    pool = %pool,
                    "pooling ignored by matrix connector"
                );
                Ok(Connector::Matrix { weights_key })
            }
            (ModuleKind::Pooling | ModuleKind::Neuron(_), _) => Err(Error::MissingConnector {
                layer: layer.to_string(),
            }),
        }
    }
}

fn synapse_kind(connector: &Connector) -> SynapseKind {
    match connector {
        Connector::Convolution { .. } => SynapseKind::Convolution,
        Connector::Dense { .. } => SynapseKind::Dense,
        _ => SynapseKind::Static,
    }
}

fn synapse_shape(module: &ModuleDescriptor) -> SynapseShape {
    if module.has_parameter("alpha") {
        SynapseShape::Alpha
    } else {
        SynapseShape::Exponential
    }
}

// ── Parameter table ─────────────────────────────────────────────────────────

fn parameter_record(module: &ModuleDescriptor) -> ParameterRecord {
    let mut record = ParameterRecord::new();
    if let Some(weight) = &module.weight {
        record.insert("weight".to_string(), weight.clone());
    }
    for (name, value) in &module.attributes {
        record.insert(name.clone(), value.clone());
    }
    for (name, value) in module.parameters.iter().flatten() {
        record.insert(name.clone(), value.clone());
    }
    record
}

/// Parameter records of every module, keyed by position.
pub fn parameter_table(listing: &ModuleListing) -> ParameterTable {
    listing
        .iter()
        .map(|(position, module)| (position.to_string(), parameter_record(module)))
        .collect()
}

// ── Lowering ────────────────────────────────────────────────────────────────

/// Lower a filtered listing into a network fed by `input` and optionally
/// terminated by `output`.
pub fn lower_network(
    listing: &ModuleListing,
    input: InputLayer,
    output: Option<OutputLayer>,
    options: &LowerOptions,
) -> Result<LowerResult> {
    let mut network = Network::new(input.clone());
    let mut previous = Layer::Input(input);
    let mut records = RecordMap::new();
    let mut window = Window::default();

    for (position, module) in listing.iter() {
        let name = module_name(position, module);
        let kind = classify(&module.tag()).ok_or_else(|| Error::UnknownModuleKind {
            position,
            class_name: module.class_name.clone(),
        })?;

        let cell = match kind {
            ModuleKind::Neuron(cell) => cell,
            _ => {
                window.push(kind, position, name);
                continue;
            }
        };

        let (channels, size, (rows, cols)) = layer_geometry(position, &module.output_size)?;
        let connector = std::mem::take(&mut window).connector(&name)?;
        let synapse = Synapse::new(
            synapse_kind(&connector),
            options.synapse_type,
            synapse_shape(module),
        );
        let mut layer = NeuronLayer::new(name.clone(), size, channels)
            .with_cell(cell)
            .with_synapse(synapse)
            .with_shape(rows, cols);
        layer.index = position;

        debug!(layer = %name, connector = connector.name(), size, channels, "lowered neuron layer");

        let post = Layer::Neuron(layer);
        network
            .connections
            .push(Connection::new(previous, post.clone(), connector));
        network.layers.push(post.clone());
        previous = post;
        records.insert(name, position.to_string());
    }

    if !window.is_empty() {
        return Err(Error::UnconsumedModules {
            positions: window.positions(),
        });
    }

    if let Some(output) = output {
        let post = Layer::Output(output);
        network.connections.push(Connection::new(
            previous,
            post.clone(),
            Connector::Matrix {
                weights_key: OUTPUT_WEIGHTS_KEY.to_string(),
            },
        ));
        network.layers.push(post);
    }

    Ok(LowerResult {
        network,
        parameters: parameter_table(listing),
        records,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::InputSource;
    use crate::listing::ParamValue;

    fn input() -> InputLayer {
        InputLayer {
            name: "input".into(),
            channels: 1,
            source: InputSource::SpifRetina {
                x: 28,
                y: 28,
                x_sub: 28,
                y_sub: 28,
                x_shift: 0,
                y_shift: 0,
            },
        }
    }

    fn listing(rows: &[(usize, &str, &[usize])]) -> ModuleListing {
        let mut l = ModuleListing::new();
        for (pos, class, shape) in rows {
            l.insert(*pos, ModuleDescriptor::new(*class, shape.to_vec()))
                .unwrap();
        }
        l
    }

    fn lower(l: &ModuleListing) -> Result<LowerResult> {
        lower_network(l, input(), None, &LowerOptions::default())
    }

    #[test]
    fn conv_pool_lif() {
        let l = listing(&[
            (1, "Conv2d", &[1, 8, 26, 26]),
            (2, "AvgPool2d", &[1, 8, 13, 13]),
            (3, "LIFCell", &[1, 8, 13, 13]),
        ]);
        let r = lower(&l).unwrap();
        assert_eq!(r.network.layers.len(), 2);
        let Layer::Neuron(n) = &r.network.layers[1] else {
            panic!("expected neuron layer");
        };
        assert_eq!(n.name, "lifcell_3");
        assert_eq!(n.index, 3);
        assert_eq!(n.size, 169);
        assert_eq!(n.channels, 8);
        assert_eq!(n.shape, (13, 13));
        assert_eq!(n.synapse.kind, SynapseKind::Convolution);
        assert_eq!(
            r.network.connections[0].connector,
            Connector::Convolution {
                weights_key: "1".into(),
                padding_key: "1".into(),
                pooling_key: Some("2".into()),
            }
        );
        assert_eq!(r.records.record("lifcell_3"), "3");
    }

    #[test]
    fn pooling_before_dense_attaches() {
        let l = listing(&[
            (1, "MaxPool2d", &[1, 4, 4, 4]),
            (2, "Dense", &[1, 10]),
            (3, "LICell", &[1, 10]),
        ]);
        let r = lower(&l).unwrap();
        assert_eq!(
            r.network.connections[0].connector,
            Connector::Dense {
                weights_key: "2".into(),
                pooling_key: Some("1".into()),
            }
        );
        let Layer::Neuron(n) = &r.network.layers[1] else {
            panic!("expected neuron layer");
        };
        assert_eq!(n.cell, Cell::LeakyIntegrate);
        assert_eq!((n.channels, n.size, n.shape), (1, 10, (1, 10)));
    }

    #[test]
    fn chain_of_layers_is_a_path() {
        let l = listing(&[
            (1, "Linear", &[1, 100]),
            (2, "LIFCell", &[1, 100]),
            (3, "Linear", &[1, 10]),
            (4, "LICell", &[1, 10]),
        ]);
        let out = OutputLayer {
            name: "out".into(),
            channels: 1,
        };
        let r = lower_network(&l, input(), Some(out), &LowerOptions::default()).unwrap();
        r.network.validate().unwrap();
        let names: Vec<(&str, &str)> = r
            .network
            .connections
            .iter()
            .map(|c| (c.pre.name(), c.post.name()))
            .collect();
        assert_eq!(
            names,
            vec![
                ("input", "lifcell_2"),
                ("lifcell_2", "licell_4"),
                ("licell_4", "out"),
            ]
        );
        assert_eq!(
            r.network.connections[2].connector,
            Connector::Matrix {
                weights_key: "0".into()
            }
        );
    }

    #[test]
    fn alpha_and_electrical_type() {
        let mut l = listing(&[(1, "Linear", &[1, 4])]);
        l.insert(
            2,
            ModuleDescriptor::new("LIFCell", vec![1, 4])
                .with_parameter("alpha", ParamValue::Scalar(100.0)),
        )
        .unwrap();
        let opts = LowerOptions {
            synapse_type: SynapseType::Conductance,
        };
        let r = lower_network(&l, input(), None, &opts).unwrap();
        let n = r.network.neuron_layers().next().unwrap();
        assert_eq!(n.synapse.shape, SynapseShape::Alpha);
        assert_eq!(n.synapse.electrical, SynapseType::Conductance);
    }

    #[test]
    fn unknown_kind_rejected() {
        let l = listing(&[(1, "Linear", &[1, 4]), (2, "GRU", &[1, 4])]);
        let err = lower(&l).unwrap_err();
        assert!(matches!(
            err,
            Error::UnknownModuleKind { position: 2, ref class_name } if class_name == "GRU"
        ));
    }

    #[test]
    fn missing_connector() {
        let l = listing(&[(1, "AvgPool2d", &[1, 4, 2, 2]), (2, "LIFCell", &[1, 4, 2, 2])]);
        assert!(matches!(
            lower(&l).unwrap_err(),
            Error::MissingConnector { layer } if layer == "lifcell_2"
        ));
    }

    #[test]
    fn conflicting_connectors() {
        let l = listing(&[
            (1, "Linear", &[1, 4]),
            (2, "Dense", &[1, 4]),
            (3, "LIFCell", &[1, 4]),
        ]);
        assert!(matches!(
            lower(&l).unwrap_err(),
            Error::ConflictingConnectors { first, second, .. }
                if first == "linear_1" && second == "dense_2"
        ));
    }

    #[test]
    fn linear_ignores_pooling() {
        let l = listing(&[
            (1, "Conv2d", &[1, 2, 4, 4]),
            (2, "LIFCell", &[1, 2, 4, 4]),
            (3, "AvgPool2d", &[1, 2, 2, 2]),
            (4, "Linear", &[1, 10]),
            (5, "LICell", &[1, 10]),
        ]);
        let r = lower(&l).unwrap();
        let c = &r.network.connections[1];
        assert_eq!(c.post.name(), "licell_5");
        assert_eq!(
            c.connector,
            Connector::Matrix {
                weights_key: "4".into()
            }
        );
    }

    #[test]
    fn last_pooling_in_window_wins() {
        let l = listing(&[
            (1, "AvgPool2d", &[1, 1, 14, 14]),
            (2, "Conv2d", &[1, 4, 12, 12]),
            (3, "AvgPool2d", &[1, 4, 6, 6]),
            (4, "LIFCell", &[1, 4, 6, 6]),
        ]);
        let r = lower(&l).unwrap();
        assert_eq!(
            r.network.connections[0].connector,
            Connector::Convolution {
                weights_key: "2".into(),
                padding_key: "2".into(),
                pooling_key: Some("3".into()),
            }
        );
    }

    #[test]
    fn trailing_connector_is_unconsumed() {
        let l = listing(&[
            (1, "Linear", &[1, 4]),
            (2, "LIFCell", &[1, 4]),
            (3, "Linear", &[1, 2]),
        ]);
        assert!(matches!(
            lower(&l).unwrap_err(),
            Error::UnconsumedModules { positions } if positions == vec![3]
        ));
    }

    #[test]
    fn invalid_shape() {
        let l = listing(&[(1, "Linear", &[1, 4]), (2, "LIFCell", &[4])]);
        assert!(matches!(
            lower(&l).unwrap_err(),
            Error::InvalidShape { position: 2, .. }
        ));
    }

    #[test]
    fn oversized_shape_is_invalid() {
        let l = crate::parser::parse_listing("1 Linear [1, 4]\n2 LIFCell [1, 1, 1e19, 1e19]")
            .unwrap();
        assert!(matches!(
            lower(&l).unwrap_err(),
            Error::InvalidShape { position: 2, .. }
        ));
    }

    #[test]
    fn parameter_table_flattens_groups() {
        let mut l = ModuleListing::new();
        l.insert(
            1,
            ModuleDescriptor::new("Conv2d", vec![1, 2, 4, 4])
                .with_weight(ParamValue::Scalar(0.5))
                .with_attribute("padding", ParamValue::Scalar(1.0)),
        )
        .unwrap();
        l.insert(
            2,
            ModuleDescriptor::new("LIFCell", vec![1, 2, 4, 4])
                .with_parameter("v_th", ParamValue::Scalar(1.0)),
        )
        .unwrap();
        let table = parameter_table(&l);
        assert_eq!(table["1"]["weight"], ParamValue::Scalar(0.5));
        assert_eq!(table["1"]["padding"], ParamValue::Scalar(1.0));
        assert_eq!(table["2"]["v_th"], ParamValue::Scalar(1.0));
    }
}
