// ir.rs — Network intermediate representation
//
// Plain value types produced by lowering and consumed by emission: cells,
// synapses, connectors, layers, connections and the network that owns them.
// Every kind is a closed enum; adding one is a compile-time decision.
//
// Preconditions: none (types only).
// Postconditions: `Network::validate` checks the leading input layer, name
//   uniqueness and declaration order of connections.
// Failure modes: `MissingInputLayer`, `DuplicateLayerName`, `NotTopological`.
// Side effects: none.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ── Cells and synapses ──────────────────────────────────────────────────────

/// A neuron's dynamical model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cell {
    LeakyIntegrate,
    LeakyIntegrateAndFire,
    /// Non-leaky integrate-and-fire.
    IntegrateAndFire,
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Cell::LeakyIntegrate => "LICell",
            Cell::LeakyIntegrateAndFire => "LIFCell",
            Cell::IntegrateAndFire => "IFCell",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynapseType {
    #[default]
    Current,
    Conductance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynapseShape {
    #[default]
    Exponential,
    Alpha,
    Delta,
}

/// Structural tag selecting the projection's synapse placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynapseKind {
    #[default]
    Static,
    Convolution,
    Dense,
}

/// How a population integrates all of its inbound connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Synapse {
    pub kind: SynapseKind,
    pub electrical: SynapseType,
    pub shape: SynapseShape,
}

impl Synapse {
    pub fn new(kind: SynapseKind, electrical: SynapseType, shape: SynapseShape) -> Self {
        Synapse {
            kind,
            electrical,
            shape,
        }
    }
}

// ── Connectors ──────────────────────────────────────────────────────────────

/// Connection pattern. Keys reference records of the parameter source and
/// are only resolved at emission time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Connector {
    AllToAll,
    Matrix {
        weights_key: String,
    },
    Dense {
        weights_key: String,
        pooling_key: Option<String>,
    },
    Convolution {
        weights_key: String,
        padding_key: String,
        pooling_key: Option<String>,
    },
    Pooling {
        pooling_key: String,
    },
}

impl Connector {
    pub fn name(&self) -> &'static str {
        match self {
            Connector::AllToAll => "AllToAllConnector",
            Connector::Matrix { .. } => "MatrixConnector",
            Connector::Dense { .. } => "DenseConnector",
            Connector::Convolution { .. } => "ConvolutionConnector",
            Connector::Pooling { .. } => "PoolingConnector",
        }
    }

    pub fn weights_key(&self) -> Option<&str> {
        match self {
            Connector::Matrix { weights_key }
            | Connector::Dense { weights_key, .. }
            | Connector::Convolution { weights_key, .. } => Some(weights_key),
            Connector::AllToAll | Connector::Pooling { .. } => None,
        }
    }
}

// ── Layers ──────────────────────────────────────────────────────────────────

/// Hardware or software spike source feeding the input layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputSource {
    /// SPIF-attached event camera (retina) device.
    SpifRetina {
        x: usize,
        y: usize,
        x_sub: usize,
        y_sub: usize,
        x_shift: usize,
        y_shift: usize,
    },
    /// Live spike injection over ethernet.
    Ethernet { x: usize, y: usize, port: u16 },
}

impl InputSource {
    /// Device geometry as `(width, height)`.
    pub fn shape(&self) -> (usize, usize) {
        match self {
            InputSource::SpifRetina { x, y, .. } | InputSource::Ethernet { x, y, .. } => (*x, *y),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            InputSource::SpifRetina { .. } => "SPIFRetinaDevice",
            InputSource::Ethernet { .. } => "Ethernet",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputLayer {
    pub name: String,
    pub channels: usize,
    pub source: InputSource,
}

impl InputLayer {
    /// Pixel count of the device. `CompileConfig::validate` rejects
    /// geometries that would saturate.
    pub fn size(&self) -> usize {
        let (x, y) = self.source.shape();
        x.saturating_mul(y)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeuronLayer {
    pub name: String,
    /// Listing position the layer was lowered from.
    pub index: usize,
    pub size: usize,
    pub channels: usize,
    /// Trailing spatial dimensions `(rows, cols)`.
    pub shape: (usize, usize),
    pub cell: Cell,
    pub synapse: Synapse,
}

impl NeuronLayer {
    /// A one-row LIF layer with the default synapse.
    pub fn new(name: impl Into<String>, size: usize, channels: usize) -> Self {
        NeuronLayer {
            name: name.into(),
            index: 0,
            size,
            channels,
            shape: (1, size),
            cell: Cell::LeakyIntegrateAndFire,
            synapse: Synapse::default(),
        }
    }

    pub fn with_cell(mut self, cell: Cell) -> Self {
        self.cell = cell;
        self
    }

    pub fn with_synapse(mut self, synapse: Synapse) -> Self {
        self.synapse = synapse;
        self
    }

    pub fn with_shape(mut self, rows: usize, cols: usize) -> Self {
        self.shape = (rows, cols);
        self
    }

    /// Width over height of the declared output.
    pub fn aspect_ratio(&self) -> f64 {
        let (rows, cols) = self.shape;
        if rows == 0 {
            return 1.0;
        }
        cols as f64 / rows as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputLayer {
    pub name: String,
    pub channels: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "layer", rename_all = "snake_case")]
pub enum Layer {
    Input(InputLayer),
    Neuron(NeuronLayer),
    Output(OutputLayer),
}

impl Layer {
    pub fn name(&self) -> &str {
        match self {
            Layer::Input(l) => &l.name,
            Layer::Neuron(l) => &l.name,
            Layer::Output(l) => &l.name,
        }
    }

    pub fn channels(&self) -> usize {
        match self {
            Layer::Input(l) => l.channels,
            Layer::Neuron(l) => l.channels,
            Layer::Output(l) => l.channels,
        }
    }

    pub fn size(&self) -> usize {
        match self {
            Layer::Input(l) => l.size(),
            Layer::Neuron(l) => l.size,
            Layer::Output(_) => 0,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Layer::Input(_) => "InputLayer",
            Layer::Neuron(_) => "NeuronLayer",
            Layer::Output(_) => "OutputLayer",
        }
    }

    /// Program-level identifier of the layer: `l_{name}_{size}_{channels}`.
    pub fn key(&self) -> String {
        format!("l_{}_{}_{}", self.name(), self.size(), self.channels())
    }

    /// Population variable of one channel.
    pub fn variable(&self, channel: usize) -> String {
        format!("{}_{}", self.key(), channel)
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

impl From<NeuronLayer> for Layer {
    fn from(l: NeuronLayer) -> Self {
        Layer::Neuron(l)
    }
}

impl From<InputLayer> for Layer {
    fn from(l: InputLayer) -> Self {
        Layer::Input(l)
    }
}

impl From<OutputLayer> for Layer {
    fn from(l: OutputLayer) -> Self {
        Layer::Output(l)
    }
}

// ── Connections and network ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub pre: Layer,
    pub post: Layer,
    pub connector: Connector,
}

impl Connection {
    pub fn new(pre: impl Into<Layer>, post: impl Into<Layer>, connector: Connector) -> Self {
        Connection {
            pre: pre.into(),
            post: post.into(),
            connector,
        }
    }

    /// Projection variable between one pre and one post channel.
    pub fn variable(&self, pre_channel: usize, post_channel: usize) -> String {
        format!(
            "c_{}_{}__to__{}_{}",
            self.pre.name(),
            pre_channel,
            self.post.name(),
            post_channel
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub layers: Vec<Layer>,
    pub connections: Vec<Connection>,
}

impl Network {
    pub fn new(input: InputLayer) -> Self {
        Network {
            layers: vec![Layer::Input(input)],
            connections: Vec::new(),
        }
    }

    pub fn input(&self) -> Option<&InputLayer> {
        match self.layers.first() {
            Some(Layer::Input(l)) => Some(l),
            _ => None,
        }
    }

    pub fn layer(&self, name: &str) -> Option<&Layer> {
        self.layers.iter().find(|l| l.name() == name)
    }

    pub fn neuron_layers(&self) -> impl Iterator<Item = &NeuronLayer> {
        self.layers.iter().filter_map(|l| match l {
            Layer::Neuron(n) => Some(n),
            _ => None,
        })
    }

    /// Check that the input layer comes first, that names are unique, and
    /// that every connection's `pre` is declared before its `post`.
    pub fn validate(&self) -> Result<()> {
        match self.layers.first() {
            Some(Layer::Input(_)) => {}
            Some(other) => return Err(Error::MissingInputLayer(other.name().to_string())),
            None => return Err(Error::MissingInputLayer(String::new())),
        }
        let mut position: HashMap<&str, usize> = HashMap::new();
        for (i, layer) in self.layers.iter().enumerate() {
            if position.insert(layer.name(), i).is_some() {
                return Err(Error::DuplicateLayerName(layer.name().to_string()));
            }
        }
        for conn in &self.connections {
            let pre = position.get(conn.pre.name());
            let post = position.get(conn.post.name());
            match (pre, post) {
                (Some(a), Some(b)) if a < b => {}
                _ => {
                    return Err(Error::NotTopological {
                        pre: conn.pre.name().to_string(),
                        post: conn.post.name().to_string(),
                    })
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retina() -> InputLayer {
        InputLayer {
            name: "input".into(),
            channels: 2,
            source: InputSource::SpifRetina {
                x: 32,
                y: 16,
                x_sub: 16,
                y_sub: 8,
                x_shift: 16,
                y_shift: 0,
            },
        }
    }

    #[test]
    fn layer_naming() {
        let l = Layer::from(NeuronLayer::new("x", 1, 1));
        assert_eq!(l.key(), "l_x_1_1");
        assert_eq!(l.variable(0), "l_x_1_1_0");
        let input = Layer::from(retina());
        assert_eq!(input.key(), "l_input_512_2");
    }

    #[test]
    fn connection_variable() {
        let c = Connection::new(
            NeuronLayer::new("x", 1, 1),
            NeuronLayer::new("y", 1, 1),
            Connector::AllToAll,
        );
        assert_eq!(c.variable(0, 0), "c_x_0__to__y_0");
    }

    #[test]
    fn aspect_ratio_is_width_over_height() {
        let l = NeuronLayer::new("x", 8, 1).with_shape(2, 4);
        assert_eq!(l.aspect_ratio(), 2.0);
    }

    #[test]
    fn validate_accepts_chain() {
        let mut net = Network::new(retina());
        let a = NeuronLayer::new("a", 4, 1);
        net.connections
            .push(Connection::new(retina(), a.clone(), Connector::AllToAll));
        net.layers.push(a.into());
        assert!(net.validate().is_ok());
    }

    #[test]
    fn validate_rejects_backward_connection() {
        let mut net = Network::new(retina());
        let a = NeuronLayer::new("a", 4, 1);
        net.layers.push(a.clone().into());
        net.connections
            .push(Connection::new(a, retina(), Connector::AllToAll));
        assert!(matches!(
            net.validate(),
            Err(Error::NotTopological { pre, .. }) if pre == "a"
        ));
    }

    #[test]
    fn validate_rejects_duplicate_names() {
        let mut net = Network::new(retina());
        net.layers.push(NeuronLayer::new("a", 4, 1).into());
        net.layers.push(NeuronLayer::new("a", 2, 1).into());
        assert!(matches!(net.validate(), Err(Error::DuplicateLayerName(n)) if n == "a"));
    }

    #[test]
    fn validate_requires_leading_input() {
        let net = Network {
            layers: vec![NeuronLayer::new("a", 4, 1).into()],
            connections: Vec::new(),
        };
        assert!(matches!(net.validate(), Err(Error::MissingInputLayer(n)) if n == "a"));
        assert!(Network::default().validate().is_err());
    }

    #[test]
    fn connector_weights_key() {
        let c = Connector::Convolution {
            weights_key: "1".into(),
            padding_key: "1".into(),
            pooling_key: None,
        };
        assert_eq!(c.weights_key(), Some("1"));
        assert_eq!(Connector::AllToAll.weights_key(), None);
    }
}
