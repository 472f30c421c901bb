// codegen.rs — PyNN program generation for lowered networks
//
// Renders layers and connections of a `Network` as `Statement`s of a
// PyNN (sPyNNaker dialect) program and assembles them into a complete
// script. Every parameter value is obtained from a `ParameterContext`, so
// the same network can be emitted with literal values or with runtime
// checkpoint lookups.
//
// Preconditions: the network validates (`Network::validate`).
// Postconditions: one population per (layer, channel), one projection per
//   (connection, pre channel, post channel); imports and preambles hoisted.
// Failure modes: `UnsupportedLayerKind`, `UnsupportedConnectorKind`,
//   `UnknownInputSource`, plus any context failure. No partial output.
// Side effects: none.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::context::{ParamRef, ParameterContext};
use crate::error::{Error, Result};
use crate::ir::{
    Cell, Connection, Connector, InputLayer, InputSource, Layer, Network, NeuronLayer, Synapse,
    SynapseKind, SynapseShape, SynapseType,
};
use crate::literal::{export_dict, export_list, float, Literal};
use crate::statement::Statement;

// ── Public types ────────────────────────────────────────────────────────────

/// Module alias of the simulator in generated programs.
pub const SIM_NAME: &str = "p";
pub const SIM_IMPORT: &str = "import pyNN.spiNNaker as p";
pub const GRID_IMPORT: &str = "from pyNN.space import Grid2D";

/// Variable the accessor routine iterates with.
const PARAM_VAR: &str = "__p";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationOptions {
    /// Simulation time step in ms.
    pub timestep: f64,
    /// Run length in ms.
    pub runtime: f64,
    /// Extra keyword arguments of `setup()`.
    pub setup: BTreeMap<String, serde_json::Value>,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        SimulationOptions {
            timestep: 1.0,
            runtime: 1000.0,
            setup: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedCode {
    pub source: String,
}

// ── Naming ──────────────────────────────────────────────────────────────────

/// PyNN cell class for a cell and its synapse, e.g. `IF_curr_exp`.
pub fn cell_type_name(cell: &Cell, synapse: &Synapse) -> String {
    let neuron = match cell {
        Cell::LeakyIntegrate | Cell::LeakyIntegrateAndFire => "IF",
        Cell::IntegrateAndFire => "NIF",
    };
    let electrical = match synapse.electrical {
        SynapseType::Current => "curr",
        SynapseType::Conductance => "cond",
    };
    let shape = match synapse.shape {
        SynapseShape::Exponential => "exp",
        SynapseShape::Alpha => "alpha",
        SynapseShape::Delta => "delta",
    };
    format!("{neuron}_{electrical}_{shape}")
}

fn accessor_name(layer: &NeuronLayer) -> String {
    format!("__map_func_{}", Layer::Neuron(layer.clone()).key())
}

fn synapse_placeholder(kind: SynapseKind) -> String {
    let name = match kind {
        SynapseKind::Static => "StaticSynapse",
        SynapseKind::Convolution => "Convolution",
        SynapseKind::Dense => "PoolDense",
    };
    format!("{SIM_NAME}.{name}()")
}

// ── Layers ──────────────────────────────────────────────────────────────────

pub fn emit_layer(layer: &Layer, ctx: &dyn ParameterContext) -> Result<Statement> {
    match layer {
        Layer::Input(input) => emit_input_layer(input),
        Layer::Neuron(neuron) => emit_neuron_layer(neuron, ctx),
        // Output layers are realized by recording their pre populations.
        Layer::Output(_) => Ok(Statement::default()),
    }
}

pub fn emit_input_layer(layer: &InputLayer) -> Result<Statement> {
    let InputSource::SpifRetina {
        x,
        y,
        x_sub,
        y_sub,
        x_shift,
        y_shift,
    } = &layer.source
    else {
        return Err(Error::UnknownInputSource(layer.source.name().to_string()));
    };

    let wrapper = Layer::Input(layer.clone());
    let mut statement = Statement::default();
    for channel in 0..layer.channels {
        let kwargs = [
            ("base_key", channel),
            ("width", *x),
            ("height", *y),
            ("sub_width", *x_sub),
            ("sub_height", *y_sub),
            ("input_x_shift", *x_shift),
            ("input_y_shift", *y_shift),
        ]
        .map(|(k, v)| (Literal::str(k), Literal::Int(v as i64)));
        let args = export_dict(&kwargs, ", ", 0)?;
        statement += Statement::new(format!(
            "{} = {SIM_NAME}.Population(None, {SIM_NAME}.external_devices.{}({args}))",
            wrapper.variable(channel),
            layer.source.name(),
        ));
    }
    Ok(statement)
}

/// The routine that builds a layer's cell parameters when the program runs.
fn accessor_routine(layer: &NeuronLayer, ctx: &dyn ParameterContext) -> Result<String> {
    let names = ctx.parameter_names(&layer.cell)?;
    // Resolve each name once so contexts holding values reject gaps now.
    for name in &names {
        ctx.neuron_parameter(&layer.name, ParamRef::Name(name))?;
    }
    let lookup = ctx.neuron_parameter(&layer.name, ParamRef::Var(PARAM_VAR))?;
    Ok(format!(
        "def {}():\n    {}\n    __d = dict()\n    for {PARAM_VAR} in __parameter_names:\n        __k, __v = {lookup}\n        __d[__k] = __v\n    return __d",
        accessor_name(layer),
        export_list("__parameter_names", &names, ", ", 0),
    ))
}

pub fn emit_neuron_layer(layer: &NeuronLayer, ctx: &dyn ParameterContext) -> Result<Statement> {
    let routine = accessor_routine(layer, ctx)?;
    let cell_type = cell_type_name(&layer.cell, &layer.synapse);
    let structure = format!("Grid2D({})", float(layer.aspect_ratio()));
    let wrapper = Layer::Neuron(layer.clone());

    let mut statement = Statement::default();
    for channel in 0..layer.channels {
        let var = wrapper.variable(channel);
        statement += Statement::new(format!(
            "{var} = {SIM_NAME}.Population({}, {SIM_NAME}.{cell_type}(**{}()), structure={structure}, label={})",
            layer.size,
            accessor_name(layer),
            Literal::str(var.as_str()),
        ));
    }
    Ok(statement
        .with_imports([GRID_IMPORT])
        .with_preambles([routine]))
}

// ── Connections ─────────────────────────────────────────────────────────────

/// Keyword arguments of the pooling stage, if any.
fn pooling_kwargs(pooling_key: Option<&str>, ctx: &dyn ParameterContext) -> Result<String> {
    let Some(key) = pooling_key else {
        return Ok(String::new());
    };
    let shape = ctx.module_attribute(key, "kernel_size")?;
    let stride = ctx.module_attribute(key, "stride")?;
    Ok(format!(", pool_shape={shape}, pool_stride={stride}"))
}

fn connector_expr(
    connector: &Connector,
    pre_channel: usize,
    post_channel: usize,
    ctx: &dyn ParameterContext,
) -> Result<(String, Option<String>)> {
    match connector {
        Connector::AllToAll => Ok((format!("{SIM_NAME}.AllToAllConnector()"), None)),
        Connector::Matrix { weights_key } => Ok((
            format!("{SIM_NAME}.AllToAllConnector()"),
            Some(ctx.linear_weights(weights_key, pre_channel, post_channel)?),
        )),
        Connector::Convolution {
            weights_key,
            padding_key,
            pooling_key,
        } => {
            let weights = ctx.conv2d_weights(weights_key, pre_channel, post_channel)?;
            let padding = ctx.module_attribute(padding_key, "padding")?;
            let pooling = pooling_kwargs(pooling_key.as_deref(), ctx)?;
            Ok((
                format!("{SIM_NAME}.ConvolutionConnector({weights}, padding={padding}{pooling})"),
                None,
            ))
        }
        Connector::Dense {
            weights_key,
            pooling_key,
        } => {
            let weights = ctx.linear_weights(weights_key, pre_channel, post_channel)?;
            let pooling = pooling_kwargs(pooling_key.as_deref(), ctx)?;
            Ok((
                format!("{SIM_NAME}.PoolDenseConnector({weights}{pooling})"),
                None,
            ))
        }
        Connector::Pooling { .. } => Err(Error::UnsupportedConnectorKind(format!(
            "{} without a weighted stage",
            connector.name()
        ))),
    }
}

pub fn emit_connection(conn: &Connection, ctx: &dyn ParameterContext) -> Result<Statement> {
    let post = match (&conn.pre, &conn.post) {
        (Layer::Output(l), _) => {
            return Err(Error::UnsupportedLayerKind(format!(
                "output layer '{}' as a connection source",
                l.name
            )))
        }
        (_, Layer::Input(l)) => {
            return Err(Error::UnsupportedLayerKind(format!(
                "input layer '{}' as a connection target",
                l.name
            )))
        }
        (pre, Layer::Output(_)) => {
            return Ok((0..pre.channels())
                .map(|c| Statement::new(format!("{}.record(\"spikes\")", pre.variable(c))))
                .sum());
        }
        (_, Layer::Neuron(post)) => post,
    };

    let synapse = synapse_placeholder(post.synapse.kind);
    let mut statement = Statement::default();
    for pre_channel in 0..conn.pre.channels() {
        for post_channel in 0..conn.post.channels() {
            let var = conn.variable(pre_channel, post_channel);
            let (connector, weight) = connector_expr(&conn.connector, pre_channel, post_channel, ctx)?;
            statement += Statement::new(format!(
                "{var} = {SIM_NAME}.Projection({}, {}, {connector}, {synapse})",
                conn.pre.variable(pre_channel),
                conn.post.variable(post_channel),
            ));
            if let Some(weight) = weight {
                statement += Statement::new(format!("{var}.set(weight={weight})"));
            }
        }
    }
    Ok(statement)
}

// ── Network and program ─────────────────────────────────────────────────────

/// Layers in declaration order, then connections, separated by a blank line.
pub fn emit_network(network: &Network, ctx: &dyn ParameterContext) -> Result<Statement> {
    let layers = network
        .layers
        .iter()
        .map(|l| emit_layer(l, ctx))
        .collect::<Result<Vec<_>>>()?;
    let connections = network
        .connections
        .iter()
        .map(|c| emit_connection(c, ctx))
        .collect::<Result<Vec<_>>>()?;
    Ok(Statement::join(layers, "\n\n").join_with(Statement::join(connections, "\n\n"), "\n\n"))
}

fn emit_setup(options: &SimulationOptions) -> Result<Statement> {
    let mut kwargs = vec![(Literal::str("timestep"), Literal::Float(options.timestep))];
    kwargs.extend(
        options
            .setup
            .iter()
            .map(|(k, v)| (Literal::str(k.as_str()), Literal::from(v))),
    );
    let args = export_dict(&kwargs, ", ", 0)?;
    Ok(Statement::new(format!("{SIM_NAME}.setup({args})")))
}

/// A complete program: simulator import, context imports and preambles,
/// setup, network, run and teardown.
pub fn emit_program(
    network: &Network,
    ctx: &dyn ParameterContext,
    options: &SimulationOptions,
) -> Result<GeneratedCode> {
    let head = Statement::default()
        .with_imports([SIM_IMPORT])
        .with_imports(ctx.imports())
        .with_preambles(ctx.preambles());
    let run = Statement::new(format!(
        "{SIM_NAME}.run({})\n{SIM_NAME}.end()",
        float(options.runtime)
    ));
    let program = Statement::join(
        [head, emit_setup(options)?, emit_network(network, ctx)?, run],
        "\n\n",
    );
    Ok(GeneratedCode {
        source: program.render(),
    })
}

// ── Tests ───────────────────────────────────────────────────────────────────
