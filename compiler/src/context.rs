// context.rs — Parameter contexts: resolving IR parameters to program text
//
// A ParameterContext turns "parameter X of layer L" or "weights of record K"
// into an expression of the generated program. Emission never sees numbers,
// only expressions, so a context may resolve values now (DirectContext) or
// generate code that looks them up when the program runs
// (CheckpointContext).
//
// Every neuron-parameter expression evaluates to a `(target_name, value)`
// pair: the PyNN parameter name and its value after the transform in
// `PARAMETER_MAP`.
//
// Preconditions: records referenced by the network exist in the source
//   (checked now by DirectContext, at program run time by CheckpointContext).
// Postconditions: returned strings are Python expressions.
// Failure modes: `UnsupportedCellKind`, `NotSupported`, `MissingParameter`,
//   `WeightIndex`.
// Side effects: none.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::ir::Cell;
use crate::listing::ParamValue;
use crate::literal::Literal;

/// One module's parameters: `weight`, module attributes and cell-parameter
/// fields share a namespace.
pub type ParameterRecord = BTreeMap<String, ParamValue>;

/// Records keyed by record name (the listing position for lowered models).
pub type ParameterTable = BTreeMap<String, ParameterRecord>;

// ── Parameter naming ────────────────────────────────────────────────────────

pub const LIF_PARAMETERS: &[&str] = &["tau_syn_inv", "tau_mem_inv", "v_leak", "v_th", "v_reset"];
pub const LI_PARAMETERS: &[&str] = &["tau_syn_inv", "tau_mem_inv", "v_leak"];
pub const IF_PARAMETERS: &[&str] = &["tau_syn_inv", "v_th", "v_reset"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Identity,
    /// Rate constants are stored inverted.
    Reciprocal,
}

impl Transform {
    pub fn apply(self, v: f64) -> f64 {
        match self {
            Transform::Identity => v,
            Transform::Reciprocal => 1.0 / v,
        }
    }

    /// Python body of the transform over `v`.
    fn python(self) -> &'static str {
        match self {
            Transform::Identity => "float(v)",
            Transform::Reciprocal => "1.0 / float(v)",
        }
    }
}

/// Maps a stored parameter to its PyNN name and value transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterMapping {
    pub source: &'static str,
    pub target: &'static str,
    pub transform: Transform,
}

pub const PARAMETER_MAP: &[ParameterMapping] = &[
    ParameterMapping {
        source: "tau_syn_inv",
        target: "tau_syn_E",
        transform: Transform::Reciprocal,
    },
    ParameterMapping {
        source: "tau_mem_inv",
        target: "tau_m",
        transform: Transform::Reciprocal,
    },
    ParameterMapping {
        source: "v_leak",
        target: "v_rest",
        transform: Transform::Identity,
    },
    ParameterMapping {
        source: "v_th",
        target: "v_thresh",
        transform: Transform::Identity,
    },
    ParameterMapping {
        source: "v_reset",
        target: "v_reset",
        transform: Transform::Identity,
    },
];

/// Mapping for `name`; unknown names keep their name and value.
pub fn mapping(name: &str) -> ParameterMapping {
    PARAMETER_MAP
        .iter()
        .find(|m| m.source == name)
        .copied()
        .unwrap_or(ParameterMapping {
            source: "",
            target: "",
            transform: Transform::Identity,
        })
}

fn target_name<'a>(m: &ParameterMapping, name: &'a str) -> &'a str {
    if m.target.is_empty() {
        name
    } else {
        m.target
    }
}

/// How a parameter name is given to `neuron_parameter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamRef<'a> {
    /// A name fixed at emission time.
    Name(&'a str),
    /// A variable of the generated program holding the name.
    Var(&'a str),
}

// ── Context trait ───────────────────────────────────────────────────────────

pub trait ParameterContext {
    /// Named parameters exposed for `cell`, in emission order.
    fn parameter_names(&self, cell: &Cell) -> Result<Vec<String>>;

    /// Expression evaluating to `(target_name, value)` for one parameter of
    /// layer `layer`.
    fn neuron_parameter(&self, layer: &str, parameter: ParamRef<'_>) -> Result<String>;

    /// Weight slice `[post_channel, pre_channel]` of record `key`.
    fn linear_weights(&self, key: &str, pre_channel: usize, post_channel: usize) -> Result<String>;

    /// Kernel of record `key` from `channel_in` to `channel_out`.
    fn conv2d_weights(&self, key: &str, channel_in: usize, channel_out: usize) -> Result<String>;

    /// A module attribute such as `padding` or `kernel_size`.
    fn module_attribute(&self, key: &str, attribute: &str) -> Result<String> {
        Err(Error::NotSupported(format!(
            "module attribute '{attribute}' of '{key}' in this context"
        )))
    }

    /// Imports the context's expressions rely on.
    fn imports(&self) -> Vec<String> {
        Vec::new()
    }

    /// Top-level code the context's expressions rely on.
    fn preambles(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Layer-name → record-name join table. Unmapped names are record names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordMap {
    map: BTreeMap<String, String>,
}

impl RecordMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, layer: impl Into<String>, record: impl Into<String>) {
        self.map.insert(layer.into(), record.into());
    }

    pub fn record<'a>(&'a self, key: &'a str) -> &'a str {
        self.map.get(key).map(String::as_str).unwrap_or(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RecordMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = RecordMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

fn quoted(s: &str) -> String {
    Literal::str(s).to_string()
}

// ── Direct context ──────────────────────────────────────────────────────────

/// Resolves parameters from an in-memory table at emission time; the
/// program receives literals.
#[derive(Debug, Clone, Default)]
pub struct DirectContext {
    table: ParameterTable,
    records: RecordMap,
}

impl DirectContext {
    pub fn new(table: ParameterTable, records: RecordMap) -> Self {
        DirectContext { table, records }
    }

    fn record(&self, key: &str, parameter: &str) -> Result<&ParameterRecord> {
        let name = self.records.record(key);
        self.table.get(name).ok_or_else(|| Error::MissingParameter {
            record: name.to_string(),
            parameter: parameter.to_string(),
        })
    }

    fn value(&self, key: &str, parameter: &str) -> Result<(String, &ParamValue)> {
        let name = self.records.record(key);
        match self.table.get(name).and_then(|r| r.get(parameter)) {
            Some(v) => Ok((name.to_string(), v)),
            None => Err(Error::MissingParameter {
                record: name.to_string(),
                parameter: parameter.to_string(),
            }),
        }
    }

    fn pair(name: &str, value: &ParamValue) -> Literal {
        let m = mapping(name);
        Literal::Tuple(vec![
            Literal::str(target_name(&m, name)),
            to_literal(&value.map(&|v| m.transform.apply(v))),
        ])
    }
}

impl ParameterContext for DirectContext {
    fn parameter_names(&self, cell: &Cell) -> Result<Vec<String>> {
        let names = match cell {
            Cell::LeakyIntegrateAndFire => LIF_PARAMETERS,
            Cell::LeakyIntegrate => LI_PARAMETERS,
            Cell::IntegrateAndFire => IF_PARAMETERS,
        };
        Ok(names.iter().map(|s| s.to_string()).collect())
    }

    fn neuron_parameter(&self, layer: &str, parameter: ParamRef<'_>) -> Result<String> {
        match parameter {
            ParamRef::Name(name) => {
                let (_, value) = self.value(layer, name)?;
                Ok(Self::pair(name, value).to_string())
            }
            ParamRef::Var(var) => {
                let record = self.record(layer, var)?;
                let entries = record
                    .iter()
                    .filter(|(name, _)| PARAMETER_MAP.iter().any(|m| m.source == name.as_str()))
                    .map(|(name, value)| (Literal::str(name.as_str()), Self::pair(name, value)))
                    .collect();
                Ok(format!("{}[{var}]", Literal::Dict(entries)))
            }
        }
    }

    fn linear_weights(&self, key: &str, pre_channel: usize, post_channel: usize) -> Result<String> {
        let (record, weight) = self.value(key, "weight")?;
        let index = [post_channel, pre_channel];
        weight
            .index(&index)
            .map(|w| to_literal(w).to_string())
            .ok_or_else(|| Error::WeightIndex {
                record: record.clone(),
                index: index.to_vec(),
            })
    }

    fn conv2d_weights(&self, key: &str, channel_in: usize, channel_out: usize) -> Result<String> {
        let (record, weight) = self.value(key, "weight")?;
        let index = [channel_out, channel_in];
        weight
            .index(&index)
            .map(|w| to_literal(w).to_string())
            .ok_or_else(|| Error::WeightIndex {
                record: record.clone(),
                index: index.to_vec(),
            })
    }

    fn module_attribute(&self, key: &str, attribute: &str) -> Result<String> {
        let (_, value) = self.value(key, attribute)?;
        Ok(to_shape_literal(value).to_string())
    }
}

fn to_literal(value: &ParamValue) -> Literal {
    match value {
        ParamValue::Scalar(x) => Literal::Float(*x),
        ParamValue::Array(items) => Literal::List(items.iter().map(to_literal).collect()),
    }
}

/// Integral values render as ints, sequences as tuples.
fn to_shape_literal(value: &ParamValue) -> Literal {
    match value {
        ParamValue::Scalar(x) if x.fract() == 0.0 && x.abs() < i64::MAX as f64 => {
            Literal::Int(*x as i64)
        }
        ParamValue::Scalar(x) => Literal::Float(*x),
        ParamValue::Array(items) => Literal::Tuple(items.iter().map(to_shape_literal).collect()),
    }
}

// ── Checkpoint context ──────────────────────────────────────────────────────

/// Defers every lookup to the generated program, which loads a Torch
/// checkpoint named by a command-line argument.
#[derive(Debug, Clone)]
pub struct CheckpointContext {
    records: RecordMap,
    state_key: String,
    argument: usize,
}

impl CheckpointContext {
    pub fn new(records: RecordMap) -> Self {
        CheckpointContext {
            records,
            state_key: "state_dict".to_string(),
            argument: 1,
        }
    }

    /// Key of the parameter mapping inside the checkpoint.
    pub fn with_state_key(mut self, key: impl Into<String>) -> Self {
        self.state_key = key.into();
        self
    }

    /// Index into `sys.argv` holding the checkpoint path.
    pub fn with_argument(mut self, argument: usize) -> Self {
        self.argument = argument;
        self
    }

    fn param_map() -> String {
        let mut out = String::from("_param_map = {\n");
        for m in PARAMETER_MAP {
            out.push_str(&format!(
                "    {}: lambda v: ({}, {}),\n",
                quoted(m.source),
                quoted(m.target),
                m.transform.python()
            ));
        }
        out.push('}');
        out
    }
}

impl ParameterContext for CheckpointContext {
    fn parameter_names(&self, cell: &Cell) -> Result<Vec<String>> {
        match cell {
            Cell::LeakyIntegrateAndFire => Ok(LIF_PARAMETERS.iter().map(|s| s.to_string()).collect()),
            Cell::LeakyIntegrate => Ok(LI_PARAMETERS.iter().map(|s| s.to_string()).collect()),
            Cell::IntegrateAndFire => Err(Error::UnsupportedCellKind(cell.to_string())),
        }
    }

    fn neuron_parameter(&self, layer: &str, parameter: ParamRef<'_>) -> Result<String> {
        let record = quoted(self.records.record(layer));
        let name = match parameter {
            ParamRef::Name(n) => quoted(n),
            ParamRef::Var(v) => v.to_string(),
        };
        Ok(format!("_param_map[{name}](_params[{record}][{name}])"))
    }

    fn linear_weights(&self, key: &str, pre_channel: usize, post_channel: usize) -> Result<String> {
        Ok(format!(
            "_params[{}][{post_channel}, {pre_channel}]",
            quoted(self.records.record(key))
        ))
    }

    fn conv2d_weights(&self, key: &str, _channel_in: usize, _channel_out: usize) -> Result<String> {
        Err(Error::NotSupported(format!(
            "convolution weights ('{key}') from a checkpoint"
        )))
    }

    fn imports(&self) -> Vec<String> {
        vec!["import sys".to_string(), "import torch".to_string()]
    }

    fn preambles(&self) -> Vec<String> {
        vec![format!(
            "_checkpoint = torch.load(sys.argv[{}])\n_params = _checkpoint[{}]\n\n{}",
            self.argument,
            quoted(&self.state_key),
            Self::param_map()
        )]
    }
}
