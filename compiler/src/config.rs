// config.rs — Compile configuration (JSON)
//
// Everything lowering and emission need beyond the listing: the input and
// output layers, the electrical synapse type, which parameter context to bind
// and the simulation settings. Every field has a default, so `{}` is a valid
// configuration.
//
// Preconditions: none.
// Postconditions: `validate` passed for configurations returned by `load` and
//   `from_json`.
// Failure modes: `Json` for malformed input, `Config` for invalid values,
//   `Io` when the file cannot be read.
// Side effects: `load` reads a file.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::codegen::SimulationOptions;
use crate::context::{CheckpointContext, DirectContext, ParameterContext};
use crate::error::{Error, Result};
use crate::ir::{InputLayer, InputSource, OutputLayer, SynapseType};
use crate::lower::{LowerOptions, LowerResult};

/// Which parameter context the emitted program is bound to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContextConfig {
    /// Values from the listing, written into the program as literals.
    Direct {
        /// Extra layer → record entries, overriding the lowered ones.
        #[serde(default)]
        records: BTreeMap<String, String>,
    },
    /// Values looked up in a Torch checkpoint when the program runs.
    Checkpoint {
        #[serde(default)]
        records: BTreeMap<String, String>,
        #[serde(default = "default_state_key")]
        state_key: String,
        /// `sys.argv` index of the checkpoint path.
        #[serde(default = "default_argument")]
        argument: usize,
    },
}

fn default_state_key() -> String {
    "state_dict".to_string()
}

fn default_argument() -> usize {
    1
}

impl Default for ContextConfig {
    fn default() -> Self {
        ContextConfig::Direct {
            records: BTreeMap::new(),
        }
    }
}

impl ContextConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            ContextConfig::Direct { .. } => "direct",
            ContextConfig::Checkpoint { .. } => "checkpoint",
        }
    }

    pub fn records_mut(&mut self) -> &mut BTreeMap<String, String> {
        match self {
            ContextConfig::Direct { records } | ContextConfig::Checkpoint { records, .. } => {
                records
            }
        }
    }

    /// Build the context for one lowering result.
    pub fn bind(&self, lowered: &LowerResult) -> Box<dyn ParameterContext> {
        match self {
            ContextConfig::Direct { records } => {
                let mut map = lowered.records.clone();
                for (layer, record) in records {
                    map.insert(layer.as_str(), record.as_str());
                }
                Box::new(DirectContext::new(lowered.parameters.clone(), map))
            }
            ContextConfig::Checkpoint {
                records,
                state_key,
                argument,
            } => {
                let mut map = lowered.records.clone();
                for (layer, record) in records {
                    map.insert(layer.as_str(), record.as_str());
                }
                Box::new(
                    CheckpointContext::new(map)
                        .with_state_key(state_key.as_str())
                        .with_argument(*argument),
                )
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileConfig {
    pub input: InputLayer,
    pub output: Option<OutputLayer>,
    pub synapse_type: SynapseType,
    pub context: ContextConfig,
    pub simulation: SimulationOptions,
}

impl Default for CompileConfig {
    fn default() -> Self {
        CompileConfig {
            input: InputLayer {
                name: "input".to_string(),
                channels: 1,
                source: InputSource::SpifRetina {
                    x: 32,
                    y: 32,
                    x_sub: 32,
                    y_sub: 32,
                    x_shift: 0,
                    y_shift: 0,
                },
            },
            output: None,
            synapse_type: SynapseType::Current,
            context: ContextConfig::default(),
            simulation: SimulationOptions::default(),
        }
    }
}

impl CompileConfig {
    pub fn from_json(source: &str) -> Result<Self> {
        let config: CompileConfig = serde_json::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_json(&source)
    }

    pub fn validate(&self) -> Result<()> {
        if self.input.channels == 0 {
            return Err(Error::Config("input.channels must be at least 1".into()));
        }
        if self.output.as_ref().is_some_and(|o| o.channels == 0) {
            return Err(Error::Config("output.channels must be at least 1".into()));
        }
        let (x, y) = self.input.source.shape();
        if x.checked_mul(y).is_none() {
            return Err(Error::Config(format!("input geometry {x}x{y} is too large")));
        }
        let names = std::iter::once(&self.input.name).chain(self.output.as_ref().map(|o| &o.name));
        for name in names {
            if name.chars().any(char::is_control) {
                return Err(Error::Config(format!(
                    "layer name {name:?} contains control characters"
                )));
            }
        }
        let sim = &self.simulation;
        if sim.timestep.is_nan() || sim.timestep <= 0.0 {
            return Err(Error::Config(format!(
                "simulation.timestep must be positive, got {}",
                sim.timestep
            )));
        }
        if sim.runtime.is_nan() || sim.runtime < 0.0 {
            return Err(Error::Config(format!(
                "simulation.runtime must not be negative, got {}",
                sim.runtime
            )));
        }
        Ok(())
    }

    pub fn lower_options(&self) -> LowerOptions {
        LowerOptions {
            synapse_type: self.synapse_type,
        }
    }

    /// Add `layer=record` overrides, e.g. from the command line.
    pub fn with_records<I>(mut self, records: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.context.records_mut().extend(records);
        self
    }
}
