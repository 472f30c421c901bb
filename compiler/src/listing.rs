// listing.rs — Module listing produced by model introspection
//
// The flat, ordered view of a trained model that lowering consumes: one
// descriptor per module with its class tag, declared output shape, and the
// named parameters read from the underlying module. Listings come from the
// text format (see `parser`) or from JSON.
//
// Preconditions: none.
// Postconditions: positions are unique and iterate in ascending order.
// Failure modes: duplicate positions, malformed JSON.
// Side effects: `load` reads a file.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Class tags of modules that pass activity through unchanged.
pub const PASSTHROUGH: &[&str] = &[
    "batchnorm1d",
    "batchnorm2d",
    "sequentialstate",
    "identity",
    "dropout",
    "flatten",
];

/// A scalar or (nested) array parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Scalar(f64),
    Array(Vec<ParamValue>),
}

impl ParamValue {
    /// Apply `f` to every scalar.
    pub fn map(&self, f: &impl Fn(f64) -> f64) -> ParamValue {
        match self {
            ParamValue::Scalar(x) => ParamValue::Scalar(f(*x)),
            ParamValue::Array(items) => ParamValue::Array(items.iter().map(|v| v.map(f)).collect()),
        }
    }

    /// Follow `index` through nested arrays.
    pub fn index(&self, index: &[usize]) -> Option<&ParamValue> {
        index.iter().try_fold(self, |v, &i| match v {
            ParamValue::Array(items) => items.get(i),
            ParamValue::Scalar(_) => None,
        })
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            ParamValue::Scalar(x) => Some(*x),
            ParamValue::Array(_) => None,
        }
    }
}

/// One module as reported by the introspection tool.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub class_name: String,
    /// Declared output shape, batch first.
    pub output_size: Vec<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<ParamValue>,
    /// Module attributes such as `padding` or `kernel_size`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, ParamValue>,
    /// Fields of the cell-parameter tuple, for neuron modules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<BTreeMap<String, ParamValue>>,
}

impl ModuleDescriptor {
    pub fn new(class_name: impl Into<String>, output_size: Vec<usize>) -> Self {
        ModuleDescriptor {
            class_name: class_name.into(),
            output_size,
            ..Default::default()
        }
    }

    pub fn with_weight(mut self, weight: ParamValue) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: ParamValue) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: ParamValue) -> Self {
        self.parameters
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), value);
        self
    }

    /// Lower-cased class tag used for dispatch.
    pub fn tag(&self) -> String {
        self.class_name.to_lowercase()
    }

    pub fn has_parameter(&self, name: &str) -> bool {
        self.parameters
            .as_ref()
            .is_some_and(|p| p.contains_key(name))
    }
}

/// JSON form of one listing row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingEntry {
    pub position: usize,
    #[serde(flatten)]
    pub module: ModuleDescriptor,
}

/// Ordered mapping from position to module descriptor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleListing {
    modules: BTreeMap<usize, ModuleDescriptor>,
}

impl ModuleListing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, position: usize, module: ModuleDescriptor) -> Result<()> {
        if self.modules.contains_key(&position) {
            return Err(Error::DuplicatePosition(position));
        }
        self.modules.insert(position, module);
        Ok(())
    }

    pub fn from_entries<I: IntoIterator<Item = ListingEntry>>(entries: I) -> Result<Self> {
        let mut listing = ModuleListing::new();
        for entry in entries {
            listing.insert(entry.position, entry.module)?;
        }
        Ok(listing)
    }

    pub fn from_json(source: &str) -> Result<Self> {
        let entries: Vec<ListingEntry> = serde_json::from_str(source)?;
        Self::from_entries(entries)
    }

    pub fn to_json(&self) -> Result<String> {
        let entries: Vec<ListingEntry> = self
            .iter()
            .map(|(position, module)| ListingEntry {
                position,
                module: module.clone(),
            })
            .collect();
        Ok(serde_json::to_string_pretty(&entries)?)
    }

    /// Load a listing file: `.json` as JSON, anything else as the text form.
    pub fn load(path: &Path) -> Result<(Self, String)> {
        let source = std::fs::read_to_string(path)?;
        let listing = if path.extension().is_some_and(|e| e == "json") {
            Self::from_json(&source)?
        } else {
            crate::parser::parse_listing(&source)?
        };
        Ok((listing, source))
    }

    /// Drop the position-0 model row and passthrough modules.
    pub fn without_passthrough(&self) -> Self {
        let modules = self
            .modules
            .iter()
            .filter(|(pos, m)| **pos != 0 && !PASSTHROUGH.contains(&m.tag().as_str()))
            .map(|(pos, m)| (*pos, m.clone()))
            .collect();
        ModuleListing { modules }
    }

    pub fn get(&self, position: usize) -> Option<&ModuleDescriptor> {
        self.modules.get(&position)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &ModuleDescriptor)> {
        self.modules.iter().map(|(p, m)| (*p, m))
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_position_rejected() {
        let mut l = ModuleListing::new();
        l.insert(1, ModuleDescriptor::new("Linear", vec![1, 4]))
            .unwrap();
        let err = l
            .insert(1, ModuleDescriptor::new("LIFCell", vec![1, 4]))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicatePosition(1)));
    }

    #[test]
    fn passthrough_filter() {
        let mut l = ModuleListing::new();
        l.insert(0, ModuleDescriptor::new("SequentialState", vec![1, 4]))
            .unwrap();
        l.insert(1, ModuleDescriptor::new("Conv2d", vec![1, 4, 8, 8]))
            .unwrap();
        l.insert(2, ModuleDescriptor::new("BatchNorm2d", vec![1, 4, 8, 8]))
            .unwrap();
        l.insert(3, ModuleDescriptor::new("LIFCell", vec![1, 4, 8, 8]))
            .unwrap();
        let f = l.without_passthrough();
        let positions: Vec<usize> = f.iter().map(|(p, _)| p).collect();
        assert_eq!(positions, vec![1, 3]);
    }

    #[test]
    fn json_listing() {
        let src = r#"[
            {"position": 2, "class_name": "LIFCell", "output_size": [1, 10],
             "parameters": {"v_th": 1.0}},
            {"position": 1, "class_name": "Linear", "output_size": [1, 10],
             "weight": [[0.5, 0.25]]}
        ]"#;
        let l = ModuleListing::from_json(src).unwrap();
        let tags: Vec<String> = l.iter().map(|(_, m)| m.tag()).collect();
        assert_eq!(tags, vec!["linear", "lifcell"]);
        assert!(l.get(2).unwrap().has_parameter("v_th"));
        assert_eq!(
            l.get(1).unwrap().weight.as_ref().unwrap().index(&[0, 1]),
            Some(&ParamValue::Scalar(0.25))
        );
    }

    #[test]
    fn param_value_map() {
        let v = ParamValue::Array(vec![ParamValue::Scalar(2.0), ParamValue::Scalar(4.0)]);
        assert_eq!(
            v.map(&|x| 1.0 / x),
            ParamValue::Array(vec![ParamValue::Scalar(0.5), ParamValue::Scalar(0.25)])
        );
        assert_eq!(v.index(&[0, 0]), None);
    }
}
