// Property-based tests for compiler invariants.
//
// Three categories:
// 1. Statement concatenation: associativity and the empty identity
// 2. Lowering invariants: generated listings lower to a valid chain with one
//    inbound connection per neuron layer, independent of insertion order, and
//    each connector follows its primitive whatever pooling surrounds it
// 3. Rejection: an unknown module anywhere fails at exactly its position
//
// Uses proptest with explicit configuration to prevent CI flakiness.

use std::collections::HashSet;

use bfc::error::Error;
use bfc::ir::{Connector, InputLayer, InputSource, Layer};
use bfc::listing::{ModuleDescriptor, ModuleListing, ParamValue};
use bfc::lower::{lower_network, LowerOptions, LowerResult};
use bfc::statement::Statement;
use proptest::prelude::*;

// ── Test helpers ────────────────────────────────────────────────────────────

fn input() -> InputLayer {
    InputLayer {
        name: "input".into(),
        channels: 1,
        source: InputSource::SpifRetina {
            x: 8,
            y: 8,
            x_sub: 8,
            y_sub: 8,
            x_shift: 0,
            y_shift: 0,
        },
    }
}

fn lower(listing: &ModuleListing) -> bfc::error::Result<LowerResult> {
    lower_network(
        &listing.without_passthrough(),
        input(),
        None,
        &LowerOptions::default(),
    )
}

/// Build a listing with position 0 reserved for the model row.
fn build(modules: &[ModuleDescriptor]) -> ModuleListing {
    let mut listing = ModuleListing::new();
    listing
        .insert(0, ModuleDescriptor::new("SequentialState", vec![1, 1]))
        .unwrap();
    for (i, m) in modules.iter().enumerate() {
        listing.insert(i + 1, m.clone()).unwrap();
    }
    listing
}

// ── Generators ──────────────────────────────────────────────────────────────

fn arb_statement() -> impl Strategy<Value = Statement> {
    (
        "[a-z =0-9]{0,8}",
        prop::collection::vec(prop_oneof![Just("import sys"), Just("import torch")], 0..3),
        prop::collection::vec(prop_oneof![Just("def f(): pass"), Just("x = 1")], 0..3),
    )
        .prop_map(|(value, imports, preambles)| {
            Statement::new(value)
                .with_imports(imports)
                .with_preambles(preambles)
        })
}

/// One connector window followed by the neuron module consuming it.
#[derive(Debug, Clone)]
struct Block {
    modules: Vec<ModuleDescriptor>,
    /// Connector the window must lower to.
    connector: &'static str,
    /// Offset in `modules` of the pooling module the connector carries.
    pooling: Option<usize>,
}

fn arb_block() -> impl Strategy<Value = Block> {
    let cell = prop_oneof![Just("LIFCell"), Just("LICell")];
    let passthrough = prop_oneof![Just("Dropout"), Just("BatchNorm2d"), Just("Flatten")];
    let pool = (prop_oneof![Just("AvgPool2d"), Just("MaxPool2d")], prop::bool::ANY);
    (
        0usize..3,
        1usize..4,
        1usize..5,
        cell,
        prop::option::of(passthrough),
        prop::collection::vec(pool, 0..=2),
    )
        .prop_map(|(primitive, channels, side, cell, filler, pools)| {
            let spatial = vec![1, channels, side, side];
            let flat = vec![1, side * side];
            let (class, connector, neuron_shape) = match primitive {
                0 => ("Conv2d", "ConvolutionConnector", spatial.clone()),
                1 => ("Dense", "DenseConnector", flat),
                _ => ("Linear", "MatrixConnector", flat),
            };

            // Pooling modules land before or after the connector primitive.
            let mut modules = Vec::new();
            let mut last_pool = None;
            for (pool, _) in pools.iter().filter(|(_, after)| !after) {
                last_pool = Some(modules.len());
                modules.push(ModuleDescriptor::new(*pool, spatial.clone()));
            }
            modules.push(ModuleDescriptor::new(class, neuron_shape.clone()));
            for (pool, _) in pools.iter().filter(|(_, after)| *after) {
                last_pool = Some(modules.len());
                modules.push(ModuleDescriptor::new(*pool, spatial.clone()));
            }
            if let Some(filler) = filler {
                modules.push(ModuleDescriptor::new(filler, neuron_shape.clone()));
            }
            modules.push(
                ModuleDescriptor::new(cell, neuron_shape)
                    .with_parameter("v_th", ParamValue::Scalar(1.0)),
            );

            let pooling = if class == "Linear" { None } else { last_pool };
            Block {
                modules,
                connector,
                pooling,
            }
        })
}

fn arb_modules() -> impl Strategy<Value = Vec<ModuleDescriptor>> {
    prop::collection::vec(arb_block(), 1..6)
        .prop_map(|blocks| blocks.into_iter().flat_map(|b| b.modules).collect())
}

fn pooling_key(connector: &Connector) -> Option<String> {
    match connector {
        Connector::Convolution { pooling_key, .. } | Connector::Dense { pooling_key, .. } => {
            pooling_key.clone()
        }
        _ => None,
    }
}

// ── Properties ──────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn statement_concat_is_associative(
        a in arb_statement(),
        b in arb_statement(),
        c in arb_statement(),
    ) {
        prop_assert_eq!(
            (a.clone() + b.clone()) + c.clone(),
            a + (b + c)
        );
    }

    #[test]
    fn empty_statement_is_identity(a in arb_statement()) {
        prop_assert_eq!(Statement::default() + a.clone(), a.clone());
        prop_assert_eq!(a.clone() + Statement::default(), a);
    }

    #[test]
    fn lowered_network_is_a_valid_chain(modules in arb_modules()) {
        let listing = build(&modules);
        let result = lower(&listing).expect("generated listing lowers");
        let network = &result.network;

        prop_assert!(network.validate().is_ok());

        let names: HashSet<&str> = network.layers.iter().map(Layer::name).collect();
        prop_assert_eq!(names.len(), network.layers.len());

        let neurons: Vec<&str> = network.neuron_layers().map(|l| l.name.as_str()).collect();
        prop_assert_eq!(network.connections.len(), neurons.len());
        for name in &neurons {
            let inbound = network
                .connections
                .iter()
                .filter(|c| c.post.name() == *name)
                .count();
            prop_assert_eq!(inbound, 1, "layer {} has {} inbound connections", name, inbound);
        }

        // Every neuron layer resolves to its own listing position.
        for layer in network.neuron_layers() {
            prop_assert_eq!(result.records.record(&layer.name), layer.index.to_string());
        }
    }

    #[test]
    fn connector_kind_follows_its_primitive(blocks in prop::collection::vec(arb_block(), 1..6)) {
        let mut modules = Vec::new();
        let mut expected = Vec::new();
        for block in blocks {
            // Listing positions start at 1.
            let pool = block.pooling.map(|offset| (modules.len() + offset + 1).to_string());
            expected.push((block.connector, pool));
            modules.extend(block.modules);
        }

        let result = lower(&build(&modules)).expect("pooling never conflicts");
        let actual: Vec<(&str, Option<String>)> = result
            .network
            .connections
            .iter()
            .map(|c| (c.connector.name(), pooling_key(&c.connector)))
            .collect();
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn lowering_is_independent_of_insertion_order(
        modules in arb_modules(),
        seed in any::<u64>(),
    ) {
        let ordered = build(&modules);

        // Insert the same rows in a scrambled order.
        let mut rows: Vec<(usize, ModuleDescriptor)> =
            ordered.iter().map(|(p, m)| (p, m.clone())).collect();
        let n = rows.len();
        for i in (1..n).rev() {
            let mixed = seed.wrapping_mul(6364136223846793005).wrapping_add(i as u64);
            let j = (mixed % (i as u64 + 1)) as usize;
            rows.swap(i, j);
        }
        let mut scrambled = ModuleListing::new();
        for (p, m) in rows {
            scrambled.insert(p, m).unwrap();
        }

        let a = lower(&ordered).expect("lowers");
        let b = lower(&scrambled).expect("lowers");
        prop_assert_eq!(a.network, b.network);
        prop_assert_eq!(a.parameters, b.parameters);
        prop_assert_eq!(a.records, b.records);
    }

    #[test]
    fn unknown_module_is_rejected_at_its_position(
        modules in arb_modules(),
        at in any::<prop::sample::Index>(),
    ) {
        let mut modules = modules;
        let i = at.index(modules.len());
        modules[i] = ModuleDescriptor::new("GRU", vec![1, 4]);
        let listing = build(&modules);

        match lower(&listing) {
            Err(Error::UnknownModuleKind { position, class_name }) => {
                prop_assert_eq!(position, i + 1);
                prop_assert_eq!(class_name, "GRU");
            }
            other => prop_assert!(false, "expected rejection, got {:?}", other.map(|r| r.network)),
        }
    }
}
