// error.rs — Error taxonomy shared by lowering, emission and the driver
//
// Every failure aborts the current lowering/emission call. There is no local
// recovery and no partial output: callers surface the error verbatim.
//
// Codes are stable once assigned:
//   E01xx  listing / lowering
//   E02xx  emission
//   E03xx  parameter contexts
//   E04xx  network invariants
//   E09xx  driver (config, I/O)

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    // ── Lowering ──
    #[error("unknown module kind '{class_name}' at position {position}")]
    UnknownModuleKind { position: usize, class_name: String },

    #[error("no connector module between the previous layer and '{layer}'")]
    MissingConnector { layer: String },

    #[error("conflicting connectors for '{layer}': '{first}' and '{second}'")]
    ConflictingConnectors {
        layer: String,
        first: String,
        second: String,
    },

    #[error("connector modules after the last neuron layer are never consumed (positions {positions:?})")]
    UnconsumedModules { positions: Vec<usize> },

    #[error("unsupported output shape {shape:?} at position {position}")]
    InvalidShape { position: usize, shape: Vec<usize> },

    #[error("duplicate listing position {0}")]
    DuplicatePosition(usize),

    #[error("listing syntax error: {0}")]
    Listing(String),

    // ── Emission ──
    // Reserved: the IR enums are closed, so neither kind can be constructed.
    #[error("unknown layer kind: {0}")]
    UnknownLayerKind(String),

    #[error("unknown connector kind: {0}")]
    UnknownConnectorKind(String),

    #[error("unsupported layer kind: {0}")]
    UnsupportedLayerKind(String),

    #[error("unsupported connector kind: {0}")]
    UnsupportedConnectorKind(String),

    #[error("unknown input source: {0}")]
    UnknownInputSource(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("parameter key must be a string, got {0}")]
    NonStringKey(String),

    // ── Parameter contexts ──
    #[error("unsupported cell kind: {0}")]
    UnsupportedCellKind(String),

    #[error("record '{record}' has no parameter '{parameter}'")]
    MissingParameter { record: String, parameter: String },

    #[error("record '{record}' has no weight slice at {index:?}")]
    WeightIndex { record: String, index: Vec<usize> },

    // ── Network invariants ──
    #[error("duplicate layer name '{0}'")]
    DuplicateLayerName(String),

    #[error("connection '{pre}' -> '{post}' is not in declaration order")]
    NotTopological { pre: String, post: String },

    #[error("first layer must be the input layer, found '{0}'")]
    MissingInputLayer(String),

    // ── Driver ──
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Stable diagnostic code, printed by the driver.
    pub fn code(&self) -> &'static str {
        match self {
            Error::UnknownModuleKind { .. } => "E0101",
            Error::MissingConnector { .. } => "E0102",
            Error::ConflictingConnectors { .. } => "E0103",
            Error::UnconsumedModules { .. } => "E0104",
            Error::InvalidShape { .. } => "E0105",
            Error::DuplicatePosition(_) => "E0106",
            Error::Listing(_) => "E0107",
            Error::UnknownLayerKind(_) => "E0201",
            Error::UnknownConnectorKind(_) => "E0202",
            Error::UnsupportedLayerKind(_) => "E0203",
            Error::UnsupportedConnectorKind(_) => "E0204",
            Error::UnknownInputSource(_) => "E0205",
            Error::NotSupported(_) => "E0206",
            Error::NonStringKey(_) => "E0207",
            Error::UnsupportedCellKind(_) => "E0301",
            Error::MissingParameter { .. } => "E0302",
            Error::WeightIndex { .. } => "E0303",
            Error::DuplicateLayerName(_) => "E0401",
            Error::NotTopological { .. } => "E0402",
            Error::MissingInputLayer(_) => "E0403",
            Error::Config(_) => "E0901",
            Error::Io(_) => "E0902",
            Error::Json(_) => "E0903",
        }
    }

    /// True for failures of the environment rather than of the model.
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Json(_) | Error::Config(_))
    }
}
