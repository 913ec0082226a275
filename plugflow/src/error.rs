use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum EngineError {
    #[error("Cannot set value for read-only plug \"{0}\"")]
    ReadOnlyPlug(String),
    #[error("Plug \"{plug}\" is not settable: {reason}")]
    NotSettable { plug: String, reason: String },
    #[error("Cannot set value for plug \"{0}\" except during computation")]
    ResultOutsideComputation(String),
    #[error("Cannot set value for plug \"{plug}\" during computation for plug \"{computing}\"")]
    ResultForWrongPlug { plug: String, computing: String },
    #[error("Value for plug \"{0}\" was already set during this computation")]
    ResultAlreadySet(String),
    #[error("Compute did not set plug value for \"{0}\"")]
    ComputeDidNotSetValue(String),
    #[error("ComputeNode::hash() not implemented for \"{0}\"")]
    HashNotImplemented(String),
    #[error("Plug \"{0}\" has no compute node")]
    NoComputeNode(String),
    #[error("Type mismatch for plug \"{plug}\": expected {expected}, got {got}")]
    TypeMismatch {
        plug: String,
        expected: String,
        got: String,
    },
    #[error("Plug \"{0}\" does not hold a value")]
    NotAValuePlug(String),
    #[error("Connection rejected: {0}")]
    ConnectionRejected(String),
    #[error("Unknown plug: {0}")]
    UnknownPlug(String),
    #[error("Unknown node: {0}")]
    UnknownNode(String),
    #[error("Computation cancelled")]
    Cancelled,
    #[error("Compute error: {0}")]
    Compute(String),
    #[error("{plug} : {source}")]
    Process {
        plug: String,
        #[source]
        source: Box<EngineError>,
    },
    #[error("Rendering error: {0}")]
    Render(String),
    #[error("JSON parsing error: {0}")]
    Json(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(String),
}

impl EngineError {
    pub fn compute(message: impl Into<String>) -> Self {
        EngineError::Compute(message.into())
    }

    pub fn render(message: impl Into<String>) -> Self {
        EngineError::Render(message.into())
    }

    /// True for `Cancelled`, including when wrapped by a process error.
    pub fn is_cancellation(&self) -> bool {
        match self {
            EngineError::Cancelled => true,
            EngineError::Process { source, .. } => source.is_cancellation(),
            _ => false,
        }
    }

    /// Attaches the name of the plug whose process failed first. Errors that
    /// were already wrapped further upstream, and cancellation, pass through.
    pub(crate) fn in_process(self, plug: impl FnOnce() -> String) -> Self {
        match self {
            EngineError::Cancelled | EngineError::Process { .. } => self,
            other => EngineError::Process {
                plug: plug(),
                source: Box::new(other),
            },
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Json(err.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io(err.to_string())
    }
}
