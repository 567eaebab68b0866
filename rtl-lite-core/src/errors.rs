use thiserror::Error;

/// Runtime failures raised by the data model and the simulation kernel.
#[derive(Debug, Error)]
pub enum SimError {
    /// Bit-vector value escaped its `[min, max)` range.
    #[error("value {value} outside range [{min}, {max})")]
    BoundsViolation { value: i128, min: i128, max: i128 },

    /// Slice assignment value does not fit the slice width.
    #[error("slice [{hi}:{lo}] cannot hold {value}")]
    SliceOverflow { hi: u32, lo: u32, value: i128 },

    /// Write against a signal of an incompatible kind.
    #[error("signal '{signal}': expected {expected}, got {got}")]
    TypeMismatch {
        signal: String,
        expected: &'static str,
        got: &'static str,
    },

    /// Write to a constant signal.
    #[error("constant '{0}' cannot be assigned")]
    PermissionDenied(String),

    /// Write to a shadow (slice) signal.
    #[error("shadow signal '{0}' is read-only")]
    ShadowWrite(String),

    /// Two processes drive the same registered signal.
    #[error("signal '{0}' has multiple drivers")]
    DriveConflict(String),

    /// A block function registered neither processes nor sub-blocks.
    #[error("block '{0}' produced no processes or sub-blocks")]
    BlockContractViolation(String),

    /// Instance name reused within one parent block.
    #[error("instance name '{0}' already used in this block")]
    DuplicateInstance(String),

    /// Memory elements disagree on kind or width.
    #[error("memory '{name}': {reason}")]
    InconsistentMemory { name: String, reason: String },

    /// `always_comb` body reads no signals.
    #[error("cannot infer sensitivity: process reads no signals")]
    SensitivityInference,

    /// Reference to a name the interpreter cannot resolve.
    #[error("unresolved {kind} reference: {name}")]
    Unresolved { kind: &'static str, name: String },

    /// Division or modulo by zero during body execution.
    #[error("division by zero")]
    DivisionByZero,

    /// A `Stmt::Assert` failed during simulation.
    #[error("assertion failed: {0}")]
    AssertionFailed(String),

    /// The installed trace sink failed to write.
    #[error("trace sink failure: {0}")]
    Trace(#[source] std::io::Error),

    /// Sentinel raised by user code to end the run. Not an error to the
    /// caller; `Simulation::run` maps it to `RunOutcome::Stopped`.
    #[error("simulation stopped")]
    Stop,
}

impl SimError {
    /// True for the stop sentinel, which ends a run without failing it.
    pub fn is_stop(&self) -> bool {
        matches!(self, SimError::Stop)
    }
}
