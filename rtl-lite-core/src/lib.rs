//! rtl-lite-core: behavioural hardware models and an event-driven
//! simulation kernel.
//!
//! Digital logic is described as a block hierarchy of signals and
//! processes. Process bodies are explicit behavioural trees ([`ast`])
//! interpreted by the kernel; the same trees are what the converter
//! crate analyses and emits as HDL. Simulation is single-threaded and
//! cooperative: signals commit through next-value cells in delta
//! cycles, and waiters fire in registration order.

pub mod ast;
pub mod bitvec;
pub mod design;
pub mod errors;
mod exec;
pub mod process;
pub mod sched;
pub mod signal;
pub mod trace;
pub mod value;

pub use bitvec::{bitvec, fixbv, modbv, BitVec, FixBitVec};
pub use design::{Block, BlockId, Ctx, Design, Memory, ProcDecl, ProcKind, Rom, SymEntry};
pub use errors::SimError;
pub use process::{
    ClockEdge, EdgeKind, ProcId, ProcIo, Process, Reset, StepResult, Trigger, WaiterId,
};
pub use sched::{RunOutcome, Simulation};
pub use signal::{Drive, Signal, SignalFlavor, SignalId};
pub use trace::{Tracer, VcdWriter};
pub use value::{EnumEncoding, EnumType, EnumTypeId, EnumVal, SignalKind, Val};
