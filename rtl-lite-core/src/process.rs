//! Processes, triggers and waiters.
//!
//! A process is a resumable state machine: each `step` runs until it
//! yields the trigger that should wake it next. Tree-bodied processes
//! (`always*`) are driven by kernel-owned runners in the scheduler; the
//! `Process` trait is the seam for free-running testbench instances.

use serde::{Deserialize, Serialize};

use crate::design::Design;
use crate::errors::SimError;
use crate::signal::SignalId;
use crate::value::Val;

/// Handle into the scheduler's process table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcId(pub u32);

/// Handle into the scheduler's waiter table. One waiter per process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WaiterId(pub u32);

/// Entry in a signal's waiter list. The epoch stamps the arming; a
/// waiter that has re-armed since leaves stale entries behind, which the
/// scheduler drops when it collects them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaiterEntry {
    pub waiter: WaiterId,
    pub epoch: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeKind {
    Pos,
    Neg,
}

/// Clock edge specification for `always_seq`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockEdge {
    pub kind: EdgeKind,
    pub sig: SignalId,
}

impl ClockEdge {
    pub fn pos(sig: SignalId) -> ClockEdge {
        ClockEdge {
            kind: EdgeKind::Pos,
            sig,
        }
    }

    pub fn neg(sig: SignalId) -> ClockEdge {
        ClockEdge {
            kind: EdgeKind::Neg,
            sig,
        }
    }
}

/// Asynchronous or synchronous reset specification for `always_seq`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reset {
    pub sig: SignalId,
    /// Level at which the reset is asserted.
    pub active: bool,
    pub is_async: bool,
}

/// What a process yields to be re-armed on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Trigger {
    /// Wake after a simulated-time delay.
    Delay(u64),
    /// Any event on one signal.
    Signal(SignalId),
    /// Any event on any of the signals.
    SignalList(Vec<SignalId>),
    /// A specific edge on one signal.
    Edge(EdgeKind, SignalId),
    /// Any of the listed edges.
    EdgeList(Vec<(EdgeKind, SignalId)>),
    /// All sub-triggers must fire (join).
    All(Vec<Trigger>),
    /// First sub-trigger wins (or).
    Any(Vec<Trigger>),
}

/// Outcome of stepping a process.
pub enum StepResult {
    /// Park on the trigger.
    Yield(Trigger),
    /// Process finished normally; never runs again.
    Done,
    /// Stop the whole simulation.
    Stop,
}

/// Signal access handed to a stepping process.
pub struct ProcIo<'a> {
    pub(crate) design: &'a mut Design,
    pub(crate) now: u64,
    pub(crate) siglist: &'a mut Vec<SignalId>,
}

impl ProcIo<'_> {
    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn read(&self, sig: SignalId) -> Val {
        self.design.signal(sig).val().clone()
    }

    /// Queue a next value for delivery in the coming delta cycle.
    pub fn set_next(&mut self, sig: SignalId, val: Val) -> Result<(), SimError> {
        let s = self.design.signal_mut(sig);
        s.set_next(val)?;
        if !s.queued {
            s.queued = true;
            self.siglist.push(sig);
        }
        Ok(())
    }
}

/// A free-running cooperative process (testbench stimulus, clock
/// generators, monitors). Implementations must yield in bounded work.
pub trait Process {
    fn step(&mut self, io: &mut ProcIo<'_>) -> Result<StepResult, SimError>;
}

/// Scheduler-side record of a parked process.
pub(crate) struct Waiter {
    pub proc: ProcId,
    /// Bumped on every re-arm; stale list entries carry older epochs.
    pub epoch: u64,
    /// Fired this delta, not yet stepped. Stale entries with the current
    /// epoch are skipped through this flag.
    pub has_run: bool,
    /// Outstanding sub-triggers of an `All` join; 0 when not joining.
    pub join_remaining: u32,
}

impl Waiter {
    pub fn new(proc: ProcId) -> Waiter {
        Waiter {
            proc,
            epoch: 0,
            has_run: false,
            join_remaining: 0,
        }
    }

    /// Begin a new arming: invalidate every stale list entry.
    pub fn rearm(&mut self) -> u64 {
        self.epoch += 1;
        self.has_run = false;
        self.join_remaining = 0;
        self.epoch
    }
}
