//! Signals: dual-valued storage cells with waiter lists.
//!
//! Signals live in the design's arena and are addressed by `SignalId`.
//! Shadow slice signals reference their parent by id, so there are no
//! ownership cycles; delayed signals keep the in-flight state needed for
//! inertial cancellation.

use serde::{Deserialize, Serialize};

use crate::errors::SimError;
use crate::process::{ProcId, WaiterEntry};
use crate::value::{setter_for, NextSetter, SignalKind, Val};

/// Handle into the design's signal arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SignalId(pub u32);

impl SignalId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// How a signal is driven, once analysis has decided.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Drive {
    /// Driven from a clocked or procedural block; at most one driver.
    Reg,
    /// Continuously assigned.
    Wire,
}

/// Slice view of a parent signal.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ShadowRange {
    pub parent: SignalId,
    pub hi: u32,
    pub lo: u32,
}

/// In-flight state of a delayed signal.
#[derive(Clone, Debug)]
pub struct DelayState {
    pub delay: u64,
    /// Last effective next value, used to detect a fresh write.
    pub next_z: Val,
    /// Stamp of the latest effective write; stale applies are dropped.
    pub stamp: u64,
}

#[derive(Clone, Debug)]
pub enum SignalFlavor {
    Normal,
    /// Rejects every write.
    Constant,
    /// Read-only slice of a parent signal.
    Shadow(ShadowRange),
    /// Commits through the future-event queue after a delay.
    Delayed(DelayState),
}

/// Result of draining one signal's pending update.
pub(crate) enum UpdateResult {
    /// Value committed (or unchanged); waiters to wake.
    Woken {
        waiters: Vec<WaiterEntry>,
        changed: bool,
    },
    /// Delayed signal: schedule an apply at `now + delay`.
    Schedule { val: Val, stamp: u64, delay: u64 },
}

pub struct Signal {
    val: Val,
    next: Val,
    init: Val,
    kind: SignalKind,
    setter: NextSetter,
    pub flavor: SignalFlavor,
    /// Name in the declaring scope.
    pub name: Option<String>,
    /// Path-qualified name, assigned by `Design::finalize`.
    pub abs_name: Option<String>,
    /// Short identifier in the trace output, assigned at trace setup.
    pub vcd_code: Option<String>,
    pub driven: Option<Drive>,
    pub driver: Option<ProcId>,
    pub read: bool,
    pub used: bool,
    /// Member of a memory (list of signals).
    pub in_list: bool,
    /// Shadow slices derived from this signal.
    pub shadows: Vec<SignalId>,
    pub(crate) event_waiters: Vec<WaiterEntry>,
    pub(crate) posedge_waiters: Vec<WaiterEntry>,
    pub(crate) negedge_waiters: Vec<WaiterEntry>,
    /// Already queued in the current delta's update list.
    pub(crate) queued: bool,
}

impl Signal {
    pub fn new(init: Val) -> Signal {
        let kind = init.kind();
        Signal {
            val: init.clone(),
            next: init.clone(),
            init,
            kind,
            setter: setter_for(kind),
            flavor: SignalFlavor::Normal,
            name: None,
            abs_name: None,
            vcd_code: None,
            driven: None,
            driver: None,
            read: false,
            used: false,
            in_list: false,
            shadows: Vec::new(),
            event_waiters: Vec::new(),
            posedge_waiters: Vec::new(),
            negedge_waiters: Vec::new(),
            queued: false,
        }
    }

    pub fn new_delayed(init: Val, delay: u64) -> Signal {
        let mut s = Signal::new(init.clone());
        s.flavor = SignalFlavor::Delayed(DelayState {
            delay,
            next_z: init,
            stamp: 0,
        });
        s
    }

    pub fn new_constant(init: Val) -> Signal {
        let mut s = Signal::new(init);
        s.flavor = SignalFlavor::Constant;
        s
    }

    pub(crate) fn new_shadow(init: Val, range: ShadowRange) -> Signal {
        let mut s = Signal::new(init);
        s.flavor = SignalFlavor::Shadow(range);
        s
    }

    pub fn val(&self) -> &Val {
        &self.val
    }

    pub fn kind(&self) -> SignalKind {
        self.kind
    }

    pub fn init(&self) -> &Val {
        &self.init
    }

    pub fn nrbits(&self) -> u32 {
        self.val.nrbits()
    }

    fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| "<anonymous>".into())
    }

    /// Queue a next value. Returns an error for constants and shadows;
    /// the caller is responsible for entering the signal into the
    /// current delta's update list.
    pub fn set_next(&mut self, val: Val) -> Result<(), SimError> {
        match self.flavor {
            SignalFlavor::Constant => Err(SimError::PermissionDenied(self.display_name())),
            SignalFlavor::Shadow(_) => Err(SimError::ShadowWrite(self.display_name())),
            _ => {
                let name = self.display_name();
                (self.setter)(&mut self.next, val, &name)
            }
        }
    }

    /// Kernel path for shadow followers; skips the flavor gate.
    pub(crate) fn set_next_internal(&mut self, val: Val) -> Result<(), SimError> {
        let name = self.display_name();
        (self.setter)(&mut self.next, val, &name)
    }

    /// Direct access to the pending slice target for `v[hi:lo] = x`
    /// style assignments.
    pub(crate) fn next_mut(&mut self) -> &mut Val {
        &mut self.next
    }

    pub(crate) fn pending(&self) -> &Val {
        &self.next
    }

    /// One-shot delta update: commit `next` and collect the waiters to
    /// wake, honouring edge lists on bit transitions.
    pub(crate) fn update(&mut self, now: u64) -> UpdateResult {
        self.queued = false;
        if let SignalFlavor::Delayed(ref mut ds) = self.flavor {
            if self.next != ds.next_z {
                ds.stamp = now;
            }
            ds.next_z = self.next.clone();
            return UpdateResult::Schedule {
                val: self.next.clone(),
                stamp: ds.stamp,
                delay: ds.delay,
            };
        }
        if self.val != self.next {
            let waiters = self.take_woken(self.next.clone());
            self.val = self.next.clone();
            UpdateResult::Woken {
                waiters,
                changed: true,
            }
        } else {
            UpdateResult::Woken {
                waiters: Vec::new(),
                changed: false,
            }
        }
    }

    /// Delayed-signal commit, fired from the future-event queue. Stale
    /// stamps are ignored, which gives inertial cancellation: only the
    /// latest effective write lands.
    pub(crate) fn apply(&mut self, nextval: Val, stamp: u64) -> (Vec<WaiterEntry>, bool) {
        let cur_stamp = match self.flavor {
            SignalFlavor::Delayed(ref ds) => ds.stamp,
            _ => return (Vec::new(), false),
        };
        if stamp == cur_stamp && self.val != nextval {
            let waiters = self.take_woken(nextval.clone());
            self.val = nextval;
            (waiters, true)
        } else {
            (Vec::new(), false)
        }
    }

    /// Snapshot the waiter lists for a transition to `nextval`: the
    /// event list always fires, edge lists only on the matching bit
    /// transition. The fired lists are cleared; later re-arms do not
    /// retroactively unwake anyone.
    fn take_woken(&mut self, nextval: Val) -> Vec<WaiterEntry> {
        let mut waiters = std::mem::take(&mut self.event_waiters);
        let was = self.val.is_truthy();
        let is = nextval.is_truthy();
        if !was && is {
            waiters.append(&mut self.posedge_waiters);
        } else if was && !is {
            waiters.append(&mut self.negedge_waiters);
        }
        waiters
    }

    /// Reset runtime state between elaborations. `used` survives, as it
    /// describes the design rather than one run.
    pub fn clear(&mut self) {
        self.val = self.init.clone();
        self.next = self.init.clone();
        self.event_waiters.clear();
        self.posedge_waiters.clear();
        self.negedge_waiters.clear();
        self.driven = None;
        self.driver = None;
        self.read = false;
        self.queued = false;
        self.vcd_code = None;
        if let SignalFlavor::Delayed(ref mut ds) = self.flavor {
            ds.next_z = self.init.clone();
            ds.stamp = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitvec::bitvec;

    #[test]
    fn update_commits_next() {
        let mut s = Signal::new(Val::Bit(false));
        s.set_next(Val::Bit(true)).unwrap();
        match s.update(0) {
            UpdateResult::Woken { changed, .. } => assert!(changed),
            _ => panic!("not a delayed signal"),
        }
        assert_eq!(*s.val(), Val::Bit(true));
    }

    #[test]
    fn update_without_change_wakes_nobody() {
        let mut s = Signal::new(Val::Bit(false));
        s.set_next(Val::Bit(false)).unwrap();
        match s.update(0) {
            UpdateResult::Woken { waiters, changed } => {
                assert!(waiters.is_empty());
                assert!(!changed);
            }
            _ => panic!("not a delayed signal"),
        }
    }

    #[test]
    fn constant_rejects_writes() {
        let mut s = Signal::new_constant(Val::Int(42));
        assert!(matches!(
            s.set_next(Val::Int(1)),
            Err(SimError::PermissionDenied(_))
        ));
    }

    #[test]
    fn vec_signal_checks_bounds_on_write() {
        let mut s = Signal::new(Val::Vec(bitvec(0, 0, 8).unwrap()));
        s.set_next(Val::Int(7)).unwrap();
        assert!(s.set_next(Val::Int(8)).is_err());
    }

    #[test]
    fn delayed_update_schedules_apply() {
        let mut s = Signal::new_delayed(Val::Bit(false), 10);
        s.set_next(Val::Bit(true)).unwrap();
        match s.update(3) {
            UpdateResult::Schedule { stamp, delay, .. } => {
                assert_eq!(stamp, 3);
                assert_eq!(delay, 10);
            }
            _ => panic!("delayed signal must schedule"),
        }
        // a later write supersedes: the old stamp no longer applies
        s.set_next(Val::Bit(false)).unwrap();
        let _ = s.update(5);
        let (woken, changed) = s.apply(Val::Bit(true), 3);
        assert!(woken.is_empty());
        assert!(!changed);
        let (_, changed) = s.apply(Val::Bit(false), 5);
        assert!(!changed); // value never moved off false
    }

    #[test]
    fn clear_restores_init() {
        let mut s = Signal::new(Val::Int(3));
        s.set_next(Val::Int(9)).unwrap();
        let _ = s.update(0);
        s.clear();
        assert_eq!(*s.val(), Val::Int(3));
    }
}
