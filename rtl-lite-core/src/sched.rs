//! The event-driven simulation kernel.
//!
//! Single-threaded and cooperative: the scheduler owns all mutable state
//! while it steps a process. One iteration of `run` either executes a
//! ready waiter, drains the pending signal updates of the current delta
//! cycle, or advances time to the next scheduled event.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::ast::{visit_stmt_writes, Stmt, WriteRef};
use crate::design::{Design, ProcKind};
use crate::errors::SimError;
use crate::exec::{queue_next, ExecCtx};
use crate::process::{
    ClockEdge, EdgeKind, ProcIo, Process, Reset, StepResult, Trigger, Waiter, WaiterEntry,
    WaiterId,
};
use crate::signal::{SignalFlavor, SignalId, UpdateResult};
use crate::trace::Tracer;
use crate::value::Val;

/// Why `run` returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// The requested duration elapsed.
    DurationElapsed,
    /// Nothing left to do: no future events, no pending updates, no
    /// ready waiters.
    Quiescent,
    /// A process raised the stop sentinel.
    Stopped,
    /// An external `quit` request was observed.
    Quit,
}

// ─── Future events ────────────────────────────────────────────

enum Event {
    /// Wake a parked waiter (delay trigger).
    Wake(WaiterEntry),
    /// Commit a delayed-signal write, unless superseded.
    Apply {
        sig: SignalId,
        val: Val,
        stamp: u64,
    },
}

struct FutureEvent {
    time: u64,
    /// Insertion sequence; FIFO among events at the same time.
    seq: u64,
    event: Event,
}

impl PartialEq for FutureEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for FutureEvent {}

impl Ord for FutureEvent {
    // reversed so the binary heap pops the earliest event first
    fn cmp(&self, other: &Self) -> Ordering {
        (other.time, other.seq).cmp(&(self.time, self.seq))
    }
}

impl PartialOrd for FutureEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ─── Runners ──────────────────────────────────────────────────

/// Runtime form of one process. Tree kinds are snapshotted from the
/// design at construction so stepping them does not borrow the
/// declaration tables.
enum Runner {
    Always {
        sens: Vec<SignalId>,
        body: Arc<Vec<Stmt>>,
        started: bool,
    },
    AlwaysComb {
        sens: Vec<SignalId>,
        body: Arc<Vec<Stmt>>,
    },
    AlwaysSeq {
        edge: ClockEdge,
        reset: Option<Reset>,
        body: Arc<Vec<Stmt>>,
        /// Registers driven by the body; reverted to init on reset.
        outputs: Vec<SignalId>,
        started: bool,
    },
    Initial {
        body: Arc<Vec<Stmt>>,
    },
    Native(Box<dyn Process>),
    /// Kernel-owned follower keeping a shadow slice in step with its
    /// parent.
    Shadow {
        shadow: SignalId,
        parent: SignalId,
        hi: u32,
        lo: u32,
    },
    /// Ran to completion; never rearmed.
    Finished,
}

// ─── Simulation ───────────────────────────────────────────────

pub struct Simulation {
    design: Design,
    now: u64,
    seq: u64,
    future: BinaryHeap<FutureEvent>,
    /// Signals with pending updates this delta, in insertion order.
    siglist: Vec<SignalId>,
    /// Waiters to execute this delta, FIFO.
    ready: VecDeque<WaiterId>,
    waiters: Vec<Waiter>,
    runners: Vec<Runner>,
    tracer: Option<Box<dyn Tracer>>,
    quit_requested: bool,
}

impl Simulation {
    /// Take ownership of an elaborated design and prepare every process
    /// for its first step.
    pub fn new(mut design: Design) -> Simulation {
        let mut runners = Vec::new();
        let mut waiters = Vec::new();
        let mut ready = VecDeque::new();

        for i in 0..design.procs.len() {
            let runner = {
                let decl = &mut design.procs[i];
                match &mut decl.kind {
                    ProcKind::Always { sens, body } => Runner::Always {
                        sens: sens.clone(),
                        body: body.clone(),
                        started: false,
                    },
                    ProcKind::AlwaysComb { sens, body } => Runner::AlwaysComb {
                        sens: sens.clone(),
                        body: body.clone(),
                    },
                    ProcKind::AlwaysSeq { edge, reset, body } => Runner::AlwaysSeq {
                        edge: *edge,
                        reset: *reset,
                        body: body.clone(),
                        outputs: Vec::new(),
                        started: false,
                    },
                    ProcKind::Initial { body } => Runner::Initial { body: body.clone() },
                    // a design recovered from an earlier simulation has
                    // given its instances away; they stay consumed
                    ProcKind::Instance(p) => match p.take() {
                        Some(b) => Runner::Native(b),
                        None => Runner::Finished,
                    },
                }
            };
            // expand clocked-process outputs (memory writes hit every element)
            let runner = match runner {
                Runner::AlwaysSeq {
                    edge,
                    reset,
                    body,
                    started,
                    ..
                } => {
                    let mut outputs = Vec::new();
                    visit_stmt_writes(&body, &mut |w| match w {
                        WriteRef::Sig(s) => {
                            if !outputs.contains(&s) {
                                outputs.push(s);
                            }
                        }
                        WriteRef::Mem(m) => {
                            for &e in &design.memory(m).elements {
                                if !outputs.contains(&e) {
                                    outputs.push(e);
                                }
                            }
                        }
                    });
                    Runner::AlwaysSeq {
                        edge,
                        reset,
                        body,
                        outputs,
                        started,
                    }
                }
                other => other,
            };
            let wid = WaiterId(waiters.len() as u32);
            waiters.push(Waiter::new(crate::process::ProcId(i as u32)));
            runners.push(runner);
            ready.push_back(wid);
        }

        // one follower per shadow slice signal
        for i in 0..design.signal_count() {
            let sid = SignalId(i as u32);
            if let SignalFlavor::Shadow(range) = design.signal(sid).flavor {
                let wid = WaiterId(waiters.len() as u32);
                waiters.push(Waiter::new(crate::process::ProcId(u32::MAX)));
                runners.push(Runner::Shadow {
                    shadow: sid,
                    parent: range.parent,
                    hi: range.hi,
                    lo: range.lo,
                });
                ready.push_back(wid);
            }
        }

        for w in &mut waiters {
            w.has_run = true; // queued for the first step
        }

        Simulation {
            design,
            now: 0,
            seq: 0,
            future: BinaryHeap::new(),
            siglist: Vec::new(),
            ready,
            waiters,
            runners,
            tracer: None,
            quit_requested: false,
        }
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn design(&self) -> &Design {
        &self.design
    }

    pub fn design_mut(&mut self) -> &mut Design {
        &mut self.design
    }

    /// Give the design back, e.g. to `clear()` and re-simulate or to
    /// convert it. Consumed instance processes do not return.
    pub fn into_design(mut self) -> Design {
        let _ = self.finish_trace();
        std::mem::take(&mut self.design)
    }

    /// Install a trace sink. Definitions are written immediately.
    pub fn trace(&mut self, mut tracer: Box<dyn Tracer>) -> Result<(), SimError> {
        tracer.init(&mut self.design).map_err(SimError::Trace)?;
        self.tracer = Some(tracer);
        Ok(())
    }

    /// Flush and drop the trace sink.
    pub fn finish_trace(&mut self) -> Result<(), SimError> {
        if let Some(mut t) = self.tracer.take() {
            t.finish(&self.design).map_err(SimError::Trace)?;
        }
        Ok(())
    }

    /// Request termination; observed between run iterations.
    pub fn quit(&mut self) {
        self.quit_requested = true;
    }

    /// Run until quiescence.
    pub fn run_to_quiescence(&mut self) -> Result<RunOutcome, SimError> {
        self.run(None)
    }

    /// Run for at most `duration` simulated time units (from now), or
    /// until quiescence or a stop request.
    pub fn run(&mut self, duration: Option<u64>) -> Result<RunOutcome, SimError> {
        let deadline = duration.map(|d| self.now + d);
        loop {
            if self.quit_requested {
                self.quit_requested = false;
                return Ok(RunOutcome::Quit);
            }

            // 1. execute ready waiters
            if let Some(wid) = self.ready.pop_front() {
                match self.step_waiter(wid) {
                    Ok(false) => {}
                    Ok(true) => return Ok(RunOutcome::Stopped),
                    Err(e) if e.is_stop() => return Ok(RunOutcome::Stopped),
                    Err(e) => return Err(e),
                }
                continue;
            }

            // 2. drain pending signal updates of this delta
            if !self.siglist.is_empty() {
                let pending = std::mem::take(&mut self.siglist);
                trace!(time = self.now, updates = pending.len(), "delta cycle");
                for sig in pending {
                    self.update_signal(sig)?;
                }
                continue;
            }

            // 3. advance to the next future event
            match self.future.peek() {
                None => return Ok(RunOutcome::Quiescent),
                Some(ev) if deadline.is_some_and(|d| ev.time > d) => {
                    self.now = deadline.unwrap();
                    return Ok(RunOutcome::DurationElapsed);
                }
                Some(_) => {
                    let ev = self.future.pop().unwrap();
                    if ev.time > self.now {
                        debug!(from = self.now, to = ev.time, "advance time");
                        self.now = ev.time;
                    }
                    match ev.event {
                        Event::Wake(entry) => {
                            enqueue_woken(&mut self.waiters, &mut self.ready, vec![entry])
                        }
                        Event::Apply { sig, val, stamp } => {
                            let (woken, changed) =
                                self.design.signal_mut(sig).apply(val, stamp);
                            enqueue_woken(&mut self.waiters, &mut self.ready, woken);
                            if changed {
                                if let Some(t) = self.tracer.as_mut() {
                                    t.change(self.now, &self.design, sig)
                                        .map_err(SimError::Trace)?;
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    fn update_signal(&mut self, sig: SignalId) -> Result<(), SimError> {
        match self.design.signal_mut(sig).update(self.now) {
            UpdateResult::Woken { waiters, changed } => {
                enqueue_woken(&mut self.waiters, &mut self.ready, waiters);
                if changed {
                    if let Some(t) = self.tracer.as_mut() {
                        t.change(self.now, &self.design, sig)
                            .map_err(SimError::Trace)?;
                    }
                }
            }
            UpdateResult::Schedule { val, stamp, delay } => {
                self.seq += 1;
                self.future.push(FutureEvent {
                    time: self.now + delay,
                    seq: self.seq,
                    event: Event::Apply { sig, val, stamp },
                });
            }
        }
        Ok(())
    }

    /// Step one waiter's process and re-arm it on the yielded trigger.
    /// Returns true when the simulation should stop.
    fn step_waiter(&mut self, wid: WaiterId) -> Result<bool, SimError> {
        let idx = wid.0 as usize;
        let mut finished = false;
        let next_trigger: Option<Trigger> = match &mut self.runners[idx] {
            Runner::Always {
                sens,
                body,
                started,
            } => {
                let arm = Trigger::SignalList(sens.clone());
                if *started {
                    let body = body.clone();
                    ExecCtx {
                        design: &mut self.design,
                        now: self.now,
                        siglist: &mut self.siglist,
                    }
                    .run(&body)?;
                } else {
                    *started = true;
                }
                Some(arm)
            }
            Runner::AlwaysComb { sens, body } => {
                // the body also runs at time zero to establish outputs
                let arm = Trigger::SignalList(sens.clone());
                let body = body.clone();
                ExecCtx {
                    design: &mut self.design,
                    now: self.now,
                    siglist: &mut self.siglist,
                }
                .run(&body)?;
                Some(arm)
            }
            Runner::AlwaysSeq {
                edge,
                reset,
                body,
                outputs,
                started,
            } => {
                let mut arms = vec![(edge.kind, edge.sig)];
                if let Some(r) = reset {
                    if r.is_async {
                        arms.push((if r.active { EdgeKind::Pos } else { EdgeKind::Neg }, r.sig));
                    }
                }
                if *started {
                    let in_reset = reset.is_some_and(|r| {
                        self.design.signal(r.sig).val().is_truthy() == r.active
                    });
                    if in_reset {
                        for &s in outputs.iter() {
                            let init = self.design.signal(s).init().clone();
                            queue_next(&mut self.design, &mut self.siglist, s, init)?;
                        }
                    } else {
                        let body = body.clone();
                        ExecCtx {
                            design: &mut self.design,
                            now: self.now,
                            siglist: &mut self.siglist,
                        }
                        .run(&body)?;
                    }
                } else {
                    *started = true;
                }
                Some(Trigger::EdgeList(arms))
            }
            Runner::Initial { body } => {
                let body = body.clone();
                ExecCtx {
                    design: &mut self.design,
                    now: self.now,
                    siglist: &mut self.siglist,
                }
                .run(&body)?;
                finished = true;
                None
            }
            Runner::Native(p) => {
                let mut io = ProcIo {
                    design: &mut self.design,
                    now: self.now,
                    siglist: &mut self.siglist,
                };
                match p.step(&mut io)? {
                    StepResult::Yield(t) => Some(t),
                    StepResult::Done => {
                        finished = true;
                        None
                    }
                    StepResult::Stop => return Ok(true),
                }
            }
            Runner::Shadow {
                shadow,
                parent,
                hi,
                lo,
            } => {
                let (shadow, parent, hi, lo) = (*shadow, *parent, *hi, *lo);
                let sliced = match self.design.signal(parent).val() {
                    Val::Vec(v) => Val::Vec(v.slice(hi, lo)?),
                    other => other.clone(),
                };
                let s = self.design.signal_mut(shadow);
                s.set_next_internal(sliced)?;
                if !s.queued {
                    s.queued = true;
                    self.siglist.push(shadow);
                }
                Some(Trigger::Signal(parent))
            }
            Runner::Finished => None,
        };

        if finished {
            self.runners[idx] = Runner::Finished;
        }
        if let Some(trigger) = next_trigger {
            let epoch = self.waiters[idx].rearm();
            let join_leaves = count_leaves(&trigger);
            if matches!(trigger, Trigger::All(_)) {
                self.waiters[idx].join_remaining = join_leaves;
            }
            self.arm(wid, epoch, &trigger);
        }
        Ok(false)
    }

    /// Enter the waiter into the lists the trigger names. `All` joins
    /// count leaf triggers; `Any` arms every leaf with first-wins
    /// semantics (stale entries die by epoch).
    fn arm(&mut self, wid: WaiterId, epoch: u64, trigger: &Trigger) {
        let entry = WaiterEntry { waiter: wid, epoch };
        match trigger {
            Trigger::Delay(d) => {
                self.seq += 1;
                self.future.push(FutureEvent {
                    time: self.now + d,
                    seq: self.seq,
                    event: Event::Wake(entry),
                });
            }
            Trigger::Signal(s) => self.design.signal_mut(*s).event_waiters.push(entry),
            Trigger::SignalList(ss) => {
                for s in ss {
                    self.design.signal_mut(*s).event_waiters.push(entry);
                }
            }
            Trigger::Edge(kind, s) => self.arm_edge(entry, *kind, *s),
            Trigger::EdgeList(edges) => {
                for (kind, s) in edges {
                    self.arm_edge(entry, *kind, *s);
                }
            }
            Trigger::All(subs) | Trigger::Any(subs) => {
                for t in subs {
                    self.arm(wid, epoch, t);
                }
            }
        }
    }

    fn arm_edge(&mut self, entry: WaiterEntry, kind: EdgeKind, sig: SignalId) {
        let s = self.design.signal_mut(sig);
        match kind {
            EdgeKind::Pos => s.posedge_waiters.push(entry),
            EdgeKind::Neg => s.negedge_waiters.push(entry),
        }
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        let _ = self.finish_trace();
    }
}

/// Number of leaf arming slots of a trigger.
fn count_leaves(t: &Trigger) -> u32 {
    match t {
        Trigger::Delay(_) | Trigger::Signal(_) | Trigger::Edge(..) => 1,
        Trigger::SignalList(v) => v.len() as u32,
        Trigger::EdgeList(v) => v.len() as u32,
        Trigger::All(subs) | Trigger::Any(subs) => subs.iter().map(count_leaves).sum(),
    }
}

/// Move fired entries to the ready queue, dropping the stale ones. A
/// join waiter only becomes ready once every outstanding sub-trigger has
/// fired.
fn enqueue_woken(waiters: &mut [Waiter], ready: &mut VecDeque<WaiterId>, entries: Vec<WaiterEntry>) {
    for e in entries {
        let w = &mut waiters[e.waiter.0 as usize];
        if e.epoch != w.epoch || w.has_run {
            continue;
        }
        if w.join_remaining > 1 {
            w.join_remaining -= 1;
            continue;
        }
        w.join_remaining = 0;
        w.has_run = true;
        ready.push_back(e.waiter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expr as E;
    use crate::bitvec::modbv;
    use crate::errors::SimError;

    /// Toggles a bit signal forever with a fixed half period. The first
    /// toggle lands one half period after time zero.
    struct Clock {
        sig: SignalId,
        half: u64,
        started: bool,
    }

    impl Clock {
        fn new(sig: SignalId, half: u64) -> Clock {
            Clock {
                sig,
                half,
                started: false,
            }
        }
    }

    impl Process for Clock {
        fn step(&mut self, io: &mut ProcIo<'_>) -> Result<StepResult, SimError> {
            if self.started {
                let v = io.read(self.sig).is_truthy();
                io.set_next(self.sig, Val::Bit(!v))?;
            } else {
                self.started = true;
            }
            Ok(StepResult::Yield(Trigger::Delay(self.half)))
        }
    }

    #[test]
    fn quiescent_when_nothing_scheduled() {
        let mut design = Design::new();
        design
            .build_top("t", |ctx| {
                let a = ctx.signal("a", Val::Bit(false));
                ctx.always(vec![a], vec![])?;
                Ok(())
            })
            .unwrap();
        let mut sim = Simulation::new(design);
        assert_eq!(sim.run(Some(100)).unwrap(), RunOutcome::Quiescent);
        assert_eq!(sim.now(), 0);
    }

    #[test]
    fn clock_advances_time() {
        let mut design = Design::new();
        let clk = design
            .build_top("t", |ctx| {
                let clk = ctx.signal("clk", Val::Bit(false));
                ctx.instance("clkgen", Box::new(Clock::new(clk, 5)))?;
                Ok(clk)
            })
            .unwrap();
        let mut sim = Simulation::new(design);
        assert_eq!(sim.run(Some(12)).unwrap(), RunOutcome::DurationElapsed);
        assert_eq!(sim.now(), 12);
        // toggles at t=5 (high) and t=10 (low)
        assert!(!sim.design().signal(clk).val().is_truthy());
    }

    #[test]
    fn counter_wraps_modulo() {
        let mut design = Design::new();
        let (clk, count) = design
            .build_top("t", |ctx| {
                let clk = ctx.signal("clk", Val::Bit(false));
                let count = ctx.signal("count", Val::Vec(modbv(0, 0, 8).unwrap()));
                ctx.always_seq(
                    ClockEdge::pos(clk),
                    None,
                    vec![Stmt::assign(count, E::add(E::sig(count), E::lit(1)))],
                )?;
                ctx.instance("clkgen", Box::new(Clock::new(clk, 5)))?;
                Ok((clk, count))
            })
            .unwrap();
        let _ = clk;
        let mut sim = Simulation::new(design);
        // rising edges at t = 5, 15, ..., 95: ten ticks
        sim.run(Some(100)).unwrap();
        let n = sim.design().signal(count).val().as_i128().unwrap();
        assert_eq!(n, 10 % 8);
    }

    #[test]
    fn stop_sentinel_ends_run() {
        struct Stopper;
        impl Process for Stopper {
            fn step(&mut self, _io: &mut ProcIo<'_>) -> Result<StepResult, SimError> {
                Ok(StepResult::Stop)
            }
        }
        let mut design = Design::new();
        design
            .build_top("t", |ctx| {
                ctx.instance("s", Box::new(Stopper))?;
                Ok(())
            })
            .unwrap();
        let mut sim = Simulation::new(design);
        assert_eq!(sim.run(Some(10)).unwrap(), RunOutcome::Stopped);
    }

    #[test]
    fn quit_observed_between_iterations() {
        let mut design = Design::new();
        let clk = design
            .build_top("t", |ctx| {
                let clk = ctx.signal("clk", Val::Bit(false));
                ctx.instance("clkgen", Box::new(Clock::new(clk, 5)))?;
                Ok(clk)
            })
            .unwrap();
        let _ = clk;
        let mut sim = Simulation::new(design);
        sim.quit();
        assert_eq!(sim.run(Some(100)).unwrap(), RunOutcome::Quit);
    }
}
