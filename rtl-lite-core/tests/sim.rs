//! Kernel integration tests: elaborate small designs and drive them
//! through the scheduler, checking signal values against hand-computed
//! waveforms.

use rtl_lite_core::ast::{Expr as E, Stmt};
use rtl_lite_core::{
    bitvec, modbv, ClockEdge, Design, Process, ProcIo, Reset, RunOutcome, SignalId, Simulation,
    SimError, StepResult, Trigger, Val, VcdWriter,
};

/// Route kernel trace output to the test harness; safe to call from
/// every test, the first caller wins.
fn trace_init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Toggles a bit signal forever; first toggle one half period in.
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

/// Applies a list of (delay-from-previous, value) writes to one signal,
/// then finishes.
struct Stimulus {
    sig: SignalId,
    script: Vec<(u64, Val)>,
    at: usize,
    armed: bool,
}

impl Stimulus {
    fn new(sig: SignalId, script: Vec<(u64, Val)>) -> Stimulus {
        Stimulus {
            sig,
            script,
            at: 0,
            armed: false,
        }
    }
}

impl Process for Stimulus {
    fn step(&mut self, io: &mut ProcIo<'_>) -> Result<StepResult, SimError> {
        if self.armed {
            let (_, val) = self.script[self.at].clone();
            io.set_next(self.sig, val)?;
            self.at += 1;
        }
        match self.script.get(self.at) {
            Some((delay, _)) => {
                self.armed = true;
                Ok(StepResult::Yield(Trigger::Delay(*delay)))
            }
            None => Ok(StepResult::Done),
        }
    }
}

#[test]
fn d_flip_flop_tracks_d_on_rising_edges() {
    trace_init();
    let mut design = Design::new();
    let q = design
        .build_top("dff", |ctx| {
            let clk = ctx.signal("clk", Val::Bit(false));
            let d = ctx.signal("d", Val::Bit(false));
            let q = ctx.signal("q", Val::Bit(false));
            ctx.always_seq(ClockEdge::pos(clk), None, vec![Stmt::assign(q, E::sig(d))])?;
            ctx.instance("clkgen", Box::new(Clock::new(clk, 5)))?;
            ctx.instance(
                "stim",
                Box::new(Stimulus::new(
                    d,
                    vec![(3, Val::Bit(true)), (14, Val::Bit(false))],
                )),
            )?;
            Ok(q)
        })
        .unwrap();

    // rising edges at t = 5, 15, 25, ...; d is 1 at 3..17, 0 after
    let mut sim = Simulation::new(design);
    sim.run(Some(4)).unwrap();
    assert!(!sim.design().signal(q).val().is_truthy(), "q low before first edge");
    sim.run(Some(2)).unwrap(); // t = 6
    assert!(sim.design().signal(q).val().is_truthy(), "q captured d=1 at t=5");
    sim.run(Some(10)).unwrap(); // t = 16, edge at 15 saw d=1
    assert!(sim.design().signal(q).val().is_truthy());
    sim.run(Some(10)).unwrap(); // t = 26, edge at 25 saw d=0
    assert!(!sim.design().signal(q).val().is_truthy(), "q dropped at the edge after d fell");
}

#[test]
fn modular_counter_wraps() {
    trace_init();
    let mut design = Design::new();
    let count = design
        .build_top("counter", |ctx| {
            let clk = ctx.signal("clk", Val::Bit(false));
            let count = ctx.signal("count", Val::Vec(modbv(0, 0, 8).unwrap()));
            ctx.always_seq(
                ClockEdge::pos(clk),
                None,
                vec![Stmt::assign(count, E::add(E::sig(count), E::lit(1)))],
            )?;
            ctx.instance("clkgen", Box::new(Clock::new(clk, 5)))?;
            Ok(count)
        })
        .unwrap();
    let mut sim = Simulation::new(design);
    // ten rising edges (t = 5..95)
    sim.run(Some(100)).unwrap();
    assert_eq!(sim.design().signal(count).val().as_i128(), Some(10 % 8));
}

#[test]
fn scramble_is_an_involution() {
    trace_init();
    let mut design = Design::new();
    let (a, y, y2) = design
        .build_top("scramble", |ctx| {
            let pattern = ctx.constant("pattern", Val::Vec(bitvec(0x42, 0, 256).unwrap()));
            let a = ctx.signal("a", Val::Vec(bitvec(0, 0, 256).unwrap()));
            let y = ctx.signal("y", Val::Vec(bitvec(0, 0, 256).unwrap()));
            let y2 = ctx.signal("y2", Val::Vec(bitvec(0, 0, 256).unwrap()));
            ctx.always_comb(vec![Stmt::assign(y, E::xor(E::sig(a), E::sig(pattern)))])?;
            ctx.always_comb(vec![Stmt::assign(y2, E::xor(E::sig(y), E::sig(pattern)))])?;
            ctx.initial(vec![Stmt::assign(a, E::lit(0x7E))])?;
            Ok((a, y, y2))
        })
        .unwrap();
    let mut sim = Simulation::new(design);
    assert_eq!(sim.run(None).unwrap(), RunOutcome::Quiescent);
    assert_eq!(sim.design().signal(a).val().as_i128(), Some(0x7E));
    assert_eq!(sim.design().signal(y).val().as_i128(), Some(0x3C));
    assert_eq!(sim.design().signal(y2).val().as_i128(), Some(0x7E));
}

#[test]
fn delayed_signal_coalesces_inertially() {
    trace_init();
    let mut design = Design::new();
    let d = design
        .build_top("delayline", |ctx| {
            let d = ctx.signal_delayed("d", Val::Bit(false), 10);
            ctx.instance(
                "stim",
                Box::new(Stimulus::new(
                    d,
                    vec![(0, Val::Bit(true)), (3, Val::Bit(false))],
                )),
            )?;
            Ok(d)
        })
        .unwrap();
    let mut sim = Simulation::new(design);
    sim.run(Some(10)).unwrap();
    // the write at t=3 superseded the one at t=0
    assert!(!sim.design().signal(d).val().is_truthy());
    sim.run(Some(3)).unwrap();
    assert!(!sim.design().signal(d).val().is_truthy());
}

#[test]
fn async_reset_reverts_registers_to_init() {
    trace_init();
    let mut design = Design::new();
    let (rst, count) = design
        .build_top("counter_rst", |ctx| {
            let clk = ctx.signal("clk", Val::Bit(false));
            let rst = ctx.signal("rst", Val::Bit(false));
            let count = ctx.signal("count", Val::Vec(bitvec(0, 0, 64).unwrap()));
            ctx.always_seq(
                ClockEdge::pos(clk),
                Some(Reset {
                    sig: rst,
                    active: true,
                    is_async: true,
                }),
                vec![Stmt::assign(count, E::add(E::sig(count), E::lit(1)))],
            )?;
            ctx.instance("clkgen", Box::new(Clock::new(clk, 5)))?;
            ctx.instance(
                "rstgen",
                Box::new(Stimulus::new(rst, vec![(23, Val::Bit(true))])),
            )?;
            Ok((rst, count))
        })
        .unwrap();
    let mut sim = Simulation::new(design);
    sim.run(Some(22)).unwrap();
    assert_eq!(sim.design().signal(count).val().as_i128(), Some(2));
    // reset asserts at t=23, the process wakes on its edge and reverts
    sim.run(Some(2)).unwrap();
    assert_eq!(sim.design().signal(count).val().as_i128(), Some(0));
    let _ = rst;
}

#[test]
fn shadow_slice_follows_parent() {
    trace_init();
    let mut design = Design::new();
    let bus = design
        .build_top("shadow", |ctx| {
            let bus = ctx.signal("bus", Val::Vec(bitvec(0, 0, 256).unwrap()));
            ctx.instance(
                "stim",
                Box::new(Stimulus::new(
                    bus,
                    vec![(5, Val::Int(0b1011_0100))],
                )),
            )?;
            Ok(bus)
        })
        .unwrap();
    let nib = design.slice_signal(bus, 8, 4).unwrap();
    let mut sim = Simulation::new(design);
    sim.run(Some(10)).unwrap();
    assert_eq!(sim.design().signal(nib).val().as_i128(), Some(0b1011));
    // shadows reject writes
    assert!(matches!(
        sim.design_mut().signal_mut(nib).set_next(Val::Int(0)),
        Err(SimError::ShadowWrite(_))
    ));
}

#[test]
fn join_trigger_waits_for_all_arms() {
    trace_init();
    struct Joiner {
        a: SignalId,
        b: SignalId,
        out: SignalId,
        state: u8,
    }
    impl Process for Joiner {
        fn step(&mut self, io: &mut ProcIo<'_>) -> Result<StepResult, SimError> {
            match self.state {
                0 => {
                    self.state = 1;
                    Ok(StepResult::Yield(Trigger::All(vec![
                        Trigger::Signal(self.a),
                        Trigger::Signal(self.b),
                    ])))
                }
                _ => {
                    io.set_next(self.out, Val::Int(io.now() as i64))?;
                    Ok(StepResult::Done)
                }
            }
        }
    }
    let mut design = Design::new();
    let out = design
        .build_top("join", |ctx| {
            let a = ctx.signal("a", Val::Bit(false));
            let b = ctx.signal("b", Val::Bit(false));
            let out = ctx.signal("out", Val::Int(-1));
            ctx.instance(
                "stim_a",
                Box::new(Stimulus::new(a, vec![(5, Val::Bit(true))])),
            )?;
            ctx.instance(
                "stim_b",
                Box::new(Stimulus::new(b, vec![(9, Val::Bit(true))])),
            )?;
            ctx.instance("join", Box::new(Joiner { a, b, out, state: 0 }))?;
            Ok(out)
        })
        .unwrap();
    let mut sim = Simulation::new(design);
    sim.run(None).unwrap();
    // fired only once both arms had fired, i.e. at t=9
    assert_eq!(sim.design().signal(out).val().as_i128(), Some(9));
}

#[test]
fn any_trigger_fires_on_first_arm() {
    trace_init();
    struct Racer {
        a: SignalId,
        out: SignalId,
        state: u8,
    }
    impl Process for Racer {
        fn step(&mut self, io: &mut ProcIo<'_>) -> Result<StepResult, SimError> {
            match self.state {
                0 => {
                    self.state = 1;
                    Ok(StepResult::Yield(Trigger::Any(vec![
                        Trigger::Signal(self.a),
                        Trigger::Delay(50),
                    ])))
                }
                _ => {
                    io.set_next(self.out, Val::Int(io.now() as i64))?;
                    Ok(StepResult::Done)
                }
            }
        }
    }
    let mut design = Design::new();
    let out = design
        .build_top("race", |ctx| {
            let a = ctx.signal("a", Val::Bit(false));
            let out = ctx.signal("out", Val::Int(-1));
            ctx.instance(
                "stim",
                Box::new(Stimulus::new(a, vec![(7, Val::Bit(true))])),
            )?;
            ctx.instance("race", Box::new(Racer { a, out, state: 0 }))?;
            Ok(out)
        })
        .unwrap();
    let mut sim = Simulation::new(design);
    sim.run(None).unwrap();
    assert_eq!(sim.design().signal(out).val().as_i128(), Some(7));
}

#[test]
fn vcd_trace_lists_only_changes() {
    trace_init();
    let mut design = Design::new();
    design
        .build_top("traced", |ctx| {
            let a = ctx.signal("a", Val::Bit(false));
            let y = ctx.signal("y", Val::Vec(bitvec(0, 0, 16).unwrap()));
            ctx.always_comb(vec![Stmt::assign(
                y,
                E::add(E::sig(a), E::lit(2)),
            )])?;
            ctx.instance(
                "stim",
                Box::new(Stimulus::new(a, vec![(5, Val::Bit(true))])),
            )?;
            Ok(())
        })
        .unwrap();
    let mut sim = Simulation::new(design);
    sim.trace(Box::new(VcdWriter::new(Vec::new()))).unwrap();
    sim.run(Some(20)).unwrap();
    // the writer was moved into the simulation; we only check the run
    // completed and the definitions were accepted
    sim.finish_trace().unwrap();
}

#[test]
fn continuous_assign_follows_source() {
    trace_init();
    let mut design = Design::new();
    let (src, dst) = design
        .build_top("follow", |ctx| {
            let src = ctx.signal("src", Val::Vec(bitvec(0, 0, 16).unwrap()));
            let dst = ctx.signal("dst", Val::Vec(bitvec(0, 0, 16).unwrap()));
            ctx.assign(dst, src)?;
            ctx.instance(
                "stim",
                Box::new(Stimulus::new(src, vec![(4, Val::Int(9))])),
            )?;
            Ok((src, dst))
        })
        .unwrap();
    let _ = src;
    let mut sim = Simulation::new(design);
    sim.run(Some(10)).unwrap();
    assert_eq!(sim.design().signal(dst).val().as_i128(), Some(9));
}

#[test]
fn enum_state_machine_advances() {
    trace_init();
    use rtl_lite_core::{EnumEncoding, EnumType};

    let mut design = Design::new();
    let ty = design.add_enum(EnumType::new(
        "state",
        vec!["idle".into(), "busy".into(), "done".into()],
        EnumEncoding::Binary,
    ));
    let idle = design.enum_val(ty, "idle").unwrap();
    let busy = design.enum_val(ty, "busy").unwrap();
    let done = design.enum_val(ty, "done").unwrap();
    let state = design
        .build_top("fsm", |ctx| {
            let clk = ctx.signal("clk", Val::Bit(false));
            let state = ctx.signal("state", idle.clone());
            let (Val::Enum(idle_v), Val::Enum(busy_v), Val::Enum(done_v)) =
                (idle.clone(), busy.clone(), done.clone())
            else {
                unreachable!()
            };
            ctx.always_seq(
                ClockEdge::pos(clk),
                None,
                vec![Stmt::If {
                    arms: vec![
                        (
                            E::eq(
                                E::sig(state),
                                E::EnumLit(idle_v.type_id, idle_v.index),
                            ),
                            vec![Stmt::assign(
                                state,
                                E::EnumLit(busy_v.type_id, busy_v.index),
                            )],
                        ),
                        (
                            E::eq(
                                E::sig(state),
                                E::EnumLit(busy_v.type_id, busy_v.index),
                            ),
                            vec![Stmt::assign(
                                state,
                                E::EnumLit(done_v.type_id, done_v.index),
                            )],
                        ),
                    ],
                    orelse: vec![],
                }],
            )?;
            ctx.instance("clkgen", Box::new(Clock::new(clk, 5)))?;
            Ok(state)
        })
        .unwrap();
    let mut sim = Simulation::new(design);
    sim.run(Some(6)).unwrap(); // one rising edge at t=5
    assert_eq!(*sim.design().signal(state).val(), busy);
    sim.run(Some(10)).unwrap(); // second edge at t=15
    assert_eq!(*sim.design().signal(state).val(), done);
}

#[test]
fn memory_acts_as_register_file() {
    trace_init();
    use rtl_lite_core::ast::LValue;

    let mut design = Design::new();
    let (waddr, rdata) = design
        .build_top("regfile", |ctx| {
            let clk = ctx.signal("clk", Val::Bit(false));
            let waddr = ctx.signal("waddr", Val::Vec(bitvec(0, 0, 4).unwrap()));
            let wdata = ctx.signal("wdata", Val::Vec(bitvec(0, 0, 256).unwrap()));
            let raddr = ctx.signal("raddr", Val::Vec(bitvec(0, 0, 4).unwrap()));
            let rdata = ctx.signal("rdata", Val::Vec(bitvec(0, 0, 256).unwrap()));
            let cells: Vec<_> = (0..4)
                .map(|i| {
                    ctx.signal(
                        &format!("cell{i}"),
                        Val::Vec(bitvec(0, 0, 256).unwrap()),
                    )
                })
                .collect();
            let mem = ctx.memory("cells", cells)?;
            ctx.always_seq(
                ClockEdge::pos(clk),
                None,
                vec![Stmt::Assign {
                    dst: LValue::Mem {
                        mem,
                        index: Box::new(E::sig(waddr)),
                    },
                    src: E::sig(wdata),
                }],
            )?;
            ctx.always_comb(vec![Stmt::Assign {
                dst: LValue::Sig(rdata),
                src: E::MemRead {
                    mem,
                    index: Box::new(E::sig(raddr)),
                },
            }])?;
            ctx.instance("clkgen", Box::new(Clock::new(clk, 5)))?;
            ctx.instance(
                "stim_wa",
                Box::new(Stimulus::new(waddr, vec![(1, Val::Int(2))])),
            )?;
            ctx.instance(
                "stim_wd",
                Box::new(Stimulus::new(wdata, vec![(1, Val::Int(0x5A))])),
            )?;
            ctx.instance(
                "stim_ra",
                Box::new(Stimulus::new(raddr, vec![(7, Val::Int(2))])),
            )?;
            Ok((waddr, rdata))
        })
        .unwrap();
    let _ = waddr;
    let mut sim = Simulation::new(design);
    // write lands on the rising edge at t=5, read address set at t=7
    sim.run(Some(10)).unwrap();
    assert_eq!(sim.design().signal(rdata).val().as_i128(), Some(0x5A));
}

#[test]
fn cleared_design_restarts_from_init() {
    trace_init();
    let mut design = Design::new();
    let count = design
        .build_top("counter", |ctx| {
            let clk = ctx.signal("clk", Val::Bit(false));
            let count = ctx.signal("count", Val::Vec(bitvec(0, 0, 64).unwrap()));
            ctx.always_seq(
                ClockEdge::pos(clk),
                None,
                vec![Stmt::assign(count, E::add(E::sig(count), E::lit(1)))],
            )?;
            ctx.instance("clkgen", Box::new(Clock::new(clk, 5)))?;
            Ok(count)
        })
        .unwrap();
    let mut sim = Simulation::new(design);
    sim.run(Some(20)).unwrap();
    assert_eq!(sim.design().signal(count).val().as_i128(), Some(2));

    // take the design back, clear, and start over: values revert to
    // init; the consumed clock instance does not come back, so the
    // second run goes quiescent with the counter untouched
    let mut design = sim.into_design();
    design.clear();
    assert_eq!(design.signal(count).val().as_i128(), Some(0));
    let mut sim = Simulation::new(design);
    assert_eq!(sim.run(Some(20)).unwrap(), RunOutcome::Quiescent);
    assert_eq!(sim.design().signal(count).val().as_i128(), Some(0));
}
