//! Conversion integration tests: elaborate small designs, run the full
//! pipeline, and check the emitted HDL structure (and, where it matters,
//! the simulated behaviour of the same design).

use rtl_lite_convert::{ConvCode, Converter, Hierarchy, Target, VerilogStandard};

use rtl_lite_core::ast::{Expr as E, Stmt};
use rtl_lite_core::{
    bitvec, BitVec, ClockEdge, Design, Drive, Process, ProcIo, RunOutcome, SignalId, Simulation,
    SimError, StepResult, Trigger, Val,
};

/// Route kernel trace output to the test harness; safe to call from
/// every test, the first caller wins.
fn trace_init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn dff_design() -> Design {
    let mut design = Design::new();
    design
        .build_top("dff", |ctx| {
            let clk = ctx.signal("clk", Val::Bit(false));
            let d = ctx.signal("d", Val::Bit(false));
            let q = ctx.signal("q", Val::Bit(false));
            ctx.always_seq(ClockEdge::pos(clk), None, vec![Stmt::assign(q, E::sig(d))])?;
            Ok(())
        })
        .unwrap();
    design
}

#[test]
fn dff_emits_clocked_block_with_inferred_ports() {
    trace_init();
    let report = Converter::new(Target::Verilog).render(&dff_design());
    assert!(report.is_success(), "{:?}", report.diagnostics);
    let text = &report.file("dff.v").unwrap().contents;
    assert!(text.contains("module dff ("));
    assert!(text.contains("input  wire clk"));
    assert!(text.contains("input  wire d"));
    assert!(text.contains("output reg  q"));
    assert!(text.contains("always @(posedge clk)"));
    assert!(text.contains("q <= d;"));
    assert!(text.contains("`timescale 1ns/10ps"));
}

#[test]
fn verilog_1995_uses_separate_port_declarations() {
    trace_init();
    let report = Converter::new(Target::Verilog)
        .standard(VerilogStandard::V1995)
        .render(&dff_design());
    assert!(report.is_success());
    let text = &report.file("dff.v").unwrap().contents;
    assert!(text.contains("module dff (clk, d, q);"));
    assert!(text.contains("input clk;"));
    assert!(text.contains("output q;"));
    assert!(text.contains("reg q;"));
}

#[test]
fn dff_emits_vhdl_entity_and_clocked_process() {
    trace_init();
    let report = Converter::new(Target::Vhdl).render(&dff_design());
    assert!(report.is_success(), "{:?}", report.diagnostics);
    let text = &report.file("dff.vhd").unwrap().contents;
    assert!(text.contains("entity dff is"));
    assert!(text.contains("clk : in std_logic"));
    assert!(text.contains("q : out std_logic"));
    assert!(text.contains("rising_edge(clk)"));
    assert!(text.contains("end architecture rtl;"));
}

#[test]
fn systemverilog_uses_logic_and_always_ff() {
    trace_init();
    let report = Converter::new(Target::SystemVerilog).render(&dff_design());
    assert!(report.is_success());
    let text = &report.file("dff.sv").unwrap().contents;
    assert!(text.contains("input  logic clk"));
    assert!(text.contains("always_ff @(posedge clk)"));
}

fn rom_design() -> (Design, SignalId, SignalId) {
    let mut design = Design::new();
    let (sel, dout) = design
        .build_top("romreader", |ctx| {
            let rom = ctx.rom("table", vec![10, 20, 30, 40, 50, 60, 70, 80]);
            let sel = ctx.signal("sel", Val::Vec(bitvec(0, 0, 8).unwrap()));
            let dout = ctx.signal("dout", Val::Vec(bitvec(0, 0, 128).unwrap()));
            ctx.always_comb(vec![Stmt::assign(
                dout,
                E::RomRead {
                    rom,
                    index: Box::new(E::sig(sel)),
                },
            )])?;
            Ok((sel, dout))
        })
        .unwrap();
    (design, sel, dout)
}

#[test]
fn rom_becomes_case_table_with_default() {
    trace_init();
    let (design, _, _) = rom_design();
    let report = Converter::new(Target::Verilog).render(&design);
    assert!(report.is_success(), "{:?}", report.diagnostics);
    let text = &report.file("romreader.v").unwrap().contents;
    assert!(text.contains("case (sel)"));
    for i in 0..8 {
        assert!(text.contains(&format!("{i}: begin")), "missing branch {i}");
    }
    assert!(text.contains("default: begin"));
    assert!(text.contains("dout <= 60;"));
}

/// Drives one signal once after a delay, then finishes.
struct Poke {
    sig: SignalId,
    delay: u64,
    val: Val,
    armed: bool,
}

impl Process for Poke {
    fn step(&mut self, io: &mut ProcIo<'_>) -> Result<StepResult, SimError> {
        if self.armed {
            io.set_next(self.sig, self.val.clone())?;
            Ok(StepResult::Done)
        } else {
            self.armed = true;
            Ok(StepResult::Yield(Trigger::Delay(self.delay)))
        }
    }
}

#[test]
fn rom_read_simulates_to_table_entry() {
    trace_init();
    let mut design = Design::new();
    let dout = design
        .build_top("romreader", |ctx| {
            let rom = ctx.rom("table", vec![10, 20, 30, 40, 50, 60, 70, 80]);
            let sel = ctx.signal("sel", Val::Vec(bitvec(0, 0, 8).unwrap()));
            let dout = ctx.signal("dout", Val::Vec(bitvec(0, 0, 128).unwrap()));
            ctx.always_comb(vec![Stmt::assign(
                dout,
                E::RomRead {
                    rom,
                    index: Box::new(E::sig(sel)),
                },
            )])?;
            ctx.instance(
                "poke",
                Box::new(Poke {
                    sig: sel,
                    delay: 1,
                    val: Val::Int(5),
                    armed: false,
                }),
            )?;
            Ok(dout)
        })
        .unwrap();
    let mut sim = Simulation::new(design);
    assert_eq!(sim.run(Some(10)).unwrap(), RunOutcome::Quiescent);
    assert_eq!(sim.design().signal(dout).val().as_i128(), Some(60));
}

#[test]
fn signed_mixing_inserts_sign_casts() {
    trace_init();
    let mut design = Design::new();
    design
        .build_top("mixer", |ctx| {
            let u = ctx.signal("u", Val::Vec(bitvec(0, 0, 8).unwrap()));
            let s = ctx.signal("s", Val::Vec(bitvec(0, -4, 4).unwrap()));
            let y = ctx.signal("y", Val::Vec(bitvec(0, -32, 32).unwrap()));
            ctx.always_comb(vec![Stmt::assign(y, E::add(E::sig(u), E::sig(s)))])?;
            Ok(())
        })
        .unwrap();
    let report = Converter::new(Target::Verilog).render(&design);
    assert!(report.is_success(), "{:?}", report.diagnostics);
    let text = &report.file("mixer.v").unwrap().contents;
    assert!(text.contains("$signed(u)"));
    assert!(text.contains("signed [5:0] y") || text.contains("output wire signed"));
}

fn two_level_design() -> Design {
    let mut design = Design::new();
    design
        .build_top("outer", |ctx| {
            let a = ctx.signal("a", Val::Vec(bitvec(0, 0, 16).unwrap()));
            let y = ctx.signal("y", Val::Vec(bitvec(0, 0, 32).unwrap()));
            ctx.instantiate("incr", |c| {
                c.port("a", a);
                c.port("y", y);
                c.always_comb(vec![Stmt::assign(y, E::add(E::sig(a), E::lit(1)))])?;
                Ok(())
            })?;
            Ok(())
        })
        .unwrap();
    design
}

#[test]
fn flat_conversion_inlines_sub_blocks() {
    trace_init();
    let report = Converter::new(Target::Verilog).render(&two_level_design());
    assert!(report.is_success(), "{:?}", report.diagnostics);
    let text = &report.file("outer.v").unwrap().contents;
    assert_eq!(text.matches("module ").count(), 1);
    assert!(text.contains("module outer ("));
    assert!(!text.contains("module incr"));
}

#[test]
fn hierarchical_conversion_emits_sub_modules_and_instances() {
    trace_init();
    let report = Converter::new(Target::Verilog)
        .hierarchical(Hierarchy::Full)
        .render(&two_level_design());
    assert!(report.is_success(), "{:?}", report.diagnostics);
    let text = &report.file("outer.v").unwrap().contents;
    assert!(text.contains("module outer ("));
    assert!(text.contains("module incr ("));
    assert!(text.contains("incr incr ("));
    assert!(text.contains(".a(a)"));
    assert!(text.contains(".y(y)"));
}

#[test]
fn analysis_errors_accumulate_and_block_output() {
    trace_init();
    let mut design = Design::new();
    design
        .build_top("bad", |ctx| {
            let out = ctx.signal("out", Val::Bit(false));
            let wide = ctx.signal("wide", Val::Vec(BitVec::unconstrained(0)));
            ctx.instantiate("inner", |c| {
                let mid = c.signal("mid", Val::Bit(false));
                c.always_comb(vec![Stmt::assign(out, E::sig(mid))])?;
                c.always_comb(vec![Stmt::assign(wide, E::sig(mid))])?;
                Ok(())
            })?;
            Ok(())
        })
        .unwrap();
    let report = Converter::new(Target::Verilog).render(&design);
    assert!(report.error_count() >= 2);
    assert!(report.files.is_empty());
    let codes: Vec<ConvCode> = report.diagnostics.iter().map(|d| d.code).collect();
    assert!(codes.contains(&ConvCode::UndrivenSignal));
    assert!(codes.contains(&ConvCode::UndefinedBitWidth));
}

#[test]
fn counter_initial_values_and_testbench() {
    trace_init();
    let mut design = Design::new();
    design
        .build_top("counter", |ctx| {
            let clk = ctx.signal("clk", Val::Bit(false));
            let count = ctx.signal(
                "count",
                Val::Vec(rtl_lite_core::modbv(0, 0, 8).unwrap()),
            );
            let q = ctx.signal("q", Val::Vec(bitvec(0, 0, 8).unwrap()));
            ctx.always_seq(
                ClockEdge::pos(clk),
                None,
                vec![Stmt::assign(count, E::add(E::sig(count), E::lit(1)))],
            )?;
            ctx.always_comb(vec![Stmt::assign(q, E::sig(count))])?;
            Ok(())
        })
        .unwrap();
    let report = Converter::new(Target::Verilog)
        .initial_values(true)
        .testbench(true)
        .trace(true)
        .render(&design);
    assert!(report.is_success(), "{:?}", report.diagnostics);
    let text = &report.file("counter.v").unwrap().contents;
    assert!(text.contains("reg [2:0] count = 0;"));
    let tb = &report.file("tb_counter.v").unwrap().contents;
    assert!(tb.contains("module tb_counter;"));
    assert!(tb.contains("counter dut ("));
    assert!(tb.contains("$dumpfile(\"tb_counter.vcd\");"));
}

#[test]
fn convert_writes_files_to_directory() {
    trace_init();
    let dir = tempfile::tempdir().unwrap();
    let report = Converter::new(Target::Verilog)
        .directory(dir.path())
        .convert(&dff_design())
        .unwrap();
    assert!(report.is_success());
    let path = dir.path().join("dff.v");
    let text = std::fs::read_to_string(path).unwrap();
    assert!(text.contains("module dff ("));
}

#[test]
fn conversion_is_idempotent_on_the_emitted_text() {
    trace_init();
    let design = dff_design();
    let a = Converter::new(Target::Verilog).render(&design);
    let b = Converter::new(Target::Verilog).render(&design);
    assert_eq!(
        a.file("dff.v").unwrap().contents,
        b.file("dff.v").unwrap().contents
    );
}

#[test]
fn open_port_markers_suppress_flow_diagnostics() {
    trace_init();
    let mut design = Design::new();
    let (mid, dbg, spare) = design
        .build_top("open", |ctx| {
            let out = ctx.signal("out", Val::Bit(false));
            let spare = ctx.signal("spare", Val::Bit(false));
            let (mid, dbg) = ctx.instantiate("inner", |c| {
                let mid = c.signal("mid", Val::Bit(false));
                let dbg = c.signal("dbg", Val::Bit(false));
                c.always_comb(vec![Stmt::assign(out, E::sig(mid))])?;
                c.always_comb(vec![Stmt::assign(dbg, E::sig(out))])?;
                Ok((mid, dbg))
            })?;
            Ok((mid, dbg, spare))
        })
        .unwrap();

    // without the markers all three signals are flow violations: mid is
    // read but driven by nobody, dbg is driven but read by nobody, and
    // spare takes part in nothing at all
    let before = Converter::new(Target::Verilog).render(&design);
    assert!(before
        .diagnostics
        .iter()
        .any(|d| d.code == ConvCode::UndrivenSignal));
    assert!(before
        .diagnostics
        .iter()
        .any(|d| d.code == ConvCode::UnreadSignal));
    assert!(before
        .diagnostics
        .iter()
        .any(|d| d.code == ConvCode::UnusedPort));
    assert!(before.files.is_empty());

    // declaring the externally handled directions clears every finding
    design.mark_driven(mid, Drive::Wire);
    design.mark_read(dbg);
    design.mark_read(spare);
    let report = Converter::new(Target::Verilog).render(&design);
    assert!(report.is_success(), "{:?}", report.diagnostics);
    assert!(!report.diagnostics.iter().any(|d| matches!(
        d.code,
        ConvCode::UndrivenSignal | ConvCode::UnreadSignal | ConvCode::UnusedPort
    )));
    // a marked-read top signal joins the interface as an input
    let text = &report.file("open.v").unwrap().contents;
    assert!(text.contains("input  wire spare"));
}

#[test]
fn report_serializes_to_json() {
    trace_init();
    let report = Converter::new(Target::Verilog).render(&dff_design());
    let json = report.to_json().unwrap();
    assert!(json.contains("\"diagnostics\""));
    assert!(json.contains("dff.v"));
    let back = rtl_lite_convert::ConvReport::from_json(&json).unwrap();
    assert_eq!(back.error_count(), report.error_count());
    assert_eq!(back.files.len(), report.files.len());
}
