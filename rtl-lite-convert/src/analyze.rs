//! Per-process analysis and signal flow validation.
//!
//! Walks every tree process of the design: resolves its reads and
//! writes, classifies it, and checks the flow rules (driven/read,
//! widths, ports). All findings are accumulated; nothing stops at the
//! first error.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::debug;

use rtl_lite_core::ast::{visit_stmt_reads, visit_stmt_writes, ReadRef, Stmt, WriteRef};
use rtl_lite_core::design::{ProcKind, SymEntry};
use rtl_lite_core::{
    BlockId, ClockEdge, Design, ProcId, Reset, SignalFlavor, SignalId, SignalKind, Val,
};

use crate::diag::{ConvCode, Diagnostic, Diagnostics};

/// Conversion-facing classification of one process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcClass {
    Always,
    AlwaysComb,
    /// A combinational body that is one unconditional assignment; emitted
    /// as a continuous assignment.
    SimpleComb,
    AlwaysSeq,
    Initial,
}

#[derive(Clone)]
pub struct ProcInfo {
    pub id: ProcId,
    pub name: String,
    pub block: BlockId,
    pub class: ProcClass,
    pub sens: Vec<SignalId>,
    pub edge: Option<ClockEdge>,
    pub reset: Option<Reset>,
    pub inputs: Vec<SignalId>,
    pub outputs: Vec<SignalId>,
    pub body: Arc<Vec<Stmt>>,
}

/// Output of the analysis pass.
pub struct Analysis {
    pub procs: Vec<ProcInfo>,
    /// Tree-process drivers per signal.
    pub drivers: BTreeMap<SignalId, Vec<ProcId>>,
    /// Signals read by any tree process (clocks and resets included).
    pub read: BTreeSet<SignalId>,
}

impl Analysis {
    pub fn is_driven(&self, sig: SignalId) -> bool {
        self.drivers.contains_key(&sig)
    }

    pub fn is_read(&self, sig: SignalId) -> bool {
        self.read.contains(&sig)
    }
}

/// Display name for diagnostics.
pub fn sig_name(design: &Design, sig: SignalId) -> String {
    let s = design.signal(sig);
    s.abs_name
        .clone()
        .or_else(|| s.name.clone())
        .unwrap_or_else(|| format!("sig#{}", sig.0))
}

pub fn analyze(design: &Design, diags: &mut Diagnostics) -> Analysis {
    let mut procs = Vec::new();
    let mut drivers: BTreeMap<SignalId, Vec<ProcId>> = BTreeMap::new();
    let mut read: BTreeSet<SignalId> = BTreeSet::new();

    for (id, decl) in design.procs() {
        let (class, sens, edge, reset, body) = match &decl.kind {
            ProcKind::Always { sens, body } => {
                (ProcClass::Always, sens.clone(), None, None, body.clone())
            }
            ProcKind::AlwaysComb { sens, body } => {
                let class = if is_simple_comb(body) {
                    ProcClass::SimpleComb
                } else {
                    ProcClass::AlwaysComb
                };
                (class, sens.clone(), None, None, body.clone())
            }
            ProcKind::AlwaysSeq { edge, reset, body } => (
                ProcClass::AlwaysSeq,
                Vec::new(),
                Some(*edge),
                *reset,
                body.clone(),
            ),
            ProcKind::Initial { body } => {
                (ProcClass::Initial, Vec::new(), None, None, body.clone())
            }
            ProcKind::Instance(_) => {
                diags.push(
                    Diagnostic::warning(
                        ConvCode::SkippedInstance,
                        "free-running instance process is not convertible; skipped",
                    )
                    .in_process(&decl.name),
                );
                continue;
            }
        };

        let mut inputs: Vec<SignalId> = Vec::new();
        visit_stmt_reads(&body, &mut |r| {
            let expand: Vec<SignalId> = match r {
                ReadRef::Sig(s) => vec![s],
                ReadRef::Mem(m) => design.memory(m).elements.clone(),
                ReadRef::Rom(_) => vec![],
            };
            for s in expand {
                if !inputs.contains(&s) {
                    inputs.push(s);
                }
            }
        });
        let mut outputs: Vec<SignalId> = Vec::new();
        visit_stmt_writes(&body, &mut |w| {
            let expand: Vec<SignalId> = match w {
                WriteRef::Sig(s) => vec![s],
                WriteRef::Mem(m) => design.memory(m).elements.clone(),
            };
            for s in expand {
                if !outputs.contains(&s) {
                    outputs.push(s);
                }
            }
        });

        if matches!(class, ProcClass::AlwaysComb | ProcClass::SimpleComb) && sens.is_empty() {
            diags.push(
                Diagnostic::error(
                    ConvCode::EmptySensitivity,
                    "cannot infer a sensitivity list: the body reads no signals",
                )
                .in_process(&decl.name),
            );
        }

        validate_body(design, &decl.name, &body, diags);

        for &s in &outputs {
            drivers.entry(s).or_default().push(id);
        }
        read.extend(inputs.iter().copied());
        if let Some(e) = edge {
            read.insert(e.sig);
        }
        if let Some(r) = reset {
            read.insert(r.sig);
        }

        debug!(
            process = %decl.name,
            ?class,
            inputs = inputs.len(),
            outputs = outputs.len(),
            "analyzed process"
        );

        procs.push(ProcInfo {
            id,
            name: decl.name.clone(),
            block: decl.block,
            class,
            sens,
            edge,
            reset,
            inputs,
            outputs,
            body,
        });
    }

    let analysis = Analysis {
        procs,
        drivers,
        read,
    };
    validate_signals(design, &analysis, diags);
    validate_blocks(design, &analysis, diags);
    analysis
}

/// A combinational body of exactly one unconditional whole-signal
/// assignment maps to a continuous assignment.
fn is_simple_comb(body: &[Stmt]) -> bool {
    matches!(
        body,
        [Stmt::Assign {
            dst: rtl_lite_core::ast::LValue::Sig(_),
            ..
        }]
    )
}

/// Structural checks on one body: loop forms, variable shadowing.
fn validate_body(design: &Design, proc_name: &str, body: &[Stmt], diags: &mut Diagnostics) {
    // signal names visible anywhere in the design; a local variable with
    // the same name would shadow the hierarchical signal in the emitted HDL
    fn walk(
        design: &Design,
        proc_name: &str,
        stmts: &[Stmt],
        diags: &mut Diagnostics,
    ) {
        for stmt in stmts {
            match stmt {
                Stmt::Assign { dst, .. } => {
                    if let rtl_lite_core::ast::LValue::Var(name) = dst {
                        let clash = design
                            .blocks()
                            .flat_map(|(_, b)| b.symdict.iter())
                            .any(|(n, e)| n == name && matches!(e, SymEntry::Signal { .. }));
                        if clash {
                            diags.push(
                                Diagnostic::error(
                                    ConvCode::ShadowingVar,
                                    format!("variable '{name}' has the same name as a hierarchical signal"),
                                )
                                .in_process(proc_name),
                            );
                        }
                    }
                }
                Stmt::If { arms, orelse } => {
                    for (_, b) in arms {
                        walk(design, proc_name, b, diags);
                    }
                    walk(design, proc_name, orelse, diags);
                }
                Stmt::For { start, end, body, .. } => {
                    if start > end {
                        diags.push(
                            Diagnostic::error(
                                ConvCode::LoopForm,
                                format!("descending loop range {start}..{end} is not supported"),
                            )
                            .in_process(proc_name),
                        );
                    }
                    walk(design, proc_name, body, diags);
                }
                Stmt::While { .. } => {
                    diags.push(
                        Diagnostic::error(
                            ConvCode::UnsupportedConstruct,
                            "while loops cannot be converted; use a static for range",
                        )
                        .in_process(proc_name),
                    );
                }
                Stmt::TaskCall { .. }
                | Stmt::Assert { .. }
                | Stmt::Print { .. }
                | Stmt::Return(_) => {}
            }
        }
    }
    walk(design, proc_name, body, diags);
}

/// Signal flow and width rules over the whole design.
fn validate_signals(design: &Design, analysis: &Analysis, diags: &mut Diagnostics) {
    let top = design.top();
    for (bid, block) in design.blocks() {
        let is_top = Some(bid) == top;
        for (_name, sig) in block.local_signals() {
            let s = design.signal(sig);
            let driven = analysis.is_driven(sig) || s.driven.is_some();
            let read = analysis.is_read(sig) || s.read;

            // multiple tree drivers
            if let Some(drivers) = analysis.drivers.get(&sig) {
                if drivers.len() > 1 {
                    diags.push(
                        Diagnostic::error(ConvCode::MultipleDriven, "signal has multiple drivers")
                            .on_signal(sig_name(design, sig)),
                    );
                }
            }

            // width rules on vector signals that participate at all
            if (driven || read) && s.kind() == SignalKind::BitVec {
                if let Val::Vec(v) = s.init() {
                    if v.nrbits() == 0 {
                        diags.push(
                            Diagnostic::error(
                                ConvCode::UndefinedBitWidth,
                                "bit-vector signal needs an explicit bit width",
                            )
                            .on_signal(sig_name(design, sig)),
                        );
                    }
                    if v.is_modular() && !v.has_full_range() {
                        diags.push(
                            Diagnostic::error(
                                ConvCode::ModularRange,
                                "modular vector must span a full power-of-two range",
                            )
                            .on_signal(sig_name(design, sig)),
                        );
                    }
                }
            }

            if is_top {
                // top locals become the module interface; a signal that is
                // neither driven nor read has no place in it
                if !driven && !read && !matches!(s.flavor, SignalFlavor::Constant) {
                    diags.push(
                        Diagnostic::warning(ConvCode::UnusedPort, "port is not used")
                            .on_signal(sig_name(design, sig)),
                    );
                }
            } else {
                // internal signals must be driven if anyone reads them
                if read && !driven {
                    diags.push(
                        Diagnostic::error(ConvCode::UndrivenSignal, "signal is not driven")
                            .on_signal(sig_name(design, sig)),
                    );
                }
                if driven && !read {
                    diags.push(
                        Diagnostic::warning(
                            ConvCode::UnreadSignal,
                            "signal is driven but never read",
                        )
                        .on_signal(sig_name(design, sig)),
                    );
                }
            }
        }
    }
}

/// Port rules per block: lists as ports, shadowed ports, output ports
/// read back inside the defining block.
fn validate_blocks(design: &Design, analysis: &Analysis, diags: &mut Diagnostics) {
    // the top block's locals are the design interface; an output that is
    // only read by the outside world is fine
    let top_locals: BTreeSet<SignalId> = design
        .top()
        .map(|t| design.block(t).local_signals().map(|(_, s)| s).collect())
        .unwrap_or_default();
    for (bid, block) in design.blocks() {
        let mut seen_local: BTreeSet<&str> = BTreeSet::new();
        for (name, entry) in &block.symdict {
            if let SymEntry::Signal { aliased: false, .. } = entry {
                seen_local.insert(name.as_str());
            }
        }
        for (name, entry) in &block.symdict {
            let SymEntry::Signal { sig, aliased: true } = entry else {
                continue;
            };
            if design.signal(*sig).in_list {
                diags.push(
                    Diagnostic::error(
                        ConvCode::ListAsPort,
                        "a signal inside a list of signals cannot be a port",
                    )
                    .on_signal(sig_name(design, *sig)),
                );
            }
            if seen_local.contains(name.as_str()) {
                diags.push(
                    Diagnostic::error(
                        ConvCode::ShadowingVar,
                        format!("port '{name}' is shadowed by a local signal of the same name"),
                    )
                    .on_signal(sig_name(design, *sig)),
                );
            }
            // a port driven within this block but read by nobody at all;
            // top-interface signals face the outside world and are exempt
            let driven_here = analysis
                .procs
                .iter()
                .filter(|p| p.block == bid)
                .any(|p| p.outputs.contains(sig));
            if driven_here
                && !top_locals.contains(sig)
                && !analysis.is_read(*sig)
                && !design.signal(*sig).read
            {
                diags.push(
                    Diagnostic::error(
                        ConvCode::UnreadSignal,
                        "output port is driven but never read",
                    )
                    .on_signal(sig_name(design, *sig)),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtl_lite_core::ast::Expr as E;

    #[test]
    fn classifies_single_assignment_comb_as_simple() {
        let mut design = Design::new();
        design
            .build_top("t", |ctx| {
                let a = ctx.signal("a", Val::Bit(false));
                let y = ctx.signal("y", Val::Bit(false));
                ctx.always_comb(vec![Stmt::assign(y, E::sig(a))])?;
                Ok(())
            })
            .unwrap();
        let mut diags = Diagnostics::new();
        let analysis = analyze(&design, &mut diags);
        assert_eq!(analysis.procs.len(), 1);
        assert_eq!(analysis.procs[0].class, ProcClass::SimpleComb);
        assert_eq!(diags.error_count(), 0);
    }

    #[test]
    fn undriven_internal_signal_is_an_error() {
        let mut design = Design::new();
        design
            .build_top("t", |ctx| {
                let out = ctx.signal("out", Val::Bit(false));
                ctx.instantiate("inner", |c| {
                    let mid = c.signal("mid", Val::Bit(false));
                    c.always_comb(vec![Stmt::assign(out, E::sig(mid))])?;
                    Ok(())
                })?;
                Ok(())
            })
            .unwrap();
        let mut diags = Diagnostics::new();
        analyze(&design, &mut diags);
        assert!(diags
            .items()
            .iter()
            .any(|d| d.code == ConvCode::UndrivenSignal));
    }

    #[test]
    fn unsized_vector_flagged() {
        let mut design = Design::new();
        design
            .build_top("t", |ctx| {
                let a = ctx.signal("a", Val::Bit(false));
                let y = ctx.signal(
                    "y",
                    Val::Vec(rtl_lite_core::BitVec::unconstrained(0)),
                );
                ctx.always_comb(vec![Stmt::assign(y, E::sig(a))])?;
                Ok(())
            })
            .unwrap();
        let mut diags = Diagnostics::new();
        analyze(&design, &mut diags);
        assert!(diags
            .items()
            .iter()
            .any(|d| d.code == ConvCode::UndefinedBitWidth));
    }

    #[test]
    fn modular_partial_range_flagged() {
        let mut design = Design::new();
        design
            .build_top("t", |ctx| {
                let a = ctx.signal("a", Val::Bit(false));
                let y = ctx.signal(
                    "y",
                    Val::Vec(rtl_lite_core::modbv(2, 1, 6).unwrap()),
                );
                ctx.always_comb(vec![Stmt::assign(y, E::sig(a))])?;
                Ok(())
            })
            .unwrap();
        let mut diags = Diagnostics::new();
        analyze(&design, &mut diags);
        assert!(diags
            .items()
            .iter()
            .any(|d| d.code == ConvCode::ModularRange));
    }

    #[test]
    fn while_loop_is_unsupported() {
        let mut design = Design::new();
        design
            .build_top("t", |ctx| {
                let a = ctx.signal("a", Val::Bit(false));
                let y = ctx.signal("y", Val::Bit(false));
                ctx.always(
                    vec![a],
                    vec![Stmt::While {
                        test: E::sig(a),
                        body: vec![Stmt::assign(y, E::lit(1))],
                    }],
                )?;
                Ok(())
            })
            .unwrap();
        let mut diags = Diagnostics::new();
        analyze(&design, &mut diags);
        assert!(diags
            .items()
            .iter()
            .any(|d| d.code == ConvCode::UnsupportedConstruct));
    }
}
