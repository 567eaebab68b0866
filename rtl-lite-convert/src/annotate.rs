//! Type annotation: behavioural trees to the canonical typed IR.
//!
//! One walk per process body computes signedness and width at every
//! node, inserts explicit sign casts where unsigned and maybe-negative
//! operands meet, and lowers the two table forms (eligible if-chains and
//! ROM subscripts) to case statements.

use std::collections::{BTreeMap, HashMap};

use rtl_lite_core::ast::{BinOp, CmpOp, Expr, FuncId, LValue, Stmt, UnOp};
use rtl_lite_core::{Design, ProcId, SignalKind, Val};

use crate::analyze::{Analysis, ProcInfo};
use crate::diag::{ConvCode, Diagnostic, Diagnostics};
use crate::ir::{FunctionIr, TExpr, TExprKind, TLValue, TStmt, VType};

/// Annotated process bodies plus the functions they reference.
pub struct Annotated {
    /// Typed body and variable table per tree process.
    pub procs: BTreeMap<u32, (Vec<TStmt>, Vec<(String, VType)>)>,
    pub functions: Vec<FunctionIr>,
}

impl Annotated {
    pub fn body_of(&self, id: ProcId) -> Option<&(Vec<TStmt>, Vec<(String, VType)>)> {
        self.procs.get(&id.0)
    }
}

/// Value type of a signal as seen by expressions.
pub fn sig_vtype(design: &Design, sig: rtl_lite_core::SignalId) -> VType {
    let s = design.signal(sig);
    match s.kind() {
        SignalKind::Bit => VType::bit(),
        SignalKind::Int => VType::int(),
        SignalKind::BitVec => match s.init() {
            Val::Vec(v) => VType {
                signed: v.is_signed(),
                nrbits: v.nrbits(),
            },
            _ => VType::int(),
        },
        SignalKind::Enum => VType::unsigned(s.nrbits()),
    }
}

pub fn annotate(design: &Design, analysis: &Analysis, diags: &mut Diagnostics) -> Annotated {
    let mut functions: Vec<FunctionIr> = Vec::new();
    let mut procs = BTreeMap::new();
    for info in &analysis.procs {
        let mut cx = Annotator {
            design,
            diags,
            proc: info,
            vars: HashMap::new(),
            var_order: Vec::new(),
            functions: &mut functions,
        };
        let body = cx.stmts(&info.body);
        let vars = cx.var_order.clone();
        procs.insert(info.id.0, (body, vars));
    }
    Annotated { procs, functions }
}

struct Annotator<'a> {
    design: &'a Design,
    diags: &'a mut Diagnostics,
    proc: &'a ProcInfo,
    vars: HashMap<String, VType>,
    var_order: Vec<(String, VType)>,
    functions: &'a mut Vec<FunctionIr>,
}

impl Annotator<'_> {
    fn stmts(&mut self, body: &[Stmt]) -> Vec<TStmt> {
        body.iter().filter_map(|s| self.stmt(s)).collect()
    }

    fn stmt(&mut self, stmt: &Stmt) -> Option<TStmt> {
        match stmt {
            Stmt::Assign { dst, src } => {
                // a whole-signal ROM subscript lowers to a case table
                if let (LValue::Sig(_), Expr::RomRead { rom, index }) = (dst, src) {
                    return Some(self.rom_case(dst, *rom, index));
                }
                let src_t = self.expr(src, true);
                let dst_t = self.lvalue(dst, &src_t);
                Some(TStmt::Assign {
                    dst: dst_t,
                    src: src_t,
                })
            }
            Stmt::If { arms, orelse } => {
                if let Some(case) = self.try_case(arms, orelse) {
                    return Some(case);
                }
                let arms = arms
                    .iter()
                    .map(|(test, body)| (self.expr(test, false), self.stmts(body)))
                    .collect();
                Some(TStmt::If {
                    arms,
                    orelse: self.stmts(orelse),
                })
            }
            Stmt::For {
                var,
                start,
                end,
                body,
            } => {
                self.bind_var(var, VType::unsigned(0));
                Some(TStmt::For {
                    var: var.clone(),
                    start: *start,
                    end: *end,
                    body: self.stmts(body),
                })
            }
            // rejected by the analyser; nothing sensible to emit
            Stmt::While { .. } => None,
            Stmt::TaskCall { .. } => {
                self.error(
                    ConvCode::UnsupportedConstruct,
                    "task calls are simulation-only",
                );
                None
            }
            Stmt::Assert { test, msg } => Some(TStmt::Assert {
                test: self.expr(test, false),
                msg: msg.clone(),
            }),
            Stmt::Print { format, args } => Some(TStmt::Print {
                format: format.clone(),
                args: args.iter().map(|a| self.expr(a, false)).collect(),
            }),
            Stmt::Return(_) => {
                self.error(
                    ConvCode::UnsupportedConstruct,
                    "return outside a function body",
                );
                None
            }
        }
    }

    /// If-chain testing one subject against disjoint constants → case.
    fn try_case(&mut self, arms: &[(Expr, Vec<Stmt>)], orelse: &[Stmt]) -> Option<TStmt> {
        if arms.len() < 2 {
            return None;
        }
        let mut subject: Option<&Expr> = None;
        let mut labels: Vec<i128> = Vec::new();
        for (test, _) in arms {
            let Expr::Cmp { op: CmpOp::Eq, left, right } = test else {
                return None;
            };
            let (subj, lit) = match (&**left, &**right) {
                (s, Expr::Lit(v)) => (s, *v),
                (Expr::Lit(v), s) => (s, *v),
                _ => return None,
            };
            match subject {
                None => subject = Some(subj),
                Some(prev) if prev == subj => {}
                Some(_) => return None,
            }
            if labels.contains(&lit) {
                return None;
            }
            labels.push(lit);
        }
        let subject_t = self.expr(subject?, false);
        let arms_t = labels
            .into_iter()
            .zip(arms.iter())
            .map(|(label, (_, body))| (label, self.stmts(body)))
            .collect();
        Some(TStmt::Case {
            subject: subject_t,
            arms: arms_t,
            default: self.stmts(orelse),
        })
    }

    /// `sig.next = rom[index]` → case over the table.
    fn rom_case(&mut self, dst: &LValue, rom: rtl_lite_core::ast::RomId, index: &Expr) -> TStmt {
        let table = self.design.rom(rom).table.clone();
        let rom_vt = rom_vtype(&table);
        let index_t = self.expr(index, false);
        let arms = table
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let src = TExpr {
                    kind: TExprKind::Lit(*v),
                    vt: rom_vt,
                };
                let dst_t = self.lvalue(dst, &src);
                (i as i128, vec![TStmt::Assign { dst: dst_t, src }])
            })
            .collect::<Vec<_>>();
        let default = {
            let v = *table.last().unwrap_or(&0);
            let src = TExpr {
                kind: TExprKind::Lit(v),
                vt: rom_vt,
            };
            let dst_t = self.lvalue(dst, &src);
            vec![TStmt::Assign { dst: dst_t, src }]
        };
        TStmt::Case {
            subject: index_t,
            arms,
            default,
        }
    }

    fn lvalue(&mut self, dst: &LValue, src: &TExpr) -> TLValue {
        match dst {
            LValue::Sig(s) => TLValue::Sig(*s),
            LValue::SigSlice { sig, hi, lo } => TLValue::SigSlice {
                sig: *sig,
                hi: *hi,
                lo: *lo,
            },
            LValue::SigBit { sig, index } => TLValue::SigBit {
                sig: *sig,
                index: Box::new(self.expr(index, false)),
            },
            LValue::Mem { mem, index } => TLValue::Mem {
                mem: *mem,
                index: Box::new(self.expr(index, false)),
            },
            LValue::Var(name) => {
                self.bind_var(name, src.vt);
                TLValue::Var(name.clone())
            }
        }
    }

    /// First assignment fixes a variable's type; later assignments must
    /// agree in signedness and width.
    fn bind_var(&mut self, name: &str, vt: VType) {
        match self.vars.get(name) {
            None => {
                self.vars.insert(name.to_string(), vt);
                self.var_order.push((name.to_string(), vt));
            }
            Some(prev) => {
                if prev.signed != vt.signed {
                    self.error(
                        ConvCode::TypeMismatch,
                        format!("variable '{name}' changes signedness between assignments"),
                    );
                } else if prev.nrbits != vt.nrbits {
                    self.error(
                        ConvCode::NrBitsMismatch,
                        format!("variable '{name}' changes width between assignments"),
                    );
                }
            }
        }
    }

    fn expr(&mut self, e: &Expr, top_rhs: bool) -> TExpr {
        match e {
            Expr::Lit(v) => TExpr {
                kind: TExprKind::Lit(*v),
                vt: VType {
                    signed: *v < 0,
                    nrbits: 0,
                },
            },
            Expr::BoolLit(b) => TExpr {
                kind: TExprKind::Bool(*b),
                vt: VType::bit(),
            },
            Expr::EnumLit(ty, index) => TExpr {
                kind: TExprKind::EnumRef {
                    ty: *ty,
                    index: *index,
                },
                vt: VType::unsigned(self.design.enum_type(*ty).nrbits),
            },
            Expr::Sig(s) => TExpr {
                kind: TExprKind::Sig(*s),
                vt: sig_vtype(self.design, *s),
            },
            Expr::Var(name) => {
                let vt = match self.vars.get(name) {
                    Some(vt) => *vt,
                    None => {
                        self.error(
                            ConvCode::UnboundLocal,
                            format!("variable '{name}' may be read before assignment"),
                        );
                        VType::int()
                    }
                };
                TExpr {
                    kind: TExprKind::Var(name.clone()),
                    vt,
                }
            }
            Expr::Binary { op, left, right } => self.binary(*op, left, right, top_rhs),
            Expr::Unary { op, arg } => {
                let arg_t = self.expr(arg, false);
                let vt = match op {
                    UnOp::Neg => VType {
                        signed: true,
                        nrbits: arg_t.vt.nrbits + 1,
                    },
                    UnOp::Invert => arg_t.vt,
                    UnOp::Not => VType::bit(),
                };
                TExpr {
                    kind: TExprKind::Unary {
                        op: *op,
                        arg: Box::new(arg_t),
                    },
                    vt,
                }
            }
            Expr::Cmp { op, left, right } => {
                let mut l = self.expr(left, false);
                let mut r = self.expr(right, false);
                // an unsigned side facing a maybe-negative side compares
                // as signed, one bit wider
                if !l.vt.signed && l.vt.nrbits > 0 && r.vt.signed {
                    l = sign_cast(l, true);
                }
                if !r.vt.signed && r.vt.nrbits > 0 && l.vt.signed {
                    r = sign_cast(r, true);
                }
                TExpr {
                    kind: TExprKind::Cmp {
                        op: *op,
                        left: Box::new(l),
                        right: Box::new(r),
                    },
                    vt: VType::bit(),
                }
            }
            Expr::Logic { op, terms } => TExpr {
                kind: TExprKind::Logic {
                    op: *op,
                    terms: terms.iter().map(|t| self.expr(t, false)).collect(),
                },
                vt: VType::bit(),
            },
            Expr::Cond { test, then, orelse } => {
                let test_t = self.expr(test, false);
                let then_t = self.expr(then, top_rhs);
                let orelse_t = self.expr(orelse, top_rhs);
                let vt = VType {
                    signed: then_t.vt.signed || orelse_t.vt.signed,
                    nrbits: then_t.vt.nrbits.max(orelse_t.vt.nrbits),
                };
                TExpr {
                    kind: TExprKind::Cond {
                        test: Box::new(test_t),
                        then: Box::new(then_t),
                        orelse: Box::new(orelse_t),
                    },
                    vt,
                }
            }
            Expr::Bit { arg, index } => {
                let arg_t = self.expr(arg, false);
                let index_t = self.expr(index, false);
                TExpr {
                    kind: TExprKind::Bit {
                        arg: Box::new(arg_t),
                        index: Box::new(index_t),
                    },
                    vt: VType::bit(),
                }
            }
            Expr::Slice { arg, hi, lo } => {
                let arg_t = self.expr(arg, false);
                TExpr {
                    kind: TExprKind::Slice {
                        arg: Box::new(arg_t),
                        hi: *hi,
                        lo: *lo,
                    },
                    vt: VType::unsigned(hi - lo),
                }
            }
            Expr::MemRead { mem, index } => {
                let elem = self.design.memory(*mem).elements[0];
                let vt = sig_vtype(self.design, elem);
                TExpr {
                    kind: TExprKind::MemRead {
                        mem: *mem,
                        index: Box::new(self.expr(index, false)),
                    },
                    vt,
                }
            }
            Expr::RomRead { rom, index } => {
                let vt = rom_vtype(&self.design.rom(*rom).table);
                TExpr {
                    kind: TExprKind::RomRead {
                        rom: *rom,
                        index: Box::new(self.expr(index, false)),
                    },
                    vt,
                }
            }
            Expr::Concat(terms) => {
                let terms_t: Vec<TExpr> =
                    terms.iter().map(|t| self.expr(t, false)).collect();
                let mut width = 0;
                for t in &terms_t {
                    if t.vt.nrbits == 0 {
                        self.error(
                            ConvCode::UndefinedBitWidth,
                            "concatenation operand needs a defined width",
                        );
                    }
                    width += t.vt.nrbits;
                }
                TExpr {
                    kind: TExprKind::Concat(terms_t),
                    vt: VType::unsigned(width),
                }
            }
            Expr::Signed(arg) => {
                let arg_t = self.expr(arg, false);
                let w = arg_t.vt.nrbits;
                TExpr {
                    kind: TExprKind::SignCast {
                        to_signed: true,
                        arg: Box::new(arg_t),
                    },
                    vt: VType::signed(w),
                }
            }
            Expr::Unsigned(arg) => {
                let arg_t = self.expr(arg, false);
                let w = arg_t.vt.nrbits;
                TExpr {
                    kind: TExprKind::SignCast {
                        to_signed: false,
                        arg: Box::new(arg_t),
                    },
                    vt: VType::unsigned(w),
                }
            }
            Expr::Call { func, args } => {
                let args_t: Vec<TExpr> = args.iter().map(|a| self.expr(a, false)).collect();
                let ret = self.annotate_function(*func, &args_t);
                TExpr {
                    kind: TExprKind::Call {
                        func: *func,
                        args: args_t,
                    },
                    vt: ret,
                }
            }
            Expr::Now => {
                self.error(
                    ConvCode::UnsupportedConstruct,
                    "simulation time is not available in hardware",
                );
                TExpr {
                    kind: TExprKind::Lit(0),
                    vt: VType::int(),
                }
            }
        }
    }

    fn binary(&mut self, op: BinOp, left: &Expr, right: &Expr, top_rhs: bool) -> TExpr {
        let mut l = self.expr(left, false);
        let mut r = self.expr(right, false);

        // unsigned operand facing a maybe-negative one: promote to
        // signed, one bit wider, so the emitted arithmetic is signed
        if matches!(op, BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::FloorDiv | BinOp::Mod) {
            if !l.vt.signed && l.vt.nrbits > 0 && r.vt.signed {
                l = sign_cast(l, true);
            }
            if !r.vt.signed && r.vt.nrbits > 0 && l.vt.signed {
                r = sign_cast(r, true);
            }
        }

        let (lw, rw) = (l.vt.nrbits, r.vt.nrbits);
        let vt = match op {
            BinOp::Add | BinOp::Sub => VType {
                signed: l.vt.signed || r.vt.signed || op == BinOp::Sub,
                nrbits: lw.max(rw) + if top_rhs { 1 } else { 0 },
            },
            BinOp::Mul => VType {
                signed: l.vt.signed || r.vt.signed,
                nrbits: lw + rw,
            },
            BinOp::FloorDiv | BinOp::Mod => VType {
                signed: l.vt.signed || r.vt.signed,
                nrbits: lw,
            },
            BinOp::Shl => {
                let k = match &r.kind {
                    TExprKind::Lit(v) if *v >= 0 => *v as u32,
                    _ => 0,
                };
                VType {
                    signed: l.vt.signed,
                    nrbits: lw + k,
                }
            }
            BinOp::Shr => VType {
                signed: l.vt.signed,
                nrbits: lw,
            },
            BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor => VType {
                signed: l.vt.signed && r.vt.signed,
                nrbits: lw.max(rw),
            },
        };
        TExpr {
            kind: TExprKind::Binary {
                op,
                left: Box::new(l),
                right: Box::new(r),
            },
            vt,
        }
    }

    /// Annotate a function on first use; parameter types come from the
    /// first call site.
    fn annotate_function(&mut self, func: FuncId, args: &[TExpr]) -> VType {
        let decl = self.design.function(func);
        let ret = VType {
            signed: decl.ret_signed,
            nrbits: decl.ret_nrbits,
        };
        if self.functions.iter().any(|f| f.func == func) {
            return ret;
        }
        let params: Vec<(String, VType)> = decl
            .params
            .iter()
            .zip(args)
            .map(|(p, a)| (p.clone(), a.vt))
            .collect();
        // annotate the body in a scope where only the params are bound
        let saved_vars = std::mem::take(&mut self.vars);
        let saved_order = std::mem::take(&mut self.var_order);
        for (p, vt) in &params {
            self.vars.insert(p.clone(), *vt);
        }
        let body: Vec<TStmt> = decl
            .body
            .iter()
            .filter_map(|s| match s {
                Stmt::Return(Some(e)) => {
                    let e_t = self.expr(e, false);
                    Some(TStmt::Assign {
                        dst: TLValue::Var(decl.name.clone()),
                        src: e_t,
                    })
                }
                other => self.stmt(other),
            })
            .collect();
        self.vars = saved_vars;
        self.var_order = saved_order;
        self.functions.push(FunctionIr {
            func,
            name: decl.name.clone(),
            params,
            ret,
            body,
        });
        ret
    }

    fn error(&mut self, code: ConvCode, message: impl Into<String>) {
        self.diags
            .push(Diagnostic::error(code, message).in_process(&self.proc.name));
    }
}

fn sign_cast(e: TExpr, to_signed: bool) -> TExpr {
    let vt = VType {
        signed: to_signed,
        nrbits: e.vt.nrbits + 1,
    };
    TExpr {
        kind: TExprKind::SignCast {
            to_signed,
            arg: Box::new(e),
        },
        vt,
    }
}

fn rom_vtype(table: &[i128]) -> VType {
    let signed = table.iter().any(|v| *v < 0);
    let nrbits = table
        .iter()
        .map(|v| {
            if *v >= 0 {
                rtl_lite_core::bitvec::bitlen(*v) + signed as u32
            } else {
                rtl_lite_core::bitvec::bitlen(-*v - 1) + 1
            }
        })
        .max()
        .unwrap_or(1);
    VType { signed, nrbits }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::analyze;
    use rtl_lite_core::ast::Expr as E;
    use rtl_lite_core::{bitvec, ClockEdge};

    fn annotate_design(design: &Design) -> (Annotated, Diagnostics) {
        let mut diags = Diagnostics::new();
        let analysis = analyze(design, &mut diags);
        let annotated = annotate(design, &analysis, &mut diags);
        (annotated, diags)
    }

    #[test]
    fn mixed_sign_add_promotes_unsigned_side() {
        let mut design = Design::new();
        let pid = design
            .build_top("t", |ctx| {
                let u = ctx.signal("u", Val::Vec(bitvec(5, 0, 8).unwrap()));
                let s = ctx.signal("s", Val::Vec(bitvec(-3, -4, 4).unwrap()));
                let y = ctx.signal("y", Val::Vec(bitvec(0, -16, 16).unwrap()));
                let pid = ctx.always_comb(vec![Stmt::assign(y, E::add(E::sig(u), E::sig(s)))])?;
                Ok(pid)
            })
            .unwrap();
        let (annotated, diags) = annotate_design(&design);
        assert_eq!(diags.error_count(), 0);
        let (body, _) = annotated.body_of(pid).unwrap();
        let TStmt::Assign { src, .. } = &body[0] else {
            panic!("expected assignment")
        };
        assert!(src.vt.signed);
        // promoted left side is 4 bits, right 3; top-level rhs adds the
        // carry bit
        assert_eq!(src.vt.nrbits, 5);
        let TExprKind::Binary { left, .. } = &src.kind else {
            panic!("expected binary")
        };
        assert!(matches!(left.kind, TExprKind::SignCast { to_signed: true, .. }));
    }

    #[test]
    fn if_chain_over_constants_becomes_case() {
        let mut design = Design::new();
        let pid = design
            .build_top("t", |ctx| {
                let sel = ctx.signal("sel", Val::Vec(bitvec(0, 0, 4).unwrap()));
                let y = ctx.signal("y", Val::Vec(bitvec(0, 0, 16).unwrap()));
                let body = vec![Stmt::If {
                    arms: vec![
                        (E::eq(E::sig(sel), E::lit(0)), vec![Stmt::assign(y, E::lit(1))]),
                        (E::eq(E::sig(sel), E::lit(1)), vec![Stmt::assign(y, E::lit(2))]),
                        (E::eq(E::sig(sel), E::lit(2)), vec![Stmt::assign(y, E::lit(4))]),
                    ],
                    orelse: vec![Stmt::assign(y, E::lit(0))],
                }];
                let pid = ctx.always_comb(body)?;
                Ok(pid)
            })
            .unwrap();
        let (annotated, diags) = annotate_design(&design);
        assert_eq!(diags.error_count(), 0);
        let (body, _) = annotated.body_of(pid).unwrap();
        let TStmt::Case { arms, default, .. } = &body[0] else {
            panic!("expected case, got {:?}", body[0])
        };
        assert_eq!(arms.len(), 3);
        assert!(!default.is_empty());
    }

    #[test]
    fn rom_subscript_becomes_case_table() {
        let mut design = Design::new();
        let pid = design
            .build_top("t", |ctx| {
                let rom = ctx.rom("table", vec![10, 20, 30, 40]);
                let sel = ctx.signal("sel", Val::Vec(bitvec(0, 0, 4).unwrap()));
                let y = ctx.signal("y", Val::Vec(bitvec(0, 0, 64).unwrap()));
                let pid = ctx.always_comb(vec![Stmt::assign(
                    y,
                    E::RomRead {
                        rom,
                        index: Box::new(E::sig(sel)),
                    },
                )])?;
                Ok(pid)
            })
            .unwrap();
        let (annotated, diags) = annotate_design(&design);
        assert_eq!(diags.error_count(), 0);
        let (body, _) = annotated.body_of(pid).unwrap();
        let TStmt::Case { arms, .. } = &body[0] else {
            panic!("expected case")
        };
        assert_eq!(arms.len(), 4);
    }

    #[test]
    fn slice_is_unsigned_of_its_width() {
        let mut design = Design::new();
        let pid = design
            .build_top("t", |ctx| {
                let clk = ctx.signal("clk", Val::Bit(false));
                let a = ctx.signal("a", Val::Vec(bitvec(0, -128, 128).unwrap()));
                let y = ctx.signal("y", Val::Vec(bitvec(0, 0, 16).unwrap()));
                let pid = ctx.always_seq(
                    ClockEdge::pos(clk),
                    None,
                    vec![Stmt::assign(y, E::slice(E::sig(a), 4, 0))],
                )?;
                Ok(pid)
            })
            .unwrap();
        let (annotated, _) = annotate_design(&design);
        let (body, _) = annotated.body_of(pid).unwrap();
        let TStmt::Assign { src, .. } = &body[0] else {
            panic!("expected assignment")
        };
        assert!(!src.vt.signed);
        assert_eq!(src.vt.nrbits, 4);
    }
}
