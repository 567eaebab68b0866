//! Run-to-completion interpreter for behavioural tree bodies.
//!
//! Arithmetic follows the value model: intermediate results are plain
//! integers; bounds are enforced when a result lands on a signal through
//! its setter. Slices and concatenations produce width-carrying vectors.

use std::collections::HashMap;

use crate::ast::{BinOp, CmpOp, Expr, LValue, LogicOp, Stmt, UnOp};
use crate::design::Design;
use crate::errors::SimError;
use crate::signal::{SignalFlavor, SignalId};
use crate::value::Val;

pub(crate) type Vars = HashMap<String, Val>;

/// Control flow out of a statement list.
pub(crate) enum Flow {
    Normal,
    Returned(Option<Val>),
}

/// Queue a next value and enter the signal into the delta update list.
pub(crate) fn queue_next(
    design: &mut Design,
    siglist: &mut Vec<SignalId>,
    sig: SignalId,
    val: Val,
) -> Result<(), SimError> {
    let s = design.signal_mut(sig);
    s.set_next(val)?;
    if !s.queued {
        s.queued = true;
        siglist.push(sig);
    }
    Ok(())
}

pub(crate) struct ExecCtx<'a> {
    pub design: &'a mut Design,
    pub now: u64,
    pub siglist: &'a mut Vec<SignalId>,
}

impl ExecCtx<'_> {
    pub fn run(&mut self, body: &[Stmt]) -> Result<(), SimError> {
        let mut vars = Vars::new();
        self.run_body(body, &mut vars)?;
        Ok(())
    }

    fn run_body(&mut self, body: &[Stmt], vars: &mut Vars) -> Result<Flow, SimError> {
        for stmt in body {
            match stmt {
                Stmt::Assign { dst, src } => {
                    let val = self.eval(src, vars)?;
                    self.store(dst, val, vars)?;
                }
                Stmt::If { arms, orelse } => {
                    let mut taken = false;
                    for (test, arm) in arms {
                        if self.eval(test, vars)?.is_truthy() {
                            if let Flow::Returned(v) = self.run_body(arm, vars)? {
                                return Ok(Flow::Returned(v));
                            }
                            taken = true;
                            break;
                        }
                    }
                    if !taken {
                        if let Flow::Returned(v) = self.run_body(orelse, vars)? {
                            return Ok(Flow::Returned(v));
                        }
                    }
                }
                Stmt::For {
                    var,
                    start,
                    end,
                    body,
                } => {
                    for i in *start..*end {
                        vars.insert(var.clone(), Val::Int(i as i64));
                        if let Flow::Returned(v) = self.run_body(body, vars)? {
                            return Ok(Flow::Returned(v));
                        }
                    }
                }
                Stmt::While { test, body } => {
                    while self.eval(test, vars)?.is_truthy() {
                        if let Flow::Returned(v) = self.run_body(body, vars)? {
                            return Ok(Flow::Returned(v));
                        }
                    }
                }
                Stmt::TaskCall { task, args } => {
                    let t = self.design.task(*task).clone();
                    let mut locals = Vars::new();
                    for (p, a) in t.params.iter().zip(args) {
                        let v = self.eval(a, vars)?;
                        locals.insert(p.clone(), v);
                    }
                    self.run_body(&t.body, &mut locals)?;
                }
                Stmt::Assert { test, msg } => {
                    if !self.eval(test, vars)?.is_truthy() {
                        return Err(SimError::AssertionFailed(msg.clone()));
                    }
                }
                Stmt::Print { format, args } => {
                    let line = self.format_line(format, args, vars)?;
                    println!("{line}");
                }
                Stmt::Return(e) => {
                    let v = match e {
                        Some(e) => Some(self.eval(e, vars)?),
                        None => None,
                    };
                    return Ok(Flow::Returned(v));
                }
            }
        }
        Ok(Flow::Normal)
    }

    fn store(&mut self, dst: &LValue, val: Val, vars: &mut Vars) -> Result<(), SimError> {
        match dst {
            LValue::Sig(sig) => queue_next(self.design, self.siglist, *sig, val),
            LValue::SigSlice { sig, hi, lo } => {
                let v = int_of(&val)?;
                self.writable(*sig)?;
                let s = self.design.signal_mut(*sig);
                match s.next_mut() {
                    Val::Vec(bv) => bv.set_slice(*hi, *lo, v)?,
                    other => {
                        return Err(SimError::TypeMismatch {
                            signal: format!("{other}"),
                            expected: "bitvec",
                            got: other.kind_name(),
                        })
                    }
                }
                self.queue_only(*sig);
                Ok(())
            }
            LValue::SigBit { sig, index } => {
                let i = int_of(&self.eval(index, vars)?)? as u32;
                let b = int_of(&val)? != 0;
                self.writable(*sig)?;
                let s = self.design.signal_mut(*sig);
                match s.next_mut() {
                    Val::Vec(bv) => bv.set_bit(i, b)?,
                    Val::Bit(nb) if i == 0 => *nb = b,
                    other => {
                        return Err(SimError::TypeMismatch {
                            signal: format!("{other}"),
                            expected: "bitvec",
                            got: other.kind_name(),
                        })
                    }
                }
                self.queue_only(*sig);
                Ok(())
            }
            LValue::Mem { mem, index } => {
                let i = int_of(&self.eval(index, vars)?)?;
                let elements = &self.design.memory(*mem).elements;
                let sig = *elements.get(i as usize).ok_or(SimError::BoundsViolation {
                    value: i,
                    min: 0,
                    max: elements.len() as i128,
                })?;
                queue_next(self.design, self.siglist, sig, val)
            }
            LValue::Var(name) => {
                vars.insert(name.clone(), val);
                Ok(())
            }
        }
    }

    fn writable(&self, sig: SignalId) -> Result<(), SimError> {
        let s = self.design.signal(sig);
        match s.flavor {
            SignalFlavor::Constant => Err(SimError::PermissionDenied(
                s.name.clone().unwrap_or_default(),
            )),
            SignalFlavor::Shadow(_) => {
                Err(SimError::ShadowWrite(s.name.clone().unwrap_or_default()))
            }
            _ => Ok(()),
        }
    }

    fn queue_only(&mut self, sig: SignalId) {
        let s = self.design.signal_mut(sig);
        if !s.queued {
            s.queued = true;
            self.siglist.push(sig);
        }
    }

    fn eval(&mut self, e: &Expr, vars: &mut Vars) -> Result<Val, SimError> {
        use crate::bitvec::BitVec;
        Ok(match e {
            Expr::Lit(v) => Val::Vec(BitVec::unconstrained(*v)),
            Expr::BoolLit(b) => Val::Bit(*b),
            Expr::EnumLit(ty, index) => {
                let t = self.design.enum_type(*ty);
                Val::Enum(crate::value::EnumVal {
                    type_id: *ty,
                    index: *index,
                    nrbits: t.nrbits,
                })
            }
            Expr::Sig(s) => self.design.signal(*s).val().clone(),
            Expr::Var(name) => vars
                .get(name)
                .cloned()
                .ok_or_else(|| SimError::Unresolved {
                    kind: "variable",
                    name: name.clone(),
                })?,
            Expr::Binary { op, left, right } => {
                let l = int_of(&self.eval(left, vars)?)?;
                let r = int_of(&self.eval(right, vars)?)?;
                let v = match op {
                    BinOp::Add => l + r,
                    BinOp::Sub => l - r,
                    BinOp::Mul => l * r,
                    BinOp::FloorDiv => {
                        if r == 0 {
                            return Err(SimError::DivisionByZero);
                        }
                        l.div_euclid(r)
                    }
                    BinOp::Mod => {
                        if r == 0 {
                            return Err(SimError::DivisionByZero);
                        }
                        l.rem_euclid(r)
                    }
                    BinOp::Shl => l << shift_count(r)?,
                    BinOp::Shr => l >> shift_count(r)?,
                    BinOp::BitAnd => l & r,
                    BinOp::BitOr => l | r,
                    BinOp::BitXor => l ^ r,
                };
                Val::Vec(BitVec::unconstrained(v))
            }
            Expr::Unary { op, arg } => {
                let v = self.eval(arg, vars)?;
                match op {
                    UnOp::Neg => Val::Vec(BitVec::unconstrained(-int_of(&v)?)),
                    UnOp::Invert => match v {
                        Val::Vec(bv) => Val::Vec(bv.invert()),
                        Val::Bit(b) => Val::Bit(!b),
                        other => Val::Vec(BitVec::unconstrained(!int_of(&other)?)),
                    },
                    UnOp::Not => Val::Bit(!v.is_truthy()),
                }
            }
            Expr::Cmp { op, left, right } => {
                let l = self.eval(left, vars)?;
                let r = self.eval(right, vars)?;
                let b = match (op, &l, &r) {
                    (CmpOp::Eq, Val::Enum(le), Val::Enum(re)) => {
                        le.type_id == re.type_id && le.index == re.index
                    }
                    (CmpOp::Ne, Val::Enum(le), Val::Enum(re)) => {
                        le.type_id != re.type_id || le.index != re.index
                    }
                    _ => {
                        let (li, ri) = (int_of(&l)?, int_of(&r)?);
                        match op {
                            CmpOp::Eq => li == ri,
                            CmpOp::Ne => li != ri,
                            CmpOp::Lt => li < ri,
                            CmpOp::Le => li <= ri,
                            CmpOp::Gt => li > ri,
                            CmpOp::Ge => li >= ri,
                        }
                    }
                };
                Val::Bit(b)
            }
            Expr::Logic { op, terms } => {
                let mut acc = matches!(op, LogicOp::And);
                for t in terms {
                    let b = self.eval(t, vars)?.is_truthy();
                    acc = match op {
                        LogicOp::And => acc && b,
                        LogicOp::Or => acc || b,
                    };
                }
                Val::Bit(acc)
            }
            Expr::Cond { test, then, orelse } => {
                if self.eval(test, vars)?.is_truthy() {
                    self.eval(then, vars)?
                } else {
                    self.eval(orelse, vars)?
                }
            }
            Expr::Bit { arg, index } => {
                let v = int_of(&self.eval(arg, vars)?)?;
                let i = int_of(&self.eval(index, vars)?)? as u32;
                Val::Bit((v >> i) & 1 == 1)
            }
            Expr::Slice { arg, hi, lo } => {
                let v = int_of(&self.eval(arg, vars)?)?;
                Val::Vec(BitVec::unconstrained(v).slice(*hi, *lo)?)
            }
            Expr::MemRead { mem, index } => {
                let i = int_of(&self.eval(index, vars)?)?;
                let elements = &self.design.memory(*mem).elements;
                let sig = *elements.get(i as usize).ok_or(SimError::BoundsViolation {
                    value: i,
                    min: 0,
                    max: elements.len() as i128,
                })?;
                self.design.signal(sig).val().clone()
            }
            Expr::RomRead { rom, index } => {
                let i = int_of(&self.eval(index, vars)?)?;
                let table = &self.design.rom(*rom).table;
                let v = *table.get(i as usize).ok_or(SimError::BoundsViolation {
                    value: i,
                    min: 0,
                    max: table.len() as i128,
                })?;
                Val::Vec(BitVec::unconstrained(v))
            }
            Expr::Concat(terms) => {
                let mut acc = 0i128;
                let mut width = 0u32;
                for t in terms {
                    let v = self.eval(t, vars)?;
                    let w = v.nrbits();
                    if w == 0 {
                        return Err(SimError::Unresolved {
                            kind: "width in concatenation",
                            name: format!("{v}"),
                        });
                    }
                    let mask = (1i128 << w) - 1;
                    acc = (acc << w) | (int_of(&v)? & mask);
                    width += w;
                }
                Val::Vec(BitVec::with_width(acc, width)?)
            }
            Expr::Signed(arg) => match self.eval(arg, vars)? {
                Val::Vec(bv) => Val::Vec(bv.signed()),
                other => other,
            },
            Expr::Unsigned(arg) => match self.eval(arg, vars)? {
                Val::Vec(bv) => Val::Vec(bv.unsigned()),
                other => other,
            },
            Expr::Call { func, args } => {
                let f = self.design.function(*func).clone();
                let mut locals = Vars::new();
                for (p, a) in f.params.iter().zip(args) {
                    let v = self.eval(a, vars)?;
                    locals.insert(p.clone(), v);
                }
                match self.run_body(&f.body, &mut locals)? {
                    Flow::Returned(Some(v)) => v,
                    _ => {
                        return Err(SimError::Unresolved {
                            kind: "function return",
                            name: f.name.clone(),
                        })
                    }
                }
            }
            Expr::Now => Val::Int(self.now as i64),
        })
    }

    fn format_line(
        &mut self,
        format: &str,
        args: &[Expr],
        vars: &mut Vars,
    ) -> Result<String, SimError> {
        let mut out = String::new();
        let mut args = args.iter();
        let mut chars = format.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            let spec = chars.next().unwrap_or('%');
            if spec == '%' {
                out.push('%');
                continue;
            }
            let arg = args.next().ok_or_else(|| SimError::Unresolved {
                kind: "format argument",
                name: format.to_string(),
            })?;
            let v = self.eval(arg, vars)?;
            match spec {
                'd' => out.push_str(&int_of(&v)?.to_string()),
                'x' => out.push_str(&format!("{:x}", int_of(&v)?)),
                'b' => out.push_str(&format!("{:b}", int_of(&v)?)),
                's' => out.push_str(&v.to_string()),
                other => {
                    return Err(SimError::Unresolved {
                        kind: "format specifier",
                        name: other.to_string(),
                    })
                }
            }
        }
        Ok(out)
    }
}

fn int_of(v: &Val) -> Result<i128, SimError> {
    v.as_i128().ok_or(SimError::TypeMismatch {
        signal: String::new(),
        expected: "integer value",
        got: "enum",
    })
}

fn shift_count(r: i128) -> Result<u32, SimError> {
    u32::try_from(r)
        .ok()
        .filter(|k| *k < 128)
        .ok_or(SimError::BoundsViolation {
            value: r,
            min: 0,
            max: 128,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expr as E;
    use crate::bitvec::bitvec;
    use crate::design::Design;

    fn setup() -> (Design, SignalId, SignalId) {
        let mut design = Design::new();
        let (a, y) = design
            .build_top("t", |ctx| {
                let a = ctx.signal("a", Val::Vec(bitvec(5, 0, 16).unwrap()));
                let y = ctx.signal("y", Val::Vec(bitvec(0, 0, 256).unwrap()));
                ctx.always_comb(vec![Stmt::assign(y, E::add(E::sig(a), E::lit(1)))])?;
                Ok((a, y))
            })
            .unwrap();
        (design, a, y)
    }

    #[test]
    fn assign_goes_through_next() {
        let (mut design, a, y) = setup();
        let body = vec![Stmt::assign(y, E::add(E::sig(a), E::lit(2)))];
        let mut siglist = Vec::new();
        let mut ctx = ExecCtx {
            design: &mut design,
            now: 0,
            siglist: &mut siglist,
        };
        ctx.run(&body).unwrap();
        assert_eq!(siglist.len(), 1);
        // current value untouched until the scheduler updates
        assert_eq!(design.signal(y).val().as_i128(), Some(0));
        assert_eq!(design.signal(y).pending().as_i128(), Some(7));
    }

    #[test]
    fn for_loop_accumulates() {
        let (mut design, _a, y) = setup();
        let body = vec![
            Stmt::assign_var("acc", E::lit(0)),
            Stmt::For {
                var: "i".into(),
                start: 0,
                end: 5,
                body: vec![Stmt::assign_var(
                    "acc",
                    E::add(E::var("acc"), E::var("i")),
                )],
            },
            Stmt::assign(y, E::var("acc")),
        ];
        let mut siglist = Vec::new();
        let mut ctx = ExecCtx {
            design: &mut design,
            now: 0,
            siglist: &mut siglist,
        };
        ctx.run(&body).unwrap();
        assert_eq!(design.signal(y).pending().as_i128(), Some(10));
    }

    #[test]
    fn slice_assignment_updates_bits() {
        let mut design = Design::new();
        let y = design
            .build_top("t", |ctx| {
                let a = ctx.signal("a", Val::Bit(false));
                let y = ctx.signal("y", Val::Vec(bitvec(0, 0, 256).unwrap()));
                ctx.always(vec![a], vec![])?;
                Ok(y)
            })
            .unwrap();
        let body = vec![Stmt::Assign {
            dst: LValue::SigSlice { sig: y, hi: 4, lo: 0 },
            src: E::lit(0xA),
        }];
        let mut siglist = Vec::new();
        let mut ctx = ExecCtx {
            design: &mut design,
            now: 0,
            siglist: &mut siglist,
        };
        ctx.run(&body).unwrap();
        assert_eq!(design.signal(y).pending().as_i128(), Some(0xA));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let (mut design, a, y) = setup();
        let body = vec![Stmt::assign(
            y,
            E::binary(BinOp::FloorDiv, E::sig(a), E::lit(0)),
        )];
        let mut siglist = Vec::new();
        let mut ctx = ExecCtx {
            design: &mut design,
            now: 0,
            siglist: &mut siglist,
        };
        assert!(matches!(ctx.run(&body), Err(SimError::DivisionByZero)));
    }
}
