//! The behavioural tree.
//!
//! Process bodies are built as explicit trees over signal handles: the
//! kernel interprets them, the convertor analyses and re-emits them. The
//! node set is the RTL-expressible subset: static loop ranges, constant
//! slice indices, no recursion.

use serde::{Deserialize, Serialize};

use crate::signal::SignalId;
use crate::value::EnumTypeId;

/// Handle into the design's memory table (list of signals used as an array).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemId(pub u32);

/// Handle into the design's ROM table (list of constants).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RomId(pub u32);

/// Handle into the design's function table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FuncId(pub u32);

/// Handle into the design's task table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    FloorDiv,
    Mod,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
    /// Arithmetic negation.
    Neg,
    /// Bitwise complement.
    Invert,
    /// Logical not.
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicOp {
    And,
    Or,
}

// ─── Expressions ──────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Integer literal; width-less until contextually constrained.
    Lit(i128),
    BoolLit(bool),
    EnumLit(EnumTypeId, u32),
    /// Read a signal's current value.
    Sig(SignalId),
    /// Read a process-local variable.
    Var(String),
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnOp,
        arg: Box<Expr>,
    },
    Cmp {
        op: CmpOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logic {
        op: LogicOp,
        terms: Vec<Expr>,
    },
    Cond {
        test: Box<Expr>,
        then: Box<Expr>,
        orelse: Box<Expr>,
    },
    /// Single-bit select; the index may be a runtime expression.
    Bit {
        arg: Box<Expr>,
        index: Box<Expr>,
    },
    /// Right-open constant slice `arg[hi:lo]`.
    Slice {
        arg: Box<Expr>,
        hi: u32,
        lo: u32,
    },
    MemRead {
        mem: MemId,
        index: Box<Expr>,
    },
    RomRead {
        rom: RomId,
        index: Box<Expr>,
    },
    Concat(Vec<Expr>),
    /// Two's-complement reinterpretation of the argument's bits.
    Signed(Box<Expr>),
    /// Mask the argument to its width.
    Unsigned(Box<Expr>),
    Call {
        func: FuncId,
        args: Vec<Expr>,
    },
    /// Current simulation time (testbench bodies only; not convertible).
    Now,
}

// ─── Statements ───────────────────────────────────────────────

/// Assignment target. Signal targets write the *next* value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum LValue {
    Sig(SignalId),
    SigSlice { sig: SignalId, hi: u32, lo: u32 },
    SigBit { sig: SignalId, index: Box<Expr> },
    Mem { mem: MemId, index: Box<Expr> },
    Var(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    Assign {
        dst: LValue,
        src: Expr,
    },
    /// `if`/`elif` chain; each arm is a test plus a body.
    If {
        arms: Vec<(Expr, Vec<Stmt>)>,
        orelse: Vec<Stmt>,
    },
    /// Static-range loop over `start..end`.
    For {
        var: String,
        start: i128,
        end: i128,
        body: Vec<Stmt>,
    },
    While {
        test: Expr,
        body: Vec<Stmt>,
    },
    TaskCall {
        task: TaskId,
        args: Vec<Expr>,
    },
    Assert {
        test: Expr,
        msg: String,
    },
    /// Restricted format print (`%d %x %b %s` only), one line.
    Print {
        format: String,
        args: Vec<Expr>,
    },
    /// Function bodies only.
    Return(Option<Expr>),
}

/// A pure user function: reads only its parameters, returns a value of a
/// declared width and sign.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    pub ret_nrbits: u32,
    pub ret_signed: bool,
}

/// A user task: like a function but with signal side effects and no
/// return value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
}

// ─── Builder helpers ──────────────────────────────────────────

impl Expr {
    pub fn sig(s: SignalId) -> Expr {
        Expr::Sig(s)
    }

    pub fn lit(v: i128) -> Expr {
        Expr::Lit(v)
    }

    pub fn var(name: impl Into<String>) -> Expr {
        Expr::Var(name.into())
    }

    pub fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn add(left: Expr, right: Expr) -> Expr {
        Expr::binary(BinOp::Add, left, right)
    }

    pub fn sub(left: Expr, right: Expr) -> Expr {
        Expr::binary(BinOp::Sub, left, right)
    }

    pub fn xor(left: Expr, right: Expr) -> Expr {
        Expr::binary(BinOp::BitXor, left, right)
    }

    pub fn cmp(op: CmpOp, left: Expr, right: Expr) -> Expr {
        Expr::Cmp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn eq(left: Expr, right: Expr) -> Expr {
        Expr::cmp(CmpOp::Eq, left, right)
    }

    pub fn not(arg: Expr) -> Expr {
        Expr::Unary {
            op: UnOp::Not,
            arg: Box::new(arg),
        }
    }

    pub fn slice(arg: Expr, hi: u32, lo: u32) -> Expr {
        Expr::Slice {
            arg: Box::new(arg),
            hi,
            lo,
        }
    }

    pub fn cond(test: Expr, then: Expr, orelse: Expr) -> Expr {
        Expr::Cond {
            test: Box::new(test),
            then: Box::new(then),
            orelse: Box::new(orelse),
        }
    }
}

impl Stmt {
    pub fn assign(sig: SignalId, src: Expr) -> Stmt {
        Stmt::Assign {
            dst: LValue::Sig(sig),
            src,
        }
    }

    pub fn assign_var(name: impl Into<String>, src: Expr) -> Stmt {
        Stmt::Assign {
            dst: LValue::Var(name.into()),
            src,
        }
    }

    pub fn if_else(test: Expr, then: Vec<Stmt>, orelse: Vec<Stmt>) -> Stmt {
        Stmt::If {
            arms: vec![(test, then)],
            orelse,
        }
    }
}

// ─── Tree walkers ─────────────────────────────────────────────

/// What a read refers to: a plain signal, a whole memory, or a ROM table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadRef {
    Sig(SignalId),
    Mem(MemId),
    Rom(RomId),
}

/// What a write targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteRef {
    Sig(SignalId),
    Mem(MemId),
}

pub fn visit_expr_reads(expr: &Expr, f: &mut impl FnMut(ReadRef)) {
    match expr {
        Expr::Lit(_) | Expr::BoolLit(_) | Expr::EnumLit(..) | Expr::Var(_) | Expr::Now => {}
        Expr::Sig(s) => f(ReadRef::Sig(*s)),
        Expr::Binary { left, right, .. } | Expr::Cmp { left, right, .. } => {
            visit_expr_reads(left, f);
            visit_expr_reads(right, f);
        }
        Expr::Unary { arg, .. } | Expr::Signed(arg) | Expr::Unsigned(arg) => {
            visit_expr_reads(arg, f)
        }
        Expr::Logic { terms, .. } | Expr::Concat(terms) => {
            for t in terms {
                visit_expr_reads(t, f);
            }
        }
        Expr::Cond { test, then, orelse } => {
            visit_expr_reads(test, f);
            visit_expr_reads(then, f);
            visit_expr_reads(orelse, f);
        }
        Expr::Bit { arg, index } => {
            visit_expr_reads(arg, f);
            visit_expr_reads(index, f);
        }
        // a constant-indexed slice reads its parent
        Expr::Slice { arg, .. } => visit_expr_reads(arg, f),
        Expr::MemRead { mem, index } => {
            f(ReadRef::Mem(*mem));
            visit_expr_reads(index, f);
        }
        Expr::RomRead { rom, index } => {
            f(ReadRef::Rom(*rom));
            visit_expr_reads(index, f);
        }
        Expr::Call { args, .. } => {
            for a in args {
                visit_expr_reads(a, f);
            }
        }
    }
}

pub fn visit_stmt_reads(stmts: &[Stmt], f: &mut impl FnMut(ReadRef)) {
    for stmt in stmts {
        match stmt {
            Stmt::Assign { dst, src } => {
                // index expressions in the target are reads
                match dst {
                    LValue::SigBit { index, .. } | LValue::Mem { index, .. } => {
                        visit_expr_reads(index, f)
                    }
                    _ => {}
                }
                visit_expr_reads(src, f);
            }
            Stmt::If { arms, orelse } => {
                for (test, body) in arms {
                    visit_expr_reads(test, f);
                    visit_stmt_reads(body, f);
                }
                visit_stmt_reads(orelse, f);
            }
            Stmt::For { body, .. } => visit_stmt_reads(body, f),
            Stmt::While { test, body } => {
                visit_expr_reads(test, f);
                visit_stmt_reads(body, f);
            }
            Stmt::TaskCall { args, .. } => {
                for a in args {
                    visit_expr_reads(a, f);
                }
            }
            Stmt::Assert { test, .. } => visit_expr_reads(test, f),
            Stmt::Print { args, .. } => {
                for a in args {
                    visit_expr_reads(a, f);
                }
            }
            Stmt::Return(Some(e)) => visit_expr_reads(e, f),
            Stmt::Return(None) => {}
        }
    }
}

pub fn visit_stmt_writes(stmts: &[Stmt], f: &mut impl FnMut(WriteRef)) {
    for stmt in stmts {
        match stmt {
            Stmt::Assign { dst, .. } => match dst {
                LValue::Sig(s) | LValue::SigSlice { sig: s, .. } | LValue::SigBit { sig: s, .. } => {
                    f(WriteRef::Sig(*s))
                }
                LValue::Mem { mem, .. } => f(WriteRef::Mem(*mem)),
                LValue::Var(_) => {}
            },
            Stmt::If { arms, orelse } => {
                for (_, body) in arms {
                    visit_stmt_writes(body, f);
                }
                visit_stmt_writes(orelse, f);
            }
            Stmt::For { body, .. } | Stmt::While { body, .. } => visit_stmt_writes(body, f),
            Stmt::TaskCall { .. }
            | Stmt::Assert { .. }
            | Stmt::Print { .. }
            | Stmt::Return(_) => {}
        }
    }
}
