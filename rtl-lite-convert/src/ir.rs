//! The canonical typed IR.
//!
//! One annotator produces this tree; every emitter is a walk over it.
//! Width and signedness are known at every expression node, and cast
//! wrappers are explicit, so no emitter re-derives typing rules.

use serde::{Deserialize, Serialize};

use rtl_lite_core::ast::{BinOp, CmpOp, FuncId, LogicOp, MemId, RomId, UnOp};
use rtl_lite_core::{EdgeKind, EnumTypeId, SignalId};

/// Value type of an expression node. `nrbits == 0` means an unsized
/// integer (a free literal or plain int signal).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VType {
    pub signed: bool,
    pub nrbits: u32,
}

impl VType {
    pub fn unsigned(nrbits: u32) -> VType {
        VType {
            signed: false,
            nrbits,
        }
    }

    pub fn signed(nrbits: u32) -> VType {
        VType {
            signed: true,
            nrbits,
        }
    }

    pub fn bit() -> VType {
        VType::unsigned(1)
    }

    pub fn int() -> VType {
        VType {
            signed: true,
            nrbits: 0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TExpr {
    pub kind: TExprKind,
    pub vt: VType,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum TExprKind {
    Lit(i128),
    Bool(bool),
    EnumRef {
        ty: EnumTypeId,
        index: u32,
    },
    Sig(SignalId),
    Var(String),
    Binary {
        op: BinOp,
        left: Box<TExpr>,
        right: Box<TExpr>,
    },
    Unary {
        op: UnOp,
        arg: Box<TExpr>,
    },
    Cmp {
        op: CmpOp,
        left: Box<TExpr>,
        right: Box<TExpr>,
    },
    Logic {
        op: LogicOp,
        terms: Vec<TExpr>,
    },
    Cond {
        test: Box<TExpr>,
        then: Box<TExpr>,
        orelse: Box<TExpr>,
    },
    Bit {
        arg: Box<TExpr>,
        index: Box<TExpr>,
    },
    Slice {
        arg: Box<TExpr>,
        hi: u32,
        lo: u32,
    },
    MemRead {
        mem: MemId,
        index: Box<TExpr>,
    },
    RomRead {
        rom: RomId,
        index: Box<TExpr>,
    },
    Concat(Vec<TExpr>),
    Call {
        func: FuncId,
        args: Vec<TExpr>,
    },
    /// Explicit signedness reinterpretation, inserted by the annotator
    /// where mixing was detected. Emitters render `$signed`/`$unsigned`
    /// or the numeric_std equivalent.
    SignCast {
        to_signed: bool,
        arg: Box<TExpr>,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum TLValue {
    Sig(SignalId),
    SigSlice { sig: SignalId, hi: u32, lo: u32 },
    SigBit { sig: SignalId, index: Box<TExpr> },
    Mem { mem: MemId, index: Box<TExpr> },
    Var(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum TStmt {
    Assign {
        dst: TLValue,
        src: TExpr,
    },
    If {
        arms: Vec<(TExpr, Vec<TStmt>)>,
        orelse: Vec<TStmt>,
    },
    /// Produced from an if-chain testing one subject against disjoint
    /// constants, and from ROM reads.
    Case {
        subject: TExpr,
        arms: Vec<(i128, Vec<TStmt>)>,
        default: Vec<TStmt>,
    },
    For {
        var: String,
        start: i128,
        end: i128,
        body: Vec<TStmt>,
    },
    Assert {
        test: TExpr,
        msg: String,
    },
    Print {
        format: String,
        args: Vec<TExpr>,
    },
}

// ─── Module set ───────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortDir {
    In,
    Out,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PortIr {
    pub name: String,
    pub dir: PortDir,
    pub vt: VType,
    pub sig: SignalId,
    /// Declared as a register in the emitting module.
    pub is_reg: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum DeclIr {
    /// Internal signal declaration.
    Sig {
        name: String,
        vt: VType,
        is_reg: bool,
        init: Option<i128>,
        sig: SignalId,
    },
    /// 2-D register array.
    Mem {
        name: String,
        vt: VType,
        depth: usize,
        mem: MemId,
    },
    /// Constant signal, emitted as a named parameter.
    Const {
        name: String,
        vt: VType,
        value: i128,
        sig: SignalId,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResetIr {
    pub sig: SignalId,
    pub active: bool,
    pub is_async: bool,
    /// Registers reverted on reset, with their init values.
    pub body: Vec<(SignalId, i128)>,
}

/// One behavioural item of a module.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ItemIr {
    /// Continuous assignment (a single-assignment combinational body).
    Assign { dst: TLValue, src: TExpr },
    /// Combinational block, sensitivity inferred.
    Comb {
        label: String,
        sens: Vec<SignalId>,
        vars: Vec<(String, VType)>,
        body: Vec<TStmt>,
    },
    /// Clocked block with optional reset branch.
    Seq {
        label: String,
        edge_kind: EdgeKind,
        edge_sig: SignalId,
        reset: Option<ResetIr>,
        vars: Vec<(String, VType)>,
        body: Vec<TStmt>,
    },
    /// One-shot block at time zero.
    Initial {
        label: String,
        vars: Vec<(String, VType)>,
        body: Vec<TStmt>,
    },
}

/// Instantiation of a sub-module (hierarchical mode only).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InstanceIr {
    pub inst_name: String,
    pub module_name: String,
    /// (port name in the child, connected signal in the parent)
    pub connections: Vec<(String, SignalId)>,
}

/// A user function with fully annotated parameter and body types.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FunctionIr {
    pub func: FuncId,
    pub name: String,
    pub params: Vec<(String, VType)>,
    pub ret: VType,
    pub body: Vec<TStmt>,
}

use std::collections::BTreeMap;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModuleIr {
    pub name: String,
    pub ports: Vec<PortIr>,
    pub decls: Vec<DeclIr>,
    pub items: Vec<ItemIr>,
    pub instances: Vec<InstanceIr>,
    /// Functions referenced by this module's bodies.
    pub functions: Vec<FuncId>,
    /// Emission name of every signal visible in this module.
    pub names: BTreeMap<u32, String>,
    /// Emission name of every memory used in this module.
    pub mem_names: BTreeMap<u32, String>,
}

impl ModuleIr {
    pub fn sig_name(&self, sig: SignalId) -> &str {
        self.names
            .get(&sig.0)
            .map(String::as_str)
            .unwrap_or("<unnamed>")
    }

    pub fn mem_name(&self, mem: MemId) -> &str {
        self.mem_names
            .get(&mem.0)
            .map(String::as_str)
            .unwrap_or("<unnamed>")
    }
}

/// The whole conversion unit: the top module first, then sub-modules in
/// instantiation order (empty tail when flattened).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DesignIr {
    pub modules: Vec<ModuleIr>,
    pub functions: Vec<FunctionIr>,
    /// Enum types referenced anywhere in the design.
    pub enums: Vec<EnumTypeId>,
}
