//! Elaboration: blocks, the builder context and the design root.
//!
//! The design owns every arena (signals, blocks, processes, memories,
//! ROMs, enum types, functions, tasks). Block functions receive a `Ctx`
//! and register what they declare explicitly; names and scoping are
//! static, and a test can hold several independent designs at once.

use std::collections::HashSet;
use std::sync::Arc;

use crate::ast::{
    visit_stmt_reads, visit_stmt_writes, FuncId, Function, MemId, ReadRef, RomId, Stmt, Task,
    TaskId, WriteRef,
};
use crate::errors::SimError;
use crate::process::{ClockEdge, ProcId, Process, Reset};
use crate::signal::{Drive, ShadowRange, Signal, SignalId};
use crate::value::{EnumType, EnumTypeId, EnumVal, Val};

/// Handle into the design's block arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

/// One entry of a block's symbol dictionary, in declaration order.
#[derive(Clone, Debug)]
pub enum SymEntry {
    Signal {
        sig: SignalId,
        /// True when the name aliases a signal declared in an enclosing
        /// scope (a port of this block).
        aliased: bool,
    },
    Memory(MemId),
    Rom(RomId),
}

/// A hierarchical unit: local names, child instances, processes.
#[derive(Debug, Default)]
pub struct Block {
    pub name: String,
    pub parent: Option<BlockId>,
    pub symdict: Vec<(String, SymEntry)>,
    pub subs: Vec<BlockId>,
    pub procs: Vec<ProcId>,
}

impl Block {
    /// Locally declared (non-aliased) signals, in declaration order.
    pub fn local_signals(&self) -> impl Iterator<Item = (&str, SignalId)> {
        self.symdict.iter().filter_map(|(name, e)| match e {
            SymEntry::Signal { sig, aliased: false } => Some((name.as_str(), *sig)),
            _ => None,
        })
    }
}

/// A list of signals used as an array.
#[derive(Clone, Debug)]
pub struct Memory {
    pub name: String,
    pub block: BlockId,
    pub elements: Vec<SignalId>,
}

/// A list of constants addressed by a signal.
#[derive(Clone, Debug)]
pub struct Rom {
    pub name: String,
    pub block: BlockId,
    pub table: Vec<i128>,
}

/// Process body kinds. Tree bodies are shared between the kernel and the
/// convertor, so they live behind `Arc`.
pub enum ProcKind {
    Always {
        sens: Vec<SignalId>,
        body: Arc<Vec<Stmt>>,
    },
    AlwaysComb {
        /// Inferred at elaboration: every signal the body reads.
        sens: Vec<SignalId>,
        body: Arc<Vec<Stmt>>,
    },
    AlwaysSeq {
        edge: ClockEdge,
        reset: Option<Reset>,
        body: Arc<Vec<Stmt>>,
    },
    Initial {
        body: Arc<Vec<Stmt>>,
    },
    /// Free-running native state machine. Taken by the scheduler at
    /// simulation start; not convertible.
    Instance(Option<Box<dyn Process>>),
}

pub struct ProcDecl {
    pub name: String,
    pub block: BlockId,
    pub kind: ProcKind,
}

impl ProcDecl {
    /// Tree body, if this is a tree-based kind.
    pub fn body(&self) -> Option<&Arc<Vec<Stmt>>> {
        match &self.kind {
            ProcKind::Always { body, .. }
            | ProcKind::AlwaysComb { body, .. }
            | ProcKind::AlwaysSeq { body, .. }
            | ProcKind::Initial { body } => Some(body),
            ProcKind::Instance(_) => None,
        }
    }
}

// ─── Design ───────────────────────────────────────────────────

/// The elaboration root. All mutable state of one model lives here.
#[derive(Default)]
pub struct Design {
    pub(crate) signals: Vec<Signal>,
    pub(crate) blocks: Vec<Block>,
    pub(crate) procs: Vec<ProcDecl>,
    pub(crate) memories: Vec<Memory>,
    pub(crate) roms: Vec<Rom>,
    pub(crate) enums: Vec<EnumType>,
    pub(crate) functions: Vec<Function>,
    pub(crate) tasks: Vec<Task>,
    pub(crate) top: Option<BlockId>,
}

impl Design {
    pub fn new() -> Design {
        Design::default()
    }

    /// Build the top block by running the user's block function against a
    /// fresh context. The block must register at least one process or
    /// sub-block.
    pub fn build_top<T>(
        &mut self,
        name: impl Into<String>,
        f: impl FnOnce(&mut Ctx<'_>) -> Result<T, SimError>,
    ) -> Result<T, SimError> {
        let name = name.into();
        let id = self.push_block(Block {
            name: name.clone(),
            ..Block::default()
        });
        self.top = Some(id);
        let out = f(&mut Ctx {
            design: &mut *self,
            block: id,
        })?;
        let blk = &self.blocks[id.0 as usize];
        if blk.procs.is_empty() && blk.subs.is_empty() {
            return Err(SimError::BlockContractViolation(name));
        }
        self.assign_abs_names();
        Ok(out)
    }

    fn push_block(&mut self, block: Block) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(block);
        id
    }

    pub fn top(&self) -> Option<BlockId> {
        self.top
    }

    pub fn signal(&self, id: SignalId) -> &Signal {
        &self.signals[id.index()]
    }

    pub fn signal_mut(&mut self, id: SignalId) -> &mut Signal {
        &mut self.signals[id.index()]
    }

    pub fn signal_count(&self) -> usize {
        self.signals.len()
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    pub fn blocks(&self) -> impl Iterator<Item = (BlockId, &Block)> {
        self.blocks
            .iter()
            .enumerate()
            .map(|(i, b)| (BlockId(i as u32), b))
    }

    pub fn proc(&self, id: ProcId) -> &ProcDecl {
        &self.procs[id.0 as usize]
    }

    pub fn procs(&self) -> impl Iterator<Item = (ProcId, &ProcDecl)> {
        self.procs
            .iter()
            .enumerate()
            .map(|(i, p)| (ProcId(i as u32), p))
    }

    pub fn memory(&self, id: MemId) -> &Memory {
        &self.memories[id.0 as usize]
    }

    pub fn memories(&self) -> impl Iterator<Item = (MemId, &Memory)> {
        self.memories
            .iter()
            .enumerate()
            .map(|(i, m)| (MemId(i as u32), m))
    }

    pub fn rom(&self, id: RomId) -> &Rom {
        &self.roms[id.0 as usize]
    }

    pub fn roms(&self) -> impl Iterator<Item = (RomId, &Rom)> {
        self.roms
            .iter()
            .enumerate()
            .map(|(i, r)| (RomId(i as u32), r))
    }

    pub fn function(&self, id: FuncId) -> &Function {
        &self.functions[id.0 as usize]
    }

    pub fn task(&self, id: TaskId) -> &Task {
        &self.tasks[id.0 as usize]
    }

    pub fn enum_type(&self, id: EnumTypeId) -> &EnumType {
        &self.enums[id.0 as usize]
    }

    // ─── Declarations outside block scope ─────────────────────

    pub fn add_enum(&mut self, ty: EnumType) -> EnumTypeId {
        let id = EnumTypeId(self.enums.len() as u32);
        self.enums.push(ty);
        id
    }

    /// Value of an enum variant by name.
    pub fn enum_val(&self, ty: EnumTypeId, variant: &str) -> Option<Val> {
        let t = self.enum_type(ty);
        let index = t.variants.iter().position(|v| v == variant)? as u32;
        Some(Val::Enum(EnumVal {
            type_id: ty,
            index,
            nrbits: t.nrbits,
        }))
    }

    pub fn add_function(&mut self, f: Function) -> FuncId {
        let id = FuncId(self.functions.len() as u32);
        self.functions.push(f);
        id
    }

    pub fn add_task(&mut self, t: Task) -> TaskId {
        let id = TaskId(self.tasks.len() as u32);
        self.tasks.push(t);
        id
    }

    /// Derive a read-only shadow signal tracking `parent[hi:lo]`.
    pub fn slice_signal(&mut self, parent: SignalId, hi: u32, lo: u32) -> Result<SignalId, SimError> {
        let init = match self.signal(parent).val() {
            Val::Vec(v) => Val::Vec(v.slice(hi, lo)?),
            other => {
                return Err(SimError::TypeMismatch {
                    signal: format!("{other}"),
                    expected: "bitvec",
                    got: other.kind_name(),
                })
            }
        };
        let id = SignalId(self.signals.len() as u32);
        let mut shadow = Signal::new_shadow(init, ShadowRange { parent, hi, lo });
        shadow.name = self
            .signal(parent)
            .name
            .as_ref()
            .map(|n| format!("{n}({hi},{lo})"));
        self.signals.push(shadow);
        self.signal_mut(parent).shadows.push(id);
        Ok(id)
    }

    /// Open-port escape hatches: declare an externally handled direction
    /// so flow analysis accepts a deliberately unconnected signal.
    pub fn mark_driven(&mut self, sig: SignalId, drive: Drive) {
        self.signal_mut(sig).driven = Some(drive);
    }

    pub fn mark_read(&mut self, sig: SignalId) {
        self.signal_mut(sig).read = true;
    }

    /// Reset all runtime signal state so the design can be re-simulated.
    pub fn clear(&mut self) {
        for s in &mut self.signals {
            s.clear();
        }
    }

    // ─── Naming ───────────────────────────────────────────────

    /// Assign path-qualified names: instance path below the top joined
    /// with dots, then the local signal name. Collisions (a signal
    /// visible under several names, or duplicate leaf names) keep the
    /// first name and uniquify the rest with a numeric suffix.
    fn assign_abs_names(&mut self) {
        let Some(top) = self.top else { return };
        let mut taken: HashSet<String> = HashSet::new();
        let mut stack: Vec<(BlockId, String)> = vec![(top, String::new())];
        while let Some((bid, prefix)) = stack.pop() {
            let block = &self.blocks[bid.0 as usize];
            let subs: Vec<(BlockId, String)> = block
                .subs
                .iter()
                .map(|s| {
                    let sub = &self.blocks[s.0 as usize];
                    let p = if prefix.is_empty() {
                        sub.name.clone()
                    } else {
                        format!("{prefix}.{}", sub.name)
                    };
                    (*s, p)
                })
                .collect();
            let locals: Vec<(String, SignalId)> = block
                .local_signals()
                .map(|(n, s)| (n.to_string(), s))
                .collect();
            for (name, sig) in locals {
                let base = if prefix.is_empty() {
                    name
                } else {
                    format!("{prefix}.{name}")
                };
                let mut abs = base.clone();
                let mut n = 1;
                while !taken.insert(abs.clone()) {
                    abs = format!("{base}_{n}");
                    n += 1;
                }
                let s = self.signal_mut(sig);
                if s.abs_name.is_none() {
                    s.abs_name = Some(abs);
                    s.used = true;
                }
            }
            stack.extend(subs);
        }
    }
}

// ─── Builder context ──────────────────────────────────────────

/// Handed to block functions; registers everything the block declares.
pub struct Ctx<'a> {
    design: &'a mut Design,
    block: BlockId,
}

impl Ctx<'_> {
    pub fn design(&mut self) -> &mut Design {
        self.design
    }

    fn add_signal(&mut self, name: &str, sig: Signal, aliased: bool) -> SignalId {
        let id = SignalId(self.design.signals.len() as u32);
        self.design.signals.push(sig);
        self.design.signal_mut(id).name = Some(name.to_string());
        self.design.blocks[self.block.0 as usize].symdict.push((
            name.to_string(),
            SymEntry::Signal { sig: id, aliased },
        ));
        id
    }

    /// Declare a signal local to this block.
    pub fn signal(&mut self, name: &str, init: Val) -> SignalId {
        self.add_signal(name, Signal::new(init), false)
    }

    /// Declare a delayed signal; writes land `delay` time units later.
    pub fn signal_delayed(&mut self, name: &str, init: Val, delay: u64) -> SignalId {
        self.add_signal(name, Signal::new_delayed(init, delay), false)
    }

    /// Declare a constant signal; all writes are rejected.
    pub fn constant(&mut self, name: &str, init: Val) -> SignalId {
        self.add_signal(name, Signal::new_constant(init), false)
    }

    /// Alias an enclosing-scope signal into this block (a port). The
    /// declaring scope stays the enclosing block.
    pub fn port(&mut self, name: &str, sig: SignalId) {
        self.design.blocks[self.block.0 as usize].symdict.push((
            name.to_string(),
            SymEntry::Signal { sig, aliased: true },
        ));
    }

    /// Declare a memory: a list of signals of one kind and width.
    pub fn memory(&mut self, name: &str, elements: Vec<SignalId>) -> Result<MemId, SimError> {
        if elements.is_empty() {
            return Err(SimError::InconsistentMemory {
                name: name.to_string(),
                reason: "empty element list".into(),
            });
        }
        let first = self.design.signal(elements[0]);
        let (kind, nrbits) = (first.kind(), first.nrbits());
        for &e in &elements {
            let s = self.design.signal(e);
            if s.kind() != kind {
                return Err(SimError::InconsistentMemory {
                    name: name.to_string(),
                    reason: "elements differ in kind".into(),
                });
            }
            if s.nrbits() != nrbits {
                return Err(SimError::InconsistentMemory {
                    name: name.to_string(),
                    reason: "elements differ in width".into(),
                });
            }
            if s.in_list {
                return Err(SimError::InconsistentMemory {
                    name: name.to_string(),
                    reason: "element already belongs to another memory".into(),
                });
            }
        }
        for &e in &elements {
            self.design.signal_mut(e).in_list = true;
        }
        let id = MemId(self.design.memories.len() as u32);
        self.design.memories.push(Memory {
            name: name.to_string(),
            block: self.block,
            elements,
        });
        self.design.blocks[self.block.0 as usize]
            .symdict
            .push((name.to_string(), SymEntry::Memory(id)));
        Ok(id)
    }

    /// Declare a ROM: a table of constants indexed by a signal.
    pub fn rom(&mut self, name: &str, table: Vec<i128>) -> RomId {
        let id = RomId(self.design.roms.len() as u32);
        self.design.roms.push(Rom {
            name: name.to_string(),
            block: self.block,
            table,
        });
        self.design.blocks[self.block.0 as usize]
            .symdict
            .push((name.to_string(), SymEntry::Rom(id)));
        id
    }

    // ─── Process declarators ──────────────────────────────────

    fn add_proc(&mut self, name: String, kind: ProcKind) -> Result<ProcId, SimError> {
        let id = ProcId(self.design.procs.len() as u32);
        // register drivers for tree bodies; a second tree driver is a conflict
        if let ProcKind::Always { body, .. }
        | ProcKind::AlwaysComb { body, .. }
        | ProcKind::AlwaysSeq { body, .. }
        | ProcKind::Initial { body } = &kind
        {
            let mut written = Vec::new();
            visit_stmt_writes(body, &mut |w| written.push(w));
            let mut sigs: Vec<SignalId> = Vec::new();
            for w in written {
                let targets = match w {
                    WriteRef::Sig(s) => vec![s],
                    WriteRef::Mem(m) => self.design.memory(m).elements.clone(),
                };
                for s in targets {
                    if !sigs.contains(&s) {
                        sigs.push(s);
                    }
                }
            }
            for s in sigs {
                let sig = self.design.signal_mut(s);
                match sig.driver {
                    Some(other) if other != id => {
                        return Err(SimError::DriveConflict(
                            sig.name.clone().unwrap_or_default(),
                        ))
                    }
                    _ => {
                        sig.driver = Some(id);
                        sig.driven = Some(Drive::Reg);
                    }
                }
            }
        }
        self.design.procs.push(ProcDecl {
            name,
            block: self.block,
            kind,
        });
        self.design.blocks[self.block.0 as usize].procs.push(id);
        Ok(id)
    }

    /// Process sensitive to an explicit signal set.
    pub fn always(
        &mut self,
        sens: Vec<SignalId>,
        body: Vec<Stmt>,
    ) -> Result<ProcId, SimError> {
        self.add_proc(
            format!("always_{}", self.design.procs.len()),
            ProcKind::Always {
                sens,
                body: Arc::new(body),
            },
        )
    }

    /// Combinational process; sensitivity is every signal the body reads.
    pub fn always_comb(&mut self, body: Vec<Stmt>) -> Result<ProcId, SimError> {
        let sens = self.comb_sensitivity(&body)?;
        self.add_proc(
            format!("comb_{}", self.design.procs.len()),
            ProcKind::AlwaysComb {
                sens,
                body: Arc::new(body),
            },
        )
    }

    /// Clocked process with optional reset.
    pub fn always_seq(
        &mut self,
        edge: ClockEdge,
        reset: Option<Reset>,
        body: Vec<Stmt>,
    ) -> Result<ProcId, SimError> {
        self.add_proc(
            format!("seq_{}", self.design.procs.len()),
            ProcKind::AlwaysSeq {
                edge,
                reset,
                body: Arc::new(body),
            },
        )
    }

    /// One-shot process run at time zero.
    pub fn initial(&mut self, body: Vec<Stmt>) -> Result<ProcId, SimError> {
        self.add_proc(
            format!("initial_{}", self.design.procs.len()),
            ProcKind::Initial {
                body: Arc::new(body),
            },
        )
    }

    /// Continuous assignment: `dst` permanently follows `src`. Emitted
    /// as an `assign`/concurrent statement by the convertor.
    pub fn assign(&mut self, dst: SignalId, src: SignalId) -> Result<ProcId, SimError> {
        let body = vec![Stmt::assign(dst, crate::ast::Expr::Sig(src))];
        let id = self.always_comb(body)?;
        self.design.signal_mut(dst).driven = Some(Drive::Wire);
        Ok(id)
    }

    /// Free-running native process (stimulus, clock generator).
    pub fn instance(
        &mut self,
        name: &str,
        proc: Box<dyn Process>,
    ) -> Result<ProcId, SimError> {
        self.add_proc(name.to_string(), ProcKind::Instance(Some(proc)))
    }

    /// Build a child block. Instance names are unique within a parent;
    /// the child must register at least one process or sub-block.
    pub fn instantiate<T>(
        &mut self,
        name: &str,
        f: impl FnOnce(&mut Ctx<'_>) -> Result<T, SimError>,
    ) -> Result<T, SimError> {
        let parent = self.block;
        let dup = self.design.blocks[parent.0 as usize]
            .subs
            .iter()
            .any(|s| self.design.blocks[s.0 as usize].name == name);
        if dup {
            return Err(SimError::DuplicateInstance(name.to_string()));
        }
        let child = self.design.push_block(Block {
            name: name.to_string(),
            parent: Some(parent),
            ..Block::default()
        });
        self.design.blocks[parent.0 as usize].subs.push(child);
        let out = f(&mut Ctx {
            design: &mut *self.design,
            block: child,
        })?;
        let blk = &self.design.blocks[child.0 as usize];
        if blk.procs.is_empty() && blk.subs.is_empty() {
            return Err(SimError::BlockContractViolation(name.to_string()));
        }
        Ok(out)
    }

    fn comb_sensitivity(&self, body: &[Stmt]) -> Result<Vec<SignalId>, SimError> {
        let mut refs = Vec::new();
        visit_stmt_reads(body, &mut |r| refs.push(r));
        let mut sens: Vec<SignalId> = Vec::new();
        for r in refs {
            match r {
                ReadRef::Sig(s) => {
                    if !sens.contains(&s) {
                        sens.push(s);
                    }
                }
                ReadRef::Mem(m) => {
                    for &e in &self.design.memory(m).elements {
                        if !sens.contains(&e) {
                            sens.push(e);
                        }
                    }
                }
                // ROM tables are constants; only the index contributes
                ReadRef::Rom(_) => {}
            }
        }
        if sens.is_empty() {
            return Err(SimError::SensitivityInference);
        }
        Ok(sens)
    }
}
