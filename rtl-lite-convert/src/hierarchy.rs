//! Hierarchy pre-pass: block tree → module set.
//!
//! Flat and hierarchical conversion are the same walk over the same IR;
//! the only difference is where the module cuts are made. Each "module
//! root" absorbs the blocks below it up to the next root; signals
//! referenced inside a region but declared outside it become the
//! module's ports.

use std::collections::{BTreeMap, BTreeSet};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use tracing::debug;

use rtl_lite_core::ast::MemId;
use rtl_lite_core::design::SymEntry;
use rtl_lite_core::{BlockId, Design, SignalFlavor, SignalId, Val};

use crate::analyze::{sig_name, Analysis, ProcClass};
use crate::annotate::{sig_vtype, Annotated};
use crate::diag::{ConvCode, Diagnostic, Diagnostics};
use crate::ir::{
    DeclIr, DesignIr, InstanceIr, ItemIr, ModuleIr, PortDir, PortIr, ResetIr, TExpr, TExprKind,
    TLValue, TStmt, VType,
};

/// Module cut selection. `Flat` inlines everything into the top;
/// `Full` emits one module per block; `Depth(n)` keeps modules down to
/// depth n and flattens below.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Hierarchy {
    Flat,
    Full,
    Depth(u32),
}

pub fn build_modules(
    design: &Design,
    analysis: &Analysis,
    annotated: &Annotated,
    top_name: &str,
    hierarchy: Hierarchy,
    diags: &mut Diagnostics,
) -> DesignIr {
    let Some(top) = design.top() else {
        diags.error(ConvCode::UnsupportedConstruct, "design has no top block");
        return DesignIr {
            modules: Vec::new(),
            functions: annotated.functions.clone(),
            enums: Vec::new(),
        };
    };

    // instance graph; kept explicit so region discovery is a plain DFS
    let mut graph: DiGraph<BlockId, ()> = DiGraph::new();
    let mut node_of: BTreeMap<u32, NodeIndex> = BTreeMap::new();
    for (bid, _) in design.blocks() {
        node_of.insert(bid.0, graph.add_node(bid));
    }
    for (bid, block) in design.blocks() {
        for sub in &block.subs {
            graph.add_edge(node_of[&bid.0], node_of[&sub.0], ());
        }
    }

    // depth per block, from the top
    let mut depth: BTreeMap<u32, u32> = BTreeMap::new();
    depth.insert(top.0, 0);
    let mut dfs = Dfs::new(&graph, node_of[&top.0]);
    while let Some(nx) = dfs.next(&graph) {
        let bid = graph[nx];
        let d = depth[&bid.0];
        for sub in &design.block(bid).subs {
            depth.insert(sub.0, d + 1);
        }
    }

    let is_root = |bid: BlockId| -> bool {
        if bid == top {
            return true;
        }
        match hierarchy {
            Hierarchy::Flat => false,
            Hierarchy::Full => true,
            Hierarchy::Depth(n) => depth.get(&bid.0).copied().unwrap_or(0) <= n,
        }
    };

    // region per root: the root and every descendant up to the next root
    let roots: Vec<BlockId> = design
        .blocks()
        .map(|(bid, _)| bid)
        .filter(|b| is_root(*b))
        .collect();
    let mut regions: BTreeMap<u32, Vec<BlockId>> = BTreeMap::new();
    for &root in &roots {
        let mut region = vec![root];
        let mut stack: Vec<BlockId> = design.block(root).subs.clone();
        while let Some(b) = stack.pop() {
            if is_root(b) {
                continue;
            }
            region.push(b);
            stack.extend(design.block(b).subs.iter().copied());
        }
        regions.insert(root.0, region);
    }

    let builder = ModuleBuilder {
        design,
        analysis,
        annotated,
        top,
        top_name,
    };

    // two passes: ports of every root first, then the module bodies that
    // reference child port lists for instantiations
    let mut ports: BTreeMap<u32, Vec<PortIr>> = BTreeMap::new();
    for &root in &roots {
        ports.insert(root.0, builder.ports_of(root, &regions[&root.0], diags));
    }

    let mut modules = Vec::new();
    for &root in &roots {
        modules.push(builder.build(root, &regions[&root.0], &ports, &roots, diags));
    }
    // top module first
    modules.sort_by_key(|m| if m.name == top_name { 0 } else { 1 });

    debug!(modules = modules.len(), "hierarchy pre-pass done");

    let mut enums: Vec<rtl_lite_core::EnumTypeId> = Vec::new();
    for i in 0..design.signal_count() {
        let sid = SignalId(i as u32);
        if let Val::Enum(e) = design.signal(sid).init() {
            if !enums.contains(&e.type_id) {
                enums.push(e.type_id);
            }
        }
    }

    DesignIr {
        modules,
        functions: annotated.functions.clone(),
        enums,
    }
}

struct ModuleBuilder<'a> {
    design: &'a Design,
    analysis: &'a Analysis,
    annotated: &'a Annotated,
    top: BlockId,
    top_name: &'a str,
}

impl ModuleBuilder<'_> {
    fn module_name(&self, root: BlockId) -> String {
        if root == self.top {
            self.top_name.to_string()
        } else {
            sanitize(&self.design.block(root).name)
        }
    }

    /// Signals referenced by any process of the region.
    fn referenced(&self, region: &[BlockId]) -> Vec<SignalId> {
        let mut out = Vec::new();
        for info in &self.analysis.procs {
            if !region.contains(&info.block) {
                continue;
            }
            let mut add = |s: SignalId| {
                if !out.contains(&s) {
                    out.push(s);
                }
            };
            info.inputs.iter().copied().for_each(&mut add);
            info.outputs.iter().copied().for_each(&mut add);
            if let Some(e) = info.edge {
                add(e.sig);
            }
            if let Some(r) = info.reset {
                add(r.sig);
            }
        }
        out
    }

    fn declared_in(&self, region: &[BlockId]) -> BTreeSet<SignalId> {
        let mut set = BTreeSet::new();
        for &b in region {
            for (_, s) in self.design.block(b).local_signals() {
                set.insert(s);
            }
        }
        set
    }

    fn driven_in(&self, region: &[BlockId], sig: SignalId) -> bool {
        self.analysis
            .procs
            .iter()
            .filter(|p| region.contains(&p.block))
            .any(|p| p.outputs.contains(&sig))
    }

    fn read_in(&self, region: &[BlockId], sig: SignalId) -> bool {
        self.analysis
            .procs
            .iter()
            .filter(|p| region.contains(&p.block))
            .any(|p| {
                p.inputs.contains(&sig)
                    || p.edge.is_some_and(|e| e.sig == sig)
                    || p.reset.is_some_and(|r| r.sig == sig)
            })
    }

    fn is_reg_driven(&self, region: &[BlockId], sig: SignalId) -> bool {
        self.analysis
            .procs
            .iter()
            .filter(|p| region.contains(&p.block))
            .any(|p| p.class != ProcClass::SimpleComb && p.outputs.contains(&sig))
    }

    /// Port name inside the module: the alias under which the root block
    /// knows the signal, or its declared name.
    fn port_name(&self, root: BlockId, sig: SignalId) -> String {
        for (name, entry) in &self.design.block(root).symdict {
            if let SymEntry::Signal { sig: s, aliased: true } = entry {
                if *s == sig {
                    return sanitize(name);
                }
            }
        }
        self.design
            .signal(sig)
            .name
            .clone()
            .map(|n| sanitize(&n))
            .unwrap_or_else(|| format!("port_{}", sig.0))
    }

    fn ports_of(&self, root: BlockId, region: &[BlockId], diags: &mut Diagnostics) -> Vec<PortIr> {
        let declared = self.declared_in(region);
        let mut ports = Vec::new();
        if root == self.top {
            // the top interface: locally declared signals that flow in
            // exactly one direction
            for (name, sig) in self.design.block(root).local_signals() {
                let s = self.design.signal(sig);
                if matches!(s.flavor, SignalFlavor::Constant | SignalFlavor::Shadow(_)) {
                    continue;
                }
                let driven = self.analysis.is_driven(sig) || s.driven.is_some();
                let read = self.analysis.is_read(sig) || s.read;
                let dir = match (driven, read) {
                    (true, false) => PortDir::Out,
                    (false, true) => PortDir::In,
                    _ => continue, // internal wire or unused
                };
                ports.push(PortIr {
                    name: sanitize(name),
                    dir,
                    vt: sig_vtype(self.design, sig),
                    sig,
                    is_reg: dir == PortDir::Out && self.is_reg_driven(region, sig),
                });
            }
        } else {
            for sig in self.referenced(region) {
                if declared.contains(&sig) {
                    continue;
                }
                let driven = self.driven_in(region, sig);
                let read = self.read_in(region, sig);
                if driven && read {
                    diags.push(
                        Diagnostic::error(
                            ConvCode::OutputPortRead,
                            "output port is read inside the defining block",
                        )
                        .on_signal(sig_name(self.design, sig)),
                    );
                }
                let dir = if driven { PortDir::Out } else { PortDir::In };
                ports.push(PortIr {
                    name: self.port_name(root, sig),
                    dir,
                    vt: sig_vtype(self.design, sig),
                    sig,
                    is_reg: dir == PortDir::Out && self.is_reg_driven(region, sig),
                });
            }
        }
        ports
    }

    fn build(
        &self,
        root: BlockId,
        region: &[BlockId],
        all_ports: &BTreeMap<u32, Vec<PortIr>>,
        roots: &[BlockId],
        diags: &mut Diagnostics,
    ) -> ModuleIr {
        let ports = all_ports[&root.0].clone();
        let port_sigs: BTreeSet<SignalId> = ports.iter().map(|p| p.sig).collect();
        let referenced = self.referenced(region);

        // emission names
        let mut names: BTreeMap<u32, String> = BTreeMap::new();
        for p in &ports {
            names.insert(p.sig.0, p.name.clone());
        }
        let root_prefix = self.abs_prefix(root);
        for &b in region {
            for (name, sig) in self.design.block(b).local_signals() {
                if names.contains_key(&sig.0) {
                    continue;
                }
                let n = if b == root {
                    sanitize(name)
                } else {
                    let abs = self
                        .design
                        .signal(sig)
                        .abs_name
                        .clone()
                        .unwrap_or_else(|| name.to_string());
                    sanitize(abs.strip_prefix(&root_prefix).unwrap_or(&abs))
                };
                names.insert(sig.0, n);
            }
        }

        // child instances come first: a parent-declared signal may be
        // referenced only through a child connection and still needs a
        // declaration here
        let mut instances = Vec::new();
        let mut connected: BTreeSet<SignalId> = BTreeSet::new();
        for &sub in &self.design.block(root).subs {
            if !roots.contains(&sub) {
                continue;
            }
            let sub_ports = &all_ports[&sub.0];
            let connections = sub_ports
                .iter()
                .map(|p| (p.name.clone(), p.sig))
                .collect::<Vec<_>>();
            for (_, sig) in &connections {
                connected.insert(*sig);
                names
                    .entry(sig.0)
                    .or_insert_with(|| self.port_name(root, *sig));
            }
            instances.push(InstanceIr {
                inst_name: sanitize(&self.design.block(sub).name),
                module_name: self.module_name(sub),
                connections,
            });
        }

        // declarations
        let mut decls = Vec::new();
        let mut mem_names: BTreeMap<u32, String> = BTreeMap::new();
        for &b in region {
            for (_name, sig) in self.design.block(b).local_signals() {
                if port_sigs.contains(&sig) {
                    continue;
                }
                let s = self.design.signal(sig);
                let used = referenced.contains(&sig) || connected.contains(&sig);
                if !used {
                    continue;
                }
                let vt = sig_vtype(self.design, sig);
                let display = names[&sig.0].clone();
                match s.flavor {
                    SignalFlavor::Constant => {
                        let value = s.init().as_i128().unwrap_or(0);
                        decls.push(DeclIr::Const {
                            name: display,
                            vt,
                            value,
                            sig,
                        });
                    }
                    SignalFlavor::Shadow(_) => {
                        diags.push(
                            Diagnostic::error(
                                ConvCode::UnsupportedConstruct,
                                "shadow slice signals cannot be converted; slice the parent instead",
                            )
                            .on_signal(sig_name(self.design, sig)),
                        );
                    }
                    _ => {
                        if s.in_list {
                            continue; // folded into its memory declaration
                        }
                        decls.push(DeclIr::Sig {
                            name: display,
                            vt,
                            is_reg: self.is_reg_driven(region, sig),
                            init: s.init().as_i128(),
                            sig,
                        });
                    }
                }
            }
        }

        // memories declared in the region
        for (mid, mem) in self.design.memories() {
            if !region.contains(&mem.block) {
                continue;
            }
            let elem = mem.elements[0];
            let vt = sig_vtype(self.design, elem);
            let mname = sanitize(&mem.name);
            mem_names.insert(mid.0, mname.clone());
            decls.push(DeclIr::Mem {
                name: mname,
                vt,
                depth: mem.elements.len(),
                mem: mid,
            });
        }

        // behavioural items in declaration order
        let mut items = Vec::new();
        let mut functions = Vec::new();
        for info in &self.analysis.procs {
            if !region.contains(&info.block) {
                continue;
            }
            let Some((body, vars)) = self.annotated.body_of(info.id) else {
                continue;
            };
            collect_function_refs(body, &mut functions);
            let item = match info.class {
                ProcClass::SimpleComb => match body.as_slice() {
                    [TStmt::Assign { dst, src }] => ItemIr::Assign {
                        dst: dst.clone(),
                        src: src.clone(),
                    },
                    _ => ItemIr::Comb {
                        label: info.name.clone(),
                        sens: info.sens.clone(),
                        vars: vars.clone(),
                        body: body.clone(),
                    },
                },
                ProcClass::AlwaysComb | ProcClass::Always => ItemIr::Comb {
                    label: info.name.clone(),
                    sens: info.sens.clone(),
                    vars: vars.clone(),
                    body: body.clone(),
                },
                ProcClass::AlwaysSeq => {
                    let edge = info.edge.expect("clocked process carries its edge");
                    let reset = info.reset.map(|r| ResetIr {
                        sig: r.sig,
                        active: r.active,
                        is_async: r.is_async,
                        body: info
                            .outputs
                            .iter()
                            .map(|&s| (s, self.design.signal(s).init().as_i128().unwrap_or(0)))
                            .collect(),
                    });
                    ItemIr::Seq {
                        label: info.name.clone(),
                        edge_kind: edge.kind,
                        edge_sig: edge.sig,
                        reset,
                        vars: vars.clone(),
                        body: body.clone(),
                    }
                }
                ProcClass::Initial => ItemIr::Initial {
                    label: info.name.clone(),
                    vars: vars.clone(),
                    body: body.clone(),
                },
            };
            items.push(item);
        }

        ModuleIr {
            name: self.module_name(root),
            ports,
            decls,
            items,
            instances,
            functions,
            names,
            mem_names,
        }
    }

    /// Dotted path of a block below the top, with a trailing dot, for
    /// stripping from absolute signal names.
    fn abs_prefix(&self, root: BlockId) -> String {
        if root == self.top {
            return String::new();
        }
        let mut parts = Vec::new();
        let mut cur = Some(root);
        while let Some(b) = cur {
            if b == self.top {
                break;
            }
            parts.push(self.design.block(b).name.clone());
            cur = self.design.block(b).parent;
        }
        parts.reverse();
        format!("{}.", parts.join("."))
    }
}

fn collect_function_refs(body: &[TStmt], out: &mut Vec<rtl_lite_core::ast::FuncId>) {
    fn expr(e: &TExpr, out: &mut Vec<rtl_lite_core::ast::FuncId>) {
        match &e.kind {
            TExprKind::Call { func, args } => {
                if !out.contains(func) {
                    out.push(*func);
                }
                for a in args {
                    expr(a, out);
                }
            }
            TExprKind::Binary { left, right, .. } | TExprKind::Cmp { left, right, .. } => {
                expr(left, out);
                expr(right, out);
            }
            TExprKind::Unary { arg, .. } | TExprKind::SignCast { arg, .. } => expr(arg, out),
            TExprKind::Logic { terms, .. } | TExprKind::Concat(terms) => {
                for t in terms {
                    expr(t, out);
                }
            }
            TExprKind::Cond { test, then, orelse } => {
                expr(test, out);
                expr(then, out);
                expr(orelse, out);
            }
            TExprKind::Bit { arg, index } => {
                expr(arg, out);
                expr(index, out);
            }
            TExprKind::Slice { arg, .. } => expr(arg, out),
            TExprKind::MemRead { index, .. } | TExprKind::RomRead { index, .. } => {
                expr(index, out)
            }
            _ => {}
        }
    }
    fn lvalue(l: &TLValue, out: &mut Vec<rtl_lite_core::ast::FuncId>) {
        match l {
            TLValue::SigBit { index, .. } | TLValue::Mem { index, .. } => expr(index, out),
            _ => {}
        }
    }
    for stmt in body {
        match stmt {
            TStmt::Assign { dst, src } => {
                lvalue(dst, out);
                expr(src, out);
            }
            TStmt::If { arms, orelse } => {
                for (t, b) in arms {
                    expr(t, out);
                    collect_function_refs(b, out);
                }
                collect_function_refs(orelse, out);
            }
            TStmt::Case {
                subject,
                arms,
                default,
            } => {
                expr(subject, out);
                for (_, b) in arms {
                    collect_function_refs(b, out);
                }
                collect_function_refs(default, out);
            }
            TStmt::For { body, .. } => collect_function_refs(body, out),
            TStmt::Assert { test, .. } => expr(test, out),
            TStmt::Print { args, .. } => {
                for a in args {
                    expr(a, out);
                }
            }
        }
    }
}

/// Hierarchical names flatten to identifier-safe form.
fn sanitize(name: &str) -> String {
    name.replace(['.', '(', ')', ','], "_")
}

/// Width helper for emitters; unsized types print without a range.
pub fn range_of(vt: VType) -> Option<(u32, u32)> {
    if vt.nrbits > 1 {
        Some((vt.nrbits - 1, 0))
    } else {
        None
    }
}
