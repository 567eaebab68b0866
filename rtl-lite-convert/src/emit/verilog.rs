//! Verilog emitter.
//!
//! Walks the typed IR and prints Verilog-2005 (ANSI ports) or
//! Verilog-1995 (separate port declarations). Every binary expression is
//! parenthesised; sign handling comes from the annotator's cast nodes.

use rtl_lite_core::ast::{BinOp, CmpOp, LogicOp, UnOp};
use rtl_lite_core::{Design, EdgeKind};

use crate::hierarchy::range_of;
use crate::ir::{
    DeclIr, DesignIr, FunctionIr, ItemIr, ModuleIr, PortDir, TExpr, TExprKind, TLValue, TStmt,
    VType,
};
use crate::options::{ConvOptions, VerilogStandard};

use super::{CodeWriter, EmitError};

pub fn emit(design: &Design, ir: &DesignIr, opts: &ConvOptions) -> Result<String, EmitError> {
    emit_flavored(design, ir, opts, false)
}

/// Shared walker for the Verilog and SystemVerilog targets; the latter
/// swaps declaration keywords and block headers.
pub(super) fn emit_flavored(
    design: &Design,
    ir: &DesignIr,
    opts: &ConvOptions,
    sv: bool,
) -> Result<String, EmitError> {
    let mut e = VerilogEmitter {
        design,
        ir,
        opts,
        sv,
        w: CodeWriter::new(),
    };
    e.file()?;
    Ok(e.w.into_string())
}

/// Stub testbench: registers for inputs, wires for outputs, one DUT
/// instance, optional dump instructions.
pub fn emit_testbench(ir: &DesignIr, opts: &ConvOptions) -> String {
    let mut w = CodeWriter::new();
    let Some(top) = ir.modules.first() else {
        return String::new();
    };
    let tb = format!("tb_{}", top.name);
    w.line(format!("`timescale {}", opts.timescale));
    w.blank();
    w.line(format!("module {tb};"));
    w.blank();
    for p in &top.ports {
        let range = range_str(p.vt);
        match p.dir {
            PortDir::In => w.line(format!("reg {}{};", range, p.name)),
            PortDir::Out => w.line(format!("wire {}{};", range, p.name)),
        }
    }
    w.blank();
    if opts.trace {
        w.line("initial begin");
        w.indent();
        w.line(format!("$dumpfile(\"{tb}.vcd\");"));
        w.line(format!("$dumpvars(0, {tb});"));
        w.dedent();
        w.line("end");
        w.blank();
    }
    w.line(format!("{} dut (", top.name));
    w.indent();
    for (i, p) in top.ports.iter().enumerate() {
        let sep = if i + 1 == top.ports.len() { "" } else { "," };
        w.line(format!(".{}({}){}", p.name, p.name, sep));
    }
    w.dedent();
    w.line(");");
    w.blank();
    w.line("endmodule");
    w.into_string()
}

struct VerilogEmitter<'a> {
    design: &'a Design,
    ir: &'a DesignIr,
    opts: &'a ConvOptions,
    sv: bool,
    w: CodeWriter,
}

fn range_str(vt: VType) -> String {
    let sign = if vt.signed { "signed " } else { "" };
    match range_of(vt) {
        Some((hi, lo)) => format!("{sign}[{hi}:{lo}] "),
        None => sign.to_string(),
    }
}

fn lit_str(v: i128) -> String {
    if v < 0 {
        format!("(-{})", -v)
    } else {
        v.to_string()
    }
}

impl VerilogEmitter<'_> {
    fn file(&mut self) -> Result<(), EmitError> {
        self.w.line(format!("`timescale {}", self.opts.timescale));
        self.w.blank();
        let ir = self.ir;
        for m in &ir.modules {
            self.module(m)?;
            self.w.blank();
        }
        Ok(())
    }

    fn module(&mut self, m: &ModuleIr) -> Result<(), EmitError> {
        if self.sv || self.opts.standard == VerilogStandard::V2005 {
            self.module_header_2005(m)?;
        } else {
            self.module_header_1995(m)?;
        }
        self.w.blank();
        self.enum_params(m);
        self.declarations(m)?;
        self.w.blank();
        for f in self.module_functions(m) {
            self.function(m, &f)?;
            self.w.blank();
        }
        for item in &m.items {
            self.item(m, item)?;
            self.w.blank();
        }
        for inst in &m.instances {
            self.instance(m, inst);
            self.w.blank();
        }
        self.w.line("endmodule");
        Ok(())
    }

    fn module_header_2005(&mut self, m: &ModuleIr) -> Result<(), EmitError> {
        if m.ports.is_empty() {
            self.w.line(format!("module {};", m.name));
            return Ok(());
        }
        self.w.line(format!("module {} (", m.name));
        self.w.indent();
        for (i, p) in m.ports.iter().enumerate() {
            if p.vt.nrbits == 0 {
                return Err(EmitError::unsupported("unsized integer port", &m.name));
            }
            let dir = if self.sv {
                match p.dir {
                    PortDir::In => "input  logic",
                    PortDir::Out => "output logic",
                }
            } else {
                match p.dir {
                    PortDir::In => "input  wire",
                    PortDir::Out => {
                        if p.is_reg {
                            "output reg "
                        } else {
                            "output wire"
                        }
                    }
                }
            };
            let sep = if i + 1 == m.ports.len() { "" } else { "," };
            self.w
                .line(format!("{} {}{}{}", dir, range_str(p.vt), p.name, sep));
        }
        self.w.dedent();
        self.w.line(");");
        Ok(())
    }

    fn module_header_1995(&mut self, m: &ModuleIr) -> Result<(), EmitError> {
        let names: Vec<&str> = m.ports.iter().map(|p| p.name.as_str()).collect();
        self.w
            .line(format!("module {} ({});", m.name, names.join(", ")));
        self.w.blank();
        for p in &m.ports {
            if p.vt.nrbits == 0 {
                return Err(EmitError::unsupported("unsized integer port", &m.name));
            }
            let dir = match p.dir {
                PortDir::In => "input",
                PortDir::Out => "output",
            };
            self.w
                .line(format!("{} {}{};", dir, range_str(p.vt), p.name));
            if p.dir == PortDir::Out && p.is_reg {
                self.w.line(format!("reg {}{};", range_str(p.vt), p.name));
            }
        }
        Ok(())
    }

    fn enum_params(&mut self, _m: &ModuleIr) {
        for &ty in &self.ir.enums {
            let t = self.design.enum_type(ty);
            for (i, variant) in t.variants.iter().enumerate() {
                self.w.line(format!(
                    "localparam [{}:0] {} = {};",
                    t.nrbits.saturating_sub(1),
                    enum_label(&t.name, variant),
                    t.encode(i as u32)
                ));
            }
        }
        if !self.ir.enums.is_empty() {
            self.w.blank();
        }
    }

    fn declarations(&mut self, m: &ModuleIr) -> Result<(), EmitError> {
        for d in &m.decls {
            match d {
                DeclIr::Sig {
                    name,
                    vt,
                    is_reg,
                    init,
                    ..
                } => {
                    if vt.nrbits == 0 {
                        self.w.line(format!("integer {name};"));
                        continue;
                    }
                    let keyword = if self.sv {
                        "logic"
                    } else if *is_reg {
                        "reg"
                    } else {
                        "wire"
                    };
                    let init_str = match init {
                        Some(v) if *is_reg && self.opts.initial_values => {
                            format!(" = {}", lit_str(*v))
                        }
                        _ => String::new(),
                    };
                    self.w
                        .line(format!("{} {}{}{};", keyword, range_str(*vt), name, init_str));
                }
                DeclIr::Mem {
                    name, vt, depth, ..
                } => {
                    self.w.line(format!(
                        "reg {}{} [0:{}];",
                        range_str(*vt),
                        name,
                        depth - 1
                    ));
                }
                DeclIr::Const { name, vt, value, .. } => {
                    self.w.line(format!(
                        "localparam {}{} = {};",
                        range_str(*vt),
                        name,
                        lit_str(*value)
                    ));
                }
            }
        }
        Ok(())
    }

    fn module_functions(&self, m: &ModuleIr) -> Vec<FunctionIr> {
        self.ir
            .functions
            .iter()
            .filter(|f| m.functions.contains(&f.func))
            .cloned()
            .collect()
    }

    fn function(&mut self, m: &ModuleIr, f: &FunctionIr) -> Result<(), EmitError> {
        self.w
            .line(format!("function {}{};", range_str(f.ret), f.name));
        self.w.indent();
        for (p, vt) in &f.params {
            self.w.line(format!("input {}{};", range_str(*vt), p));
        }
        self.w.line("begin");
        self.w.indent();
        self.stmts(m, &f.body)?;
        self.w.dedent();
        self.w.line("end");
        self.w.dedent();
        self.w.line("endfunction");
        Ok(())
    }

    fn item(&mut self, m: &ModuleIr, item: &ItemIr) -> Result<(), EmitError> {
        match item {
            ItemIr::Assign { dst, src } => {
                let dst = self.lvalue(m, dst)?;
                let src = self.expr(m, src)?;
                self.w.line(format!("assign {dst} = {src};"));
            }
            ItemIr::Comb {
                label,
                sens,
                vars,
                body,
            } => {
                if self.sv {
                    self.w.line(format!("always_comb begin: {}", label));
                } else {
                    let sens_str = match self.opts.standard {
                        VerilogStandard::V2005 => "*".to_string(),
                        VerilogStandard::V1995 => sens
                            .iter()
                            .map(|s| m.sig_name(*s).to_string())
                            .collect::<Vec<_>>()
                            .join(" or "),
                    };
                    self.w
                        .line(format!("always @({}) begin: {}", sens_str, label));
                }
                self.w.indent();
                self.var_decls(vars);
                self.stmts(m, body)?;
                self.w.dedent();
                self.w.line("end");
            }
            ItemIr::Seq {
                label,
                edge_kind,
                edge_sig,
                reset,
                vars,
                body,
            } => {
                let mut sens = vec![format!(
                    "{} {}",
                    edge_word(*edge_kind),
                    m.sig_name(*edge_sig)
                )];
                if let Some(r) = reset {
                    if r.is_async {
                        let kind = if r.active {
                            EdgeKind::Pos
                        } else {
                            EdgeKind::Neg
                        };
                        sens.push(format!("{} {}", edge_word(kind), m.sig_name(r.sig)));
                    }
                }
                let keyword = if self.sv { "always_ff" } else { "always" };
                self.w.line(format!(
                    "{} @({}) begin: {}",
                    keyword,
                    sens.join(" or "),
                    label
                ));
                self.w.indent();
                self.var_decls(vars);
                match reset {
                    Some(r) => {
                        let test = if r.active {
                            m.sig_name(r.sig).to_string()
                        } else {
                            format!("!{}", m.sig_name(r.sig))
                        };
                        self.w.line(format!("if ({test}) begin"));
                        self.w.indent();
                        for (sig, init) in &r.body {
                            self.w
                                .line(format!("{} <= {};", m.sig_name(*sig), lit_str(*init)));
                        }
                        self.w.dedent();
                        self.w.line("end");
                        self.w.line("else begin");
                        self.w.indent();
                        self.stmts(m, body)?;
                        self.w.dedent();
                        self.w.line("end");
                    }
                    None => self.stmts(m, body)?,
                }
                self.w.dedent();
                self.w.line("end");
            }
            ItemIr::Initial { label, vars, body } => {
                self.w.line(format!("initial begin: {}", label));
                self.w.indent();
                self.var_decls(vars);
                self.stmts(m, body)?;
                self.w.dedent();
                self.w.line("end");
            }
        }
        Ok(())
    }

    fn var_decls(&mut self, vars: &[(String, VType)]) {
        let keyword = if self.sv { "logic" } else { "reg" };
        for (name, vt) in vars {
            if vt.nrbits == 0 {
                self.w.line(format!("integer {name};"));
            } else {
                self.w.line(format!("{} {}{};", keyword, range_str(*vt), name));
            }
        }
        if !vars.is_empty() {
            self.w.blank();
        }
    }

    fn instance(&mut self, m: &ModuleIr, inst: &crate::ir::InstanceIr) {
        self.w
            .line(format!("{} {} (", inst.module_name, inst.inst_name));
        self.w.indent();
        for (i, (port, sig)) in inst.connections.iter().enumerate() {
            let sep = if i + 1 == inst.connections.len() {
                ""
            } else {
                ","
            };
            self.w
                .line(format!(".{}({}){}", port, m.sig_name(*sig), sep));
        }
        self.w.dedent();
        self.w.line(");");
    }

    fn stmts(&mut self, m: &ModuleIr, body: &[TStmt]) -> Result<(), EmitError> {
        for stmt in body {
            self.stmt(m, stmt)?;
        }
        Ok(())
    }

    fn stmt(&mut self, m: &ModuleIr, stmt: &TStmt) -> Result<(), EmitError> {
        match stmt {
            TStmt::Assign { dst, src } => {
                let op = if matches!(dst, TLValue::Var(_)) {
                    "="
                } else {
                    "<="
                };
                let dst = self.lvalue(m, dst)?;
                let src = self.expr(m, src)?;
                self.w.line(format!("{dst} {op} {src};"));
            }
            TStmt::If { arms, orelse } => {
                for (i, (test, body)) in arms.iter().enumerate() {
                    let kw = if i == 0 { "if" } else { "else if" };
                    let test = self.expr(m, test)?;
                    self.w.line(format!("{kw} ({test}) begin"));
                    self.w.indent();
                    self.stmts(m, body)?;
                    self.w.dedent();
                    self.w.line("end");
                }
                if !orelse.is_empty() {
                    self.w.line("else begin");
                    self.w.indent();
                    self.stmts(m, orelse)?;
                    self.w.dedent();
                    self.w.line("end");
                }
            }
            TStmt::Case {
                subject,
                arms,
                default,
            } => {
                let subject = self.expr(m, subject)?;
                self.w.line(format!("case ({subject})"));
                self.w.indent();
                for (label, body) in arms {
                    self.w.line(format!("{}: begin", lit_str(*label)));
                    self.w.indent();
                    self.stmts(m, body)?;
                    self.w.dedent();
                    self.w.line("end");
                }
                self.w.line("default: begin");
                self.w.indent();
                if default.is_empty() {
                    self.w.line(";");
                } else {
                    self.stmts(m, default)?;
                }
                self.w.dedent();
                self.w.line("end");
                self.w.dedent();
                self.w.line("endcase");
            }
            TStmt::For {
                var,
                start,
                end,
                body,
            } => {
                self.w.line(format!(
                    "for ({var} = {}; {var} < {}; {var} = {var} + 1) begin",
                    lit_str(*start),
                    lit_str(*end)
                ));
                self.w.indent();
                self.stmts(m, body)?;
                self.w.dedent();
                self.w.line("end");
            }
            TStmt::Assert { test, msg } => {
                let test = self.expr(m, test)?;
                self.w
                    .line(format!("if (!{test}) $display(\"assertion failed: {msg}\");"));
            }
            TStmt::Print { format, args } => {
                let mut parts = vec![format!("\"{}\"", format)];
                for a in args {
                    parts.push(self.expr(m, a)?);
                }
                self.w.line(format!("$display({});", parts.join(", ")));
            }
        }
        Ok(())
    }

    fn lvalue(&mut self, m: &ModuleIr, dst: &TLValue) -> Result<String, EmitError> {
        Ok(match dst {
            TLValue::Sig(s) => m.sig_name(*s).to_string(),
            TLValue::SigSlice { sig, hi, lo } => {
                format!("{}[{}:{}]", m.sig_name(*sig), hi - 1, lo)
            }
            TLValue::SigBit { sig, index } => {
                format!("{}[{}]", m.sig_name(*sig), self.expr(m, index)?)
            }
            TLValue::Mem { mem, index } => {
                format!("{}[{}]", m.mem_name(*mem), self.expr(m, index)?)
            }
            TLValue::Var(name) => name.clone(),
        })
    }

    fn expr(&mut self, m: &ModuleIr, e: &TExpr) -> Result<String, EmitError> {
        Ok(match &e.kind {
            TExprKind::Lit(v) => lit_str(*v),
            TExprKind::Bool(b) => (if *b { "1'b1" } else { "1'b0" }).to_string(),
            TExprKind::EnumRef { ty, index } => {
                let t = self.design.enum_type(*ty);
                let variant = t
                    .variants
                    .get(*index as usize)
                    .cloned()
                    .unwrap_or_else(|| index.to_string());
                enum_label(&t.name, &variant)
            }
            TExprKind::Sig(s) => m.sig_name(*s).to_string(),
            TExprKind::Var(name) => name.clone(),
            TExprKind::Binary { op, left, right } => {
                let shift_signed = left.vt.signed;
                let l = self.expr(m, left)?;
                let r = self.expr(m, right)?;
                let op = match op {
                    BinOp::Add => "+",
                    BinOp::Sub => "-",
                    BinOp::Mul => "*",
                    BinOp::FloorDiv => "/",
                    BinOp::Mod => "%",
                    BinOp::Shl => "<<",
                    BinOp::Shr => {
                        if shift_signed {
                            ">>>"
                        } else {
                            ">>"
                        }
                    }
                    BinOp::BitAnd => "&",
                    BinOp::BitOr => "|",
                    BinOp::BitXor => "^",
                };
                format!("({l} {op} {r})")
            }
            TExprKind::Unary { op, arg } => {
                let a = self.expr(m, arg)?;
                match op {
                    UnOp::Neg => format!("(-{a})"),
                    UnOp::Invert => format!("(~{a})"),
                    UnOp::Not => format!("(!{a})"),
                }
            }
            TExprKind::Cmp { op, left, right } => {
                let l = self.expr(m, left)?;
                let r = self.expr(m, right)?;
                let op = match op {
                    CmpOp::Eq => "==",
                    CmpOp::Ne => "!=",
                    CmpOp::Lt => "<",
                    CmpOp::Le => "<=",
                    CmpOp::Gt => ">",
                    CmpOp::Ge => ">=",
                };
                format!("({l} {op} {r})")
            }
            TExprKind::Logic { op, terms } => {
                let op = match op {
                    LogicOp::And => " && ",
                    LogicOp::Or => " || ",
                };
                let parts = terms
                    .iter()
                    .map(|t| self.expr(m, t))
                    .collect::<Result<Vec<_>, _>>()?;
                format!("({})", parts.join(op))
            }
            TExprKind::Cond { test, then, orelse } => {
                format!(
                    "({} ? {} : {})",
                    self.expr(m, test)?,
                    self.expr(m, then)?,
                    self.expr(m, orelse)?
                )
            }
            TExprKind::Bit { arg, index } => {
                let name = self.named(m, arg)?;
                format!("{}[{}]", name, self.expr(m, index)?)
            }
            TExprKind::Slice { arg, hi, lo } => {
                let name = self.named(m, arg)?;
                format!("{}[{}:{}]", name, hi - 1, lo)
            }
            TExprKind::MemRead { mem, index } => {
                format!("{}[{}]", m.mem_name(*mem), self.expr(m, index)?)
            }
            TExprKind::RomRead { .. } => {
                return Err(EmitError::unsupported(
                    "ROM subscript outside a whole-signal assignment",
                    &m.name,
                ))
            }
            TExprKind::Concat(terms) => {
                let parts = terms
                    .iter()
                    .map(|t| self.expr(m, t))
                    .collect::<Result<Vec<_>, _>>()?;
                format!("{{{}}}", parts.join(", "))
            }
            TExprKind::Call { func, args } => {
                let f = self
                    .ir
                    .functions
                    .iter()
                    .find(|f| f.func == *func)
                    .map(|f| f.name.clone())
                    .unwrap_or_else(|| "unknown".to_string());
                let parts = args
                    .iter()
                    .map(|a| self.expr(m, a))
                    .collect::<Result<Vec<_>, _>>()?;
                format!("{}({})", f, parts.join(", "))
            }
            TExprKind::SignCast { to_signed, arg } => {
                let a = self.expr(m, arg)?;
                if *to_signed {
                    format!("$signed({a})")
                } else {
                    format!("$unsigned({a})")
                }
            }
        })
    }

    /// Bit and part selects need a plain named operand in Verilog.
    fn named(&mut self, m: &ModuleIr, e: &TExpr) -> Result<String, EmitError> {
        match &e.kind {
            TExprKind::Sig(s) => Ok(m.sig_name(*s).to_string()),
            TExprKind::Var(name) => Ok(name.clone()),
            _ => Err(EmitError::unsupported(
                "bit or part select of a computed value",
                &m.name,
            )),
        }
    }
}

fn edge_word(kind: EdgeKind) -> &'static str {
    match kind {
        EdgeKind::Pos => "posedge",
        EdgeKind::Neg => "negedge",
    }
}

fn enum_label(ty: &str, variant: &str) -> String {
    format!("{}_{}", ty.to_uppercase(), variant.to_uppercase())
}
