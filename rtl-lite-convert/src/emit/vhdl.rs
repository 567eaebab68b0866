//! VHDL emitter.
//!
//! One entity/architecture pair per module over numeric_std types.
//! Enum types go into a shared work package emitted alongside the
//! design file.

use rtl_lite_core::ast::{BinOp, CmpOp, LogicOp, UnOp};
use rtl_lite_core::{Design, EdgeKind};

use crate::ir::{
    DeclIr, DesignIr, FunctionIr, ItemIr, ModuleIr, PortDir, TExpr, TExprKind, TLValue, TStmt,
    VType,
};
use crate::options::ConvOptions;

use super::{CodeWriter, EmitError};

pub fn emit(design: &Design, ir: &DesignIr, opts: &ConvOptions) -> Result<String, EmitError> {
    let mut e = VhdlEmitter {
        design,
        ir,
        opts,
        w: CodeWriter::new(),
    };
    e.file()?;
    Ok(e.w.into_string())
}

/// The shared work package: enum types used anywhere in the design.
pub fn emit_package(design: &Design, ir: &DesignIr, pck_name: &str) -> String {
    let mut w = CodeWriter::new();
    w.line("library ieee;");
    w.line("use ieee.std_logic_1164.all;");
    w.blank();
    w.line(format!("package {pck_name} is"));
    w.indent();
    for &ty in &ir.enums {
        let t = design.enum_type(ty);
        let variants = t.variants.join(", ");
        w.line(format!("type t_{} is ({});", t.name, variants));
    }
    w.dedent();
    w.line(format!("end package {pck_name};"));
    w.into_string()
}

struct VhdlEmitter<'a> {
    design: &'a Design,
    ir: &'a DesignIr,
    opts: &'a ConvOptions,
    w: CodeWriter,
}

fn type_str(vt: VType) -> String {
    if vt.nrbits == 0 {
        "integer".to_string()
    } else if vt.nrbits == 1 && !vt.signed {
        "std_logic".to_string()
    } else if vt.signed {
        format!("signed({} downto 0)", vt.nrbits - 1)
    } else {
        format!("unsigned({} downto 0)", vt.nrbits - 1)
    }
}

/// Initial value literal matching the declared type.
fn init_str(vt: VType, v: i128) -> String {
    if vt.nrbits == 0 {
        v.to_string()
    } else if vt.nrbits == 1 && !vt.signed {
        format!("'{}'", if v != 0 { 1 } else { 0 })
    } else if vt.signed {
        format!("to_signed({}, {})", v, vt.nrbits)
    } else {
        format!("to_unsigned({}, {})", v, vt.nrbits)
    }
}

impl VhdlEmitter<'_> {
    fn file(&mut self) -> Result<(), EmitError> {
        let ir = self.ir;
        for m in &ir.modules {
            self.module(m)?;
            self.w.blank();
        }
        Ok(())
    }

    fn context_clause(&mut self) {
        self.w.line("library ieee;");
        self.w.line("use ieee.std_logic_1164.all;");
        self.w.line("use ieee.numeric_std.all;");
        if !self.ir.enums.is_empty() {
            let top = self
                .opts
                .name
                .clone()
                .unwrap_or_else(|| self.ir.modules[0].name.clone());
            self.w.line(format!("use work.pck_{top}.all;"));
        }
        self.w.blank();
    }

    fn module(&mut self, m: &ModuleIr) -> Result<(), EmitError> {
        self.context_clause();
        self.w.line(format!("entity {} is", m.name));
        if !m.ports.is_empty() {
            self.w.indent();
            self.w.line("port (");
            self.w.indent();
            for (i, p) in m.ports.iter().enumerate() {
                let dir = match p.dir {
                    PortDir::In => "in",
                    PortDir::Out => "out",
                };
                let sep = if i + 1 == m.ports.len() { "" } else { ";" };
                self.w
                    .line(format!("{} : {} {}{}", p.name, dir, type_str(p.vt), sep));
            }
            self.w.dedent();
            self.w.line(");");
            self.w.dedent();
        }
        self.w.line(format!("end entity {};", m.name));
        self.w.blank();
        self.w.line(format!("architecture rtl of {} is", m.name));
        self.w.indent();
        self.declarations(m)?;
        for f in self.module_functions(m) {
            self.function(m, &f)?;
        }
        self.w.dedent();
        self.w.line("begin");
        self.w.indent();
        for item in &m.items {
            self.item(m, item)?;
            self.w.blank();
        }
        for inst in &m.instances {
            self.instance(m, inst);
            self.w.blank();
        }
        self.w.dedent();
        self.w.line("end architecture rtl;");
        Ok(())
    }

    fn declarations(&mut self, m: &ModuleIr) -> Result<(), EmitError> {
        for d in &m.decls {
            match d {
                DeclIr::Sig { name, vt, init, .. } => {
                    let default = match init {
                        Some(v) if self.opts.initial_values => {
                            format!(" := {}", init_str(*vt, *v))
                        }
                        _ => String::new(),
                    };
                    self.w
                        .line(format!("signal {} : {}{};", name, type_str(*vt), default));
                }
                DeclIr::Mem {
                    name, vt, depth, ..
                } => {
                    self.w.line(format!(
                        "type t_{} is array (0 to {}) of {};",
                        name,
                        depth - 1,
                        type_str(*vt)
                    ));
                    self.w.line(format!("signal {} : t_{};", name, name));
                }
                DeclIr::Const { name, vt, value, .. } => {
                    self.w.line(format!(
                        "constant {} : {} := {};",
                        name,
                        type_str(*vt),
                        init_str(*vt, *value)
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
        let params = f
            .params
            .iter()
            .map(|(p, vt)| format!("{} : {}", p, type_str(*vt)))
            .collect::<Vec<_>>()
            .join("; ");
        self.w.line(format!(
            "function {}({}) return {} is",
            f.name,
            params,
            type_str(f.ret)
        ));
        self.w.line("begin");
        self.w.indent();
        for stmt in &f.body {
            // the annotator turned `return e` into an assignment to the
            // function's own name
            if let TStmt::Assign {
                dst: TLValue::Var(name),
                src,
            } = stmt
            {
                if name == &f.name {
                    let src = self.expr(m, src)?;
                    self.w.line(format!("return {src};"));
                    continue;
                }
            }
            self.stmt(m, stmt)?;
        }
        self.w.dedent();
        self.w.line(format!("end function {};", f.name));
        Ok(())
    }

    fn item(&mut self, m: &ModuleIr, item: &ItemIr) -> Result<(), EmitError> {
        match item {
            ItemIr::Assign { dst, src } => {
                let dst_s = self.lvalue(m, dst)?;
                let src_s = self.assigned_expr(m, dst_vt(self.design, dst), src)?;
                self.w.line(format!("{dst_s} <= {src_s};"));
            }
            ItemIr::Comb {
                label,
                sens,
                vars,
                body,
            } => {
                let sens_s = sens
                    .iter()
                    .map(|s| m.sig_name(*s).to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                self.w.line(format!("{label}: process ({sens_s})"));
                self.var_decls(vars);
                self.w.line("begin");
                self.w.indent();
                self.stmts(m, body)?;
                self.w.dedent();
                self.w.line(format!("end process {label};"));
            }
            ItemIr::Seq {
                label,
                edge_kind,
                edge_sig,
                reset,
                vars,
                body,
            } => {
                let clk = m.sig_name(*edge_sig).to_string();
                let mut sens = vec![clk.clone()];
                if let Some(r) = reset {
                    if r.is_async {
                        sens.push(m.sig_name(r.sig).to_string());
                    }
                }
                self.w
                    .line(format!("{label}: process ({})", sens.join(", ")));
                self.var_decls(vars);
                self.w.line("begin");
                self.w.indent();
                let edge_test = format!("{}({})", edge_fn(*edge_kind), clk);
                match reset {
                    Some(r) if r.is_async => {
                        let level = if r.active { "'1'" } else { "'0'" };
                        self.w
                            .line(format!("if {} = {} then", m.sig_name(r.sig), level));
                        self.w.indent();
                        self.reset_body(m, &r.body)?;
                        self.w.dedent();
                        self.w.line(format!("elsif {edge_test} then"));
                        self.w.indent();
                        self.stmts(m, body)?;
                        self.w.dedent();
                        self.w.line("end if;");
                    }
                    Some(r) => {
                        let level = if r.active { "'1'" } else { "'0'" };
                        self.w.line(format!("if {edge_test} then"));
                        self.w.indent();
                        self.w
                            .line(format!("if {} = {} then", m.sig_name(r.sig), level));
                        self.w.indent();
                        self.reset_body(m, &r.body)?;
                        self.w.dedent();
                        self.w.line("else");
                        self.w.indent();
                        self.stmts(m, body)?;
                        self.w.dedent();
                        self.w.line("end if;");
                        self.w.dedent();
                        self.w.line("end if;");
                    }
                    None => {
                        self.w.line(format!("if {edge_test} then"));
                        self.w.indent();
                        self.stmts(m, body)?;
                        self.w.dedent();
                        self.w.line("end if;");
                    }
                }
                self.w.dedent();
                self.w.line(format!("end process {label};"));
            }
            ItemIr::Initial { label, .. } => {
                return Err(EmitError::unsupported(
                    "one-shot initial process",
                    format!("{} in {}", label, m.name),
                ))
            }
        }
        Ok(())
    }

    fn reset_body(&mut self, m: &ModuleIr, body: &[(rtl_lite_core::SignalId, i128)]) -> Result<(), EmitError> {
        for (sig, init) in body {
            let vt = crate::annotate::sig_vtype(self.design, *sig);
            self.w
                .line(format!("{} <= {};", m.sig_name(*sig), init_str(vt, *init)));
        }
        Ok(())
    }

    fn var_decls(&mut self, vars: &[(String, VType)]) {
        if vars.is_empty() {
            return;
        }
        self.w.indent();
        for (name, vt) in vars {
            self.w
                .line(format!("variable {} : {};", name, type_str(*vt)));
        }
        self.w.dedent();
    }

    fn instance(&mut self, m: &ModuleIr, inst: &crate::ir::InstanceIr) {
        self.w.line(format!(
            "{}: entity work.{}",
            inst.inst_name, inst.module_name
        ));
        self.w.indent();
        self.w.line("port map (");
        self.w.indent();
        for (i, (port, sig)) in inst.connections.iter().enumerate() {
            let sep = if i + 1 == inst.connections.len() {
                ""
            } else {
                ","
            };
            self.w
                .line(format!("{} => {}{}", port, m.sig_name(*sig), sep));
        }
        self.w.dedent();
        self.w.line(");");
        self.w.dedent();
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
                    ":="
                } else {
                    "<="
                };
                let dst_s = self.lvalue(m, dst)?;
                let src_s = self.assigned_expr(m, dst_vt(self.design, dst), src)?;
                self.w.line(format!("{dst_s} {op} {src_s};"));
            }
            TStmt::If { arms, orelse } => {
                for (i, (test, body)) in arms.iter().enumerate() {
                    let kw = if i == 0 { "if" } else { "elsif" };
                    let test = self.bool_expr(m, test)?;
                    self.w.line(format!("{kw} {test} then"));
                    self.w.indent();
                    self.stmts(m, body)?;
                    self.w.dedent();
                }
                if !orelse.is_empty() {
                    self.w.line("else");
                    self.w.indent();
                    self.stmts(m, orelse)?;
                    self.w.dedent();
                }
                self.w.line("end if;");
            }
            TStmt::Case {
                subject,
                arms,
                default,
            } => {
                let subject_s = if subject.vt.nrbits > 0 {
                    format!("to_integer({})", self.expr(m, subject)?)
                } else {
                    self.expr(m, subject)?
                };
                self.w.line(format!("case {subject_s} is"));
                self.w.indent();
                for (label, body) in arms {
                    self.w.line(format!("when {label} =>"));
                    self.w.indent();
                    self.stmts(m, body)?;
                    self.w.dedent();
                }
                self.w.line("when others =>");
                self.w.indent();
                if default.is_empty() {
                    self.w.line("null;");
                } else {
                    self.stmts(m, default)?;
                }
                self.w.dedent();
                self.w.dedent();
                self.w.line("end case;");
            }
            TStmt::For {
                var,
                start,
                end,
                body,
            } => {
                self.w.line(format!(
                    "for {} in {} to {} loop",
                    var,
                    start,
                    end - 1
                ));
                self.w.indent();
                self.stmts(m, body)?;
                self.w.dedent();
                self.w.line("end loop;");
            }
            TStmt::Assert { test, msg } => {
                let test = self.bool_expr(m, test)?;
                self.w
                    .line(format!("assert {test} report \"{msg}\" severity error;"));
            }
            TStmt::Print { format, args } => {
                if !args.is_empty() {
                    return Err(EmitError::unsupported(
                        "formatted print with arguments",
                        &m.name,
                    ));
                }
                self.w
                    .line(format!("report \"{format}\" severity note;"));
            }
        }
        Ok(())
    }

    fn lvalue(&mut self, m: &ModuleIr, dst: &TLValue) -> Result<String, EmitError> {
        Ok(match dst {
            TLValue::Sig(s) => m.sig_name(*s).to_string(),
            TLValue::SigSlice { sig, hi, lo } => {
                format!("{}({} downto {})", m.sig_name(*sig), hi - 1, lo)
            }
            TLValue::SigBit { sig, index } => {
                format!(
                    "{}(to_integer({}))",
                    m.sig_name(*sig),
                    self.expr(m, index)?
                )
            }
            TLValue::Mem { mem, index } => {
                format!(
                    "{}(to_integer({}))",
                    m.mem_name(*mem),
                    self.expr(m, index)?
                )
            }
            TLValue::Var(name) => name.clone(),
        })
    }

    /// Source expression of an assignment, adapted to the target type: a
    /// bare literal gains an explicit conversion to the sized target.
    fn assigned_expr(
        &mut self,
        m: &ModuleIr,
        dst_vt: Option<VType>,
        src: &TExpr,
    ) -> Result<String, EmitError> {
        if let (Some(vt), TExprKind::Lit(v)) = (dst_vt, &src.kind) {
            if vt.nrbits > 0 {
                return Ok(init_str(vt, *v));
            }
        }
        self.expr(m, src)
    }

    /// Condition position: comparisons and logic are already boolean,
    /// bits compare against '1', numbers against zero.
    fn bool_expr(&mut self, m: &ModuleIr, e: &TExpr) -> Result<String, EmitError> {
        match &e.kind {
            TExprKind::Cmp { .. } | TExprKind::Logic { .. } => self.expr(m, e),
            TExprKind::Unary {
                op: UnOp::Not,
                arg,
            } => Ok(format!("not {}", self.bool_expr(m, arg)?)),
            _ if e.vt.nrbits == 1 && !e.vt.signed => {
                Ok(format!("({} = '1')", self.expr(m, e)?))
            }
            _ => Ok(format!("({} /= 0)", self.expr(m, e)?)),
        }
    }

    fn expr(&mut self, m: &ModuleIr, e: &TExpr) -> Result<String, EmitError> {
        Ok(match &e.kind {
            TExprKind::Lit(v) => v.to_string(),
            TExprKind::Bool(b) => (if *b { "'1'" } else { "'0'" }).to_string(),
            TExprKind::EnumRef { ty, index } => {
                let t = self.design.enum_type(*ty);
                t.variants
                    .get(*index as usize)
                    .cloned()
                    .unwrap_or_else(|| index.to_string())
            }
            TExprKind::Sig(s) => m.sig_name(*s).to_string(),
            TExprKind::Var(name) => name.clone(),
            TExprKind::Binary { op, left, right } => {
                let l = self.expr(m, left)?;
                let r = self.expr(m, right)?;
                match op {
                    BinOp::Add => format!("({l} + {r})"),
                    BinOp::Sub => format!("({l} - {r})"),
                    BinOp::Mul => format!("({l} * {r})"),
                    BinOp::FloorDiv => format!("({l} / {r})"),
                    BinOp::Mod => format!("({l} mod {r})"),
                    BinOp::Shl => format!("shift_left({l}, {r})"),
                    BinOp::Shr => format!("shift_right({l}, {r})"),
                    BinOp::BitAnd => format!("({l} and {r})"),
                    BinOp::BitOr => format!("({l} or {r})"),
                    BinOp::BitXor => format!("({l} xor {r})"),
                }
            }
            TExprKind::Unary { op, arg } => {
                let a = self.expr(m, arg)?;
                match op {
                    UnOp::Neg => format!("(-{a})"),
                    UnOp::Invert => format!("(not {a})"),
                    UnOp::Not => format!("(not {a})"),
                }
            }
            TExprKind::Cmp { op, left, right } => {
                let l = self.expr(m, left)?;
                let r = self.expr(m, right)?;
                let op = match op {
                    CmpOp::Eq => "=",
                    CmpOp::Ne => "/=",
                    CmpOp::Lt => "<",
                    CmpOp::Le => "<=",
                    CmpOp::Gt => ">",
                    CmpOp::Ge => ">=",
                };
                format!("({l} {op} {r})")
            }
            TExprKind::Logic { op, terms } => {
                let op = match op {
                    LogicOp::And => " and ",
                    LogicOp::Or => " or ",
                };
                let parts = terms
                    .iter()
                    .map(|t| self.bool_expr(m, t))
                    .collect::<Result<Vec<_>, _>>()?;
                format!("({})", parts.join(op))
            }
            TExprKind::Cond { test, then, orelse } => {
                format!(
                    "({} when {} else {})",
                    self.expr(m, then)?,
                    self.bool_expr(m, test)?,
                    self.expr(m, orelse)?
                )
            }
            TExprKind::Bit { arg, index } => {
                format!(
                    "{}(to_integer({}))",
                    self.expr(m, arg)?,
                    self.expr(m, index)?
                )
            }
            TExprKind::Slice { arg, hi, lo } => {
                format!("{}({} downto {})", self.expr(m, arg)?, hi - 1, lo)
            }
            TExprKind::MemRead { mem, index } => {
                format!(
                    "{}(to_integer({}))",
                    m.mem_name(*mem),
                    self.expr(m, index)?
                )
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
                format!("({})", parts.join(" & "))
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
                    format!("signed(resize({a}, {}))", e.vt.nrbits.max(1))
                } else {
                    format!("unsigned({a})")
                }
            }
        })
    }
}

fn dst_vt(design: &Design, dst: &TLValue) -> Option<VType> {
    match dst {
        TLValue::Sig(s) => Some(crate::annotate::sig_vtype(design, *s)),
        TLValue::SigSlice { hi, lo, .. } => Some(VType::unsigned(hi - lo)),
        TLValue::SigBit { .. } => Some(VType::bit()),
        TLValue::Mem { mem, .. } => {
            let elem = design.memory(*mem).elements.first()?;
            Some(crate::annotate::sig_vtype(design, *elem))
        }
        TLValue::Var(_) => None,
    }
}

fn edge_fn(kind: EdgeKind) -> &'static str {
    match kind {
        EdgeKind::Pos => "rising_edge",
        EdgeKind::Neg => "falling_edge",
    }
}
