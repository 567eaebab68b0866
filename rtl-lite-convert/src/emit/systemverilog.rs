//! SystemVerilog emitter.
//!
//! Shares the Verilog walker; the differences are declaration keywords
//! (`logic`), ANSI headers regardless of the `standard` option, and
//! `always_comb`/`always_ff` block headers.

use rtl_lite_core::Design;

use crate::ir::DesignIr;
use crate::options::ConvOptions;

use super::{verilog, EmitError};

pub fn emit(design: &Design, ir: &DesignIr, opts: &ConvOptions) -> Result<String, EmitError> {
    verilog::emit_flavored(design, ir, opts, true)
}
