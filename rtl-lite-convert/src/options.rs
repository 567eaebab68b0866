//! Conversion targets and options.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::hierarchy::Hierarchy;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    Verilog,
    Vhdl,
    SystemVerilog,
}

impl Target {
    pub fn file_ext(&self) -> &'static str {
        match self {
            Target::Verilog => "v",
            Target::Vhdl => "vhd",
            Target::SystemVerilog => "sv",
        }
    }
}

/// Port declaration style for the Verilog target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerilogStandard {
    V1995,
    V2005,
}

/// Knobs of the conversion facade. Defaults match a plain flat Verilog
/// conversion into the working directory.
#[derive(Clone, Debug)]
pub struct ConvOptions {
    /// Output module name; defaults to the top block name.
    pub name: Option<String>,
    pub directory: PathBuf,
    pub hierarchy: Hierarchy,
    /// Emit VCD dump instructions into the generated testbench.
    pub trace: bool,
    /// Emit register initial values on declarations.
    pub initial_values: bool,
    /// Generate a stub testbench file.
    pub testbench: bool,
    /// Verilog only.
    pub timescale: String,
    /// Verilog only.
    pub standard: VerilogStandard,
}

impl Default for ConvOptions {
    fn default() -> Self {
        ConvOptions {
            name: None,
            directory: PathBuf::from("."),
            hierarchy: Hierarchy::Flat,
            trace: false,
            initial_values: false,
            testbench: false,
            timescale: "1ns/10ps".to_string(),
            standard: VerilogStandard::V2005,
        }
    }
}
