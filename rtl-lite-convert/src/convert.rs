//! The conversion facade: analysis → annotation → hierarchy → emission.
//!
//! `render` runs the whole pipeline in memory; `convert` additionally
//! writes the emitted files. Diagnostics from every stage are collected
//! into one report; the numeric error count is the caller's exit code.

use std::fs;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use rtl_lite_core::Design;

use crate::analyze::analyze;
use crate::annotate::annotate;
use crate::diag::{ConvCode, Diagnostic, Diagnostics};
use crate::emit::{systemverilog, verilog, vhdl};
use crate::hierarchy::{build_modules, Hierarchy};
use crate::options::{ConvOptions, Target, VerilogStandard};

/// One emitted output file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmittedFile {
    pub name: String,
    pub contents: String,
}

/// Everything the conversion produced.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConvReport {
    pub diagnostics: Vec<Diagnostic>,
    pub files: Vec<EmittedFile>,
}

impl ConvReport {
    /// Number of errors; zero means success.
    pub fn error_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_error()).count()
    }

    /// JSON form of the report, for tooling that wraps the converter.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<ConvReport> {
        serde_json::from_str(text)
    }

    pub fn is_success(&self) -> bool {
        self.error_count() == 0
    }

    pub fn file(&self, name: &str) -> Option<&EmittedFile> {
        self.files.iter().find(|f| f.name == name)
    }
}

/// Configured conversion front end.
pub struct Converter {
    target: Target,
    opts: ConvOptions,
}

impl Converter {
    pub fn new(target: Target) -> Converter {
        Converter {
            target,
            opts: ConvOptions::default(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Converter {
        self.opts.name = Some(name.into());
        self
    }

    pub fn directory(mut self, dir: impl Into<std::path::PathBuf>) -> Converter {
        self.opts.directory = dir.into();
        self
    }

    pub fn hierarchical(mut self, hierarchy: Hierarchy) -> Converter {
        self.opts.hierarchy = hierarchy;
        self
    }

    pub fn trace(mut self, on: bool) -> Converter {
        self.opts.trace = on;
        self
    }

    pub fn initial_values(mut self, on: bool) -> Converter {
        self.opts.initial_values = on;
        self
    }

    pub fn testbench(mut self, on: bool) -> Converter {
        self.opts.testbench = on;
        self
    }

    pub fn timescale(mut self, ts: impl Into<String>) -> Converter {
        self.opts.timescale = ts.into();
        self
    }

    pub fn standard(mut self, std: VerilogStandard) -> Converter {
        self.opts.standard = std;
        self
    }

    /// Run the pipeline without touching the filesystem.
    pub fn render(&self, design: &Design) -> ConvReport {
        let mut diags = Diagnostics::new();

        let analysis = analyze(design, &mut diags);
        let annotated = annotate(design, &analysis, &mut diags);

        let top_name = self.opts.name.clone().unwrap_or_else(|| {
            design
                .top()
                .map(|b| design.block(b).name.clone())
                .unwrap_or_else(|| "top".to_string())
        });
        let ir = build_modules(
            design,
            &analysis,
            &annotated,
            &top_name,
            self.opts.hierarchy,
            &mut diags,
        );

        if diags.has_errors() {
            return ConvReport {
                diagnostics: diags.into_items(),
                files: Vec::new(),
            };
        }

        let mut files = Vec::new();
        let ext = self.target.file_ext();
        let emitted = match self.target {
            Target::Verilog => verilog::emit(design, &ir, &self.opts),
            Target::Vhdl => vhdl::emit(design, &ir, &self.opts),
            Target::SystemVerilog => systemverilog::emit(design, &ir, &self.opts),
        };
        match emitted {
            Ok(text) => files.push(EmittedFile {
                name: format!("{top_name}.{ext}"),
                contents: text,
            }),
            Err(e) => diags.error(ConvCode::UnsupportedConstruct, e.to_string()),
        }

        if self.target == Target::Vhdl && !ir.enums.is_empty() {
            files.push(EmittedFile {
                name: format!("pck_{top_name}.vhd"),
                contents: vhdl::emit_package(design, &ir, &format!("pck_{top_name}")),
            });
        }

        if self.opts.testbench {
            match self.target {
                Target::Verilog | Target::SystemVerilog => files.push(EmittedFile {
                    name: format!("tb_{top_name}.{ext}"),
                    contents: verilog::emit_testbench(&ir, &self.opts),
                }),
                Target::Vhdl => diags.warning(
                    ConvCode::UnsupportedConstruct,
                    "testbench stubs are only generated for the Verilog targets",
                ),
            }
        }

        if diags.has_errors() {
            files.clear();
        }
        debug!(files = files.len(), errors = diags.error_count(), "render done");
        ConvReport {
            diagnostics: diags.into_items(),
            files,
        }
    }

    /// Run the pipeline and write the emitted files.
    pub fn convert(&self, design: &Design) -> Result<ConvReport> {
        let report = self.render(design);
        if !report.is_success() {
            return Ok(report);
        }
        fs::create_dir_all(&self.opts.directory).with_context(|| {
            format!(
                "creating output directory {}",
                self.opts.directory.display()
            )
        })?;
        for f in &report.files {
            let path = self.opts.directory.join(&f.name);
            fs::write(&path, &f.contents)
                .with_context(|| format!("writing {}", path.display()))?;
            info!(path = %path.display(), "wrote output file");
        }
        Ok(report)
    }
}

/// One-call form of the facade.
pub fn convert(design: &Design, target: Target) -> Result<ConvReport> {
    Converter::new(target).convert(design)
}
