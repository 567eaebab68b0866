//! rtl-lite-convert: behavioural trees to synthesizable HDL.
//!
//! The pipeline is a pure batch run over an elaborated
//! [`Design`](rtl_lite_core::Design): per-process analysis and signal
//! flow validation, type annotation into a canonical typed IR, a
//! hierarchy pre-pass choosing the module cuts, and one emitter per
//! target dialect. Analysis errors are accumulated and reported
//! together; the emitters never drop a construct silently.

pub mod analyze;
pub mod annotate;
pub mod convert;
pub mod diag;
pub mod emit;
pub mod hierarchy;
pub mod ir;
pub mod options;

pub use convert::{convert, ConvReport, Converter, EmittedFile};
pub use diag::{ConvCode, Diagnostic, Diagnostics, Severity};
pub use emit::EmitError;
pub use hierarchy::Hierarchy;
pub use options::{ConvOptions, Target, VerilogStandard};
