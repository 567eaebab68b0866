//! Trace sinks.
//!
//! The kernel reports committed signal changes through the `Tracer`
//! seam; the VCD writer is the shipped implementation. Short identifier
//! codes are assigned at init and stored on the signals.

use std::io::{self, Write};

use crate::design::Design;
use crate::signal::SignalId;
use crate::value::Val;

/// Sink for committed signal changes.
pub trait Tracer {
    /// Called once when tracing is installed; may assign codes.
    fn init(&mut self, design: &mut Design) -> io::Result<()>;

    /// Called for every committed value change.
    fn change(&mut self, time: u64, design: &Design, sig: SignalId) -> io::Result<()>;

    /// Called when the simulation object is dropped or finished.
    fn finish(&mut self, design: &Design) -> io::Result<()>;
}

/// Standard VCD output: a definitions section mirroring the block
/// hierarchy, then one `#time` record per simulated time listing only
/// the signals whose value changed.
pub struct VcdWriter<W: Write> {
    out: W,
    timescale: String,
    last_time: Option<u64>,
}

impl<W: Write> VcdWriter<W> {
    pub fn new(out: W) -> Self {
        VcdWriter {
            out,
            timescale: "1ns".to_string(),
            last_time: None,
        }
    }

    pub fn with_timescale(mut self, timescale: impl Into<String>) -> Self {
        self.timescale = timescale.into();
        self
    }

    fn write_record(&mut self, design: &Design, sig: SignalId) -> io::Result<()> {
        let s = design.signal(sig);
        let Some(code) = s.vcd_code.as_deref() else {
            return Ok(());
        };
        match s.val() {
            Val::Bit(b) => writeln!(self.out, "{}{}", *b as u8, code),
            Val::Vec(v) if v.nrbits() > 0 => {
                writeln!(self.out, "b{} {}", v.to_bin_string(v.nrbits()), code)
            }
            Val::Vec(v) => writeln!(self.out, "s{:x} {}", v.val(), code),
            Val::Int(i) => writeln!(self.out, "s{i:x} {}", code),
            Val::Enum(e) => {
                let name = design
                    .enum_type(e.type_id)
                    .variants
                    .get(e.index as usize)
                    .cloned()
                    .unwrap_or_else(|| e.index.to_string());
                writeln!(self.out, "s{} {}", name, code)
            }
        }
    }
}

/// Printable-ASCII identifier for the n-th traced signal.
fn short_code(mut index: usize) -> String {
    let mut code = String::new();
    loop {
        code.push((33 + (index % 94)) as u8 as char);
        index /= 94;
        if index == 0 {
            break;
        }
    }
    code
}

impl<W: Write> Tracer for VcdWriter<W> {
    fn init(&mut self, design: &mut Design) -> io::Result<()> {
        writeln!(self.out, "$timescale {} $end", self.timescale)?;

        // walk the hierarchy, assigning codes as we emit declarations
        let Some(top) = design.top() else {
            writeln!(self.out, "$enddefinitions $end")?;
            return Ok(());
        };
        let mut next_code = 0usize;
        let mut stack = vec![(top, false)];
        let mut traced: Vec<SignalId> = Vec::new();
        while let Some((bid, closing)) = stack.pop() {
            if closing {
                writeln!(self.out, "$upscope $end")?;
                continue;
            }
            let block = design.block(bid);
            writeln!(self.out, "$scope module {} $end", block.name.replace('.', "_"))?;
            let locals: Vec<(String, SignalId)> = block
                .local_signals()
                .map(|(n, s)| (n.to_string(), s))
                .collect();
            let subs = block.subs.clone();
            for (name, sig) in locals {
                let width = design.signal(sig).nrbits().max(1);
                let code = short_code(next_code);
                next_code += 1;
                writeln!(self.out, "$var wire {} {} {} $end", width, code, name)?;
                design.signal_mut(sig).vcd_code = Some(code);
                traced.push(sig);
            }
            stack.push((bid, true));
            for s in subs.into_iter().rev() {
                stack.push((s, false));
            }
        }
        writeln!(self.out, "$enddefinitions $end")?;

        writeln!(self.out, "$dumpvars")?;
        for sig in traced {
            self.write_record(design, sig)?;
        }
        writeln!(self.out, "$end")?;
        Ok(())
    }

    fn change(&mut self, time: u64, design: &Design, sig: SignalId) -> io::Result<()> {
        if self.last_time != Some(time) {
            writeln!(self.out, "#{time}")?;
            self.last_time = Some(time);
        }
        self.write_record(design, sig)
    }

    fn finish(&mut self, _design: &Design) -> io::Result<()> {
        self.out.flush()
    }
}
