//! The host functions a lorn guest may import, bound under [`RUNTIME_NAMESPACE`].
//!
//! These four calls are the guest's entire capability surface beyond its own
//! memory: terminate the run, read the clock, and two buffered text-output
//! primitives. All state they touch lives in [`HostState`], one per store;
//! nothing here is process-global.

use std::io::{self, Write as _};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context as _, Result};
use wasmtime::{Caller, Extern, Linker, Memory};

use lorn_guest_abi::{encode_u64, read_bytes, write_bytes};

use crate::{HostState, MEMORY_EXPORT};

/// Import namespace guest modules are compiled against.
pub const RUNTIME_NAMESPACE: &str = "lorn_runtime";

/// Raised through the guest call stack by the `exit` import.
///
/// Not a failure: it is the guest's normal-termination channel, and the driver
/// turns it back into `RunOutcome::Exited` after the unwind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitSignal(pub u32);

impl ExitSignal {
    pub fn code(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for ExitSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "guest exited with status {}", self.0)
    }
}

impl std::error::Error for ExitSignal {}

/// Where flushed output lines go.
#[derive(Debug)]
pub enum OutputSink {
    Stdout,
    Capture(Vec<u8>),
}

impl io::Write for OutputSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            OutputSink::Stdout => io::stdout().write(buf),
            OutputSink::Capture(bytes) => {
                bytes.extend_from_slice(buf);
                Ok(buf.len())
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            OutputSink::Stdout => io::stdout().flush(),
            OutputSink::Capture(_) => Ok(()),
        }
    }
}

/// Line-buffered guest output: the not-yet-terminated tail accumulates in
/// `pending` across calls until a newline completes it.
#[derive(Debug)]
pub struct OutputBuffer {
    pending: String,
    sink: OutputSink,
}

impl OutputBuffer {
    pub fn new(sink: OutputSink) -> Self {
        OutputBuffer {
            pending: String::new(),
            sink,
        }
    }

    pub fn stdout() -> Self {
        Self::new(OutputSink::Stdout)
    }

    pub fn capture() -> Self {
        Self::new(OutputSink::Capture(Vec::new()))
    }

    /// Flushes pending text plus `text` as one terminated line and clears the
    /// pending tail, whether or not `text` itself contains line breaks.
    pub fn println(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.sink, "{}{}", self.pending, text)?;
        self.pending.clear();
        Ok(())
    }

    /// Splits `text` on `'\n'`: every complete segment flushes as a line, with
    /// the pending tail prepended to the first only; the trailing segment
    /// (possibly empty) becomes the new pending tail.
    pub fn puts(&mut self, text: &str) -> io::Result<()> {
        let Some((complete, tail)) = text.rsplit_once('\n') else {
            self.pending.push_str(text);
            return Ok(());
        };
        for (i, segment) in complete.split('\n').enumerate() {
            if i == 0 {
                writeln!(self.sink, "{}{}", self.pending, segment)?;
            } else {
                writeln!(self.sink, "{segment}")?;
            }
        }
        self.pending.clear();
        self.pending.push_str(tail);
        Ok(())
    }

    pub fn pending(&self) -> &str {
        &self.pending
    }

    pub fn captured(&self) -> &[u8] {
        match &self.sink {
            OutputSink::Stdout => &[],
            OutputSink::Capture(bytes) => bytes,
        }
    }

    /// Consumes the buffer. Pending text that never saw a newline is dropped,
    /// matching the source harness.
    pub fn into_captured(self) -> Vec<u8> {
        match self.sink {
            OutputSink::Stdout => Vec::new(),
            OutputSink::Capture(bytes) => bytes,
        }
    }
}

/// Binds exit/timesys/println/puts into `linker` under [`RUNTIME_NAMESPACE`].
pub fn add_runtime_imports(linker: &mut Linker<HostState>) -> Result<()> {
    linker.func_wrap(
        RUNTIME_NAMESPACE,
        "exit",
        |_caller: Caller<'_, HostState>, code: u32| -> Result<()> {
            Err(anyhow::Error::new(ExitSignal(code)))
        },
    )?;

    linker.func_wrap(
        RUNTIME_NAMESPACE,
        "timesys",
        |mut caller: Caller<'_, HostState>, ptr: u64| -> Result<u64> {
            let now = unix_time_seconds();
            if ptr != 0 {
                let memory = guest_memory(&mut caller)?;
                write_bytes(memory.data_mut(&mut caller), ptr, &encode_u64(now))?;
            }
            Ok(now)
        },
    )?;

    linker.func_wrap(
        RUNTIME_NAMESPACE,
        "println",
        |mut caller: Caller<'_, HostState>, length: u64, offset: u64| -> Result<()> {
            let memory = guest_memory(&mut caller)?;
            let (data, state) = memory.data_and_store_mut(&mut caller);
            let text = String::from_utf8_lossy(read_bytes(data, offset, length)?);
            state.output.println(&text).context("write guest output")
        },
    )?;

    linker.func_wrap(
        RUNTIME_NAMESPACE,
        "puts",
        |mut caller: Caller<'_, HostState>, length: u64, offset: u64| -> Result<()> {
            let memory = guest_memory(&mut caller)?;
            let (data, state) = memory.data_and_store_mut(&mut caller);
            let text = String::from_utf8_lossy(read_bytes(data, offset, length)?);
            state.output.puts(&text).context("write guest output")
        },
    )?;

    Ok(())
}

fn guest_memory(caller: &mut Caller<'_, HostState>) -> Result<Memory> {
    match caller.get_export(MEMORY_EXPORT) {
        Some(Extern::Memory(memory)) => Ok(memory),
        _ => anyhow::bail!("guest exports no `{MEMORY_EXPORT}`"),
    }
}

// A clock before the epoch reads as zero.
fn unix_time_seconds() -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs(),
        Err(_) => 0,
    }
}
