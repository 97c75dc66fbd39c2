//! Embeds compiled lorn guest modules and drives them to completion.
//!
//! The driver instantiates the module with the runtime imports bound, captures
//! its exported memory (and allocator, when present), and invokes the `main`
//! entry point synchronously. The run ends in one of three ways: the guest
//! called `exit`, the entry point returned, or execution faulted.

use anyhow::{anyhow, Context, Result};
use base64::Engine as _;
use serde::Serialize;
use wasmtime::{
    Config, Engine, Linker, Memory, Module, Store, StoreLimits, StoreLimitsBuilder, TypedFunc,
};

use lorn_guest_abi::{AbiError, EncodeContext, HostObject, ObjectTable, Value};

mod imports;

pub use imports::{add_runtime_imports, ExitSignal, OutputBuffer, OutputSink, RUNTIME_NAMESPACE};

pub const LORN_HOST_RUNNER_REPORT_SCHEMA_VERSION: &str = "lorn-host-runner.report@0.1.0";

/// Exports the driver consumes from the guest.
pub const MEMORY_EXPORT: &str = "memory";
pub const ENTRY_EXPORT: &str = "main";
pub const ALLOC_EXPORT: &str = "alloc";

const DEFAULT_MAX_MEMORY_BYTES: usize = 64 * 1024 * 1024;

/// Per-run host state, owned by the store. Nothing is process-global, so
/// concurrent runs in one process stay isolated.
pub struct HostState {
    pub output: OutputBuffer,
    pub objects: ObjectTable,
    pub limits: StoreLimits,
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub max_memory_bytes: usize,
    /// Capture guest output into the result instead of streaming to stdout.
    pub capture_output: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        RunnerConfig {
            max_memory_bytes: DEFAULT_MAX_MEMORY_BYTES,
            capture_output: true,
        }
    }
}

/// How a drive of the guest entry point ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The guest called `exit(code)`. Success, with `code` as the run status.
    Exited(u32),
    /// The entry point returned without calling `exit`.
    Completed,
    /// The guest trapped or an uncaught host-side error escaped the entry
    /// point. Fatal to the run; there is no recovery path.
    Faulted(String),
}

#[derive(Debug)]
pub struct RunnerResult {
    pub outcome: RunOutcome,
    /// Captured guest output; empty when streaming.
    pub stdout: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunnerReport {
    pub schema_version: &'static str,
    pub ok: bool,
    pub exit_status: u32,
    pub trap: Option<String>,
    pub stdout_b64: String,
}

impl RunnerReport {
    pub fn from_result(result: &RunnerResult) -> Self {
        let b64 = base64::engine::general_purpose::STANDARD;
        let (ok, exit_status, trap) = match &result.outcome {
            RunOutcome::Exited(code) => (*code == 0, *code, None),
            RunOutcome::Completed => (true, 0, None),
            RunOutcome::Faulted(reason) => (false, 1, Some(reason.clone())),
        };
        RunnerReport {
            schema_version: LORN_HOST_RUNNER_REPORT_SCHEMA_VERSION,
            ok,
            exit_status,
            trap,
            stdout_b64: b64.encode(&result.stdout),
        }
    }

    pub fn process_exit_code(&self) -> u8 {
        u8::try_from(self.exit_status).unwrap_or(u8::MAX)
    }
}

/// A live guest module: store, exported memory, entry point, and (optionally)
/// the allocator export needed to write values into guest memory.
pub struct GuestInstance {
    store: Store<HostState>,
    memory: Memory,
    entry: TypedFunc<(), ()>,
    alloc: Option<TypedFunc<u64, u64>>,
}

impl std::fmt::Debug for GuestInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestInstance")
            .field("memory", &self.memory)
            .field("has_alloc", &self.alloc.is_some())
            .finish_non_exhaustive()
    }
}

impl GuestInstance {
    /// Loads and instantiates `module_bytes` with the runtime imports bound.
    pub fn instantiate(config: &RunnerConfig, module_bytes: &[u8]) -> Result<Self> {
        let mut engine_config = Config::new();
        engine_config.wasm_memory64(true);
        let engine = Engine::new(&engine_config)?;
        let module = Module::new(&engine, module_bytes).context("load guest module")?;

        let mut linker: Linker<HostState> = Linker::new(&engine);
        add_runtime_imports(&mut linker)?;

        let output = if config.capture_output {
            OutputBuffer::capture()
        } else {
            OutputBuffer::stdout()
        };
        let mut store = Store::new(
            &engine,
            HostState {
                output,
                objects: ObjectTable::new(),
                limits: StoreLimitsBuilder::new()
                    .memory_size(config.max_memory_bytes)
                    .build(),
            },
        );
        store.limiter(|state| &mut state.limits);

        let instance = linker
            .instantiate(&mut store, &module)
            .context("instantiate guest module")?;
        let memory = instance
            .get_memory(&mut store, MEMORY_EXPORT)
            .with_context(|| format!("guest exports no `{MEMORY_EXPORT}`"))?;
        let entry = instance
            .get_typed_func::<(), ()>(&mut store, ENTRY_EXPORT)
            .with_context(|| format!("guest exports no `{ENTRY_EXPORT}` entry point"))?;
        let alloc = instance
            .get_typed_func::<u64, u64>(&mut store, ALLOC_EXPORT)
            .ok();

        Ok(GuestInstance {
            store,
            memory,
            entry,
            alloc,
        })
    }

    /// Drives the entry point to completion on the current thread.
    pub fn run_entry(&mut self) -> RunOutcome {
        match self.entry.call(&mut self.store, ()) {
            Ok(()) => RunOutcome::Completed,
            Err(err) => match err.downcast_ref::<ExitSignal>() {
                Some(signal) => RunOutcome::Exited(signal.code()),
                None => RunOutcome::Faulted(format!("{err:#}")),
            },
        }
    }

    /// Decodes the value record at `offset` in guest memory.
    pub fn decode_value(&self, offset: u64) -> Result<Value, AbiError> {
        lorn_guest_abi::decode_value(
            self.memory.data(&self.store),
            &self.store.data().objects,
            offset,
        )
    }

    /// Encodes `value` into guest memory through the guest's own allocator,
    /// returning the record pointer to hand across the boundary.
    pub fn encode_value(&mut self, value: &Value) -> Result<u64> {
        let alloc = self.alloc.clone().ok_or_else(|| {
            anyhow!("guest exports no `{ALLOC_EXPORT}`; cannot write values into guest memory")
        })?;
        let mut heap = GuestHeap {
            store: &mut self.store,
            memory: self.memory,
            alloc,
        };
        let record = lorn_guest_abi::encode_value(&mut heap, value)?;
        Ok(record)
    }

    pub fn memory_bytes(&self) -> &[u8] {
        self.memory.data(&self.store)
    }

    pub fn into_captured_output(self) -> Vec<u8> {
        self.store.into_data().output.into_captured()
    }
}

/// Adapts the live instance to the abi crate's encode seam.
struct GuestHeap<'a> {
    store: &'a mut Store<HostState>,
    memory: Memory,
    alloc: TypedFunc<u64, u64>,
}

impl EncodeContext for GuestHeap<'_> {
    fn alloc(&mut self, size: u64) -> Result<u64, AbiError> {
        self.alloc
            .call(&mut *self.store, size)
            .map_err(|_| AbiError::AllocationFailure(size))
    }

    fn write(&mut self, offset: u64, bytes: &[u8]) -> Result<(), AbiError> {
        lorn_guest_abi::write_bytes(self.memory.data_mut(&mut *self.store), offset, bytes)
    }

    fn register(&mut self, object: HostObject) -> u64 {
        self.store.data_mut().objects.register(object)
    }
}

/// Instantiates `module_bytes`, drives `main`, and packages the outcome with
/// any captured output.
pub fn run_module(config: &RunnerConfig, module_bytes: &[u8]) -> Result<RunnerResult> {
    let mut guest = GuestInstance::instantiate(config, module_bytes)?;
    let outcome = guest.run_entry();
    let stdout = guest.into_captured_output();
    Ok(RunnerResult { outcome, stdout })
}
