//! PlayStation CPU dynamic recompiler
//!
//! Recompiles MIPS R3000A code page by page into micro-op blocks (and, with
//! the `jit-dynasm` feature, x86_64 code) and runs it against 2MB of RAM,
//! the 1KB scratchpad and the BIOS ROM. Everything else on the bus is the
//! embedder's business: stores that miss RAM go to a `StoreHandler`.
//!
//! Builds natively and for WebAssembly; the `Emulator` type is the
//! JavaScript facade.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::OnceLock;

use wasm_bindgen::prelude::*;

pub mod bus;
pub mod cpu;
pub mod dynarec;
pub mod exe;
pub mod memory;
pub mod snapshot;

pub use bus::{handler_fn, GuestBus, IgnoreStores, StoreHandler};
pub use cpu::{CpuState, Exception};
pub use dynarec::{Dynarec, DynarecConfig, DynarecStats, ExecMode, NO_EVENT};
pub use memory::{Memory, Width};

/// Initialize panic hook for better error messages in browser console
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// Log to browser console
#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_namespace = console)]
    pub fn log(s: &str);

    #[wasm_bindgen(js_namespace = console)]
    pub fn error(s: &str);
}

#[cfg(not(target_arch = "wasm32"))]
pub fn log(s: &str) {
    println!("LOG: {}", s);
}

#[cfg(not(target_arch = "wasm32"))]
pub fn error(s: &str) {
    eprintln!("ERROR: {}", s);
}

/// Helper macro for console logging
#[macro_export]
macro_rules! console_log {
    ($($t:tt)*) => ($crate::log(&format!($($t)*)))
}

#[macro_export]
macro_rules! console_error {
    ($($t:tt)*) => ($crate::error(&format!($($t)*)))
}

/// True when `PSX_DYNAREC_DEBUG` is set (read once)
pub fn debug_enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED.get_or_init(|| std::env::var("PSX_DYNAREC_DEBUG").is_ok())
}

/// Recompiler tracing, enabled with `PSX_DYNAREC_DEBUG`
#[macro_export]
macro_rules! dynarec_debug {
    ($($t:tt)*) => {
        if $crate::debug_enabled() {
            $crate::log(&format!("[DYNAREC]: {}", format!($($t)*)));
        }
    };
}

/// Host-side failures. Guest faults are `cpu::Exception`s, never errors.
#[derive(Debug)]
pub enum DynarecError {
    /// Executable memory for native code could not be set up
    ExecutableMemory(String),
    /// Compaction could not free room for a new block
    CodeCacheExhausted { requested: usize, live: usize, capacity: usize },
    /// BIOS, EXE or memory image rejected
    InvalidImage(String),
    /// Snapshot could not be written or read
    Snapshot(String),
}

impl fmt::Display for DynarecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DynarecError::ExecutableMemory(msg) => write!(f, "executable memory: {}", msg),
            DynarecError::CodeCacheExhausted { requested, live, capacity } => write!(
                f,
                "code cache exhausted: {} ops requested, {} live of {}",
                requested, live, capacity
            ),
            DynarecError::InvalidImage(msg) => write!(f, "invalid image: {}", msg),
            DynarecError::Snapshot(msg) => write!(f, "snapshot: {}", msg),
        }
    }
}

impl std::error::Error for DynarecError {}

fn js_error(e: impl fmt::Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

/// Undo gzip or zstd compression, detected by magic number. Anything else is
/// returned as is.
pub fn decompress_image(data: &[u8]) -> Result<Vec<u8>, DynarecError> {
    use std::io::Read;

    if data.starts_with(&[0x1F, 0x8B]) {
        let mut decoder = flate2::read::GzDecoder::new(data);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| DynarecError::InvalidImage(format!("gzip: {}", e)))?;
        Ok(out)
    } else if data.starts_with(&[0x28, 0xB5, 0x2F, 0xFD]) {
        zstd::stream::decode_all(data).map_err(|e| DynarecError::InvalidImage(format!("zstd: {}", e)))
    } else {
        Ok(data.to_vec())
    }
}

/// Decompress a gzip or zstd image (raw data passes through)
#[wasm_bindgen]
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, JsValue> {
    decompress_image(data).map_err(js_error)
}

/// Forwards unmapped stores to a JavaScript function
/// `(value, addr, counter) => counter`
struct JsStoreHandler {
    callback: Rc<RefCell<Option<js_sys::Function>>>,
}

impl StoreHandler for JsStoreHandler {
    fn store(&mut self, _bus: &mut GuestBus<'_>, value: u32, addr: u32, _width: Width, counter: i32) -> i32 {
        let callback = self.callback.borrow();
        let Some(f) = callback.as_ref() else {
            return counter;
        };
        match f.call3(&JsValue::NULL, &JsValue::from(value), &JsValue::from(addr), &JsValue::from(counter)) {
            Ok(ret) => ret.as_f64().map_or(counter, |c| c as i32),
            Err(e) => {
                console_error!("store callback threw: {:?}", e);
                counter
            }
        }
    }
}

/// Recompiler interface exposed to JavaScript
#[wasm_bindgen]
pub struct Emulator {
    dynarec: Dynarec,
    callback: Rc<RefCell<Option<js_sys::Function>>>,
}

#[wasm_bindgen]
impl Emulator {
    /// Create a recompiler around a BIOS image (raw, gzip or zstd)
    #[wasm_bindgen(constructor)]
    pub fn new(bios: &[u8]) -> Result<Emulator, JsValue> {
        let bios = decompress_image(bios).map_err(js_error)?;
        console_log!("Creating PSX recompiler with {}KB BIOS", bios.len() / 1024);

        let memory = Memory::new(&bios).map_err(js_error)?;
        let callback = Rc::new(RefCell::new(None));
        let handler = JsStoreHandler { callback: callback.clone() };
        let dynarec = Dynarec::new(memory, handler, DynarecConfig::default()).map_err(js_error)?;

        Ok(Emulator { dynarec, callback })
    }

    /// Called for every store outside RAM and scratchpad
    pub fn set_store_callback(&mut self, callback: js_sys::Function) {
        *self.callback.borrow_mut() = Some(callback);
    }

    pub fn clear_store_callback(&mut self) {
        *self.callback.borrow_mut() = None;
    }

    /// Load a PS-X EXE and point the CPU at its entry
    pub fn load_exe(&mut self, data: &[u8]) -> Result<(), JsValue> {
        let data = decompress_image(data).map_err(js_error)?;
        exe::load(&mut self.dynarec, &data).map(|_| ()).map_err(js_error)
    }

    /// Run for `cycles` cycles; returns the overrun (negative if the next
    /// event came first).
    ///
    /// The event countdown set by `set_next_event` shrinks with every run
    /// and stays at zero once reached: later calls return `-cycles` without
    /// executing until `set_next_event` is called again. The initial
    /// `i32::MAX` means no event is scheduled and never counts down.
    pub fn run(&mut self, cycles: i32) -> Result<i32, JsValue> {
        self.dynarec.run(cycles).map_err(js_error)
    }

    pub fn set_pc(&mut self, pc: u32) {
        self.dynarec.set_pc(pc);
    }

    pub fn get_pc(&self) -> u32 {
        self.dynarec.state().pc
    }

    /// Cycles until the host's next event; `run` stops there
    pub fn set_next_event(&mut self, cycles: i32) {
        self.dynarec.set_next_event(cycles);
    }

    /// Cycles left before the next event
    pub fn get_next_event(&self) -> i32 {
        self.dynarec.state().next_event
    }

    /// Raise or drop the interrupt controller line
    pub fn set_irq(&mut self, active: bool) {
        self.dynarec.set_irq_line(active);
    }

    pub fn get_registers(&self) -> Vec<u32> {
        self.dynarec.state().registers().to_vec()
    }

    /// Full CPU state as a plain object
    pub fn get_cpu_state(&self) -> Result<JsValue, JsValue> {
        serde_wasm_bindgen::to_value(self.dynarec.state()).map_err(js_error)
    }

    pub fn get_stats(&self) -> Result<JsValue, JsValue> {
        serde_wasm_bindgen::to_value(&self.dynarec.stats()).map_err(js_error)
    }

    pub fn read_memory(&mut self, addr: u32, size: u32) -> Vec<u8> {
        self.dynarec.bus().read_bytes(addr, size as usize)
    }

    /// Returns the number of bytes written
    pub fn write_memory(&mut self, addr: u32, data: &[u8]) -> u32 {
        self.dynarec.bus().write_bytes(addr, data) as u32
    }

    /// Switch between the recompiler and the reference interpreter
    pub fn set_interpreter(&mut self, enable: bool) {
        self.dynarec.set_exec_mode(if enable { ExecMode::Interpreter } else { ExecMode::Recompiler });
    }

    pub fn reset(&mut self) {
        self.dynarec.reset();
    }

    /// CPU + RAM + scratchpad, bincode serialized and zstd compressed
    pub fn get_state(&self) -> Result<Vec<u8>, JsValue> {
        snapshot::Snapshot::capture(&self.dynarec).to_bytes().map_err(js_error)
    }

    pub fn set_state(&mut self, state: &[u8]) -> Result<(), JsValue> {
        let snapshot = snapshot::Snapshot::from_bytes(state).map_err(js_error)?;
        snapshot.restore(&mut self.dynarec).map_err(js_error)
    }
}
