//! Dynamic recompiler
//!
//! Guest code is translated one 512-byte page at a time into micro-op
//! blocks held in the code cache. `run` dispatches on the PC, translates
//! pages that are not valid and executes blocks until the cycle budget is
//! spent.
//!
//! Lifecycle: `Dynarec::new` allocates everything (including executable
//! memory for the native backend), dropping the value releases it. `run`
//! borrows the whole recompiler mutably, so nothing can reconfigure it while
//! guest code executes.

pub mod code_cache;
pub mod execute;
pub mod ir;
pub mod native;
pub mod page_table;
pub mod translate;

use serde::Serialize;

use crate::bus::{GuestBus, Machine, StoreHandler};
use crate::cpu::{interpreter, CpuState};
use crate::memory::{resolve, Memory, Route};
use crate::memory::router::{PageIndex, PAGE_SIZE};
use crate::DynarecError;
use code_cache::{CodeCache, DEFAULT_CODE_CACHE_OPS};
use execute::BlockExit;
use ir::{BlockRef, TranslatedBlock};
use native::{ArenaFull, NativeBackend, NATIVE_ARENA_BYTES, NATIVE_AVAILABLE};
use page_table::PageTable;

/// `next_event` value meaning nothing is scheduled
pub const NO_EVENT: i32 = i32::MAX;

/// How guest code is executed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ExecMode {
    /// Translate pages and run blocks
    Recompiler,
    /// Step every instruction through the reference interpreter
    Interpreter,
}

/// Recompiler configuration
#[derive(Clone, Debug)]
pub struct DynarecConfig {
    /// Code cache capacity in micro-ops
    pub code_cache_ops: usize,
    pub exec_mode: ExecMode,
    /// Compile ALU runs to host code (needs the `jit-dynasm` feature)
    pub native: bool,
    /// Executable memory reserved for native segments
    pub native_arena_bytes: usize,
}

impl Default for DynarecConfig {
    fn default() -> Self {
        DynarecConfig {
            code_cache_ops: DEFAULT_CODE_CACHE_OPS,
            exec_mode: ExecMode::Recompiler,
            native: NATIVE_AVAILABLE,
            native_arena_bytes: NATIVE_ARENA_BYTES,
        }
    }
}

impl DynarecConfig {
    /// Defaults overridden by the environment:
    /// `PSX_DYNAREC_INTERP` (any value) selects the interpreter,
    /// `PSX_DYNAREC_CACHE_OPS=<n>` sets the cache size,
    /// `PSX_DYNAREC_NATIVE=0|1` toggles the native backend.
    pub fn from_env() -> Self {
        let mut config = DynarecConfig::default();
        if std::env::var("PSX_DYNAREC_INTERP").is_ok() {
            config.exec_mode = ExecMode::Interpreter;
        }
        if let Ok(ops) = std::env::var("PSX_DYNAREC_CACHE_OPS") {
            match ops.parse::<usize>() {
                Ok(n) if n > 0 => config.code_cache_ops = n,
                _ => crate::console_error!("[DYNAREC]: ignoring PSX_DYNAREC_CACHE_OPS={}", ops),
            }
        }
        if let Ok(native) = std::env::var("PSX_DYNAREC_NATIVE") {
            config.native = native != "0";
        }
        config
    }
}

/// Counters since creation
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DynarecStats {
    /// Pages translated
    pub translations: u64,
    /// Translations dropped because their page was written
    pub invalidations: u64,
    /// Code cache compactions
    pub compactions: u64,
    /// Full flushes (native arena exhausted or explicit)
    pub flushes: u64,
    /// Blocks run by the executor
    pub blocks_executed: u64,
    /// Instructions run by the interpreter
    pub interpreter_steps: u64,
    /// Native segments executed
    pub native_runs: u64,
    /// Ops currently in the code cache
    pub cache_used: usize,
    /// Pages currently valid
    pub valid_pages: usize,
}

pub struct Dynarec {
    state: CpuState,
    memory: Memory,
    pages: PageTable,
    cache: CodeCache,
    handler: Box<dyn StoreHandler>,
    config: DynarecConfig,
    native: Option<NativeBackend>,
    flushes: u64,
    blocks_executed: u64,
    interpreter_steps: u64,
}

impl Dynarec {
    /// Take ownership of guest memory and the store handler.
    ///
    /// Fails if the native backend was requested and executable memory
    /// cannot be obtained.
    pub fn new<H: StoreHandler + 'static>(
        memory: Memory,
        handler: H,
        config: DynarecConfig,
    ) -> Result<Self, DynarecError> {
        let native = if config.native {
            Some(NativeBackend::new(config.native_arena_bytes)?)
        } else {
            None
        };

        crate::dynarec_debug!(
            "init: cache {} ops, mode {:?}, native {}",
            config.code_cache_ops,
            config.exec_mode,
            native.is_some()
        );

        Ok(Dynarec {
            state: CpuState::new(),
            memory,
            pages: PageTable::new(),
            cache: CodeCache::new(config.code_cache_ops),
            handler: Box::new(handler),
            config,
            native,
            flushes: 0,
            blocks_executed: 0,
            interpreter_steps: 0,
        })
    }

    /// Set the PC. A pending out-of-page delay slot and a load still in
    /// flight are discarded.
    pub fn set_pc(&mut self, pc: u32) {
        self.state.pc = pc;
        self.state.pending_branch = None;
        self.state.load_delay = None;
    }

    /// Cycles until the next scheduled event
    pub fn set_next_event(&mut self, cycles: i32) {
        self.state.next_event = cycles;
    }

    /// Drive the external interrupt line (CAUSE.IP2). The interrupt is taken
    /// at the next block or instruction boundary once SR enables it.
    pub fn set_irq_line(&mut self, active: bool) {
        self.state.cop0.set_irq_line(active);
    }

    /// Run for up to `cycles_to_run` cycles, or until the next event if that
    /// comes first.
    ///
    /// Returns cycles elapsed minus `cycles_to_run`: zero or a small overrun
    /// when the budget ran out, negative when the event cut the run short.
    /// Blocks always run to completion, so the overrun is bounded by one
    /// block.
    ///
    /// A scheduled event countdown is consumed by each run and never
    /// re-armed here. Once it reaches zero every call returns
    /// `-cycles_to_run` without executing anything until `set_next_event`
    /// schedules the next event. `NO_EVENT` (the initial value) never
    /// counts down.
    pub fn run(&mut self, cycles_to_run: i32) -> Result<i32, DynarecError> {
        let budget = cycles_to_run.min(self.state.next_event);
        self.state.counter = budget;

        while self.state.counter > 0 {
            if self.state.cop0.interrupt_pending() {
                self.take_interrupt();
            }
            if self.config.exec_mode == ExecMode::Interpreter || self.state.pending_branch.is_some() {
                self.step_interpreter();
                continue;
            }
            self.dispatch()?;
        }

        let elapsed = budget as i64 - self.state.counter as i64;
        if self.state.next_event != NO_EVENT {
            self.state.next_event = clamp_i32(self.state.next_event as i64 - elapsed);
        }
        Ok(clamp_i32(elapsed - cycles_to_run as i64))
    }

    /// Translate if needed and run one block at the current PC
    fn dispatch(&mut self) -> Result<(), DynarecError> {
        let pc = self.state.pc;
        let (page, slot) = match resolve(pc) {
            Route::Mapped(r) if pc & 3 == 0 => match r.page {
                Some(page) => (page, r.slot()),
                None => {
                    self.step_interpreter();
                    return Ok(());
                }
            },
            // Misaligned or unmapped: the interpreter raises the fault
            _ => {
                self.step_interpreter();
                return Ok(());
            }
        };

        let base = pc & !(PAGE_SIZE - 1);
        let (code, entry) = match self.pages.block(page) {
            Some(block) if block.base == base => (block.code, block.entries[slot] as usize),
            _ => self.translate_page(page, base, slot)?,
        };

        let mut m = Machine {
            state: &mut self.state,
            memory: &mut self.memory,
            pages: &mut self.pages,
            handler: self.handler.as_mut(),
        };
        let exit = execute::run_block(&mut m, self.cache.code(code), entry, page, self.native.as_mut());
        self.blocks_executed += 1;
        if exit != BlockExit::Done {
            crate::dynarec_debug!("block {:#010x} left early: {:?}", pc, exit);
        }
        Ok(())
    }

    /// Translate `page` as mapped at `base` and install it. Returns the code
    /// and the entry offset of `slot`.
    fn translate_page(&mut self, page: PageIndex, base: u32, slot: usize) -> Result<(BlockRef, usize), DynarecError> {
        let translation = match translate::translate(&self.memory, page, base, self.native.as_mut()) {
            Ok(t) => t,
            Err(ArenaFull) => {
                crate::dynarec_debug!("native arena full, flushing");
                self.flush();
                match translate::translate(&self.memory, page, base, self.native.as_mut()) {
                    Ok(t) => t,
                    Err(ArenaFull) => {
                        return Err(DynarecError::ExecutableMemory(format!(
                            "native arena cannot hold page {:#010x}",
                            base
                        )))
                    }
                }
            }
        };

        let code = self.cache.alloc(&translation.ops, &mut self.pages)?;
        crate::dynarec_debug!(
            "translated page {} at {:#010x}: {} ops, {} native",
            page.index(),
            base,
            translation.ops.len(),
            translation.native_segments
        );
        let entry = translation.entries[slot] as usize;
        self.pages.mark_valid(page, TranslatedBlock { code, base, entries: translation.entries });
        Ok((code, entry))
    }

    /// Enter the interrupt handler in place of the instruction at PC
    fn take_interrupt(&mut self) {
        let pc = self.state.pc;
        let in_delay = self.state.pending_branch.is_some();
        let pending = self.state.load_delay.take();
        self.state.commit_load(pending, None);
        crate::dynarec_debug!("interrupt at {:#010x}", pc);
        self.state.raise(crate::cpu::Exception::Interrupt, pc, in_delay);
    }

    fn step_interpreter(&mut self) {
        let mut m = Machine {
            state: &mut self.state,
            memory: &mut self.memory,
            pages: &mut self.pages,
            handler: self.handler.as_mut(),
        };
        interpreter::step(&mut m);
        self.interpreter_steps += 1;
    }

    /// Drop every translation and native segment
    fn flush(&mut self) {
        self.pages.invalidate_all();
        self.cache.clear();
        if let Some(native) = self.native.as_mut() {
            native.reset();
        }
        self.flushes += 1;
    }

    pub fn state(&self) -> &CpuState {
        &self.state
    }

    /// Mutable CPU state, for loaders and debuggers
    pub fn state_mut(&mut self) -> &mut CpuState {
        &mut self.state
    }

    pub fn reg(&self, reg: u8) -> u32 {
        self.state.reg(reg)
    }

    pub fn set_reg(&mut self, reg: u8, value: u32) {
        self.state.set_reg(reg, value);
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Guest memory with invalidating writes
    pub fn bus(&mut self) -> GuestBus<'_> {
        GuestBus::new(&mut self.memory, &mut self.pages)
    }

    /// Retranslate everything on next use
    pub fn invalidate_all(&mut self) {
        self.flush();
    }

    pub fn exec_mode(&self) -> ExecMode {
        self.config.exec_mode
    }

    pub fn set_exec_mode(&mut self, mode: ExecMode) {
        self.config.exec_mode = mode;
    }

    pub fn config(&self) -> &DynarecConfig {
        &self.config
    }

    /// Whether native code is being generated
    pub fn native_enabled(&self) -> bool {
        self.native.is_some()
    }

    /// CPU reset: registers and COP0 back to power-on values, PC at the BIOS
    pub fn reset(&mut self) {
        self.state.reset();
    }

    /// Replace CPU state and RAM/scratchpad contents wholesale
    pub(crate) fn restore(&mut self, state: CpuState, ram: &[u8], scratchpad: &[u8]) {
        self.memory.ram_mut().copy_from_slice(ram);
        self.memory.scratchpad_mut().copy_from_slice(scratchpad);
        self.state = state;
        self.flush();
    }

    pub fn stats(&self) -> DynarecStats {
        DynarecStats {
            translations: self.pages.translations,
            invalidations: self.pages.invalidations,
            compactions: self.cache.compactions,
            flushes: self.flushes,
            blocks_executed: self.blocks_executed,
            interpreter_steps: self.interpreter_steps,
            native_runs: self.native.as_ref().map_or(0, |n| n.runs()),
            cache_used: self.cache.used(),
            valid_pages: self.pages.valid_pages(),
        }
    }
}

fn clamp_i32(v: i64) -> i32 {
    v.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}
