//! Dynasm-rs native backend for x86_64
//!
//! Compiles straight runs of ALU micro-ops to x86_64. Only available on
//! native builds with the `jit-dynasm` feature; elsewhere `NativeBackend`
//! cannot be constructed and every run stays on the portable ops.

/// Size of the executable arena
pub const NATIVE_ARENA_BYTES: usize = 16 * 1024 * 1024;

/// The executable arena has no room for another segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaFull;

#[cfg(all(not(target_arch = "wasm32"), feature = "jit-dynasm", target_arch = "x86_64"))]
mod backend {
    use dynasm::dynasm;
    use dynasmrt::{x64::X64Relocation, DynasmApi, VecAssembler};
    use std::mem;

    use super::ArenaFull;
    use crate::dynarec::ir::{Op, Reg};
    use crate::DynarecError;

    type Asm = VecAssembler<X64Relocation>;

    /// Anonymous mapping, read+execute except while code is copied in
    struct ExecArena {
        base: *mut u8,
        len: usize,
        used: usize,
        /// mprotect failed once; stop emitting
        broken: bool,
    }

    impl ExecArena {
        fn new(len: usize) -> Result<Self, DynarecError> {
            let base = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    len,
                    libc::PROT_READ | libc::PROT_EXEC,
                    libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                    -1,
                    0,
                )
            };
            if base == libc::MAP_FAILED {
                return Err(DynarecError::ExecutableMemory(format!(
                    "mmap of {} bytes failed: {}",
                    len,
                    std::io::Error::last_os_error()
                )));
            }
            Ok(ExecArena { base: base as *mut u8, len, used: 0, broken: false })
        }

        fn protect(&self, prot: libc::c_int) -> bool {
            unsafe { libc::mprotect(self.base as *mut libc::c_void, self.len, prot) == 0 }
        }

        /// Copy `code` in and return its offset. `Ok(None)` when the arena
        /// can no longer be made writable.
        fn push(&mut self, code: &[u8]) -> Result<Option<usize>, ArenaFull> {
            if self.broken {
                return Ok(None);
            }
            // Keep segment entry points 16-byte aligned
            let start = (self.used + 15) & !15;
            if start + code.len() > self.len {
                return Err(ArenaFull);
            }

            if !self.protect(libc::PROT_READ | libc::PROT_WRITE) {
                crate::console_error!("[DYNAREC]: mprotect(RW) failed: {}", std::io::Error::last_os_error());
                self.broken = true;
                return Ok(None);
            }
            unsafe {
                std::ptr::copy_nonoverlapping(code.as_ptr(), self.base.add(start), code.len());
            }
            if !self.protect(libc::PROT_READ | libc::PROT_EXEC) {
                crate::console_error!("[DYNAREC]: mprotect(RX) failed: {}", std::io::Error::last_os_error());
                self.broken = true;
                return Ok(None);
            }

            self.used = start + code.len();
            Ok(Some(start))
        }
    }

    impl Drop for ExecArena {
        fn drop(&mut self) {
            unsafe {
                libc::munmap(self.base as *mut libc::c_void, self.len);
            }
        }
    }

    /// Compiled segments live in one arena and are addressed by index
    pub struct NativeBackend {
        arena: ExecArena,
        segments: Vec<usize>,
        runs: u64,
    }

    impl NativeBackend {
        pub fn new(arena_bytes: usize) -> Result<Self, DynarecError> {
            Ok(NativeBackend { arena: ExecArena::new(arena_bytes)?, segments: Vec::new(), runs: 0 })
        }

        /// Compile `ops` into one segment. `Ok(None)` if some op has no
        /// native form; `Err(ArenaFull)` means the caller must flush.
        pub fn compile(&mut self, ops: &[Op]) -> Result<Option<u32>, ArenaFull> {
            let mut asm: Asm = VecAssembler::new(0);
            for op in ops {
                if !emit_op(&mut asm, op) {
                    return Ok(None);
                }
            }
            dynasm!(asm
                ; .arch x64
                ; ret
            );

            let code = match asm.finalize() {
                Ok(code) => code,
                Err(_) => return Ok(None),
            };
            match self.arena.push(&code)? {
                Some(offset) => {
                    self.segments.push(offset);
                    Ok(Some((self.segments.len() - 1) as u32))
                }
                None => Ok(None),
            }
        }

        /// Run segment `seg` over r1-r31
        #[inline(always)]
        pub fn call(&mut self, seg: u32, regs: &mut [u32; 31]) {
            let offset = self.segments[seg as usize];
            // x86_64 SysV: RDI = pointer to r1, RAX/RCX = scratch
            let func: unsafe extern "sysv64" fn(*mut u32) = unsafe { mem::transmute(self.arena.base.add(offset)) };
            unsafe { func(regs.as_mut_ptr()) };
            self.runs += 1;
        }

        /// Forget every segment. Only valid once no `Native` op refers to them.
        pub fn reset(&mut self) {
            self.arena.used = 0;
            self.segments.clear();
        }

        pub fn runs(&self) -> u64 {
            self.runs
        }
    }

    #[inline(always)]
    fn reg_off(r: Reg) -> i32 {
        (r as i32 - 1) * 4
    }

    fn load_eax(asm: &mut Asm, r: Reg) {
        if r == 0 {
            dynasm!(asm ; .arch x64 ; xor eax, eax);
        } else {
            let off = reg_off(r);
            dynasm!(asm ; .arch x64 ; mov eax, [rdi + off]);
        }
    }

    fn load_ecx(asm: &mut Asm, r: Reg) {
        if r == 0 {
            dynasm!(asm ; .arch x64 ; xor ecx, ecx);
        } else {
            let off = reg_off(r);
            dynasm!(asm ; .arch x64 ; mov ecx, [rdi + off]);
        }
    }

    fn store_eax(asm: &mut Asm, r: Reg) {
        if r != 0 {
            let off = reg_off(r);
            dynasm!(asm ; .arch x64 ; mov [rdi + off], eax);
        }
    }

    /// Emit one op. Returns false for ops with no native form.
    fn emit_op(asm: &mut Asm, op: &Op) -> bool {
        match *op {
            Op::Nop => {}

            Op::Sll { rd, rt, sa } => {
                load_eax(asm, rt);
                dynasm!(asm ; .arch x64 ; shl eax, sa as i8);
                store_eax(asm, rd);
            }
            Op::Srl { rd, rt, sa } => {
                load_eax(asm, rt);
                dynasm!(asm ; .arch x64 ; shr eax, sa as i8);
                store_eax(asm, rd);
            }
            Op::Sra { rd, rt, sa } => {
                load_eax(asm, rt);
                dynasm!(asm ; .arch x64 ; sar eax, sa as i8);
                store_eax(asm, rd);
            }
            // x86 masks variable shift counts to 5 bits, same as MIPS
            Op::Sllv { rd, rt, rs } => {
                load_eax(asm, rt);
                load_ecx(asm, rs);
                dynasm!(asm ; .arch x64 ; shl eax, cl);
                store_eax(asm, rd);
            }
            Op::Srlv { rd, rt, rs } => {
                load_eax(asm, rt);
                load_ecx(asm, rs);
                dynasm!(asm ; .arch x64 ; shr eax, cl);
                store_eax(asm, rd);
            }
            Op::Srav { rd, rt, rs } => {
                load_eax(asm, rt);
                load_ecx(asm, rs);
                dynasm!(asm ; .arch x64 ; sar eax, cl);
                store_eax(asm, rd);
            }

            Op::Addu { rd, rs, rt } => {
                load_eax(asm, rs);
                load_ecx(asm, rt);
                dynasm!(asm ; .arch x64 ; add eax, ecx);
                store_eax(asm, rd);
            }
            Op::Subu { rd, rs, rt } => {
                load_eax(asm, rs);
                load_ecx(asm, rt);
                dynasm!(asm ; .arch x64 ; sub eax, ecx);
                store_eax(asm, rd);
            }
            Op::And { rd, rs, rt } => {
                load_eax(asm, rs);
                load_ecx(asm, rt);
                dynasm!(asm ; .arch x64 ; and eax, ecx);
                store_eax(asm, rd);
            }
            Op::Or { rd, rs, rt } => {
                load_eax(asm, rs);
                load_ecx(asm, rt);
                dynasm!(asm ; .arch x64 ; or eax, ecx);
                store_eax(asm, rd);
            }
            Op::Xor { rd, rs, rt } => {
                load_eax(asm, rs);
                load_ecx(asm, rt);
                dynasm!(asm ; .arch x64 ; xor eax, ecx);
                store_eax(asm, rd);
            }
            Op::Nor { rd, rs, rt } => {
                load_eax(asm, rs);
                load_ecx(asm, rt);
                dynasm!(asm
                    ; .arch x64
                    ; or eax, ecx
                    ; not eax
                );
                store_eax(asm, rd);
            }
            Op::Slt { rd, rs, rt } => {
                load_eax(asm, rs);
                load_ecx(asm, rt);
                dynasm!(asm
                    ; .arch x64
                    ; cmp eax, ecx
                    ; setl al
                    ; movzx eax, al
                );
                store_eax(asm, rd);
            }
            Op::Sltu { rd, rs, rt } => {
                load_eax(asm, rs);
                load_ecx(asm, rt);
                dynasm!(asm
                    ; .arch x64
                    ; cmp eax, ecx
                    ; setb al
                    ; movzx eax, al
                );
                store_eax(asm, rd);
            }

            Op::Addiu { rt, rs, imm } => {
                let imm = imm as i32;
                load_eax(asm, rs);
                dynasm!(asm ; .arch x64 ; add eax, imm);
                store_eax(asm, rt);
            }
            Op::Slti { rt, rs, imm } => {
                let imm = imm as i32;
                load_eax(asm, rs);
                dynasm!(asm
                    ; .arch x64
                    ; cmp eax, imm
                    ; setl al
                    ; movzx eax, al
                );
                store_eax(asm, rt);
            }
            Op::Sltiu { rt, rs, imm } => {
                let imm = imm as i32;
                load_eax(asm, rs);
                dynasm!(asm
                    ; .arch x64
                    ; cmp eax, imm
                    ; setb al
                    ; movzx eax, al
                );
                store_eax(asm, rt);
            }
            Op::Andi { rt, rs, imm } => {
                let imm = imm as i32;
                load_eax(asm, rs);
                dynasm!(asm ; .arch x64 ; and eax, imm);
                store_eax(asm, rt);
            }
            Op::Ori { rt, rs, imm } => {
                let imm = imm as i32;
                load_eax(asm, rs);
                dynasm!(asm ; .arch x64 ; or eax, imm);
                store_eax(asm, rt);
            }
            Op::Xori { rt, rs, imm } => {
                let imm = imm as i32;
                load_eax(asm, rs);
                dynasm!(asm ; .arch x64 ; xor eax, imm);
                store_eax(asm, rt);
            }
            Op::Lui { rt, imm } => {
                if rt != 0 {
                    let off = reg_off(rt);
                    let imm = imm as i32;
                    dynasm!(asm ; .arch x64 ; mov DWORD [rdi + off], imm);
                }
            }

            _ => return false,
        }
        true
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn run(ops: &[Op], regs: &mut [u32; 31]) {
            let mut backend = NativeBackend::new(4096).unwrap();
            let seg = backend.compile(ops).unwrap().unwrap();
            backend.call(seg, regs);
            assert_eq!(backend.runs(), 1);
        }

        #[test]
        fn test_native_alu_run() {
            let mut regs = [0u32; 31];
            run(
                &[
                    Op::Lui { rt: 1, imm: 0x8000_0000 },
                    Op::Ori { rt: 1, rs: 1, imm: 0x10 },
                    Op::Addiu { rt: 2, rs: 0, imm: 0xFFFF_FFFF },
                    Op::Sltu { rd: 3, rs: 1, rt: 2 },
                    Op::Slt { rd: 4, rs: 1, rt: 2 },
                    Op::Sra { rd: 5, rt: 1, sa: 4 },
                    Op::Nor { rd: 6, rs: 0, rt: 0 },
                ],
                &mut regs,
            );
            assert_eq!(regs[0], 0x8000_0010);
            assert_eq!(regs[1], 0xFFFF_FFFF);
            assert_eq!(regs[2], 1);
            assert_eq!(regs[3], 1);
            assert_eq!(regs[4], 0xF800_0001);
            assert_eq!(regs[5], 0xFFFF_FFFF);
        }

        #[test]
        fn test_unsupported_op_is_rejected() {
            let mut backend = NativeBackend::new(4096).unwrap();
            let ops = [Op::Nop, Op::Add { rd: 1, rs: 2, rt: 3, pc: 0 }];
            assert_eq!(backend.compile(&ops), Ok(None));
        }

        #[test]
        fn test_arena_fills_up() {
            let mut backend = NativeBackend::new(64).unwrap();
            let ops = [Op::Addiu { rt: 1, rs: 1, imm: 1 }; 2];
            let mut result = Ok(None);
            for _ in 0..8 {
                result = backend.compile(&ops);
                if result.is_err() {
                    break;
                }
            }
            assert_eq!(result, Err(ArenaFull));
            backend.reset();
            assert!(backend.compile(&ops).unwrap().is_some());
        }
    }
}

#[cfg(all(not(target_arch = "wasm32"), feature = "jit-dynasm", target_arch = "x86_64"))]
pub use backend::*;

// Stub for when dynasm is not enabled
#[cfg(not(all(not(target_arch = "wasm32"), feature = "jit-dynasm", target_arch = "x86_64")))]
mod backend {
    use super::ArenaFull;
    use crate::dynarec::ir::Op;
    use crate::DynarecError;

    /// Uninhabited: there is no native backend in this build
    pub enum NativeBackend {}

    impl NativeBackend {
        pub fn new(_arena_bytes: usize) -> Result<Self, DynarecError> {
            Err(DynarecError::ExecutableMemory(
                "native backend not built (needs the jit-dynasm feature on x86_64)".to_string(),
            ))
        }

        pub fn compile(&mut self, _ops: &[Op]) -> Result<Option<u32>, ArenaFull> {
            match *self {}
        }

        pub fn call(&mut self, _seg: u32, _regs: &mut [u32; 31]) {
            match *self {}
        }

        pub fn reset(&mut self) {
            match *self {}
        }

        pub fn runs(&self) -> u64 {
            match *self {}
        }
    }
}

#[cfg(not(all(not(target_arch = "wasm32"), feature = "jit-dynasm", target_arch = "x86_64")))]
pub use backend::*;

/// True when this build can compile native code
pub const NATIVE_AVAILABLE: bool = cfg!(all(not(target_arch = "wasm32"), feature = "jit-dynasm", target_arch = "x86_64"));
