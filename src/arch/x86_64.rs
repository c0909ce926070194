//! x86-64 (System V and Darwin) execution contexts.

use super::{Arch, EntryFn};
use core::arch::global_asm;

/// x86-64 architecture marker.
pub struct X86_64Arch;

/// Callee-saved state of a suspended thread.
///
/// Field offsets are hard-coded in the switch routine below.
#[repr(C)]
#[derive(Debug, Default)]
pub struct X86_64Context {
    pub rsp: u64,
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub rbx: u64,
    pub rbp: u64,
    /// SSE control and status.
    pub mxcsr: u32,
    /// x87 control word.
    pub fpu_cw: u16,
    _pad: u16,
}

const DEFAULT_MXCSR: u32 = 0x1F80;
const DEFAULT_FPU_CW: u16 = 0x037F;

// Both the plain and underscore-prefixed labels are emitted so the symbols
// resolve under ELF and Mach-O naming alike.
global_asm!(
    ".text",
    ".p2align 4",
    ".globl uthreads_ctx_switch",
    ".globl _uthreads_ctx_switch",
    "uthreads_ctx_switch:",
    "_uthreads_ctx_switch:",
    // rdi = prev, rsi = next. Return address is on top of the stack.
    "mov [rdi + 0x00], rsp",
    "mov [rdi + 0x08], r15",
    "mov [rdi + 0x10], r14",
    "mov [rdi + 0x18], r13",
    "mov [rdi + 0x20], r12",
    "mov [rdi + 0x28], rbx",
    "mov [rdi + 0x30], rbp",
    "stmxcsr dword ptr [rdi + 0x38]",
    "fnstcw word ptr [rdi + 0x3c]",
    "mov rsp, [rsi + 0x00]",
    "mov r15, [rsi + 0x08]",
    "mov r14, [rsi + 0x10]",
    "mov r13, [rsi + 0x18]",
    "mov r12, [rsi + 0x20]",
    "mov rbx, [rsi + 0x28]",
    "mov rbp, [rsi + 0x30]",
    "ldmxcsr dword ptr [rsi + 0x38]",
    "fldcw word ptr [rsi + 0x3c]",
    "ret",
    "",
    ".p2align 4",
    ".globl uthreads_ctx_bootstrap",
    ".globl _uthreads_ctx_bootstrap",
    "uthreads_ctx_bootstrap:",
    "_uthreads_ctx_bootstrap:",
    // Entered by `ret` from the switch with rsp at the 16-byte aligned stack
    // top; the call leaves the callee with the ABI-required rsp % 16 == 8.
    "mov rdi, r12",
    "call r13",
    "ud2",
);

extern "C" {
    fn uthreads_ctx_switch(prev: *mut X86_64Context, next: *const X86_64Context);
    fn uthreads_ctx_bootstrap();
}

impl Arch for X86_64Arch {
    type SavedContext = X86_64Context;

    #[inline]
    unsafe fn context_switch(prev: *mut Self::SavedContext, next: *const Self::SavedContext) {
        // SAFETY: forwarded from the caller.
        unsafe { uthreads_ctx_switch(prev, next) }
    }

    unsafe fn init_context(
        ctx: &mut Self::SavedContext,
        stack_top: *mut u8,
        entry: EntryFn,
        arg: usize,
    ) {
        debug_assert_eq!(stack_top as usize % 16, 0);
        // SAFETY: the caller guarantees at least one writable word below
        // `stack_top`. The switch routine's `ret` pops it.
        let ret_slot = unsafe { (stack_top as *mut u64).sub(1) };
        unsafe { ret_slot.write(uthreads_ctx_bootstrap as *const () as usize as u64) };

        *ctx = X86_64Context {
            rsp: ret_slot as u64,
            r12: arg as u64,
            r13: entry as *const () as usize as u64,
            mxcsr: DEFAULT_MXCSR,
            fpu_cw: DEFAULT_FPU_CW,
            ..X86_64Context::default()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_layout() {
        let ctx = X86_64Context::default();
        let base = &ctx as *const X86_64Context as usize;
        assert_eq!(core::mem::size_of::<X86_64Context>(), 0x40);
        assert_eq!(&ctx.rbp as *const u64 as usize - base, 0x30);
        assert_eq!(&ctx.mxcsr as *const u32 as usize - base, 0x38);
        assert_eq!(&ctx.fpu_cw as *const u16 as usize - base, 0x3c);
    }
}
