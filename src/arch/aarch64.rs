//! AArch64 (AAPCS64) execution contexts.

use super::{Arch, EntryFn};
use core::arch::global_asm;

/// AArch64 architecture marker.
pub struct Aarch64Arch;

/// Callee-saved state of a suspended thread.
///
/// `x` holds x19 through x30 (x29 frame pointer, x30 link register). Only
/// the low 64 bits of v8-v15 are callee-saved, so `d` holds d8 through d15.
#[repr(C)]
#[derive(Debug, Default)]
pub struct Aarch64Context {
    pub x: [u64; 12],
    pub sp: u64,
    pub d: [u64; 8],
}

global_asm!(
    ".text",
    ".p2align 4",
    ".globl uthreads_ctx_switch",
    ".globl _uthreads_ctx_switch",
    "uthreads_ctx_switch:",
    "_uthreads_ctx_switch:",
    // x0 = prev, x1 = next
    "stp x19, x20, [x0, #0]",
    "stp x21, x22, [x0, #16]",
    "stp x23, x24, [x0, #32]",
    "stp x25, x26, [x0, #48]",
    "stp x27, x28, [x0, #64]",
    "stp x29, x30, [x0, #80]",
    "mov x9, sp",
    "str x9, [x0, #96]",
    "stp d8, d9, [x0, #104]",
    "stp d10, d11, [x0, #120]",
    "stp d12, d13, [x0, #136]",
    "stp d14, d15, [x0, #152]",
    "ldp x19, x20, [x1, #0]",
    "ldp x21, x22, [x1, #16]",
    "ldp x23, x24, [x1, #32]",
    "ldp x25, x26, [x1, #48]",
    "ldp x27, x28, [x1, #64]",
    "ldp x29, x30, [x1, #80]",
    "ldr x9, [x1, #96]",
    "mov sp, x9",
    "ldp d8, d9, [x1, #104]",
    "ldp d10, d11, [x1, #120]",
    "ldp d12, d13, [x1, #136]",
    "ldp d14, d15, [x1, #152]",
    "ret",
    "",
    ".p2align 4",
    ".globl uthreads_ctx_bootstrap",
    ".globl _uthreads_ctx_bootstrap",
    "uthreads_ctx_bootstrap:",
    "_uthreads_ctx_bootstrap:",
    "mov x0, x19",
    "blr x20",
    "brk #0",
);

extern "C" {
    fn uthreads_ctx_switch(prev: *mut Aarch64Context, next: *const Aarch64Context);
    fn uthreads_ctx_bootstrap();
}

impl Arch for Aarch64Arch {
    type SavedContext = Aarch64Context;

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
        let mut x = [0u64; 12];
        x[0] = arg as u64; // x19
        x[1] = entry as *const () as usize as u64; // x20
        x[11] = uthreads_ctx_bootstrap as *const () as usize as u64; // x30
        *ctx = Aarch64Context {
            x,
            sp: stack_top as u64,
            d: [0; 8],
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_layout() {
        let ctx = Aarch64Context::default();
        let base = &ctx as *const Aarch64Context as usize;
        assert_eq!(core::mem::size_of::<Aarch64Context>(), 168);
        assert_eq!(&ctx.sp as *const u64 as usize - base, 96);
        assert_eq!(&ctx.d as *const [u64; 8] as usize - base, 104);
    }
}
