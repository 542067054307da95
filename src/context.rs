//! Saved execution contexts and the register-level switch between them.
//!
//! The switch itself lives in `context.c` and is linked in by `build.rs`.

use crate::stack::Stack;

unsafe extern "C" {
    fn corus_context_switch(save_rsp: *mut usize, next_rsp: usize);
}

/// Entry point a fresh context "returns" into. Receives the value seeded
/// with [`Context::prepare`] in `rdi` and must never return.
pub type Entry = extern "C" fn(usize) -> !;

/// Callee-saved registers plus `rdi`, pushed by the switch routine.
const SAVED_REGISTERS: usize = 7;

#[derive(Debug, Default)]
pub struct Context {
    rsp: usize,
}

impl Context {
    /// Seed `stack` so that switching to it calls `entry(arg)` with a
    /// correctly aligned stack.
    ///
    /// # Safety
    ///
    /// The stack must not be in use by any other live context.
    pub unsafe fn prepare(&mut self, stack: &Stack, entry: Entry, arg: usize) {
        let top = stack.top() as *mut usize;

        // Fake return address of `entry`; leaves rsp at 8 mod 16 on entry.
        top.sub(1).write(0);
        top.sub(2).write(entry as usize);
        // rbp, rbx, r12, r13, r14, r15
        for slot in 3..SAVED_REGISTERS + 2 {
            top.sub(slot).write(0);
        }
        // rdi
        top.sub(SAVED_REGISTERS + 2).write(arg);

        self.rsp = top.sub(SAVED_REGISTERS + 2) as usize;
    }

    pub fn rsp(&self) -> usize {
        self.rsp
    }

    pub fn rsp_slot(&mut self) -> *mut usize {
        &mut self.rsp
    }
}

/// Save the running context into `save` and resume the one whose stack
/// pointer is `next`. Returns when something switches back to `save`.
///
/// # Safety
///
/// `next` must come from [`Context::prepare`] or from an earlier switch
/// away from a context that has not been resumed since.
pub unsafe fn switch(save: *mut usize, next: usize) {
    corus_context_switch(save, next);
}
