//! Stack pool allocator for thread stacks.
//!
//! Stacks come in a few size classes. Released stacks are kept on a bounded
//! per-class free list and handed out again before fresh memory is requested
//! from the global allocator.

use portable_atomic::{AtomicUsize, Ordering};
use spin::Mutex;
use std::alloc::{alloc, dealloc, Layout};
use std::ptr::NonNull;

/// Value written at the lowest word of every stack. Finding it changed when
/// the stack is released means the thread overflowed.
pub const STACK_CANARY: u64 = 0xDEAD_BEEF_CAFE_BABE;

/// Stacks are page aligned.
const STACK_ALIGN: usize = 4096;

/// Released stacks kept per size class before memory goes back to the allocator.
const MAX_CACHED_PER_CLASS: usize = 16;

/// Stack size classes for the pool allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StackSizeClass {
    /// 16 KiB
    Small = 16 * 1024,
    /// 64 KiB
    Medium = 64 * 1024,
    /// 256 KiB
    Large = 256 * 1024,
    /// 1 MiB
    Huge = 1024 * 1024,
}

impl StackSizeClass {
    const ALL: [StackSizeClass; 4] = [
        StackSizeClass::Small,
        StackSizeClass::Medium,
        StackSizeClass::Large,
        StackSizeClass::Huge,
    ];

    /// Get the size in bytes for this stack class.
    pub fn size(self) -> usize {
        self as usize
    }

    /// Choose the smallest size class that fits `requested_size` bytes.
    ///
    /// # Returns
    ///
    /// `None` if the request exceeds the largest class.
    pub fn for_size(requested_size: usize) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|class| requested_size <= class.size())
    }

    fn index(self) -> usize {
        match self {
            StackSizeClass::Small => 0,
            StackSizeClass::Medium => 1,
            StackSizeClass::Large => 2,
            StackSizeClass::Huge => 3,
        }
    }
}

/// One thread stack.
///
/// Owned by exactly one thread control block; freed when dropped. Not `Clone`:
/// a stack has a single owner so it is released exactly once.
pub struct Stack {
    /// Lowest address of the stack memory.
    memory: NonNull<u8>,
    size_class: StackSizeClass,
}

impl Stack {
    fn allocate(size_class: StackSizeClass) -> Option<Self> {
        let layout = Layout::from_size_align(size_class.size(), STACK_ALIGN).ok()?;
        // SAFETY: the layout has a non-zero size.
        let memory = NonNull::new(unsafe { alloc(layout) })?;
        let stack = Stack { memory, size_class };
        stack.install_canary();
        Some(stack)
    }

    /// Usable stack size in bytes.
    pub fn size(&self) -> usize {
        self.size_class.size()
    }

    /// Size class this stack belongs to.
    pub fn size_class(&self) -> StackSizeClass {
        self.size_class
    }

    /// Initial stack pointer for a new context: the highest address, 16-byte
    /// aligned. Stacks grow down.
    pub fn initial_sp(&self) -> *mut u8 {
        let top = self.memory.as_ptr() as usize + self.size();
        (top & !0xF) as *mut u8
    }

    /// Lowest usable address (where the canary lives).
    pub fn limit(&self) -> *const u8 {
        self.memory.as_ptr()
    }

    fn install_canary(&self) {
        // SAFETY: the allocation is page aligned and at least one word long.
        unsafe { (self.memory.as_ptr() as *mut u64).write(STACK_CANARY) }
    }

    /// Whether the canary at the bottom of the stack is intact.
    pub fn check_canary(&self) -> bool {
        // SAFETY: see `install_canary`.
        unsafe { (self.memory.as_ptr() as *const u64).read() == STACK_CANARY }
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        if let Ok(layout) = Layout::from_size_align(self.size(), STACK_ALIGN) {
            // SAFETY: allocated in `Stack::allocate` with this same layout.
            unsafe { dealloc(self.memory.as_ptr(), layout) }
        }
    }
}

impl core::fmt::Debug for Stack {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Stack")
            .field("limit", &self.memory)
            .field("size_class", &self.size_class)
            .finish()
    }
}

// SAFETY: a Stack is a uniquely owned heap allocation.
unsafe impl Send for Stack {}

/// Snapshot of stack pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StackPoolStats {
    /// Stacks obtained from the global allocator.
    pub allocated: usize,
    /// Stacks handed out again from a free list.
    pub reused: usize,
    /// Stacks returned to the pool.
    pub released: usize,
    /// Stacks currently owned by threads.
    pub in_use: usize,
    /// Stacks whose canary was found overwritten on release.
    pub overflows: usize,
}

/// Pool-based allocator for thread stacks.
pub struct StackPool {
    free_stacks: [Mutex<Vec<Stack>>; 4],
    allocated: AtomicUsize,
    reused: AtomicUsize,
    released: AtomicUsize,
    in_use: AtomicUsize,
    overflows: AtomicUsize,
}

impl Default for StackPool {
    fn default() -> Self {
        Self::new()
    }
}

impl StackPool {
    /// Create an empty pool.
    pub const fn new() -> Self {
        Self {
            free_stacks: [
                Mutex::new(Vec::new()),
                Mutex::new(Vec::new()),
                Mutex::new(Vec::new()),
                Mutex::new(Vec::new()),
            ],
            allocated: AtomicUsize::new(0),
            reused: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
            in_use: AtomicUsize::new(0),
            overflows: AtomicUsize::new(0),
        }
    }

    /// Allocate a stack of the given size class.
    ///
    /// Reuses a released stack when one is cached.
    ///
    /// # Returns
    ///
    /// The stack, or `None` if the allocator is out of memory.
    pub fn allocate(&self, size_class: StackSizeClass) -> Option<Stack> {
        let cached = self.free_stacks[size_class.index()].lock().pop();
        let stack = match cached {
            Some(stack) => {
                stack.install_canary();
                self.reused.fetch_add(1, Ordering::Relaxed);
                stack
            }
            None => {
                let stack = Stack::allocate(size_class)?;
                self.allocated.fetch_add(1, Ordering::Relaxed);
                stack
            }
        };
        self.in_use.fetch_add(1, Ordering::Relaxed);
        Some(stack)
    }

    /// Return a stack to the pool.
    ///
    /// # Returns
    ///
    /// `false` if the stack's canary was overwritten. Such a stack is freed
    /// instead of cached.
    pub fn release(&self, stack: Stack) -> bool {
        self.in_use.fetch_sub(1, Ordering::Relaxed);
        self.released.fetch_add(1, Ordering::Relaxed);

        if !stack.check_canary() {
            self.overflows.fetch_add(1, Ordering::Relaxed);
            log::warn!(
                "stack canary overwritten at {:p} ({} KiB stack); thread overflowed its stack",
                stack.limit(),
                stack.size() / 1024
            );
            return false;
        }

        let mut free_list = self.free_stacks[stack.size_class.index()].lock();
        if free_list.len() < MAX_CACHED_PER_CLASS {
            free_list.push(stack);
        }
        true
    }

    /// Counters describing pool activity.
    pub fn stats(&self) -> StackPoolStats {
        StackPoolStats {
            allocated: self.allocated.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            in_use: self.in_use.load(Ordering::Relaxed),
            overflows: self.overflows.load(Ordering::Relaxed),
        }
    }

    /// Number of released stacks cached for reuse.
    pub fn cached(&self) -> usize {
        self.free_stacks.iter().map(|list| list.lock().len()).sum()
    }
}
