use std::{ffi::c_void, num::NonZeroUsize, ptr::NonNull, rc::Rc};

use nix::{
    errno::Errno,
    sys::mman::{mmap_anonymous, mprotect, munmap, MapFlags, ProtFlags},
};

use crate::error::{Error, Result};

pub const PAGE_SIZE: usize = 4096;
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;

/// Stacks carved out of one [`StackArena`] mapping.
pub const STACKS_PER_CHUNK: usize = 256;

/// One anonymous mapping, unmapped when the last stack in it is dropped.
#[derive(Debug)]
struct Region {
    base: NonNull<c_void>,
    len: usize,
}

impl Region {
    fn map(len: usize) -> Result<Self> {
        let length = NonZeroUsize::new(len).ok_or(Error::Stack(Errno::EINVAL))?;
        let base = unsafe {
            mmap_anonymous(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_PRIVATE
                    | MapFlags::MAP_ANONYMOUS
                    | MapFlags::MAP_STACK
                    | MapFlags::MAP_NORESERVE,
            )
        }
        .map_err(Error::Stack)?;
        Ok(Self { base, len })
    }

    fn addr(&self) -> usize {
        self.base.as_ptr() as usize
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        if let Err(err) = unsafe { munmap(self.base, self.len) } {
            tracing::warn!(%err, "failed to unmap coroutine stack");
        }
    }
}

/// A coroutine stack. Stacks from [`Stack::new`] own a mapping whose lowest
/// page is `PROT_NONE`, so an overflow faults. Stacks from a [`StackArena`]
/// share a mapping with their neighbours and have no guard.
#[derive(Debug)]
pub struct Stack {
    region: Rc<Region>,
    bottom: usize,
    size: usize,
    guarded: bool,
}

impl Stack {
    /// `size` is the usable size; it is rounded up to whole pages and the
    /// guard page comes on top of it. Costs two kernel memory regions.
    pub fn new(size: usize) -> Result<Self> {
        let size = Self::rounded(size);
        let len = size.checked_add(PAGE_SIZE).ok_or(Error::Stack(Errno::ENOMEM))?;
        let region = Region::map(len)?;
        unsafe { mprotect(region.base, PAGE_SIZE, ProtFlags::PROT_NONE) }.map_err(Error::Stack)?;

        Ok(Self {
            bottom: region.addr() + PAGE_SIZE,
            region: Rc::new(region),
            size,
            guarded: true,
        })
    }

    /// Usable size a request for `size` bytes ends up with.
    pub fn rounded(size: usize) -> usize {
        size.max(PAGE_SIZE).next_multiple_of(PAGE_SIZE)
    }

    /// Usable bytes, excluding any guard page.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_guarded(&self) -> bool {
        self.guarded
    }

    /// One past the highest usable address. Always 16-byte aligned.
    pub fn top(&self) -> usize {
        self.bottom + self.size
    }

    /// Lowest usable address.
    pub fn bottom(&self) -> usize {
        self.bottom
    }

    /// Whether both stacks were carved from the same mapping.
    pub fn shares_mapping_with(&self, other: &Stack) -> bool {
        Rc::ptr_eq(&self.region, &other.region)
    }
}

/// Hands out unguarded stacks [`STACKS_PER_CHUNK`] to a mapping, so the
/// number of kernel memory regions grows with chunks, not with stacks.
#[derive(Debug, Default)]
pub struct StackArena {
    chunk: Option<Rc<Region>>,
    size: usize,
    next: usize,
}

impl StackArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self, size: usize) -> Result<Stack> {
        let size = Stack::rounded(size);
        if size != self.size {
            self.chunk = None;
            self.size = size;
        }

        let chunk = match &self.chunk {
            Some(chunk) if self.next < STACKS_PER_CHUNK => Rc::clone(chunk),
            _ => {
                let len = size
                    .checked_mul(STACKS_PER_CHUNK)
                    .ok_or(Error::Stack(Errno::ENOMEM))?;
                let chunk = Rc::new(Region::map(len)?);
                self.chunk = Some(Rc::clone(&chunk));
                self.next = 0;
                chunk
            }
        };

        let bottom = chunk.addr() + self.next * size;
        self.next += 1;
        Ok(Stack {
            region: chunk,
            bottom,
            size,
            guarded: false,
        })
    }
}
