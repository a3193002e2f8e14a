/*
 * Kernel Heap
 *
 * First-fit allocator over a single contiguous region. Free space is an
 * address-sorted singly-linked list of (next, size) nodes; every live
 * allocation is preceded by one word holding its payload size, and the
 * returned pointer is header-skipped. Freeing coalesces with the address
 * neighbours immediately, so no two adjacent free nodes ever exist.
 *
 * Thread stacks, process images and the FIFO ring all come from here.
 * Every operation runs inside a critical section, which makes the API
 * safe from thread context but not from interrupt handlers.
 */

use core::cell::UnsafeCell;
use core::mem::size_of;
use core::ptr::{self, null_mut};

use crate::arch::IrqCell;

/// Size of the kernel heap region.
pub const HEAP_BYTES: usize = 32 * 1024;

/// Allocation granularity; also the stack alignment the scheduler needs.
const ALIGN: usize = 8;

/// Size word preceding each live allocation.
const HDR: usize = size_of::<usize>();

/// Smallest region worth keeping as a free node after a split.
const MIN_FRAG: usize = size_of::<FreeNode>() + ALIGN;

#[repr(C)]
struct FreeNode {
    next: *mut FreeNode,
    size: usize, // total bytes of this free region, header space included
}

pub(crate) struct Heap {
    head: *mut FreeNode,
    total: usize,
}

unsafe impl Send for Heap {}

#[repr(align(8))]
struct HeapRegion(UnsafeCell<[u8; HEAP_BYTES]>);

unsafe impl Sync for HeapRegion {}

static HEAP_MEM: HeapRegion = HeapRegion(UnsafeCell::new([0; HEAP_BYTES]));

static HEAP: IrqCell<Heap> = IrqCell::new(Heap::unmapped());

fn round_up(n: usize) -> usize {
    (n + ALIGN - 1) & !(ALIGN - 1)
}

impl Heap {
    const fn unmapped() -> Self {
        Self {
            head: null_mut(),
            total: 0,
        }
    }

    /// Point the allocator at `region` and make all of it one free node.
    ///
    /// # Safety
    /// `region` must be valid, ALIGN-aligned, unused by anything else, and
    /// outlive the allocator.
    pub(crate) unsafe fn reset(&mut self, region: *mut u8, len: usize) {
        let node = region as *mut FreeNode;
        unsafe {
            (*node).next = null_mut();
            (*node).size = len;
        }
        self.head = node;
        self.total = len;
    }

    pub(crate) fn alloc(&mut self, bytes: usize) -> *mut u8 {
        if bytes == 0 {
            return null_mut();
        }
        let need = HDR + round_up(bytes);
        let mut link: *mut *mut FreeNode = &mut self.head;
        unsafe {
            let mut node = self.head;
            while !node.is_null() {
                if (*node).size >= need {
                    let spare = (*node).size - need;
                    let payload;
                    if spare >= MIN_FRAG {
                        // Split: the tail stays on the free list.
                        let tail = (node as *mut u8).add(need) as *mut FreeNode;
                        (*tail).next = (*node).next;
                        (*tail).size = spare;
                        *link = tail;
                        payload = need - HDR;
                    } else {
                        *link = (*node).next;
                        payload = (*node).size - HDR;
                    }
                    let block = node as *mut usize;
                    block.write(payload);
                    return (block as *mut u8).add(HDR);
                }
                link = &mut (*node).next;
                node = (*node).next;
            }
        }
        null_mut()
    }

    pub(crate) fn free(&mut self, allocation: *mut u8) {
        if allocation.is_null() {
            return;
        }
        unsafe {
            let block = allocation.sub(HDR) as *mut FreeNode;
            let size = HDR + *(block as *const usize);

            // Find the address-sorted insertion point.
            let mut prev: *mut FreeNode = null_mut();
            let mut next = self.head;
            while !next.is_null() && (next as usize) < (block as usize) {
                prev = next;
                next = (*next).next;
            }

            (*block).next = next;
            (*block).size = size;

            // Coalesce forward.
            if !next.is_null() && (block as *mut u8).add(size) == next as *mut u8 {
                (*block).size += (*next).size;
                (*block).next = (*next).next;
            }

            if prev.is_null() {
                self.head = block;
            } else {
                (*prev).next = block;
                // Coalesce backward.
                if (prev as *mut u8).add((*prev).size) == block as *mut u8 {
                    (*prev).size += (*block).size;
                    (*prev).next = (*block).next;
                }
            }
        }
    }

    pub(crate) fn realloc(&mut self, allocation: *mut u8, bytes: usize) -> *mut u8 {
        if allocation.is_null() {
            return self.alloc(bytes);
        }
        let want = round_up(bytes.max(1));
        unsafe {
            let block = allocation.sub(HDR) as *mut usize;
            let have = *block;
            if want == have {
                return allocation;
            }
            if want < have {
                self.shrink(block, have, want);
                return allocation;
            }

            // Try to grow in place: the region just past this block must be
            // a free node large enough to cover the difference.
            let end = allocation.add(have);
            let mut link: *mut *mut FreeNode = &mut self.head;
            let mut node = self.head;
            while !node.is_null() && (node as *mut u8) < end {
                link = &mut (*node).next;
                node = (*node).next;
            }
            if node as *mut u8 == end && have + (*node).size >= want {
                *link = (*node).next;
                block.write(have + (*node).size);
                let grown = *block;
                if grown > want {
                    self.shrink(block, grown, want);
                }
                return allocation;
            }

            // Relocate. On OOM the original allocation stays intact.
            let fresh = self.alloc(bytes);
            if fresh.is_null() {
                return null_mut();
            }
            ptr::copy_nonoverlapping(allocation, fresh, have.min(bytes));
            self.free(allocation);
            fresh
        }
    }

    /// Cut a live block down to `want` payload bytes, returning the tail
    /// to the free list when it can stand as a node of its own.
    unsafe fn shrink(&mut self, block: *mut usize, have: usize, want: usize) {
        let spare = have - want;
        if spare < MIN_FRAG {
            return;
        }
        unsafe {
            block.write(want);
            let tail = (block as *mut u8).add(HDR + want) as *mut usize;
            tail.write(spare - HDR);
            self.free((tail as *mut u8).add(HDR));
        }
    }

    /// Bytes currently available for allocation.
    pub(crate) fn space(&self) -> usize {
        let mut sum = 0;
        let mut node = self.head;
        while !node.is_null() {
            unsafe {
                sum += (*node).size - HDR;
                node = (*node).next;
            }
        }
        sum
    }

    /// Largest single allocation that can currently succeed.
    pub(crate) fn largest_free_block(&self) -> usize {
        let mut best = 0;
        let mut node = self.head;
        while !node.is_null() {
            unsafe {
                best = best.max((*node).size - HDR);
                node = (*node).next;
            }
        }
        best
    }

    #[cfg(test)]
    fn free_nodes(&self) -> usize {
        let mut n = 0;
        let mut node = self.head;
        while !node.is_null() {
            n += 1;
            node = unsafe { (*node).next };
        }
        n
    }

    #[cfg(test)]
    fn free_total(&self) -> usize {
        let mut sum = 0;
        let mut node = self.head;
        while !node.is_null() {
            unsafe {
                sum += (*node).size;
                node = (*node).next;
            }
        }
        sum
    }
}

/// Hand the static heap region to the allocator. Called by `sched::init`;
/// calling it again discards every live allocation.
pub fn init() {
    HEAP.with(|h| unsafe { h.reset(HEAP_MEM.0.get() as *mut u8, HEAP_BYTES) });
}

/// Allocate uninitialized space. Null on OOM.
pub fn malloc(bytes: usize) -> *mut u8 {
    HEAP.with(|h| h.alloc(bytes))
}

/// Allocate zeroed space. Null on OOM.
pub fn calloc(bytes: usize) -> *mut u8 {
    let p = malloc(bytes);
    if !p.is_null() {
        unsafe { ptr::write_bytes(p, 0, bytes) };
    }
    p
}

/// Resize an allocation, possibly moving it. `realloc(null, n)` is
/// `malloc(n)`; on OOM returns null and leaves the original intact.
pub fn realloc(allocation: *mut u8, bytes: usize) -> *mut u8 {
    HEAP.with(|h| h.realloc(allocation, bytes))
}

/// Return an allocation. Ignores null.
pub fn free(allocation: *mut u8) {
    HEAP.with(|h| h.free(allocation));
}

/// Bytes currently available for allocation.
pub fn space() -> usize {
    HEAP.with(|h| h.space())
}

/// Largest single allocation that can currently succeed.
pub fn largest_free_block() -> usize {
    HEAP.with(|h| h.largest_free_block())
}

/// Log heap usage.
pub fn report_stats() {
    let (space, largest) = HEAP.with(|h| (h.space(), h.largest_free_block()));
    log::info!(
        "heap: {} of {} bytes free, largest block {}",
        space,
        HEAP_BYTES,
        largest
    );
}
