//! Heap allocator setup.
//!
//! The payload keeps no page tables of its own, so the heap lives in a
//! static array handed to `linked_list_allocator`. It only has to cover
//! the descriptor free lists and receive staging buffers.

use linked_list_allocator::LockedHeap;

use crate::config::HEAP_SIZE;

/// Global heap allocator.
#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// Heap backing storage.
static mut HEAP: [u8; HEAP_SIZE] = [0; HEAP_SIZE];

/// Hand the heap window to the global allocator.
///
/// Must run once at boot before anything allocates.
pub fn init_heap() {
    unsafe {
        ALLOCATOR.lock().init((&raw mut HEAP).cast::<u8>(), HEAP_SIZE);
    }
}

/// Allocation failure handler.
#[alloc_error_handler]
fn alloc_error_handler(layout: alloc::alloc::Layout) -> ! {
    panic!("allocation error: {:?}", layout)
}
