use std::{
    alloc::{GlobalAlloc, Layout, System},
    hint::black_box,
    sync::atomic::{AtomicUsize, Ordering},
};

static CURRENT: AtomicUsize = AtomicUsize::new(0);
static PEAK: AtomicUsize = AtomicUsize::new(0);
static ALLOCATIONS: AtomicUsize = AtomicUsize::new(0);

/// A global allocator that tracks live heap bytes and their high-water mark.
///
/// [`Metric::PeakMemory`](crate::Metric::PeakMemory) is only available when this
/// allocator is installed:
///
/// ```rust,ignore
/// #[global_allocator]
/// static ALLOC: comparo::PeakAlloc = comparo::PeakAlloc;
/// ```
///
/// The counters are process wide. Peak memory is only meaningful while one
/// thread is being measured, which is how the runner always works.
#[derive(Debug, Default, Clone, Copy)]
pub struct PeakAlloc;

fn record_growth(bytes: usize) {
    ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
    let now = CURRENT.fetch_add(bytes, Ordering::Relaxed) + bytes;
    PEAK.fetch_max(now, Ordering::Relaxed);
}

fn record_shrink(bytes: usize) {
    CURRENT.fetch_sub(bytes, Ordering::Relaxed);
}

unsafe impl GlobalAlloc for PeakAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { System.alloc(layout) };
        if !ptr.is_null() {
            record_growth(layout.size());
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { System.alloc_zeroed(layout) };
        if !ptr.is_null() {
            record_growth(layout.size());
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { System.dealloc(ptr, layout) };
        record_shrink(layout.size());
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = unsafe { System.realloc(ptr, layout, new_size) };
        if !new_ptr.is_null() {
            if new_size > layout.size() {
                record_growth(new_size - layout.size());
            } else {
                record_shrink(layout.size() - new_size);
            }
        }
        new_ptr
    }
}

impl PeakAlloc {
    /// Whether `PeakAlloc` is the process's global allocator.
    pub fn is_installed() -> bool {
        let before = ALLOCATIONS.load(Ordering::Relaxed);
        drop(black_box(Box::new(0u64)));
        ALLOCATIONS.load(Ordering::Relaxed) != before
    }

    /// Bytes currently allocated.
    pub fn current() -> usize {
        CURRENT.load(Ordering::Relaxed)
    }

    /// Highest value of [`PeakAlloc::current`] since the last reset.
    pub fn peak() -> usize {
        PEAK.load(Ordering::Relaxed)
    }

    /// Restart peak tracking from the current level and return that level.
    pub fn reset_peak() -> usize {
        let now = CURRENT.load(Ordering::Relaxed);
        PEAK.store(now, Ordering::Relaxed);
        now
    }
}
