use std::num::NonZeroUsize;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, Weak};

use nix::sys::mman::{mmap_anonymous, mprotect, munmap, MapFlags, ProtFlags};
use nix::sys::signal::{self, SigSet, SigmaskHow, Signal};

use gapitrace_format::{ChangedBlockInfo, ChangedDataPackage, TraceError, TraceErrorKind};

use crate::{page_size, PageStatusArray, WHOLE};

/// Parameters needed to shadow one host-visible GPU mapping.
pub struct MappedRegionConfig {
    pub device: u64,
    pub allocation: u64,
    pub offset: u64,
    pub size: u64,
    /// The pointer the driver itself returned for this mapping.
    pub driver_ptr: NonNull<u8>,
    /// Skip page-guarding entirely: the application's writes are applied
    /// directly to `driver_ptr` and a flush copies the whole requested range
    /// unconditionally. Used for mappings too small to benefit from
    /// per-page tracking, or when the platform lacks `mprotect` support.
    pub no_guard: bool,
    /// The memory was imported from an externally-owned host pointer: this
    /// region must free it itself rather than rely on the driver to do so.
    pub owns_external_memory: bool,
}

pub(crate) struct RegionState {
    device: u64,
    allocation: u64,
    offset: u64,
    size: u64,
    driver_ptr: NonNull<u8>,
    shadow_ptr: Option<NonNull<u8>>,
    starting_address_offset: usize,
    pub(crate) page_status: PageStatusArray,
    block_conflict_error: bool,
}

// SAFETY: raw pointers here are never dereferenced outside the owning
// thread's call into `MappedRegion` or the SIGSEGV handler, both of which
// take the same mutex before touching memory.
unsafe impl Send for RegionState {}

/// A shadowed host-visible mapping.
///
/// When guarding is active, `driver_ptr` (the driver's real mapping) is never
/// handed to the application; instead the application receives
/// [`MappedRegion::app_pointer`], which points at a host-owned, guarded
/// shadow copy. Writes to that copy trap into [`crate::install_fault_handler`],
/// which unprotects the faulting page and marks it dirty; [`MappedRegion::flush`]
/// collects the dirty pages, copies their bytes into both the changed-data
/// package and the real driver mapping, and re-protects them.
pub struct MappedRegion {
    state: Arc<Mutex<RegionState>>,
    no_guard: bool,
    owns_external_memory: bool,
    shadow_alloc_len: usize,
}

/// Registry the SIGSEGV handler consults to find which region, if any, owns a
/// faulting address. Populated by `map` and cleared by `unmap`/`Drop`.
pub(crate) static REGISTRY: std::sync::OnceLock<Mutex<Vec<(usize, usize, Weak<Mutex<RegionState>>)>>> =
    std::sync::OnceLock::new();

fn registry() -> &'static Mutex<Vec<(usize, usize, Weak<Mutex<RegionState>>)>> {
    REGISTRY.get_or_init(|| Mutex::new(Vec::new()))
}

impl MappedRegion {
    /// Establishes a shadow for `config.driver_ptr`. The returned region's
    /// [`app_pointer`](Self::app_pointer) is what should be handed back to
    /// the application in place of the driver's own pointer.
    pub fn map(config: MappedRegionConfig) -> Result<Self, TraceError> {
        let page_sz = page_size();
        let starting_address_offset = (config.driver_ptr.as_ptr() as usize) % page_sz;

        if config.no_guard || config.size == 0 {
            let state = RegionState {
                device: config.device,
                allocation: config.allocation,
                offset: config.offset,
                size: config.size,
                driver_ptr: config.driver_ptr,
                shadow_ptr: None,
                starting_address_offset,
                page_status: PageStatusArray::new(0),
                block_conflict_error: false,
            };
            return Ok(Self {
                state: Arc::new(Mutex::new(state)),
                no_guard: true,
                owns_external_memory: config.owns_external_memory,
                shadow_alloc_len: 0,
            });
        }

        let span = starting_address_offset + usize::try_from(config.size).unwrap_or(usize::MAX);
        let page_count = span.div_ceil(page_sz);
        let alloc_len = page_count * page_sz;

        let alloc_len_nz = NonZeroUsize::new(alloc_len).ok_or_else(|| shadow_err("zero-length mapping"))?;

        // SAFETY: anonymous, fixed nowhere, length is nonzero and page-aligned.
        let shadow_ptr = unsafe {
            mmap_anonymous(
                None,
                alloc_len_nz,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_PRIVATE,
            )
        }
        .map_err(|errno| shadow_err_with_source("mmap failed allocating shadow copy", errno))?
        .cast::<u8>();

        // SAFETY: both ranges are valid for `size` bytes: the driver gave us
        // `driver_ptr`, and we just mapped `shadow_ptr` with room for it.
        unsafe {
            std::ptr::copy_nonoverlapping(
                config.driver_ptr.as_ptr(),
                shadow_ptr.as_ptr().add(starting_address_offset),
                usize::try_from(config.size).unwrap_or(usize::MAX),
            );
        }

        // SAFETY: `shadow_ptr` is a live mapping of `alloc_len` bytes owned by this region.
        unsafe { mprotect(shadow_ptr.cast(), alloc_len, ProtFlags::PROT_READ) }
            .map_err(|errno| shadow_err_with_source("mprotect failed guarding shadow copy", errno))?;

        let state = RegionState {
            device: config.device,
            allocation: config.allocation,
            offset: config.offset,
            size: config.size,
            driver_ptr: config.driver_ptr,
            shadow_ptr: Some(shadow_ptr),
            starting_address_offset,
            page_status: PageStatusArray::new(page_count),
            block_conflict_error: false,
        };

        let region = Self {
            state: Arc::new(Mutex::new(state)),
            no_guard: false,
            owns_external_memory: config.owns_external_memory,
            shadow_alloc_len: alloc_len,
        };

        registry().lock().unwrap_or_else(std::sync::PoisonError::into_inner).push((
            shadow_ptr.as_ptr() as usize,
            alloc_len,
            Arc::downgrade(&region.state),
        ));

        Ok(region)
    }

    /// The pointer that should be handed to the application.
    #[must_use]
    pub fn app_pointer(&self) -> NonNull<u8> {
        let guard = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.shadow_ptr.unwrap_or(guard.driver_ptr)
    }

    #[must_use]
    pub fn no_guard(&self) -> bool {
        self.no_guard
    }

    /// Tears down the shadow mapping, removing it from the fault-handler
    /// registry. Any pages still marked dirty are treated as if flushed with
    /// `size = WHOLE`, per the original's unmap semantics, and the resulting
    /// package is returned so the caller can still persist the final writes.
    pub fn unmap(self) -> Result<ChangedDataPackage, TraceError> {
        tracing::debug!(no_guard = self.no_guard, "unmapping shadowed region");

        let package = if self.no_guard {
            ChangedDataPackage::default()
        } else {
            self.flush(0, WHOLE)?
        };

        if !self.no_guard {
            registry()
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .retain(|(addr, _, _)| {
                    let guard = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                    Some(*addr) != guard.shadow_ptr.map(|p| p.as_ptr() as usize)
                });

            let shadow_ptr = {
                let guard = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                guard.shadow_ptr
            };
            if let Some(ptr) = shadow_ptr {
                // SAFETY: `ptr`/`self.shadow_alloc_len` are exactly what `map` allocated.
                unsafe { munmap(ptr.cast(), self.shadow_alloc_len) }
                    .map_err(|errno| shadow_err_with_source("munmap failed tearing down shadow copy", errno))?;
            }
        }

        Ok(package)
    }

    /// Produces a changed-data package for the intersection of
    /// `[offset, offset+size)` with this mapping, clearing the dirty flag on
    /// every page it collects and writing their current contents back into
    /// the real driver mapping.
    ///
    /// `size == WHOLE` means "to the end of the mapping".
    pub fn flush(&self, offset: u64, size: u64) -> Result<ChangedDataPackage, TraceError> {
        tracing::trace!(offset, size, no_guard = self.no_guard, "flushing shadowed region");

        let mut guard = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        let range_end = if size == WHOLE { guard.size } else { offset + size };
        let range_end = range_end.min(guard.size);

        if self.no_guard {
            let len = usize::try_from(range_end.saturating_sub(offset)).unwrap_or(0);
            if len == 0 {
                return Ok(ChangedDataPackage::default());
            }
            // SAFETY: `driver_ptr` is valid for `guard.size` bytes and `offset+len <= guard.size`.
            let data = unsafe {
                std::slice::from_raw_parts(guard.driver_ptr.as_ptr().add(offset as usize), len)
            }
            .to_vec();
            return Ok(ChangedDataPackage {
                blocks: vec![ChangedBlockInfo { offset, length: len as u64 }],
                data,
            });
        }

        let page_sz = page_size() as u64;
        let starting_offset = guard.starting_address_offset as u64;

        let mut blocks = Vec::new();
        let mut data = Vec::new();

        let changed: Vec<usize> = guard.page_status.changed_indices().collect();
        let changed_count = changed.len();

        // Blocks SIGSEGV delivery to this thread for the whole re-protect
        // pass: the fault handler and this loop both rewrite the same pages'
        // protection under the region's mutex, and without blocking, a fault
        // on a page this loop is mid-reprotecting would race its status
        // update against `clear_changed` below.
        with_sigsegv_blocked(|| {
            for page_index in changed {
                let page_start = page_index as u64 * page_sz - starting_offset;
                let page_end = page_start + page_sz;
                if page_end <= offset || page_start >= range_end {
                    continue;
                }

                let block_start = page_start.max(offset);
                let block_end = page_end.min(range_end);
                let block_len = usize::try_from(block_end - block_start).unwrap_or(0);

                let shadow_ptr = guard.shadow_ptr.expect("guarded region always has a shadow pointer");
                let src_offset = usize::try_from(guard.starting_address_offset as u64 + block_start).unwrap_or(0);

                // SAFETY: `src_offset + block_len` stays within the shadow allocation by construction.
                let bytes = unsafe { std::slice::from_raw_parts(shadow_ptr.as_ptr().add(src_offset), block_len) };
                data.extend_from_slice(bytes);
                blocks.push(ChangedBlockInfo {
                    offset: block_start,
                    length: block_len as u64,
                });

                // SAFETY: driver_ptr is valid for guard.size bytes; block_start/block_len stay in range.
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        bytes.as_ptr(),
                        guard.driver_ptr.as_ptr().add(block_start as usize),
                        block_len,
                    );
                }

                guard.page_status.clear_changed(page_index);
                let page_addr = shadow_ptr.as_ptr() as usize + page_index * page_size();
                // SAFETY: `page_addr` is one page within the shadow allocation, freshly written above.
                if let Some(addr) = NonNull::new(page_addr as *mut std::ffi::c_void) {
                    let _ = unsafe { mprotect(addr, page_size(), ProtFlags::PROT_READ) };
                }
            }
        });

        tracing::debug!(blocks = blocks.len(), changed_count, "flush collected changed pages");

        Ok(ChangedDataPackage { blocks, data })
    }

    /// Call when a pipeline barrier's source access mask/stage is HOST_WRITE
    /// (spec §4.4, barrier-awareness): eagerly flushes pages the application
    /// has already written through the shadow, so the driver observes them
    /// at the barrier rather than only at the next explicit flush.
    pub fn on_host_write_barrier(&self) -> Result<ChangedDataPackage, TraceError> {
        tracing::debug!("host-write barrier: eagerly flushing shadowed region");
        self.flush(0, WHOLE)
    }

    /// Call when a pipeline barrier's destination access mask/stage is
    /// HOST_READ (spec §4.4, barrier-awareness): the driver is about to stage
    /// data back to host-visible memory, so the shadow copy is refreshed from
    /// the driver's current bytes before the application reads it.
    pub fn on_host_read_barrier(&self) -> Result<(), TraceError> {
        if self.no_guard {
            return Ok(());
        }

        tracing::debug!("host-read barrier: refreshing shadow from driver");

        let mut guard = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(shadow_ptr) = guard.shadow_ptr else { return Ok(()) };
        let size = usize::try_from(guard.size).unwrap_or(0);
        let starting_offset = guard.starting_address_offset;

        with_sigsegv_blocked(|| -> Result<(), TraceError> {
            // SAFETY: `shadow_ptr`/`self.shadow_alloc_len` are exactly what `map` allocated.
            unsafe { mprotect(shadow_ptr.cast(), self.shadow_alloc_len, ProtFlags::PROT_READ | ProtFlags::PROT_WRITE) }
                .map_err(|errno| shadow_err_with_source("mprotect failed unguarding shadow copy for host-read refresh", errno))?;

            // SAFETY: both ranges are valid for `size` bytes, as in `map`.
            unsafe {
                std::ptr::copy_nonoverlapping(guard.driver_ptr.as_ptr(), shadow_ptr.as_ptr().add(starting_offset), size);
            }

            // SAFETY: `shadow_ptr`/`self.shadow_alloc_len` are exactly what `map` allocated.
            unsafe { mprotect(shadow_ptr.cast(), self.shadow_alloc_len, ProtFlags::PROT_READ) }
                .map_err(|errno| shadow_err_with_source("mprotect failed reguarding shadow copy after host-read refresh", errno))?;

            Ok(())
        })?;

        guard.page_status.reset_all();
        Ok(())
    }
}

/// Blocks SIGSEGV delivery to this thread for the duration of `f`, matching
/// the documented concurrency contract: the flush path takes the region's
/// lock and briefly stops signal delivery while rewriting page protection, so
/// a concurrent fault on the same page can't race the re-protect.
fn with_sigsegv_blocked<T>(f: impl FnOnce() -> T) -> T {
    let mut mask = SigSet::empty();
    mask.add(Signal::SIGSEGV);
    let mut old = SigSet::empty();
    let blocked = signal::pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&mask), Some(&mut old)).is_ok();

    let result = f();

    if blocked {
        let _ = signal::pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&old), None);
    }
    result
}

fn shadow_err(reason: &'static str) -> TraceError {
    TraceError::new("gapitrace_shadow::region", TraceErrorKind::ShadowFault).with_source(std::io::Error::other(reason))
}

fn shadow_err_with_source(reason: &'static str, errno: nix::errno::Errno) -> TraceError {
    TraceError::new("gapitrace_shadow::region", TraceErrorKind::ShadowFault)
        .with_source(std::io::Error::other(format!("{reason}: {errno}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_alloc(size: usize) -> NonNull<u8> {
        let mut buf = vec![0u8; size].into_boxed_slice();
        let ptr = buf.as_mut_ptr();
        std::mem::forget(buf);
        NonNull::new(ptr).expect("boxed slice is never null")
    }

    #[test]
    fn no_guard_flush_copies_requested_range_verbatim() {
        let size = 64usize;
        let driver_ptr = host_alloc(size);
        // SAFETY: `driver_ptr` is valid for `size` bytes, allocated above.
        unsafe { std::slice::from_raw_parts_mut(driver_ptr.as_ptr(), size) }.fill(7);

        let region = MappedRegion::map(MappedRegionConfig {
            device: 1,
            allocation: 1,
            offset: 0,
            size: size as u64,
            driver_ptr,
            no_guard: true,
            owns_external_memory: false,
        })
        .unwrap();

        let package = region.flush(0, WHOLE).unwrap();
        assert_eq!(package.blocks.len(), 1);
        assert_eq!(package.data, vec![7u8; size]);
    }

    #[test]
    fn no_guard_host_write_barrier_flushes_like_flush() {
        let size = 32usize;
        let driver_ptr = host_alloc(size);
        unsafe { std::slice::from_raw_parts_mut(driver_ptr.as_ptr(), size) }.fill(9);

        let region = MappedRegion::map(MappedRegionConfig {
            device: 1,
            allocation: 1,
            offset: 0,
            size: size as u64,
            driver_ptr,
            no_guard: true,
            owns_external_memory: false,
        })
        .unwrap();

        let package = region.on_host_write_barrier().unwrap();
        assert_eq!(package.data, vec![9u8; size]);
    }

    #[test]
    fn no_guard_host_read_barrier_is_a_no_op() {
        let size = 32usize;
        let driver_ptr = host_alloc(size);

        let region = MappedRegion::map(MappedRegionConfig {
            device: 1,
            allocation: 1,
            offset: 0,
            size: size as u64,
            driver_ptr,
            no_guard: true,
            owns_external_memory: false,
        })
        .unwrap();

        assert!(region.on_host_read_barrier().is_ok());
    }

    #[test]
    fn guarded_host_read_barrier_copies_driver_bytes_and_clears_status() {
        let size = page_size();
        let driver_ptr = host_alloc(size);
        unsafe { std::slice::from_raw_parts_mut(driver_ptr.as_ptr(), size) }.fill(1);

        let region = MappedRegion::map(MappedRegionConfig {
            device: 1,
            allocation: 1,
            offset: 0,
            size: size as u64,
            driver_ptr,
            no_guard: false,
            owns_external_memory: false,
        })
        .unwrap();

        {
            let mut guard = region.state.lock().unwrap();
            guard.page_status.mark_changed(0);
        }

        unsafe { std::slice::from_raw_parts_mut(driver_ptr.as_ptr(), size) }.fill(2);

        region.on_host_read_barrier().unwrap();

        let app_ptr = region.app_pointer();
        let refreshed = unsafe { std::slice::from_raw_parts(app_ptr.as_ptr(), size) };
        assert_eq!(refreshed, vec![2u8; size].as_slice());

        let guard = region.state.lock().unwrap();
        assert!(!guard.page_status.any_changed());
    }
}
