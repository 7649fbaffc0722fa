use nix::sys::mman::{mprotect, ProtFlags};

use crate::region::REGISTRY;
use crate::page_size;

/// Installs the process-wide SIGSEGV handler that backs every guarded
/// [`crate::MappedRegion`].
///
/// Must be called once, before any region is mapped. A fault whose address
/// does not fall inside any registered region's shadow allocation is not
/// ours to handle; the handler leaves it for whatever disposition was
/// previously installed (typically the default crash handler), matching the
/// original tool's behavior of only ever touching its own guarded ranges.
///
/// # Safety
/// Installs a process-wide signal handler. Must not be called from within
/// another signal handler, and should only be called once per process.
pub unsafe fn install_fault_handler() -> std::io::Result<signal_hook::SigId> {
    // SAFETY: the closure calls `mprotect` (async-signal-safe) and takes a
    // short-lived lock on the region registry. The `tracing::trace!` call on
    // a resolved fault is not strictly async-signal-safe (it may allocate to
    // format fields), a tradeoff accepted here for diagnostics the same way
    // `signal_hook`'s own low-level handlers commonly do in practice.
    unsafe {
        signal_hook::low_level::register_sigaction(signal_hook::consts::SIGSEGV, |info| {
            handle_fault(info);
        })
    }
}

fn handle_fault(info: &libc::siginfo_t) {
    let fault_addr = unsafe { fault_address(info) };
    let Some(fault_addr) = fault_addr else { return };

    let registry = REGISTRY.get();
    let Some(registry) = registry else { return };
    let entries = registry.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

    for (base, len, state) in entries.iter() {
        if fault_addr < *base || fault_addr >= base + len {
            continue;
        }
        let Some(state) = state.upgrade() else { continue };
        let page_sz = page_size();
        let page_offset = (fault_addr - base) / page_sz;
        let page_addr = base + page_offset * page_sz;

        if let Ok(mut state) = state.lock() {
            state.page_status.mark_changed(page_offset);
        }

        if let Some(addr) = std::ptr::NonNull::new(page_addr as *mut std::ffi::c_void) {
            // SAFETY: `page_addr` is one page within a mapping this registry owns.
            let _ = unsafe { mprotect(addr, page_sz, ProtFlags::PROT_READ | ProtFlags::PROT_WRITE) };
        }
        tracing::trace!(fault_addr, page_offset, "page-guard fault resolved, page unguarded");
        return;
    }
}

/// # Safety
/// `info` must be a valid `siginfo_t` for a `SIGSEGV` delivered by the kernel
/// (as opposed to one synthesized by `kill`/`sigqueue`, which leaves `si_addr`
/// meaningless).
unsafe fn fault_address(info: &libc::siginfo_t) -> Option<usize> {
    // `si_addr` lives in the platform-specific union; `si_addr()` is the
    // accessor libc provides for it on Linux.
    let addr = unsafe { info.si_addr() };
    if addr.is_null() {
        None
    } else {
        Some(addr as usize)
    }
}
