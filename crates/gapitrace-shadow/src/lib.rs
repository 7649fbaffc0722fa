//! Page-guard mapped-memory shadow.
//!
//! Tracks, at page granularity, which bytes of a large host-visible GPU
//! allocation the application has mutated since the last flush, using
//! `mprotect`-based write traps rather than scanning the whole mapping on
//! every flush. Grounded on the original tool's `PageGuardMappedMemory`.

mod fault;
mod page_status;
mod region;

pub use fault::install_fault_handler;
pub use page_status::{PageStatus, PageStatusArray};
pub use region::{MappedRegion, MappedRegionConfig};

use std::sync::OnceLock;

static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

/// The host's page size, queried once via `sysconf(_SC_PAGESIZE)`.
#[must_use]
pub fn page_size() -> usize {
    *PAGE_SIZE.get_or_init(|| {
        nix::unistd::sysconf(nix::unistd::SysconfVar::PAGE_SIZE)
            .ok()
            .flatten()
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(4096)
    })
}

/// `size == WHOLE` in a flush call means "from offset to the end of the
/// mapping", matching the original's `RangeOffset < 0` convention.
pub const WHOLE: u64 = u64::MAX;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_a_power_of_two_and_nonzero() {
        let size = page_size();
        assert!(size > 0);
        assert_eq!(size & (size - 1), 0);
    }
}
