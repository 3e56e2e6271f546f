//! Process-memory sampling and reclamation.
//!
//! The watch loop samples its own resident set after each cycle and asks
//! the allocator to return freed pages when the configured threshold is
//! crossed. Rust has no collector to invoke; on glibc `malloc_trim` is the
//! closest equivalent, and on other platforms reclamation is a logged
//! no-op. The dominant consumer (the browser engine) is already bounded by
//! the per-cycle session teardown.

use tracing::debug;

/// Current resident set size in bytes, when the platform exposes it.
#[cfg(target_os = "linux")]
pub fn rss_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_vm_rss(&status)
}

#[cfg(not(target_os = "linux"))]
pub fn rss_bytes() -> Option<u64> {
    None
}

#[cfg(target_os = "linux")]
fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb * 1024)
}

/// Ask the allocator to return freed memory to the OS.
#[cfg(all(target_os = "linux", target_env = "gnu"))]
pub fn reclaim() {
    // SAFETY: malloc_trim only walks glibc's own free lists.
    let trimmed = unsafe { libc::malloc_trim(0) };
    debug!("malloc_trim requested, released={}", trimmed == 1);
}

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
pub fn reclaim() {
    debug!("allocator reclamation not available on this platform");
}

#[cfg(test)]
mod tests {
    #[cfg(target_os = "linux")]
    #[test]
    fn test_parse_vm_rss() {
        let status = "Name:\tassetwatch\nVmPeak:\t  123456 kB\nVmRSS:\t   20480 kB\n";
        assert_eq!(super::parse_vm_rss(status), Some(20480 * 1024));
        assert_eq!(super::parse_vm_rss("Name:\tassetwatch\n"), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_rss_of_live_process() {
        let rss = super::rss_bytes().expect("VmRSS should be readable");
        assert!(rss > 0);
    }

    #[test]
    fn test_reclaim_is_safe_to_call() {
        super::reclaim();
    }
}
