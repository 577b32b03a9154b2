//! Process and thread identity of the sampling process.
//!
//! These feed the `pid` and `tid` housekeeping metrics, which are re-read on
//! every sampling pass so readers can see which process and thread produced
//! the latest values.

/// Current process id.
pub fn current_pid() -> u64 {
    u64::from(std::process::id())
}

/// Kernel thread id of the calling thread.
#[cfg(target_os = "linux")]
pub fn current_tid() -> u64 {
    // Safety: gettid takes no arguments and cannot fail.
    let tid = unsafe { libc::syscall(libc::SYS_gettid) };
    u64::try_from(tid).unwrap_or(0)
}

/// Non-Linux targets have no kernel tid; the process id stands in for it.
#[cfg(not(target_os = "linux"))]
pub fn current_tid() -> u64 {
    current_pid()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_pid_matches_std() {
        assert_eq!(current_pid(), u64::from(std::process::id()));
    }

    #[test]
    fn test_current_tid_nonzero() {
        assert!(current_tid() > 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_tid_differs_across_threads() {
        let main_tid = current_tid();
        let other_tid = std::thread::spawn(current_tid).join().unwrap();
        assert_ne!(main_tid, other_tid);
    }
}
