//! Pre-flight checks, run before the BPF object is opened.

use std::path::Path;

use anyhow::{bail, Result};

/// Run all pre-flight checks.
pub fn run_preflight_checks(bpf_obj: &Path) -> Result<()> {
    check_privileges()?;
    check_object_exists(bpf_obj)?;
    bump_memlock_rlimit()?;

    Ok(())
}

fn check_privileges() -> Result<()> {
    if unsafe { libc::geteuid() } == 0 {
        return Ok(());
    }

    bail!(
        "Permission denied: sched-analyzer requires root privileges to load eBPF programs.\n\n\
         Run with: sudo sched-analyzer ..."
    );
}

fn check_object_exists(bpf_obj: &Path) -> Result<()> {
    if !bpf_obj.is_file() {
        bail!(
            "BPF object not found: {}\n\n\
             Point --bpf-obj to the compiled sched-analyzer probes.",
            bpf_obj.display()
        );
    }

    Ok(())
}

/// Kernels older than 5.11 account BPF maps against RLIMIT_MEMLOCK.
fn bump_memlock_rlimit() -> Result<()> {
    let rlimit = libc::rlimit {
        rlim_cur: 128 << 20,
        rlim_max: 128 << 20,
    };

    if unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlimit) } != 0 {
        bail!(
            "Failed to increase rlimit: {}",
            std::io::Error::last_os_error()
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_not_found() {
        let err = check_object_exists(Path::new("/nonexistent/sched-analyzer.bpf.o")).unwrap_err();

        assert!(err.to_string().contains("BPF object not found"));
    }

    #[test]
    fn test_object_is_a_directory() {
        let tmp = tempfile::tempdir().unwrap();

        assert!(check_object_exists(tmp.path()).is_err());
    }
}
