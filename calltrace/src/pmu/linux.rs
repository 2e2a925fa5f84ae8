//! `perf_event_open` backend.

use std::io;
use std::os::unix::io::RawFd;

use log::debug;

use crate::domain::PmuError;
use crate::pmu::{PmuCounters, COUNTERS};

const PERF_TYPE_HARDWARE: u32 = 0;
const PERF_FLAG_FD_CLOEXEC: libc::c_ulong = 1 << 3;

// perf_event_attr flag bits.
const ATTR_DISABLED: u64 = 1;
const ATTR_INHERIT: u64 = 1 << 1;
const ATTR_EXCLUDE_KERNEL: u64 = 1 << 5;
const ATTR_EXCLUDE_HV: u64 = 1 << 6;
const ATTR_ENABLE_ON_EXEC: u64 = 1 << 12;

/// First 64 bytes of the kernel's `perf_event_attr` (`PERF_ATTR_SIZE_VER0`);
/// later extensions are optional and unused here.
#[repr(C)]
#[derive(Default)]
struct PerfEventAttr {
    type_: u32,
    size: u32,
    config: u64,
    sample_period: u64,
    sample_type: u64,
    read_format: u64,
    flags: u64,
    wakeup_events: u32,
    bp_type: u32,
    config1: u64,
}

/// One fd per hardware event, grouped under the first as leader so the
/// kernel schedules them together.
pub struct PerfCounterGroup {
    fds: Vec<RawFd>,
    finalized: bool,
}

impl PerfCounterGroup {
    /// Opens all counters on the calling process (pid 0), disabled and
    /// armed to start at the next exec in this process tree.
    pub fn open() -> Result<Self, PmuError> {
        let mut fds: Vec<RawFd> = Vec::with_capacity(COUNTERS.len());
        for (name, config) in COUNTERS {
            let group_fd = fds.first().copied().unwrap_or(-1);
            match open_event(config, group_fd) {
                Ok(fd) => fds.push(fd),
                Err(source) => {
                    close_all(&fds);
                    return Err(PmuError::Open { counter: name, source });
                }
            }
        }
        debug!("opened {} hardware counters", fds.len());
        Ok(Self { fds, finalized: false })
    }

    /// Reads every counter once and closes the group.
    pub fn finalize(mut self) -> Result<PmuCounters, PmuError> {
        self.finalized = true;
        let mut values = [0_u64; COUNTERS.len()];
        let mut failure: Option<PmuError> = None;
        for (i, &fd) in self.fds.iter().enumerate() {
            match read_counter(fd) {
                Ok(v) => values[i] = v,
                Err(source) => {
                    if failure.is_none() {
                        failure = Some(PmuError::Read { counter: COUNTERS[i].0, source });
                    }
                }
            }
        }
        close_all(&self.fds);
        if let Some(err) = failure {
            return Err(err);
        }
        Ok(PmuCounters {
            cycles: values[0],
            instructions: values[1],
            cache_references: values[2],
            cache_misses: values[3],
            branch_misses: values[4],
        })
    }
}

impl Drop for PerfCounterGroup {
    fn drop(&mut self) {
        if !self.finalized {
            close_all(&self.fds);
        }
    }
}

#[allow(unsafe_code)]
fn open_event(config: u64, group_fd: RawFd) -> io::Result<RawFd> {
    let attr = PerfEventAttr {
        type_: PERF_TYPE_HARDWARE,
        size: u32::try_from(std::mem::size_of::<PerfEventAttr>()).unwrap_or(0),
        config,
        flags: ATTR_DISABLED
            | ATTR_INHERIT
            | ATTR_EXCLUDE_KERNEL
            | ATTR_EXCLUDE_HV
            | ATTR_ENABLE_ON_EXEC,
        ..Default::default()
    };
    // SAFETY: attr points to a fully initialized struct whose size field
    // matches its layout; the kernel copies it before the call returns.
    let fd = unsafe {
        libc::syscall(
            libc::SYS_perf_event_open,
            std::ptr::addr_of!(attr),
            0,               // pid: this process
            -1,              // cpu: any
            group_fd,
            PERF_FLAG_FD_CLOEXEC,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    #[allow(clippy::cast_possible_truncation)]
    let fd = fd as RawFd;
    Ok(fd)
}

#[allow(unsafe_code)]
fn read_counter(fd: RawFd) -> io::Result<u64> {
    let mut buf = [0_u8; 8];
    // SAFETY: buf is 8 writable bytes; a counting perf fd yields one u64.
    let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
    if n != 8 {
        return Err(io::Error::last_os_error());
    }
    Ok(u64::from_ne_bytes(buf))
}

#[allow(unsafe_code)]
fn close_all(fds: &[RawFd]) {
    for &fd in fds {
        // SAFETY: fd came from perf_event_open and is closed exactly once.
        unsafe {
            libc::close(fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attr_matches_the_abi_prefix_size() {
        // PERF_ATTR_SIZE_VER0
        assert_eq!(std::mem::size_of::<PerfEventAttr>(), 64);
    }

    #[test]
    fn open_failure_names_the_first_counter() {
        // Either the counters open (permissive kernel) or the error carries
        // the hint; both are valid environments for this test.
        match PerfCounterGroup::open() {
            Ok(group) => {
                let counters = group.finalize().unwrap();
                // Disabled + enable_on_exec means nothing ran under them.
                assert_eq!(counters.cycles, 0);
            }
            Err(err) => assert!(err.to_string().contains("perf_event_paranoid")),
        }
    }
}
