//! Real-time scheduling hint for the thread that bit-bangs the bus.

use log::{info, warn};
use std::io;

/// Move the calling thread to `SCHED_FIFO` at the highest priority so the
/// spin-timed clock is not preempted mid-byte. Returns the priority set.
pub fn request_realtime_priority() -> io::Result<i32> {
    let priority = unsafe { libc::sched_get_priority_max(libc::SCHED_FIFO) };
    if priority < 0 {
        return Err(io::Error::last_os_error());
    }

    let param = libc::sched_param {
        sched_priority: priority,
    };
    // pid 0 targets the calling thread
    if unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(priority)
}

/// Apply the configured scheduling policy and report whether the thread
/// now runs under `SCHED_FIFO`. Failure is not fatal: the link still works,
/// only with more timing jitter.
pub fn apply(realtime_priority: bool) -> bool {
    if !realtime_priority {
        info!("Real-time priority disabled, running with default scheduling");
        return false;
    }

    match request_realtime_priority() {
        Ok(priority) => {
            info!("Running with SCHED_FIFO priority {}", priority);
            true
        }
        Err(e) => {
            warn!("sched_setscheduler failed: {}", e);
            false
        }
    }
}
