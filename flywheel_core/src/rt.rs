//! Real-time thread setup for motor threads.
//!
//! Compiled to no-ops without the `rt` feature, so the same pool code runs
//! unchanged on development machines and on tuned hosts where motors are
//! pinned to isolated cores.

/// Pin the current thread to a specific CPU core.
///
/// No-op when the `rt` feature is not enabled.
#[cfg(feature = "rt")]
pub fn pin_current_thread(cpu: usize) -> Result<(), String> {
    use nix::sched::{CpuSet, sched_setaffinity};
    use nix::unistd::Pid;

    let mut cpuset = CpuSet::new();
    cpuset
        .set(cpu)
        .map_err(|e| format!("CpuSet::set({cpu}) failed: {e}"))?;
    sched_setaffinity(Pid::from_raw(0), &cpuset)
        .map_err(|e| format!("sched_setaffinity failed: {e}"))?;
    Ok(())
}

#[cfg(not(feature = "rt"))]
pub fn pin_current_thread(_cpu: usize) -> Result<(), String> {
    Ok(()) // No-op in simulation mode
}
