//! System call handlers.

use crate::arch::Arch;
use crate::error::ProcError;
use crate::kernel::Kernel;
use crate::process::context::StackRegion;
use crate::process::info::ProcInfo;
use crate::process::table::ProcessId;
use crate::scheduler::policy::BurstTime;

use super::{to_return, YEAR};

/// Banner copied out by `draw`.
pub const DRAWING: &str = concat!(
    "       _                   \n",
    " __  _| | _____ _ __ _ __  \n",
    " \\ \\/ / |/ / _ \\ '__| '_ \\ \n",
    "  >  <|   <  __/ |  | | | |\n",
    " /_/\\_\\_|\\_\\___|_|  |_| |_|\n",
);

fn pid_arg(pid: isize) -> Result<ProcessId, ProcError> {
    u32::try_from(pid)
        .map(ProcessId)
        .map_err(|_| ProcError::InvalidArgument)
}

// ═══════════════════════════════════════════════════════════════════════
// Process lifecycle
// ═══════════════════════════════════════════════════════════════════════

/// `fork()` → child pid in the parent, 0 in the child
pub fn sys_fork<A: Arch>(kernel: &'static Kernel<A>) -> isize {
    to_return(kernel.fork().map(|pid| pid.0 as usize))
}

/// `exit(status)`, does not return
pub fn sys_exit<A: Arch>(kernel: &Kernel<A>, status: i32) -> ! {
    kernel.exit(status)
}

/// `wait()` → pid of the reaped child, its status stored in `status`
pub fn sys_wait<A: Arch>(kernel: &Kernel<A>, status: Option<&mut i32>) -> isize {
    match kernel.wait() {
        Ok((pid, code)) => {
            if let Some(status) = status {
                *status = code;
            }
            pid.0 as isize
        }
        Err(err) => err.to_errno(),
    }
}

/// `kill(pid)` → 0
pub fn sys_kill<A: Arch>(kernel: &Kernel<A>, pid: isize) -> isize {
    to_return(pid_arg(pid).and_then(|pid| kernel.kill(pid)).map(|()| 0))
}

/// `getpid()` → pid
pub fn sys_getpid<A: Arch>(kernel: &Kernel<A>) -> isize {
    kernel.getpid().0 as isize
}

/// `sbrk(n)` → address-space size before the change
pub fn sys_sbrk<A: Arch>(kernel: &Kernel<A>, delta: isize) -> isize {
    to_return(kernel.sbrk(delta))
}

// ═══════════════════════════════════════════════════════════════════════
// Time
// ═══════════════════════════════════════════════════════════════════════

/// `sleep(n)` → 0 after `n` ticks, `-EINTR` if killed first
pub fn sys_sleep<A: Arch>(kernel: &Kernel<A>, ticks: isize) -> isize {
    let Ok(ticks) = u64::try_from(ticks) else {
        return ProcError::InvalidArgument.to_errno();
    };
    to_return(kernel.sleep_ticks(ticks).map(|()| 0))
}

/// `uptime()` → ticks since boot
pub fn sys_uptime<A: Arch>(kernel: &Kernel<A>) -> isize {
    kernel.uptime() as isize
}

/// `yield()` → 0
pub fn sys_yield<A: Arch>(kernel: &Kernel<A>) -> isize {
    kernel.yield_now();
    0
}

// ═══════════════════════════════════════════════════════════════════════
// Threads
// ═══════════════════════════════════════════════════════════════════════

/// `thread_create(fcn, arg, stack)` → tid
///
/// `stack` is the base of a one-page region in the caller's address space.
pub fn sys_thread_create<A: Arch>(
    kernel: &'static Kernel<A>,
    entry: usize,
    arg: usize,
    stack: usize,
) -> isize {
    let region = StackRegion {
        base: stack,
        len: kernel.config().user_stack_size,
    };
    to_return(kernel.thread_create(entry, arg, region).map(|tid| tid.0 as usize))
}

/// `thread_join()` → 0 once a sibling thread has been reaped
pub fn sys_thread_join<A: Arch>(kernel: &Kernel<A>) -> isize {
    to_return(kernel.thread_join().map(|_| 0))
}

/// `thread_exit()`, does not return
pub fn sys_thread_exit<A: Arch>(kernel: &Kernel<A>) -> ! {
    kernel.thread_exit()
}

// ═══════════════════════════════════════════════════════════════════════
// Scheduling and information
// ═══════════════════════════════════════════════════════════════════════

/// `set_burst_time(n)` → 0; `n == 0` clears the burst time
pub fn sys_set_burst_time<A: Arch>(kernel: &Kernel<A>, burst: isize) -> isize {
    match u32::try_from(burst) {
        Ok(burst) => {
            kernel.set_burst_time(BurstTime::new(burst));
            0
        }
        Err(_) => {
            log::warn!("[SCHED] rejected burst time {}", burst);
            ProcError::InvalidArgument.to_errno()
        }
    }
}

/// `get_burst_time()` → burst time, 0 when unset
pub fn sys_get_burst_time<A: Arch>(kernel: &Kernel<A>) -> isize {
    kernel.burst_time().map_or(0, |b| b.get() as isize)
}

/// `getNumProc()` → number of live table entries
pub fn sys_getnumproc<A: Arch>(kernel: &Kernel<A>) -> isize {
    kernel.num_procs() as isize
}

/// `getMaxPid()` → largest pid assigned so far
pub fn sys_getmaxpid<A: Arch>(kernel: &Kernel<A>) -> isize {
    kernel.max_pid().0 as isize
}

/// `getProcInfo(pid, info)` → 0, filling `info`
pub fn sys_getprocinfo<A: Arch>(kernel: &Kernel<A>, pid: isize, info: &mut ProcInfo) -> isize {
    match pid_arg(pid).and_then(|pid| kernel.proc_info(pid)) {
        Ok(found) => {
            *info = found;
            0
        }
        Err(err) => err.to_errno(),
    }
}

/// `ps()` → 0
pub fn sys_ps<A: Arch>(kernel: &Kernel<A>) -> isize {
    kernel.ps();
    0
}

/// `getyear()` → 2023
pub fn sys_getyear<A: Arch>(_kernel: &Kernel<A>) -> isize {
    YEAR
}

/// `draw(buf)` → bytes copied, `-EINVAL` if `buf` cannot hold the banner
pub fn sys_draw<A: Arch>(_kernel: &Kernel<A>, buf: &mut [u8]) -> isize {
    let picture = DRAWING.as_bytes();
    if picture.len() > buf.len() {
        return ProcError::InvalidArgument.to_errno();
    }
    buf[..picture.len()].copy_from_slice(picture);
    picture.len() as isize
}
