//! Host-thread platform.
//!
//! Each simulated CPU is a host thread running the scheduler loop, and every
//! table entry gets its own host thread the first time its context is
//! prepared. A context switch hands a baton from one thread to another, so at
//! most one thread executes on behalf of a CPU at any time. Interrupt masking
//! is a per-thread flag; timer interrupts posted with [`Hosted::raise_timer`]
//! are delivered the next time a CPU enables interrupts. When a slot is
//! reaped its context is dropped, which wakes the parked entry thread with
//! a retire signal and ends it.
//!
//! User programs are closures carried in the trap frame. [`UserProc`] is the
//! user-side stub: it invokes the system-call handlers and then runs the
//! user-return checks, as the trap exit path would.

use std::boxed::Box;
use std::cell::Cell;
use std::fmt::{self, Write as _};
use std::panic::{self, AssertUnwindSafe};
use std::string::String;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use std::vec::Vec;

use super::{Arch, MemoryManager};
use crate::config::{KernelConfig, PAGE_SIZE};
use crate::error::{ProcError, Result};
use crate::kernel::Kernel;
use crate::process::context::{EntryPoint, StackRegion};
use crate::process::info::ProcInfo;
use crate::process::table::ProcessId;
use crate::syscall;

thread_local! {
    static CPU: Cell<Option<usize>> = const { Cell::new(None) };
    static INTERRUPTS: Cell<bool> = const { Cell::new(false) };
}

fn bind_cpu(cpu: Option<usize>) {
    CPU.with(|c| c.set(cpu));
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A user program: runs with the user-side stub, returns the exit status.
pub type Program = Arc<dyn Fn(&UserProc) -> i32 + Send + Sync>;

/// What a parked thread is woken with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wake {
    /// Continue on this CPU.
    Run(usize),
    /// The context was discarded; the thread must end.
    Retire,
}

/// Binary semaphore handing a [`Wake`] to the thread parked on it.
struct Baton {
    wake: Mutex<Option<Wake>>,
    signal: Condvar,
}

impl Baton {
    fn new() -> Arc<Self> {
        Arc::new(Baton {
            wake: Mutex::new(None),
            signal: Condvar::new(),
        })
    }

    fn post(&self, wake: Wake) {
        *lock(&self.wake) = Some(wake);
        self.signal.notify_one();
    }

    fn park(&self) -> Wake {
        let mut slot = lock(&self.wake);
        loop {
            if let Some(wake) = slot.take() {
                return wake;
            }
            slot = self.signal.wait(slot).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Unwind payload ending a retired entry thread.
struct Retired;

/// End the calling entry thread from anywhere on its stack.
fn retire() -> ! {
    bind_cpu(None);
    #[cfg(panic = "unwind")]
    panic::resume_unwind(Box::new(Retired));
    #[cfg(not(panic = "unwind"))]
    loop {
        thread::park();
    }
}

/// Decrements the live entry-thread count when an entry thread ends.
struct EntryThread(Arc<AtomicUsize>);

impl Drop for EntryThread {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Saved context: the baton of the thread that is (or will be) parked in it.
#[derive(Default)]
pub struct HostedContext {
    baton: Option<Arc<Baton>>,
}

impl Drop for HostedContext {
    fn drop(&mut self) {
        // A discarded context is never switched to again.
        if let Some(baton) = self.baton.take() {
            baton.post(Wake::Retire);
        }
    }
}

/// Saved user state.
#[derive(Clone, Default)]
pub struct HostedFrame {
    program: Option<Program>,
    /// Program run by the child of the fork in progress.
    fork_child: Option<Program>,
    ret: usize,
    arg: usize,
    stack: Option<StackRegion>,
    thread: bool,
}

impl HostedFrame {
    pub fn new(program: Program) -> Self {
        HostedFrame {
            program: Some(program),
            ..HostedFrame::default()
        }
    }
}

/// Byte-vector address spaces with an upper size limit.
pub struct HostedMemory {
    limit: usize,
}

impl MemoryManager for HostedMemory {
    type Space = Vec<u8>;

    fn allocate(&self, size: usize) -> Result<Vec<u8>> {
        if size > self.limit {
            return Err(ProcError::ResourceExhausted);
        }
        let mut space = Vec::new();
        space
            .try_reserve_exact(size)
            .map_err(|_| ProcError::ResourceExhausted)?;
        space.resize(size, 0);
        Ok(space)
    }

    fn duplicate(&self, src: &Vec<u8>, size: usize) -> Result<Vec<u8>> {
        let mut copy = self.allocate(size)?;
        copy.copy_from_slice(&src[..size]);
        Ok(copy)
    }

    fn resize(&self, space: &mut Vec<u8>, _old_size: usize, new_size: usize) -> Result<usize> {
        if new_size > self.limit {
            return Err(ProcError::ResourceExhausted);
        }
        space.resize(new_size, 0);
        Ok(new_size)
    }

    fn release(&self, space: Vec<u8>, _size: usize) {
        drop(space);
    }
}

/// The host-thread platform.
pub struct Hosted {
    memory: HostedMemory,
    kernel: OnceLock<&'static Kernel<Hosted>>,
    /// Thread entry functions, indexed by "entry address".
    programs: Mutex<Vec<Program>>,
    console: Mutex<String>,
    pending_ticks: AtomicU64,
    timer_pending: Vec<AtomicBool>,
    entry_threads: Arc<AtomicUsize>,
}

impl Hosted {
    pub fn new(cpus: usize, memory_limit: usize) -> Self {
        Hosted {
            memory: HostedMemory { limit: memory_limit },
            kernel: OnceLock::new(),
            programs: Mutex::new(Vec::new()),
            console: Mutex::new(String::new()),
            pending_ticks: AtomicU64::new(0),
            timer_pending: (0..cpus).map(|_| AtomicBool::new(false)).collect(),
            entry_threads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Build a kernel, create init running `init` and start every CPU.
    pub fn boot(
        config: KernelConfig,
        memory_limit: usize,
        image_size: usize,
        init: Program,
    ) -> Result<Machine> {
        let arch = Hosted::new(config.cpus, memory_limit);
        let kernel: &'static Kernel<Hosted> = Box::leak(Box::new(Kernel::new(config, arch)?));
        let _ = kernel.arch().kernel.set(kernel);

        // Boot code runs on the first CPU before its scheduler starts.
        bind_cpu(Some(0));
        let init = kernel.user_init("init", HostedFrame::new(init), image_size);
        bind_cpu(None);
        init?;

        let mut cpus = Vec::with_capacity(config.cpus);
        for id in 0..config.cpus {
            let handle = thread::Builder::new()
                .name(std::format!("cpu{}", id))
                .spawn(move || {
                    bind_cpu(Some(id));
                    kernel.run_scheduler();
                })
                .map_err(|_| ProcError::ResourceExhausted)?;
            cpus.push(handle);
        }
        log::info!("[SCHED] hosted machine up with {} cpus", config.cpus);
        Ok(Machine { kernel, cpus })
    }

    /// Make `program` callable as a thread entry; returns its entry address.
    pub fn register(&self, program: Program) -> usize {
        let mut programs = lock(&self.programs);
        programs.push(program);
        programs.len() - 1
    }

    /// Post one timer interrupt to every CPU.
    pub fn raise_timer(&self) {
        self.pending_ticks.fetch_add(1, Ordering::AcqRel);
        for pending in &self.timer_pending {
            pending.store(true, Ordering::Release);
        }
    }

    /// Host threads currently backing table entries.
    pub fn entry_threads(&self) -> usize {
        self.entry_threads.load(Ordering::Acquire)
    }

    /// Everything written to the console so far.
    pub fn console_output(&self) -> String {
        lock(&self.console).clone()
    }

    fn deliver_interrupts(&self) {
        let (Some(cpu), Some(kernel)) = (CPU.with(Cell::get), self.kernel.get()) else {
            return;
        };
        // The global tick is counted by whichever CPU gets here first.
        for _ in 0..self.pending_ticks.swap(0, Ordering::AcqRel) {
            kernel.clock_tick();
        }
        let timer = self
            .timer_pending
            .get(cpu)
            .is_some_and(|pending| pending.swap(false, Ordering::AcqRel));
        if timer {
            kernel.timer_interrupt();
        }
    }
}

// SAFETY: `switch` parks the calling thread on its own baton and resumes the
// thread parked on the target's, passing the CPU number along; a context is
// resumed right after the `switch` call that saved it.
unsafe impl Arch for Hosted {
    type Context = HostedContext;
    type TrapFrame = HostedFrame;
    type Memory = HostedMemory;

    fn memory(&self) -> &HostedMemory {
        &self.memory
    }

    fn cpu_id(&self) -> usize {
        match CPU.with(Cell::get) {
            Some(cpu) => cpu,
            None => panic!("hosted: thread is not running on a cpu"),
        }
    }

    fn interrupts_enabled(&self) -> bool {
        INTERRUPTS.with(Cell::get)
    }

    fn enable_interrupts(&self) {
        INTERRUPTS.with(|i| i.set(true));
        self.deliver_interrupts();
    }

    fn disable_interrupts(&self) {
        INTERRUPTS.with(|i| i.set(false));
    }

    fn idle(&self) {
        thread::sleep(Duration::from_micros(100));
    }

    fn init_context(
        &self,
        context: &mut HostedContext,
        _stack_top: usize,
        entry: EntryPoint,
    ) -> Result<()> {
        let baton = Baton::new();
        let parked = baton.clone();
        self.entry_threads.fetch_add(1, Ordering::AcqRel);
        let alive = EntryThread(self.entry_threads.clone());
        thread::Builder::new()
            .name(String::from("entry"))
            .spawn(move || {
                let _alive = alive;
                let Wake::Run(cpu) = parked.park() else {
                    return;
                };
                drop(parked);
                bind_cpu(Some(cpu));
                INTERRUPTS.with(|i| i.set(false));
                let ended = panic::catch_unwind(AssertUnwindSafe(|| {
                    (entry.func)(entry.arg);
                }));
                if let Err(payload) = ended {
                    if !payload.is::<Retired>() {
                        panic::resume_unwind(payload);
                    }
                }
            })
            .map_err(|_| ProcError::ResourceExhausted)?;
        context.baton = Some(baton);
        Ok(())
    }

    unsafe fn switch(&self, from: *mut HostedContext, to: *const HostedContext) {
        // SAFETY: the caller guarantees both contexts are valid and ours to
        // use until the switch completes; neither is touched after `post`.
        let (own, next) = unsafe {
            let own = (*from).baton.get_or_insert_with(Baton::new).clone();
            let next = match &(*to).baton {
                Some(baton) => baton.clone(),
                None => panic!("hosted: switch to an unprepared context"),
            };
            (own, next)
        };
        next.post(Wake::Run(self.cpu_id()));
        drop(next);
        match own.park() {
            Wake::Run(cpu) => bind_cpu(Some(cpu)),
            Wake::Retire => {
                drop(own);
                retire()
            }
        }
    }

    fn set_return_value(frame: &mut HostedFrame, value: usize) {
        frame.ret = value;
    }

    fn prepare_thread(
        &self,
        frame: &mut HostedFrame,
        entry: usize,
        arg: usize,
        stack: StackRegion,
    ) -> Result<()> {
        let program = lock(&self.programs)
            .get(entry)
            .cloned()
            .ok_or(ProcError::InvalidArgument)?;
        frame.program = Some(program);
        frame.fork_child = None;
        frame.ret = 0;
        frame.arg = arg;
        frame.stack = Some(stack);
        frame.thread = true;
        Ok(())
    }

    fn enter_user(kernel: &'static Kernel<Hosted>, mut frame: HostedFrame) -> ! {
        let program = frame.fork_child.take().or_else(|| frame.program.clone());
        let user = UserProc {
            kernel,
            arg: frame.arg,
            ret: frame.ret,
        };
        let status = match program {
            Some(program) => program(&user),
            None => -1,
        };
        if frame.thread {
            user.thread_exit();
        }
        if user.getpid() == ProcessId::INIT {
            user.reap_forever();
        }
        user.exit(status)
    }

    fn console_write(&self, args: fmt::Arguments<'_>) {
        let _ = lock(&self.console).write_fmt(args);
    }
}

/// A running hosted kernel and its CPU threads.
pub struct Machine {
    kernel: &'static Kernel<Hosted>,
    cpus: Vec<JoinHandle<()>>,
}

impl Machine {
    pub fn kernel(&self) -> &'static Kernel<Hosted> {
        self.kernel
    }

    /// Halt the kernel and wait for every CPU to leave its scheduler loop.
    pub fn shutdown(self) {
        self.kernel.halt();
        for cpu in self.cpus {
            let _ = cpu.join();
        }
    }
}

fn decode(ret: isize) -> Result<usize> {
    if ret >= 0 {
        Ok(ret as usize)
    } else {
        Err(ProcError::from_errno(ret).unwrap_or(ProcError::InvalidArgument))
    }
}

/// User-mode view of a running entry.
pub struct UserProc {
    kernel: &'static Kernel<Hosted>,
    arg: usize,
    ret: usize,
}

impl UserProc {
    pub fn kernel(&self) -> &'static Kernel<Hosted> {
        self.kernel
    }

    /// Argument passed to a thread entry.
    pub fn arg(&self) -> usize {
        self.arg
    }

    /// Return register as this entry started (0 for a forked child).
    pub fn return_value(&self) -> usize {
        self.ret
    }

    fn finish(&self, ret: isize) -> Result<usize> {
        self.kernel.user_return();
        decode(ret)
    }

    fn set_fork_child(&self, program: Option<Program>) {
        let me = self.kernel.current_slot();
        // SAFETY: only the running entry writes its own trap frame.
        unsafe { (*self.kernel.slot(me).trapframe.get()).fork_child = program };
    }

    pub fn fork_with<F>(&self, child: F) -> Result<ProcessId>
    where
        F: Fn(&UserProc) -> i32 + Send + Sync + 'static,
    {
        self.set_fork_child(Some(Arc::new(child)));
        let ret = syscall::sys_fork(self.kernel);
        self.set_fork_child(None);
        self.finish(ret).map(|pid| ProcessId(pid as u32))
    }

    pub fn exit(&self, status: i32) -> ! {
        syscall::sys_exit(self.kernel, status)
    }

    pub fn wait(&self) -> Result<(ProcessId, i32)> {
        let mut status = 0;
        let ret = syscall::sys_wait(self.kernel, Some(&mut status));
        self.finish(ret).map(|pid| (ProcessId(pid as u32), status))
    }

    pub fn kill(&self, pid: ProcessId) -> Result<()> {
        let ret = syscall::sys_kill(self.kernel, pid.0 as isize);
        self.finish(ret).map(drop)
    }

    pub fn getpid(&self) -> ProcessId {
        let ret = syscall::sys_getpid(self.kernel);
        ProcessId(ret as u32)
    }

    pub fn sbrk(&self, delta: isize) -> Result<usize> {
        let ret = syscall::sys_sbrk(self.kernel, delta);
        self.finish(ret)
    }

    pub fn sleep(&self, ticks: isize) -> Result<()> {
        let ret = syscall::sys_sleep(self.kernel, ticks);
        self.finish(ret).map(drop)
    }

    pub fn uptime(&self) -> u64 {
        let ret = syscall::sys_uptime(self.kernel);
        self.kernel.user_return();
        ret as u64
    }

    pub fn yield_now(&self) {
        let ret = syscall::sys_yield(self.kernel);
        let _ = self.finish(ret);
    }

    /// Allocate a one-page stack with `sbrk` and start `f` as a thread on it.
    pub fn spawn_thread<F>(&self, f: F, arg: usize) -> Result<ProcessId>
    where
        F: Fn(&UserProc) -> i32 + Send + Sync + 'static,
    {
        let stack = self.sbrk(PAGE_SIZE as isize)?;
        let entry = self.kernel.arch().register(Arc::new(f));
        self.thread_create(entry, arg, stack)
    }

    pub fn thread_create(&self, entry: usize, arg: usize, stack: usize) -> Result<ProcessId> {
        let ret = syscall::sys_thread_create(self.kernel, entry, arg, stack);
        self.finish(ret).map(|tid| ProcessId(tid as u32))
    }

    pub fn thread_join(&self) -> Result<()> {
        let ret = syscall::sys_thread_join(self.kernel);
        self.finish(ret).map(drop)
    }

    pub fn thread_exit(&self) -> ! {
        syscall::sys_thread_exit(self.kernel)
    }

    pub fn set_burst_time(&self, burst: isize) -> Result<()> {
        let ret = syscall::sys_set_burst_time(self.kernel, burst);
        self.finish(ret).map(drop)
    }

    pub fn get_burst_time(&self) -> usize {
        let ret = syscall::sys_get_burst_time(self.kernel);
        self.finish(ret).unwrap_or(0)
    }

    pub fn getnumproc(&self) -> usize {
        let ret = syscall::sys_getnumproc(self.kernel);
        self.finish(ret).unwrap_or(0)
    }

    pub fn getmaxpid(&self) -> ProcessId {
        let ret = syscall::sys_getmaxpid(self.kernel);
        ProcessId(self.finish(ret).unwrap_or(0) as u32)
    }

    pub fn getprocinfo(&self, pid: ProcessId) -> Result<ProcInfo> {
        let mut info = ProcInfo::default();
        let ret = syscall::sys_getprocinfo(self.kernel, pid.0 as isize, &mut info);
        self.finish(ret).map(|_| info)
    }

    pub fn ps(&self) {
        let ret = syscall::sys_ps(self.kernel);
        let _ = self.finish(ret);
    }

    pub fn getyear(&self) -> isize {
        let ret = syscall::sys_getyear(self.kernel);
        self.kernel.user_return();
        ret
    }

    pub fn draw(&self, buf: &mut [u8]) -> Result<usize> {
        let ret = syscall::sys_draw(self.kernel, buf);
        self.finish(ret)
    }

    /// Store `bytes` at user address `addr`.
    pub fn write(&self, addr: usize, bytes: &[u8]) -> Result<()> {
        self.kernel.with_address_space(|space, size| {
            let end = addr.checked_add(bytes.len()).filter(|&end| end <= size);
            match end {
                Some(end) => {
                    space[addr..end].copy_from_slice(bytes);
                    Ok(())
                }
                None => Err(ProcError::InvalidArgument),
            }
        })?
    }

    /// Load `len` bytes from user address `addr`.
    pub fn read(&self, addr: usize, len: usize) -> Result<Vec<u8>> {
        self.kernel.with_address_space(|space, size| {
            match addr.checked_add(len).filter(|&end| end <= size) {
                Some(end) => Ok(space[addr..end].to_vec()),
                None => Err(ProcError::InvalidArgument),
            }
        })?
    }

    /// What init does once its program is done: reap orphans forever.
    fn reap_forever(&self) -> ! {
        loop {
            if self.kernel.wait().is_err() {
                let _ = self.kernel.sleep_ticks(1);
            }
        }
    }
}
