//! Shared test harness: boot a hosted kernel, run a program as init and
//! collect what it reports.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::arch::hosted::{Hosted, Machine, UserProc};
use crate::config::{KernelConfig, PAGE_SIZE};

/// Largest address space a hosted process may grow to.
pub const MEMORY_LIMIT: usize = 16 * PAGE_SIZE;

/// Size of init's address space at boot.
pub const IMAGE_SIZE: usize = 4 * PAGE_SIZE;

const TIMEOUT: Duration = Duration::from_secs(10);

/// Sending half usable from any user program.
pub struct Reporter<T>(Arc<Mutex<Sender<T>>>);

impl<T> Clone for Reporter<T> {
    fn clone(&self) -> Self {
        Reporter(self.0.clone())
    }
}

impl<T: Send> Reporter<T> {
    pub fn send(&self, value: T) {
        let _ = self.0.lock().unwrap().send(value);
    }
}

pub fn reporter<T>() -> (Reporter<T>, Receiver<T>) {
    let (tx, rx) = mpsc::channel();
    (Reporter(Arc::new(Mutex::new(tx))), rx)
}

/// Ordered log of events written by several user programs.
#[derive(Clone, Default)]
pub struct Trace(Arc<Mutex<Vec<&'static str>>>);

impl Trace {
    pub fn push(&self, event: &'static str) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().clone()
    }
}

fn boot_with<T, F>(config: KernelConfig, program: F) -> (Machine, Receiver<T>)
where
    T: Send + 'static,
    F: Fn(&UserProc) -> T + Send + Sync + 'static,
{
    let (tx, rx) = reporter();
    let init = Arc::new(move |p: &UserProc| {
        tx.send(program(p));
        0
    });
    let machine = Hosted::boot(config, MEMORY_LIMIT, IMAGE_SIZE, init).expect("boot");
    (machine, rx)
}

/// Run `program` as init and return its result.
pub fn run_init<T, F>(config: KernelConfig, program: F) -> T
where
    T: Send + 'static,
    F: Fn(&UserProc) -> T + Send + Sync + 'static,
{
    let (machine, rx) = boot_with(config, program);
    let result = rx.recv_timeout(TIMEOUT).expect("init program did not finish");
    machine.shutdown();
    result
}

/// Like [`run_init`], with the timer firing every millisecond meanwhile.
pub fn run_init_ticking<T, F>(config: KernelConfig, program: F) -> T
where
    T: Send + 'static,
    F: Fn(&UserProc) -> T + Send + Sync + 'static,
{
    let (machine, rx) = boot_with(config, program);
    let deadline = Instant::now() + TIMEOUT;
    let result = loop {
        machine.kernel().arch().raise_timer();
        match rx.recv_timeout(Duration::from_millis(1)) {
            Ok(result) => break result,
            Err(RecvTimeoutError::Timeout) if Instant::now() < deadline => continue,
            Err(err) => panic!("init program did not finish: {}", err),
        }
    };
    machine.shutdown();
    result
}

/// Yield until `pid` is asleep.
pub fn wait_until_sleeping(p: &UserProc, pid: crate::ProcessId) {
    loop {
        match p.getprocinfo(pid) {
            Ok(info) if info.state == crate::ProcessState::Sleeping => return,
            _ => p.yield_now(),
        }
    }
}
