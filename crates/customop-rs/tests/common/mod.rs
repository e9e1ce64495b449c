#![allow(dead_code)]

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use customop_rs::{Device, OpContext, TaskError};

pub const TIMEOUT: Duration = Duration::from_secs(10);

pub type Completion = Result<(), TaskError>;

pub fn completion_channel() -> (Sender<Completion>, Receiver<Completion>) {
    mpsc::channel()
}

/// Context whose completion signal forwards into `tx`.
pub fn context(tx: &Sender<Completion>) -> OpContext {
    let tx = tx.clone();
    OpContext::new(Device::Cpu, move |result| {
        let _ = tx.send(result);
    })
}

/// Context whose completion signal is never expected to fire.
pub fn unreachable_context() -> OpContext {
    OpContext::new(Device::Cpu, |_| panic!("completion fired unexpectedly"))
}

pub fn recv(rx: &Receiver<Completion>) -> Completion {
    rx.recv_timeout(TIMEOUT).expect("task did not complete in time")
}

/// Polls `cond` until it holds or the timeout expires.
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}

/// One-shot latch that blocking tasks wait on.
#[derive(Clone, Default)]
pub struct Gate {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        let (open, cv) = &*self.inner;
        *open.lock().unwrap() = true;
        cv.notify_all();
    }

    pub fn wait(&self) {
        let (open, cv) = &*self.inner;
        let mut guard = open.lock().unwrap();
        while !*guard {
            guard = cv.wait(guard).unwrap();
        }
    }
}

/// What a downstream scheduler observed for one finalize job.
#[derive(Debug, Clone)]
pub struct PushedJob {
    pub device: customop_rs::Device,
    pub const_vars: Vec<customop_rs::VarHandle>,
    pub mutable_vars: Vec<customop_rs::VarHandle>,
    pub name: &'static str,
    /// Flags in effect on the submitting worker when the job was handed over.
    pub worker_flags: customop_rs::ExecFlags,
}

/// Downstream scheduler that records every handoff and either runs jobs at once or holds them.
#[derive(Default)]
pub struct RecordingEngine {
    deferred: bool,
    pushed: Mutex<Vec<PushedJob>>,
    held: Mutex<Vec<customop_rs::engine::FinalizeJob>>,
}

impl RecordingEngine {
    pub fn inline() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn deferred() -> Arc<Self> {
        Arc::new(RecordingEngine {
            deferred: true,
            ..Self::default()
        })
    }

    pub fn pushed(&self) -> Vec<PushedJob> {
        self.pushed.lock().unwrap().clone()
    }

    /// Runs every held job on the calling thread and returns how many ran.
    pub fn run_held(&self) -> usize {
        let jobs: Vec<_> = self.held.lock().unwrap().drain(..).collect();
        let count = jobs.len();
        for job in jobs {
            job();
        }
        count
    }
}

impl customop_rs::DownstreamEngine for RecordingEngine {
    fn push_sync(
        &self,
        job: customop_rs::engine::FinalizeJob,
        device: customop_rs::Device,
        const_vars: Vec<customop_rs::VarHandle>,
        mutable_vars: Vec<customop_rs::VarHandle>,
        name: &'static str,
    ) {
        self.pushed.lock().unwrap().push(PushedJob {
            device,
            const_vars,
            mutable_vars,
            name,
            worker_flags: customop_rs::ExecFlags::current(),
        });
        if self.deferred {
            self.held.lock().unwrap().push(job);
        } else {
            job();
        }
    }
}
