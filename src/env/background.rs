use crate::Result;
use crossbeam_channel::Sender;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;
use std::thread::JoinHandle;

pub type Job = Box<dyn FnOnce() + Send>;

const THREAD_NAME: &str = "kvstone-background";

/// Single worker thread fed through an unbounded channel.
///
/// The thread is started by the first `schedule` call and exits once the scheduler is
/// dropped and the queued jobs have run.
#[derive(Default)]
pub struct BackgroundScheduler {
    worker: Mutex<Option<Worker>>,
}

struct Worker {
    sender: Sender<Job>,
    handle: JoinHandle<()>,
}

impl BackgroundScheduler {
    pub fn schedule(&self, job: Job) -> Result<()> {
        let mut worker = self.worker.lock().unwrap();
        if worker.is_none() {
            *worker = Some(Self::start()?);
        }
        match worker.as_ref() {
            Some(w) => w.sender.send(job)?,
            None => unreachable!(),
        }
        Ok(())
    }

    fn start() -> Result<Worker> {
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        let handle = std::thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                info!("thread `{}` start!", THREAD_NAME);
                while let Ok(job) = receiver.recv() {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!("background job panicked on thread `{}`", THREAD_NAME);
                    }
                }
                info!("thread `{}` exit!", THREAD_NAME);
            })?;
        Ok(Worker { sender, handle })
    }
}

impl Drop for BackgroundScheduler {
    fn drop(&mut self) {
        let worker = match self.worker.get_mut() {
            Ok(worker) => worker.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(Worker { sender, handle }) = worker {
            drop(sender);
            if handle.join().is_err() {
                error!("thread `{}` panicked", THREAD_NAME);
            }
        }
    }
}
