//! Deferred release queue
//!
//! Disposal that starts on an engine callback thread must not delete the
//! engine resource from inside the callback. The final release step is
//! handed to a single `rtc-release` worker instead, which runs jobs in FIFO
//! order, so children queued before their parent are also released first.

use crossbeam::channel::{self, Sender};
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::OnceLock;
use std::thread;
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send>;

enum Message {
    Run(Job),
    Flush(Sender<()>),
}

static QUEUE: OnceLock<Option<Sender<Message>>> = OnceLock::new();

thread_local! {
    static ON_WORKER: Cell<bool> = const { Cell::new(false) };
}

fn queue() -> Option<&'static Sender<Message>> {
    QUEUE
        .get_or_init(|| {
            let (sender, receiver) = channel::unbounded::<Message>();
            let spawned = thread::Builder::new()
                .name("rtc-release".to_owned())
                .spawn(move || {
                    ON_WORKER.with(|flag| flag.set(true));
                    debug!("Release worker started");
                    for message in receiver {
                        match message {
                            Message::Run(job) => {
                                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                                    error!("Deferred release job panicked");
                                }
                            }
                            Message::Flush(done) => {
                                let _ = done.send(());
                            }
                        }
                    }
                });
            match spawned {
                Ok(_) => Some(sender),
                Err(e) => {
                    error!(error = %e, "Failed to start release worker, releasing inline");
                    None
                }
            }
        })
        .as_ref()
}

/// Queues `job` on the release worker.
///
/// Falls back to running it inline when the worker is unavailable.
pub fn defer(job: impl FnOnce() + Send + 'static) {
    let job: Job = Box::new(job);
    match queue() {
        Some(sender) => {
            if let Err(rejected) = sender.send(Message::Run(job)) {
                if let Message::Run(job) = rejected.into_inner() {
                    job();
                }
            }
        }
        None => job(),
    }
}

/// Blocks until every job queued before this call has run.
///
/// Returns immediately when called from the worker itself.
pub fn flush() {
    if ON_WORKER.with(Cell::get) {
        return;
    }
    let Some(sender) = queue() else {
        return;
    };
    let (done, wait) = channel::bounded(1);
    if sender.send(Message::Flush(done)).is_ok() {
        let _ = wait.recv();
    }
}
