use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, trace, warn};

use crate::StreamId;

const WORKER_NAME: &str = "stash-write-behind";

type Job = Box<dyn FnOnce() + Send>;

enum Command {
    Schedule {
        stream: StreamId,
        due: Instant,
        job: Job,
    },
    Flush(Sender<()>),
}

/// Debounced, fire-and-forget executor for deferred backend writes.
///
/// A job scheduled for a stream replaces that stream's pending job and
/// restarts its delay, so rapid successive mutations collapse into one write
/// of the last value. Jobs run in due order on a single worker thread that is
/// started on first use and exits, after running what is pending, once every
/// handle is dropped. A zero delay runs jobs inline.
#[derive(Clone)]
pub struct WriteBehind {
    delay: Duration,
    sender: Arc<OnceLock<Sender<Command>>>,
}

impl WriteBehind {
    /// Creates an executor that delays every job by `delay`.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            sender: Arc::new(OnceLock::new()),
        }
    }

    /// The debounce delay.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedules `job` to run once `stream` has been quiet for the delay.
    pub fn schedule<F>(&self, stream: StreamId, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.delay.is_zero() {
            job();
            return;
        }

        let command = Command::Schedule {
            stream,
            due: Instant::now() + self.delay,
            job: Box::new(job),
        };

        // Without a worker the write still has to happen.
        if let Err(flume::SendError(Command::Schedule { job, .. })) = self.sender().send(command) {
            job();
        }
    }

    /// Runs every pending job now and waits for them to finish.
    pub fn flush(&self) {
        let Some(sender) = self.sender.get() else {
            return;
        };

        let (ack, done) = flume::bounded(1);
        if sender.send(Command::Flush(ack)).is_ok() {
            let _ = done.recv();
        }
    }

    fn sender(&self) -> &Sender<Command> {
        self.sender.get_or_init(|| {
            let (sender, receiver) = flume::unbounded();
            let spawned = thread::Builder::new()
                .name(WORKER_NAME.to_string())
                .spawn(move || run(&receiver));
            if let Err(error) = spawned {
                warn!(%error, "failed to start write-behind worker, writing inline");
            }
            sender
        })
    }
}

impl Debug for WriteBehind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteBehind")
            .field("delay", &self.delay)
            .field("started", &self.sender.get().is_some())
            .finish()
    }
}

fn run(receiver: &Receiver<Command>) {
    debug!("write-behind worker started");
    let mut pending: HashMap<StreamId, (Instant, Job)> = HashMap::new();

    loop {
        let next_due = pending.values().map(|(due, _)| *due).min();
        let received = match next_due {
            Some(due) => receiver.recv_deadline(due),
            None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match received {
            Ok(Command::Schedule { stream, due, job }) => {
                trace!(%stream, "write scheduled");
                pending.insert(stream, (due, job));
            }
            Ok(Command::Flush(ack)) => {
                run_jobs(&mut pending, None);
                let _ = ack.send(());
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                run_jobs(&mut pending, None);
                debug!("write-behind worker stopped");
                return;
            }
        }

        run_jobs(&mut pending, Some(Instant::now()));
    }
}

/// Runs, in due order, every job due by `now` (or every job when `None`).
fn run_jobs(pending: &mut HashMap<StreamId, (Instant, Job)>, now: Option<Instant>) {
    let mut due: Vec<(Instant, StreamId)> = pending
        .iter()
        .filter(|(_, (due, _))| now.is_none_or(|now| *due <= now))
        .map(|(stream, (due, _))| (*due, *stream))
        .collect();
    due.sort_unstable();

    for (_, stream) in due {
        if let Some((_, job)) = pending.remove(&stream) {
            job();
        }
    }
}
