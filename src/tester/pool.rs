//! Bounded worker pool with shared cancellation

use crossbeam_channel::bounded;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SchemaError};

/// Why a unit of work ended a run early
pub(crate) enum Halt {
    /// Stop-on-first-error was triggered; never reported to callers
    Stop,
    /// An infrastructure failure
    Failed(SchemaError),
}

impl From<SchemaError> for Halt {
    fn from(err: SchemaError) -> Self {
        Halt::Failed(err)
    }
}

/// Feed `items` to `workers` threads running `work`.
///
/// The first [`Halt`] from a worker (or error from `items`) is latched and
/// cancels a child of `parent` shared by the whole run; the producer and all
/// workers observe it at their next iteration. Returns only after every
/// worker has finished.
pub(crate) fn run_pool<T, I, F>(
    parent: &CancellationToken,
    workers: usize,
    items: I,
    work: F,
) -> std::result::Result<(), Halt>
where
    T: Send,
    I: IntoIterator<Item = Result<T>>,
    F: Fn(&CancellationToken, T) -> std::result::Result<(), Halt> + Sync,
{
    let scope = parent.child_token();
    let first: Mutex<Option<Halt>> = Mutex::new(None);
    let latch = |halt: Halt| {
        let mut slot = first.lock();
        if slot.is_none() {
            *slot = Some(halt);
            scope.cancel();
        }
    };

    let (tx, rx) = bounded::<T>(workers.max(1));
    let (scope_ref, work, latch) = (&scope, &work, &latch);

    std::thread::scope(|s| {
        for _ in 0..workers.max(1) {
            let rx = rx.clone();
            s.spawn(move || {
                // Keep draining after cancellation so the producer never blocks.
                for item in rx.iter() {
                    if scope_ref.is_cancelled() {
                        continue;
                    }
                    if let Err(halt) = work(scope_ref, item) {
                        latch(halt);
                    }
                }
            });
        }
        drop(rx);

        for item in items {
            if scope_ref.is_cancelled() {
                break;
            }
            match item {
                Ok(item) => {
                    if tx.send(item).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    latch(Halt::Failed(err));
                    break;
                }
            }
        }
        drop(tx);
    });

    match first.into_inner() {
        Some(halt) => Err(halt),
        None => Ok(()),
    }
}
