//! Concurrent partition counting.
//!
//! The calling thread acts as the dispatcher: it opens partitions lazily and hands them to a
//! bounded work queue consumed by one worker per thread-pool thread. Every worker counts into
//! its own map, so no map is ever shared. The first failure wins: it is stored once, the
//! cancellation is broadcast to all workers and the dispatcher, and every later failure is
//! dropped without blocking.

use std::any::Any;
use std::panic;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{bounded, select, Receiver, Sender};

use crate::boundary::Boundaries;
use crate::partition::PartitionReader;
use crate::record::{count_keys, CountMap, Format, Schema};
use crate::CountError;

/// State shared by the dispatcher and the workers of a single call.
struct JobState {
    /// Partitions not counted yet.
    pending: AtomicUsize,
    /// Set once by the first failure, never reset.
    cancelled: AtomicBool,
    /// Error reported to the caller.
    first_error: Mutex<Option<CountError>>,
    /// Dropping the sender disconnects every terminate receiver.
    terminate: Mutex<Option<Sender<()>>>,
    /// One-shot signal: all partitions counted or the first failure stored.
    finished: Sender<()>,
}

impl JobState {
    fn new(jobs: usize, terminate: Sender<()>, finished: Sender<()>) -> Self {
        JobState {
            pending: AtomicUsize::new(jobs),
            cancelled: AtomicBool::new(false),
            first_error: Mutex::new(None),
            terminate: Mutex::new(Some(terminate)),
            finished,
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn complete_job(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            log::debug!("all partitions counted");
            let _ = self.finished.try_send(());
        }
    }

    fn fail(&self, err: CountError) {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::warn!("error discarded after cancellation: {}", err);
            return;
        }

        log::debug!("cancelling outstanding partitions: {}", err);
        *lock(&self.first_error) = Some(err);
        self.broadcast();
        let _ = self.finished.try_send(());
    }

    fn broadcast(&self) {
        drop(lock(&self.terminate).take());
    }

    fn take_error(&self) -> Option<CountError> {
        lock(&self.first_error).take()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Counts every partition of `boundaries` on the thread pool.
/// Returns one map per pool thread, or the first error raised by any worker or the dispatcher.
///
/// # Arguments
/// * `thread_pool` - Pool whose threads run the workers
/// * `path` - Input file the partitions belong to
/// * `boundaries` - Partition boundaries of the input
/// * `schema` - Layout resolved from the header
/// * `format` - Row format
/// * `buf_size` - Partition read buffer size
pub(crate) fn count_partitions(
    thread_pool: &rayon::ThreadPool,
    path: &Path,
    boundaries: &Boundaries,
    schema: &Schema,
    format: &Format,
    buf_size: Option<usize>,
) -> Result<Vec<CountMap>, CountError> {
    let (result, dispatched) = run_job(thread_pool, path, boundaries, buf_size, |reader, counts, stop| {
        count_keys(reader, schema, format, counts, stop)
    });
    log::debug!("{} of {} partitions dispatched", dispatched, boundaries.len());

    return result;
}

/// Runs the dispatcher and the workers, `count` is applied to every partition handed off.
/// Also returns the number of partitions handed off to the workers.
fn run_job<F>(
    thread_pool: &rayon::ThreadPool,
    path: &Path,
    boundaries: &Boundaries,
    buf_size: Option<usize>,
    count: F,
) -> (Result<Vec<CountMap>, CountError>, usize)
where
    F: Fn(&mut PartitionReader, &mut CountMap, &dyn Fn() -> bool) -> Result<u64, CountError> + Sync,
{
    let workers = thread_pool.current_num_threads();
    let mut partials: Vec<CountMap> = (0..workers).map(|_| CountMap::new()).collect();
    if boundaries.is_empty() {
        return (Ok(partials), 0);
    }

    let (work_tx, work_rx) = bounded(workers);
    let (terminate_tx, terminate_rx) = bounded(0);
    let (finished_tx, finished_rx) = bounded(1);
    let state = JobState::new(boundaries.len(), terminate_tx, finished_tx);
    let mut dispatched = 0;

    log::debug!("dispatching {} partitions to {} workers", boundaries.len(), workers);

    thread_pool.in_place_scope(|scope| {
        for (id, counts) in partials.iter_mut().enumerate() {
            let work = work_rx.clone();
            let terminate = terminate_rx.clone();
            let state = &state;
            let count = &count;
            scope.spawn(move |_| run_worker(id, work, terminate, state, count, counts));
        }
        drop(work_rx);

        dispatched = dispatch(path, boundaries, buf_size, work_tx, &terminate_rx, &state);

        let _ = finished_rx.recv();
        // releases idle workers
        state.broadcast();
    });

    let result = match state.take_error() {
        Some(err) => Err(err),
        None => Ok(partials),
    };

    return (result, dispatched);
}

/// Opens partitions in order and hands them to the workers until all are sent or the job
/// is cancelled. Returns the number of partitions handed off.
fn dispatch(
    path: &Path,
    boundaries: &Boundaries,
    buf_size: Option<usize>,
    work: Sender<PartitionReader>,
    terminate: &Receiver<()>,
    state: &JobState,
) -> usize {
    let mut dispatched = 0;
    for partition in boundaries.partitions() {
        if state.is_cancelled() {
            break;
        }

        let reader = match PartitionReader::open(path, partition, buf_size) {
            Ok(reader) => reader,
            Err(err) => {
                state.fail(CountError::IO(err));
                break;
            }
        };

        // a reader that is not handed off is dropped, which closes it
        let handed_off = select! {
            send(work, reader) -> res => res.is_ok(),
            recv(terminate) -> _ => false,
        };
        if !handed_off {
            log::debug!("dispatcher stopped before partition {}", partition.index());
            break;
        }
        dispatched += 1;
    }

    return dispatched;
}

fn run_worker<F>(
    id: usize,
    work: Receiver<PartitionReader>,
    terminate: Receiver<()>,
    state: &JobState,
    count: &F,
    counts: &mut CountMap,
) where
    F: Fn(&mut PartitionReader, &mut CountMap, &dyn Fn() -> bool) -> Result<u64, CountError>,
{
    loop {
        let next = select! {
            recv(terminate) -> _ => None,
            recv(work) -> reader => reader.ok(),
        };
        let mut reader = match next {
            Some(reader) => reader,
            None => break,
        };

        if state.is_cancelled() {
            reader.close();
            break;
        }

        let index = reader.partition().index();
        let result = panic::catch_unwind(panic::AssertUnwindSafe(|| {
            count(&mut reader, counts, &|| state.is_cancelled())
        }));
        reader.close();

        match result {
            Ok(Ok(records)) if !state.is_cancelled() => {
                log::trace!("worker {} counted partition {} (records: {})", id, index, records);
                state.complete_job();
            }
            Ok(Ok(_)) => break,
            Ok(Err(err)) => {
                state.fail(err);
                break;
            }
            Err(payload) => {
                state.fail(CountError::WorkerPanic(panic_message(payload.as_ref())));
                break;
            }
        }
    }

    log::trace!("worker {} stopped", id);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".into()
    }
}
