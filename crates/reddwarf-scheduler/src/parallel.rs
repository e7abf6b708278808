//! Bounded fan-out of per-node work onto scoped worker threads

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Default number of workers used for per-node work
pub const DEFAULT_PARALLELISM: usize = 16;

/// Run `work(i)` for every `i` in `0..pieces` on at most `workers` threads.
///
/// Workers claim pieces from a shared atomic counter. Returns only after
/// every worker has finished.
pub fn parallelize<F>(workers: usize, pieces: usize, work: F)
where
    F: Fn(usize) + Sync,
{
    let never = AtomicBool::new(false);
    parallelize_until(workers, pieces, &never, work);
}

/// Like [`parallelize`], but no new piece is started once `stop` is set.
/// Pieces already running are not interrupted.
pub fn parallelize_until<F>(workers: usize, pieces: usize, stop: &AtomicBool, work: F)
where
    F: Fn(usize) + Sync,
{
    if pieces == 0 {
        return;
    }

    let next = AtomicUsize::new(0);
    let worker = || loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let piece = next.fetch_add(1, Ordering::SeqCst);
        if piece >= pieces {
            break;
        }
        work(piece);
    };

    let workers = workers.clamp(1, pieces);
    if workers == 1 {
        worker();
        return;
    }

    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(worker);
        }
    });
}

/// Compute `work(i)` for every `i` in `0..pieces` in parallel, returning the
/// results in piece order
pub fn parallel_map<T, F>(workers: usize, pieces: usize, work: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync,
{
    let slots: Vec<Mutex<Option<T>>> = (0..pieces).map(|_| Mutex::new(None)).collect();
    parallelize(workers, pieces, |i| {
        *slots[i].lock() = Some(work(i));
    });
    slots
        .into_iter()
        .filter_map(|slot| slot.into_inner())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_parallelize_visits_every_piece_once() {
        let seen = Mutex::new(Vec::new());
        parallelize(DEFAULT_PARALLELISM, 100, |i| seen.lock().push(i));

        let seen = seen.into_inner();
        assert_eq!(seen.len(), 100);
        let unique: HashSet<usize> = seen.into_iter().collect();
        assert_eq!(unique.len(), 100);
    }

    #[test]
    fn test_parallelize_no_pieces() {
        parallelize(4, 0, |_| panic!("no work expected"));
    }

    #[test]
    fn test_parallelize_until_stops() {
        let stop = AtomicBool::new(false);
        let done = AtomicUsize::new(0);
        parallelize_until(1, 50, &stop, |i| {
            done.fetch_add(1, Ordering::SeqCst);
            if i == 9 {
                stop.store(true, Ordering::SeqCst);
            }
        });
        assert_eq!(done.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_parallel_map_keeps_order() {
        let squares = parallel_map(8, 20, |i| i * i);
        assert_eq!(squares, (0..20).map(|i| i * i).collect::<Vec<_>>());
    }
}
