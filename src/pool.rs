//! Bounded worker pool over a slice: each worker claims the next index from
//! a shared counter until the slice is exhausted.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

/// Upper bound on concurrent workers regardless of core count.
pub const MAX_WORKERS: usize = 8;

/// Returns the number of available CPU cores.
pub fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Worker count for `items` tasks: the requested count (or the core count
/// capped at `MAX_WORKERS`), never more than the tasks and never zero.
pub fn worker_count(requested: Option<usize>, items: usize) -> usize {
    requested
        .unwrap_or_else(|| default_jobs().min(MAX_WORKERS))
        .min(items)
        .max(1)
}

/// Run `task` once for every element. Each element is owned by exactly one
/// worker while its task runs; results are written in place so order is kept.
pub fn for_each_mut<T, F>(items: &mut [T], workers: usize, task: F)
where
    T: Send,
    F: Fn(usize, &mut T) + Sync,
{
    if workers <= 1 || items.len() <= 1 {
        for (index, item) in items.iter_mut().enumerate() {
            task(index, item);
        }
        return;
    }

    let slots: Vec<Mutex<&mut T>> = items.iter_mut().map(Mutex::new).collect();
    let next_index = AtomicUsize::new(0);
    std::thread::scope(|scope| {
        for _ in 0..workers.min(slots.len()) {
            scope.spawn(|| loop {
                let index = next_index.fetch_add(1, Ordering::SeqCst);
                if index >= slots.len() {
                    break;
                }
                let mut slot = slots[index].lock();
                task(index, &mut **slot);
            });
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_count_bounds() {
        assert_eq!(worker_count(Some(4), 2), 2);
        assert_eq!(worker_count(Some(0), 5), 1);
        assert_eq!(worker_count(Some(3), 10), 3);
        assert!(worker_count(None, 100) <= MAX_WORKERS);
        assert_eq!(worker_count(None, 0), 1);
    }

    #[test]
    fn test_every_item_visited_once_in_place() {
        let mut items: Vec<usize> = vec![0; 257];
        for_each_mut(&mut items, 4, |index, item| *item += index * 2);
        for (i, v) in items.iter().enumerate() {
            assert_eq!(*v, i * 2);
        }
    }

    #[test]
    fn test_single_worker_runs_inline() {
        let mut items = vec![String::new(); 3];
        for_each_mut(&mut items, 1, |index, item| item.push_str(&index.to_string()));
        assert_eq!(items, vec!["0", "1", "2"]);
    }
}
