//! Concurrent recognition dispatch
//!
//! Fans region jobs out to a fixed set of worker threads and collects the
//! results in detection order. Every job owns a preallocated result slot, so
//! ordering never depends on completion order. Each worker holds exactly one
//! model handle for its whole lifetime; no two jobs ever run on the same
//! handle at once.

use crossbeam_channel::unbounded;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, warn};

use crate::error::RegionError;

/// Per-region results, indexed by detection order
pub type RegionResults<T> = Vec<Result<T, RegionError>>;

#[derive(Debug, Clone, Copy)]
pub struct Orchestrator {
    workers: usize,
}

impl Orchestrator {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `task` once per job and return results in job order.
    ///
    /// Worker `w` owns `handles[w]`. A job that fails or panics only
    /// affects its own slot; a job no worker picked up stays
    /// [`RegionError::NotDispatched`].
    pub fn dispatch<J, T, H, F>(&self, jobs: &[J], handles: &[Mutex<H>], task: F) -> RegionResults<T>
    where
        J: Sync,
        T: Send,
        H: Send,
        F: Fn(&mut H, usize, &J) -> Result<T, RegionError> + Sync,
    {
        let mut slots: RegionResults<T> = (0..jobs.len())
            .map(|index| Err(RegionError::NotDispatched { index }))
            .collect();

        let worker_count = self.workers.min(handles.len()).min(jobs.len());
        if worker_count == 0 {
            if !jobs.is_empty() {
                warn!("No recognition handles available for {} regions", jobs.len());
            }
            return slots;
        }

        debug!("Dispatching {} regions to {} workers", jobs.len(), worker_count);

        let (tx, rx) = unbounded();
        for (index, slot) in slots.iter_mut().enumerate() {
            // the receiver is alive in this scope, so send cannot fail
            let _ = tx.send((index, slot));
        }
        drop(tx);

        let task = &task;
        std::thread::scope(|s| {
            for handle in &handles[..worker_count] {
                let rx = rx.clone();
                s.spawn(move || {
                    let mut model = handle.lock();
                    for (index, slot) in rx.iter() {
                        let outcome = catch_unwind(AssertUnwindSafe(|| task(&mut *model, index, &jobs[index])));
                        *slot = match outcome {
                            Ok(result) => result,
                            Err(payload) => {
                                let message = panic_message(payload.as_ref());
                                warn!("Region {} task panicked: {}", index, message);
                                Err(RegionError::Panicked { index, message })
                            }
                        };
                    }
                });
            }
        });
        drop(rx);

        slots
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    /// Counts concurrent users to catch shared handles
    #[derive(Default)]
    struct Handle {
        id: usize,
        in_use: AtomicUsize,
        jobs_run: usize,
    }

    fn handles(n: usize) -> Vec<Mutex<Handle>> {
        (0..n)
            .map(|id| Mutex::new(Handle { id, ..Default::default() }))
            .collect()
    }

    #[test]
    fn test_results_follow_job_order_not_completion_order() {
        let jobs: Vec<u64> = vec![60, 0, 5, 0, 20, 1, 0, 0];
        let pool = handles(4);

        let results = Orchestrator::new(4).dispatch(&jobs, &pool, |_, index, delay| {
            thread::sleep(Duration::from_millis(*delay));
            Ok(format!("r{}", index))
        });

        let labels: Vec<String> = results.into_iter().map(|r| r.unwrap()).collect();
        let expected: Vec<String> = (0..jobs.len()).map(|i| format!("r{}", i)).collect();
        assert_eq!(labels, expected);
    }

    #[test]
    fn test_error_and_panic_are_isolated() {
        let jobs: Vec<usize> = (0..6).collect();
        let pool = handles(3);

        let results = Orchestrator::new(3).dispatch(&jobs, &pool, |_, index, job| {
            match *job {
                2 => Err(RegionError::Recognition {
                    index,
                    message: "bad tensor".to_string(),
                }),
                4 => panic!("model blew up"),
                n => Ok(n * 10),
            }
        });

        assert_eq!(results.len(), 6);
        assert_eq!(results[0], Ok(0));
        assert_eq!(results[1], Ok(10));
        assert!(matches!(results[2], Err(RegionError::Recognition { index: 2, .. })));
        assert_eq!(results[3], Ok(30));
        match &results[4] {
            Err(RegionError::Panicked { index, message }) => {
                assert_eq!(*index, 4);
                assert!(message.contains("model blew up"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(results[5], Ok(50));
    }

    #[test]
    fn test_handles_are_never_shared() {
        let jobs: Vec<usize> = (0..40).collect();
        let pool = handles(3);
        let violations = AtomicUsize::new(0);

        let results = Orchestrator::new(8).dispatch(&jobs, &pool, |handle, _, _| {
            if handle.in_use.fetch_add(1, Ordering::SeqCst) != 0 {
                violations.fetch_add(1, Ordering::SeqCst);
            }
            handle.jobs_run += 1;
            thread::sleep(Duration::from_millis(1));
            handle.in_use.fetch_sub(1, Ordering::SeqCst);
            Ok(handle.id)
        });

        assert_eq!(violations.load(Ordering::SeqCst), 0);
        let used: HashSet<usize> = results.iter().map(|r| *r.as_ref().unwrap()).collect();
        assert!(used.iter().all(|id| *id < 3));
        let total: usize = pool.iter().map(|h| h.lock().jobs_run).sum();
        assert_eq!(total, 40);
    }

    #[test]
    fn test_fewer_jobs_than_workers() {
        let jobs = vec!["only"];
        let pool = handles(4);

        let results = Orchestrator::new(4).dispatch(&jobs, &pool, |_, _, job| Ok(job.len()));
        assert_eq!(results, vec![Ok(4)]);
    }

    #[test]
    fn test_no_jobs_and_no_handles() {
        let empty: Vec<u8> = Vec::new();
        let results = Orchestrator::new(2).dispatch(&empty, &handles(2), |_, _, _| Ok(()));
        assert!(results.is_empty());

        let jobs = vec![1u8, 2];
        let none: Vec<Mutex<Handle>> = Vec::new();
        let results = Orchestrator::new(2).dispatch(&jobs, &none, |_, _, _| Ok(()));
        assert_eq!(
            results,
            vec![
                Err(RegionError::NotDispatched { index: 0 }),
                Err(RegionError::NotDispatched { index: 1 }),
            ]
        );
    }

    #[test]
    fn test_single_worker_runs_everything_in_order() {
        let jobs: Vec<usize> = (0..5).collect();
        let pool = handles(1);
        let order = Mutex::new(Vec::new());

        Orchestrator::new(1).dispatch(&jobs, &pool, |_, index, _| {
            order.lock().push(index);
            Ok(())
        });

        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_boxed_trait_object_handles() {
        trait Scale: Send {
            fn apply(&mut self, value: usize) -> usize;
        }
        struct Times(usize);
        impl Scale for Times {
            fn apply(&mut self, value: usize) -> usize {
                value * self.0
            }
        }

        let pool: Vec<Mutex<Box<dyn Scale>>> = vec![
            Mutex::new(Box::new(Times(10))),
            Mutex::new(Box::new(Times(10))),
        ];
        let jobs: Vec<usize> = (1..=4).collect();

        let results = Orchestrator::new(2).dispatch(&jobs, &pool, |model, _, job| Ok(model.apply(*job)));
        let values: Vec<usize> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![10, 20, 30, 40]);
    }
}
