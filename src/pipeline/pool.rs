// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bounded worker pool for blocking storage and crypto work.
//!
//! Jobs run on tokio's blocking threads with at most `width` in flight.
//! Results come back in input order regardless of completion order. Every
//! exit path waits for in-flight jobs, so no job outlives the call that
//! started it.

use std::sync::Arc;

use tokio::task::{JoinError, JoinSet};

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("worker task cancelled")]
    Cancelled,

    #[error("worker task panicked: {0}")]
    Panicked(String),
}

impl From<JoinError> for PoolError {
    fn from(e: JoinError) -> Self {
        if e.is_panic() {
            PoolError::Panicked(e.to_string())
        } else {
            PoolError::Cancelled
        }
    }
}

/// Run one blocking call off the async threads.
pub async fn run_blocking<R, F>(call: F) -> Result<R, PoolError>
where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
{
    Ok(tokio::task::spawn_blocking(call).await?)
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    width: usize,
}

impl WorkerPool {
    pub fn new(width: usize) -> Self {
        Self {
            width: width.max(1),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Run `job` over every item.
    pub async fn map<T, R, F>(&self, items: Vec<T>, job: F) -> Result<Vec<R>, PoolError>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        self.try_map(items, move |item| Ok::<R, PoolError>(job(item)))
            .await
    }

    /// Run `job` over every item, stopping at the first error.
    ///
    /// After a failure no further items are started; jobs already running
    /// are waited for and their results discarded.
    pub async fn try_map<T, R, E, F>(&self, items: Vec<T>, job: F) -> Result<Vec<R>, E>
    where
        T: Send + 'static,
        R: Send + 'static,
        E: From<PoolError> + Send + 'static,
        F: Fn(T) -> Result<R, E> + Send + Sync + 'static,
    {
        let job = Arc::new(job);
        let mut results: Vec<Option<R>> = std::iter::repeat_with(|| None).take(items.len()).collect();
        let mut queue = items.into_iter().enumerate();
        let mut tasks: JoinSet<(usize, Result<R, E>)> = JoinSet::new();

        loop {
            while tasks.len() < self.width {
                let Some((index, item)) = queue.next() else {
                    break;
                };
                let job = Arc::clone(&job);
                tasks.spawn_blocking(move || (index, job(item)));
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let failure = match joined {
                Ok((index, Ok(value))) => {
                    results[index] = Some(value);
                    continue;
                }
                Ok((_, Err(e))) => e,
                Err(e) => E::from(PoolError::from(e)),
            };

            tasks.shutdown().await;
            return Err(failure);
        }

        Ok(results.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn results_keep_input_order() {
        let pool = WorkerPool::new(4);
        let out = pool
            .map((0..20u64).collect(), |i| {
                std::thread::sleep(Duration::from_millis((20 - i) % 5));
                i * 2
            })
            .await
            .unwrap();
        assert_eq!(out, (0..20u64).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn in_flight_jobs_are_bounded() {
        let pool = WorkerPool::new(3);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (r, p) = (running.clone(), peak.clone());
        pool.map((0..12).collect(), move |_: i32| {
            let now = r.fetch_add(1, Ordering::SeqCst) + 1;
            p.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(5));
            r.fetch_sub(1, Ordering::SeqCst);
        })
        .await
        .unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(running.load(Ordering::SeqCst), 0);
    }

    #[derive(Debug)]
    enum JobError {
        Bad(i32),
        Pool,
    }

    impl From<PoolError> for JobError {
        fn from(_: PoolError) -> Self {
            JobError::Pool
        }
    }

    #[tokio::test]
    async fn first_error_stops_the_run() {
        let pool = WorkerPool::new(1);
        let started = Arc::new(AtomicUsize::new(0));
        let s = started.clone();
        let result = pool
            .try_map((0..10).collect(), move |i: i32| {
                s.fetch_add(1, Ordering::SeqCst);
                if i == 2 {
                    Err(JobError::Bad(i))
                } else {
                    Ok(i)
                }
            })
            .await;

        assert!(matches!(result, Err(JobError::Bad(2))));
        assert_eq!(started.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn panics_become_pool_errors() {
        let pool = WorkerPool::new(2);
        let result = pool
            .try_map(vec![1, 2], |i: i32| -> Result<i32, JobError> {
                if i == 2 {
                    panic!("boom");
                }
                Ok(i)
            })
            .await;
        assert!(matches!(result, Err(JobError::Pool)));
    }

    #[tokio::test]
    async fn empty_input() {
        let out = WorkerPool::new(0).map(Vec::<u8>::new(), |b| b).await.unwrap();
        assert!(out.is_empty());
    }
}
