// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::any::type_name;
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

use async_channel::TrySendError;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, trace, warn};

use crate::service::Shutdown;

/// Handler trait for processing tasks
pub trait PoolHandler<T>: Clone + Send + 'static + Sync {
    /// Handle the task
    fn handle(&self, task: T) -> impl Future<Output = ()> + Send;
}

/// Worker Pool Config Parameters
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Queue Capacity
    pub channel_capacity: usize,
    /// Worker Number
    pub num_workers: usize,
    /// Monitor Interval
    pub monitor_interval: Duration,
    /// Worker Check Timeout param
    pub worker_check_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            num_workers: 100,
            monitor_interval: Duration::from_secs(5),
            worker_check_timeout: Duration::from_millis(200),
        }
    }
}

/// A fixed set of workers sharing one bounded task queue.
///
/// Any idle worker takes the next task, so tasks are not ordered relative to
/// each other. A monitor task restarts workers that panicked. Workers and
/// the monitor stop when `notify_shutdown` fires.
#[derive(Debug)]
pub struct WorkerPool<T> {
    sender: async_channel::Sender<T>,
}

/// represent a running worker
#[derive(Debug)]
struct Worker {
    id: usize,
    handle: JoinHandle<()>,
}

impl<T: Send + Debug + 'static> WorkerPool<T> {
    pub fn new<H: PoolHandler<T>>(
        notify_shutdown: broadcast::Sender<()>,
        handler: H,
        config: WorkerPoolConfig,
    ) -> Self {
        let (sender, receiver) = async_channel::bounded(config.channel_capacity);

        let workers = (0..config.num_workers)
            .map(|id| {
                Self::spawn_worker(
                    id,
                    handler.clone(),
                    notify_shutdown.clone(),
                    receiver.clone(),
                )
            })
            .collect();
        Self::spawn_monitor(workers, receiver, notify_shutdown, handler, config);

        Self { sender }
    }

    /// Queue a task without waiting. A full queue hands the task back.
    pub fn try_send(&self, task: T) -> Result<(), TrySendError<T>> {
        self.sender.try_send(task)
    }

    /// Queue a task, waiting for room.
    pub async fn send(&self, task: T) -> Result<(), async_channel::SendError<T>> {
        self.sender.send(task).await
    }

    /// Tasks waiting for a worker.
    pub fn queued(&self) -> usize {
        self.sender.len()
    }

    fn spawn_worker<H: PoolHandler<T>>(
        id: usize,
        handler: H,
        notify_shutdown: broadcast::Sender<()>,
        receiver: async_channel::Receiver<T>,
    ) -> Worker {
        let mut shutdown = Shutdown::new(notify_shutdown.subscribe());

        let handle = tokio::spawn(async move {
            trace!("Worker {id} started");

            loop {
                tokio::select! {
                    Ok(task) = receiver.recv() => {
                        handler.handle(task).await;
                    }
                    _ = shutdown.recv() => {
                        trace!("Worker {id} shutting down");
                        break;
                    }
                }
            }
        });

        Worker { id, handle }
    }

    fn spawn_monitor<H: PoolHandler<T>>(
        mut workers: Vec<Worker>,
        receiver: async_channel::Receiver<T>,
        notify_shutdown: broadcast::Sender<()>,
        handler: H,
        config: WorkerPoolConfig,
    ) {
        tokio::spawn(async move {
            let mut interval = time::interval(config.monitor_interval);
            let mut shutdown = Shutdown::new(notify_shutdown.subscribe());

            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        debug!("Worker monitor received shutdown signal");
                        break;
                    }
                    _ = interval.tick() => {
                        for worker in &mut workers {
                            if !worker.handle.is_finished() {
                                continue;
                            }
                            match time::timeout(config.worker_check_timeout, &mut worker.handle).await {
                                Ok(Ok(())) => {
                                    warn!("Worker {} completed unexpectedly", worker.id);
                                }
                                Ok(Err(err)) => {
                                    if err.is_panic() {
                                        Self::log_worker_panic(worker.id, err);
                                    } else {
                                        error!("Worker {} failed with non-panic error", worker.id);
                                    }
                                }
                                Err(_) => {
                                    trace!("Worker {} is running", worker.id);
                                    continue;
                                }
                            }

                            warn!("Worker {} failed, restarting...", worker.id);
                            *worker = Self::spawn_worker(
                                worker.id,
                                handler.clone(),
                                notify_shutdown.clone(),
                                receiver.clone(),
                            );
                            debug!("Worker {} restarted", worker.id);
                        }
                    }
                }
            }
            debug!("Worker monitor exiting");
        });
    }

    fn log_worker_panic(worker_id: usize, err: tokio::task::JoinError) {
        let payload = err.into_panic();
        if let Some(message) = payload.downcast_ref::<&'static str>() {
            error!("Worker {worker_id} panicked with message: {message}");
        } else if let Some(message) = payload.downcast_ref::<String>() {
            error!("Worker {worker_id} panicked with message: {message}");
        } else {
            error!(
                "Worker {worker_id} panicked with an unknown type: {}",
                get_type_name(&payload)
            );
        }
    }
}

#[inline]
fn get_type_name<R>(_: &R) -> &'static str {
    type_name::<R>()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
    use std::sync::Arc;

    use tokio::sync::Notify;

    use super::*;

    #[derive(Clone)]
    struct SumHandler {
        counter: Arc<AtomicI32>,
    }

    impl PoolHandler<i32> for SumHandler {
        fn handle(&self, task: i32) -> impl Future<Output = ()> + Send {
            let counter = self.counter.clone();
            async move {
                counter.fetch_add(task, Ordering::SeqCst);
            }
        }
    }

    fn test_config(channel_capacity: usize, num_workers: usize) -> WorkerPoolConfig {
        WorkerPoolConfig {
            channel_capacity,
            num_workers,
            monitor_interval: Duration::from_millis(50),
            worker_check_timeout: Duration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn test_worker_pool() {
        let (notify_shutdown, _) = broadcast::channel(1);
        let handler = SumHandler {
            counter: Arc::new(AtomicI32::new(0)),
        };
        let pool = WorkerPool::new(notify_shutdown, handler.clone(), test_config(16, 4));

        for i in 1..=10 {
            pool.try_send(i).unwrap();
        }
        time::sleep(Duration::from_millis(200)).await;

        assert_eq!(handler.counter.load(Ordering::SeqCst), 55);
    }

    #[derive(Clone)]
    struct BlockingHandler {
        started: Arc<AtomicUsize>,
        release: Arc<Notify>,
    }

    impl PoolHandler<u8> for BlockingHandler {
        fn handle(&self, _task: u8) -> impl Future<Output = ()> + Send {
            let started = self.started.clone();
            let release = self.release.clone();
            async move {
                started.fetch_add(1, Ordering::SeqCst);
                release.notified().await;
            }
        }
    }

    #[tokio::test]
    async fn test_try_send_on_full_queue() {
        let (notify_shutdown, _) = broadcast::channel(1);
        let handler = BlockingHandler {
            started: Arc::new(AtomicUsize::new(0)),
            release: Arc::new(Notify::new()),
        };
        let pool = WorkerPool::new(notify_shutdown.clone(), handler.clone(), test_config(2, 1));

        // the single worker takes the first task and blocks on it
        pool.try_send(0).unwrap();
        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handler.started.load(Ordering::SeqCst), 1);

        pool.try_send(1).unwrap();
        pool.try_send(2).unwrap();
        assert_eq!(pool.queued(), 2);
        assert!(matches!(pool.try_send(3), Err(TrySendError::Full(3))));

        notify_shutdown.send(()).unwrap();
    }

    #[tokio::test]
    async fn test_worker_panic_recovery() {
        let (notify_shutdown, _) = broadcast::channel(1);

        #[derive(Clone)]
        struct PanicHandler {
            handled: Arc<AtomicUsize>,
        }

        impl PoolHandler<bool> for PanicHandler {
            fn handle(&self, should_panic: bool) -> impl Future<Output = ()> + Send {
                let handled = self.handled.clone();
                async move {
                    if should_panic {
                        panic!("Test panic");
                    }
                    handled.fetch_add(1, Ordering::SeqCst);
                }
            }
        }

        let handler = PanicHandler {
            handled: Arc::new(AtomicUsize::new(0)),
        };
        let pool = WorkerPool::new(notify_shutdown, handler.clone(), test_config(10, 1));

        pool.send(true).await.unwrap();
        // wait for the monitor to restart the only worker
        time::sleep(Duration::from_millis(200)).await;
        pool.send(false).await.unwrap();
        time::sleep(Duration::from_millis(100)).await;

        assert_eq!(handler.handled.load(Ordering::SeqCst), 1);
    }
}
