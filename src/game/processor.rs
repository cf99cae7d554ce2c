//! Partitioned work processor
//!
//! Work is queued to a numbered partition. Each partition has one unbounded
//! FIFO queue drained by one worker task, so items queued to the same
//! partition run one at a time in submission order, while partitions run in
//! parallel with each other.
//!
//! Partitions carry an atomic weight. `select_partition` binds a new owner
//! (a connection or a map) to the lightest partition and `deselect_partition`
//! releases it, keeping owners evenly spread across workers.
//!
//! A failing or panicking item is logged and swallowed at the worker so one
//! bad message cannot stop its partition.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicI64, Ordering};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{Result, ServerError};

/// A unit of work queued to a partition
pub type WorkItem = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send + 'static>;

/// One partition of a processor
#[derive(Debug)]
pub struct Partition {
    /// Partition index
    pub id: u32,
    /// Number of owners bound to this partition
    weight: AtomicI64,
}

impl Partition {
    fn new(id: u32) -> Self {
        Self {
            id,
            weight: AtomicI64::new(0),
        }
    }

    /// Current weight
    pub fn weight(&self) -> i64 {
        self.weight.load(Ordering::Acquire)
    }
}

/// Processor with a fixed number of ordered partitions
pub struct PartitionedProcessor {
    name: String,
    partitions: Vec<Partition>,
    /// Queue senders; `None` once shutdown has begun
    senders: RwLock<Option<Vec<mpsc::UnboundedSender<WorkItem>>>>,
    /// Queue receivers waiting for `start`
    receivers: Mutex<Vec<mpsc::UnboundedReceiver<WorkItem>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl PartitionedProcessor {
    /// Create a processor with `count` partitions (0 selects one per core)
    pub fn new(name: impl Into<String>, count: usize) -> Self {
        let count = if count == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            count
        }
        .max(1);

        let mut partitions = Vec::with_capacity(count);
        let mut senders = Vec::with_capacity(count);
        let mut receivers = Vec::with_capacity(count);
        for id in 0..count {
            let (tx, rx) = mpsc::unbounded_channel();
            partitions.push(Partition::new(id as u32));
            senders.push(tx);
            receivers.push(rx);
        }

        Self {
            name: name.into(),
            partitions,
            senders: RwLock::new(Some(senders)),
            receivers: Mutex::new(receivers),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Processor name used in logs
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of partitions
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Weight of a partition, if it exists
    pub fn weight(&self, id: u32) -> Option<i64> {
        self.partitions.get(id as usize).map(Partition::weight)
    }

    /// Spawn one worker per partition
    ///
    /// Must be called from within a Tokio runtime. Calling it again is a no-op.
    pub fn start(&self) {
        let receivers: Vec<_> = self.receivers.lock().drain(..).collect();
        if receivers.is_empty() {
            return;
        }

        let mut workers = self.workers.lock();
        for (id, rx) in receivers.into_iter().enumerate() {
            let name = self.name.clone();
            workers.push(tokio::spawn(run_worker(name, id as u32, rx)));
        }
        info!(
            processor = %self.name,
            partitions = self.partitions.len(),
            "Processor started"
        );
    }

    /// Bind a new owner to the lightest partition
    ///
    /// Ties go to the lowest index. The chosen weight is incremented.
    pub fn select_partition(&self) -> u32 {
        let mut selected = 0usize;
        let mut lowest = i64::MAX;
        for (index, partition) in self.partitions.iter().enumerate() {
            let weight = partition.weight();
            if weight < lowest {
                lowest = weight;
                selected = index;
            }
        }
        self.partitions[selected].weight.fetch_add(1, Ordering::AcqRel);
        selected as u32
    }

    /// Release an owner from a partition
    pub fn deselect_partition(&self, id: u32) {
        match self.partitions.get(id as usize) {
            Some(partition) => {
                partition.weight.fetch_sub(1, Ordering::AcqRel);
            }
            None => warn!(
                processor = %self.name,
                partition = id,
                "Deselect of unknown partition ignored"
            ),
        }
    }

    /// Queue a work item to a partition without blocking
    pub fn queue<F>(&self, id: u32, work: F) -> Result<()>
    where
        F: FnOnce() -> BoxFuture<'static, Result<()>> + Send + 'static,
    {
        let count = self.partitions.len() as u32;
        let senders = self.senders.read();
        let Some(senders) = senders.as_ref() else {
            warn!(processor = %self.name, partition = id, "Work rejected, processor is shutting down");
            return Err(ServerError::ShuttingDown);
        };
        let Some(sender) = senders.get(id as usize) else {
            error!(
                processor = %self.name,
                partition = id,
                count,
                "Work queued to a partition that does not exist"
            );
            return Err(ServerError::Capacity {
                partition: id,
                count,
            });
        };
        sender.send(Box::new(work)).map_err(|_| {
            warn!(processor = %self.name, partition = id, "Partition queue closed");
            ServerError::ShuttingDown
        })
    }

    /// Queue a ready-made future to a partition
    pub fn queue_future<Fut>(&self, id: u32, future: Fut) -> Result<()>
    where
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.queue(id, move || future.boxed())
    }

    /// Stop accepting work, drain every queue and join the workers
    pub async fn shutdown(&self) {
        // Dropping the senders closes every queue once its backlog is drained.
        let senders = self.senders.write().take();
        if senders.is_none() {
            return;
        }
        drop(senders);
        self.receivers.lock().clear();

        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for worker in workers {
            if let Err(e) = worker.await {
                error!(processor = %self.name, error = %e, "Worker terminated abnormally");
            }
        }
        info!(processor = %self.name, "Processor stopped");
    }
}

impl std::fmt::Debug for PartitionedProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionedProcessor")
            .field("name", &self.name)
            .field("partitions", &self.partitions)
            .finish()
    }
}

async fn run_worker(name: String, id: u32, mut rx: mpsc::UnboundedReceiver<WorkItem>) {
    debug!(processor = %name, partition = id, "Worker started");
    while let Some(work) = rx.recv().await {
        match AssertUnwindSafe(async move { work().await }).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(processor = %name, partition = id, error = %e, "Work item failed");
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(processor = %name, partition = id, panic = %message, "Work item panicked");
            }
        }
    }
    debug!(processor = %name, partition = id, "Worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    #[test]
    fn test_select_partition_round_robin() {
        let processor = PartitionedProcessor::new("test", 3);
        let picks: Vec<u32> = (0..6).map(|_| processor.select_partition()).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
        assert_eq!(processor.weight(0), Some(2));
        assert_eq!(processor.weight(3), None);
    }

    #[test]
    fn test_deselect_makes_partition_preferred() {
        let processor = PartitionedProcessor::new("test", 3);
        for _ in 0..3 {
            processor.select_partition();
        }
        processor.deselect_partition(1);
        assert_eq!(processor.select_partition(), 1);

        // Unknown partitions are ignored.
        processor.deselect_partition(99);
    }

    #[test]
    fn test_zero_count_uses_available_parallelism() {
        let processor = PartitionedProcessor::new("test", 0);
        assert!(processor.len() >= 1);
    }

    #[tokio::test]
    async fn test_queue_out_of_range_is_capacity_error() {
        let processor = PartitionedProcessor::new("test", 2);
        processor.start();
        let err = processor.queue_future(5, async { Ok(()) }).unwrap_err();
        assert!(matches!(
            err,
            ServerError::Capacity {
                partition: 5,
                count: 2
            }
        ));
        processor.shutdown().await;
    }

    #[tokio::test]
    async fn test_fifo_within_partition() {
        let processor = PartitionedProcessor::new("test", 2);
        processor.start();

        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..50u32 {
            let seen = seen.clone();
            processor
                .queue_future(1, async move {
                    if i % 7 == 0 {
                        tokio::time::sleep(Duration::from_millis(1)).await;
                    }
                    seen.lock().push(i);
                    Ok(())
                })
                .unwrap();
        }
        processor.shutdown().await;

        assert_eq!(*seen.lock(), (0..50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_worker_survives_errors_and_panics() {
        let processor = PartitionedProcessor::new("test", 1);
        processor.start();

        let seen = Arc::new(Mutex::new(Vec::new()));
        processor
            .queue_future(0, async { Err(ServerError::Handler("boom".into())) })
            .unwrap();
        processor
            .queue(0, || {
                async {
                    let empty: Vec<u32> = Vec::new();
                    // Out of bounds: panics inside the worker.
                    let _ = empty[3];
                    Ok(())
                }
                .boxed()
            })
            .unwrap();
        let after = seen.clone();
        processor
            .queue_future(0, async move {
                after.lock().push("after");
                Ok(())
            })
            .unwrap();
        processor.shutdown().await;

        assert_eq!(*seen.lock(), vec!["after"]);
    }

    #[tokio::test]
    async fn test_queue_after_shutdown_is_rejected() {
        let processor = PartitionedProcessor::new("test", 1);
        processor.start();
        processor.shutdown().await;

        let err = processor.queue_future(0, async { Ok(()) }).unwrap_err();
        assert!(matches!(err, ServerError::ShuttingDown));
    }

    #[tokio::test]
    async fn test_shutdown_drains_queued_work() {
        let processor = PartitionedProcessor::new("test", 2);
        processor.start();

        let done = Arc::new(AtomicI64::new(0));
        for i in 0..20u32 {
            let done = done.clone();
            processor
                .queue_future(i % 2, async move {
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap();
        }
        processor.shutdown().await;
        assert_eq!(done.load(Ordering::SeqCst), 20);
    }
}
