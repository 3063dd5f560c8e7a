//! Bounded fan-out of resource chunks
//!
//! Each unit of work owns its chunk and hands back the resources it could
//! annotate; resources it drops are excluded. Results come back in
//! completion order and are put back into input order by id.

use std::collections::HashMap;
use std::future::Future;

use custodian_core::Resource;
use futures::stream::{self, StreamExt};

/// Chunking and concurrency settings for one remote filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPool {
    batch_size: usize,
    max_workers: usize,
}

impl WorkerPool {
    pub fn new(batch_size: usize, max_workers: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            max_workers: max_workers.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Split `resources` into owned chunks of at most `batch_size`
    pub fn chunks(&self, resources: Vec<Resource>) -> Vec<Vec<Resource>> {
        let mut chunks = Vec::with_capacity(resources.len().div_ceil(self.batch_size));
        let mut current = Vec::with_capacity(self.batch_size);
        for resource in resources {
            current.push(resource);
            if current.len() == self.batch_size {
                chunks.push(std::mem::replace(
                    &mut current,
                    Vec::with_capacity(self.batch_size),
                ));
            }
        }
        if !current.is_empty() {
            chunks.push(current);
        }
        chunks
    }

    /// Run `work` over every chunk with at most `max_workers` in flight
    pub async fn run<F, Fut>(&self, resources: Vec<Resource>, work: F) -> Vec<Resource>
    where
        F: Fn(Vec<Resource>) -> Fut,
        Fut: Future<Output = Vec<Resource>>,
    {
        stream::iter(self.chunks(resources).into_iter().map(work))
            .buffer_unordered(self.max_workers)
            .collect::<Vec<Vec<Resource>>>()
            .await
            .into_iter()
            .flatten()
            .collect()
    }
}

/// Reorder `resources` to follow `ids`; ids without a resource are skipped
pub fn restore_order(ids: &[String], resources: Vec<Resource>, id_field: &str) -> Vec<Resource> {
    let mut by_id: HashMap<String, Resource> = resources
        .into_iter()
        .filter_map(|r| r.id(id_field).map(|id| (id, r)))
        .collect();
    ids.iter().filter_map(|id| by_id.remove(id)).collect()
}
