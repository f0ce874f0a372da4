use std::sync::mpsc::{Receiver, sync_channel};
use std::thread::JoinHandle;

use super::generator::{BatchGenerator, GeneratorSpec};
use super::model::Batch;
use crate::error::{Error, Result};

/// Bound and fan-out of the queue between batch workers and the training loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefetchSettings {
    pub max_queue_size: usize,
    pub n_workers: usize,
}

/// Batches produced ahead of the training loop by independent workers.
///
/// Each worker receives the generator as JSON and rebuilds it, so nothing
/// live crosses the thread boundary. The queue blocks workers when full and
/// the consumer when empty.
pub struct Prefetcher {
    rx: Option<Receiver<Result<Batch>>>,
    workers: Vec<JoinHandle<()>>,
    finished: bool,
}

impl Prefetcher {
    pub fn spawn(generator: &BatchGenerator, settings: PrefetchSettings) -> Result<Self> {
        if settings.max_queue_size == 0 || settings.n_workers == 0 {
            return Err(Error::config(format!(
                "prefetch needs a non-zero queue size and worker count, got {settings:?}"
            )));
        }
        let payload = generator.to_json()?;
        let (tx, rx) = sync_channel::<Result<Batch>>(settings.max_queue_size);

        let workers = (0..settings.n_workers)
            .map(|worker| {
                let tx = tx.clone();
                let payload = payload.clone();
                std::thread::spawn(move || {
                    let generator = match rebuild(&payload, worker) {
                        Ok(g) => g,
                        Err(e) => {
                            let _ = tx.send(Err(e));
                            return;
                        }
                    };
                    for item in generator.call() {
                        let failed = item.is_err();
                        if tx.send(item).is_err() || failed {
                            return;
                        }
                    }
                })
            })
            .collect();

        log::debug!(
            "prefetching with {} workers, queue size {}",
            settings.n_workers,
            settings.max_queue_size
        );

        Ok(Prefetcher {
            rx: Some(rx),
            workers,
            finished: false,
        })
    }
}

/// Seeded specs get a distinct stream per worker.
fn rebuild(payload: &str, worker: usize) -> Result<BatchGenerator> {
    let mut spec: GeneratorSpec = serde_json::from_str(payload)?;
    spec.seed = spec.seed.map(|s| s.wrapping_add(worker as u64));
    BatchGenerator::new(spec)
}

impl Iterator for Prefetcher {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let received = self.rx.as_ref()?.recv();
        match received {
            Ok(Ok(batch)) => Some(Ok(batch)),
            Ok(Err(e)) => {
                self.finished = true;
                Some(Err(e))
            }
            Err(_) => {
                self.finished = true;
                Some(Err(Error::Worker("all prefetch workers exited".to_string())))
            }
        }
    }
}

impl Drop for Prefetcher {
    fn drop(&mut self) {
        drop(self.rx.take());
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}
