use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::filter::{RowFilter, row_matches};
use super::loader;
use super::model::{Batch, Example, MASK_VALUE, PartitionTable};
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// GeneratorSpec – plain configuration, safe to ship to another worker
// ---------------------------------------------------------------------------

/// Feature window relative to the label row, both ends inclusive.
///
/// Row `t` yields features from rows `t + start ..= t + end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowOffsets {
    pub start: i64,
    pub end: i64,
}

impl WindowOffsets {
    /// Trailing window of `input_len` steps ending `horizon_len` steps before the label.
    pub fn for_horizon(horizon_len: usize, input_len: usize) -> Self {
        let h = horizon_len as i64;
        let l = input_len as i64;
        WindowOffsets {
            start: -(h + l) + 1,
            end: -h,
        }
    }

    /// Number of time steps in the window.
    pub fn len(&self) -> usize {
        (self.end - self.start + 1).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMode {
    /// Every eligible row once per pass, in shuffled order.
    #[default]
    WithoutReplacement,
    /// Rows drawn uniformly with replacement, as many draws as eligible rows.
    WithReplacement,
}

/// Everything needed to (re)open a batch stream. Holds no handles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorSpec {
    pub feature_columns: Vec<String>,
    pub window: WindowOffsets,
    pub label_column: String,
    pub partitions: Vec<PathBuf>,
    pub batch_size: usize,
    pub filter: RowFilter,
    pub n_threads: usize,
    pub sampling: SamplingMode,
    /// `None` draws fresh entropy on every call.
    pub seed: Option<u64>,
    pub pad_value: f32,
}

impl GeneratorSpec {
    pub fn new(
        feature_columns: Vec<String>,
        window: WindowOffsets,
        label_column: impl Into<String>,
        partitions: Vec<PathBuf>,
        batch_size: usize,
    ) -> Self {
        GeneratorSpec {
            feature_columns,
            window,
            label_column: label_column.into(),
            partitions,
            batch_size,
            filter: RowFilter::new(),
            n_threads: 1,
            sampling: SamplingMode::WithoutReplacement,
            seed: None,
            pad_value: MASK_VALUE,
        }
    }

    pub fn with_filter(mut self, filter: RowFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_threads(mut self, n_threads: usize) -> Self {
        self.n_threads = n_threads;
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingMode) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_pad_value(mut self, pad_value: f32) -> Self {
        self.pad_value = pad_value;
        self
    }

    /// Columns a reader has to load: features, then label, then filter columns.
    pub fn load_columns(&self) -> Vec<String> {
        let mut cols = self.feature_columns.clone();
        for extra in std::iter::once(&self.label_column).chain(self.filter.keys()) {
            if !cols.contains(extra) {
                cols.push(extra.clone());
            }
        }
        cols
    }
}

// ---------------------------------------------------------------------------
// BatchGenerator – the re-entrant, zero-argument batch source
// ---------------------------------------------------------------------------

/// Produces a fresh infinite batch stream on every [`call`](Self::call).
///
/// Only the spec is captured; files and threads belong to each [`Batches`].
#[derive(Debug, Clone)]
pub struct BatchGenerator {
    spec: Arc<GeneratorSpec>,
}

const _: () = {
    const fn transferable<T: Send + Sync + 'static>() {}
    transferable::<BatchGenerator>();
    transferable::<GeneratorSpec>();
};

impl BatchGenerator {
    pub fn new(spec: GeneratorSpec) -> Result<Self> {
        if spec.batch_size == 0 {
            return Err(Error::config("generator batch size must be non-zero"));
        }
        if spec.n_threads == 0 {
            return Err(Error::config("generator thread count must be non-zero"));
        }
        if spec.feature_columns.is_empty() {
            return Err(Error::config("generator needs at least one feature column"));
        }
        if spec.window.start > spec.window.end || spec.window.end > 0 {
            return Err(Error::config(format!(
                "window offsets must satisfy start <= end <= 0, got ({}, {})",
                spec.window.start, spec.window.end
            )));
        }
        if spec.partitions.is_empty() {
            return Err(Error::dataset("generator needs at least one partition"));
        }
        Ok(BatchGenerator {
            spec: Arc::new(spec),
        })
    }

    /// Rebuild a generator from [`to_json`](Self::to_json) output.
    pub fn from_json(text: &str) -> Result<Self> {
        BatchGenerator::new(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self.spec.as_ref())?)
    }

    pub fn spec(&self) -> &GeneratorSpec {
        &self.spec
    }

    pub fn batch_size(&self) -> usize {
        self.spec.batch_size
    }

    /// Open a new, independent, infinite stream of batches.
    pub fn call(&self) -> Batches {
        Batches::start(Arc::clone(&self.spec))
    }
}

/// Check that a generator survives being shipped to an external worker.
///
/// The spec must serialize, deserialize and compare equal to itself. A
/// failure is a configuration defect, not something to degrade around.
pub fn assert_transferable(generator: &BatchGenerator) -> Result<()> {
    let encoded = serde_json::to_string(generator.spec())
        .map_err(|e| Error::Transferability(format!("cannot serialize generator spec: {e}")))?;
    let decoded: GeneratorSpec = serde_json::from_str(&encoded)
        .map_err(|e| Error::Transferability(format!("cannot deserialize generator spec: {e}")))?;
    if &decoded != generator.spec() {
        return Err(Error::Transferability(
            "generator spec changes across a serialization round trip".to_string(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Example extraction
// ---------------------------------------------------------------------------

/// Build every eligible example of one partition, in row order.
///
/// Rows are skipped when the label is missing, the filter rejects the row,
/// or the window ends before the partition starts.
pub fn partition_examples(table: &PartitionTable, spec: &GeneratorSpec) -> Result<Vec<Example>> {
    let features = spec
        .feature_columns
        .iter()
        .map(|name| {
            table
                .column(name)
                .ok_or_else(|| Error::dataset(format!("partition is missing feature column '{name}'")))
        })
        .collect::<Result<Vec<_>>>()?;
    let labels = table.column(&spec.label_column).ok_or_else(|| {
        Error::dataset(format!(
            "partition is missing label column '{}'",
            spec.label_column
        ))
    })?;

    let window_len = spec.window.len();
    let n_features = features.len();
    let n_rows = table.len() as i64;
    let mut out = Vec::new();

    for t in 0..n_rows {
        if t + spec.window.end < 0 {
            continue;
        }
        let row = t as usize;
        let label = labels[row];
        if label.is_nan() {
            continue;
        }
        if !row_matches(&spec.filter, |col| table.column(col).map(|c| c[row])) {
            continue;
        }

        let mut window = Vec::with_capacity(window_len * n_features);
        for r in (t + spec.window.start)..=(t + spec.window.end) {
            if r < 0 {
                window.extend(std::iter::repeat_n(spec.pad_value, n_features));
            } else {
                window.extend(features.iter().map(|col| {
                    let v = col[r as usize];
                    if v.is_nan() { spec.pad_value } else { v as f32 }
                }));
            }
        }
        out.push(Example {
            window,
            label: label as f32,
        });
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Batches – one live stream: reader threads + bounded example queue
// ---------------------------------------------------------------------------

enum Message {
    Examples(Vec<Example>),
    PartitionDone { pass: u64, n_examples: usize },
    Failed(Error),
}

/// Hands out partitions pass after pass, reshuffling the order each pass.
struct PassScheduler {
    partitions: Vec<PathBuf>,
    order: Vec<usize>,
    cursor: usize,
    pass: u64,
    rng: StdRng,
}

impl PassScheduler {
    fn new(partitions: Vec<PathBuf>, mut rng: StdRng) -> Self {
        let mut order: Vec<usize> = (0..partitions.len()).collect();
        order.shuffle(&mut rng);
        PassScheduler {
            partitions,
            order,
            cursor: 0,
            pass: 0,
            rng,
        }
    }

    fn next(&mut self) -> (u64, PathBuf) {
        if self.cursor == self.order.len() {
            self.order.shuffle(&mut self.rng);
            self.cursor = 0;
            self.pass += 1;
        }
        let path = self.partitions[self.order[self.cursor]].clone();
        self.cursor += 1;
        (self.pass, path)
    }
}

/// Infinite iterator of batches from one [`BatchGenerator::call`].
///
/// Items are `Err` only once: after an error the stream ends.
pub struct Batches {
    spec: Arc<GeneratorSpec>,
    rx: Option<Receiver<Message>>,
    stop: Arc<AtomicBool>,
    readers: Vec<JoinHandle<()>>,
    pending: VecDeque<Example>,
    passes: HashMap<u64, (usize, usize)>,
    finished: bool,
}

fn base_rng(seed: Option<u64>, stream: u64) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s.wrapping_add(stream.wrapping_mul(0x9E37_79B9_7F4A_7C15))),
        None => StdRng::from_os_rng(),
    }
}

impl Batches {
    fn start(spec: Arc<GeneratorSpec>) -> Self {
        let n_readers = spec.n_threads.min(spec.partitions.len()).max(1);
        let (tx, rx) = sync_channel::<Message>(n_readers * 2);
        let stop = Arc::new(AtomicBool::new(false));
        let scheduler = Arc::new(Mutex::new(PassScheduler::new(
            spec.partitions.clone(),
            base_rng(spec.seed, 0),
        )));

        let readers = (0..n_readers)
            .map(|i| {
                let spec = Arc::clone(&spec);
                let tx = tx.clone();
                let stop = Arc::clone(&stop);
                let scheduler = Arc::clone(&scheduler);
                let rng = base_rng(spec.seed, i as u64 + 1);
                std::thread::spawn(move || read_loop(&spec, &scheduler, &tx, &stop, rng))
            })
            .collect();

        Batches {
            spec,
            rx: Some(rx),
            stop,
            readers,
            pending: VecDeque::new(),
            passes: HashMap::new(),
            finished: false,
        }
    }

    fn fail(&mut self, err: Error) -> Option<Result<Batch>> {
        self.finished = true;
        self.stop.store(true, Ordering::Relaxed);
        Some(Err(err))
    }
}

fn read_loop(
    spec: &GeneratorSpec,
    scheduler: &Mutex<PassScheduler>,
    tx: &SyncSender<Message>,
    stop: &AtomicBool,
    mut rng: StdRng,
) {
    let columns = spec.load_columns();
    let chunk = spec.batch_size.max(1);

    while !stop.load(Ordering::Relaxed) {
        let (pass, path) = match scheduler.lock() {
            Ok(mut guard) => guard.next(),
            Err(poisoned) => poisoned.into_inner().next(),
        };

        let examples = loader::load_partition(&path, &columns)
            .map_err(Error::from)
            .and_then(|table| partition_examples(&table, spec));
        let mut examples = match examples {
            Ok(ex) => ex,
            Err(e) => {
                let _ = tx.send(Message::Failed(e));
                return;
            }
        };

        let examples = match spec.sampling {
            SamplingMode::WithoutReplacement => {
                examples.shuffle(&mut rng);
                examples
            }
            SamplingMode::WithReplacement => {
                let n = examples.len();
                (0..n)
                    .map(|_| examples[rng.random_range(0..n)].clone())
                    .collect()
            }
        };

        let n_examples = examples.len();
        let mut iter = examples.into_iter().peekable();
        while iter.peek().is_some() {
            let part: Vec<Example> = iter.by_ref().take(chunk).collect();
            if tx.send(Message::Examples(part)).is_err() {
                return;
            }
        }
        if tx.send(Message::PartitionDone { pass, n_examples }).is_err() {
            return;
        }
    }
}

impl Iterator for Batches {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let batch_size = self.spec.batch_size;
        let n_partitions = self.spec.partitions.len();

        while self.pending.len() < batch_size {
            let received = match &self.rx {
                Some(rx) => rx.recv(),
                None => return None,
            };
            match received {
                Ok(Message::Examples(examples)) => self.pending.extend(examples),
                Ok(Message::PartitionDone { pass, n_examples }) => {
                    let entry = self.passes.entry(pass).or_insert((0, 0));
                    entry.0 += 1;
                    entry.1 += n_examples;
                    if entry.0 == n_partitions {
                        let total = entry.1;
                        self.passes.remove(&pass);
                        if total == 0 {
                            return self.fail(Error::dataset(format!(
                                "no rows of {n_partitions} partitions pass the filter"
                            )));
                        }
                    }
                }
                Ok(Message::Failed(e)) => return self.fail(e),
                Err(_) => {
                    return self.fail(Error::Worker(
                        "all partition readers stopped".to_string(),
                    ));
                }
            }
        }

        let examples: Vec<Example> = self.pending.drain(..batch_size).collect();
        let result = Batch::from_examples(
            examples,
            self.spec.window.len(),
            self.spec.feature_columns.len(),
        );
        if result.is_err() {
            self.finished = true;
        }
        Some(result)
    }
}

impl Drop for Batches {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        // Readers blocked on a full queue wake up with a send error.
        drop(self.rx.take());
        for handle in self.readers.drain(..) {
            let _ = handle.join();
        }
    }
}
