//! Prefetch workers in front of a batch generator.

mod support;

use std::time::{Duration, Instant};

use windowfeed::Error;
use windowfeed::data::{
    GeneratorSpec, PartitionedDataset, PrefetchSettings, Prefetcher, WindowOffsets,
};

use support::write_ramp_dataset;

fn generator(dataset: &PartitionedDataset, label: &str) -> windowfeed::data::BatchGenerator {
    let spec = GeneratorSpec::new(
        vec!["x1".to_string(), "x2".to_string()],
        WindowOffsets::for_horizon(0, 4),
        label,
        dataset.partition_paths().to_vec(),
        12,
    );
    dataset.generate(spec).unwrap()
}

#[test]
fn tiny_queue_with_many_workers_keeps_up() {
    let dir = tempfile::tempdir().unwrap();
    write_ramp_dataset(dir.path(), 5, 40);
    let dataset = PartitionedDataset::open(dir.path()).unwrap();

    let mut feed = Prefetcher::spawn(
        &generator(&dataset, "y"),
        PrefetchSettings {
            max_queue_size: 1,
            n_workers: 4,
        },
    )
    .unwrap();

    for _ in 0..300 {
        let batch = feed.next().unwrap().unwrap();
        assert_eq!(batch.features.shape(), &[12, 4, 2]);
    }

    let started = Instant::now();
    drop(feed);
    assert!(started.elapsed() < Duration::from_secs(30));
}

#[test]
fn worker_errors_reach_the_consumer() {
    let dir = tempfile::tempdir().unwrap();
    write_ramp_dataset(dir.path(), 2, 20);
    let dataset = PartitionedDataset::open(dir.path()).unwrap();

    let mut feed = Prefetcher::spawn(
        &generator(&dataset, "missing_label"),
        PrefetchSettings {
            max_queue_size: 2,
            n_workers: 2,
        },
    )
    .unwrap();

    assert!(matches!(feed.next(), Some(Err(_))));
    assert!(feed.next().is_none());
}

#[test]
fn zero_sized_settings_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write_ramp_dataset(dir.path(), 1, 10);
    let dataset = PartitionedDataset::open(dir.path()).unwrap();
    let generator = generator(&dataset, "y");

    for settings in [
        PrefetchSettings {
            max_queue_size: 0,
            n_workers: 1,
        },
        PrefetchSettings {
            max_queue_size: 1,
            n_workers: 0,
        },
    ] {
        assert!(matches!(
            Prefetcher::spawn(&generator, settings),
            Err(Error::Config(_))
        ));
    }
}
