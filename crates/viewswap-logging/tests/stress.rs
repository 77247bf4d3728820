//! Stress tests for the JSONL file writer
//!
//! Many threads log through one non-blocking writer; every line must reach
//! the file intact once the guard is dropped.

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Instant;

use tempfile::TempDir;
use tracing::info;

use viewswap_logging::{FileConfig, RotationStrategy, file_writer};

const NUM_THREADS: usize = 8;
const EVENTS_PER_THREAD: usize = 500;

fn log_from_threads(writer: tracing_appender::non_blocking::NonBlocking) {
    let barrier = Arc::new(Barrier::new(NUM_THREADS));
    let mut handles = vec![];

    for worker in 0..NUM_THREADS {
        let barrier = Arc::clone(&barrier);
        let writer = writer.clone();

        handles.push(thread::spawn(move || {
            let subscriber = tracing_subscriber::fmt()
                .json()
                .flatten_event(true)
                .with_writer(writer)
                .finish();

            barrier.wait();
            tracing::subscriber::with_default(subscriber, || {
                for seq in 0..EVENTS_PER_THREAD {
                    info!(worker, seq, "stress event");
                }
            });
        }));
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }
}

#[test]
fn test_concurrent_writes_single_file() {
    let temp_dir = TempDir::new().unwrap();
    let config = FileConfig {
        directory: temp_dir.path().to_path_buf(),
        prefix: "stress".to_string(),
        rotation: RotationStrategy::Never,
        max_files: None,
    };

    let start = Instant::now();
    let (writer, guard) = file_writer(&config).unwrap();
    log_from_threads(writer);
    drop(guard);

    let contents = std::fs::read_to_string(temp_dir.path().join("stress.log")).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), NUM_THREADS * EVENTS_PER_THREAD);
    assert!(lines.iter().all(|line| line.starts_with('{') && line.ends_with('}')));
    assert!(lines.iter().all(|line| line.contains("\"stress event\"")));

    println!("Wrote {} lines in {:?}", lines.len(), start.elapsed());
}

#[test]
fn test_concurrent_writes_rolling_file() {
    let temp_dir = TempDir::new().unwrap();
    let config = FileConfig {
        directory: temp_dir.path().join("logs"),
        ..FileConfig::default()
    };

    let (writer, guard) = file_writer(&config).unwrap();
    log_from_threads(writer);
    drop(guard);

    let files: Vec<_> = std::fs::read_dir(&config.directory)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(files.len(), 1);
    assert!(files[0].starts_with("viewswap"));
    assert!(files[0].ends_with(".jsonl"));

    let contents = std::fs::read_to_string(config.directory.join(&files[0])).unwrap();
    assert_eq!(contents.lines().count(), NUM_THREADS * EVENTS_PER_THREAD);
}
