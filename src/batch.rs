//! Batch reading across worker threads
//!
//! Each worker owns its own `DialReader`; paths are handed out through a
//! shared job queue and results are returned in input order.

use anyhow::Result;
use crossbeam_channel::unbounded;
use std::path::PathBuf;
use std::thread;
use tracing::{debug, info};

use crate::device::DeviceType;
use crate::pipeline::{DialReader, ReadingRecord};

/// Read every path using `jobs` workers. `factory` builds one reader per
/// worker before any image is processed.
pub fn run_batch<F>(
    paths: &[PathBuf],
    jobs: usize,
    device: Option<DeviceType>,
    encoder_angle: Option<f64>,
    factory: F,
) -> Result<Vec<ReadingRecord>>
where
    F: Fn() -> Result<DialReader>,
{
    if paths.is_empty() {
        return Ok(Vec::new());
    }
    let workers = jobs.clamp(1, paths.len());

    let readers = (0..workers).map(|_| factory()).collect::<Result<Vec<_>>>()?;
    info!("Reading {} images with {} workers", paths.len(), workers);

    let (job_tx, job_rx) = unbounded::<(usize, PathBuf)>();
    let (result_tx, result_rx) = unbounded::<(usize, ReadingRecord)>();
    for job in paths.iter().cloned().enumerate() {
        job_tx.send(job)?;
    }
    drop(job_tx);

    thread::scope(|scope| {
        for (worker, mut reader) in readers.into_iter().enumerate() {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move || {
                for (index, path) in job_rx.iter() {
                    debug!("Worker {} reading {:?}", worker, path);
                    let result = reader.read_path(&path, device, encoder_angle);
                    let record = ReadingRecord::new(&path, &result);
                    if result_tx.send((index, record)).is_err() {
                        break;
                    }
                }
                reader.shutdown();
            });
        }
    });
    drop(result_tx);

    let mut results: Vec<(usize, ReadingRecord)> = result_rx.iter().collect();
    results.sort_by_key(|(index, _)| *index);
    Ok(results.into_iter().map(|(_, record)| record).collect())
}
