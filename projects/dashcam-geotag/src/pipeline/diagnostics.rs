// Diagnostic trajectory tables (`;`-separated), written before and after
// reconstruction. Observational only; nothing reads them back.

use crate::pipeline::types::DenseTrajectory;
use crate::telemetry::SparseTrajectory;
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

pub const RAW_TABLE: &str = "telemetry_raw.csv";
pub const DENSE_TABLE: &str = "telemetry_dense.csv";

#[derive(Debug, Serialize)]
struct TrajectoryRow {
    index: usize,
    latitude: f64,
    longitude: f64,
    timestamp: f64,
    speed: f64,
    bearing: f64,
}

fn write_rows(path: &Path, rows: impl Iterator<Item = TrajectoryRow>) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_sparse(path: &Path, sparse: &SparseTrajectory) -> Result<()> {
    write_rows(
        path,
        sparse.iter().map(|(index, fix)| TrajectoryRow {
            index,
            latitude: fix.latitude,
            longitude: fix.longitude,
            timestamp: fix.timestamp,
            speed: fix.speed,
            bearing: fix.bearing,
        }),
    )
}

pub fn write_dense(path: &Path, dense: &DenseTrajectory) -> Result<()> {
    write_rows(
        path,
        dense.iter().map(|s| TrajectoryRow {
            index: s.index,
            latitude: s.latitude,
            longitude: s.longitude,
            timestamp: s.timestamp,
            speed: s.speed,
            bearing: s.bearing,
        }),
    )
}
