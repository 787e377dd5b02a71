use super::config::OutputConfig;
use crate::errors::CliError;
use indicatif::{
    ProgressBar,
    ProgressStyle,
};
use lcmswarp::features::normalize_nets_from_scans;
use lcmswarp::{
    AlignmentResult,
    AlignmentStage,
    FeatureRecord,
    LcmsWarp,
};
use serde::Deserialize;
use std::ops::ControlFlow;
use std::path::Path;
use std::time::Instant;
use tracing::{
    debug,
    info,
};

const PROGRESS_STEPS: u64 = 1000;

/// One row of a feature table. Columns other than `id` and `mass` may be
/// left out.
#[derive(Debug, Deserialize)]
struct FeatureRow {
    id: u64,
    mass: f64,
    mz: Option<f64>,
    net: Option<f64>,
    scan: Option<u32>,
    drift_time: Option<f64>,
    abundance: Option<f64>,
}

fn io_error(e: impl std::fmt::Display, path: &Path) -> CliError {
    CliError::Io {
        source: e.to_string(),
        path: Some(path.display().to_string()),
    }
}

/// Reads a csv (or tsv, by extension) feature table.
///
/// Tables without a `net` column need a `scan` column, NETs are then
/// derived from the scan range.
pub fn read_features(path: &Path) -> Result<Vec<FeatureRecord>, CliError> {
    let delimiter = match path.extension().and_then(|e| e.to_str()) {
        Some("tsv") | Some("txt") => b'\t',
        _ => b',',
    };
    let file = std::fs::File::open(path).map_err(|e| io_error(e, path))?;
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .from_reader(file);

    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        let row: FeatureRow = result?;
        rows.push(row);
    }

    let has_nets = rows.iter().all(|r| r.net.is_some());
    let has_scans = rows.iter().all(|r| r.scan.is_some());
    if !has_nets && !has_scans {
        return Err(CliError::ParseError {
            msg: format!(
                "{} needs either a net or a scan value on every row",
                path.display()
            ),
        });
    }

    let mut features: Vec<FeatureRecord> = rows
        .into_iter()
        .map(|row| {
            FeatureRecord::new(
                row.id,
                row.mass,
                row.mz.unwrap_or(0.0),
                row.net.unwrap_or(0.0),
            )
            .with_scan(row.scan.unwrap_or(0))
            .with_drift_time(row.drift_time.unwrap_or(0.0))
            .with_abundance(row.abundance.unwrap_or(0.0))
        })
        .collect();
    if !has_nets {
        debug!("No NET column in {}, deriving NETs from scans", path.display());
        normalize_nets_from_scans(&mut features);
    }
    info!("Read {} features from {}", features.len(), path.display());
    Ok(features)
}

pub fn run_alignment(
    aligner: &LcmsWarp,
    baseline: &[FeatureRecord],
    alignee: &[FeatureRecord],
) -> Result<AlignmentResult, CliError> {
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] {msg:<20} [{wide_bar:.cyan/blue}] {percent}%",
    )
    .map_err(|e| CliError::Config {
        source: e.to_string(),
    })?;
    let bar = ProgressBar::new(PROGRESS_STEPS).with_style(style);
    let mut progress = |stage: AlignmentStage, fraction: f32| -> ControlFlow<()> {
        bar.set_message(stage.to_string());
        bar.set_position((fraction * PROGRESS_STEPS as f32) as u64);
        ControlFlow::Continue(())
    };

    let start = Instant::now();
    let result = aligner.align(baseline, alignee, &mut progress);
    bar.finish_and_clear();
    let result = result?;
    info!(
        "Aligned {} features with {} matches in {:?}",
        result.alignee.len(),
        result.matches.len(),
        start.elapsed()
    );
    Ok(result)
}

/// Writes `alignment.json` with the full result and `aligned_features.csv`
/// with the transformed alignee features.
pub fn write_outputs(result: &AlignmentResult, output: &OutputConfig) -> Result<(), CliError> {
    let json_path = output.directory.join("alignment.json");
    let file = std::fs::File::create(&json_path).map_err(|e| io_error(e, &json_path))?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), result)
        .map_err(|e| io_error(e, &json_path))?;

    let csv_path = output.directory.join("aligned_features.csv");
    let mut wtr = csv::Writer::from_path(&csv_path)?;
    for feature in result.alignee.iter() {
        wtr.serialize(feature)?;
    }
    wtr.flush().map_err(|e| io_error(e, &csv_path))?;

    info!(
        "Wrote {} and {}",
        json_path.display(),
        csv_path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_table(name: &str, contents: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("lcmswarp_cli_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_reads_nets_from_scans() {
        let path = write_table(
            "scans.csv",
            "id,mass,scan,abundance\n1,1000.5,100,5.0\n2,1200.1,300,7.5\n3,900.0,200,\n",
        );
        let features = read_features(&path).unwrap();
        assert_eq!(features.len(), 3);
        assert_eq!(features[0].net, 0.0);
        assert_eq!(features[1].net, 1.0);
        assert_eq!(features[2].net, 0.5);
        assert_eq!(features[2].abundance, 0.0);
    }

    #[test]
    fn test_rejects_rows_without_time() {
        let path = write_table("notime.tsv", "id\tmass\n1\t1000.5\n");
        assert!(matches!(
            read_features(&path),
            Err(CliError::ParseError { .. })
        ));
    }
}
