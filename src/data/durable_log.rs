//! Append-only gzip CSV logs with shutdown-time compaction.
//!
//! Every subsystem writes to one staging file per year under `{dir}/temp/`.
//! Each append adds one complete gzip member holding one CSV row, so a crash
//! loses at most the row being written and the file stays readable by any
//! multi-member gzip reader. The first append of a run cuts a torn trailing
//! member left by such a crash, so later members stay reachable. At shutdown
//! the staging file is decoded and rewritten as a single member into `{dir}/`.
//!
//! File names are `{task}__{year}__{subsystem}.csv.gz`.

use super::sample::{Sample, SampleSchema};
use crate::error::{MonitorError, MonitorResult};
use flate2::bufread::GzDecoder;
use flate2::write::GzEncoder;
use flate2::{Compression, GzBuilder};
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Directory under the log root that holds staging files.
pub const STAGING_DIR: &str = "temp";

/// `{task}__{year}__{subsystem}.csv.gz`
pub fn log_file_name(task: &str, year: i32, subsystem: &str) -> String {
    format!("{task}__{year}__{subsystem}.csv.gz")
}

/// Staging path for `(task, year, subsystem)` under `dir`.
pub fn staging_path(dir: &Path, task: &str, year: i32, subsystem: &str) -> PathBuf {
    dir.join(STAGING_DIR).join(log_file_name(task, year, subsystem))
}

/// Final path for `(task, year, subsystem)` under `dir`.
pub fn final_path(dir: &Path, task: &str, year: i32, subsystem: &str) -> PathBuf {
    dir.join(log_file_name(task, year, subsystem))
}

/// Append-only row store for one subsystem.
#[derive(Debug)]
pub struct DurableLog {
    dir: PathBuf,
    task: String,
    subsystem: String,
    header: Vec<String>,
    touched_years: BTreeSet<i32>,
}

impl DurableLog {
    /// Log for `subsystem` of `task` under `dir`, with the columns of `schema`.
    ///
    /// Nothing touches the disk until the first append.
    pub fn new(
        dir: impl Into<PathBuf>,
        task: impl Into<String>,
        subsystem: impl Into<String>,
        schema: &SampleSchema,
    ) -> MonitorResult<Self> {
        let task = task.into();
        let subsystem = subsystem.into();
        for (what, value) in [("task", &task), ("subsystem", &subsystem)] {
            if value.trim().is_empty() {
                return Err(MonitorError::Configuration(format!("log {what} must not be empty")));
            }
            if value.contains(['/', '\\']) {
                return Err(MonitorError::Configuration(format!(
                    "log {what} '{value}' must not contain path separators"
                )));
            }
        }
        Ok(Self {
            dir: dir.into(),
            task,
            subsystem,
            header: schema.columns().to_vec(),
            touched_years: BTreeSet::new(),
        })
    }

    /// Staging file for `year`.
    pub fn staging_path(&self, year: i32) -> PathBuf {
        staging_path(&self.dir, &self.task, year, &self.subsystem)
    }

    /// Final file for `year`.
    pub fn final_path(&self, year: i32) -> PathBuf {
        final_path(&self.dir, &self.task, year, &self.subsystem)
    }

    /// Years appended to during this run.
    pub fn touched_years(&self) -> impl Iterator<Item = i32> + '_ {
        self.touched_years.iter().copied()
    }

    /// Append `sample` to the staging file of its year.
    ///
    /// # Errors
    ///
    /// [`MonitorError::MalformedResponse`] if the sample's columns differ
    /// from the log header.
    pub fn append(&mut self, sample: &Sample) -> MonitorResult<()> {
        if sample.schema().columns() != self.header.as_slice() {
            return Err(MonitorError::MalformedResponse(format!(
                "sample columns {:?} do not match log header {:?}",
                sample.schema().columns(),
                self.header
            )));
        }
        self.append_row(sample.year(), &sample.to_row())
    }

    /// Append a pre-rendered row to the staging file of `year`.
    ///
    /// The header is written once, when the staging file is created.
    pub fn append_row(&mut self, year: i32, row: &[String]) -> MonitorResult<()> {
        if row.len() != self.header.len() {
            return Err(MonitorError::MalformedResponse(format!(
                "row has {} fields, header has {}",
                row.len(),
                self.header.len()
            )));
        }

        let path = self.staging_path(year);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        if !self.touched_years.contains(&year) {
            repair_staging(&path)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        let fresh = file.metadata()?.len() == 0;

        let mut writer = csv::Writer::from_writer(Vec::new());
        if fresh {
            writer.write_record(&self.header)?;
            tracing::info!(path = %path.display(), "created staging log");
        }
        writer.write_record(row)?;
        let encoded = writer
            .into_inner()
            .map_err(|e| MonitorError::Storage(format!("csv flush failed: {e}")))?;

        let mut member = GzEncoder::new(Vec::new(), Compression::default());
        member.write_all(&encoded)?;
        file.write_all(&member.finish()?)?;
        file.flush()?;

        self.touched_years.insert(year);
        Ok(())
    }

    /// Compact the staging file of `year` into its final file.
    pub fn recompress(&self, year: i32) -> MonitorResult<PathBuf> {
        let target = self.final_path(year);
        recompress_file(&self.staging_path(year), &target)?;
        Ok(target)
    }

    /// Compact every year touched during this run.
    ///
    /// Every year is attempted; the first error is returned afterwards.
    pub fn recompress_all(&self) -> MonitorResult<Vec<PathBuf>> {
        let mut written = Vec::new();
        let mut first_error = None;
        for year in self.touched_years() {
            match self.recompress(year) {
                Ok(path) => written.push(path),
                Err(e) => {
                    tracing::error!(year, subsystem = %self.subsystem, error = %e, "recompress failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }

    /// End the run: compact every touched year once and drop the log.
    pub fn finish(self) -> MonitorResult<Vec<PathBuf>> {
        let written = self.recompress_all()?;
        tracing::info!(
            subsystem = %self.subsystem,
            files = written.len(),
            "logs recompressed"
        );
        Ok(written)
    }
}

/// Rewrite `staging` as a single gzip member at `target`.
///
/// The output has a zero gzip mtime, so the same staging content always
/// produces the same bytes. It is written to a sibling temp file and renamed
/// into place. A truncated trailing member (a crash mid-append) is dropped
/// along with its partial row.
pub fn recompress_file(staging: &Path, target: &Path) -> MonitorResult<()> {
    let raw = fs::read(staging).map_err(|e| {
        MonitorError::Storage(format!("cannot open staging log {}: {e}", staging.display()))
    })?;

    let members = decode_members(&raw);
    let mut decoded = members.decoded;
    let keep = decoded.iter().rposition(|b| *b == b'\n').map_or(0, |i| i + 1);
    if members.valid_len != raw.len() || keep != decoded.len() {
        tracing::warn!(
            path = %staging.display(),
            error = ?members.error,
            dropped_bytes = raw.len() - members.valid_len,
            "staging log has a damaged tail"
        );
        decoded.truncate(keep);
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(decoded.as_slice());
    let mut writer = csv::Writer::from_writer(Vec::new());
    let mut rows = 0usize;
    for record in reader.records() {
        writer.write_record(&record?)?;
        rows += 1;
    }
    let encoded = writer
        .into_inner()
        .map_err(|e| MonitorError::Storage(format!("csv flush failed: {e}")))?;

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = target.with_extension("gz.tmp");
    {
        let out = File::create(&tmp)?;
        let mut encoder = GzBuilder::new().mtime(0).write(out, Compression::best());
        encoder.write_all(&encoded)?;
        encoder.finish()?.sync_all()?;
    }
    fs::rename(&tmp, target)?;

    tracing::debug!(
        staging = %staging.display(),
        target = %target.display(),
        rows,
        "recompressed"
    );
    Ok(())
}

/// Complete gzip members at the front of a staging file.
struct Members {
    /// Concatenated content of the complete members.
    decoded: Vec<u8>,
    /// Byte length of the prefix made of complete members.
    valid_len: usize,
    /// Why decoding stopped early, if it did.
    error: Option<std::io::Error>,
}

/// Decode members one at a time, stopping at the first one that fails.
fn decode_members(raw: &[u8]) -> Members {
    let mut decoded = Vec::new();
    let mut rest = raw;
    let mut error = None;
    while !rest.is_empty() {
        let mut member = Vec::new();
        let mut decoder = GzDecoder::new(rest);
        if let Err(e) = decoder.read_to_end(&mut member) {
            error = Some(e);
            break;
        }
        let remaining = decoder.into_inner();
        if remaining.len() == rest.len() {
            break;
        }
        decoded.extend_from_slice(&member);
        rest = remaining;
    }
    Members {
        decoded,
        valid_len: raw.len() - rest.len(),
        error,
    }
}

/// Cut a torn trailing member off an existing staging file.
fn repair_staging(path: &Path) -> MonitorResult<()> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    let members = decode_members(&raw);
    if members.valid_len < raw.len() {
        tracing::warn!(
            path = %path.display(),
            error = ?members.error,
            dropped_bytes = raw.len() - members.valid_len,
            "truncating torn staging log tail"
        );
        OpenOptions::new()
            .write(true)
            .open(path)?
            .set_len(members.valid_len as u64)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::sample::FieldValue;
    use chrono::{Local, TimeZone};
    use flate2::read::MultiGzDecoder;
    use tempfile::tempdir;

    fn schema() -> SampleSchema {
        SampleSchema::new(["Pressure(Pa)"])
    }

    fn sample(year: i32, second: u32, value: &str) -> Sample {
        let ts = Local.with_ymd_and_hms(year, 6, 1, 12, 0, second).unwrap();
        Sample::new(schema(), ts, vec![FieldValue::Text(value.into())]).unwrap()
    }

    fn gunzip(path: &Path) -> String {
        let mut text = String::new();
        MultiGzDecoder::new(File::open(path).unwrap())
            .read_to_string(&mut text)
            .unwrap();
        text
    }

    #[test]
    fn test_file_names() {
        assert_eq!(
            log_file_name("Cryostat", 2024, "DL7"),
            "Cryostat__2024__DL7.csv.gz"
        );
        assert_eq!(
            staging_path(Path::new("/data"), "Cryostat", 2024, "DL7"),
            PathBuf::from("/data/temp/Cryostat__2024__DL7.csv.gz")
        );
    }

    #[test]
    fn test_header_written_once() {
        let dir = tempdir().unwrap();
        let mut log = DurableLog::new(dir.path(), "Cryostat", "DL7", &schema()).unwrap();
        log.append(&sample(2024, 0, "2.5E-3")).unwrap();
        log.append(&sample(2024, 1, "2.6E-3")).unwrap();

        let text = gunzip(&log.staging_path(2024));
        assert_eq!(
            text,
            "Time,Pressure(Pa)\n\
             2024-06-01 12:00:00.000000,2.5E-3\n\
             2024-06-01 12:00:01.000000,2.6E-3\n"
        );
    }

    #[test]
    fn test_reopened_log_appends_without_new_header() {
        let dir = tempdir().unwrap();
        {
            let mut log = DurableLog::new(dir.path(), "Cryostat", "DL7", &schema()).unwrap();
            log.append(&sample(2024, 0, "1")).unwrap();
        }
        let mut log = DurableLog::new(dir.path(), "Cryostat", "DL7", &schema()).unwrap();
        log.append(&sample(2024, 1, "2")).unwrap();

        let text = gunzip(&log.staging_path(2024));
        assert_eq!(text.matches("Time,").count(), 1);
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn test_width_mismatch_rejected() {
        let dir = tempdir().unwrap();
        let mut log = DurableLog::new(dir.path(), "Cryostat", "DL7", &schema()).unwrap();
        let err = log
            .append_row(2024, &["2024-06-01 12:00:00.000000".into()])
            .unwrap_err();
        assert!(matches!(err, MonitorError::MalformedResponse(_)));

        let other = Sample::now(SampleSchema::new(["A(K)", "B(K)"]), vec![1.0.into(), 2.0.into()]).unwrap();
        assert!(log.append(&other).is_err());
        assert!(!log.staging_path(2024).exists());
    }

    #[test]
    fn test_recompress_is_idempotent() {
        let dir = tempdir().unwrap();
        let mut log = DurableLog::new(dir.path(), "Cryostat", "DL7", &schema()).unwrap();
        for second in 0..20 {
            log.append(&sample(2024, second, &format!("{second}.0E-3"))).unwrap();
        }

        let target = log.recompress(2024).unwrap();
        let first = fs::read(&target).unwrap();
        log.recompress(2024).unwrap();
        let second = fs::read(&target).unwrap();

        assert_eq!(first, second);
        assert_eq!(gunzip(&target), gunzip(&log.staging_path(2024)));
        assert!(!target.with_extension("gz.tmp").exists());
    }

    #[test]
    fn test_finish_covers_every_touched_year() {
        let dir = tempdir().unwrap();
        let mut log = DurableLog::new(dir.path(), "Cryostat", "DL7", &schema()).unwrap();
        log.append(&sample(2024, 59, "1")).unwrap();
        log.append(&sample(2025, 0, "2")).unwrap();

        let written = log.finish().unwrap();
        assert_eq!(
            written,
            vec![
                dir.path().join("Cryostat__2024__DL7.csv.gz"),
                dir.path().join("Cryostat__2025__DL7.csv.gz"),
            ]
        );
        let text = gunzip(&written[1]);
        assert_eq!(text, "Time,Pressure(Pa)\n2025-06-01 12:00:00.000000,2\n");
    }

    #[test]
    fn test_damaged_tail_is_dropped() {
        let dir = tempdir().unwrap();
        let mut log = DurableLog::new(dir.path(), "Cryostat", "DL7", &schema()).unwrap();
        log.append(&sample(2024, 0, "1")).unwrap();
        log.append(&sample(2024, 1, "2")).unwrap();

        // Half of a third member.
        let mut member = GzEncoder::new(Vec::new(), Compression::default());
        member.write_all(b"2024-06-01 12:00:02.000000,3\n").unwrap();
        let member = member.finish().unwrap();
        let staging = log.staging_path(2024);
        let mut file = OpenOptions::new().append(true).open(&staging).unwrap();
        file.write_all(&member[..member.len() / 2]).unwrap();
        drop(file);

        let target = log.recompress(2024).unwrap();
        let text = gunzip(&target);
        assert_eq!(text.lines().count(), 3);
        assert!(text.ends_with(",2\n"));
    }

    #[test]
    fn test_missing_staging_is_storage_error() {
        let dir = tempdir().unwrap();
        let err = recompress_file(&dir.path().join("missing.csv.gz"), &dir.path().join("out.csv.gz"))
            .unwrap_err();
        assert!(matches!(err, MonitorError::Storage(_)));
    }

    #[test]
    fn test_rejects_empty_names() {
        let dir = tempdir().unwrap();
        assert!(DurableLog::new(dir.path(), "", "DL7", &schema()).is_err());
        assert!(DurableLog::new(dir.path(), "Cryostat", "a/b", &schema()).is_err());
    }
}
