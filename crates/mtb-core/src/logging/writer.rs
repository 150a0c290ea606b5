//! Append-only JSONL writer and manifest files.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::entry::{CampaignLogEntry, RunManifest};

/// Appends entries to `{logs_dir}/raw/{date}_{project}.jsonl`.
pub struct CampaignLogWriter {
    project: String,
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl CampaignLogWriter {
    /// Open (or create) today's log file for a project.
    pub fn new(logs_dir: impl AsRef<Path>, project: impl Into<String>) -> std::io::Result<Self> {
        let project = project.into();
        let raw_dir = logs_dir.as_ref().join("raw");
        fs::create_dir_all(&raw_dir)?;

        let date = chrono::Local::now().format("%Y-%m-%d");
        let path = raw_dir.join(format!("{}_{}.jsonl", date, file_safe(&project)));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            project,
            writer: Mutex::new(BufWriter::new(file)),
            path,
        })
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry and flush, so a crashed run keeps its trail.
    pub fn write(&self, entry: &CampaignLogEntry) -> std::io::Result<()> {
        let json = entry
            .to_json_line()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let mut writer = self.writer.lock();
        writeln!(writer, "{}", json)?;
        writer.flush()
    }

    pub fn flush(&self) -> std::io::Result<()> {
        self.writer.lock().flush()
    }
}

impl Drop for CampaignLogWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_') { c } else { '_' })
        .collect()
}

/// Write a run manifest to `{logs_dir}/sessions/{session_id}.json`.
pub fn write_run_manifest(
    logs_dir: impl AsRef<Path>,
    manifest: &RunManifest,
) -> std::io::Result<PathBuf> {
    let sessions_dir = logs_dir.as_ref().join("sessions");
    fs::create_dir_all(&sessions_dir)?;

    let path = sessions_dir.join(format!("{}.json", manifest.session_id));
    let json = serde_json::to_string_pretty(manifest)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    fs::write(&path, json)?;
    Ok(path)
}

/// Read every entry under `{logs_dir}/raw`, ordered by timestamp.
///
/// Lines that are not valid entries are skipped.
pub fn read_entries(logs_dir: impl AsRef<Path>) -> std::io::Result<Vec<CampaignLogEntry>> {
    let raw_dir = logs_dir.as_ref().join("raw");
    if !raw_dir.exists() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for file in fs::read_dir(&raw_dir)? {
        let path = file?.path();
        if path.extension().is_some_and(|e| e == "jsonl") {
            let content = fs::read_to_string(&path)?;
            entries.extend(
                content
                    .lines()
                    .filter(|l| !l.trim().is_empty())
                    .filter_map(|l| CampaignLogEntry::from_json_line(l).ok()),
            );
        }
    }
    entries.sort_by(|a, b| a.ts.cmp(&b.ts));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_writer_creates_raw_file() {
        let temp = TempDir::new().unwrap();
        let logs_dir = temp.path().join("logs");

        let writer = CampaignLogWriter::new(&logs_dir, "Wind Park/1").unwrap();
        assert!(writer.path().exists());
        assert!(writer
            .path()
            .to_string_lossy()
            .ends_with("_Wind_Park_1.jsonl"));
        assert_eq!(writer.project(), "Wind Park/1");
    }

    #[test]
    fn test_entries_are_appended_and_read_back() {
        let temp = TempDir::new().unwrap();
        let writer = CampaignLogWriter::new(temp.path(), "Plant").unwrap();
        writer
            .write(&CampaignLogEntry::new("info", "Plant", "t", "first"))
            .unwrap();
        writer
            .write(&CampaignLogEntry::new("debug", "Plant", "t", "second"))
            .unwrap();
        std::fs::OpenOptions::new()
            .append(true)
            .open(writer.path())
            .and_then(|mut f| writeln!(f, "not json"))
            .unwrap();
        drop(writer);

        let entries = read_entries(temp.path()).unwrap();
        let msgs: Vec<_> = entries.iter().map(|e| e.msg.as_str()).collect();
        assert_eq!(msgs.len(), 2);
        assert!(msgs.contains(&"first"));
        assert!(msgs.contains(&"second"));
    }

    #[test]
    fn test_read_entries_without_logs() {
        let temp = TempDir::new().unwrap();
        assert!(read_entries(temp.path()).unwrap().is_empty());
    }

    #[test]
    fn test_run_manifest_written_to_sessions() {
        let temp = TempDir::new().unwrap();
        let manifest = RunManifest::new("Plant", serde_json::json!({ "contexts": [{ "rank": 1 }] }));
        let path = write_run_manifest(temp.path(), &manifest).unwrap();

        assert!(path.starts_with(temp.path().join("sessions")));
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("\"rank\": 1"));
    }
}
