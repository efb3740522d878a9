//! sched-analyzer saved output helper type.
//!
//! A collection produces a single trace file. Its location is made of an
//! optional directory and an optional file name; when the name is omitted it
//! defaults to `sched-analyzer.<ext>`, the extension following the trace
//! format.

use std::{
    fs::File,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

use crate::cli::Cli;
use crate::trace::writer::TraceFormat;

const DEFAULT_NAME: &str = "sched-analyzer";

/// The trace file a collection writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    dir: Option<PathBuf>,
    name: Option<String>,
    format: TraceFormat,
}

impl OutputFile {
    pub fn new(dir: Option<PathBuf>, name: Option<String>, format: TraceFormat) -> Self {
        Self { dir, name, format }
    }

    fn file_name(&self) -> String {
        match &self.name {
            Some(n) => n.clone(),
            None => format!("{}.{}", DEFAULT_NAME, self.format.extension()),
        }
    }

    /// Returns the full path of the output file.
    pub fn path(&self) -> PathBuf {
        let name = self.file_name();

        match &self.dir {
            Some(d) => d.join(name),
            None => PathBuf::from(name),
        }
    }

    /// Create the output directory if it does not already exist.
    pub fn create_dir(&self) -> Result<()> {
        if let Some(d) = &self.dir {
            if !Path::exists(d) {
                std::fs::create_dir_all(d)
                    .with_context(|| format!("Failed to create {}", d.display()))?;
            }
        }

        Ok(())
    }

    /// Create and open the output file with write permission, truncating any
    /// previous trace.
    pub fn create(&self) -> Result<File> {
        self.create_dir()?;

        let path = self.path();
        let f = File::create(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;

        Ok(f)
    }
}

impl From<&Cli> for OutputFile {
    fn from(cli: &Cli) -> Self {
        OutputFile::new(cli.output_path.clone(), cli.output.clone(), cli.format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_names() {
        let out = OutputFile::new(None, None, TraceFormat::Perfetto);
        assert_eq!(out.path(), PathBuf::from("sched-analyzer.perfetto-trace"));

        let out = OutputFile::new(Some("/tmp/traces".into()), None, TraceFormat::Json);
        assert_eq!(out.path(), PathBuf::from("/tmp/traces/sched-analyzer.json"));

        let out = OutputFile::new(None, Some("boot.pftrace".into()), TraceFormat::Perfetto);
        assert_eq!(out.path(), PathBuf::from("boot.pftrace"));
    }

    #[test]
    fn test_create_in_missing_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("a").join("b");
        let out = OutputFile::new(Some(dir.clone()), None, TraceFormat::Json);

        let mut f = out.create().unwrap();
        f.write_all(b"[]").unwrap();

        assert!(dir.join("sched-analyzer.json").exists());
    }
}
