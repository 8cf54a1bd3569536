//! Invocation of the external vulnerability scanner.
//!
//! [`Scanner`] turns a [`ScanTarget`] into a CycloneDX report on disk. The
//! scanner keeps a local vulnerability database that can end up corrupt; when
//! a scan fails, the database status is checked and, if it reports the database
//! as unusable, refreshed before trying again.
//!
//! | Subprocess | Arguments | Purpose |
//! |------------|-----------|---------|
//! | scan | `--add-cpes-if-none --output cyclonedx-json -v --file <out> <target>` | Produce a report |
//! | check | `db status` | Detect a corrupt database |
//! | refresh | `db update` | Rebuild the database |
//!
//! # Example
//!
//! ```no_run
//! use flavorscan::model::ScanTarget;
//! use flavorscan::scanner::{ScanOptions, Scanner, SystemRunner};
//! use std::path::Path;
//!
//! let runner = SystemRunner;
//! let scanner = Scanner::new(&runner, ScanOptions::default());
//! let report = scanner.scan(&ScanTarget::image("alpine:3.19"), Path::new("out"))?;
//! println!("report written to {}", report.display());
//! # Ok::<(), flavorscan::Error>(())
//! ```

mod process;
mod sanitize;

pub use process::{OutputRouting, ProcessRunner, SystemRunner};
pub use sanitize::{sanitize_filename, PLACEHOLDER_NAME};

use crate::error::{Error, Result};
use crate::model::{strip_scheme, ScanTarget};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use walkdir::WalkDir;

/// Substring in `db status` output that means the database must be rebuilt.
pub const DB_UNUSABLE_MARKER: &str = "failed to load vulnerability db";

/// Extension of every report the scanner writes.
pub const REPORT_EXTENSION: &str = "json";

#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Scanner executable.
    pub program: String,
    /// Scan attempts allowed while the database keeps failing.
    pub max_retries: u32,
    /// Pause after each database refresh.
    pub backoff: Duration,
    /// Route subprocess output to stderr instead of discarding it.
    pub verbose: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            program: "grype".to_string(),
            max_retries: 3,
            backoff: Duration::from_secs(5),
            verbose: false,
        }
    }
}

pub struct Scanner<'a> {
    runner: &'a dyn ProcessRunner,
    options: ScanOptions,
}

impl<'a> Scanner<'a> {
    pub fn new(runner: &'a dyn ProcessRunner, options: ScanOptions) -> Self {
        Self { runner, options }
    }

    /// Scans `target` and returns the path of the written report.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ScanFailed`] when the scanner fails for a reason other
    /// than a corrupt database, or keeps failing after `max_retries` attempts.
    pub fn scan(&self, target: &ScanTarget, output_dir: &Path) -> Result<PathBuf> {
        if output_dir.as_os_str().is_empty() {
            return Err(Error::OutputDirMissing);
        }
        fs::create_dir_all(output_dir).map_err(|e| Error::io(output_dir, e))?;

        let output_path = output_dir.join(report_file_name(target));
        tracing::debug!(target = %target, output = %output_path.display(), "scanning");

        let args = vec![
            "--add-cpes-if-none".to_string(),
            "--output".to_string(),
            "cyclonedx-json".to_string(),
            "-v".to_string(),
            "--file".to_string(),
            output_path.display().to_string(),
            target.argument(),
        ];

        self.run_with_retries(&args)?;
        Ok(output_path)
    }

    /// Scans every image in order. Keys of the result are the image targets
    /// as handed to the scanner (with scheme).
    pub fn scan_images(
        &self,
        images: &[String],
        output_dir: &Path,
    ) -> Result<BTreeMap<String, PathBuf>> {
        let mut results = BTreeMap::new();
        for image in images {
            let target = ScanTarget::image(image.as_str());
            let report = self.scan(&target, output_dir)?;
            results.insert(target.to_string(), report);
        }
        Ok(results)
    }

    /// Scans every `*.json` file directly inside `sbom_dir`. Keys of the
    /// result are the SBOM paths.
    pub fn scan_sbom_dir(
        &self,
        sbom_dir: &Path,
        output_dir: &Path,
    ) -> Result<BTreeMap<String, PathBuf>> {
        let mut sboms = Vec::new();
        for entry in WalkDir::new(sbom_dir).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(sbom_dir).to_path_buf();
                Error::io(path, e.into())
            })?;
            let is_json = entry
                .path()
                .extension()
                .is_some_and(|ext| ext == REPORT_EXTENSION);
            if entry.file_type().is_file() && is_json {
                sboms.push(entry.into_path());
            }
        }

        if sboms.is_empty() {
            return Err(Error::NoSboms {
                dir: sbom_dir.to_path_buf(),
            });
        }
        tracing::debug!(count = sboms.len(), dir = %sbom_dir.display(), "found SBOM files to scan");

        let mut results = BTreeMap::new();
        for sbom in sboms {
            let report = self.scan(&ScanTarget::sbom(&sbom), output_dir)?;
            results.insert(sbom.display().to_string(), report);
        }
        Ok(results)
    }

    fn run_with_retries(&self, args: &[String]) -> Result<()> {
        let program = self.options.program.as_str();
        let routing = OutputRouting::for_verbosity(self.options.verbose);
        let max_retries = self.options.max_retries;

        let mut retries = 0;
        while retries < max_retries {
            tracing::debug!(
                attempt = retries + 1,
                command = %format!("{} {}", program, args.join(" ")),
                "running scan"
            );

            let succeeded = self
                .runner
                .run(program, args, routing)
                .map_err(|source| Error::Spawn {
                    program: program.to_string(),
                    source,
                })?;
            if succeeded {
                return Ok(());
            }
            tracing::debug!(attempt = retries + 1, "scan attempt failed");

            if !self.database_unusable(program) {
                return Err(Error::ScanFailed {
                    args: args.to_vec(),
                });
            }

            tracing::info!(
                attempt = retries + 1,
                max_retries,
                "vulnerability database error detected, updating database"
            );
            match self.runner.run(program, &db_args("update"), routing) {
                Ok(true) => {}
                Ok(false) => tracing::info!("failed to update vulnerability database"),
                Err(e) => tracing::info!(error = %e, "failed to update vulnerability database"),
            }

            retries += 1;
            thread::sleep(self.options.backoff);
        }

        Err(Error::ScanFailed {
            args: args.to_vec(),
        })
    }

    fn database_unusable(&self, program: &str) -> bool {
        match self.runner.combined_output(program, &db_args("status")) {
            Ok(output) => {
                let output = String::from_utf8_lossy(&output);
                if self.options.verbose {
                    tracing::debug!(status = %output.trim(), "database status");
                }
                output.contains(DB_UNUSABLE_MARKER)
            }
            Err(e) => {
                tracing::debug!(error = %e, "database status check failed");
                false
            }
        }
    }
}

fn db_args(subcommand: &str) -> Vec<String> {
    vec!["db".to_string(), subcommand.to_string()]
}

/// Deterministic report file name for `target`.
///
/// Images use their reference without scheme. SBOMs use the image reference
/// recorded in the SBOM (`source.metadata.userInput`) when present, else the
/// SBOM's own file stem.
pub fn report_file_name(target: &ScanTarget) -> String {
    let stem = match target {
        ScanTarget::Image(reference) => sanitize_filename(strip_scheme(reference)),
        ScanTarget::Sbom(path) => match sbom_image_reference(path) {
            Some(reference) => {
                tracing::debug!(reference = %reference, "found image reference in SBOM");
                sanitize_filename(strip_scheme(&reference))
            }
            None => {
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                sanitize_filename(&stem)
            }
        },
    };
    format!("{}.{}", stem, REPORT_EXTENSION)
}

#[derive(Deserialize)]
struct SbomDocument {
    source: Option<SbomSource>,
}

#[derive(Deserialize)]
struct SbomSource {
    metadata: Option<SbomSourceMetadata>,
}

#[derive(Deserialize)]
struct SbomSourceMetadata {
    #[serde(rename = "userInput")]
    user_input: Option<String>,
}

fn sbom_image_reference(path: &Path) -> Option<String> {
    let data = fs::read(path).ok()?;
    let document: SbomDocument = serde_json::from_slice(&data).ok()?;
    document
        .source?
        .metadata?
        .user_input
        .filter(|input| !input.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::io;

    /// Scripted stand-in for the scanner binary.
    #[derive(Default)]
    struct FakeRunner {
        /// Exit results for successive scan runs; `true` once exhausted.
        scan_results: RefCell<Vec<bool>>,
        status_output: String,
        scans: Cell<u32>,
        status_checks: Cell<u32>,
        updates: Cell<u32>,
        last_args: RefCell<Vec<String>>,
    }

    impl FakeRunner {
        fn scripted(results: &[bool], status_output: &str) -> Self {
            Self {
                scan_results: RefCell::new(results.iter().rev().copied().collect()),
                status_output: status_output.to_string(),
                ..Default::default()
            }
        }
    }

    impl ProcessRunner for FakeRunner {
        fn run(&self, _program: &str, args: &[String], _routing: OutputRouting) -> io::Result<bool> {
            if args.first().map(String::as_str) == Some("db") {
                self.updates.set(self.updates.get() + 1);
                return Ok(true);
            }
            self.scans.set(self.scans.get() + 1);
            *self.last_args.borrow_mut() = args.to_vec();
            Ok(self.scan_results.borrow_mut().pop().unwrap_or(true))
        }

        fn combined_output(&self, _program: &str, _args: &[String]) -> io::Result<Vec<u8>> {
            self.status_checks.set(self.status_checks.get() + 1);
            Ok(self.status_output.clone().into_bytes())
        }
    }

    fn options() -> ScanOptions {
        ScanOptions {
            backoff: Duration::ZERO,
            ..Default::default()
        }
    }

    #[test]
    fn test_scan_success_first_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::scripted(&[true], "");
        let scanner = Scanner::new(&runner, options());

        let target = ScanTarget::image("example.com/bitnami/redis:7.2");
        let path = scanner.scan(&target, dir.path()).unwrap();

        assert_eq!(path, dir.path().join("redis_7.2.json"));
        assert_eq!(runner.scans.get(), 1);
        assert_eq!(runner.status_checks.get(), 0);

        let args = runner.last_args.borrow();
        assert_eq!(args.last().unwrap(), "registry:example.com/bitnami/redis:7.2");
        assert!(args.windows(2).any(|w| w[0] == "--file" && w[1] == path.display().to_string()));
        assert!(args.windows(2).any(|w| w[0] == "--output" && w[1] == "cyclonedx-json"));
    }

    #[test]
    fn test_scan_heals_corrupt_database() {
        let dir = tempfile::tempdir().unwrap();
        let status = format!("error: {}: checksum mismatch", DB_UNUSABLE_MARKER);
        let runner = FakeRunner::scripted(&[false, false, true], &status);
        let scanner = Scanner::new(&runner, options());

        let result = scanner.scan(&ScanTarget::image("alpine:3.19"), dir.path());

        assert!(result.is_ok());
        assert_eq!(runner.scans.get(), 3);
        assert_eq!(runner.status_checks.get(), 2);
        assert_eq!(runner.updates.get(), 2);
    }

    #[test]
    fn test_scan_fails_fast_without_marker() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::scripted(&[false, true], "database is healthy");
        let scanner = Scanner::new(&runner, options());

        let err = scanner
            .scan(&ScanTarget::image("alpine:3.19"), dir.path())
            .unwrap_err();

        assert!(matches!(err, Error::ScanFailed { .. }));
        assert_eq!(runner.scans.get(), 1);
        assert_eq!(runner.updates.get(), 0);
    }

    #[test]
    fn test_scan_gives_up_after_max_retries() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::scripted(&[false, false, false, true], DB_UNUSABLE_MARKER);
        let scanner = Scanner::new(&runner, options());

        let err = scanner
            .scan(&ScanTarget::image("alpine:3.19"), dir.path())
            .unwrap_err();

        match err {
            Error::ScanFailed { args } => assert_eq!(args.last().unwrap(), "registry:alpine:3.19"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(runner.scans.get(), 3);
        assert_eq!(runner.updates.get(), 3);
    }

    #[test]
    fn test_scan_requires_output_dir() {
        let runner = FakeRunner::default();
        let scanner = Scanner::new(&runner, options());
        let err = scanner
            .scan(&ScanTarget::image("alpine"), Path::new(""))
            .unwrap_err();
        assert!(matches!(err, Error::OutputDirMissing));
        assert_eq!(runner.scans.get(), 0);
    }

    #[test]
    fn test_report_name_from_sbom_user_input() {
        let dir = tempfile::tempdir().unwrap();
        let sbom = dir.path().join("whatever.json");
        fs::write(
            &sbom,
            r#"{"source":{"metadata":{"userInput":"docker:example.com/opensource/bitnami/elasticsearch:8.16.0"}}}"#,
        )
        .unwrap();
        assert_eq!(
            report_file_name(&ScanTarget::sbom(&sbom)),
            "elasticsearch_8.16.0.json"
        );
    }

    #[test]
    fn test_report_name_falls_back_to_sbom_stem() {
        let dir = tempfile::tempdir().unwrap();
        let sbom = dir.path().join("busybox:1.36.json");
        fs::write(&sbom, r#"{"source":{"metadata":{"userInput":""}}}"#).unwrap();
        assert_eq!(report_file_name(&ScanTarget::sbom(&sbom)), "busybox_1.36.json");

        let missing = dir.path().join("gone.json");
        assert_eq!(report_file_name(&ScanTarget::sbom(&missing)), "gone.json");
    }

    #[test]
    fn test_scan_sbom_dir() {
        let sboms = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        fs::write(sboms.path().join("b.json"), "{}").unwrap();
        fs::write(sboms.path().join("a.json"), "{}").unwrap();
        fs::write(sboms.path().join("notes.txt"), "skip me").unwrap();

        let runner = FakeRunner::default();
        let scanner = Scanner::new(&runner, options());
        let results = scanner.scan_sbom_dir(sboms.path(), out.path()).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(runner.scans.get(), 2);
        let reports: Vec<_> = results.values().cloned().collect();
        assert_eq!(reports, [out.path().join("a.json"), out.path().join("b.json")]);
        assert!(runner.last_args.borrow().last().unwrap().starts_with("sbom:"));
    }

    #[test]
    fn test_scan_sbom_dir_empty() {
        let sboms = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let runner = FakeRunner::default();
        let scanner = Scanner::new(&runner, options());
        let err = scanner.scan_sbom_dir(sboms.path(), out.path()).unwrap_err();
        assert!(matches!(err, Error::NoSboms { .. }));
    }

    #[test]
    fn test_scan_images_keys_carry_scheme() {
        let out = tempfile::tempdir().unwrap();
        let runner = FakeRunner::default();
        let scanner = Scanner::new(&runner, options());
        let images = vec![
            "alpine:3.19".to_string(),
            "docker:busybox:1.36".to_string(),
        ];
        let results = scanner.scan_images(&images, out.path()).unwrap();
        assert_eq!(
            results.get("registry:alpine:3.19"),
            Some(&out.path().join("alpine_3.19.json"))
        );
        assert_eq!(
            results.get("docker:busybox:1.36"),
            Some(&out.path().join("busybox_1.36.json"))
        );
    }
}
