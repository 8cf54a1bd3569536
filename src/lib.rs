//! Vulnerability-scan pipeline for flavored release packages.
//!
//! - [`registry`] pulls the SBOM bundle of a released package from an OCI registry
//! - [`scanner`] runs the external vulnerability scanner with a self-healing retry loop
//! - [`compare`] classifies two reports into new, fixed and existing findings
//! - [`output`] renders those classifications
//! - [`reconcile`] drives all of the above across the flavors of a package

pub mod compare;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod output;
pub mod reconcile;
pub mod registry;
pub mod scanner;

pub use compare::{compare_files, compare_reports, CompareOptions, ComparisonOutcome, Counts};
pub use config::Config;
pub use error::{Error, Result};
pub use model::{ScanTarget, Severity, Vulnerability, VulnerabilityReport};
pub use reconcile::{FlavorScanResult, PackagePlan, ReconcileOptions, Reconciler};
pub use registry::{ArtifactSource, RegistryClient};
pub use scanner::Scanner;
