//! Core data types for vulnerability reports, findings and scan targets.
//!
//! - [`VulnerabilityReport`] - A scanner report for one component
//! - [`Vulnerability`] - A single finding inside a report
//! - [`VulnerabilityIdentity`] - The key used to match a finding across two reports
//! - [`ComparisonStatus`] - Whether a finding is new, existing or fixed
//! - [`ScanTarget`] - What the scanner is pointed at
//!
//! # Example
//!
//! ```
//! use flavorscan::model::{Severity, ScanTarget};
//!
//! assert_eq!(Severity::parse("HIGH"), Severity::High);
//!
//! let target = ScanTarget::image("ghcr.io/org/app:1.0");
//! assert_eq!(target.argument(), "registry:ghcr.io/org/app:1.0");
//! ```

mod report;
mod target;
mod vulnerability;

pub use report::*;
pub use target::*;
pub use vulnerability::*;
