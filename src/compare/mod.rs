//! Classification of findings between a base report and a new report.
//!
//! Every identity in the base report starts out [`ComparisonStatus::Fixed`].
//! Base identities seen again in the new report become `Existing`; identities only
//! in the new report are `New`. One pass over each report, no sorting.
//!
//! # Example
//!
//! ```
//! use flavorscan::compare::{compare, Counts};
//! use flavorscan::model::{Vulnerability, VulnerabilityReport};
//!
//! let base = VulnerabilityReport::new("alpine", "3.16")
//!     .with_vulnerabilities(vec![Vulnerability::new("CVE-1", "busybox@1.35")]);
//! let new = VulnerabilityReport::new("alpine", "3.17")
//!     .with_vulnerabilities(vec![Vulnerability::new("CVE-2", "musl@1.2")]);
//!
//! let counts = Counts::from_statuses(&compare(&base, &new));
//! assert_eq!((counts.new, counts.fixed, counts.existing), (1, 1, 0));
//! ```

use crate::error::{Error, Result};
use crate::model::{
    load_reports, ComparisonStatus, Severity, Vulnerability, VulnerabilityIdentity,
    VulnerabilityReport,
};
use crate::output::{render_comparison, OutputFormat};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Identity to status for one comparison.
pub type ComparisonMap = BTreeMap<VulnerabilityIdentity, ComparisonStatus>;

/// Registry mirrors whose prefixes do not change which image a name refers to.
const REGISTRY_PREFIXES: [&str; 6] = [
    "docker.io/library/",
    "docker.io/",
    "registry.hub.docker.com/library/",
    "registry.hub.docker.com/",
    "index.docker.io/library/",
    "index.docker.io/",
];

pub fn compare(base: &VulnerabilityReport, new: &VulnerabilityReport) -> ComparisonMap {
    let mut statuses = ComparisonMap::new();

    for vuln in &base.vulnerabilities {
        statuses.insert(vuln.identity(), ComparisonStatus::Fixed);
    }

    // Only a base finding becomes Existing; repeats within `new` stay New.
    for vuln in &new.vulnerabilities {
        let status = statuses
            .entry(vuln.identity())
            .or_insert(ComparisonStatus::New);
        if *status == ComparisonStatus::Fixed {
            *status = ComparisonStatus::Existing;
        }
    }

    statuses
}

/// Strips the well-known Docker Hub prefixes, applied in order.
pub fn trim_registry_prefixes(name: &str) -> &str {
    REGISTRY_PREFIXES
        .iter()
        .fold(name, |acc, prefix| acc.strip_prefix(prefix).unwrap_or(acc))
}

/// Refuses to compare reports for different components unless `allow_different` is set.
pub fn ensure_same_image(
    base: &VulnerabilityReport,
    new: &VulnerabilityReport,
    allow_different: bool,
) -> Result<()> {
    let base_name = trim_registry_prefixes(&base.component.name);
    let new_name = trim_registry_prefixes(&new.component.name);

    if base_name == new_name {
        return Ok(());
    }

    if allow_different {
        tracing::warn!(
            base = base_name,
            new = new_name,
            "these scans are not for the same image, comparing anyway"
        );
        return Ok(());
    }

    Err(Error::DifferentImages {
        base: base_name.to_string(),
        new: new_name.to_string(),
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub new: usize,
    pub fixed: usize,
    pub existing: usize,
}

impl Counts {
    pub fn from_statuses(statuses: &ComparisonMap) -> Self {
        statuses.values().fold(Self::default(), |mut counts, status| {
            match status {
                ComparisonStatus::New => counts.new += 1,
                ComparisonStatus::Fixed => counts.fixed += 1,
                ComparisonStatus::Existing => counts.existing += 1,
            }
            counts
        })
    }
}

impl std::ops::AddAssign for Counts {
    fn add_assign(&mut self, other: Self) {
        self.new += other.new;
        self.fixed += other.fixed;
        self.existing += other.existing;
    }
}

/// One rendered line of a status section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub id: String,
    pub package: String,
    pub severity: Severity,
    pub url: String,
}

/// A classified pair of reports, ready to be rendered.
#[derive(Debug)]
pub struct Comparison<'a> {
    pub base: &'a VulnerabilityReport,
    pub new: &'a VulnerabilityReport,
    pub statuses: ComparisonMap,
}

impl<'a> Comparison<'a> {
    pub fn new(base: &'a VulnerabilityReport, new: &'a VulnerabilityReport) -> Self {
        Self {
            base,
            new,
            statuses: compare(base, new),
        }
    }

    pub fn counts(&self) -> Counts {
        Counts::from_statuses(&self.statuses)
    }

    /// Rows for `status`, ordered by severity rank, then ID, then package.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingVulnerability`] if an identity in the map has no
    /// matching finding in either report.
    pub fn rows(&self, status: ComparisonStatus) -> Result<Vec<Row>> {
        let mut by_identity: HashMap<VulnerabilityIdentity, &Vulnerability> = HashMap::new();
        for vuln in self.base.vulnerabilities.iter().chain(&self.new.vulnerabilities) {
            by_identity.entry(vuln.identity()).or_insert(vuln);
        }

        let mut rows = self
            .statuses
            .iter()
            .filter(|(_, s)| **s == status)
            .map(|(identity, _)| {
                let vuln = by_identity
                    .get(identity)
                    .ok_or_else(|| Error::MissingVulnerability(identity.to_string()))?;
                Ok(Row {
                    id: vuln.id.clone(),
                    package: identity.package.clone(),
                    severity: vuln.severity(),
                    url: vuln.url().to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        rows.sort_by(|a, b| {
            a.severity
                .rank()
                .cmp(&b.severity.rank())
                .then_with(|| a.id.cmp(&b.id))
                .then_with(|| a.package.cmp(&b.package))
        });
        Ok(rows)
    }
}

/// Caller-selected comparison policy.
#[derive(Debug, Clone, Default)]
pub struct CompareOptions {
    pub format: OutputFormat,
    pub allow_different_images: bool,
    pub fail_on_new: bool,
}

/// Rendered comparison plus the counts policy checks need.
#[derive(Debug, Clone)]
pub struct ComparisonOutcome {
    pub rendered: String,
    pub counts: Counts,
}

impl ComparisonOutcome {
    /// Fails with [`Error::NewVulnerabilities`] when `fail_on_new` is set and
    /// any finding was classified new. Call after the output has been emitted.
    pub fn enforce(&self, fail_on_new: bool) -> Result<()> {
        if fail_on_new && self.counts.new > 0 {
            return Err(Error::NewVulnerabilities(self.counts.new));
        }
        Ok(())
    }
}

/// Guards, classifies and renders one pair of reports.
pub fn compare_reports(
    base: &VulnerabilityReport,
    new: &VulnerabilityReport,
    options: &CompareOptions,
) -> Result<ComparisonOutcome> {
    ensure_same_image(base, new, options.allow_different_images)?;
    let comparison = Comparison::new(base, new);
    Ok(ComparisonOutcome {
        rendered: render_comparison(&comparison, options.format)?,
        counts: comparison.counts(),
    })
}

/// [`compare_reports`] on two report files.
pub fn compare_files(
    base: &Path,
    new: &Path,
    options: &CompareOptions,
) -> Result<ComparisonOutcome> {
    let (base, new) = load_reports(base, new)?;
    compare_reports(&base, &new, options)
}
