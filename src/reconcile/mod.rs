//! Per-flavor orchestration of the two scan passes and their comparison.
//!
//! A package directory holds `zarf.yaml` (what is built, per flavor) and
//! optionally `releaser.yaml` (which flavors are released, at what version).
//! From those a [`PackagePlan`] is built. The [`Reconciler`] then:
//!
//! - scans every image of every flavor into `{out}/{flavor}/` (current pass)
//! - looks up the newest released tag of each flavor, fetches its SBOM bundle
//!   and scans it into `{out}/released/{flavor}/` (released pass)
//! - pairs each current report with the released report of the same image
//!   and renders the comparisons
//!
//! Everything runs sequentially: the scanner's local database is shared and
//! must never be used by two scans at once.

mod manifest;
mod matching;
mod release_config;
mod releases;

pub use manifest::{BuildComponent, BuildManifest, BUILD_MANIFEST_FILE};
pub use matching::{find_released_scan, NameOverride, NameOverrides};
pub use release_config::{ReleaseConfig, ReleaseFlavor, RELEASE_CONFIG_FILE};
pub use releases::{
    latest_release_tag, select_tag, GitHubPackages, PackageVersion, ReleaseLookup, Repository,
    DEFAULT_PACKAGE_API_URL,
};

use crate::compare::{compare_files, compare_reports, CompareOptions, ComparisonOutcome, Counts};
use crate::error::{Error, Result};
use crate::model::{bare_image_name, VulnerabilityReport};
use crate::output::OutputFormat;
use crate::registry::ArtifactSource;
use crate::scanner::Scanner;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// flavor → scan target → report path
pub type FlavorScanResult = BTreeMap<String, BTreeMap<String, PathBuf>>;

/// Directory under the output root that holds released-pass reports.
pub const RELEASED_DIR: &str = "released";

/// Default base for released package repositories.
pub const DEFAULT_BASE_REPOSITORY: &str = "ghcr.io/uds-packages";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlavorPlan {
    pub name: String,
    /// Current release version, when a release config exists.
    pub version: Option<String>,
    /// `{base}/{package}` the flavor is published under.
    pub repository: String,
    pub images: Vec<String>,
}

impl FlavorPlan {
    /// Tag the current version is published under. Never chosen as the
    /// released baseline.
    pub fn release_tag(&self) -> Option<String> {
        self.version.as_ref().map(|version| {
            if self.name.is_empty() {
                version.clone()
            } else {
                format!("{}-{}", version, self.name)
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagePlan {
    pub name: String,
    pub flavors: Vec<FlavorPlan>,
}

impl PackagePlan {
    /// Reads `zarf.yaml` and, when present, `releaser.yaml` from `package_dir`.
    pub fn load(package_dir: &Path, base_repository: &str) -> Result<Self> {
        let manifest = BuildManifest::load(package_dir)?;
        let release = ReleaseConfig::load_optional(package_dir)?;
        Ok(Self::from_parts(&manifest, release.as_ref(), base_repository))
    }

    /// Flavors come from the release config when there is one, otherwise
    /// from the build manifest.
    pub fn from_parts(
        manifest: &BuildManifest,
        release: Option<&ReleaseConfig>,
        base_repository: &str,
    ) -> Self {
        let repository_for = |flavor: Option<&ReleaseFlavor>| {
            let base = flavor
                .and_then(|f| f.publish_package_url.as_deref())
                .filter(|url| !url.is_empty())
                .unwrap_or(base_repository);
            format!("{}/{}", base.trim_end_matches('/'), manifest.package_name())
        };

        let flavors = match release {
            Some(config) => config
                .flavors
                .iter()
                .map(|f| FlavorPlan {
                    name: f.name.clone(),
                    version: Some(f.version.clone()),
                    repository: repository_for(Some(f)),
                    images: manifest.images_for(&f.name),
                })
                .collect(),
            None => manifest
                .flavors()
                .into_iter()
                .map(|name| FlavorPlan {
                    images: manifest.images_for(&name),
                    repository: repository_for(None),
                    version: None,
                    name,
                })
                .collect(),
        };

        Self {
            name: manifest.package_name().to_string(),
            flavors,
        }
    }

    /// Restricts the plan to one flavor.
    pub fn only(mut self, flavor: &str) -> Result<Self> {
        self.flavors.retain(|f| f.name == flavor);
        if self.flavors.is_empty() {
            return Err(Error::Config(format!(
                "flavor '{}' is not defined for package {}",
                flavor, self.name
            )));
        }
        Ok(self)
    }
}

/// Settings for one reconciliation run.
#[derive(Debug, Clone, Default)]
pub struct ReconcileOptions {
    pub output_dir: PathBuf,
    /// Replaces `https://{host}/v2` when fetching released artifacts.
    pub registry_base_url: Option<String>,
    pub overrides: NameOverrides,
    pub compare: CompareOptions,
    /// Keep the fetched SBOM directory instead of removing it.
    pub keep_sboms: bool,
    /// Parent of the fetched SBOM directory, the system temp dir when unset.
    pub scratch_dir: Option<PathBuf>,
}

pub struct Reconciler<'a> {
    scanner: Scanner<'a>,
    releases: &'a dyn ReleaseLookup,
    artifacts: &'a dyn ArtifactSource,
    options: ReconcileOptions,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        scanner: Scanner<'a>,
        releases: &'a dyn ReleaseLookup,
        artifacts: &'a dyn ArtifactSource,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            scanner,
            releases,
            artifacts,
            options,
        }
    }

    fn current_dir(&self, flavor: &str) -> PathBuf {
        self.options.output_dir.join(flavor)
    }

    fn released_dir(&self, flavor: &str) -> PathBuf {
        self.options.output_dir.join(RELEASED_DIR).join(flavor)
    }

    /// Scans the images each flavor builds.
    pub fn scan_current(&self, plan: &PackagePlan) -> Result<FlavorScanResult> {
        let mut results = FlavorScanResult::new();
        for flavor in &plan.flavors {
            tracing::info!(flavor = %flavor.name, images = flavor.images.len(), "scanning current images");
            let scans = self
                .scanner
                .scan_images(&flavor.images, &self.current_dir(&flavor.name))?;
            results.insert(flavor.name.clone(), scans);
        }
        Ok(results)
    }

    /// Scans the SBOMs of each flavor's newest release. Flavors that were
    /// never released, or whose release carries no SBOMs, are left out.
    ///
    /// With `keep_sboms` set the fetched SBOMs survive the run, failed or not.
    pub fn scan_released(&self, plan: &PackagePlan) -> Result<FlavorScanResult> {
        let scratch = self
            .options
            .scratch_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let sbom_root = tempfile::Builder::new()
            .prefix("flavorscan-sboms-")
            .tempdir_in(&scratch)
            .map_err(|e| Error::io(&scratch, e))?;

        let result = self.scan_released_into(plan, sbom_root.path());

        if self.options.keep_sboms {
            let kept = sbom_root.keep();
            tracing::info!(path = %kept.display(), "kept fetched SBOMs");
        }
        result
    }

    fn scan_released_into(&self, plan: &PackagePlan, sbom_root: &Path) -> Result<FlavorScanResult> {
        let mut results = FlavorScanResult::new();
        for flavor in &plan.flavors {
            let repository = Repository::parse(&flavor.repository)?;
            let exclude = flavor.release_tag();
            let tag = latest_release_tag(
                self.releases,
                &repository,
                &flavor.name,
                exclude.as_deref(),
            )?;
            let Some(tag) = tag else {
                tracing::warn!(flavor = %flavor.name, %repository, "no released version found, skipping flavor");
                continue;
            };

            let registry_base = self
                .options
                .registry_base_url
                .clone()
                .unwrap_or_else(|| repository.registry_base());
            let sbom_dir = sbom_root.join(&flavor.name);
            tracing::info!(flavor = %flavor.name, %tag, "fetching released SBOMs");

            let sboms =
                self.artifacts
                    .fetch_artifacts(&registry_base, &repository.path, &tag, &sbom_dir)?;
            if sboms.is_empty() {
                tracing::warn!(flavor = %flavor.name, %tag, "release has no SBOMs, skipping flavor");
                continue;
            }

            let scans = self
                .scanner
                .scan_sbom_dir(&sbom_dir, &self.released_dir(&flavor.name))?;
            results.insert(flavor.name.clone(), scans);
        }
        Ok(results)
    }

    /// Compares every current report with its released counterpart.
    ///
    /// A current image without a released report is new: it is compared
    /// against an empty baseline, so all of its findings count as new.
    pub fn compare_flavors(
        &self,
        current: &FlavorScanResult,
        released: &FlavorScanResult,
    ) -> Result<ComparisonOutcome> {
        let mut rendered = String::new();
        let mut counts = Counts::default();

        for (flavor, current_scans) in current {
            let Some(released_scans) = released.get(flavor) else {
                tracing::warn!(flavor = %flavor, "no released scans, skipping comparison");
                continue;
            };

            if self.options.compare.format == OutputFormat::Markdown && !flavor.is_empty() {
                rendered.push_str(&format!("## Flavor: {}\n\n", flavor));
            }
            for (target, current_path) in current_scans {
                let outcome = self.compare_image(target, current_path, released_scans)?;
                rendered.push_str(&outcome.rendered);
                counts += outcome.counts;
            }
        }

        Ok(ComparisonOutcome { rendered, counts })
    }

    fn compare_image(
        &self,
        target: &str,
        current_path: &Path,
        released_scans: &BTreeMap<String, PathBuf>,
    ) -> Result<ComparisonOutcome> {
        let image = bare_image_name(target);
        let overridden = self.options.overrides.released_name(image);
        let lookup_name = overridden.unwrap_or(image);

        match find_released_scan(released_scans, lookup_name) {
            Some(released_path) => {
                tracing::debug!(image, released = %released_path.display(), "matched released scan");
                // A renamed image is expected to report a different component.
                let mut options = self.options.compare.clone();
                options.allow_different_images |= overridden.is_some();
                compare_files(released_path, current_path, &options)
            }
            None => {
                tracing::info!(image, "no released scan, treating as a new image");
                let report = VulnerabilityReport::load(current_path)?;
                compare_reports(&report.empty_baseline(), &report, &self.options.compare)
            }
        }
    }

    /// Both scan passes followed by [`Reconciler::compare_flavors`].
    pub fn scan_and_compare(&self, plan: &PackagePlan) -> Result<ComparisonOutcome> {
        let current = self.scan_current(plan)?;
        let released = self.scan_released(plan)?;
        self.compare_flavors(&current, &released)
    }
}
