use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

/// File name of the build manifest inside a package directory.
pub const BUILD_MANIFEST_FILE: &str = "zarf.yaml";

/// The parts of a package build manifest that decide what gets scanned.
///
/// ```yaml
/// metadata:
///   name: elasticsearch
/// components:
///   - name: elasticsearch
///     only:
///       flavor: registry1
///     images:
///       - registry1.dso.mil/ironbank/elastic/elasticsearch:8.16.0
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BuildManifest {
    #[serde(default)]
    pub metadata: ManifestMetadata,
    #[serde(default)]
    pub components: Vec<BuildComponent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ManifestMetadata {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BuildComponent {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub only: Option<ComponentFilter>,
    #[serde(default)]
    pub images: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ComponentFilter {
    #[serde(default)]
    pub flavor: Option<String>,
}

impl BuildComponent {
    fn flavor(&self) -> Option<&str> {
        self.only
            .as_ref()
            .and_then(|only| only.flavor.as_deref())
            .filter(|flavor| !flavor.is_empty())
    }
}

impl BuildManifest {
    /// Reads `zarf.yaml` from `package_dir`.
    pub fn load(package_dir: &Path) -> Result<Self> {
        let path = package_dir.join(BUILD_MANIFEST_FILE);
        let content = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        Self::parse(&content, &path)
    }

    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let manifest: BuildManifest =
            serde_yaml::from_str(content).map_err(|e| Error::Manifest {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        if manifest.metadata.name.is_empty() {
            return Err(Error::Manifest {
                path: path.to_path_buf(),
                reason: "metadata.name is required".to_string(),
            });
        }
        Ok(manifest)
    }

    pub fn package_name(&self) -> &str {
        &self.metadata.name
    }

    /// Distinct flavor names, sorted. A manifest without flavored
    /// components has the single unnamed flavor `""`.
    pub fn flavors(&self) -> Vec<String> {
        let flavors: BTreeSet<&str> = self
            .components
            .iter()
            .filter_map(BuildComponent::flavor)
            .collect();
        if flavors.is_empty() {
            return vec![String::new()];
        }
        flavors.into_iter().map(str::to_string).collect()
    }

    /// Images built for `flavor`: those of flavorless components plus those
    /// restricted to `flavor`, in manifest order without duplicates.
    pub fn images_for(&self, flavor: &str) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.components
            .iter()
            .filter(|c| c.flavor().map_or(true, |f| f == flavor))
            .flat_map(|c| c.images.iter())
            .filter(|image| seen.insert(image.as_str()))
            .cloned()
            .collect()
    }
}
