use crate::error::{Error, Result};
use semver::Version;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// File name of the release configuration inside a package directory.
pub const RELEASE_CONFIG_FILE: &str = "releaser.yaml";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseFlavor {
    pub name: String,
    pub version: String,
    /// Repository the flavor is published under, replacing the configured base.
    #[serde(default)]
    pub publish_package_url: Option<String>,
}

/// Per-flavor release versions of a package.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReleaseConfig {
    #[serde(default)]
    pub flavors: Vec<ReleaseFlavor>,
}

impl ReleaseConfig {
    /// Reads `releaser.yaml` from `package_dir`, if present.
    pub fn load_optional(package_dir: &Path) -> Result<Option<Self>> {
        let path = package_dir.join(RELEASE_CONFIG_FILE);
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no release config");
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        Self::parse(&content, &path).map(Some)
    }

    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let invalid = |reason: String| Error::ReleaseConfig {
            path: PathBuf::from(path),
            reason,
        };

        let config: ReleaseConfig =
            serde_yaml::from_str(content).map_err(|e| invalid(e.to_string()))?;
        if config.flavors.is_empty() {
            return Err(invalid("at least one flavor must be defined".to_string()));
        }

        let mut names = BTreeSet::new();
        for flavor in &config.flavors {
            if !names.insert(flavor.name.as_str()) {
                return Err(invalid(format!("duplicate flavor '{}'", flavor.name)));
            }
            if flavor.version.is_empty() {
                return Err(invalid(format!(
                    "flavor '{}' has no version",
                    flavor.name
                )));
            }
            Version::parse(&flavor.version).map_err(|e| {
                invalid(format!(
                    "flavor '{}' version '{}' is not semver: {}",
                    flavor.name, flavor.version, e
                ))
            })?;
        }

        Ok(config)
    }

    pub fn flavor(&self, name: &str) -> Option<&ReleaseFlavor> {
        self.flavors.iter().find(|f| f.name == name)
    }
}
