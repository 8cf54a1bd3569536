use super::Vulnerability;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// A vulnerability report for one component.
///
/// `vulnerabilities` is always present; a document without a vulnerability
/// list loads as an empty report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VulnerabilityReport {
    pub component: Component,
    pub vulnerabilities: Vec<Vulnerability>,
}

#[derive(Deserialize)]
struct CycloneDxDocument {
    #[serde(default)]
    metadata: Option<CycloneDxMetadata>,
    #[serde(default)]
    vulnerabilities: Option<Vec<Vulnerability>>,
}

#[derive(Deserialize)]
struct CycloneDxMetadata {
    #[serde(default)]
    component: Option<Component>,
}

impl VulnerabilityReport {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            component: Component {
                name: name.into(),
                version: version.into(),
            },
            vulnerabilities: Vec::new(),
        }
    }

    pub fn with_vulnerabilities(mut self, vulnerabilities: Vec<Vulnerability>) -> Self {
        self.vulnerabilities = vulnerabilities;
        self
    }

    /// Same component, no findings. Comparing a report against its own empty
    /// baseline surfaces every finding as new.
    pub fn empty_baseline(&self) -> Self {
        Self {
            component: self.component.clone(),
            vulnerabilities: Vec::new(),
        }
    }

    /// Loads a CycloneDX JSON report from disk.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read, is not valid JSON, or contains a
    /// vulnerability without any affected reference.
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path).map_err(|e| Error::io(path, e))?;
        Self::from_slice(&data, path)
    }

    pub(crate) fn from_slice(data: &[u8], path: &Path) -> Result<Self> {
        let document: CycloneDxDocument =
            serde_json::from_slice(data).map_err(|source| Error::ReportParse {
                path: path.to_path_buf(),
                source,
            })?;

        let vulnerabilities = document.vulnerabilities.unwrap_or_default();
        if let Some(v) = vulnerabilities.iter().find(|v| v.affects.is_empty()) {
            return Err(Error::MalformedReport {
                path: path.to_path_buf(),
                reason: format!("vulnerability {} has no affected reference", v.id),
            });
        }

        Ok(Self {
            component: document
                .metadata
                .and_then(|m| m.component)
                .unwrap_or_default(),
            vulnerabilities,
        })
    }
}

/// Loads a base and a new report in one call.
pub fn load_reports(
    base: &Path,
    new: &Path,
) -> Result<(VulnerabilityReport, VulnerabilityReport)> {
    Ok((VulnerabilityReport::load(base)?, VulnerabilityReport::load(new)?))
}
