use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a finding, as reported in its first rating.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    None,
    Unknown,
    /// A label the rank table does not know about. Always sorts last.
    Other(String),
}

impl Severity {
    pub fn parse(label: &str) -> Self {
        match label.to_lowercase().as_str() {
            "critical" => Severity::Critical,
            "high" => Severity::High,
            "medium" => Severity::Medium,
            "low" => Severity::Low,
            "none" => Severity::None,
            "unknown" => Severity::Unknown,
            _ => Severity::Other(label.to_string()),
        }
    }

    /// Position in the rendering order; lower sorts first.
    pub fn rank(&self) -> u32 {
        match self {
            Severity::Critical => 0,
            Severity::High => 1,
            Severity::Medium => 2,
            Severity::Low => 3,
            Severity::None => 4,
            Severity::Unknown => 5,
            Severity::Other(_) => 100,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::None => "none",
            Severity::Unknown => "unknown",
            Severity::Other(label) => label.as_str(),
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Affects {
    #[serde(rename = "ref")]
    pub reference: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rating {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VulnerabilitySource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advisory {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// A single finding in a CycloneDX vulnerability report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vulnerability {
    pub id: String,
    #[serde(default)]
    pub affects: Vec<Affects>,
    #[serde(default)]
    pub ratings: Vec<Rating>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<VulnerabilitySource>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub advisories: Vec<Advisory>,
}

impl Vulnerability {
    pub fn new(id: impl Into<String>, affected_ref: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            affects: vec![Affects {
                reference: affected_ref.into(),
            }],
            ratings: Vec::new(),
            source: None,
            advisories: Vec::new(),
        }
    }

    pub fn with_severity(mut self, severity: impl Into<String>) -> Self {
        self.ratings.push(Rating {
            severity: Some(severity.into()),
        });
        self
    }

    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source = Some(VulnerabilitySource {
            name: None,
            url: Some(url.into()),
        });
        self
    }

    pub fn with_advisory(mut self, url: impl Into<String>) -> Self {
        self.advisories.push(Advisory {
            url: Some(url.into()),
        });
        self
    }

    /// The (id, package path) key. The version after `@` in the first
    /// affected reference is dropped so that upgrades of the same package match.
    pub fn identity(&self) -> VulnerabilityIdentity {
        let package = self
            .affects
            .first()
            .map(|a| a.reference.split('@').next().unwrap_or_default())
            .unwrap_or_default();
        VulnerabilityIdentity::new(&self.id, package)
    }

    pub fn severity(&self) -> Severity {
        self.ratings
            .first()
            .and_then(|r| r.severity.as_deref())
            .map(Severity::parse)
            .unwrap_or(Severity::Unknown)
    }

    /// Source URL when it is a well-formed absolute URL, else the first advisory URL.
    pub fn url(&self) -> &str {
        let source_url = self.source.as_ref().and_then(|s| s.url.as_deref());
        if let Some(url) = source_url {
            if reqwest::Url::parse(url).is_ok() {
                return url;
            }
        }
        self.advisories
            .iter()
            .find_map(|a| a.url.as_deref())
            .unwrap_or_default()
    }
}

/// Identity of a finding across two reports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VulnerabilityIdentity {
    pub id: String,
    pub package: String,
}

impl VulnerabilityIdentity {
    pub fn new(id: impl Into<String>, package: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            package: package.into(),
        }
    }
}

impl fmt::Display for VulnerabilityIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.id, self.package)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonStatus {
    New,
    Existing,
    Fixed,
}

impl ComparisonStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ComparisonStatus::New => "New",
            ComparisonStatus::Existing => "Existing",
            ComparisonStatus::Fixed => "Fixed",
        }
    }
}
