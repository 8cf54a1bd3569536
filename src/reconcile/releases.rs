use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::fmt;

pub const DEFAULT_PACKAGE_API_URL: &str = "https://api.github.com";
const GITHUB_ACCEPT: &str = "application/vnd.github+json";
const PAGE_SIZE: &str = "100";

/// Location of a published package, `host/owner/package...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub host: String,
    pub path: String,
}

impl Repository {
    /// Parses `ghcr.io/org/packages/uds/elasticsearch`. A leading
    /// `https://`, `http://` or `oci://` is ignored.
    pub fn parse(reference: &str) -> Result<Self> {
        let trimmed = ["https://", "http://", "oci://"]
            .iter()
            .find_map(|scheme| reference.strip_prefix(scheme))
            .unwrap_or(reference)
            .trim_matches('/');

        match trimmed.split_once('/') {
            Some((host, path)) if !host.is_empty() && path.contains('/') => Ok(Self {
                host: host.to_string(),
                path: path.to_string(),
            }),
            _ => Err(Error::Config(format!(
                "repository '{}' must look like host/owner/package",
                reference
            ))),
        }
    }

    /// `https://{host}/v2`
    pub fn registry_base(&self) -> String {
        format!("https://{}/v2", self.host)
    }

    pub fn owner(&self) -> &str {
        self.path.split_once('/').map_or(&self.path, |(owner, _)| owner)
    }

    pub fn package(&self) -> &str {
        self.path.split_once('/').map_or("", |(_, package)| package)
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.host, self.path)
    }
}

/// One published version of a container package.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackageVersion {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: VersionMetadata,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VersionMetadata {
    #[serde(default)]
    pub container: ContainerMetadata,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerMetadata {
    #[serde(default)]
    pub tags: Vec<String>,
}

impl PackageVersion {
    pub fn tags(&self) -> &[String] {
        &self.metadata.container.tags
    }
}

/// Lists the published versions of a package.
pub trait ReleaseLookup {
    /// Versions of `repository`, in any order. A package that was never
    /// published has no versions.
    fn published_versions(&self, repository: &Repository) -> Result<Vec<PackageVersion>>;
}

/// Picks the newest tag belonging to `flavor`, skipping `exclude`.
///
/// Flavor tags end in `-{flavor}`; the unnamed flavor accepts any tag.
/// Versions are ordered newest first by creation time, versions without one
/// keep their listed order after the dated ones.
pub fn select_tag(
    mut versions: Vec<PackageVersion>,
    flavor: &str,
    exclude: Option<&str>,
) -> Option<String> {
    versions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let suffix = format!("-{}", flavor);

    versions
        .iter()
        .flat_map(|v| v.tags().iter())
        .find(|tag| {
            (flavor.is_empty() || tag.ends_with(&suffix)) && Some(tag.as_str()) != exclude
        })
        .cloned()
}

/// Newest released tag of `flavor` in `repository`, if any.
pub fn latest_release_tag(
    lookup: &dyn ReleaseLookup,
    repository: &Repository,
    flavor: &str,
    exclude: Option<&str>,
) -> Result<Option<String>> {
    let versions = lookup.published_versions(repository)?;
    tracing::debug!(%repository, count = versions.len(), "listed published versions");
    Ok(select_tag(versions, flavor, exclude))
}

/// Container package listing through the GitHub packages API.
pub struct GitHubPackages {
    client: reqwest::blocking::Client,
    api_url: String,
    token: Option<String>,
}

impl GitHubPackages {
    pub fn new(api_url: impl Into<String>, token: Option<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("flavorscan/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(Error::HttpClient)?;
        Ok(Self {
            client,
            api_url: api_url.into(),
            token,
        })
    }

    /// Client using `GITHUB_TOKEN` when set.
    pub fn from_env(api_url: impl Into<String>) -> Result<Self> {
        let token = std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty());
        Self::new(api_url, token)
    }

    /// `{api}/orgs/{owner}/packages/container/{package}/versions`, with the
    /// package path percent-encoded as a single segment.
    pub fn versions_url(&self, repository: &Repository) -> Result<Url> {
        let invalid = || Error::Config(format!("invalid package API URL '{}'", self.api_url));
        let mut url = Url::parse(&self.api_url).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend([
                "orgs",
                repository.owner(),
                "packages",
                "container",
                repository.package(),
                "versions",
            ]);
        url.query_pairs_mut().append_pair("per_page", PAGE_SIZE);
        Ok(url)
    }
}

impl ReleaseLookup for GitHubPackages {
    fn published_versions(&self, repository: &Repository) -> Result<Vec<PackageVersion>> {
        let url = self.versions_url(repository)?;
        tracing::debug!(%url, "listing package versions");

        let mut request = self
            .client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, GITHUB_ACCEPT);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().map_err(|source| Error::Http {
            url: url.to_string(),
            source,
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            tracing::debug!(%repository, "package has never been published");
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(Error::ReleaseLookup {
                repository: repository.to_string(),
                reason: format!("{} returned {}", url, status),
            });
        }

        let body = response.bytes().map_err(|source| Error::Http {
            url: url.to_string(),
            source,
        })?;
        serde_json::from_slice(&body).map_err(|source| Error::Decode {
            url: url.to_string(),
            source,
        })
    }
}
