//! Retrieval of SBOM bundles from an OCI registry.
//!
//! Only the slice of the distribution protocol needed to pull one named blob
//! from one tag is implemented:
//!
//! 1. `GET {base}/{path}/manifests/{tag}` as an image index
//! 2. `GET {base}/{path}/manifests/{digest}` for the first index entry
//! 3. find the layer titled `sboms.tar`
//! 4. `GET {base}/{path}/blobs/{digest}` and stream it through a tar reader,
//!    writing every regular `*json` entry into the output directory
//!
//! Platform selection is not attempted: the first manifest of the index is used.

mod auth;

pub use auth::{auth_token, auth_token_from_env};

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tar::{Archive, EntryType};

pub const IMAGE_INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";
pub const IMAGE_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
pub const BLOB_MEDIA_TYPE: &str = "application/octet-stream";

/// Layer annotation carrying the original file name.
pub const TITLE_ANNOTATION: &str = "org.opencontainers.image.title";
/// Title of the layer that holds the SBOM bundle.
pub const SBOM_BUNDLE_TITLE: &str = "sboms.tar";
/// Suffix of the bundle entries worth extracting.
pub const SBOM_SUFFIX: &str = "json";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArtifactIndex {
    #[serde(default)]
    pub manifests: Vec<IndexEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexEntry {
    pub digest: String,
    #[serde(default)]
    pub platform: Option<Platform>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Platform {
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub os: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArtifactManifest {
    #[serde(default)]
    pub layers: Vec<Layer>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Layer {
    pub digest: String,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

impl ArtifactManifest {
    /// Digest of the first layer whose title annotation equals `title`.
    pub fn layer_titled(&self, title: &str) -> Option<&str> {
        self.layers
            .iter()
            .find(|l| l.annotations.get(TITLE_ANNOTATION).map(String::as_str) == Some(title))
            .map(|l| l.digest.as_str())
    }
}

/// Source of SBOM files for a published package.
pub trait ArtifactSource {
    /// Extracts the SBOM bundle of `package_path:tag` into `output_dir`.
    ///
    /// An artifact without an SBOM bundle yields an empty list.
    fn fetch_artifacts(
        &self,
        registry_base: &str,
        package_path: &str,
        tag: &str,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>>;
}

/// Blocking registry client. One bearer token, attached to every request.
pub struct RegistryClient {
    client: reqwest::blocking::Client,
    token: Option<String>,
}

impl RegistryClient {
    pub fn new(token: Option<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("flavorscan/", env!("CARGO_PKG_VERSION")))
            .timeout(None::<Duration>)
            .build()
            .map_err(Error::HttpClient)?;
        Ok(Self { client, token })
    }

    /// Client authenticated with the token found in the environment, if any.
    pub fn from_env() -> Result<Self> {
        Self::new(auth_token_from_env())
    }

    pub fn fetch_index(&self, url: &str) -> Result<ArtifactIndex> {
        let index = self.get_json(url, IMAGE_INDEX_MEDIA_TYPE)?;
        tracing::debug!(url, "fetched image index");
        Ok(index)
    }

    pub fn fetch_manifest(&self, url: &str) -> Result<ArtifactManifest> {
        self.get_json(url, IMAGE_MANIFEST_MEDIA_TYPE)
    }

    fn get(&self, url: &str, accept: &str) -> Result<reqwest::blocking::Response> {
        tracing::debug!(url, accept, "registry request");
        let mut request = self.client.get(url).header(reqwest::header::ACCEPT, accept);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().map_err(|source| Error::Http {
            url: url.to_string(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status {
                url: url.to_string(),
                status,
            });
        }
        Ok(response)
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str, accept: &str) -> Result<T> {
        let body = self
            .get(url, accept)?
            .bytes()
            .map_err(|source| Error::Http {
                url: url.to_string(),
                source,
            })?;
        serde_json::from_slice(&body).map_err(|source| Error::Decode {
            url: url.to_string(),
            source,
        })
    }
}

impl ArtifactSource for RegistryClient {
    fn fetch_artifacts(
        &self,
        registry_base: &str,
        package_path: &str,
        tag: &str,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        let base = format!(
            "{}/{}",
            registry_base.trim_end_matches('/'),
            package_path.trim_matches('/')
        );

        let index = self.fetch_index(&format!("{}/manifests/{}", base, tag))?;
        let Some(entry) = index.manifests.first() else {
            tracing::debug!(tag, "image index has no manifests");
            return Ok(Vec::new());
        };

        let manifest = self.fetch_manifest(&format!("{}/manifests/{}", base, entry.digest))?;
        let Some(digest) = manifest.layer_titled(SBOM_BUNDLE_TITLE) else {
            tracing::debug!(tag, "no {} layer in manifest", SBOM_BUNDLE_TITLE);
            return Ok(Vec::new());
        };
        tracing::debug!(digest, "found {} layer", SBOM_BUNDLE_TITLE);

        let blob_url = format!("{}/blobs/{}", base, digest);
        let response = self.get(&blob_url, BLOB_MEDIA_TYPE)?;

        fs::create_dir_all(output_dir).map_err(|e| Error::io(output_dir, e))?;
        extract_sboms(response, output_dir).map_err(|e| match e {
            ExtractError::Read(source) => Error::Archive {
                url: blob_url,
                source,
            },
            ExtractError::Write(path, source) => Error::io(path, source),
        })
    }
}

enum ExtractError {
    Read(io::Error),
    Write(PathBuf, io::Error),
}

/// Streams a tar archive, keeping the base name of every regular `*json` entry.
fn extract_sboms<R: io::Read>(
    reader: R,
    output_dir: &Path,
) -> std::result::Result<Vec<PathBuf>, ExtractError> {
    let mut archive = Archive::new(reader);
    let mut extracted = Vec::new();

    for entry in archive.entries().map_err(ExtractError::Read)? {
        let mut entry = entry.map_err(ExtractError::Read)?;
        if entry.header().entry_type() != EntryType::Regular {
            continue;
        }

        let entry_path = entry.path().map_err(ExtractError::Read)?.into_owned();
        if !entry_path.to_string_lossy().ends_with(SBOM_SUFFIX) {
            continue;
        }
        let Some(file_name) = entry_path.file_name() else {
            continue;
        };
        tracing::debug!(name = %entry_path.display(), "extracting sbom");

        let out_path = output_dir.join(file_name);
        let mut out_file =
            File::create(&out_path).map_err(|e| ExtractError::Write(out_path.clone(), e))?;
        io::copy(&mut entry, &mut out_file).map_err(|e| match e.kind() {
            io::ErrorKind::WriteZero | io::ErrorKind::StorageFull => {
                ExtractError::Write(out_path.clone(), e)
            }
            _ => ExtractError::Read(e),
        })?;
        extracted.push(out_path);
    }

    Ok(extracted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tar::{Builder, Header};

    fn tar_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = Builder::new(Vec::new());
        for (name, data) in entries {
            let mut header = Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_entry_type(EntryType::Regular);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn test_layer_titled() {
        let manifest: ArtifactManifest = serde_json::from_str(
            r#"{"layers":[
                {"digest":"sha256:aaa","annotations":{"org.opencontainers.image.title":"zarf.yaml"}},
                {"digest":"sha256:bbb"},
                {"digest":"sha256:ccc","annotations":{"org.opencontainers.image.title":"sboms.tar"}}
            ]}"#,
        )
        .unwrap();
        assert_eq!(manifest.layer_titled(SBOM_BUNDLE_TITLE), Some("sha256:ccc"));
        assert_eq!(manifest.layer_titled("missing.tar"), None);
    }

    #[test]
    fn test_index_tolerates_missing_fields() {
        let index: ArtifactIndex = serde_json::from_str(
            r#"{"schemaVersion":2,"manifests":[{"digest":"sha256:abc","size":12}]}"#,
        )
        .unwrap();
        assert_eq!(index.manifests[0].digest, "sha256:abc");
        assert!(index.manifests[0].platform.is_none());
    }

    #[test]
    fn test_extract_keeps_json_base_names() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = tar_bytes(&[
            ("sboms/alpine_3.19.json", b"{\"a\":1}"),
            ("sboms/compare.html", b"<html/>"),
            ("busybox_1.36.json", b"{}"),
        ]);

        let files = match extract_sboms(bytes.as_slice(), dir.path()) {
            Ok(files) => files,
            Err(_) => panic!("extraction failed"),
        };

        assert_eq!(
            files,
            [
                dir.path().join("alpine_3.19.json"),
                dir.path().join("busybox_1.36.json")
            ]
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("alpine_3.19.json")).unwrap(),
            "{\"a\":1}"
        );
        assert!(!dir.path().join("compare.html").exists());
    }

    #[test]
    fn test_extract_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let garbage = vec![0xffu8; 1024];
        assert!(matches!(
            extract_sboms(garbage.as_slice(), dir.path()),
            Err(ExtractError::Read(_))
        ));
    }
}
