use std::fmt;
use std::path::PathBuf;

/// Schemes the scanner understands for image references.
pub const IMAGE_SCHEMES: [&str; 2] = ["registry:", "docker:"];

/// What the scanner is pointed at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScanTarget {
    /// A live image reference, always carrying a scheme.
    Image(String),
    /// A pre-fetched SBOM document.
    Sbom(PathBuf),
}

impl ScanTarget {
    /// Builds an image target. References without a scheme get `registry:`
    /// so the scanner pulls from the registry instead of the local daemon.
    pub fn image(reference: impl Into<String>) -> Self {
        let reference = reference.into();
        if IMAGE_SCHEMES.iter().any(|s| reference.starts_with(s)) {
            ScanTarget::Image(reference)
        } else {
            ScanTarget::Image(format!("registry:{}", reference))
        }
    }

    pub fn sbom(path: impl Into<PathBuf>) -> Self {
        ScanTarget::Sbom(path.into())
    }

    /// The positional argument handed to the scanner.
    pub fn argument(&self) -> String {
        match self {
            ScanTarget::Image(reference) => reference.clone(),
            ScanTarget::Sbom(path) => format!("sbom:{}", path.display()),
        }
    }
}

impl fmt::Display for ScanTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanTarget::Image(reference) => f.write_str(reference),
            ScanTarget::Sbom(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Removes a leading `registry:` or `docker:` scheme.
pub fn strip_scheme(reference: &str) -> &str {
    IMAGE_SCHEMES
        .iter()
        .find_map(|s| reference.strip_prefix(s))
        .unwrap_or(reference)
}

/// Bare image name: no scheme, no registry path, no tag or digest.
///
/// `registry:ghcr.io/org/app:1.0` becomes `app`.
pub fn bare_image_name(reference: &str) -> &str {
    let reference = strip_scheme(reference);
    let last = reference.rsplit('/').next().unwrap_or(reference);
    let last = last.split('@').next().unwrap_or(last);
    last.split(':').next().unwrap_or(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_gets_registry_scheme() {
        assert_eq!(
            ScanTarget::image("alpine:3.16"),
            ScanTarget::Image("registry:alpine:3.16".into())
        );
        assert_eq!(
            ScanTarget::image("docker:alpine:3.16"),
            ScanTarget::Image("docker:alpine:3.16".into())
        );
        assert_eq!(
            ScanTarget::image("registry:alpine:3.16").argument(),
            "registry:alpine:3.16"
        );
    }

    #[test]
    fn test_sbom_argument() {
        let target = ScanTarget::sbom("/tmp/sboms/app.json");
        assert_eq!(target.argument(), "sbom:/tmp/sboms/app.json");
    }

    #[test]
    fn test_strip_scheme() {
        assert_eq!(strip_scheme("registry:a/b:1"), "a/b:1");
        assert_eq!(strip_scheme("docker:a/b:1"), "a/b:1");
        assert_eq!(strip_scheme("a/b:1"), "a/b:1");
    }

    #[test]
    fn test_bare_image_name() {
        assert_eq!(
            bare_image_name("registry:example.com/opensource/bitnami/elasticsearch-exporter:1.9.0"),
            "elasticsearch-exporter"
        );
        assert_eq!(bare_image_name("localhost:5000/app:2"), "app");
        assert_eq!(bare_image_name("alpine"), "alpine");
        assert_eq!(bare_image_name("ghcr.io/org/app@sha256:abc"), "app");
    }
}
