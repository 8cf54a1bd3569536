use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

/// A rename between a released image name and a locally built one,
/// written `released=current`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameOverride {
    pub released: String,
    pub current: String,
}

impl FromStr for NameOverride {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let pair = s.split_once('=').map(|(r, c)| (r.trim(), c.trim()));
        match pair {
            Some((released, current)) if !released.is_empty() && !current.is_empty() => {
                Ok(Self {
                    released: released.to_string(),
                    current: current.to_string(),
                })
            }
            _ => Err(Error::Config(format!(
                "invalid image name override '{}', expected released=current",
                s
            ))),
        }
    }
}

/// Exact-match translation from current image names to released ones.
#[derive(Debug, Clone, Default)]
pub struct NameOverrides {
    by_current: BTreeMap<String, String>,
}

impl NameOverrides {
    /// Parses every `released=current` pair. The first malformed pair fails.
    pub fn parse<S: AsRef<str>>(pairs: &[S]) -> Result<Self> {
        let mut by_current = BTreeMap::new();
        for pair in pairs {
            let o: NameOverride = pair.as_ref().parse()?;
            by_current.insert(o.current, o.released);
        }
        Ok(Self { by_current })
    }

    /// The name `current` was released under, if overridden.
    pub fn released_name(&self, current: &str) -> Option<&str> {
        self.by_current.get(current).map(String::as_str)
    }
}

/// Finds the released report whose path contains `/<image_name>_`.
///
/// Plain substring matching: a name that is a suffix of another image's
/// name separated by `/` can match the wrong report.
pub fn find_released_scan<'a>(
    released: &'a BTreeMap<String, PathBuf>,
    image_name: &str,
) -> Option<&'a PathBuf> {
    let needle = format!("/{}_", image_name);
    released
        .values()
        .find(|path| path.to_string_lossy().contains(&needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_overrides() {
        let overrides =
            NameOverrides::parse(&["elasticsearch=elasticsearch-exporter", "kibana = kb"]).unwrap();
        assert_eq!(
            overrides.released_name("elasticsearch-exporter"),
            Some("elasticsearch")
        );
        assert_eq!(overrides.released_name("kb"), Some("kibana"));
        assert_eq!(overrides.released_name("elasticsearch"), None);
    }

    #[test]
    fn test_malformed_override_is_config_error() {
        for bad in ["elasticsearch", "=new", "old="] {
            assert!(
                matches!(NameOverrides::parse(&[bad]), Err(Error::Config(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_find_released_scan_by_name_prefix() {
        let mut released = BTreeMap::new();
        released.insert(
            "/tmp/sboms/a.json".to_string(),
            PathBuf::from("/out/released/upstream/elasticsearch_8.16.0.json"),
        );
        released.insert(
            "/tmp/sboms/b.json".to_string(),
            PathBuf::from("/out/released/upstream/busybox_1.36.json"),
        );

        assert_eq!(
            find_released_scan(&released, "busybox"),
            Some(&PathBuf::from("/out/released/upstream/busybox_1.36.json"))
        );
        assert_eq!(
            find_released_scan(&released, "elasticsearch"),
            Some(&PathBuf::from(
                "/out/released/upstream/elasticsearch_8.16.0.json"
            ))
        );
        assert_eq!(find_released_scan(&released, "kibana"), None);
        assert_eq!(find_released_scan(&released, "elastic"), None);
    }
}
