#![forbid(unsafe_code)]

//! Naia.toml loading and validation: project identity plus the foreign
//! capability allowlist the bridge gate enforces.

use std::fs;
use std::path::Path;

use miette::Diagnostic;
use semver::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use naia_core::CapabilityAllowlist;

#[derive(Debug, Error, Diagnostic)]
pub enum ManifestError {
    #[error("failed to read {path}: {source}")]
    #[diagnostic(code(naia::project))]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    #[diagnostic(code(naia::project))]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid Naia.toml: {0}")]
    #[diagnostic(code(naia::project))]
    Parse(#[from] toml::de::Error),

    #[error("{0}")]
    #[diagnostic(code(naia::project))]
    Invalid(String),
}

/// Complete project manifest as defined in Naia.toml. The capability
/// grant is a top-level key, so it reads before the `[project]` table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Host modules the project grants itself access to. Absent means
    /// no foreign imports are allowed.
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Project section: name and version.
    pub project: ProjectInfo,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub name: String,

    /// Version in SemVer format (e.g., "1.2.3").
    pub version: String,
}

impl Manifest {
    pub const FILE_NAME: &'static str = "Naia.toml";

    pub fn from_file(path: &Path) -> Result<Self, ManifestError> {
        let content = fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_str(&content)
    }

    pub fn from_str(content: &str) -> Result<Self, ManifestError> {
        let manifest: Manifest = toml::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn to_file(&self, path: &Path) -> Result<(), ManifestError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ManifestError::Invalid(format!("failed to serialize manifest: {e}")))?;
        fs::write(path, content).map_err(|source| ManifestError::Write {
            path: path.display().to_string(),
            source,
        })
    }

    /// The capability set the semantic core's foreign gate checks
    /// against. Duplicate grants collapse.
    pub fn capability_allowlist(&self) -> CapabilityAllowlist {
        CapabilityAllowlist::from_names(self.capabilities.iter().cloned())
    }

    fn validate(&self) -> Result<(), ManifestError> {
        if self.project.name.is_empty() {
            return Err(ManifestError::Invalid(
                "project name cannot be empty".to_string(),
            ));
        }
        if !self
            .project
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ManifestError::Invalid(format!(
                "invalid project name `{}`: only alphanumeric, `-`, `_` allowed",
                self.project.name
            )));
        }
        Version::parse(&self.project.version).map_err(|e| {
            ManifestError::Invalid(format!(
                "invalid version `{}`: {e}",
                self.project.version
            ))
        })?;
        for cap in &self.capabilities {
            let well_formed = !cap.is_empty()
                && cap
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_');
            if !well_formed {
                return Err(ManifestError::Invalid(format!(
                    "invalid capability name `{cap}`"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_manifest_with_capabilities() {
        let toml = r#"
capabilities = ["fs", "net.http"]

[project]
name = "render-farm"
version = "1.0.0"
"#;
        let manifest = Manifest::from_str(toml).expect("parse failed");
        assert_eq!(manifest.project.name, "render-farm");
        assert_eq!(manifest.project.version, "1.0.0");
        assert_eq!(manifest.capabilities, vec!["fs", "net.http"]);
    }

    #[test]
    fn a_missing_capabilities_key_means_an_empty_allowlist() {
        let toml = r#"
[project]
name = "sealed"
version = "0.1.0"
"#;
        let manifest = Manifest::from_str(toml).expect("parse failed");
        assert!(manifest.capability_allowlist().is_empty());
    }

    #[test]
    fn the_allowlist_carries_exactly_the_granted_modules() {
        let toml = r#"
capabilities = ["fs", "fs", "json"]

[project]
name = "tool"
version = "0.1.0"
"#;
        let manifest = Manifest::from_str(toml).expect("parse failed");
        let allow = manifest.capability_allowlist();
        assert!(allow.allows("fs"));
        assert!(allow.allows("json"));
        assert!(!allow.allows("net.http"));
        assert_eq!(allow.len(), 2);
    }

    #[test]
    fn a_version_that_is_not_semver_is_rejected() {
        let toml = r#"
[project]
name = "tool"
version = "latest"
"#;
        let err = Manifest::from_str(toml).unwrap_err();
        assert!(matches!(err, ManifestError::Invalid(_)));
        assert!(err.to_string().contains("latest"));
    }

    #[test]
    fn a_project_name_with_odd_characters_is_rejected() {
        let toml = r#"
[project]
name = "my tool!"
version = "1.0.0"
"#;
        assert!(Manifest::from_str(toml).is_err());
    }

    #[test]
    fn a_capability_with_whitespace_is_rejected() {
        let toml = r#"
capabilities = ["net http"]

[project]
name = "tool"
version = "1.0.0"
"#;
        let err = Manifest::from_str(toml).unwrap_err();
        assert!(err.to_string().contains("net http"));
    }

    #[test]
    fn malformed_toml_reports_a_parse_error() {
        let err = Manifest::from_str("[project\nname=").unwrap_err();
        assert!(matches!(err, ManifestError::Parse(_)));
    }

    #[test]
    fn manifests_round_trip_through_the_filesystem() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(Manifest::FILE_NAME);
        let manifest = Manifest {
            project: ProjectInfo {
                name: "pipeline".to_string(),
                version: "2.3.1".to_string(),
            },
            capabilities: vec!["fs".to_string(), "base64".to_string()],
        };
        manifest.to_file(&path).expect("write failed");
        let loaded = Manifest::from_file(&path).expect("load failed");
        assert_eq!(loaded, manifest);
    }

    #[test]
    fn a_missing_file_reports_its_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nowhere").join(Manifest::FILE_NAME);
        let err = Manifest::from_file(&path).unwrap_err();
        assert!(matches!(err, ManifestError::Read { .. }));
        assert!(err.to_string().contains("nowhere"));
    }
}
