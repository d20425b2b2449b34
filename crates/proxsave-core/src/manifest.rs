//! Manifest and bundle-layout types.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::category::HostRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionMode {
    None,
    Age,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionType {
    None,
    Gzip,
    Xz,
    Zstd,
    Bzip2,
    Lzma,
}

impl CompressionType {
    /// Filename extension inserted before `.tar`.
    pub fn extension(self) -> &'static str {
        match self {
            CompressionType::None => "",
            CompressionType::Gzip => ".gz",
            CompressionType::Xz => ".xz",
            CompressionType::Zstd => ".zst",
            CompressionType::Bzip2 => ".bz2",
            CompressionType::Lzma => ".lzma",
        }
    }

    /// Fallback order used when the requested compressor binary is
    /// unavailable: `xz -> gzip -> none`. A requested
    /// compressor that isn't itself in the chain falls straight to the head
    /// of the chain.
    pub fn fallback(self) -> Self {
        match self {
            CompressionType::Xz => CompressionType::Gzip,
            CompressionType::Gzip => CompressionType::None,
            _ => CompressionType::Xz,
        }
    }
}

fn hostrole_tag(role: HostRole) -> String {
    role.as_str().to_string()
}

/// A single backup's integrity and provenance record.
///
/// `extra` captures any JSON object keys this build doesn't know about so
/// round-tripping through `load`/`write` never drops data written by a
/// newer or older version of proxsave.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub archive_path: String,
    pub archive_size: u64,
    pub sha256: String,
    pub encryption_mode: EncryptionMode,
    pub compression_type: CompressionType,
    pub requested_compression_type: CompressionType,
    pub compression_mode: String,
    pub compression_level: u32,
    pub compression_threads: u32,
    pub created_at: DateTime<Utc>,
    pub script_version: String,
    pub hostname: String,
    pub host_role: HostRole,
    pub host_version: String,
    pub cluster_mode: bool,
    pub targets: BTreeSet<String>,
    pub extra: Map<String, Value>,
}

const ENCRYPTED_SUFFIX_MARKER: &str = ".age";

impl Manifest {
    /// Invariant: `encryption_mode = age <=> archive_path ends in the
    /// encrypted-suffix marker`.
    pub fn validate_encryption_marker(&self) -> bool {
        let is_age = self.archive_path.ends_with(ENCRYPTED_SUFFIX_MARKER);
        (self.encryption_mode == EncryptionMode::Age) == is_age
    }

    pub fn targets_includes(&self, role: HostRole) -> bool {
        self.targets.contains(&hostrole_tag(role))
    }

    const REQUIRED_FIELDS: &'static [&'static str] =
    &["archive_path", "sha256", "created_at", "encryption_mode", "host_role"];

    pub fn to_json(&self) -> Value {
        let mut obj = self.extra.clone();
        obj.insert("archive_path".into(), Value::from(self.archive_path.clone()));
        obj.insert("archive_size".into(), Value::from(self.archive_size));
        obj.insert("sha256".into(), Value::from(self.sha256.clone()));
        obj.insert(
            "created_at".into(),
            Value::from(self.created_at.to_rfc3339()),
        );
        obj.insert(
            "encryption_mode".into(),
            serde_json::to_value(self.encryption_mode).expect("enum serializes"),
        );
        obj.insert(
            "compression_type".into(),
            serde_json::to_value(self.compression_type).expect("enum serializes"),
        );
        obj.insert(
            "requested_compression_type".into(),
            serde_json::to_value(self.requested_compression_type).expect("enum serializes"),
        );
        obj.insert("compression_mode".into(), Value::from(self.compression_mode.clone()));
        obj.insert("compression_level".into(), Value::from(self.compression_level));
        obj.insert("compression_threads".into(), Value::from(self.compression_threads));
        obj.insert("script_version".into(), Value::from(self.script_version.clone()));
        obj.insert("hostname".into(), Value::from(self.hostname.clone()));
        obj.insert(
            "host_role".into(),
            serde_json::to_value(self.host_role).expect("enum serializes"),
        );
        obj.insert("host_version".into(), Value::from(self.host_version.clone()));
        obj.insert("cluster_mode".into(), Value::from(self.cluster_mode));
        obj.insert(
            "targets".into(),
            Value::from(self.targets.iter().cloned().collect::<Vec<_>>()),
        );
        Value::Object(obj)
    }

    pub fn from_json(mut value: Value) -> Result<Self, ManifestError> {
        let obj = value
            .as_object_mut()
            .ok_or(ManifestError::NotAnObject)?;

        for field in Self::REQUIRED_FIELDS {
            if !obj.contains_key(*field) {
                return Err(ManifestError::MissingField(field));
            }
        }

        fn take<T: for<'de> Deserialize<'de>>(
            obj: &mut Map<String, Value>,
            key: &'static str,
        ) -> Result<T, ManifestError> {
            let v = obj.remove(key).ok_or(ManifestError::MissingField(key))?;
            serde_json::from_value(v).map_err(|e| ManifestError::BadField(key, e.to_string()))
        }

        fn take_opt<T: for<'de> Deserialize<'de> + Default>(
            obj: &mut Map<String, Value>,
            key: &'static str,
        ) -> T {
            obj.remove(key)
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_default()
        }

        let archive_path: String = take(obj, "archive_path")?;
        let sha256: String = take(obj, "sha256")?;
        let created_at_raw: String = take(obj, "created_at")?;
        let created_at = DateTime::parse_from_rfc3339(&created_at_raw)
            .map_err(|e| ManifestError::BadField("created_at", e.to_string()))?
            .with_timezone(&Utc);
        let encryption_mode: EncryptionMode = take(obj, "encryption_mode")?;
        let host_role: HostRole = take(obj, "host_role")?;

        let compression_type: CompressionType = take_opt(obj, "compression_type");
        let requested_compression_type: CompressionType =
        obj.remove("requested_compression_type")
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or(compression_type);
        let archive_size: u64 = take_opt(obj, "archive_size");
        let compression_mode: String = take_opt(obj, "compression_mode");
        let compression_level: u32 = take_opt(obj, "compression_level");
        let compression_threads: u32 = take_opt(obj, "compression_threads");
        let script_version: String = take_opt(obj, "script_version");
        let hostname: String = take_opt(obj, "hostname");
        let host_version: String = take_opt(obj, "host_version");
        let cluster_mode: bool = take_opt(obj, "cluster_mode");
        let targets: Vec<String> = take_opt(obj, "targets");

        Ok(Manifest {
            archive_path,
            archive_size,
            sha256,
            encryption_mode,
            compression_type,
            requested_compression_type,
            compression_mode,
            compression_level,
            compression_threads,
            created_at,
            script_version,
            hostname,
            host_role,
            host_version,
            cluster_mode,
            targets: targets.into_iter().collect(),
            extra: obj.clone(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("manifest is not a JSON object")]
    NotAnObject,
    #[error("manifest missing required field `{0}`")]
    MissingField(&'static str),
    #[error("manifest field `{0}` invalid: {1}")]
    BadField(&'static str, String),
}

/// Fixed bundle member names, in the order the bundle writer emits them.
pub fn bundle_member_names(archive_base: &str) -> [String; 3] {
    [
        format!("{archive_base}.metadata"),
        archive_base.to_string(),
        format!("{archive_base}.sha256"),
    ]
}

pub fn bundle_filename(archive_base: &str) -> String {
    format!("{archive_base}.bundle.tar")
}

pub fn checksum_sidecar_line(hex_digest: &str, archive_basename: &str) -> String {
    format!("{hex_digest}  {archive_basename}\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr as _;

    fn sample() -> Manifest {
        Manifest {
            archive_path: "pve-backup-20260101-120000.tar".to_string(),
            archive_size: 4096,
            sha256: "deadbeef".repeat(8),
            encryption_mode: EncryptionMode::None,
            compression_type: CompressionType::None,
            requested_compression_type: CompressionType::None,
            compression_mode: "default".to_string(),
            compression_level: 0,
            compression_threads: 1,
            created_at: DateTime::from_str("2026-01-01T12:00:00Z").unwrap(),
            script_version: "1.0.0".to_string(),
            hostname: "pve-node-1".to_string(),
            host_role: HostRole::Virtualization,
            host_version: "8.2".to_string(),
            cluster_mode: false,
            targets: ["pve".to_string()].into_iter().collect(),
            extra: Map::new(),
        }
    }

    #[test]
    fn round_trip() {
        let manifest = sample();
        let json = manifest.to_json();
        let loaded = Manifest::from_json(json).unwrap();
        assert_eq!(manifest, loaded);
    }

    #[test]
    fn unknown_keys_survive_round_trip() {
        let manifest = sample();
        let mut json = manifest.to_json();
        json.as_object_mut()
            .unwrap()
            .insert("future_field".into(), Value::from("surprise"));

        let loaded = Manifest::from_json(json.clone()).unwrap();
        let re_emitted = loaded.to_json();
        assert_eq!(
            re_emitted.get("future_field"),
            Some(&Value::from("surprise"))
        );
    }

    #[test]
    fn missing_required_field_rejected() {
        let manifest = sample();
        let mut json = manifest.to_json();
        json.as_object_mut().unwrap().remove("sha256");
        assert!(matches!(
            Manifest::from_json(json),
            Err(ManifestError::MissingField("sha256"))
        ));
    }

    #[test]
    fn encryption_marker_invariant() {
        let mut manifest = sample();
        assert!(manifest.validate_encryption_marker());

        manifest.encryption_mode = EncryptionMode::Age;
        assert!(!manifest.validate_encryption_marker());

        manifest.archive_path.push_str(".age");
        assert!(manifest.validate_encryption_marker());
    }

    #[test]
    fn compression_fallback_chain() {
        assert_eq!(CompressionType::Xz.fallback(), CompressionType::Gzip);
        assert_eq!(CompressionType::Gzip.fallback(), CompressionType::None);
    }

    #[test]
    fn bundle_layout_is_fixed_and_ordered() {
        let names = bundle_member_names("pve-backup.tar.gz");
        assert_eq!(
            names,
            [
                "pve-backup.tar.gz.metadata".to_string(),
                "pve-backup.tar.gz".to_string(),
                "pve-backup.tar.gz.sha256".to_string(),
            ]
        );
    }
}
