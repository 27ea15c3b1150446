//! OCI image-layout packaging of ADP source trees.
//!
//! A package directory holds:
//!
//! ```text
//! oci-layout                  {"imageLayoutVersion": "1.0.0"}
//! index.json                  one manifest descriptor
//! blobs/sha256/<hex>          manifest, config and layer blobs
//! ```
//!
//! The manifest references a JSON config blob (`agent_id`, `adp_version`)
//! and a single tar layer holding the source tree.

pub mod builder;
pub mod reader;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cas::{BlobRef, Digest};

pub const OCI_LAYOUT_FILE: &str = "oci-layout";
pub const INDEX_FILE: &str = "index.json";
pub const IMAGE_LAYOUT_VERSION: &str = "1.0.0";

pub const MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
pub const CONFIG_MEDIA_TYPE: &str = "application/vnd.adp.config.v1+json";
pub const LAYER_MEDIA_TYPE: &str = "application/vnd.adp.package.v1+tar";

/// Index annotation carrying the agent id.
pub const TITLE_ANNOTATION: &str = "org.opencontainers.image.title";
/// Index annotation carrying the document's `adp_version`.
pub const ADP_VERSION_ANNOTATION: &str = "dev.adp.version";

/// Reference to a blob, as used in manifests and the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: Digest,
    pub size: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Descriptor {
    pub fn new(media_type: &str, blob: BlobRef) -> Self {
        Self {
            media_type: media_type.to_string(),
            digest: blob.digest,
            size: blob.size,
            annotations: BTreeMap::new(),
        }
    }

    pub fn with_annotations(mut self, annotations: BTreeMap<String, String>) -> Self {
        self.annotations = annotations;
        self
    }

    pub fn blob(&self) -> BlobRef {
        BlobRef {
            digest: self.digest,
            size: self.size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub schema_version: u32,
    pub media_type: String,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
}

impl Manifest {
    pub fn new(config: Descriptor, layer: Descriptor) -> Self {
        Self {
            schema_version: 2,
            media_type: MANIFEST_MEDIA_TYPE.to_string(),
            config,
            layers: vec![layer],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Index {
    pub schema_version: u32,
    pub manifests: Vec<Descriptor>,
}

impl Index {
    pub fn new(manifest: Descriptor) -> Self {
        Self {
            schema_version: 2,
            manifests: vec![manifest],
        }
    }
}

/// Contents of the `oci-layout` marker file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageLayout {
    pub image_layout_version: String,
}

impl Default for ImageLayout {
    fn default() -> Self {
        Self {
            image_layout_version: IMAGE_LAYOUT_VERSION.to_string(),
        }
    }
}

/// The config blob: identity of the packaged agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageConfig {
    pub agent_id: String,
    pub adp_version: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_manifest_wire_shape() {
        let config = Descriptor::new(CONFIG_MEDIA_TYPE, BlobRef::of(b"{}"));
        let layer = Descriptor::new(LAYER_MEDIA_TYPE, BlobRef::of(b"tar"));
        let value = serde_json::to_value(Manifest::new(config, layer)).unwrap();

        assert_eq!(value["schemaVersion"], json!(2));
        assert_eq!(value["mediaType"], json!(MANIFEST_MEDIA_TYPE));
        assert_eq!(value["config"]["mediaType"], json!(CONFIG_MEDIA_TYPE));
        assert_eq!(value["layers"].as_array().unwrap().len(), 1);
        assert_eq!(value["layers"][0]["size"], json!(3));
        let digest = value["layers"][0]["digest"].as_str().unwrap();
        assert!(digest.starts_with("sha256:"));
        assert!(value["config"].get("annotations").is_none());
    }

    #[test]
    fn test_index_annotations_round_trip() {
        let mut annotations = BTreeMap::new();
        annotations.insert(TITLE_ANNOTATION.to_string(), "agent.hello".to_string());
        let manifest = Descriptor::new(MANIFEST_MEDIA_TYPE, BlobRef::of(b"m"))
            .with_annotations(annotations);
        let index = Index::new(manifest);

        let text = serde_json::to_string(&index).unwrap();
        assert!(text.contains("org.opencontainers.image.title"));
        let back: Index = serde_json::from_str(&text).unwrap();
        assert_eq!(back, index);
    }

    #[test]
    fn test_image_layout_default() {
        let text = serde_json::to_string(&ImageLayout::default()).unwrap();
        assert_eq!(text, r#"{"imageLayoutVersion":"1.0.0"}"#);
    }
}
