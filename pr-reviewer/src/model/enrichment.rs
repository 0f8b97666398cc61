//! Pre-computed enrichment data carried on the request.
//!
//! The caller may parse the PR's files ahead of time and ship full contents,
//! per-file AST metadata, and pairwise relationships. The batcher prefers
//! this over querying the retrieval service, and the verifier needs the file
//! contents to check suspected false positives.

use serde::{Deserialize, Serialize};

/// Typed relationship between two files in the PR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationshipType {
    #[serde(rename = "IMPORTS")]
    Imports,
    #[serde(rename = "EXTENDS")]
    Extends,
    #[serde(rename = "IMPLEMENTS")]
    Implements,
    #[serde(rename = "CALLS")]
    Calls,
    #[serde(rename = "SAME_PACKAGE")]
    SamePackage,
    #[serde(rename = "REFERENCES")]
    References,
}

/// Full content of a single file, as retrieved from the VCS.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileContent {
    pub path: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, rename = "sizeBytes")]
    pub size_bytes: u64,
    #[serde(default)]
    pub skipped: bool,
    #[serde(default, rename = "skipReason")]
    pub skip_reason: Option<String>,
}

/// Parsed AST metadata for a single file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsedFileMetadata {
    pub path: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub imports: Vec<String>,
    #[serde(default, rename = "extends")]
    pub extends_classes: Vec<String>,
    #[serde(default, rename = "implements")]
    pub implements_interfaces: Vec<String>,
    #[serde(default, rename = "semantic_names")]
    pub semantic_names: Vec<String>,
    #[serde(default, rename = "parent_class")]
    pub parent_class: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub calls: Vec<String>,
}

/// A relationship edge between two PR files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRelationship {
    #[serde(rename = "sourceFile")]
    pub source_file: String,
    #[serde(rename = "targetFile")]
    pub target_file: String,
    #[serde(rename = "relationshipType")]
    pub relationship_type: RelationshipType,
    #[serde(default, rename = "matchedOn")]
    pub matched_on: Option<String>,
}

/// Aggregate enrichment payload for a PR.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrEnrichmentData {
    #[serde(default, rename = "fileContents")]
    pub file_contents: Vec<FileContent>,
    #[serde(default, rename = "fileMetadata")]
    pub file_metadata: Vec<ParsedFileMetadata>,
    #[serde(default)]
    pub relationships: Vec<FileRelationship>,
}

impl PrEnrichmentData {
    /// Whether any usable enrichment is present.
    pub fn has_data(&self) -> bool {
        !self.file_contents.is_empty() || !self.relationships.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_data_requires_contents_or_relationships() {
        assert!(!PrEnrichmentData::default().has_data());
        let with_rel = PrEnrichmentData {
            relationships: vec![FileRelationship {
                source_file: "a".into(),
                target_file: "b".into(),
                relationship_type: RelationshipType::Imports,
                matched_on: None,
            }],
            ..Default::default()
        };
        assert!(with_rel.has_data());
    }
}
