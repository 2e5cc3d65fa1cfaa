//! Cluster seams and manifest document handling

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::EngineError;
use crate::vault::connection::ClusterConnection;

pub const DEFAULT_NAMESPACE: &str = "default";

/// One YAML document of a multi-document manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestDocument {
    /// Position in the stream, starting at 1
    pub index: usize,
    pub api_version: Option<String>,
    pub kind: Option<String>,
    pub name: Option<String>,

    /// Namespace declared in the document metadata
    pub namespace: Option<String>,

    /// Raw document text
    pub body: String,

    /// Set when the document is not valid YAML
    pub parse_error: Option<String>,
}

impl ManifestDocument {
    /// Namespace the document lands in
    pub fn effective_namespace<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or(if fallback.is_empty() {
                DEFAULT_NAMESPACE
            } else {
                fallback
            })
    }
}

impl fmt::Display for ManifestDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "document #{} {}/{}",
            self.index,
            self.kind.as_deref().unwrap_or("<no kind>"),
            self.name.as_deref().unwrap_or("<no name>")
        )
    }
}

#[derive(Deserialize)]
struct DocumentHeader {
    #[serde(default, rename = "apiVersion")]
    api_version: Option<String>,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    metadata: Option<DocumentMetadata>,
}

#[derive(Deserialize)]
struct DocumentMetadata {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    namespace: Option<String>,
}

/// Split a manifest on `---` separators, dropping empty documents
pub fn split_documents(manifest: &str) -> Vec<ManifestDocument> {
    let mut bodies: Vec<String> = Vec::new();
    let mut current = String::new();

    for line in manifest.lines() {
        if is_separator(line) {
            bodies.push(std::mem::take(&mut current));
            continue;
        }
        current.push_str(line);
        current.push('\n');
    }
    bodies.push(current);

    bodies
        .into_iter()
        .filter(|body| !is_blank_document(body))
        .enumerate()
        .map(|(i, body)| parse_document(i + 1, body))
        .collect()
}

fn is_separator(line: &str) -> bool {
    let line = line.trim_end();
    line == "---" || line.starts_with("--- ")
}

fn is_blank_document(body: &str) -> bool {
    body.lines().all(|l| {
        let l = l.trim();
        l.is_empty() || l.starts_with('#')
    })
}

fn parse_document(index: usize, body: String) -> ManifestDocument {
    match serde_yaml::from_str::<DocumentHeader>(&body) {
        Ok(header) => {
            let (name, namespace) = header
                .metadata
                .map(|m| (m.name, m.namespace))
                .unwrap_or((None, None));
            ManifestDocument {
                index,
                api_version: header.api_version,
                kind: header.kind.filter(|k| !k.trim().is_empty()),
                name,
                namespace,
                body,
                parse_error: None,
            }
        }
        Err(e) => ManifestDocument {
            index,
            api_version: None,
            kind: None,
            name: None,
            namespace: None,
            body,
            parse_error: Some(e.to_string()),
        },
    }
}

/// Identity reported by a cluster API server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerIdentity {
    pub git_version: String,
    #[serde(default)]
    pub platform: Option<String>,
}

/// Server-side apply of manifest documents
#[async_trait]
pub trait ClusterApplier: Send + Sync {
    /// Upsert one document into `namespace`, owned by `field_manager`
    async fn apply(
        &self,
        connection: &ClusterConnection,
        document: &ManifestDocument,
        namespace: &str,
        field_manager: &str,
    ) -> Result<(), EngineError>;
}

/// Minimal reachability check against a cluster
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn server_identity(
        &self,
        connection: &ClusterConnection,
    ) -> Result<ServerIdentity, EngineError>;
}
