//! Request fingerprinting for the response cache.
//!
//! Two requests with equal [`RequestFingerprint`]s are interchangeable for
//! caching. The fingerprint covers every field that can change the generated
//! plan and excludes per-call identity (request/execution ids, timestamps).

use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::{AnalyzeRequest, DataSource};

/// SHA-256 digest of a request's normalised significant fields, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestFingerprint(String);

impl RequestFingerprint {
    /// Computes the fingerprint of `request`.
    ///
    /// `default_model` is the model the service would use when the request
    /// names none, so that an explicit default and an implicit one collide.
    pub fn of(request: &AnalyzeRequest, default_model: &str) -> Self {
        let mut roles = request.user_context.roles.clone();
        roles.sort();
        roles.dedup();
        let mut permissions = request.user_context.permissions.clone();
        permissions.sort();
        permissions.dedup();
        let mut schema_names = request.selected_schema_names.clone();
        schema_names.sort();
        schema_names.dedup();

        let sources: Vec<serde_json::Value> = request
            .data_sources
            .iter()
            .map(|ds| {
                json!({
                    "id": ds.data_source_id,
                    "type": ds.source_type.trim().to_ascii_lowercase(),
                    "schema_version": schema_version(ds),
                })
            })
            .collect();

        let model = request
            .ai_model
            .as_ref()
            .map(|m| m.as_str())
            .unwrap_or(default_model);

        // serde_json's default map is ordered by key, so the rendering is
        // canonical.
        let canonical = json!({
            "prompt": normalize_prompt(&request.user_prompt),
            "data_sources": sources,
            "user": {
                "user_id": request.user_context.user_id,
                "workspace_id": request.user_context.workspace_id,
                "organization_id": request.user_context.organization_id,
                "roles": roles,
                "permissions": permissions,
                "attributes": request.user_context.attributes,
            },
            "selected_schema_names": schema_names,
            "execution_context": request.execution_context(),
            "model": model,
            "temperature": request.temperature().as_f64(),
            "include_visualization": request.include_visualization,
        });

        Self(digest(canonical.to_string().as_bytes()))
    }

    /// Returns the hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 16 hex characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(16)]
    }
}

impl std::fmt::Display for RequestFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Collapses runs of whitespace so cosmetic prompt edits share a cache entry.
fn normalize_prompt(prompt: &str) -> String {
    prompt.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Caller-supplied schema version, or a digest of the schema snapshot and
/// governance policies when none was supplied.
fn schema_version(source: &DataSource) -> String {
    if let Some(version) = &source.schema_version {
        return version.clone();
    }
    let snapshot = json!({
        "schemas": source.schemas,
        "governance_policies": source.governance_policies,
    });
    digest(snapshot.to_string().as_bytes())
}

fn digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
