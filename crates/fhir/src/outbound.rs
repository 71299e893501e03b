//! Outbound collection bundles for case-based submission.
//!
//! A case groups several generated resources for one patient; they are shipped together as a
//! FHIR `Bundle` of type `collection`. Transport is not handled here.

use crate::{FhirError, FhirResult};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// Collection bundle operations.
pub struct CollectionBundle;

impl CollectionBundle {
    /// Render a collection bundle containing `resources` in the given order.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError::InvalidInput`] if any resource is not a JSON object carrying a
    /// `resourceType`.
    pub fn render(
        bundle_id: Uuid,
        timestamp: DateTime<Utc>,
        resources: Vec<Value>,
    ) -> FhirResult<Value> {
        let mut entry = Vec::with_capacity(resources.len());
        for resource in resources {
            let has_type = resource
                .get("resourceType")
                .and_then(Value::as_str)
                .is_some_and(|t| !t.is_empty());
            if !has_type {
                return Err(FhirError::InvalidInput(
                    "bundle entries must be resources with a resourceType".into(),
                ));
            }
            entry.push(EntryWire { resource });
        }

        let wire = CollectionBundleWire {
            resource_type: "Bundle",
            id: bundle_id.to_string(),
            bundle_type: "collection",
            timestamp: timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            entry,
        };
        Ok(serde_json::to_value(wire)?)
    }
}

#[derive(Serialize)]
struct CollectionBundleWire {
    #[serde(rename = "resourceType")]
    resource_type: &'static str,
    id: String,
    #[serde(rename = "type")]
    bundle_type: &'static str,
    timestamp: String,
    entry: Vec<EntryWire>,
}

#[derive(Serialize)]
struct EntryWire {
    resource: Value,
}
