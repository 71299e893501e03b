//! FHIR-aligned inbound result bundle wire models and translation helpers.
//!
//! Laboratory systems return results as a `Bundle` whose entries are `DiagnosticReport` and
//! `Observation` resources. A report names the ordered test in `code.coding[0]` and points
//! at its individual results through `result[].reference`.
//!
//! Responsibilities:
//! - Define flat domain-level carriers for reports and observations
//! - Define a lenient wire model (unknown FHIR elements are ignored)
//! - Partition entries by `resourceType` and resolve result references
//!
//! Notes:
//! - Entries of any other resource type are dropped during translation
//! - Only the first coding of a `CodeableConcept` is significant
//! - Observation value slots are read leniently: a value of the wrong JSON type is treated as
//!   absent so that one bad result does not reject the whole bundle

use crate::{schema_mismatch, FhirError, FhirResult};
use serde::Deserialize;
use serde_json::Value;

// ============================================================================
// Public domain-level types
// ============================================================================

/// A single `(system, code)` pair taken from `coding[0]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodingData {
    /// Coding system URL.
    pub system: String,
    /// Code within the coding system.
    pub code: String,
    pub display: Option<String>,
}

/// Domain-level carrier for a `DiagnosticReport` entry.
#[derive(Clone, Debug, PartialEq)]
pub struct DiagnosticReportData {
    pub id: Option<String>,

    /// Primary coding of the report (the ordered test). `None` when the report has no usable
    /// coding.
    pub code: Option<CodingData>,

    /// Raw `result[].reference` values in document order.
    pub result_references: Vec<String>,
}

/// Domain-level carrier for an `Observation` entry.
///
/// All value slots are kept; which one is meaningful depends on the datatype of the local
/// concept the observation code resolves to. A slot holding a value that cannot be read as its
/// type is `None`.
#[derive(Clone, Debug, PartialEq)]
pub struct ObservationData {
    pub id: Option<String>,
    pub full_url: Option<String>,
    pub code: Option<CodingData>,
    pub value_coding: Option<CodingData>,
    pub value_quantity: Option<f64>,
    pub value_boolean: Option<bool>,
    pub value_string: Option<String>,
    pub value_date_time: Option<String>,
}

/// A translated result bundle, partitioned by resource type.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResultBundleData {
    pub reports: Vec<DiagnosticReportData>,
    pub observations: Vec<ObservationData>,
}

impl ResultBundleData {
    /// Resolves a `result[].reference` value against the observation entries.
    ///
    /// A reference matches an observation whose `id` equals the reference, whose id equals
    /// the reference with an `Observation/` prefix removed, or whose entry `fullUrl` equals the
    /// reference.
    pub fn observation(&self, reference: &str) -> Option<&ObservationData> {
        let local = reference.strip_prefix("Observation/").unwrap_or(reference);
        self.observations.iter().find(|obs| {
            obs.id.as_deref() == Some(reference)
                || obs.id.as_deref() == Some(local)
                || obs.full_url.as_deref() == Some(reference)
        })
    }
}

// ============================================================================
// Public ResultBundle operations
// ============================================================================

/// Result bundle operations.
///
/// Zero-sized namespace type; all methods are associated functions.
pub struct ResultBundle;

impl ResultBundle {
    /// Parse a result bundle from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError::Translation`] (with the failing path) when the JSON does not match
    /// the wire schema, or when the top-level `resourceType` is present and is not `Bundle`.
    pub fn parse(json_text: &str) -> FhirResult<ResultBundleData> {
        let mut deserializer = serde_json::Deserializer::from_str(json_text);
        let wire = serde_path_to_error::deserialize::<_, BundleWire>(&mut deserializer)
            .map_err(|e| schema_mismatch("Result bundle", e))?;
        deserializer.end()?;
        wire_to_domain(wire)
    }

    /// Translate an already-parsed JSON value.
    pub fn from_value(value: serde_json::Value) -> FhirResult<ResultBundleData> {
        let wire = serde_path_to_error::deserialize::<_, BundleWire>(value)
            .map_err(|e| schema_mismatch("Result bundle", e))?;
        wire_to_domain(wire)
    }
}

// ============================================================================
// Wire types (internal)
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BundleWire {
    resource_type: Option<String>,
    #[serde(default)]
    entry: Vec<EntryWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryWire {
    full_url: Option<String>,
    resource: Option<ResourceWire>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "resourceType")]
enum ResourceWire {
    DiagnosticReport(DiagnosticReportWire),
    Observation(ObservationWire),
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct DiagnosticReportWire {
    id: Option<String>,
    code: Option<CodeableConceptWire>,
    #[serde(default)]
    result: Vec<ReferenceWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObservationWire {
    id: Option<String>,
    code: Option<CodeableConceptWire>,
    value_codeable_concept: Option<CodeableConceptWire>,
    value_quantity: Option<QuantityWire>,
    value_boolean: Option<Value>,
    value_string: Option<Value>,
    value_date_time: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CodeableConceptWire {
    #[serde(default)]
    coding: Vec<CodingWire>,
}

#[derive(Debug, Deserialize)]
struct CodingWire {
    system: Option<String>,
    code: Option<String>,
    display: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QuantityWire {
    value: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ReferenceWire {
    reference: Option<String>,
}

// ============================================================================
// Helper functions (internal)
// ============================================================================

fn wire_to_domain(wire: BundleWire) -> FhirResult<ResultBundleData> {
    if let Some(resource_type) = wire.resource_type.as_deref() {
        if resource_type != "Bundle" {
            return Err(FhirError::Translation(format!(
                "expected resourceType Bundle, got {resource_type}"
            )));
        }
    }

    let mut data = ResultBundleData::default();
    for entry in wire.entry {
        match entry.resource {
            Some(ResourceWire::DiagnosticReport(report)) => {
                data.reports.push(DiagnosticReportData {
                    id: report.id,
                    code: report.code.and_then(first_coding),
                    result_references: report
                        .result
                        .into_iter()
                        .filter_map(|r| r.reference)
                        .collect(),
                });
            }
            Some(ResourceWire::Observation(obs)) => {
                data.observations.push(ObservationData {
                    id: obs.id,
                    full_url: entry.full_url,
                    code: obs.code.and_then(first_coding),
                    value_coding: obs.value_codeable_concept.and_then(first_coding),
                    value_quantity: obs
                        .value_quantity
                        .and_then(|q| q.value)
                        .as_ref()
                        .and_then(lenient_f64),
                    value_boolean: obs.value_boolean.as_ref().and_then(lenient_bool),
                    value_string: obs.value_string.as_ref().and_then(string_value),
                    value_date_time: obs.value_date_time.as_ref().and_then(string_value),
                });
            }
            Some(ResourceWire::Other) | None => {}
        }
    }

    Ok(data)
}

/// Takes `coding[0]`; a first coding without both system and code yields `None`.
fn first_coding(concept: CodeableConceptWire) -> Option<CodingData> {
    let coding = concept.coding.into_iter().next()?;
    Some(CodingData {
        system: coding.system?,
        code: coding.code?,
        display: coding.display,
    })
}

/// A JSON number, or a string holding a finite decimal number.
fn lenient_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

/// A JSON boolean, or the strings `true` / `false` in any case.
fn lenient_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn string_value(value: &Value) -> Option<String> {
    value.as_str().map(str::to_owned)
}
