//! Translation of a result bundle into local observation trees.

use crate::concepts::{Concept, ConceptDatatype, ConceptResolution, ConceptResolver};
use crate::observation::{ObsValue, Observation, ObservationBuilder};
use crate::SyncResult;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use fhir::{DiagnosticReportData, ObservationData, ResultBundleData};

/// Builds the top-level observations for every report in `bundle`.
///
/// Reports and results that cannot be mapped are skipped; only infrastructure failures of the
/// concept dictionary are returned as errors.
pub(crate) fn build_observations(
    resolver: &ConceptResolver,
    builder: &ObservationBuilder,
    bundle: &ResultBundleData,
) -> SyncResult<Vec<Observation>> {
    let mut out = Vec::new();
    for report in &bundle.reports {
        out.extend(build_report(resolver, builder, bundle, report)?);
    }
    Ok(out)
}

fn build_report(
    resolver: &ConceptResolver,
    builder: &ObservationBuilder,
    bundle: &ResultBundleData,
    report: &DiagnosticReportData,
) -> SyncResult<Vec<Observation>> {
    let ConceptResolution::Mapped(test_concept) = resolver.resolve_coding(report.code.as_ref())?
    else {
        tracing::debug!(report = ?report.id, "report code not mapped, dropping report");
        return Ok(Vec::new());
    };

    let mut results = Vec::new();
    for reference in &report.result_references {
        let Some(entry) = bundle.observation(reference) else {
            tracing::warn!(
                report = ?report.id,
                reference = %reference,
                "result reference not in bundle"
            );
            continue;
        };
        if let Some(obs) = build_result(resolver, builder, entry)? {
            results.push(obs);
        }
    }

    if !test_concept.is_panel() {
        return Ok(results);
    }
    if results.is_empty() {
        tracing::debug!(concept = %test_concept.id, "panel has no usable results");
        return Ok(Vec::new());
    }

    let mut group = builder.group(&test_concept);
    for member in results {
        group.add_group_member(member)?;
    }
    Ok(vec![group])
}

fn build_result(
    resolver: &ConceptResolver,
    builder: &ObservationBuilder,
    entry: &ObservationData,
) -> SyncResult<Option<Observation>> {
    let ConceptResolution::Mapped(concept) = resolver.resolve_coding(entry.code.as_ref())? else {
        tracing::debug!(observation = ?entry.id, "result code not mapped");
        return Ok(None);
    };

    let Some(value) = extract_value(resolver, &concept, entry)? else {
        tracing::warn!(
            observation = ?entry.id,
            concept = %concept.id,
            datatype = ?concept.datatype,
            "result has no usable value"
        );
        return Ok(None);
    };

    if value.as_display_string().trim().is_empty() {
        tracing::warn!(observation = ?entry.id, concept = %concept.id, "empty result value");
        return Ok(None);
    }

    builder.value(&concept, value).map(Some)
}

fn extract_value(
    resolver: &ConceptResolver,
    concept: &Concept,
    entry: &ObservationData,
) -> SyncResult<Option<ObsValue>> {
    let value = match concept.datatype {
        ConceptDatatype::Coded => resolver
            .resolve_coding(entry.value_coding.as_ref())?
            .into_concept()
            .map(|answer| ObsValue::Coded {
                concept: answer.id,
                name: answer.name,
            }),
        ConceptDatatype::Numeric => entry.value_quantity.map(ObsValue::Numeric),
        ConceptDatatype::Boolean => entry.value_boolean.map(ObsValue::Boolean),
        ConceptDatatype::Text => entry.value_string.clone().map(ObsValue::Text),
        ConceptDatatype::Datetime => entry
            .value_date_time
            .as_deref()
            .and_then(parse_result_datetime)
            .map(ObsValue::Datetime),
    };
    Ok(value)
}

/// Accepts RFC 3339 timestamps (normalised to UTC) and plain `yyyy-MM-dd` dates (midnight).
fn parse_result_datetime(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_datetimes() {
        let midnight = NaiveDate::from_ymd_opt(2023, 5, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(parse_result_datetime("2023-05-01"), Some(midnight));
        assert_eq!(
            parse_result_datetime("2023-05-01T03:00:00+03:00"),
            Some(midnight)
        );
        assert_eq!(parse_result_datetime("01/05/2023"), None);
        assert_eq!(parse_result_datetime(""), None);
    }
}
