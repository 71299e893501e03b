//! Viral load result classification and date parsing.

use crate::concepts::ConceptId;
use crate::constants::{VL_DETECTED_CONCEPT, VL_FAILED_CONCEPT, VL_UNDETECTED_CONCEPT};
use crate::{SyncError, SyncResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A viral load result as reported by the lab, before validation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViralLoadResult {
    /// Free text such as `"Target Not Detected"` or `"12345 copies/mL"`.
    pub qualitative: String,
    /// Copies per mL.
    pub quantitative: String,
    /// `yyyy-MM-dd` or `dd/MM/yyyy`.
    pub date_collected: String,
}

/// Validated form of a [`ViralLoadResult`].
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ParsedViralLoad {
    pub outcome: ViralLoadOutcome,
    pub copies: f64,
    pub collected_on: NaiveDate,
}

impl ViralLoadResult {
    pub(crate) fn parse(&self) -> SyncResult<ParsedViralLoad> {
        let collected_on = parse_collection_date(&self.date_collected)?;
        let quantitative = self.quantitative.trim();
        let copies = quantitative
            .parse::<f64>()
            .map_err(|_| SyncError::InvalidNumeric(quantitative.to_owned()))?;
        Ok(ParsedViralLoad {
            outcome: ViralLoadOutcome::classify(&self.qualitative),
            copies,
            collected_on,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViralLoadOutcome {
    Detected,
    Failed,
    Undetected,
}

impl ViralLoadOutcome {
    /// Classifies lab free text. Matching is case sensitive and ignores double quotes.
    pub fn classify(qualitative: &str) -> Self {
        let text = qualitative.replace('"', "");
        if text.contains("Target Not Detected") || text.contains("Not detected") {
            ViralLoadOutcome::Undetected
        } else if text.contains("FAILED") {
            ViralLoadOutcome::Failed
        } else {
            ViralLoadOutcome::Detected
        }
    }

    /// Coded answer recorded for this outcome.
    pub fn concept(&self) -> ConceptId {
        match self {
            ViralLoadOutcome::Detected => VL_DETECTED_CONCEPT,
            ViralLoadOutcome::Failed => VL_FAILED_CONCEPT,
            ViralLoadOutcome::Undetected => VL_UNDETECTED_CONCEPT,
        }
    }
}

impl fmt::Display for ViralLoadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ViralLoadOutcome::Detected => "detected",
            ViralLoadOutcome::Failed => "failed",
            ViralLoadOutcome::Undetected => "undetected",
        };
        f.write_str(s)
    }
}

/// Parses a sample collection date, picking the format from its separator.
///
/// `-` selects `yyyy-MM-dd` and `/` selects `dd/MM/yyyy`.
///
/// # Errors
///
/// Returns [`SyncError::UnparseableDate`] for any other separator or a date that does not
/// match the selected format.
pub fn parse_collection_date(raw: &str) -> SyncResult<NaiveDate> {
    let trimmed = raw.trim();
    let format = if trimmed.contains('-') {
        "%Y-%m-%d"
    } else if trimmed.contains('/') {
        "%d/%m/%Y"
    } else {
        return Err(SyncError::UnparseableDate(raw.to_owned()));
    };
    NaiveDate::parse_from_str(trimmed, format)
        .map_err(|_| SyncError::UnparseableDate(raw.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert_eq!(
            ViralLoadOutcome::classify("Not detected"),
            ViralLoadOutcome::Undetected
        );
        assert_eq!(
            ViralLoadOutcome::classify("\"Target Not Detected\""),
            ViralLoadOutcome::Undetected
        );
        assert_eq!(
            ViralLoadOutcome::classify("Test FAILED: invalid sample"),
            ViralLoadOutcome::Failed
        );
        assert_eq!(
            ViralLoadOutcome::classify("12345 copies/mL"),
            ViralLoadOutcome::Detected
        );
        assert_eq!(
            ViralLoadOutcome::classify("not detected"),
            ViralLoadOutcome::Detected,
            "matching is case sensitive"
        );
    }

    #[test]
    fn outcome_concepts() {
        assert_eq!(ViralLoadOutcome::Undetected.concept(), ConceptId(1306));
        assert_eq!(ViralLoadOutcome::Failed.concept(), ConceptId(1304));
        assert_eq!(ViralLoadOutcome::Detected.concept(), ConceptId(1301));
    }

    #[test]
    fn collection_dates() {
        let may_first = NaiveDate::from_ymd_opt(2023, 5, 1).unwrap();
        assert_eq!(parse_collection_date("2023-05-01").unwrap(), may_first);
        assert_eq!(parse_collection_date("01/05/2023").unwrap(), may_first);
        assert!(matches!(
            parse_collection_date("2023.05.01"),
            Err(SyncError::UnparseableDate(_))
        ));
        assert!(matches!(
            parse_collection_date("2023-13-01"),
            Err(SyncError::UnparseableDate(_))
        ));
    }

    #[test]
    fn parse_rejects_non_numeric_quantity() {
        let result = ViralLoadResult {
            qualitative: "Detected".into(),
            quantitative: "lots".into(),
            date_collected: "2023-05-01".into(),
        };
        assert!(matches!(result.parse(), Err(SyncError::InvalidNumeric(_))));
    }
}
