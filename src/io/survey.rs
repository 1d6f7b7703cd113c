//! Survey-description parsing and provenance extraction.
//!
//! A survey description is an XML document carrying one block per delivered
//! grid plus survey-wide attribution, dates, and licensing. One
//! [`ProvenanceRecord`] is extracted per composited layer by exact grid-name
//! lookup; a layer whose description cannot be parsed or matched is excluded
//! from the job by the orchestrator.

use std::path::Path;

use chrono::NaiveDate;
use quick_xml::de::from_str;
use regex::Regex;
use serde::Deserialize;

use crate::types::{BagError, BagResult, ProvenanceRecord};

#[derive(Debug, Deserialize)]
struct SurveyDoc {
    metadata: MetadataBlock,
}

#[derive(Debug, Deserialize)]
struct MetadataBlock {
    poc: Option<Poc>,
    date: Option<DateRange>,
    #[serde(rename = "dataLicense")]
    data_license: Option<DataLicense>,
    #[serde(rename = "grid", default)]
    grids: Vec<GridBlock>,
}

#[derive(Debug, Deserialize)]
struct Poc {
    #[serde(rename = "responsibleParty")]
    responsible_party: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DateRange {
    start: Option<String>,
    end: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DataLicense {
    spdx: Option<Spdx>,
}

#[derive(Debug, Deserialize)]
struct Spdx {
    #[serde(rename = "licenseIdentifier")]
    license_identifier: Option<String>,
    #[serde(rename = "licenseDeed")]
    license_deed: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GridBlock {
    #[serde(rename = "gridName")]
    grid_name: Option<String>,
    detection: Option<Detection>,
    #[serde(rename = "coverageAssessment")]
    coverage_assessment: Option<CoverageAssessment>,
    uncertainty: Option<Uncertainty>,
}

#[derive(Debug, Deserialize)]
struct Detection {
    #[serde(rename = "significantFeature")]
    significant_feature: Option<String>,
    #[serde(rename = "leastDepth")]
    least_depth: Option<String>,
    size: Option<SizeBlock>,
}

#[derive(Debug, Deserialize)]
struct SizeBlock {
    fixed: Option<String>,
    variable: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CoverageAssessment {
    #[serde(rename = "fullSeafloor")]
    full_seafloor: Option<String>,
    interpolated: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Uncertainty {
    horizontal: Option<Horizontal>,
}

#[derive(Debug, Deserialize)]
struct Horizontal {
    fixed: Option<String>,
    variable: Option<String>,
}

/// Trim and sanitize a free-text field. Survey producers emit en-dashes in
/// date ranges; those are normalized to plain hyphens.
fn clean(text: Option<&String>) -> String {
    match text {
        Some(raw) => raw.trim().replace('\u{2013}', "-"),
        None => String::new(),
    }
}

/// A flag is set iff the field reads "yes" (case-insensitive); anything
/// else, including absence, is false.
fn as_bool(text: Option<&String>) -> bool {
    clean(text).eq_ignore_ascii_case("yes")
}

/// Pull the first decimal number out of a free-text field ("2.0 m" -> 2.0).
/// Empty and literal "n/a" fields read as 0.0; percentage-flagged fields are
/// scaled down to a fraction.
fn as_number(text: Option<&String>, is_percentage: bool) -> f32 {
    let value = clean(text);
    if value.is_empty() || value.eq_ignore_ascii_case("n/a") {
        return 0.0;
    }
    let pattern = Regex::new(r"[\d\.]+").expect("static regex");
    let num = pattern
        .find(&value)
        .and_then(|m| m.as_str().parse::<f32>().ok())
        .unwrap_or(0.0);
    if is_percentage {
        num / 100.0
    } else {
        num
    }
}

fn parse_date(text: Option<&String>, field: &str) -> Result<NaiveDate, String> {
    let value = clean(text);
    if value.is_empty() {
        return Err(format!("survey {field} date is missing"));
    }
    NaiveDate::parse_from_str(&value, "%Y-%m-%d")
        .map_err(|e| format!("survey {field} date '{value}' is invalid: {e}"))
}

/// Parsed survey description.
pub struct SurveyMetadata {
    doc: SurveyDoc,
    source: String,
}

impl SurveyMetadata {
    pub fn from_xml_str(xml: &str) -> BagResult<Self> {
        let doc: SurveyDoc = from_str(xml)
            .map_err(|e| BagError::XmlParsing(format!("survey description: {e}")))?;
        Ok(Self {
            doc,
            source: "<inline>".to_string(),
        })
    }

    pub fn from_path(path: &Path) -> BagResult<Self> {
        let xml = std::fs::read_to_string(path)?;
        let mut parsed = Self::from_xml_str(&xml)?;
        parsed.source = path.display().to_string();
        Ok(parsed)
    }

    /// Names of all grid blocks in the description.
    pub fn grid_names(&self) -> Vec<String> {
        self.doc
            .metadata
            .grids
            .iter()
            .map(|g| clean(g.grid_name.as_ref()))
            .collect()
    }

    /// Build the provenance record for the grid block named exactly
    /// `grid_name` (case-sensitive). The record's survey id is the grid name
    /// itself, which is how composited layers stay addressable per-grid even
    /// when several grids share one survey.
    pub fn record_for_grid(&self, grid_name: &str) -> BagResult<ProvenanceRecord> {
        let not_found = || BagError::ProvenanceNotFound {
            grid: grid_name.to_string(),
            path: self.source.clone(),
        };

        let grid = self
            .doc
            .metadata
            .grids
            .iter()
            .find(|g| clean(g.grid_name.as_ref()) == grid_name)
            .ok_or_else(|| not_found())?;

        let metadata = &self.doc.metadata;
        let detection = grid.detection.as_ref();
        let size = detection.and_then(|d| d.size.as_ref());
        let coverage = grid.coverage_assessment.as_ref();
        let horizontal = grid
            .uncertainty
            .as_ref()
            .and_then(|u| u.horizontal.as_ref());
        let spdx = metadata
            .data_license
            .as_ref()
            .and_then(|l| l.spdx.as_ref());
        let dates = metadata.date.as_ref();

        let survey_date_start =
            parse_date(dates.and_then(|d| d.start.as_ref()), "start").map_err(|e| {
                log::warn!("grid '{}' in '{}': {}", grid_name, self.source, e);
                not_found()
            })?;
        let survey_date_end =
            parse_date(dates.and_then(|d| d.end.as_ref()), "end").map_err(|e| {
                log::warn!("grid '{}' in '{}': {}", grid_name, self.source, e);
                not_found()
            })?;

        // An interpolated surface carries no direct bathymetric observations.
        let interpolated = as_bool(coverage.and_then(|c| c.interpolated.as_ref()));

        let license_name = {
            let name = clean(spdx.and_then(|s| s.license_identifier.as_ref()));
            if name.is_empty() {
                "Not assigned".to_string()
            } else {
                name
            }
        };

        Ok(ProvenanceRecord {
            significant_features: as_bool(
                detection.and_then(|d| d.significant_feature.as_ref()),
            ),
            least_depth: as_bool(detection.and_then(|d| d.least_depth.as_ref())),
            feature_size_fixed: as_number(size.and_then(|s| s.fixed.as_ref()), false),
            feature_size_var: as_number(size.and_then(|s| s.variable.as_ref()), true),
            full_coverage: as_bool(coverage.and_then(|c| c.full_seafloor.as_ref())),
            bathy_coverage: !interpolated,
            horizontal_uncert_fixed: as_number(
                horizontal.and_then(|h| h.fixed.as_ref()),
                false,
            ),
            horizontal_uncert_var: as_number(
                horizontal.and_then(|h| h.variable.as_ref()),
                true,
            ),
            survey_date_start,
            survey_date_end,
            source_institution: clean(
                metadata
                    .poc
                    .as_ref()
                    .and_then(|p| p.responsible_party.as_ref()),
            ),
            source_survey_id: grid_name.to_string(),
            source_survey_index: 0,
            license_name,
            license_url: clean(spdx.and_then(|s| s.license_deed.as_ref())),
        })
    }
}

/// One-shot extraction used by the orchestrator: any failure (unreadable
/// file, malformed XML, missing grid block, bad dates) maps to
/// [`BagError::ProvenanceNotFound`] so the caller can exclude exactly that
/// layer with the source path in hand.
pub fn extract_record(survey_path: &Path, grid_name: &str) -> BagResult<ProvenanceRecord> {
    let excluded = || BagError::ProvenanceNotFound {
        grid: grid_name.to_string(),
        path: survey_path.display().to_string(),
    };
    let survey = SurveyMetadata::from_path(survey_path).map_err(|e| {
        log::warn!(
            "survey description '{}' unusable: {}",
            survey_path.display(),
            e
        );
        excluded()
    })?;
    survey.record_for_grid(grid_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_number_free_text() {
        assert_eq!(as_number(Some(&"2.0 m".to_string()), false), 2.0);
        assert_eq!(as_number(Some(&"N/A".to_string()), false), 0.0);
        assert_eq!(as_number(Some(&"".to_string()), false), 0.0);
        assert_eq!(as_number(None, false), 0.0);
        assert_eq!(as_number(Some(&"5%".to_string()), true), 0.05);
    }

    #[test]
    fn test_as_bool_yes_only() {
        assert!(as_bool(Some(&"yes".to_string())));
        assert!(as_bool(Some(&"YES".to_string())));
        assert!(!as_bool(Some(&"no".to_string())));
        assert!(!as_bool(Some(&"true".to_string())));
        assert!(!as_bool(None));
    }

    #[test]
    fn test_clean_normalizes_en_dash() {
        let raw = "2011\u{2013}02\u{2013}10".to_string();
        assert_eq!(clean(Some(&raw)), "2011-02-10");
    }
}
