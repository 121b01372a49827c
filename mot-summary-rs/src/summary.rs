// mot-summary-rs/src/summary.rs
//
// MOT test record validation and summary generation
//
// Individual test records arrive as raw JSON and cross a typed boundary
// here: `parse_mot_test` either produces a well-formed `MotTest` or a
// structured rejection reason. Records that fail validation are dropped
// from the summary; the remaining records still render in their original
// API order.

use serde_json::Value;

use crate::mot_client::VehicleRecord;

/// Sentinel returned when a vehicle has no MOT history. The exact wording
/// is contractual: the front door returns it verbatim with a 400, distinct
/// from generic failures.
pub const NO_MOT_DATA_MESSAGE: &str = "No MoT test data available for this vehicle.";

/// Fixed apology used when the history payload is structurally unusable.
/// The underlying cause is logged server-side only.
pub const SUMMARY_ERROR_MESSAGE: &str = "An error occurred while generating the MoT summary.";

const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestResult {
    Passed,
    Failed,
}

impl TestResult {
    /// Strict, case-sensitive parse. `PASSED` and `FAILED` only; lowercase
    /// or near-miss values are rejected by policy.
    pub fn parse_strict(raw: &str) -> Option<Self> {
        match raw {
            "PASSED" => Some(TestResult::Passed),
            "FAILED" => Some(TestResult::Failed),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TestResult::Passed => "Pass",
            TestResult::Failed => "Fail",
        }
    }
}

/// Why a raw MOT test record was excluded from the summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestRejection {
    NotAnObject,
    MissingCompletedDate,
    InvalidTestResult,
    NonNumericOdometer,
}

impl std::fmt::Display for TestRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestRejection::NotAnObject => write!(f, "record is not a JSON object"),
            TestRejection::MissingCompletedDate => {
                write!(f, "invalid or missing 'completedDate'")
            }
            TestRejection::InvalidTestResult => write!(f, "missing or invalid 'testResult'"),
            TestRejection::NonNumericOdometer => write!(f, "non-numeric 'odometerValue'"),
        }
    }
}

/// A validated MOT test record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotTest {
    pub completed_date: String,
    pub result: TestResult,
    pub odometer_value: Option<String>,
    pub odometer_unit: Option<String>,
    pub defects: Vec<Defect>,
}

/// A defect recorded during a test. Best-effort extraction with "N/A"
/// defaults; no validation applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Defect {
    pub text: String,
    pub defect_type: String,
    pub dangerous: String,
}

fn field_display(record: &serde_json::Map<String, Value>, key: &str) -> String {
    match record.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => "N/A".to_string(),
        Some(other) => other.to_string(),
    }
}

/// Validate a raw test record into a typed `MotTest`.
///
/// Rules apply in order and short-circuit on the first failure:
/// 1. the value must be a JSON object;
/// 2. `completedDate` must be present and a string;
/// 3. `testResult` must be exactly `PASSED` or `FAILED`;
/// 4. `odometerValue`, if present, must be an integer or an integer string.
pub fn parse_mot_test(value: &Value) -> Result<MotTest, TestRejection> {
    let record = value.as_object().ok_or(TestRejection::NotAnObject)?;

    let completed_date = record
        .get("completedDate")
        .and_then(Value::as_str)
        .ok_or(TestRejection::MissingCompletedDate)?
        .to_string();

    let result = record
        .get("testResult")
        .and_then(Value::as_str)
        .and_then(TestResult::parse_strict)
        .ok_or(TestRejection::InvalidTestResult)?;

    let odometer_value = match record.get("odometerValue") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => {
            if s.trim().parse::<i64>().is_err() {
                return Err(TestRejection::NonNumericOdometer);
            }
            Some(s.clone())
        }
        // Float values are rejected: the mileage contract is integer-only.
        Some(Value::Number(n)) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        Some(_) => return Err(TestRejection::NonNumericOdometer),
    };

    let odometer_unit = record
        .get("odometerUnit")
        .and_then(Value::as_str)
        .map(str::to_string);

    let defects = record
        .get("defects")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| {
                    let empty = serde_json::Map::new();
                    let defect = item.as_object().unwrap_or(&empty);
                    Defect {
                        text: field_display(defect, "text"),
                        defect_type: field_display(defect, "type"),
                        dangerous: field_display(defect, "dangerous"),
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(MotTest {
        completed_date,
        result,
        odometer_value,
        odometer_unit,
        defects,
    })
}

/// Bool-shaped validation check over a raw test record, logging the
/// rejection reason. Pure apart from the diagnostic log.
pub fn validate_mot_test(value: &Value) -> bool {
    match parse_mot_test(value) {
        Ok(_) => true,
        Err(rejection) => {
            log::error!("Invalid MOT test record: {}", rejection);
            false
        }
    }
}

/// Result of summary generation, so callers branch on structure instead of
/// matching substrings of the rendered text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryOutcome {
    /// The vehicle has no MOT test history.
    Empty,
    /// A rendered multi-line summary.
    Summary(String),
}

impl SummaryOutcome {
    /// Client-facing text for this outcome.
    pub fn text(&self) -> &str {
        match self {
            SummaryOutcome::Empty => NO_MOT_DATA_MESSAGE,
            SummaryOutcome::Summary(text) => text,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, SummaryOutcome::Empty)
    }
}

/// Render a vehicle record into a human-readable MOT history summary.
///
/// Invalid test records are skipped and logged; valid records render in
/// the API's original order. Deterministic: the same record always yields
/// byte-identical output.
pub fn generate_summary(record: &VehicleRecord) -> SummaryOutcome {
    if record.mot_tests.is_empty() {
        log::warn!(
            "No MOT test data available for vehicle registration: {}",
            record.registration.as_deref().unwrap_or(UNKNOWN)
        );
        return SummaryOutcome::Empty;
    }

    fn header_field(field: &Option<String>) -> &str {
        field.as_deref().unwrap_or(UNKNOWN)
    }

    let mut summary = format!(
        "Vehicle Registration: {}\n",
        header_field(&record.registration)
    );
    summary.push_str(&format!("Make: {}\n", header_field(&record.make)));
    summary.push_str(&format!("Model: {}\n", header_field(&record.model)));
    summary.push_str(&format!(
        "First Registered: {}\n\n",
        header_field(&record.first_used_date)
    ));
    summary.push_str("MoT Test History:\n");

    for raw_test in &record.mot_tests {
        let test = match parse_mot_test(raw_test) {
            Ok(test) => test,
            Err(rejection) => {
                log::warn!("Skipping invalid MOT test record: {}", rejection);
                continue;
            }
        };

        summary.push_str(&format!(
            "- Test Date: {}, Result: {}\n",
            test.completed_date,
            test.result.label()
        ));
        summary.push_str(&format!(
            "  Mileage: {} {}\n",
            test.odometer_value.as_deref().unwrap_or("N/A"),
            test.odometer_unit.as_deref().unwrap_or("")
        ));

        for defect in &test.defects {
            summary.push_str(&format!(
                "  Defect: {} (Type: {}, Dangerous: {})\n",
                defect.text, defect.defect_type, defect.dangerous
            ));
        }
    }

    SummaryOutcome::Summary(summary)
}
