//! Request, response and sandbox envelope types.
//!
//! [`AnswerRequest`] and [`AnswerResponse`] are the host-facing wire format.
//! [`RunnerInput`] and [`RunnerOutput`] are the only values that cross into
//! and out of the sandbox thread, always as serialized text.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Schema version of [`RunnerInput`] / [`RunnerOutput`].
pub const ENVELOPE_VERSION: u32 = 1;

/// Field name → raw stored value.
pub type FieldMap = Map<String, Value>;

/// Alias → real field name.
pub type AliasTable = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub real_name: String,
}

/// One student's user info and fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub user: User,
    pub fields: FieldMap,
}

/// Grade → minimum points.
///
/// Entries keep the order scripts enumerate object keys in: integer-like keys
/// ascending, then the remaining keys in document order. A repeated key keeps
/// its first position and its last value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GradingScale(Vec<(String, f64)>);

fn array_index(key: &str) -> Option<u32> {
    key.parse::<u32>()
        .ok()
        .filter(|n| *n != u32::MAX && n.to_string() == key)
}

impl GradingScale {
    pub fn new(entries: impl IntoIterator<Item = (String, f64)>) -> Self {
        let mut deduped: Vec<(String, f64)> = Vec::new();
        for (grade, points) in entries {
            match deduped.iter_mut().find(|(g, _)| *g == grade) {
                Some(entry) => entry.1 = points,
                None => deduped.push((grade, points)),
            }
        }
        let (mut indexed, named): (Vec<_>, Vec<_>) = deduped
            .into_iter()
            .partition(|(g, _)| array_index(g).is_some());
        indexed.sort_by_key(|(g, _)| array_index(g));
        indexed.extend(named);
        Self(indexed)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.0.iter().map(|(g, p)| (g.as_str(), *p))
    }

    pub fn get(&self, grade: &str) -> Option<f64> {
        self.iter().find(|(g, _)| *g == grade).map(|(_, p)| p)
    }
}

impl Serialize for GradingScale {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (grade, points) in &self.0 {
            map.serialize_entry(grade, points)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for GradingScale {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ScaleVisitor;

        impl<'de> Visitor<'de> for ScaleVisitor {
            type Value = GradingScale;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of grade to minimum points")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::new();
                while let Some(entry) = access.next_entry::<String, f64>()? {
                    entries.push(entry);
                }
                Ok(GradingScale::new(entries))
            }
        }

        deserializer.deserialize_map(ScaleVisitor)
    }
}

/// Run configuration supplied with each request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Markup {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preprogram: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postprogram: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoadd: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grading_scale: Option<GradingScale>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_grade: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_points: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credit_field: Option<String>,
}

impl Markup {
    pub fn autoadd(&self) -> bool {
        self.autoadd.unwrap_or(true)
    }

    /// Markup timeout in whole milliseconds; zero or invalid means unset.
    pub fn timeout_ms(&self) -> Option<u64> {
        self.timeout
            .filter(|t| t.is_finite() && *t >= 1.0)
            .map(|t| t as u64)
    }

    pub fn grade_field(&self) -> &str {
        non_empty(self.grade_field.as_deref()).unwrap_or("grade")
    }

    pub fn credit_field(&self) -> &str {
        non_empty(self.credit_field.as_deref()).unwrap_or("credit")
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.is_empty())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerInput {
    pub data: Vec<StudentRecord>,
    pub aliases: AliasTable,
}

/// An answer request from the host platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerRequest {
    pub markup: Markup,
    pub input: AnswerInput,
    #[serde(rename = "taskID")]
    pub task_id: String,
}

/// A non-fatal problem recorded while a script ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub msg: String,
    #[serde(rename = "stackTrace", default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

impl Diagnostic {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            msg: msg.into(),
            stack_trace: None,
        }
    }
}

/// Diagnostics attributed to one user (or to `"program"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserErrors {
    pub user: String,
    pub errors: Vec<Diagnostic>,
}

/// The fields a student's program wrote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDelta {
    pub user: i64,
    pub fields: FieldMap,
}

/// A run-ending failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FatalError {
    pub msg: String,
    #[serde(rename = "stackTrace", default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

impl FatalError {
    /// A failure with no script excerpt.
    pub fn generic(msg: impl Into<String>) -> Self {
        Self {
            msg: msg.into(),
            stack_trace: None,
        }
    }
}

/// Everything a completed batch produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub res: Vec<FieldDelta>,
    pub output: String,
    pub errors: Vec<UserErrors>,
    pub outdata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed(RunResult),
    Fatal { fatal: FatalError, output: String },
}

/// Sent into the sandbox thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerInput {
    pub version: u32,
    pub records: Vec<StudentRecord>,
    pub current_document_id: String,
    pub markup: Markup,
    pub aliases: AliasTable,
}

/// Returned from the sandbox thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerOutput {
    pub version: u32,
    pub outcome: RunOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedWeb {
    pub output: String,
    pub errors: Vec<UserErrors>,
    pub outdata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedWeb {
    #[serde(rename = "fatalError")]
    pub fatal_error: FatalError,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedWeb {
    pub error: String,
}

/// Response body. The transport status is always success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerResponse {
    Saved {
        savedata: Vec<FieldDelta>,
        web: SavedWeb,
    },
    Failed {
        web: FailedWeb,
    },
    Rejected {
        web: RejectedWeb,
    },
}

impl AnswerResponse {
    pub fn saved(result: RunResult) -> Self {
        AnswerResponse::Saved {
            savedata: result.res,
            web: SavedWeb {
                output: result.output,
                errors: result.errors,
                outdata: result.outdata,
            },
        }
    }

    pub fn failed(fatal_error: FatalError, output: String) -> Self {
        AnswerResponse::Failed {
            web: FailedWeb {
                fatal_error,
                output,
            },
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        AnswerResponse::Rejected {
            web: RejectedWeb {
                error: error.into(),
            },
        }
    }

    pub fn is_saved(&self) -> bool {
        matches!(self, AnswerResponse::Saved { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_parses_wire_names() {
        let req: AnswerRequest = serde_json::from_value(json!({
            "markup": {"program": "tools.print(1)", "gradingScale": {"5": 90}, "autoadd": false},
            "input": {
                "data": [{"user": {"id": 1, "name": "a", "real_name": "A A"}, "fields": {"3.x": 1}}],
                "aliases": {"x": "3.x"}
            },
            "taskID": "3.jsrunner"
        }))
        .unwrap();
        assert_eq!(req.task_id, "3.jsrunner");
        assert!(!req.markup.autoadd());
        assert_eq!(req.markup.grading_scale.unwrap().get("5"), Some(90.0));
        assert_eq!(req.input.data[0].user.real_name, "A A");
    }

    #[test]
    fn test_markup_defaults() {
        let m = Markup::default();
        assert!(m.autoadd());
        assert_eq!(m.timeout_ms(), None);
        assert_eq!(m.grade_field(), "grade");
        assert_eq!(m.credit_field(), "credit");
        let m = Markup {
            timeout: Some(0.0),
            grade_field: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(m.timeout_ms(), None);
        assert_eq!(m.grade_field(), "grade");
    }

    #[test]
    fn test_response_shapes() {
        let saved = AnswerResponse::saved(RunResult::default());
        let v = serde_json::to_value(&saved).unwrap();
        assert!(v["savedata"].is_array());
        assert_eq!(v["web"]["output"], "");

        let failed = AnswerResponse::failed(FatalError::generic("boom"), String::new());
        let v = serde_json::to_value(&failed).unwrap();
        assert_eq!(v["web"]["fatalError"]["msg"], "boom");
        assert!(v["web"]["fatalError"].get("stackTrace").is_none());
        assert!(v.get("savedata").is_none());

        let rejected = AnswerResponse::rejected("nope");
        assert_eq!(serde_json::to_value(&rejected).unwrap(), json!({"web": {"error": "nope"}}));
    }

    #[test]
    fn test_grading_scale_enumeration_order() {
        let scale: GradingScale =
            serde_json::from_str(r#"{"pass": 50, "10": 90, "hyv": 70, "9": 90, "01": 1, "10": 95}"#)
                .unwrap();
        let grades: Vec<_> = scale.iter().collect();
        assert_eq!(
            grades,
            vec![("9", 90.0), ("10", 95.0), ("pass", 50.0), ("hyv", 70.0), ("01", 1.0)]
        );
        let text = serde_json::to_string(&scale).unwrap();
        assert_eq!(serde_json::from_str::<GradingScale>(&text).unwrap(), scale);
    }

    #[test]
    fn test_runner_output_roundtrip() {
        let out = RunnerOutput {
            version: ENVELOPE_VERSION,
            outcome: RunOutcome::Fatal {
                fatal: FatalError::generic("x"),
                output: "o".into(),
            },
        };
        let text = serde_json::to_string(&out).unwrap();
        assert!(text.contains("\"status\":\"fatal\""));
        let back: RunnerOutput = serde_json::from_str(&text).unwrap();
        assert_eq!(back, out);
    }
}
