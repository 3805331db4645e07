use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Upper bound for the summed activity weights of one subject in one period.
pub const PERIOD_WEIGHT_BUDGET: f64 = 100.0;

// Weights arrive as decimals (33.3 + 33.3 + 33.4); compare with a little slack.
const BUDGET_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    #[default]
    P1,
    P2,
    P3,
    P4,
}

impl Period {
    pub const ALL: [Period; 4] = [Period::P1, Period::P2, Period::P3, Period::P4];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "p1" => Some(Self::P1),
            "p2" => Some(Self::P2),
            "p3" => Some(Self::P3),
            "p4" => Some(Self::P4),
            _ => None,
        }
    }

    /// Stored period tag as read back from a document. Unset or blank tags
    /// belong to the first period; unknown tags belong to none.
    pub fn from_stored(raw: Option<&str>) -> Option<Self> {
        match raw.map(str::trim) {
            None | Some("") => Some(Self::P1),
            Some(s) => Self::parse(s),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::P1 => "p1",
            Self::P2 => "p2",
            Self::P3 => "p3",
            Self::P4 => "p4",
        }
    }
}

/// A grade as recorded, before numeric coercion.
#[derive(Debug, Clone, PartialEq)]
pub enum GradeValue {
    Number(f64),
    Text(String),
}

impl GradeValue {
    /// `null` means "not graded" and yields `None`.
    pub fn from_json(v: &serde_json::Value) -> Option<Self> {
        match v {
            serde_json::Value::Null => None,
            serde_json::Value::Number(n) => n.as_f64().map(GradeValue::Number),
            serde_json::Value::String(s) => Some(GradeValue::Text(s.clone())),
            other => Some(GradeValue::Text(other.to_string())),
        }
    }

    pub fn from_sql(v: SqlValue) -> Option<Self> {
        match v {
            SqlValue::Null => None,
            SqlValue::Integer(n) => Some(GradeValue::Number(n as f64)),
            SqlValue::Real(n) => Some(GradeValue::Number(n)),
            SqlValue::Text(s) => Some(GradeValue::Text(s)),
            SqlValue::Blob(_) => Some(GradeValue::Text(String::new())),
        }
    }

    /// Numeric reading of the grade. Blank or non-numeric text has none.
    pub fn numeric(&self) -> Option<f64> {
        let n = match self {
            GradeValue::Number(n) => *n,
            GradeValue::Text(s) => s.trim().parse::<f64>().ok()?,
        };
        n.is_finite().then_some(n)
    }

    /// Wire form: numbers (including numeric text) as JSON numbers, the rest as strings.
    pub fn to_json(&self) -> serde_json::Value {
        match (self, self.numeric()) {
            (_, Some(n)) => serde_json::json!(n),
            (GradeValue::Text(s), None) => serde_json::Value::String(s.clone()),
            (GradeValue::Number(_), None) => serde_json::Value::Null,
        }
    }

    pub fn to_sql(&self) -> SqlValue {
        match self {
            GradeValue::Number(n) => SqlValue::Real(*n),
            GradeValue::Text(s) => SqlValue::Text(s.clone()),
        }
    }
}

/// Grades of one student in one subject, keyed by activity name.
pub type GradeMap = HashMap<String, GradeValue>;

/// Coerces a stored weight. Anything that is not a finite number weighs 0.
pub fn weight_from_sql(v: &SqlValue) -> f64 {
    let n = match v {
        SqlValue::Integer(n) => *n as f64,
        SqlValue::Real(n) => *n,
        SqlValue::Text(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        SqlValue::Null | SqlValue::Blob(_) => 0.0,
    };
    if n.is_finite() {
        n
    } else {
        0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityDef {
    pub name: String,
    pub weight: f64,
    pub period: Period,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAverage {
    pub value: i64,
    pub has_data: bool,
}

impl SubjectAverage {
    pub const NO_DATA: SubjectAverage = SubjectAverage {
        value: 0,
        has_data: false,
    };
}

pub fn filter_period(activities: &[ActivityDef], period: Period) -> Vec<ActivityDef> {
    activities
        .iter()
        .filter(|a| a.period == period)
        .cloned()
        .collect()
}

/// Average of one student in one subject over the activities of one period.
///
/// With at least one positively weighted activity every activity contributes
/// `grade * weight / 100`, ungraded ones contributing 0. Otherwise the result
/// is the plain mean of the graded activities. Both are rounded to the
/// nearest integer, halves away from zero.
///
/// Activities are not de-duplicated by name: two activities sharing a name
/// read the same grade and are both counted.
pub fn compute_subject_average(grades: &GradeMap, activities: &[ActivityDef]) -> SubjectAverage {
    if activities.is_empty() {
        return SubjectAverage::NO_DATA;
    }

    let grade_of = |a: &ActivityDef| grades.get(&a.name).and_then(GradeValue::numeric);

    let weighted = activities.iter().any(|a| a.weight > 0.0);
    let value = if weighted {
        let sum: f64 = activities
            .iter()
            .map(|a| grade_of(a).unwrap_or(0.0) * a.weight / 100.0)
            .sum();
        sum.round() as i64
    } else {
        let graded: Vec<f64> = activities.iter().filter_map(grade_of).collect();
        if graded.is_empty() {
            0
        } else {
            (graded.iter().sum::<f64>() / graded.len() as f64).round() as i64
        }
    };

    SubjectAverage {
        value,
        has_data: true,
    }
}

pub fn subject_average_for_period(
    grades: &GradeMap,
    activities: &[ActivityDef],
    period: Period,
) -> SubjectAverage {
    compute_subject_average(grades, &filter_period(activities, period))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetExceeded {
    pub current_sum: f64,
    pub attempted_weight: f64,
}

pub fn period_weight_sum(activities: &[ActivityDef]) -> f64 {
    activities.iter().map(|a| a.weight).sum()
}

/// Creation-time guard for a new activity. `existing` must already be scoped
/// to the subject and period the new activity goes into.
pub fn check_activity_budget(
    existing: &[ActivityDef],
    new_weight: f64,
) -> Result<(), BudgetExceeded> {
    let current_sum = period_weight_sum(existing);
    if current_sum + new_weight > PERIOD_WEIGHT_BUDGET + BUDGET_EPSILON {
        return Err(BudgetExceeded {
            current_sum,
            attempted_weight: new_weight,
        });
    }
    Ok(())
}

/// Boolean form of [`check_activity_budget`].
pub fn can_add_activity(existing: &[ActivityDef], new_weight: f64) -> bool {
    check_activity_budget(existing, new_weight).is_ok()
}
