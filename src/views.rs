use crate::calc::{
    self, compute_subject_average, filter_period, period_weight_sum, GradeMap, Period,
    SubjectAverage,
};
use crate::store::{self, ActivityRow, SubjectRow, UserRow};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
pub struct ViewError {
    pub code: &'static str,
    pub message: String,
}

impl ViewError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<rusqlite::Error> for ViewError {
    fn from(e: rusqlite::Error) -> Self {
        ViewError::new("db_query_failed", e.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradebookStudentRow {
    pub email: String,
    pub display_name: String,
    /// One cell per activity, in activity order.
    pub grades: Vec<serde_json::Value>,
    pub average: SubjectAverage,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradebookModel {
    pub subject: SubjectRow,
    pub period: Period,
    pub activities: Vec<ActivityRow>,
    pub period_weight_sum: f64,
    pub students: Vec<GradebookStudentRow>,
}

pub fn gradebook_subject(
    conn: &Connection,
    subject_id: &str,
    period: Period,
) -> Result<GradebookModel, ViewError> {
    let Some(subject) = store::get_subject(conn, subject_id)? else {
        return Err(ViewError::new("not_found", "subject not found"));
    };

    let activities: Vec<ActivityRow> = store::load_activities(conn, subject_id)?
        .into_iter()
        .filter(|a| a.def.period == period)
        .collect();
    let defs = store::activity_defs(&activities);
    let grades = store::load_subject_grades(conn, subject_id)?;
    let empty = GradeMap::new();

    let students = store::list_enrolled_students(conn, &subject.course_id)?
        .into_iter()
        .map(|s| {
            let g = grades.get(&s.email).unwrap_or(&empty);
            GradebookStudentRow {
                grades: defs
                    .iter()
                    .map(|a| {
                        g.get(&a.name)
                            .map(|v| v.to_json())
                            .unwrap_or(serde_json::Value::Null)
                    })
                    .collect(),
                average: compute_subject_average(g, &defs),
                email: s.email,
                display_name: s.display_name,
            }
        })
        .collect();

    Ok(GradebookModel {
        period_weight_sum: period_weight_sum(&defs),
        subject,
        period,
        activities,
        students,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterSubjectAverage {
    pub subject_id: String,
    pub subject_name: String,
    #[serde(flatten)]
    pub average: SubjectAverage,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterStudentRow {
    pub email: String,
    pub display_name: String,
    pub averages: Vec<RosterSubjectAverage>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterCourse {
    pub course_id: String,
    pub course_name: String,
    pub students: Vec<RosterStudentRow>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterModel {
    pub period: Period,
    pub courses: Vec<RosterCourse>,
}

struct LoadedSubject {
    row: SubjectRow,
    defs: Vec<calc::ActivityDef>,
    grades: HashMap<String, GradeMap>,
}

fn load_course_subjects(
    conn: &Connection,
    course_id: &str,
) -> Result<Vec<LoadedSubject>, ViewError> {
    let mut out = Vec::new();
    for row in store::list_subjects(conn, course_id)? {
        let defs = store::activity_defs(&store::load_activities(conn, &row.id)?);
        let grades = store::load_subject_grades(conn, &row.id)?;
        out.push(LoadedSubject { row, defs, grades });
    }
    Ok(out)
}

fn list_courses(conn: &Connection) -> Result<Vec<(String, String)>, ViewError> {
    let mut stmt = conn.prepare("SELECT id, name FROM courses ORDER BY name, id")?;
    let rows = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Every student of every course with one average per subject of that course.
pub fn roster_summary(conn: &Connection, period: Period) -> Result<RosterModel, ViewError> {
    let empty = GradeMap::new();
    let mut courses = Vec::new();

    for (course_id, course_name) in list_courses(conn)? {
        let subjects: Vec<(LoadedSubject, Vec<calc::ActivityDef>)> =
            load_course_subjects(conn, &course_id)?
                .into_iter()
                .map(|s| {
                    let in_period = filter_period(&s.defs, period);
                    (s, in_period)
                })
                .collect();

        let students = store::list_enrolled_students(conn, &course_id)?
            .into_iter()
            .map(|student: UserRow| RosterStudentRow {
                averages: subjects
                    .iter()
                    .map(|(s, defs)| RosterSubjectAverage {
                        subject_id: s.row.id.clone(),
                        subject_name: s.row.name.clone(),
                        average: compute_subject_average(
                            s.grades.get(&student.email).unwrap_or(&empty),
                            defs,
                        ),
                    })
                    .collect(),
                email: student.email,
                display_name: student.display_name,
            })
            .collect();

        courses.push(RosterCourse {
            course_id,
            course_name,
            students,
        });
    }

    Ok(RosterModel { period, courses })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodAverage {
    pub period: Period,
    #[serde(flatten)]
    pub average: SubjectAverage,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportCardSubject {
    pub subject_id: String,
    pub subject_name: String,
    pub teacher_email: Option<String>,
    pub periods: Vec<PeriodAverage>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportCardCourse {
    pub course_id: String,
    pub course_name: String,
    pub subjects: Vec<ReportCardSubject>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportCardModel {
    pub student: UserRow,
    pub courses: Vec<ReportCardCourse>,
}

/// Data behind a student's report card: every enrolled course and subject
/// with the four period averages.
pub fn report_card(conn: &Connection, student_email: &str) -> Result<ReportCardModel, ViewError> {
    let Some(student) = store::get_user(conn, student_email)? else {
        return Err(ViewError::new("not_found", "student not found"));
    };

    let mut stmt = conn.prepare(
        "SELECT c.id, c.name
         FROM enrollments e
         JOIN courses c ON c.id = e.course_id
         WHERE e.student_email = ?
         ORDER BY c.name, c.id",
    )?;
    let enrolled: Vec<(String, String)> = stmt
        .query_map([&student.email], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut courses = Vec::with_capacity(enrolled.len());
    for (course_id, course_name) in enrolled {
        let mut subjects = Vec::new();
        for row in store::list_subjects(conn, &course_id)? {
            let defs = store::activity_defs(&store::load_activities(conn, &row.id)?);
            let grades = store::load_grade_map(conn, &student.email, &row.id)?;
            subjects.push(ReportCardSubject {
                periods: Period::ALL
                    .iter()
                    .map(|&period| PeriodAverage {
                        period,
                        average: calc::subject_average_for_period(&grades, &defs, period),
                    })
                    .collect(),
                subject_id: row.id,
                subject_name: row.name,
                teacher_email: row.teacher_email,
            });
        }
        courses.push(ReportCardCourse {
            course_id,
            course_name,
            subjects,
        });
    }

    Ok(ReportCardModel { student, courses })
}
