//! Typed reads over the workspace tables.
//!
//! Everything coming out of here has passed boundary coercion: weights are
//! finite numbers, periods are known tags, grades are `GradeValue`s.

use crate::calc::{weight_from_sql, ActivityDef, GradeMap, GradeValue, Period};
use log::warn;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRow {
    pub email: String,
    pub display_name: String,
    pub role: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Self::Admin),
            "teacher" => Some(Self::Teacher),
            "student" => Some(Self::Student),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Teacher => "teacher",
            Self::Student => "student",
        }
    }
}

impl UserRow {
    pub fn role(&self) -> Option<Role> {
        Role::parse(&self.role)
    }
}

/// Maps a `SELECT email, display_name, role` row.
pub fn map_user(r: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        email: r.get(0)?,
        display_name: r.get(1)?,
        role: r.get(2)?,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRow {
    pub id: String,
    pub course_id: String,
    pub course_name: String,
    pub name: String,
    pub teacher_email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRow {
    pub id: String,
    pub subject_id: String,
    #[serde(flatten)]
    pub def: ActivityDef,
}

pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

pub fn get_user(conn: &Connection, email: &str) -> rusqlite::Result<Option<UserRow>> {
    conn.query_row(
        "SELECT email, display_name, role FROM users WHERE email = ?",
        [email],
        map_user,
    )
    .optional()
}

pub fn get_subject(conn: &Connection, subject_id: &str) -> rusqlite::Result<Option<SubjectRow>> {
    conn.query_row(
        "SELECT s.id, s.course_id, c.name, s.name, s.teacher_email
         FROM subjects s
         JOIN courses c ON c.id = s.course_id
         WHERE s.id = ?",
        [subject_id],
        |r| {
            Ok(SubjectRow {
                id: r.get(0)?,
                course_id: r.get(1)?,
                course_name: r.get(2)?,
                name: r.get(3)?,
                teacher_email: r.get(4)?,
            })
        },
    )
    .optional()
}

pub fn list_subjects(conn: &Connection, course_id: &str) -> rusqlite::Result<Vec<SubjectRow>> {
    let mut stmt = conn.prepare(
        "SELECT s.id, s.course_id, c.name, s.name, s.teacher_email
         FROM subjects s
         JOIN courses c ON c.id = s.course_id
         WHERE s.course_id = ?
         ORDER BY s.name",
    )?;
    let rows = stmt
        .query_map([course_id], |r| {
            Ok(SubjectRow {
                id: r.get(0)?,
                course_id: r.get(1)?,
                course_name: r.get(2)?,
                name: r.get(3)?,
                teacher_email: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// All activities of a subject in insertion order. Rows carrying an unknown
/// period tag are skipped.
pub fn load_activities(conn: &Connection, subject_id: &str) -> rusqlite::Result<Vec<ActivityRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, weight, period FROM activities
         WHERE subject_id = ?
         ORDER BY sort_order, rowid",
    )?;
    let raw = stmt
        .query_map([subject_id], |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            let weight: SqlValue = r.get(2)?;
            let period: Option<String> = r.get(3)?;
            Ok((id, name, weight, period))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::with_capacity(raw.len());
    for (id, name, weight, period) in raw {
        let Some(period) = Period::from_stored(period.as_deref()) else {
            warn!(
                "event=activity_skipped reason=unknown_period activity_id={} period={:?}",
                id, period
            );
            continue;
        };
        out.push(ActivityRow {
            id,
            subject_id: subject_id.to_string(),
            def: ActivityDef {
                name,
                weight: weight_from_sql(&weight),
                period,
            },
        });
    }
    Ok(out)
}

pub fn activity_defs(rows: &[ActivityRow]) -> Vec<ActivityDef> {
    rows.iter().map(|r| r.def.clone()).collect()
}

pub fn load_grade_map(
    conn: &Connection,
    student_email: &str,
    subject_id: &str,
) -> rusqlite::Result<GradeMap> {
    let mut stmt = conn.prepare(
        "SELECT activity_name, value FROM grades
         WHERE student_email = ? AND subject_id = ?",
    )?;
    let rows = stmt
        .query_map((student_email, subject_id), |r| {
            let name: String = r.get(0)?;
            let value: SqlValue = r.get(1)?;
            Ok((name, value))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows
        .into_iter()
        .filter_map(|(name, value)| GradeValue::from_sql(value).map(|g| (name, g)))
        .collect())
}

/// Grade maps of every student with grades in the subject.
pub fn load_subject_grades(
    conn: &Connection,
    subject_id: &str,
) -> rusqlite::Result<HashMap<String, GradeMap>> {
    let mut stmt = conn.prepare(
        "SELECT student_email, activity_name, value FROM grades WHERE subject_id = ?",
    )?;
    let rows = stmt
        .query_map([subject_id], |r| {
            let email: String = r.get(0)?;
            let name: String = r.get(1)?;
            let value: SqlValue = r.get(2)?;
            Ok((email, name, value))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out: HashMap<String, GradeMap> = HashMap::new();
    for (email, name, value) in rows {
        if let Some(g) = GradeValue::from_sql(value) {
            out.entry(email).or_default().insert(name, g);
        }
    }
    Ok(out)
}

pub fn list_enrolled_students(
    conn: &Connection,
    course_id: &str,
) -> rusqlite::Result<Vec<UserRow>> {
    let mut stmt = conn.prepare(
        "SELECT u.email, u.display_name, u.role
         FROM enrollments e
         JOIN users u ON u.email = e.student_email
         WHERE e.course_id = ?
         ORDER BY u.display_name, u.email",
    )?;
    let rows = stmt
        .query_map([course_id], map_user)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn is_enrolled(conn: &Connection, course_id: &str, email: &str) -> rusqlite::Result<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM enrollments WHERE course_id = ? AND student_email = ?",
            (course_id, email),
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}
