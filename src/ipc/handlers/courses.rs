use crate::audit;
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    db_err, get_optional_str, get_required_email, get_required_str, require_admin, require_conn,
    require_subject, require_user, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, Role};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::BTreeSet;
use uuid::Uuid;

fn require_course(conn: &Connection, course_id: &str) -> Result<String, HandlerErr> {
    conn.query_row("SELECT name FROM courses WHERE id = ?", [course_id], |r| {
        r.get::<_, String>(0)
    })
    .optional()
    .map_err(db_err("db_query_failed"))?
    .ok_or_else(|| HandlerErr::new("not_found", "course not found"))
}

fn require_teacher_role(conn: &Connection, email: &str) -> Result<(), HandlerErr> {
    let user = require_user(conn, email)?;
    match user.role() {
        Some(Role::Teacher) | Some(Role::Admin) => Ok(()),
        _ => Err(HandlerErr::new("bad_params", "assigned teacher must have role teacher or admin")
            .with_details(json!({ "email": email, "role": user.role }))),
    }
}

fn courses_list(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    // Correlated subqueries keep the counts independent of each other.
    let mut stmt = conn
        .prepare(
            "SELECT
               c.id,
               c.name,
               (SELECT COUNT(*) FROM enrollments e WHERE e.course_id = c.id) AS student_count,
               (SELECT COUNT(*) FROM subjects s WHERE s.course_id = c.id) AS subject_count
             FROM courses c
             ORDER BY c.name, c.id",
        )
        .map_err(db_err("db_query_failed"))?;
    let courses = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let student_count: i64 = row.get(2)?;
            let subject_count: i64 = row.get(3)?;
            Ok(json!({
                "id": id,
                "name": name,
                "studentCount": student_count,
                "subjectCount": subject_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed"))?;
    Ok(json!({ "courses": courses }))
}

fn courses_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let course_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO courses(id, name, created_at) VALUES(?, ?, ?)",
        (&course_id, &name, audit::now_rfc3339()),
    )
    .map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string())
            .with_details(json!({ "table": "courses" }))
    })?;
    Ok(json!({ "courseId": course_id, "name": name }))
}

fn courses_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let actor = get_required_email(params, "actorEmail")?;
    require_admin(conn, &actor)?;
    let course_name = require_course(conn, &course_id)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;

    // No ON DELETE CASCADE: delete in dependency order.
    for (table, sql) in [
        (
            "grades",
            "DELETE FROM grades WHERE subject_id IN (SELECT id FROM subjects WHERE course_id = ?)",
        ),
        (
            "activities",
            "DELETE FROM activities WHERE subject_id IN (SELECT id FROM subjects WHERE course_id = ?)",
        ),
        ("subjects", "DELETE FROM subjects WHERE course_id = ?"),
        ("enrollments", "DELETE FROM enrollments WHERE course_id = ?"),
        ("courses", "DELETE FROM courses WHERE id = ?"),
    ] {
        tx.execute(sql, [&course_id]).map_err(|e| {
            HandlerErr::new("db_delete_failed", e.to_string())
                .with_details(json!({ "table": table }))
        })?;
    }
    audit::record(
        &tx,
        &actor,
        "course.deleted",
        &json!({ "courseId": course_id, "name": course_name }),
    )
    .map_err(db_err("db_insert_failed"))?;
    tx.commit().map_err(db_err("db_commit_failed"))?;

    Ok(json!({ "ok": true }))
}

fn subjects_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    require_course(conn, &course_id)?;
    let subjects = store::list_subjects(conn, &course_id).map_err(db_err("db_query_failed"))?;
    Ok(json!({ "subjects": subjects }))
}

fn subjects_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let name = get_required_str(params, "name")?;
    require_course(conn, &course_id)?;

    let teacher_email = get_optional_str(params, "teacherEmail").map(|e| store::normalize_email(&e));
    if let Some(t) = &teacher_email {
        require_teacher_role(conn, t)?;
    }

    let taken = conn
        .query_row(
            "SELECT 1 FROM subjects WHERE course_id = ? AND name = ?",
            (&course_id, &name),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(db_err("db_query_failed"))?
        .is_some();
    if taken {
        return Err(HandlerErr::new("conflict", "subject name already used in this course")
            .with_details(json!({ "name": name })));
    }

    let subject_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO subjects(id, course_id, name, teacher_email) VALUES(?, ?, ?, ?)",
        (&subject_id, &course_id, &name, &teacher_email),
    )
    .map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string())
            .with_details(json!({ "table": "subjects" }))
    })?;

    Ok(json!({
        "subjectId": subject_id,
        "courseId": course_id,
        "name": name,
        "teacherEmail": teacher_email
    }))
}

/// Reassigns a subject to another teacher. The reassignment, its audit entry
/// and the notifications commit together or not at all.
fn courses_swap_teacher(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let new_teacher = get_required_email(params, "newTeacherEmail")?;
    let actor = get_required_email(params, "actorEmail")?;

    require_admin(conn, &actor)?;
    let subject = require_subject(conn, &subject_id)?;
    require_teacher_role(conn, &new_teacher)?;
    let previous = subject.teacher_email.clone();

    if previous.as_deref() == Some(new_teacher.as_str()) {
        return Ok(json!({
            "subjectId": subject_id,
            "teacherEmail": new_teacher,
            "previousTeacherEmail": previous,
            "changed": false
        }));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    tx.execute(
        "UPDATE subjects SET teacher_email = ? WHERE id = ?",
        (&new_teacher, &subject_id),
    )
    .map_err(db_err("db_update_failed"))?;
    audit::record(
        &tx,
        &actor,
        "subject.teacher_swapped",
        &json!({
            "subjectId": subject_id,
            "courseId": subject.course_id,
            "from": previous,
            "to": new_teacher
        }),
    )
    .map_err(db_err("db_insert_failed"))?;
    audit::notify(
        &tx,
        &new_teacher,
        "teacher_assigned",
        &format!(
            "You are now teaching {} in {}",
            subject.name, subject.course_name
        ),
    )
    .map_err(db_err("db_insert_failed"))?;
    if let Some(prev) = &previous {
        audit::notify(
            &tx,
            prev,
            "teacher_unassigned",
            &format!(
                "You no longer teach {} in {}",
                subject.name, subject.course_name
            ),
        )
        .map_err(db_err("db_insert_failed"))?;
    }
    tx.commit().map_err(db_err("db_commit_failed"))?;

    Ok(json!({
        "subjectId": subject_id,
        "teacherEmail": new_teacher,
        "previousTeacherEmail": previous,
        "changed": true
    }))
}

/// Replaces a course's enrollment set in one transaction.
fn courses_save_roster(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let actor = get_required_email(params, "actorEmail")?;
    let Some(raw_emails) = params.get("studentEmails").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::new("bad_params", "missing studentEmails"));
    };

    require_admin(conn, &actor)?;
    let course_name = require_course(conn, &course_id)?;

    let mut wanted: BTreeSet<String> = BTreeSet::new();
    for v in raw_emails {
        let Some(s) = v.as_str() else {
            return Err(HandlerErr::new("bad_params", "studentEmails must be strings"));
        };
        let email = store::normalize_email(s);
        if email.is_empty() {
            continue;
        }
        let user = require_user(conn, &email)?;
        if user.role() != Some(Role::Student) {
            return Err(HandlerErr::new("bad_params", "only students can be enrolled")
                .with_details(json!({ "email": email, "role": user.role })));
        }
        wanted.insert(email);
    }

    let current: BTreeSet<String> = store::list_enrolled_students(conn, &course_id)
        .map_err(db_err("db_query_failed"))?
        .into_iter()
        .map(|u| u.email)
        .collect();
    let added: Vec<&String> = wanted.difference(&current).collect();
    let removed: Vec<&String> = current.difference(&wanted).collect();

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    for email in &removed {
        tx.execute(
            "DELETE FROM enrollments WHERE course_id = ? AND student_email = ?",
            (&course_id, email),
        )
        .map_err(|e| {
            HandlerErr::new("db_delete_failed", e.to_string())
                .with_details(json!({ "table": "enrollments" }))
        })?;
    }
    for email in &added {
        tx.execute(
            "INSERT INTO enrollments(course_id, student_email) VALUES(?, ?)",
            (&course_id, email),
        )
        .map_err(|e| {
            HandlerErr::new("db_insert_failed", e.to_string())
                .with_details(json!({ "table": "enrollments" }))
        })?;
        audit::notify(
            &tx,
            email,
            "enrolled",
            &format!("You have been enrolled in {}", course_name),
        )
        .map_err(db_err("db_insert_failed"))?;
    }
    audit::record(
        &tx,
        &actor,
        "course.roster_saved",
        &json!({ "courseId": course_id, "added": added, "removed": removed }),
    )
    .map_err(db_err("db_insert_failed"))?;
    tx.commit().map_err(db_err("db_commit_failed"))?;

    Ok(json!({
        "courseId": course_id,
        "studentCount": wanted.len(),
        "added": added,
        "removed": removed
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let op: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr> =
        match req.method.as_str() {
            "courses.list" => courses_list,
            "courses.create" => courses_create,
            "courses.delete" => courses_delete,
            "courses.swapTeacher" => courses_swap_teacher,
            "courses.saveRoster" => courses_save_roster,
            "subjects.list" => subjects_list,
            "subjects.create" => subjects_create,
            _ => return None,
        };
    let result = require_conn(state).and_then(|conn| op(conn, &req.params));
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
