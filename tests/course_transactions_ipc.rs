use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value.get("error").cloned().expect("error object")
}

fn error_code(error: &serde_json::Value) -> &str {
    error.get("code").and_then(|v| v.as_str()).unwrap_or("")
}

fn seed(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, prefix: &str) -> (String, String) {
    let workspace = temp_dir(prefix);
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    for (id, email, name, role) in [
        ("u1", "admin@school.test", "Admin", "admin"),
        ("u2", "old@school.test", "Old Teacher", "teacher"),
        ("u3", "new@school.test", "New Teacher", "teacher"),
        ("u4", "ana@school.test", "Ana", "student"),
        ("u5", "ben@school.test", "Ben", "student"),
        ("u6", "cy@school.test", "Cy", "student"),
    ] {
        let _ = request_ok(
            stdin,
            reader,
            id,
            "users.create",
            json!({ "email": email, "displayName": name, "role": role }),
        );
    }
    let course_id = request_ok(stdin, reader, "c1", "courses.create", json!({ "name": "Grade 9" }))
        ["courseId"]
        .as_str()
        .expect("courseId")
        .to_string();
    let subject_id = request_ok(
        stdin,
        reader,
        "s1",
        "subjects.create",
        json!({ "courseId": course_id, "name": "History", "teacherEmail": "old@school.test" }),
    )["subjectId"]
        .as_str()
        .expect("subjectId")
        .to_string();
    (course_id, subject_id)
}

fn notification_kinds(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    email: &str,
) -> Vec<String> {
    request_ok(stdin, reader, id, "notifications.list", json!({ "email": email }))["notifications"]
        .as_array()
        .expect("notifications")
        .iter()
        .filter_map(|n| n["kind"].as_str().map(str::to_string))
        .collect()
}

/// Audit actions, newest first.
fn audit_actions(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, id: &str) -> Vec<String> {
    request_ok(stdin, reader, id, "audit.list", json!({}))["entries"]
        .as_array()
        .expect("entries")
        .iter()
        .filter_map(|e| e["action"].as_str().map(str::to_string))
        .collect()
}

#[test]
fn swap_teacher_commits_assignment_audit_and_notifications_together() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (course_id, subject_id) = seed(&mut stdin, &mut reader, "gradebook-swap");

    let denied = request_err(
        &mut stdin,
        &mut reader,
        "x1",
        "courses.swapTeacher",
        json!({
            "subjectId": subject_id,
            "newTeacherEmail": "new@school.test",
            "actorEmail": "old@school.test"
        }),
    );
    assert_eq!(error_code(&denied), "forbidden");

    let not_teacher = request_err(
        &mut stdin,
        &mut reader,
        "x2",
        "courses.swapTeacher",
        json!({
            "subjectId": subject_id,
            "newTeacherEmail": "ana@school.test",
            "actorEmail": "admin@school.test"
        }),
    );
    assert_eq!(error_code(&not_teacher), "bad_params");

    // Nothing changed after the rejected attempts.
    let subjects = request_ok(
        &mut stdin,
        &mut reader,
        "l0",
        "subjects.list",
        json!({ "courseId": course_id }),
    );
    assert_eq!(
        subjects["subjects"][0]["teacherEmail"].as_str(),
        Some("old@school.test")
    );
    assert!(notification_kinds(&mut stdin, &mut reader, "n0", "new@school.test").is_empty());

    let swapped = request_ok(
        &mut stdin,
        &mut reader,
        "sw",
        "courses.swapTeacher",
        json!({
            "subjectId": subject_id,
            "newTeacherEmail": "NEW@school.test",
            "actorEmail": "admin@school.test"
        }),
    );
    assert_eq!(swapped["changed"].as_bool(), Some(true));
    assert_eq!(swapped["previousTeacherEmail"].as_str(), Some("old@school.test"));

    assert_eq!(
        notification_kinds(&mut stdin, &mut reader, "n1", "new@school.test"),
        vec!["teacher_assigned".to_string()]
    );
    assert_eq!(
        notification_kinds(&mut stdin, &mut reader, "n2", "old@school.test"),
        vec!["teacher_unassigned".to_string()]
    );

    let audit = request_ok(&mut stdin, &mut reader, "au", "audit.list", json!({ "limit": 1 }));
    let entry = &audit["entries"][0];
    assert_eq!(entry["action"].as_str(), Some("subject.teacher_swapped"));
    assert_eq!(entry["actor"].as_str(), Some("admin@school.test"));
    assert_eq!(entry["details"]["to"].as_str(), Some("new@school.test"));

    // Same teacher again is a no-op.
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "sw2",
        "courses.swapTeacher",
        json!({
            "subjectId": subject_id,
            "newTeacherEmail": "new@school.test",
            "actorEmail": "admin@school.test"
        }),
    );
    assert_eq!(again["changed"].as_bool(), Some(false));
    assert_eq!(
        notification_kinds(&mut stdin, &mut reader, "n3", "new@school.test").len(),
        1
    );

    // The previous teacher lost edit rights, the new one gained them.
    let denied = request_err(
        &mut stdin,
        &mut reader,
        "a1",
        "activities.create",
        json!({ "subjectId": subject_id, "name": "Essay", "weight": 40, "actorEmail": "old@school.test" }),
    );
    assert_eq!(error_code(&denied), "forbidden");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "a2",
        "activities.create",
        json!({ "subjectId": subject_id, "name": "Essay", "weight": 40, "actorEmail": "new@school.test" }),
    );

    let unread = request_ok(
        &mut stdin,
        &mut reader,
        "n4",
        "notifications.list",
        json!({ "email": "new@school.test", "unreadOnly": true }),
    );
    let note_id = unread["notifications"][0]["id"]
        .as_str()
        .expect("notification id")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "mr",
        "notifications.markRead",
        json!({ "notificationId": note_id }),
    );
    let unread = request_ok(
        &mut stdin,
        &mut reader,
        "n5",
        "notifications.list",
        json!({ "email": "new@school.test", "unreadOnly": true }),
    );
    assert_eq!(unread["notifications"].as_array().map(|a| a.len()), Some(0));
    let missing = request_err(
        &mut stdin,
        &mut reader,
        "mr2",
        "notifications.markRead",
        json!({ "notificationId": "does-not-exist" }),
    );
    assert_eq!(error_code(&missing), "not_found");
}

#[test]
fn save_roster_replaces_enrollment_and_reports_the_diff() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (course_id, subject_id) = seed(&mut stdin, &mut reader, "gradebook-roster-save");

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "r1",
        "courses.saveRoster",
        json!({
            "courseId": course_id,
            "studentEmails": ["ana@school.test", "ben@school.test"],
            "actorEmail": "admin@school.test"
        }),
    );
    assert_eq!(first["studentCount"].as_u64(), Some(2));
    assert_eq!(first["added"].as_array().map(|a| a.len()), Some(2));

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "r2",
        "courses.saveRoster",
        json!({
            "courseId": course_id,
            "studentEmails": ["ben@school.test", "cy@school.test", " CY@school.test "],
            "actorEmail": "admin@school.test"
        }),
    );
    assert_eq!(second["studentCount"].as_u64(), Some(2));
    assert_eq!(second["added"], json!(["cy@school.test"]));
    assert_eq!(second["removed"], json!(["ana@school.test"]));
    assert_eq!(
        notification_kinds(&mut stdin, &mut reader, "n1", "cy@school.test"),
        vec!["enrolled".to_string()]
    );

    let rejected = request_err(
        &mut stdin,
        &mut reader,
        "r3",
        "courses.saveRoster",
        json!({
            "courseId": course_id,
            "studentEmails": ["ben@school.test", "new@school.test"],
            "actorEmail": "admin@school.test"
        }),
    );
    assert_eq!(error_code(&rejected), "bad_params");
    let rejected = request_err(
        &mut stdin,
        &mut reader,
        "r4",
        "courses.saveRoster",
        json!({
            "courseId": course_id,
            "studentEmails": [],
            "actorEmail": "old@school.test"
        }),
    );
    assert_eq!(error_code(&rejected), "forbidden");

    // Ana is no longer enrolled, so her grades cannot be written.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "a1",
        "activities.create",
        json!({ "subjectId": subject_id, "name": "Essay", "weight": 40, "actorEmail": "old@school.test" }),
    );
    let not_enrolled = request_err(
        &mut stdin,
        &mut reader,
        "g1",
        "grades.set",
        json!({
            "studentEmail": "ana@school.test",
            "subjectId": subject_id,
            "activityName": "Essay",
            "value": 75,
            "actorEmail": "old@school.test"
        }),
    );
    assert_eq!(error_code(&not_enrolled), "bad_params");

    let courses = request_ok(&mut stdin, &mut reader, "cl", "courses.list", json!({}));
    assert_eq!(courses["courses"][0]["studentCount"].as_i64(), Some(2));
    assert_eq!(courses["courses"][0]["subjectCount"].as_i64(), Some(1));
}

#[test]
fn deletes_refuse_to_orphan_subjects_and_cascade_otherwise() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (course_id, subject_id) = seed(&mut stdin, &mut reader, "gradebook-deletes");

    let conflict = request_err(
        &mut stdin,
        &mut reader,
        "d1",
        "users.delete",
        json!({ "email": "old@school.test", "actorEmail": "admin@school.test" }),
    );
    assert_eq!(error_code(&conflict), "conflict");
    let conflict = request_err(
        &mut stdin,
        &mut reader,
        "d2",
        "users.update",
        json!({ "email": "old@school.test", "role": "student" }),
    );
    assert_eq!(error_code(&conflict), "conflict");
    let duplicate = request_err(
        &mut stdin,
        &mut reader,
        "d3",
        "users.create",
        json!({ "email": "Ana@school.test", "displayName": "Ana again", "role": "student" }),
    );
    assert_eq!(error_code(&duplicate), "conflict");
    let duplicate = request_err(
        &mut stdin,
        &mut reader,
        "d4",
        "subjects.create",
        json!({ "courseId": course_id, "name": "History" }),
    );
    assert_eq!(error_code(&duplicate), "conflict");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "r1",
        "courses.saveRoster",
        json!({
            "courseId": course_id,
            "studentEmails": ["ana@school.test"],
            "actorEmail": "admin@school.test"
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "a1",
        "activities.create",
        json!({ "subjectId": subject_id, "name": "Essay", "weight": 100, "actorEmail": "old@school.test" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "g1",
        "grades.set",
        json!({
            "studentEmail": "ana@school.test",
            "subjectId": subject_id,
            "activityName": "Essay",
            "value": 75,
            "actorEmail": "old@school.test"
        }),
    );

    let denied = request_err(
        &mut stdin,
        &mut reader,
        "d5x",
        "users.delete",
        json!({ "email": "ana@school.test", "actorEmail": "old@school.test" }),
    );
    assert_eq!(error_code(&denied), "forbidden");
    let before = audit_actions(&mut stdin, &mut reader, "au0");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "d5",
        "users.delete",
        json!({ "email": "ana@school.test", "actorEmail": "admin@school.test" }),
    );
    let after = audit_actions(&mut stdin, &mut reader, "au1");
    assert_eq!(after.len(), before.len() + 1);
    assert_eq!(after[0], "user.deleted");
    let gone = request_err(
        &mut stdin,
        &mut reader,
        "d6",
        "users.get",
        json!({ "email": "ana@school.test" }),
    );
    assert_eq!(error_code(&gone), "not_found");
    let gb = request_ok(
        &mut stdin,
        &mut reader,
        "gb",
        "gradebook.subject",
        json!({ "subjectId": subject_id, "period": "p1" }),
    );
    assert_eq!(gb["students"].as_array().map(|a| a.len()), Some(0));

    let denied = request_err(
        &mut stdin,
        &mut reader,
        "d7x",
        "courses.delete",
        json!({ "courseId": course_id, "actorEmail": "old@school.test" }),
    );
    assert_eq!(error_code(&denied), "forbidden");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "d7",
        "courses.delete",
        json!({ "courseId": course_id, "actorEmail": "admin@school.test" }),
    );
    let audit = request_ok(&mut stdin, &mut reader, "au2", "audit.list", json!({ "limit": 1 }));
    let entry = &audit["entries"][0];
    assert_eq!(entry["action"].as_str(), Some("course.deleted"));
    assert_eq!(entry["actor"].as_str(), Some("admin@school.test"));
    assert_eq!(entry["details"]["courseId"].as_str(), Some(course_id.as_str()));
    let courses = request_ok(&mut stdin, &mut reader, "cl", "courses.list", json!({}));
    assert_eq!(courses["courses"].as_array().map(|a| a.len()), Some(0));

    // With the subject gone the teacher can be removed.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "d8",
        "users.delete",
        json!({ "email": "old@school.test", "actorEmail": "admin@school.test" }),
    );
}
