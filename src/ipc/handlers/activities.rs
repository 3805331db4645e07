use crate::audit;
use crate::calc::{self, Period, PERIOD_WEIGHT_BUDGET};
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    db_err, get_optional_str, get_required_email, get_required_str, parse_new_weight,
    parse_period, require_conn, require_subject, require_subject_editor, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, ActivityRow};
use log::{info, warn};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn load_activity(conn: &Connection, activity_id: &str) -> Result<ActivityRow, HandlerErr> {
    let subject_id: Option<String> = conn
        .query_row(
            "SELECT subject_id FROM activities WHERE id = ?",
            [activity_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err("db_query_failed"))?;
    let Some(subject_id) = subject_id else {
        return Err(HandlerErr::new("not_found", "activity not found"));
    };
    store::load_activities(conn, &subject_id)
        .map_err(db_err("db_query_failed"))?
        .into_iter()
        .find(|a| a.id == activity_id)
        .ok_or_else(|| {
            HandlerErr::new("not_found", "activity has an unknown period tag")
                .with_details(json!({ "activityId": activity_id }))
        })
}

fn activities_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    require_subject(conn, &subject_id)?;
    let period = get_optional_str(params, "period")
        .map(|p| parse_period(&p))
        .transpose()?;

    let activities: Vec<ActivityRow> = store::load_activities(conn, &subject_id)
        .map_err(db_err("db_query_failed"))?
        .into_iter()
        .filter(|a| period.map_or(true, |p| a.def.period == p))
        .collect();
    Ok(json!({ "activities": activities }))
}

fn activities_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let name = get_required_str(params, "name")?;
    let actor = get_required_email(params, "actorEmail")?;
    let weight = parse_new_weight(params.get("weight"))?;
    let period = match get_optional_str(params, "period") {
        Some(p) => parse_period(&p)?,
        None => Period::default(),
    };

    let subject = require_subject(conn, &subject_id)?;
    require_subject_editor(conn, &actor, &subject)?;

    let existing = store::load_activities(conn, &subject_id).map_err(db_err("db_query_failed"))?;
    let in_period = calc::filter_period(&store::activity_defs(&existing), period);
    if let Err(over) = calc::check_activity_budget(&in_period, weight) {
        return Err(HandlerErr::new(
            "budget_exceeded",
            format!(
                "period {} already sums to {}; adding {} would exceed {}",
                period.as_str(),
                over.current_sum,
                over.attempted_weight,
                PERIOD_WEIGHT_BUDGET
            ),
        )
        .with_details(json!({
            "currentSum": over.current_sum,
            "attemptedWeight": over.attempted_weight,
            "limit": PERIOD_WEIGHT_BUDGET,
            "period": period
        })));
    }

    let next_sort: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM activities WHERE subject_id = ?",
            [&subject_id],
            |r| r.get(0),
        )
        .map_err(db_err("db_query_failed"))?;

    let activity_id = Uuid::new_v4().to_string();
    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    tx.execute(
        "INSERT INTO activities(id, subject_id, name, weight, period, sort_order)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &activity_id,
            &subject_id,
            &name,
            weight,
            period.as_str(),
            next_sort,
        ),
    )
    .map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string())
            .with_details(json!({ "table": "activities" }))
    })?;
    audit::record(
        &tx,
        &actor,
        "activity.created",
        &json!({
            "activityId": activity_id,
            "subjectId": subject_id,
            "name": name,
            "weight": weight,
            "period": period
        }),
    )
    .map_err(db_err("db_insert_failed"))?;
    tx.commit().map_err(db_err("db_commit_failed"))?;

    Ok(json!({
        "activityId": activity_id,
        "periodWeightSum": calc::period_weight_sum(&in_period) + weight
    }))
}

/// Edits are not checked against the period budget, and a rename leaves
/// grades recorded under the old name behind.
fn activities_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let activity_id = get_required_str(params, "activityId")?;
    let actor = get_required_email(params, "actorEmail")?;

    let mut activity = load_activity(conn, &activity_id)?;
    let subject = require_subject(conn, &activity.subject_id)?;
    require_subject_editor(conn, &actor, &subject)?;

    let previous_name = activity.def.name.clone();
    if let Some(name) = get_optional_str(params, "name") {
        activity.def.name = name;
    }
    if params.get("weight").is_some() {
        activity.def.weight = parse_new_weight(params.get("weight"))?;
    }
    if let Some(p) = get_optional_str(params, "period") {
        activity.def.period = parse_period(&p)?;
    }

    // Edits are not rejected over the budget; the caller is told instead.
    let siblings: Vec<_> = store::load_activities(conn, &activity.subject_id)
        .map_err(db_err("db_query_failed"))?
        .into_iter()
        .filter(|a| a.id != activity_id)
        .collect();
    let others = calc::filter_period(&store::activity_defs(&siblings), activity.def.period);
    let within_budget = calc::can_add_activity(&others, activity.def.weight);
    if !within_budget {
        warn!(
            "event=activity_budget_overshoot activity_id={} period={} period_sum={}",
            activity_id,
            activity.def.period.as_str(),
            calc::period_weight_sum(&others) + activity.def.weight
        );
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    tx.execute(
        "UPDATE activities SET name = ?, weight = ?, period = ? WHERE id = ?",
        (
            &activity.def.name,
            activity.def.weight,
            activity.def.period.as_str(),
            &activity_id,
        ),
    )
    .map_err(db_err("db_update_failed"))?;
    audit::record(
        &tx,
        &actor,
        "activity.updated",
        &json!({
            "activityId": activity_id,
            "subjectId": activity.subject_id,
            "previousName": previous_name,
            "name": activity.def.name,
            "weight": activity.def.weight,
            "period": activity.def.period
        }),
    )
    .map_err(db_err("db_insert_failed"))?;
    tx.commit().map_err(db_err("db_commit_failed"))?;

    if previous_name != activity.def.name {
        info!(
            "event=activity_renamed activity_id={} orphaned_grades_under={:?}",
            activity_id, previous_name
        );
    }

    Ok(json!({ "activity": activity, "withinBudget": within_budget }))
}

fn activities_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let activity_id = get_required_str(params, "activityId")?;
    let actor = get_required_email(params, "actorEmail")?;

    let activity = load_activity(conn, &activity_id)?;
    let subject = require_subject(conn, &activity.subject_id)?;
    require_subject_editor(conn, &actor, &subject)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    tx.execute("DELETE FROM activities WHERE id = ?", [&activity_id])
        .map_err(|e| {
            HandlerErr::new("db_delete_failed", e.to_string())
                .with_details(json!({ "table": "activities" }))
        })?;
    audit::record(
        &tx,
        &actor,
        "activity.deleted",
        &json!({
            "activityId": activity_id,
            "subjectId": activity.subject_id,
            "name": activity.def.name
        }),
    )
    .map_err(db_err("db_insert_failed"))?;
    tx.commit().map_err(db_err("db_commit_failed"))?;

    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let op: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr> =
        match req.method.as_str() {
            "activities.list" => activities_list,
            "activities.create" => activities_create,
            "activities.update" => activities_update,
            "activities.delete" => activities_delete,
            _ => return None,
        };
    let result = require_conn(state).and_then(|conn| op(conn, &req.params));
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
