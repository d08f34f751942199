//! API route handlers for the gateway.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
};
use docket_core::DocketError;
use docket_scheduler::{NewNode, NodeUpdate, RuleInput, TaskFilter};
use serde::{Deserialize, Serialize};

use crate::error::ApiResult;
use crate::server::AppState;

/// `{"ok": true}` merged with the fields of `payload`.
fn ok_with(payload: impl Serialize) -> ApiResult {
    let mut body = serde_json::to_value(payload).map_err(DocketError::from)?;
    match body.as_object_mut() {
        Some(map) => {
            map.insert("ok".into(), serde_json::Value::Bool(true));
            Ok(Json(body))
        }
        None => Ok(Json(serde_json::json!({"ok": true, "data": body}))),
    }
}

/// Health check endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "docket-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "scheduler_running": state.scheduler.is_running(),
    }))
}

// ─── Process nodes ────────────────────────────────────────────

pub async fn list_case_nodes(
    State(state): State<Arc<AppState>>,
    Path(case_id): Path<i64>,
) -> ApiResult {
    let nodes = state.lifecycle.list_case_nodes(case_id)?;
    Ok(Json(serde_json::json!({"ok": true, "caseId": case_id, "nodes": nodes})))
}

pub async fn add_node(
    State(state): State<Arc<AppState>>,
    Path(case_id): Path<i64>,
    Json(body): Json<NewNode>,
) -> ApiResult {
    let node = state.lifecycle.add_node(case_id, &body)?;
    Ok(Json(serde_json::json!({"ok": true, "node": node})))
}

/// Partial update: progress, completion, dates, handler, order.
pub async fn update_node(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<NodeUpdate>,
) -> ApiResult {
    let node = state.lifecycle.update_node(id, &body)?;
    Ok(Json(serde_json::json!({"ok": true, "node": node})))
}

pub async fn delete_node(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> ApiResult {
    state.lifecycle.delete_node(id)?;
    Ok(Json(serde_json::json!({"ok": true, "message": format!("Node {id} deleted")})))
}

/// `{node, calculatedStatus, overdueInfo}`
pub async fn node_detail(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> ApiResult {
    ok_with(state.lifecycle.node_detail(id)?)
}

pub async fn recalculate_node(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult {
    let node = state.lifecycle.recalculate_one(id)?;
    Ok(Json(serde_json::json!({"ok": true, "node": node})))
}

pub async fn recalculate_case(
    State(state): State<Arc<AppState>>,
    Path(case_id): Path<i64>,
) -> ApiResult {
    ok_with(state.lifecycle.recalculate_case(case_id)?)
}

/// `{updated: <count>}`
pub async fn update_all_statuses(State(state): State<Arc<AppState>>) -> ApiResult {
    ok_with(state.lifecycle.recalculate_all()?)
}

/// `{total, affectedCases, nodes}`
pub async fn overdue_statistics(State(state): State<Arc<AppState>>) -> ApiResult {
    ok_with(state.lifecycle.overdue_statistics()?)
}

#[derive(Debug, Deserialize)]
pub struct UpcomingQuery {
    pub days: Option<u32>,
}

/// `{nodes, threshold}`
pub async fn upcoming_nodes(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UpcomingQuery>,
) -> ApiResult {
    let days = query.days.unwrap_or(state.config.lifecycle.upcoming_days_default);
    ok_with(state.lifecycle.upcoming_nodes(days)?)
}

// ─── Notification rules ───────────────────────────────────────

pub async fn list_rules(State(state): State<Arc<AppState>>) -> ApiResult {
    let rules = state.db.list_rules()?;
    Ok(Json(serde_json::json!({"ok": true, "rules": rules})))
}

pub async fn create_rule(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RuleInput>,
) -> ApiResult {
    let draft = body.validate()?;
    let rule = state.db.insert_rule(&draft, state.lifecycle.now())?;
    tracing::info!("📏 Rule created: '{}' ({})", rule.name, rule.id);
    Ok(Json(serde_json::json!({"ok": true, "rule": rule})))
}

pub async fn get_rule(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> ApiResult {
    let rule = state.db.get_rule(id)?.ok_or(DocketError::not_found("rule", id))?;
    Ok(Json(serde_json::json!({"ok": true, "rule": rule})))
}

/// Fields absent from the body keep their stored values.
pub async fn update_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<RuleInput>,
) -> ApiResult {
    let existing = state.db.get_rule(id)?.ok_or(DocketError::not_found("rule", id))?;
    let draft = body.merged_onto(&existing)?;
    let rule = state
        .db
        .update_rule(id, &draft, state.lifecycle.now())?
        .ok_or(DocketError::not_found("rule", id))?;
    Ok(Json(serde_json::json!({"ok": true, "rule": rule})))
}

pub async fn delete_rule(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> ApiResult {
    if !state.db.delete_rule(id)? {
        return Err(DocketError::not_found("rule", id).into());
    }
    Ok(Json(serde_json::json!({"ok": true, "message": format!("Rule {id} deleted")})))
}

/// Flip `is_enabled`. Disabled rules are kept, just skipped by the scheduler.
pub async fn toggle_rule(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> ApiResult {
    let rule = state.db.get_rule(id)?.ok_or(DocketError::not_found("rule", id))?;
    let enabled = !rule.is_enabled;
    if enabled && rule.recipients.is_empty() {
        return Err(DocketError::validation("an enabled rule needs at least one recipient").into());
    }
    state.db.set_rule_enabled(id, enabled, state.lifecycle.now())?;
    Ok(Json(serde_json::json!({"ok": true, "id": id, "is_enabled": enabled})))
}

// ─── Notification tasks ───────────────────────────────────────

pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<TaskFilter>,
) -> ApiResult {
    let tasks = state.queue.list(&filter)?;
    Ok(Json(serde_json::json!({"ok": true, "count": tasks.len(), "notifications": tasks})))
}

pub async fn unread_count(State(state): State<Arc<AppState>>) -> ApiResult {
    let count = state.queue.unread_count()?;
    Ok(Json(serde_json::json!({"ok": true, "count": count})))
}

/// Idempotent: marking an already-read task returns it unchanged.
pub async fn mark_read(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> ApiResult {
    let task = state.queue.mark_read(id)?;
    Ok(Json(serde_json::json!({"ok": true, "notification": task})))
}

pub async fn delete_notification(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult {
    state.queue.delete(id)?;
    Ok(Json(serde_json::json!({"ok": true, "message": format!("Notification {id} deleted")})))
}

/// Deliver now. Channel failures are reported in the body, not as an HTTP error.
pub async fn send_notification(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult {
    ok_with(state.queue.send(id).await?)
}

pub async fn send_history(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> ApiResult {
    let history = state.queue.send_history(id)?;
    Ok(Json(serde_json::json!({"ok": true, "history": history})))
}

/// Out-of-band tick. Shares the scheduler's guard, so it reports
/// `skipped` while a scheduled tick is running.
pub async fn trigger_check(State(state): State<Arc<AppState>>) -> ApiResult {
    ok_with(state.scheduler.tick().await)
}

pub async fn purge_orphans(State(state): State<Arc<AppState>>) -> ApiResult {
    let removed = state.queue.purge_orphans()?;
    Ok(Json(serde_json::json!({"ok": true, "removed": removed})))
}

pub async fn scheduler_status(State(state): State<Arc<AppState>>) -> ApiResult {
    ok_with(state.scheduler.status())
}
