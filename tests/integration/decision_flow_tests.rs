//! Integration tests for permission and question round-trips.
//!
//! Validates:
//! - deny (with and without a reason) lets the invocation reach `idle`
//! - allow passes the original or replacement input to the engine
//! - unknown and already-used request ids have no observable effect
//! - `AskUserQuestion` becomes a `question` whose answers are merged
//! - several decisions in one turn get distinct, increasing ids

use std::time::Duration;

use serde_json::json;

use agent_bridge::engine::Decision;
use agent_bridge::protocol::{OutboundBody, SessionStatus};

use super::test_helpers::{
    is_decision_request, kinds, permission, permission_turn, request_id, result, start, system,
    test_broker, texts, ScriptedEngine, Step, TestClient,
};

async fn started_with_request(engine: std::sync::Arc<ScriptedEngine>) -> (TestClient, String) {
    let broker = test_broker(engine);
    let mut client = TestClient::connect(&broker);
    client.send(start("s1")).await;
    let msgs = client.recv_until(is_decision_request).await;
    (client, request_id(&msgs))
}

// ── Permission responses ─────────────────────────────────────────────────────

/// Denying without a reason resolves with the default reason and the
/// invocation continues to `result` and `idle`.
#[tokio::test]
async fn deny_lets_invocation_reach_idle() {
    let engine = ScriptedEngine::new(vec![permission_turn()]);
    let (mut client, req) = started_with_request(engine.clone()).await;

    client
        .send(json!({ "type": "permission_response", "sessionId": "s1", "requestId": req, "behavior": "deny" }))
        .await;
    let msgs = client.recv_until_status("s1", SessionStatus::Idle).await;

    assert_eq!(kinds(&msgs), vec!["assistant_text", "result", "session_status"]);
    assert_eq!(
        engine.decisions(),
        vec![Decision::deny("Permission denied by user")]
    );
}

/// A deny reason from the front-end reaches the engine verbatim.
#[tokio::test]
async fn deny_with_message_forwards_reason() {
    let engine = ScriptedEngine::new(vec![permission_turn()]);
    let (mut client, req) = started_with_request(engine.clone()).await;

    client
        .send(json!({
            "type": "permission_response",
            "sessionId": "s1",
            "requestId": req,
            "behavior": "deny",
            "message": "not on main",
        }))
        .await;
    client.recv_until_status("s1", SessionStatus::Idle).await;

    assert_eq!(engine.decisions(), vec![Decision::deny("not on main")]);
}

/// Allow without `updatedInput` hands back the original input unchanged.
#[tokio::test]
async fn allow_without_update_uses_original_input() {
    let engine = ScriptedEngine::new(vec![permission_turn()]);
    let (mut client, req) = started_with_request(engine.clone()).await;

    client
        .send(json!({ "type": "permission_response", "sessionId": "s1", "requestId": req, "behavior": "allow" }))
        .await;
    client.recv_until_status("s1", SessionStatus::Idle).await;

    assert_eq!(
        engine.decisions(),
        vec![Decision::Allow {
            updated_input: json!({ "command": "ls" })
        }]
    );
}

/// Allow with `updatedInput` replaces the input the engine proceeds with.
#[tokio::test]
async fn allow_with_update_replaces_input() {
    let engine = ScriptedEngine::new(vec![permission_turn()]);
    let (mut client, req) = started_with_request(engine.clone()).await;

    client
        .send(json!({
            "type": "permission_response",
            "sessionId": "s1",
            "requestId": req,
            "behavior": "allow",
            "updatedInput": { "command": "ls -la" },
        }))
        .await;
    client.recv_until_status("s1", SessionStatus::Idle).await;

    assert_eq!(
        engine.decisions(),
        vec![Decision::Allow {
            updated_input: json!({ "command": "ls -la" })
        }]
    );
}

// ── Request id discipline ────────────────────────────────────────────────────

/// A response with an unknown request id has no effect: nothing is emitted
/// and the real request stays pending until answered.
#[tokio::test]
async fn unknown_request_id_has_no_effect() {
    let engine = ScriptedEngine::new(vec![permission_turn()]);
    let (mut client, req) = started_with_request(engine.clone()).await;

    client
        .send(json!({ "type": "permission_response", "sessionId": "s1", "requestId": "req-999", "behavior": "allow" }))
        .await;
    client.expect_silence(Duration::from_millis(100)).await;
    assert!(engine.decisions().is_empty());

    client
        .send(json!({ "type": "permission_response", "sessionId": "s1", "requestId": req, "behavior": "deny" }))
        .await;
    client.recv_until_status("s1", SessionStatus::Idle).await;
    assert_eq!(engine.decisions().len(), 1);
}

/// Answering the same request twice resolves it exactly once; the second
/// response is ignored.
#[tokio::test]
async fn duplicate_response_resolves_once() {
    let engine = ScriptedEngine::new(vec![permission_turn()]);
    let (mut client, req) = started_with_request(engine.clone()).await;

    client
        .send(json!({ "type": "permission_response", "sessionId": "s1", "requestId": req, "behavior": "allow" }))
        .await;
    client
        .send(json!({ "type": "permission_response", "sessionId": "s1", "requestId": req, "behavior": "deny" }))
        .await;
    client.recv_until_status("s1", SessionStatus::Idle).await;
    client.expect_silence(Duration::from_millis(100)).await;

    let decisions = engine.decisions();
    assert_eq!(decisions.len(), 1);
    assert!(decisions[0].is_allow(), "first response wins");
}

/// Two sequential decisions in one turn get distinct ids in increasing order.
#[tokio::test]
async fn sequential_decisions_get_fresh_ids() {
    let engine = ScriptedEngine::new(vec![vec![
        Step::Emit(system("conv-1")),
        Step::Decide(permission("Read", json!({ "path": "a" }))),
        Step::Decide(permission("Write", json!({ "path": "b" }))),
        Step::Emit(result()),
    ]]);
    let (mut client, first) = started_with_request(engine.clone()).await;

    client
        .send(json!({ "type": "permission_response", "sessionId": "s1", "requestId": first, "behavior": "allow" }))
        .await;
    let msgs = client.recv_until(is_decision_request).await;
    let second = request_id(&msgs);

    assert_eq!(first, "req-1");
    assert_eq!(second, "req-2");

    client
        .send(json!({ "type": "permission_response", "sessionId": "s1", "requestId": second, "behavior": "deny" }))
        .await;
    client.recv_until_status("s1", SessionStatus::Idle).await;
    assert_eq!(engine.decisions().len(), 2);
}

// ── Questions ────────────────────────────────────────────────────────────────

/// `AskUserQuestion` with a `questions` array is surfaced as a `question`;
/// the answers are merged into the original input and always allowed.
#[tokio::test]
async fn question_answers_are_merged_into_input() {
    let questions = json!([{
        "question": "Which database?",
        "header": "DB",
        "options": [
            { "label": "sqlite", "description": "embedded" },
            { "label": "postgres", "description": "server" },
        ],
        "multiSelect": false,
    }]);
    let engine = ScriptedEngine::new(vec![vec![
        Step::Emit(system("conv-1")),
        Step::Decide(permission("AskUserQuestion", json!({ "questions": questions }))),
        Step::Emit(result()),
    ]]);
    let broker = test_broker(engine.clone());
    let mut client = TestClient::connect(&broker);

    client.send(start("s1")).await;
    let msgs = client.recv_until(is_decision_request).await;
    let question = match msgs.last().map(|m| &m.body) {
        Some(OutboundBody::Question(q)) => q.clone(),
        other => panic!("expected question, got {other:?}"),
    };
    assert_eq!(question.questions.len(), 1);
    assert_eq!(question.questions[0].options[1].label, "postgres");

    client
        .send(json!({
            "type": "question_response",
            "sessionId": "s1",
            "requestId": question.request_id,
            "answers": { "Which database?": "postgres" },
        }))
        .await;
    client.recv_until_status("s1", SessionStatus::Idle).await;

    assert_eq!(
        engine.decisions(),
        vec![Decision::Allow {
            updated_input: json!({
                "questions": questions,
                "answers": { "Which database?": "postgres" },
            })
        }]
    );
}

/// `AskUserQuestion` without a readable `questions` array falls back to a
/// plain `permission_request`.
#[tokio::test]
async fn unreadable_question_falls_back_to_permission_request() {
    let engine = ScriptedEngine::new(vec![vec![
        Step::Emit(system("conv-1")),
        Step::Decide(permission("AskUserQuestion", json!({ "questions": "free text" }))),
        Step::Emit(result()),
    ]]);
    let broker = test_broker(engine);
    let mut client = TestClient::connect(&broker);

    client.send(start("s1")).await;
    let msgs = client.recv_until(is_decision_request).await;

    assert!(matches!(
        msgs.last().map(|m| &m.body),
        Some(OutboundBody::PermissionRequest(req)) if req.tool_name == "AskUserQuestion"
    ));
}

/// The decision outcome is visible to the engine, which reports it back.
#[tokio::test]
async fn engine_observes_decision_outcome() {
    let engine = ScriptedEngine::new(vec![permission_turn()]);
    let (mut client, req) = started_with_request(engine).await;

    client
        .send(json!({ "type": "permission_response", "sessionId": "s1", "requestId": req, "behavior": "deny", "message": "no" }))
        .await;
    let msgs = client.recv_until_status("s1", SessionStatus::Idle).await;

    assert_eq!(texts(&msgs), vec!["decision: deny no".to_owned()]);
}
