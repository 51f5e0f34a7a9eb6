//! End-to-end runs of call-handling graphs through the public engine API.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use capabilities::builtin::register_builtins;
use capabilities::mock::{MockCapability, RecordingEventSink};
use capabilities::{CapabilityError, CapabilityRegistry};
use engine::{
    ChoiceRule, GraphDefinition, HistoryEventKind, Path, Predicate, RunStatus, StepDefinition,
    WorkflowEngine,
};

const CALL_HANDLER: &str = include_str!("../../../demos/call_handler.json");

fn path(raw: &str) -> Path {
    raw.parse().unwrap()
}

fn route_on(kind: &str, next: &str) -> ChoiceRule {
    ChoiceRule { condition: Predicate::equals(path("$.connection_type"), kind), next: next.into() }
}

fn succeeded_steps(history: &[engine::HistoryEntry]) -> Vec<String> {
    history
        .iter()
        .filter(|e| e.kind == HistoryEventKind::StepSucceeded)
        .filter_map(|e| e.step_name.clone())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn ivr_route_traverses_navigate_then_process() {
    let analyze = Arc::new(MockCapability::returning("analyze", json!({ "connection_type": "ivr" })));
    let registry = CapabilityRegistry::new()
        .with("call.initiate", Arc::new(MockCapability::returning("initiate", json!({ "call_sid": "CA1" }))))
        .with("call.analyze", analyze.clone())
        .with("ivr.navigate", Arc::new(MockCapability::returning("navigate", json!({ "menu": "front_desk" }))));
    let engine = WorkflowEngine::new(registry);

    engine
        .register_graph(GraphDefinition::new(
            "call",
            "Initiate",
            vec![
                StepDefinition::task("Initiate", "call.initiate").then("WaitConnect"),
                StepDefinition::wait_seconds("WaitConnect", 10.0).then("Analyze"),
                StepDefinition::task("Analyze", "call.analyze").then("Route"),
                StepDefinition::choice(
                    "Route",
                    vec![
                        route_on("voicemail", "End"),
                        route_on("ivr", "Navigate"),
                        route_on("human", "Process"),
                    ],
                    "End",
                ),
                StepDefinition::task("Navigate", "ivr.navigate").then("Process"),
                StepDefinition::pass("Process").then("End"),
                StepDefinition::pass("End"),
            ],
        ))
        .unwrap();

    let run_id = engine.start("call", json!({ "hotel_id": "h-42" }), None).unwrap();
    let summary = engine.wait(run_id).await.unwrap();

    assert_eq!(summary.status, RunStatus::Succeeded);
    assert_eq!(summary.current_step, "End");
    assert_eq!(analyze.inputs(), vec![json!({ "hotel_id": "h-42", "call_sid": "CA1" })]);

    let history = engine.history(run_id).await.unwrap();
    let steps = succeeded_steps(&history);
    let from_analyze = steps.iter().position(|s| s == "Analyze").unwrap();
    assert_eq!(
        &steps[from_analyze..],
        ["Analyze", "Route", "Navigate", "Process", "End"]
    );
    assert_eq!(history.last().unwrap().kind, HistoryEventKind::RunSucceeded);
}

// ============================================================
// The bundled call-handler definition
// ============================================================

fn call_handler_engine(analysis: Value, navigate: MockCapability) -> (WorkflowEngine, Arc<RecordingEventSink>) {
    let mut registry = CapabilityRegistry::new();
    register_builtins(&mut registry);
    registry.register(
        "call.initiate",
        Arc::new(MockCapability::returning("initiate", json!({ "Payload": { "call_sid": "CA9" }, "StatusCode": 200 }))),
    );
    registry.register(
        "call.analyze",
        Arc::new(MockCapability::returning("analyze", json!({ "Payload": analysis }))),
    );
    registry.register("ivr.navigate", Arc::new(navigate));

    let sink = Arc::new(RecordingEventSink::default());
    let engine = WorkflowEngine::new(registry).with_event_sink(sink.clone());
    let definition: GraphDefinition = serde_json::from_str(CALL_HANDLER).unwrap();
    engine.register_graph(definition).unwrap();
    (engine, sink)
}

#[tokio::test(start_paused = true)]
async fn long_human_call_handles_overflow_and_publishes_call_ended() {
    let (engine, sink) = call_handler_engine(
        json!({ "connection_type": "human", "call_duration_seconds": 600 }),
        MockCapability::returning("navigate", json!({})),
    );

    let graph = engine.graph("call-handler").unwrap();
    assert_eq!(graph.timeout(), Some(Duration::from_secs(600)));

    let run_id = engine.start("call-handler", json!({ "phone": "+15550100" }), None).unwrap();
    let summary = engine.wait(run_id).await.unwrap();

    assert_eq!(summary.status, RunStatus::Succeeded);
    assert_eq!(summary.data["call_sid"], "CA9");
    assert_eq!(summary.data["overflow_handled"], json!({ "status": "overflow_emailed" }));
    assert_eq!(summary.data["call_ended"], json!({ "event_type": "CallEnded", "published": true }));

    let steps = succeeded_steps(&engine.history(run_id).await.unwrap());
    assert_eq!(
        steps,
        [
            "InitiateCall",
            "WaitForConnection",
            "AnalyzeConnection",
            "RouteByConnectionType",
            "ProcessFolioRequests",
            "CheckCallDuration",
            "HandleOverflow",
            "EndCall",
            "PublishCallEnded",
        ]
    );
    assert!(sink.event_types().contains(&"CallEnded".to_owned()));
}

#[tokio::test(start_paused = true)]
async fn failed_ivr_navigation_is_caught() {
    let (engine, _) = call_handler_engine(
        json!({ "connection_type": "ivr" }),
        MockCapability::failing("navigate", CapabilityError::Failed("menu not recognised".into())),
    );

    let run_id = engine.start("call-handler", json!({}), None).unwrap();
    let summary = engine.wait(run_id).await.unwrap();

    assert_eq!(summary.status, RunStatus::Succeeded);
    assert_eq!(summary.current_step, "IVRNavigationFailed");
    assert_eq!(summary.data["error"]["step"], "NavigateIVR");
    assert_eq!(summary.data["error"]["error"], "capability_error");
    assert_eq!(summary.data["ivr_result"], json!({ "status": "ivr_navigation_failed" }));
}

#[tokio::test(start_paused = true)]
async fn voicemail_goes_straight_to_end_call() {
    let (engine, _) = call_handler_engine(
        json!({ "connection_type": "voicemail" }),
        MockCapability::returning("navigate", json!({})),
    );

    let run_id = engine.start("call-handler", json!({}), None).unwrap();
    let summary = engine.wait(run_id).await.unwrap();

    assert_eq!(summary.status, RunStatus::Succeeded);
    assert_eq!(summary.data["voicemail_result"], json!({ "status": "voicemail_detected" }));
    let steps = succeeded_steps(&engine.history(run_id).await.unwrap());
    assert!(!steps.contains(&"NavigateIVR".to_owned()));
    assert!(steps.ends_with(&["EndCallAfterVoicemail".to_owned(), "EndCall".to_owned(), "PublishCallEnded".to_owned()]));
}

#[tokio::test(start_paused = true)]
async fn overall_deadline_cuts_the_connection_wait() {
    let (engine, _) = call_handler_engine(
        json!({ "connection_type": "human" }),
        MockCapability::returning("navigate", json!({})),
    );

    let run_id = engine
        .start("call-handler", json!({}), Some(Duration::from_secs(4)))
        .unwrap();
    let summary = engine.wait(run_id).await.unwrap();

    assert_eq!(summary.status, RunStatus::TimedOut);
    assert_eq!(summary.current_step, "WaitForConnection");
}
