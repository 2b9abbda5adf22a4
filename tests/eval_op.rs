#![allow(clippy::unwrap_used, reason = "test assertions")]
#![allow(clippy::expect_used, reason = "test assertions")]
#![allow(clippy::indexing_slicing, reason = "test code with known bounds")]

//! End-to-end tests for the `eval` operation: engine submission, result
//! streaming, failure translation, and transaction coordination.

use std::{sync::Arc, time::Duration};

use banyan::{
    channel::ResponseChannel,
    context::OpContext,
    engine::{EngineError, ScriptEngine},
    graph::GraphManager,
    message::{
        ARG_ALIASES, ARG_BATCH_SIZE, ARG_BINDINGS, ARG_EVAL_TIMEOUT, ARG_LANGUAGE,
        RequestMessage, ResponseMessage, ResponseStatusCode,
    },
    op::{OpHandler, OpProcessor, OpSelectionError, eval::EvalHandler},
    settings::Settings,
    testkit::{
        FlakySerializer, RecordingChannel, RecordingGraphManager, StubEngine, eval_request,
        frame_summary,
    },
};
use serde_json::{Value, json};

fn context_with(
    channel: &Arc<RecordingChannel>,
    graphs: &Arc<RecordingGraphManager>,
    request: RequestMessage,
    settings: Settings,
) -> OpContext {
    OpContext::new(
        Arc::clone(channel) as Arc<dyn ResponseChannel>,
        request,
        Arc::new(settings),
        Arc::clone(graphs) as Arc<dyn GraphManager>,
    )
}

/// Exactly one terminal status per request, with partials only before it.
fn assert_single_terminal(responses: &[ResponseMessage]) {
    let terminal_count = responses
        .iter()
        .filter(|r| r.status.code.is_terminal())
        .count();
    assert_eq!(terminal_count, 1, "expected exactly one terminal response");
    assert!(
        responses
            .last()
            .is_some_and(|r| r.status.code.is_terminal()),
        "terminal response must come last"
    );
}

#[tokio::test]
async fn eval_streams_batched_results_and_commits_once() {
    let engine = Arc::new(StubEngine::returning(json!([1, 2, 3, 4, 5])));
    let handler = EvalHandler::new(Arc::clone(&engine) as Arc<dyn ScriptEngine>).manage_transactions(true);
    let channel = Arc::new(RecordingChannel::new());
    let graphs = Arc::new(RecordingGraphManager::new(&["g"]));
    graphs.observe_channel(Arc::clone(&channel));
    let request = eval_request("g.V().values('age')").with_arg(ARG_BATCH_SIZE, json!(2));
    let ctx = context_with(&channel, &graphs, request, Settings::default());

    handler.execute(&ctx).await.unwrap();

    assert_eq!(
        frame_summary(&channel),
        vec![
            (206, vec![json!(1), json!(2)]),
            (206, vec![json!(3), json!(4)]),
            (200, vec![json!(5)]),
        ]
    );
    assert_single_terminal(&channel.responses());
    assert_eq!(graphs.commits().len(), 1);
    assert!(graphs.rollbacks().is_empty());
}

#[tokio::test]
async fn scalar_result_becomes_a_single_element_batch() {
    let engine = Arc::new(StubEngine::returning(json!(6)));
    let handler = EvalHandler::new(engine);
    let channel = Arc::new(RecordingChannel::new());
    let graphs = Arc::new(RecordingGraphManager::new(&["g"]));
    let ctx = context_with(
        &channel,
        &graphs,
        eval_request("g.V().count()"),
        Settings::default(),
    );

    handler.execute(&ctx).await.unwrap();

    assert_eq!(frame_summary(&channel), vec![(200, vec![json!(6)])]);
}

#[tokio::test]
async fn null_result_yields_no_content() {
    let engine = Arc::new(StubEngine::returning(Value::Null));
    let handler = EvalHandler::new(engine).manage_transactions(true);
    let channel = Arc::new(RecordingChannel::new());
    let graphs = Arc::new(RecordingGraphManager::new(&["g"]));
    let ctx = context_with(
        &channel,
        &graphs,
        eval_request("g.V().iterate()"),
        Settings::default(),
    );

    handler.execute(&ctx).await.unwrap();

    assert_eq!(frame_summary(&channel), vec![(204, Vec::new())]);
    assert_eq!(graphs.commits().len(), 1);
}

#[tokio::test]
async fn script_failure_reports_evaluation_error_and_rolls_back() {
    let engine = Arc::new(StubEngine::failing(EngineError::Evaluation(
        "division by zero near line 1".to_owned(),
    )));
    let handler = EvalHandler::new(engine).manage_transactions(true);
    let channel = Arc::new(RecordingChannel::new());
    let graphs = Arc::new(RecordingGraphManager::new(&["g"]));
    let ctx = context_with(
        &channel,
        &graphs,
        eval_request("1/0"),
        Settings::default(),
    );

    handler.execute(&ctx).await.unwrap();

    let responses = channel.responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(
        responses[0].status.code,
        ResponseStatusCode::ServerErrorScriptEvaluation
    );
    assert_eq!(
        responses[0].status.message.as_deref(),
        Some("division by zero near line 1")
    );
    assert!(responses[0].result.data.is_empty());
    assert_eq!(graphs.rollbacks().len(), 1);
    assert!(graphs.commits().is_empty());
}

#[tokio::test]
async fn engine_timeout_reports_evaluation_deadline() {
    let engine = Arc::new(StubEngine::failing(EngineError::Timeout(
        Duration::from_millis(500),
    )));
    let handler = EvalHandler::new(engine).manage_transactions(true);
    let channel = Arc::new(RecordingChannel::new());
    let graphs = Arc::new(RecordingGraphManager::new(&["g"]));
    let ctx = context_with(
        &channel,
        &graphs,
        eval_request("while(true) {}"),
        Settings::default(),
    );

    handler.execute(&ctx).await.unwrap();

    let responses = channel.responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(
        responses[0].status.code,
        ResponseStatusCode::ServerErrorTimeout
    );
    let message = responses[0].status.message.as_deref().unwrap();
    assert!(message.starts_with("Response evaluation exceeded"));
    assert!(message.contains("500 ms"));
    assert_eq!(graphs.rollbacks().len(), 1);
}

#[tokio::test]
async fn streaming_timeout_reports_serialization_deadline() {
    let engine = Arc::new(StubEngine::returning(json!(
        (0..100).collect::<Vec<_>>()
    )));
    let handler = EvalHandler::new(engine).manage_transactions(true);
    let channel = Arc::new(RecordingChannel::new());
    channel.set_writable(false);
    let graphs = Arc::new(RecordingGraphManager::new(&["g"]));
    let settings = Settings {
        serialized_response_timeout: 50,
        ..Settings::default()
    };
    let ctx = context_with(&channel, &graphs, eval_request("g.E()"), settings);

    handler.execute(&ctx).await.unwrap();

    channel.set_writable(true);
    let responses = channel.responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(
        responses[0].status.code,
        ResponseStatusCode::ServerErrorTimeout
    );
    assert!(
        responses[0]
            .status
            .message
            .as_deref()
            .unwrap()
            .starts_with("Serialization of the entire response exceeded")
    );
    assert_eq!(graphs.rollbacks().len(), 1);
    assert!(graphs.commits().is_empty());
    assert_single_terminal(&responses);
}

#[tokio::test]
async fn cancellation_reports_server_error_and_rolls_back() {
    let engine = Arc::new(StubEngine::returning(json!([1, 2, 3])));
    let handler = EvalHandler::new(engine).manage_transactions(true);
    let channel = Arc::new(RecordingChannel::new());
    let graphs = Arc::new(RecordingGraphManager::new(&["g"]));
    let ctx = context_with(&channel, &graphs, eval_request("g.V()"), Settings::default());
    ctx.cancellation().cancel();

    handler.execute(&ctx).await.unwrap();

    let responses = channel.responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].status.code, ResponseStatusCode::ServerError);
    assert!(
        responses[0]
            .status
            .message
            .as_deref()
            .unwrap()
            .contains("interrupted")
    );
    assert_eq!(graphs.rollbacks().len(), 1);
}

#[tokio::test]
async fn serialization_failure_rolls_back_without_second_terminal() {
    let engine = Arc::new(StubEngine::returning(json!([1, 2, 3])));
    let handler = EvalHandler::new(engine).manage_transactions(true);
    let channel =
        Arc::new(RecordingChannel::new().with_serializer(Arc::new(FlakySerializer)));
    let graphs = Arc::new(RecordingGraphManager::new(&["g"]));
    let ctx = context_with(&channel, &graphs, eval_request("g.V()"), Settings::default());

    handler.execute(&ctx).await.unwrap();

    let responses = channel.responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(
        responses[0].status.code,
        ResponseStatusCode::ServerErrorSerialization
    );
    assert_single_terminal(&responses);
    assert_eq!(graphs.rollbacks().len(), 1);
    assert!(graphs.commits().is_empty());
}

#[tokio::test]
async fn terminal_write_failure_after_commit_skips_rollback() {
    let engine = Arc::new(StubEngine::returning(json!([1])));
    let handler = EvalHandler::new(engine).manage_transactions(true);
    let channel = Arc::new(RecordingChannel::new());
    channel.close();
    let graphs = Arc::new(RecordingGraphManager::new(&["g"]));
    let ctx = context_with(&channel, &graphs, eval_request("g.V()"), Settings::default());

    let err = handler.execute(&ctx).await.unwrap_err();

    assert!(err.to_string().contains("channel failed"));
    // The commit stands; a rollback after it would conflict.
    assert_eq!(graphs.commits().len(), 1);
    assert!(graphs.rollbacks().is_empty());
}

#[tokio::test]
async fn job_carries_bindings_language_and_timeout() {
    let engine = Arc::new(StubEngine::returning(Value::Null));
    let handler = EvalHandler::new(Arc::clone(&engine) as Arc<dyn ScriptEngine>);
    let channel = Arc::new(RecordingChannel::new());
    let graphs = Arc::new(RecordingGraphManager::new(&["g"]));
    let request = eval_request("g.V(x)")
        .with_arg(ARG_BINDINGS, json!({"x": 7}))
        .with_arg(ARG_LANGUAGE, json!("gremlin-lang"))
        .with_arg(ARG_EVAL_TIMEOUT, json!(250));
    let ctx = context_with(&channel, &graphs, request, Settings::default());

    handler.execute(&ctx).await.unwrap();

    let jobs = engine.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].script, "g.V(x)");
    assert_eq!(jobs[0].language, "gremlin-lang");
    assert_eq!(jobs[0].bindings.get("x"), Some(&json!(7)));
    assert_eq!(jobs[0].timeout, Some(Duration::from_millis(250)));
}

#[tokio::test]
async fn language_defaults_to_the_engine() {
    let engine = Arc::new(StubEngine::returning(Value::Null));
    let handler = EvalHandler::new(Arc::clone(&engine) as Arc<dyn ScriptEngine>);
    let channel = Arc::new(RecordingChannel::new());
    let graphs = Arc::new(RecordingGraphManager::new(&["g"]));
    let ctx = context_with(&channel, &graphs, eval_request("g.V()"), Settings::default());

    handler.execute(&ctx).await.unwrap();

    assert_eq!(engine.jobs()[0].language, "gremlin-groovy");
    assert_eq!(engine.jobs()[0].timeout, None);
}

#[tokio::test]
async fn bindings_supplier_failure_rejects_before_evaluation() {
    let engine = Arc::new(StubEngine::returning(Value::Null));
    let handler = EvalHandler::new(Arc::clone(&engine) as Arc<dyn ScriptEngine>).with_bindings_supplier(Arc::new(|_| {
        Err(OpSelectionError::InvalidArguments(
            "binding source unavailable".to_owned(),
        ))
    }));
    let channel = Arc::new(RecordingChannel::new());
    let graphs = Arc::new(RecordingGraphManager::new(&["g"]));
    let ctx = context_with(&channel, &graphs, eval_request("g.V()"), Settings::default());

    handler.execute(&ctx).await.unwrap();

    let responses = channel.responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(
        responses[0].status.code,
        ResponseStatusCode::InvalidRequestArguments
    );
    assert!(engine.jobs().is_empty());
}

#[tokio::test]
async fn strict_mode_scopes_the_commit_to_aliased_graphs() {
    let engine = Arc::new(StubEngine::returning(json!([1])));
    let handler = EvalHandler::new(engine).manage_transactions(true);
    let channel = Arc::new(RecordingChannel::new());
    let graphs = Arc::new(RecordingGraphManager::new(&["g1", "g2", "g3"]));
    let request = eval_request("g.V()").with_arg(ARG_ALIASES, json!({"g": "g2"}));
    let settings = Settings {
        strict_transaction_management: true,
        ..Settings::default()
    };
    let ctx = context_with(&channel, &graphs, request, settings);

    handler.execute(&ctx).await.unwrap();

    let commits = graphs.commits();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].graphs, vec!["g2".to_owned()]);
}

#[tokio::test]
async fn duplicate_terminal_writes_are_suppressed() {
    let channel = Arc::new(RecordingChannel::new());
    let graphs = Arc::new(RecordingGraphManager::new(&["g"]));
    let ctx = context_with(&channel, &graphs, eval_request("g.V()"), Settings::default());
    let request_id = ctx.request().request_id;

    ctx.write_response(ResponseMessage::no_content(request_id))
        .await
        .unwrap();
    ctx.write_response(ResponseMessage::error(
        request_id,
        ResponseStatusCode::ServerErrorTimeout,
        "late timeout",
    ))
    .await
    .unwrap();

    let responses = channel.responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].status.code, ResponseStatusCode::NoContent);
    assert!(ctx.terminal_written());
}

#[tokio::test]
async fn full_pipeline_round_trip_through_the_processor() {
    let engine = Arc::new(StubEngine::returning(json!(["marko", "vadas"])));
    let processor =
        OpProcessor::new("banyan", EvalHandler::new(engine).manage_transactions(true));
    let channel = Arc::new(RecordingChannel::new());
    let graphs = Arc::new(RecordingGraphManager::new(&["g"]));
    let request = eval_request("g.V().values('name')");
    let request_id = request.request_id;
    let ctx = context_with(&channel, &graphs, request, Settings::default());

    processor.handle(&ctx).await;

    let responses = channel.responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].request_id, request_id);
    assert_eq!(responses[0].status.code, ResponseStatusCode::Success);
    assert_eq!(
        responses[0].result.data,
        vec![json!("marko"), json!("vadas")]
    );
    assert_eq!(graphs.commits().len(), 1);
}
