use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde_json::{json, Value};

use super::*;
use crate::tools::{CapabilityDescriptor, CapabilityRegistryBuilder, HandlerError};
use crate::trace::{MemoryTracer, TracePayload, TraceError, Tracer};

fn request(call_id: &str, operation_name: &str, arguments: Value) -> ToolCallRequest {
    ToolCallRequest::new(call_id, operation_name, arguments)
}

fn batch(requests: Vec<ToolCallRequest>) -> ExecutionBatch {
    ExecutionBatch::new(requests).expect("valid batch")
}

fn sleeper(name: &str, millis: u64) -> CapabilityDescriptor {
    let label = name.to_string();
    CapabilityDescriptor::suspendable(name, move |_args| {
        let label = label.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok(json!({ "from": label }))
        }
    })
}

fn echo_blocking(name: &str) -> CapabilityDescriptor {
    CapabilityDescriptor::blocking(name, |args| Ok(Value::Object(args)))
}

fn scheduler_with(
    descriptors: Vec<CapabilityDescriptor>,
) -> (Scheduler, Arc<MemoryTracer>) {
    let mut builder = CapabilityRegistryBuilder::new();
    builder.register_all(descriptors).expect("register");
    let tracer = Arc::new(MemoryTracer::new());
    let scheduler = Scheduler::new(builder.build(), TraceSink::new(tracer.clone()));
    (scheduler, tracer)
}

#[tokio::test(start_paused = true)]
async fn mixed_batch_keeps_submission_order() {
    let (scheduler, _) = scheduler_with(vec![
        sleeper("slow", 300),
        sleeper("fast", 10),
        echo_blocking("echo"),
    ]);
    let batch = batch(vec![
        request("a", "slow", json!({})),
        request("b", "echo", json!({"n": 1})),
        request("c", "fast", json!({})),
        request("d", "echo", json!({"n": 2})),
    ]);

    let completed = scheduler.execute(&batch).await.expect("execute");

    assert_eq!(completed.call_ids(), vec!["a", "b", "c", "d"]);
    assert_eq!(completed.failure_count(), 0);
    assert_eq!(completed.results[1].envelope.data(), Some(&json!({"n": 1})));
    assert_eq!(completed.results[0].envelope.data(), Some(&json!({"from": "slow"})));
    let invocation_ids: Vec<&str> = completed
        .invocations
        .iter()
        .map(|record| record.call_id.as_str())
        .collect();
    assert_eq!(invocation_ids, vec!["a", "b", "c", "d"]);
}

#[tokio::test]
async fn raised_tls_fault_becomes_failed_envelope() {
    let (scheduler, _) = scheduler_with(vec![CapabilityDescriptor::suspendable(
        "count_unread",
        |_args| async {
            Err::<Value, HandlerError>(
                "[SSL: WRONG_VERSION_NUMBER] wrong version number (_ssl.c:1000)".into(),
            )
        },
    )]);
    let batch = batch(vec![request("1", "count_unread", json!({}))]);

    let completed = scheduler.execute(&batch).await.expect("execute");
    let outputs = completed.outputs();

    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].call_id, "1");
    let content: Value = serde_json::from_str(&outputs[0].content).expect("content is json");
    assert_eq!(
        content,
        json!({
            "success": false,
            "error": "[SSL: WRONG_VERSION_NUMBER] wrong version number (_ssl.c:1000)"
        })
    );
    assert_eq!(completed.invocations[0].status, InvocationStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn suspendable_calls_run_concurrently() {
    let (scheduler, _) = scheduler_with(vec![
        sleeper("fetch_unread", 500),
        sleeper("count_unread", 500),
        sleeper("list_drafts", 500),
    ]);
    let batch = batch(vec![
        request("1", "fetch_unread", json!({})),
        request("2", "count_unread", json!({})),
        request("3", "list_drafts", json!({})),
    ]);

    let started = Instant::now();
    let completed = scheduler.execute(&batch).await.expect("execute");
    let elapsed = started.elapsed();

    assert_eq!(completed.failure_count(), 0);
    assert!(elapsed >= Duration::from_millis(500));
    assert!(elapsed < Duration::from_millis(1000), "took {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn concurrency_limit_serializes_the_join_lane() {
    let (scheduler, _) = scheduler_with(vec![sleeper("a", 100), sleeper("b", 100), sleeper("c", 100)]);
    let scheduler = scheduler.with_max_concurrent_tools(1);
    let batch = batch(vec![
        request("1", "a", json!({})),
        request("2", "b", json!({})),
        request("3", "c", json!({})),
    ]);

    let started = Instant::now();
    let completed = scheduler.execute(&batch).await.expect("execute");

    assert_eq!(completed.failure_count(), 0);
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[tokio::test]
async fn unknown_operation_does_not_stop_the_batch() {
    let (scheduler, tracer) = scheduler_with(vec![echo_blocking("echo")]);
    let batch = batch(vec![
        request("1", "missing_tool", json!({})),
        request("2", "echo", json!({"ok": true})),
    ]);

    let completed = scheduler.execute(&batch).await.expect("execute");

    let missing = &completed.results[0].envelope;
    assert!(!missing.is_success());
    assert_eq!(missing.error(), Some("invalid_call:unknown operation 'missing_tool'"));
    assert!(completed.results[1].envelope.is_success());
    assert_eq!(completed.invocations[0].status, InvocationStatus::Rejected);
    assert_eq!(tracer.named(events::TOOL_CALL_MISSING).len(), 1);
    assert_eq!(
        tracer.events(),
        vec![
            events::BATCH_START,
            events::TOOL_CALL_START,
            events::TOOL_CALL_MISSING,
            events::TOOL_CALL_ERROR,
            events::TOOL_CALL_START,
            events::TOOL_CALL_END,
            events::BATCH_END,
        ]
    );
    assert_eq!(tracer.named(events::TOOL_CALL_ERROR)[0].payload["fault"], "validation");
}

#[tokio::test]
async fn invalid_arguments_never_reach_the_handler() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let descriptor = CapabilityDescriptor::blocking("send_email", move |_args| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(json!("sent"))
    })
    .with_input_schema(json!({
        "type": "object",
        "required": ["to"],
        "properties": { "to": { "type": "string" } }
    }));
    let (scheduler, _) = scheduler_with(vec![descriptor]);
    let batch = batch(vec![
        request("1", "send_email", json!({"to": 42})),
        request("2", "send_email", json!("not an object")),
        request("3", "send_email", json!({"to": "a@example.com"})),
    ]);

    let completed = scheduler.execute(&batch).await.expect("execute");

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for result in &completed.results[..2] {
        let error = result.envelope.error().expect("failed");
        assert!(error.starts_with("invalid_call:"), "{error}");
    }
    assert!(completed.results[2].envelope.is_success());
}

#[tokio::test]
async fn panics_are_contained_in_both_lanes() {
    let (scheduler, _) = scheduler_with(vec![
        CapabilityDescriptor::blocking("boom_sync", |_args| panic!("sync boom")),
        CapabilityDescriptor::suspendable("boom_async", |_args| async {
            if true {
                panic!("async boom");
            }
            Ok(Value::Null)
        }),
        sleeper("fine", 1),
    ]);
    let batch = batch(vec![
        request("1", "boom_sync", json!({})),
        request("2", "boom_async", json!({})),
        request("3", "fine", json!({})),
    ]);

    let completed = scheduler.execute(&batch).await.expect("execute");

    assert_eq!(
        completed.results[0].envelope.error(),
        Some("handler panicked: sync boom")
    );
    assert_eq!(
        completed.results[1].envelope.error(),
        Some("handler panicked: async boom")
    );
    assert!(completed.results[2].envelope.is_success());
}

#[tokio::test]
async fn shaped_results_are_not_wrapped_twice() {
    let (scheduler, _) = scheduler_with(vec![
        CapabilityDescriptor::blocking("already_ok", |_args| {
            Ok(json!({"success": true, "data": {"count": 2}}))
        }),
        CapabilityDescriptor::suspendable("already_failed", |_args| async {
            Ok(json!({"success": false, "error": "mailbox locked"}))
        }),
    ]);
    let batch = batch(vec![
        request("1", "already_ok", json!({})),
        request("2", "already_failed", json!({})),
    ]);

    let completed = scheduler.execute(&batch).await.expect("execute");

    assert_eq!(
        completed.results[0].envelope.to_value(),
        json!({"success": true, "data": {"count": 2}})
    );
    assert_eq!(completed.results[1].envelope.error(), Some("mailbox locked"));
    assert_eq!(completed.invocations[1].status, InvocationStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn timeout_keeps_finished_results() {
    let (scheduler, tracer) = scheduler_with(vec![sleeper("quick", 10), sleeper("stuck", 10_000)]);
    let scheduler = scheduler.with_batch_timeout(Some(Duration::from_millis(200)));
    let batch = batch(vec![
        request("1", "stuck", json!({})),
        request("2", "quick", json!({})),
    ]);

    let completed = scheduler.execute(&batch).await.expect("execute");

    assert_eq!(completed.results[0].envelope.error(), Some("timeout"));
    assert!(completed.results[1].envelope.is_success());
    assert_eq!(completed.invocations[0].status, InvocationStatus::TimedOut);
    assert_eq!(tracer.named(events::TOOL_CALL_TIMEOUT).len(), 1);
}

#[test]
fn blocking_calls_not_started_before_deadline_time_out() {
    let (scheduler, _) = scheduler_with(vec![
        CapabilityDescriptor::blocking("slow", |_args| {
            std::thread::sleep(Duration::from_millis(120));
            Ok(json!("done"))
        }),
        echo_blocking("echo"),
    ]);
    let scheduler = scheduler.with_batch_timeout(Some(Duration::from_millis(40)));
    let batch = batch(vec![
        request("1", "slow", json!({})),
        request("2", "echo", json!({})),
    ]);

    let completed = scheduler.execute_blocking(&batch).expect("execute");

    assert!(completed.results[0].envelope.is_success());
    assert_eq!(completed.results[1].envelope.error(), Some("timeout"));
}

#[test]
fn standalone_entry_runs_without_a_driver() {
    let (scheduler, _) = scheduler_with(vec![sleeper("fetch_unread", 5), echo_blocking("echo")]);
    let batch = batch(vec![
        request("1", "fetch_unread", json!({})),
        request("2", "echo", json!({"k": "v"})),
    ]);

    let completed = scheduler.execute_blocking(&batch).expect("execute");

    assert_eq!(completed.call_ids(), vec!["1", "2"]);
    assert_eq!(completed.failure_count(), 0);
}

#[tokio::test]
async fn standalone_entry_is_refused_inside_a_driver() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let (scheduler, tracer) = scheduler_with(vec![CapabilityDescriptor::blocking(
        "count_unread",
        move |_args| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(json!(3))
        },
    )]);
    let batch = batch(vec![
        request("1", "count_unread", json!({})),
        request("2", "count_unread", json!({})),
    ]);

    let completed = scheduler.execute_blocking(&batch).expect("refusal is not fatal");

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(completed.len(), 2);
    for result in &completed.results {
        let error = result.envelope.error().expect("refused");
        assert!(error.starts_with("reentrant_scheduling:"), "{error}");
    }
    assert_eq!(tracer.named(events::SCHEDULING_REFUSED).len(), 1);

    // The suspendable entry is the supported path from here.
    let completed = scheduler.execute(&batch).await.expect("execute");
    assert_eq!(completed.failure_count(), 0);
}

#[test]
fn nested_standalone_call_from_a_handler_is_refused() {
    let inner = {
        let mut builder = CapabilityRegistryBuilder::new();
        builder.register(echo_blocking("echo")).expect("register");
        Scheduler::new(builder.build(), TraceSink::noop())
    };
    let (outer, _) = scheduler_with(vec![CapabilityDescriptor::blocking(
        "delegate",
        move |_args| {
            let nested = ExecutionBatch::new(vec![ToolCallRequest::new("n1", "echo", json!({}))])?;
            let completed = inner.execute_blocking(&nested)?;
            Ok(completed.results[0].envelope.to_value())
        },
    )]);
    let batch = batch(vec![request("1", "delegate", json!({}))]);

    let completed = outer.execute_blocking(&batch).expect("execute");

    // The outer call succeeds; the nested envelope it returned carries the refusal.
    let envelope = &completed.results[0].envelope;
    assert!(!envelope.is_success());
    assert!(envelope
        .error()
        .is_some_and(|error| error.starts_with("reentrant_scheduling:")));
}

#[tokio::test]
async fn trace_events_follow_the_call_lifecycle() {
    let (scheduler, tracer) = scheduler_with(vec![
        echo_blocking("echo"),
        CapabilityDescriptor::blocking("fail", |_args| Err("nope".into())),
    ]);
    let batch = batch(vec![
        request("1", "echo", json!({})),
        request("2", "fail", json!({})),
    ]);

    scheduler.execute(&batch).await.expect("execute");

    assert_eq!(
        tracer.events(),
        vec![
            events::BATCH_START,
            events::TOOL_CALL_START,
            events::TOOL_CALL_START,
            events::TOOL_CALL_END,
            events::TOOL_CALL_ERROR,
            events::BATCH_END,
        ]
    );
    let error = &tracer.named(events::TOOL_CALL_ERROR)[0];
    assert_eq!(error.payload["tool_call_id"], "2");
    assert_eq!(error.payload["error"], "nope");
    let end = &tracer.named(events::BATCH_END)[0];
    assert_eq!(end.payload["failures"], 1);
}

struct BrokenTracer;

impl Tracer for BrokenTracer {
    fn log(&self, event: &str, _payload: &TracePayload) -> Result<(), TraceError> {
        if event == events::TOOL_CALL_END {
            panic!("tracer exploded");
        }
        Err(TraceError::Unavailable("disk full".to_string()))
    }
}

#[tokio::test]
async fn tracer_failures_do_not_change_outcomes() {
    let mut builder = CapabilityRegistryBuilder::new();
    builder
        .register_all(vec![echo_blocking("echo"), sleeper("nap", 1)])
        .expect("register");
    let scheduler = Scheduler::new(builder.build(), TraceSink::new(Arc::new(BrokenTracer)));
    let batch = batch(vec![
        request("1", "echo", json!({"x": 1})),
        request("2", "nap", json!({})),
    ]);

    let completed = scheduler.execute(&batch).await.expect("execute");

    assert_eq!(completed.failure_count(), 0);
    assert_eq!(completed.call_ids(), vec!["1", "2"]);
}

#[test]
fn from_config_applies_limits() {
    let config = EngineConfig {
        batch_timeout_ms: Some(250),
        max_concurrent_tools: 2,
        ..EngineConfig::default()
    };
    let scheduler = Scheduler::from_config(CapabilityRegistry::empty(), &config);
    assert_eq!(scheduler.batch_timeout, Some(Duration::from_millis(250)));
    assert_eq!(scheduler.permits.available_permits(), 2);
}

#[tokio::test(start_paused = true)]
async fn interleavings_keep_submission_order() {
    // Later suspendable calls finish first: s0 sleeps longest, s5 shortest.
    let mut descriptors: Vec<CapabilityDescriptor> = (0..6u64)
        .map(|index| sleeper(&format!("s{index}"), (6 - index) * 50))
        .collect();
    descriptors.push(echo_blocking("echo"));
    let (scheduler, _) = scheduler_with(descriptors);

    for pattern in ["bsbsbs", "ssbbss", "sbbbbs", "bbssss", "sssssb", "bsssss", "ssssss", "bbbbbb"] {
        let requests = pattern
            .chars()
            .enumerate()
            .map(|(index, lane)| match lane {
                'b' => request(&index.to_string(), "echo", json!({ "i": index })),
                _ => request(&index.to_string(), &format!("s{index}"), json!({})),
            })
            .collect();
        let batch = batch(requests);

        let completed = scheduler.execute(&batch).await.expect("execute");

        let expected: Vec<String> = (0..pattern.len()).map(|index| index.to_string()).collect();
        assert_eq!(completed.call_ids(), expected, "{pattern}");
        for (index, (lane, result)) in pattern.chars().zip(&completed.results).enumerate() {
            let data = result.envelope.data().expect("success");
            match lane {
                'b' => assert_eq!(data, &json!({ "i": index }), "{pattern}"),
                _ => assert_eq!(data, &json!({ "from": format!("s{index}") }), "{pattern}"),
            }
        }
    }
}

#[test]
fn suspendable_calls_do_not_start_after_the_deadline() {
    let sends = Arc::new(AtomicUsize::new(0));
    let counter = sends.clone();
    let (scheduler, tracer) = scheduler_with(vec![
        CapabilityDescriptor::blocking("slow", |_args| {
            std::thread::sleep(Duration::from_millis(100));
            Ok(json!("done"))
        }),
        CapabilityDescriptor::suspendable("send_email", move |_args| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!("sent"))
            }
        }),
    ]);
    let scheduler = scheduler.with_batch_timeout(Some(Duration::from_millis(20)));
    let batch = batch(vec![
        request("1", "slow", json!({})),
        request("2", "send_email", json!({})),
    ]);

    let completed = scheduler.execute_blocking(&batch).expect("execute");

    assert!(completed.results[0].envelope.is_success());
    assert_eq!(completed.results[1].envelope.error(), Some("timeout"));
    assert_eq!(completed.invocations[1].status, InvocationStatus::TimedOut);
    assert_eq!(sends.load(Ordering::SeqCst), 0);
    assert_eq!(tracer.named(events::TOOL_CALL_TIMEOUT).len(), 1);
}

#[tokio::test]
async fn nested_execute_from_a_handler_ignores_the_outer_limit() {
    let slot: Arc<OnceLock<Scheduler>> = Arc::new(OnceLock::new());
    let inner = slot.clone();
    let (scheduler, _) = scheduler_with(vec![
        CapabilityDescriptor::suspendable("leaf", |_args| async { Ok(json!("leaf")) }),
        CapabilityDescriptor::suspendable("delegate", move |_args| {
            let inner = inner.clone();
            async move {
                let scheduler = inner
                    .get()
                    .cloned()
                    .ok_or_else(|| HandlerError::from("scheduler not installed"))?;
                let leaf = ExecutionBatch::new(vec![ToolCallRequest::new("n1", "leaf", json!({}))])?;
                let completed = scheduler.execute(&leaf).await?;
                Ok::<Value, HandlerError>(completed.results[0].envelope.to_value())
            }
        }),
    ]);
    let scheduler = scheduler.with_max_concurrent_tools(1);
    slot.set(scheduler.clone()).expect("install scheduler");
    let batch = batch(vec![
        request("1", "delegate", json!({})),
        request("2", "leaf", json!({})),
    ]);

    let completed = tokio::time::timeout(Duration::from_secs(2), scheduler.execute(&batch))
        .await
        .expect("nested join finished")
        .expect("execute");

    assert_eq!(completed.failure_count(), 0);
    assert_eq!(completed.results[0].envelope.data(), Some(&json!("leaf")));
    assert_eq!(scheduler.permits.available_permits(), 1);
}
