// Streaming request controller scenarios
// Author: kelexine (https://github.com/kelexine)

mod common;

use common::*;
use semantic_stream::controller::{ControllerConfig, ControllerEvent, RequestState};
use semantic_stream::error::ClientError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[tokio::test]
async fn test_miss_then_identical_prompt_hits_cache() {
    let harness = Harness::new(test_config());
    harness.transport.push(answer("Entangled particles share one quantum state."));

    let first = harness
        .controller
        .submit("Explain quantum entanglement")
        .await
        .unwrap();
    assert!(!first.from_cache);
    assert_eq!(first.attempts, 1);
    assert_eq!(first.response, "Entangled particles share one quantum state.");
    assert_eq!(harness.transport.calls(), 1);
    assert_eq!(harness.cache.lock().len(), 1);

    let second = harness
        .controller
        .submit("Explain quantum entanglement")
        .await
        .unwrap();
    assert!(second.from_cache);
    assert_eq!(second.response, first.response);
    assert_eq!(second.attempts, 0);
    let similarity = second.similarity.unwrap();
    assert!((similarity - 1.0).abs() < 1e-6);
    assert_eq!(second.telemetry.semantic_distance, Some(similarity));

    // No transport opened for the cached answer
    assert_eq!(harness.transport.calls(), 1);
    assert_eq!(harness.controller.state(), RequestState::Completed);
}

#[tokio::test]
async fn test_two_transient_failures_then_success() {
    let harness = Harness::new(test_config());
    let mut events = harness.controller.subscribe();

    harness.transport.push(Script::Body(vec![
        Step::Chunk(content("partial")),
        Step::Reset,
    ]));
    harness.transport.push(Script::Refuse(503));
    harness.transport.push(answer("done at last"));

    let outcome = harness.controller.submit("flaky question").await.unwrap();
    assert_eq!(outcome.attempts, 3);
    assert_eq!(outcome.response, "done at last");
    assert_eq!(harness.transport.calls(), 3);

    let retries: Vec<(u32, Duration)> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            ControllerEvent::Retrying { attempt, delay, .. } => Some((attempt, delay)),
            _ => None,
        })
        .collect();
    assert_eq!(
        retries,
        vec![(1, Duration::from_millis(1)), (2, Duration::from_millis(2))]
    );

    // History is the same on every attempt
    let requests = harness.transport.requests.lock();
    assert!(requests.iter().all(|r| r.history.is_empty()));
    assert!(requests.iter().all(|r| r.request_id == outcome.request_id));
}

#[tokio::test]
async fn test_three_failures_exhaust_retries() {
    let harness = Harness::new(test_config());
    let mut events = harness.controller.subscribe();

    for _ in 0..3 {
        harness.transport.push(Script::Body(vec![Step::Reset]));
    }
    // Would succeed, but must never be reached
    harness.transport.push(answer("too late"));

    let result = harness.controller.submit("doomed").await;
    match result {
        Err(ClientError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(harness.transport.calls(), 3);
    assert_eq!(harness.controller.state(), RequestState::Failed);
    assert!(harness.cache.lock().is_empty());

    let failures = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, ControllerEvent::Failed { .. }))
        .count();
    assert_eq!(failures, 1);
}

#[tokio::test]
async fn test_non_retryable_status_fails_immediately() {
    let harness = Harness::new(test_config());
    harness.transport.push(Script::Refuse(400));
    harness.transport.push(answer("unused"));

    let result = harness.controller.submit("bad request").await;
    assert!(matches!(result, Err(ClientError::Upstream { status: 400, .. })));
    assert_eq!(harness.transport.calls(), 1);
}

#[tokio::test]
async fn test_stream_closed_without_end_is_retried() {
    let harness = Harness::new(test_config());
    harness
        .transport
        .push(Script::Body(vec![Step::Chunk(content("cut off"))]));
    harness.transport.push(answer("complete answer"));

    let outcome = harness.controller.submit("truncated").await.unwrap();
    assert_eq!(outcome.attempts, 2);
    assert_eq!(outcome.response, "complete answer");
}

#[tokio::test]
async fn test_second_submission_while_in_flight_is_busy() {
    let harness = Harness::new(test_config());
    let gate = Arc::new(Notify::new());
    harness.transport.push(Script::Body(vec![
        Step::Chunk(content("working")),
        Step::Wait(gate.clone()),
        Step::Chunk(content("working on it")),
        Step::Chunk(end()),
    ]));

    let controller = harness.controller.clone();
    let first = tokio::spawn(async move { controller.submit("long question").await });

    let transport = harness.transport.clone();
    wait_until(|| transport.calls() == 1).await;
    assert!(harness.controller.active_request().is_some());

    let second = harness.controller.submit("another question").await;
    assert!(matches!(second, Err(ClientError::Busy)));
    assert_eq!(harness.transport.calls(), 1);

    gate.notify_one();
    let outcome = first.await.unwrap().unwrap();
    assert_eq!(outcome.response, "working on it");
    assert!(harness.controller.active_request().is_none());
}

#[tokio::test]
async fn test_cancel_discards_partial_response() {
    let harness = Harness::new(test_config());
    let mut events = harness.controller.subscribe();
    let gate = Arc::new(Notify::new());
    harness.transport.push(Script::Body(vec![
        Step::Chunk(content("half an ans")),
        Step::Wait(gate.clone()),
        Step::Chunk(content("half an answer")),
        Step::Chunk(end()),
    ]));

    let controller = harness.controller.clone();
    let request = tokio::spawn(async move { controller.submit("cancel me").await });

    let transport = harness.transport.clone();
    wait_until(|| transport.calls() == 1).await;
    assert!(harness.controller.cancel());

    let result = request.await.unwrap();
    assert!(matches!(result, Err(ClientError::Cancelled)));
    assert_eq!(harness.controller.state(), RequestState::Cancelled);
    assert!(harness.cache.lock().is_empty());
    assert!(harness.controller.history().is_empty());

    let events = drain(&mut events);
    assert!(events
        .iter()
        .any(|e| matches!(e, ControllerEvent::Cancelled { .. })));
    assert!(!events
        .iter()
        .any(|e| matches!(e, ControllerEvent::Completed { .. })));

    // Nothing in flight any more
    assert!(!harness.controller.cancel());
}

#[tokio::test]
async fn test_pause_stops_consumption_until_resume() {
    let harness = Harness::new(test_config());
    let mut events = harness.controller.subscribe();
    let gate = Arc::new(Notify::new());
    harness.transport.push(Script::Body(vec![
        Step::Chunk(content("Hello")),
        Step::Wait(gate.clone()),
        Step::Chunk(content("Hello world")),
        Step::Chunk(end()),
    ]));

    let controller = harness.controller.clone();
    let request = tokio::spawn(async move { controller.submit("greet").await });

    // First content arrives, then pause
    let mut seen_first = false;
    while !seen_first {
        if let Ok(ControllerEvent::Content { full_text, .. }) = events.recv().await {
            seen_first = full_text == "Hello";
        }
    }
    assert!(harness.controller.pause());
    let controller = harness.controller.clone();
    wait_until(|| controller.state() == RequestState::Paused).await;

    // Data becomes available but is not consumed while paused
    gate.notify_one();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!request.is_finished());
    assert_eq!(harness.controller.state(), RequestState::Paused);

    assert!(harness.controller.resume());
    let outcome = request.await.unwrap().unwrap();
    assert_eq!(outcome.response, "Hello world");
    assert_eq!(outcome.attempts, 1);
}

#[tokio::test]
async fn test_embedding_failure_falls_through_to_generation() {
    let harness = Harness::new(test_config());
    harness.embedder.set_failing(true);
    harness.transport.push(answer("generated anyway"));

    let outcome = harness.controller.submit("no embeddings today").await.unwrap();
    assert!(!outcome.from_cache);
    assert_eq!(outcome.response, "generated anyway");
    assert_eq!(harness.transport.calls(), 1);
    // Storing also needs an embedding, so nothing was cached
    assert!(harness.cache.lock().is_empty());
}

#[tokio::test]
async fn test_cache_disabled_always_streams() {
    let config = ControllerConfig {
        cache_enabled: false,
        ..test_config()
    };
    let harness = Harness::new(config);
    harness.transport.push(answer("one"));
    harness.transport.push(answer("two"));

    harness.controller.submit("same prompt").await.unwrap();
    let second = harness.controller.submit("same prompt").await.unwrap();
    assert!(!second.from_cache);
    assert_eq!(second.response, "two");
    assert_eq!(harness.transport.calls(), 2);
    assert_eq!(harness.embedder.calls(), 0);
}

#[tokio::test]
async fn test_function_calls_forwarded_to_handler() {
    let harness = Harness::new(test_config());
    let mut events = harness.controller.subscribe();
    harness.transport.push(Script::Body(vec![
        Step::Chunk(
            "{\"type\":\"function_call\",\"function_call\":{\"name\":\"open_url\",\"parameters\":{\"url\":\"https://example.com\"}}}\n"
                .to_string(),
        ),
        Step::Chunk(content("Opened it.")),
        Step::Chunk(end()),
    ]));

    harness.controller.submit("open the site").await.unwrap();

    let calls = harness.handler.calls.lock().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "open_url");
    assert_eq!(calls[0].1["url"], "https://example.com");

    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        ControllerEvent::FunctionCall { name, .. } if name == "open_url"
    )));
}

#[tokio::test]
async fn test_events_follow_arrival_order_and_skip_malformed() {
    let harness = Harness::new(test_config());
    let mut events = harness.controller.subscribe();
    let body = format!(
        "{}not json at all\n{}{}",
        thinking("step"),
        content("A"),
        content("AB")
    );
    // Split mid-line to exercise reassembly
    let (head, tail) = body.split_at(body.len() / 2 + 3);
    harness.transport.push(Script::Body(vec![
        Step::Chunk(head.to_string()),
        Step::Chunk(tail.to_string()),
        Step::Chunk(end()),
    ]));

    let outcome = harness.controller.submit("order").await.unwrap();
    assert_eq!(outcome.response, "AB");

    let streamed: Vec<String> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            ControllerEvent::Thinking { content, .. } => Some(format!("thinking:{content}")),
            ControllerEvent::Content { full_text, .. } => Some(format!("content:{full_text}")),
            _ => None,
        })
        .collect();
    assert_eq!(streamed, vec!["thinking:step", "content:A", "content:AB"]);
}

#[tokio::test]
async fn test_telemetry_merged_into_outcome() {
    let harness = Harness::new(test_config());
    harness.transport.push(Script::Body(vec![
        Step::Chunk(thinking("first")),
        Step::Chunk(thinking("second")),
        Step::Chunk(
            "{\"type\":\"telemetry\",\"metrics\":{\"tokensUsed\":42,\"confidenceScore\":0.8}}\n"
                .to_string(),
        ),
        Step::Chunk(content("answer")),
        Step::Chunk(end()),
    ]));

    let outcome = harness.controller.submit("measure me").await.unwrap();
    assert_eq!(outcome.telemetry.tokens_used, 42);
    assert_eq!(outcome.telemetry.thinking_depth, 2);
    assert_eq!(outcome.telemetry.confidence_score, 0.8);
    assert_eq!(outcome.telemetry.semantic_distance, None);
}

#[tokio::test]
async fn test_history_carried_into_next_request() {
    let harness = Harness::new(test_config());
    harness.transport.push(answer("first reply"));
    harness.transport.push(answer("second reply"));

    harness.controller.submit("first question").await.unwrap();
    harness.controller.submit("a different topic").await.unwrap();

    let requests = harness.transport.requests.lock();
    assert!(requests[0].history.is_empty());
    assert_eq!(requests[1].history.len(), 2);
    assert_eq!(requests[1].history[0].content, "first question");
    assert_eq!(requests[1].history[1].content, "first reply");
    assert_eq!(harness.controller.history().len(), 4);
}

#[tokio::test]
async fn test_timeout_fails_request() {
    let config = ControllerConfig {
        timeout: Duration::from_millis(50),
        ..test_config()
    };
    let harness = Harness::new(config);
    let gate = Arc::new(Notify::new());
    harness
        .transport
        .push(Script::Body(vec![Step::Wait(gate)]));

    let result = harness.controller.submit("slow").await;
    assert!(matches!(result, Err(ClientError::Timeout(_))));
    assert_eq!(harness.controller.state(), RequestState::Failed);
    assert!(harness.controller.active_request().is_none());
}

#[tokio::test]
async fn test_cancel_while_transport_is_opening() {
    let harness = Harness::new(test_config());
    harness.transport.push(Script::Hang);

    let controller = harness.controller.clone();
    let request = tokio::spawn(async move { controller.submit("never answered").await });

    let transport = harness.transport.clone();
    wait_until(|| transport.calls() == 1).await;
    assert!(harness.controller.cancel());

    // Well inside the 5s request timeout
    let result = tokio::time::timeout(Duration::from_secs(1), request)
        .await
        .expect("cancel did not interrupt the pending open")
        .unwrap();
    assert!(matches!(result, Err(ClientError::Cancelled)));
    assert_eq!(harness.controller.state(), RequestState::Cancelled);
    assert!(harness.controller.active_request().is_none());
    assert_eq!(harness.transport.calls(), 1);
}

#[tokio::test]
async fn test_cancel_during_cache_check() {
    let harness = Harness::new(test_config());
    harness.embedder.set_hanging(true);
    harness.transport.push(answer("unused"));

    let controller = harness.controller.clone();
    let request = tokio::spawn(async move { controller.submit("slow embedding").await });

    let embedder = harness.embedder.clone();
    wait_until(|| embedder.calls() == 1).await;
    assert_eq!(harness.controller.state(), RequestState::CacheCheck);
    assert!(harness.controller.cancel());

    let result = tokio::time::timeout(Duration::from_secs(1), request)
        .await
        .expect("cancel did not interrupt the pending embedding")
        .unwrap();
    assert!(matches!(result, Err(ClientError::Cancelled)));
    assert_eq!(harness.transport.calls(), 0);
}

#[tokio::test]
async fn test_cancel_during_backoff() {
    let config = ControllerConfig {
        base_delay: Duration::from_secs(10),
        timeout: Duration::from_secs(30),
        ..test_config()
    };
    let harness = Harness::new(config);
    harness.transport.push(Script::Body(vec![Step::Reset]));
    harness.transport.push(answer("unused"));

    let controller = harness.controller.clone();
    let request = tokio::spawn(async move { controller.submit("retry later").await });

    let controller = harness.controller.clone();
    wait_until(|| controller.state() == RequestState::Retrying).await;
    assert!(harness.controller.cancel());

    let result = tokio::time::timeout(Duration::from_secs(1), request)
        .await
        .expect("cancel did not cut the backoff short")
        .unwrap();
    assert!(matches!(result, Err(ClientError::Cancelled)));
    // The second attempt never opened
    assert_eq!(harness.transport.calls(), 1);
    assert!(harness.cache.lock().is_empty());
}

#[tokio::test]
async fn test_retry_discards_failed_attempt_telemetry() {
    let harness = Harness::new(test_config());
    harness.transport.push(Script::Body(vec![
        Step::Chunk(thinking("a")),
        Step::Chunk(thinking("b")),
        Step::Chunk(thinking("c")),
        Step::Reset,
    ]));
    harness.transport.push(Script::Body(vec![
        Step::Chunk(thinking("a")),
        Step::Chunk(content("final")),
        Step::Chunk(end()),
    ]));

    let outcome = harness.controller.submit("think twice").await.unwrap();
    assert_eq!(outcome.attempts, 2);
    assert_eq!(outcome.telemetry.thinking_depth, 1);
    // "a" and "final" at four characters per token
    assert_eq!(outcome.telemetry.tokens_used, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_observer_can_submit_on_completion() {
    let harness = Harness::new(test_config());
    harness.transport.push(answer("Lima is the capital of Peru."));
    harness.transport.push(answer("Roughly ten million people."));

    let mut events = harness.controller.subscribe();
    let controller = harness.controller.clone();
    let observer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ControllerEvent::Completed { .. }) => {
                    return controller.submit("How many people live there").await;
                }
                Ok(_) => {}
                Err(e) => panic!("event channel failed: {}", e),
            }
        }
    });

    harness
        .controller
        .submit("What is the capital of Peru")
        .await
        .unwrap();
    let follow_up = observer.await.unwrap().unwrap();
    assert_eq!(follow_up.response, "Roughly ten million people.");
}

#[tokio::test]
async fn test_time_spent_paused_counts_toward_timeout() {
    let config = ControllerConfig {
        timeout: Duration::from_millis(150),
        ..test_config()
    };
    let harness = Harness::new(config);
    let mut events = harness.controller.subscribe();
    let gate = Arc::new(Notify::new());
    harness.transport.push(Script::Body(vec![
        Step::Chunk(content("Hello")),
        Step::Wait(gate.clone()),
        Step::Chunk(end()),
    ]));

    let controller = harness.controller.clone();
    let request = tokio::spawn(async move { controller.submit("pause forever").await });

    loop {
        if let Ok(ControllerEvent::Content { .. }) = events.recv().await {
            break;
        }
    }
    assert!(harness.controller.pause());
    gate.notify_one();

    let result = request.await.unwrap();
    assert!(matches!(result, Err(ClientError::Timeout(_))));
    assert_eq!(harness.controller.state(), RequestState::Failed);
    assert!(harness.cache.lock().is_empty());
}
