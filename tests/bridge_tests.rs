//! Tests for the blocking-to-async streaming bridge.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use chatloop::bridge::{bridge_fragments, bridge_provider, BridgeOptions};
use chatloop::error::ChatLoopError;
use chatloop::provider::{ProviderRequest, ResponseFragment};
use chatloop::types::{EventStream, FinishReason, StreamEvent};

use common::{collect, completion_of, text_of, text_script, ScriptedProvider, Step};

fn run(
    provider: &Arc<ScriptedProvider>,
    options: BridgeOptions,
    cancel: CancellationToken,
) -> EventStream {
    bridge_provider(provider.clone(), ProviderRequest::default(), options, cancel)
}

#[tokio::test]
async fn n_fragments_yield_n_deltas_then_one_completion() {
    let pieces = ["Day 1: ", "Fushimi Inari. ", "Day 2: ", "Arashiyama. ", "Day 3: Gion."];
    let provider = ScriptedProvider::with_scripts(vec![pieces
        .iter()
        .map(|p| Step::Fragment(ResponseFragment::text(*p)))
        .collect()]);

    let events = collect(run(&provider, BridgeOptions::default(), CancellationToken::new())).await;

    assert_eq!(events.len(), pieces.len() + 1);
    for (event, piece) in events.iter().zip(pieces) {
        assert!(matches!(event, Ok(StreamEvent::TextDelta { text }) if text == piece));
    }
    match completion_of(&events) {
        Some(StreamEvent::Completion {
            message,
            stop_reason,
            ..
        }) => {
            assert_eq!(message.content, pieces.concat());
            assert_eq!(*stop_reason, FinishReason::Stop);
        }
        other => panic!("expected completion, got {other:?}"),
    }
    // Every fragment plus the exhausting pull.
    assert_eq!(provider.pulls(), pieces.len() + 1);
}

#[tokio::test]
async fn empty_content_is_suppressed() {
    let provider = ScriptedProvider::with_scripts(vec![text_script(&["a", "", "b", ""])]);
    let events = collect(run(&provider, BridgeOptions::default(), CancellationToken::new())).await;

    let deltas = events
        .iter()
        .filter(|e| matches!(e, Ok(StreamEvent::TextDelta { .. })))
        .count();
    assert_eq!(deltas, 2);
    assert_eq!(text_of(&events), "ab");
    assert!(completion_of(&events).is_some());
}

#[tokio::test]
async fn tool_call_arguments_accumulate_until_completion() {
    let provider = ScriptedProvider::with_scripts(vec![vec![
        Step::Fragment(ResponseFragment::tool_call(0, Some("call_w"), Some("weather"), "")),
        Step::Fragment(ResponseFragment::tool_call(0, None, None, "{\"city\":")),
        Step::Fragment(ResponseFragment::tool_call(0, None, None, "\"Kyoto\"}")),
        Step::Fragment(ResponseFragment::finish("tool_calls")),
    ]]);
    let events = collect(run(&provider, BridgeOptions::default(), CancellationToken::new())).await;

    let argument_text: String = events
        .iter()
        .filter_map(|e| match e {
            Ok(StreamEvent::ToolCallDelta { arguments_delta, .. }) => Some(arguments_delta.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(argument_text, "{\"city\":\"Kyoto\"}");

    match completion_of(&events) {
        Some(StreamEvent::Completion {
            message,
            stop_reason,
            ..
        }) => {
            assert_eq!(*stop_reason, FinishReason::ToolCalls);
            assert_eq!(message.tool_calls.len(), 1);
            assert_eq!(message.tool_calls[0].id, "call_w");
            assert_eq!(message.tool_calls[0].arguments["city"], "Kyoto");
        }
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn fault_after_two_of_five_fragments_ends_the_stream() {
    let provider = ScriptedProvider::with_scripts(vec![vec![
        Step::Fragment(ResponseFragment::text("one ")),
        Step::Fragment(ResponseFragment::text("two ")),
        Step::Fail("connection reset".into()),
        Step::Fragment(ResponseFragment::text("four ")),
        Step::Fragment(ResponseFragment::text("five")),
    ]]);

    let events = collect(run(&provider, BridgeOptions::default(), CancellationToken::new())).await;

    assert_eq!(events.len(), 3);
    assert!(matches!(&events[0], Ok(StreamEvent::TextDelta { text }) if text == "one "));
    assert!(matches!(&events[1], Ok(StreamEvent::TextDelta { text }) if text == "two "));
    assert!(matches!(
        &events[2],
        Err(ChatLoopError::ProviderFault { provider, message })
            if provider == "scripted" && message.contains("connection reset")
    ));
    // No pull after the fault.
    assert_eq!(provider.pulls(), 3);
}

#[tokio::test]
async fn open_failure_is_a_single_provider_fault() {
    let provider = ScriptedProvider::new();
    provider.fail_next_open("service unavailable");

    let events = collect(run(&provider, BridgeOptions::default(), CancellationToken::new())).await;

    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        Err(ChatLoopError::ProviderFault { message, .. }) if message.contains("service unavailable")
    ));
    assert_eq!(provider.pulls(), 0);
}

#[tokio::test]
async fn cancellation_stops_further_pulls() {
    let mut script = Vec::new();
    for i in 0..10 {
        script.push(Step::Sleep(Duration::from_millis(20)));
        script.push(Step::Fragment(ResponseFragment::text(format!("chunk {i} "))));
    }
    let provider = ScriptedProvider::with_scripts(vec![script]);
    let cancel = CancellationToken::new();
    let mut stream = run(&provider, BridgeOptions::default(), cancel.clone());

    for _ in 0..2 {
        assert!(matches!(stream.next().await, Some(Ok(StreamEvent::TextDelta { .. }))));
    }
    cancel.cancel();

    assert!(stream.next().await.is_none());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(provider.pulls(), 2);
}

#[tokio::test]
async fn dropping_the_stream_releases_the_worker() {
    let opened = Arc::new(AtomicUsize::new(0));
    let dropped = Arc::new(AtomicUsize::new(0));

    struct CountsDrop(Arc<AtomicUsize>, std::vec::IntoIter<ResponseFragment>);
    impl Iterator for CountsDrop {
        type Item = Result<ResponseFragment, ChatLoopError>;
        fn next(&mut self) -> Option<Self::Item> {
            self.1.next().map(Ok)
        }
    }
    impl Drop for CountsDrop {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let (opened_in, dropped_in) = (opened.clone(), dropped.clone());
    let mut stream = bridge_fragments(
        "counting",
        move || {
            opened_in.fetch_add(1, Ordering::SeqCst);
            let fragments = vec![ResponseFragment::text("a"), ResponseFragment::text("b")];
            Ok(Box::new(CountsDrop(dropped_in, fragments.into_iter())) as _)
        },
        BridgeOptions::default(),
        CancellationToken::new(),
    );
    assert!(stream.next().await.is_some());
    drop(stream);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(opened.load(Ordering::SeqCst), 1);
    assert_eq!(dropped.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn idle_timeout_yields_timeout_error() {
    let provider = ScriptedProvider::with_scripts(vec![vec![
        Step::Fragment(ResponseFragment::text("quick ")),
        Step::Sleep(Duration::from_millis(300)),
        Step::Fragment(ResponseFragment::text("too late")),
    ]]);
    let options = BridgeOptions {
        idle_timeout: Some(Duration::from_millis(50)),
    };

    let events = collect(run(&provider, options, CancellationToken::new())).await;

    assert_eq!(events.len(), 2);
    assert!(matches!(&events[0], Ok(StreamEvent::TextDelta { text }) if text == "quick "));
    assert!(matches!(&events[1], Err(ChatLoopError::Timeout(50))));
}

#[tokio::test]
async fn blocking_pulls_do_not_stall_the_scheduler() {
    let mut script = Vec::new();
    for _ in 0..3 {
        script.push(Step::Sleep(Duration::from_millis(50)));
        script.push(Step::Fragment(ResponseFragment::text("x")));
    }
    let provider = ScriptedProvider::with_scripts(vec![script]);

    let ticks = Arc::new(AtomicUsize::new(0));
    let ticker = {
        let ticks = ticks.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(5)).await;
                ticks.fetch_add(1, Ordering::SeqCst);
            }
        })
    };

    let events = collect(run(&provider, BridgeOptions::default(), CancellationToken::new())).await;
    ticker.abort();

    assert!(completion_of(&events).is_some());
    // The current-thread scheduler kept running other tasks during ~150ms of blocking.
    assert!(ticks.load(Ordering::SeqCst) >= 5);
}

#[tokio::test]
async fn worker_panic_becomes_provider_fault() {
    let stream = bridge_fragments(
        "panicky",
        || -> Result<chatloop::provider::FragmentSource, ChatLoopError> {
            panic!("driver crashed")
        },
        BridgeOptions::default(),
        CancellationToken::new(),
    );
    let events = collect(stream).await;

    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        Err(ChatLoopError::ProviderFault { provider, .. }) if provider == "panicky"
    ));
}
