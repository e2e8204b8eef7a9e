//! Tests for switchboard-core: types, events, error codes, retry/timeout

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use switchboard_core::retry::{
    is_transient_io_code, is_transient_message, is_transient_status, retry_with_backoff,
    with_timeout, RetryOptions,
};
use switchboard_core::{
    ApprovalDecision, ConversationId, Error, ErrorCode, Message, Role, RuntimeEvent, RuntimeInput,
};

// ===========================================================================
// ConversationId
// ===========================================================================

#[test]
fn conversation_id_basics() {
    let id = ConversationId::new("conv-1");
    assert_eq!(id.as_str(), "conv-1");
    assert_eq!(format!("{}", id), "conv-1");
    assert_eq!(id, ConversationId::from("conv-1"));
}

#[test]
fn conversation_id_round_trips_as_string() {
    let id = ConversationId::new("conv-7");
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"conv-7\"");
    let back: ConversationId = serde_json::from_str(&json).unwrap();
    assert_eq!(back, id);
}

// ===========================================================================
// Messages
// ===========================================================================

#[test]
fn message_constructors() {
    let user = Message::user("hi", Vec::new());
    assert_eq!(user.role, Role::User);
    assert!(user.attachments.is_none());
    assert!(!user.id.is_empty());

    let tool = Message::tool_result("tc-1", "42");
    assert_eq!(tool.role, Role::Tool);
    assert_eq!(tool.tool_call_id.as_deref(), Some("tc-1"));

    let assistant = Message::assistant("m-1", "triage", "hello");
    assert_eq!(assistant.id, "m-1");
    assert_eq!(assistant.agent_id.as_deref(), Some("triage"));
}

#[test]
fn message_wire_fields_are_camel_case() {
    let m = Message::assistant("m-1", "triage", "hello");
    let v = serde_json::to_value(&m).unwrap();
    assert!(v.get("createdAt").is_some());
    assert_eq!(v["agentId"], "triage");
    assert!(v.get("tool_calls").is_none());
}

#[test]
fn runtime_input_defaults() {
    let input: RuntimeInput =
        serde_json::from_str(r#"{"conversationId":"c1","message":"hi"}"#).unwrap();
    assert_eq!(input.conversation_id.as_str(), "c1");
    assert!(input.attachments.is_empty());
    assert!(input.frontend_tools.is_empty());
}

// ===========================================================================
// Error codes & events
// ===========================================================================

#[test]
fn error_codes_are_stable_strings() {
    let cases = [
        (ErrorCode::ToolInputInvalid, "TOOL_INPUT_INVALID"),
        (ErrorCode::ToolNotFound, "TOOL_NOT_FOUND"),
        (ErrorCode::ToolTimeout, "TOOL_TIMEOUT"),
        (ErrorCode::ToolExecutionFailed, "TOOL_EXECUTION_FAILED"),
        (ErrorCode::ToolResultTooLarge, "TOOL_RESULT_TOO_LARGE"),
        (ErrorCode::UserRejected, "USER_REJECTED"),
        (ErrorCode::ApprovalTimeout, "APPROVAL_TIMEOUT"),
        (ErrorCode::MaxIterationsExceeded, "MAX_ITERATIONS_EXCEEDED"),
        (ErrorCode::McpTimeout, "MCP_TIMEOUT"),
        (ErrorCode::Cancelled, "CANCELLED"),
        (ErrorCode::ProviderError, "PROVIDER_ERROR"),
        (ErrorCode::ConversationBusy, "CONVERSATION_BUSY"),
    ];
    for (code, expected) in cases {
        assert_eq!(code.as_str(), expected);
        assert_eq!(
            serde_json::to_string(&code).unwrap(),
            format!("\"{}\"", expected)
        );
    }
}

#[test]
fn event_wire_names() {
    let event = RuntimeEvent::TextDelta {
        message_id: "m-1".into(),
        delta: "Hel".into(),
    };
    let v = serde_json::to_value(&event).unwrap();
    assert_eq!(v["type"], "text-delta");
    assert_eq!(v["messageId"], "m-1");
    assert_eq!(v["delta"], "Hel");

    let event = RuntimeEvent::ToolCallStart {
        tool_call_id: "tc-1".into(),
        tool_name: "echo".into(),
        agent_id: "a".into(),
    };
    let v = serde_json::to_value(&event).unwrap();
    assert_eq!(v["type"], "tool-call-start");
    assert_eq!(v["toolCallId"], "tc-1");
    assert_eq!(v["toolName"], "echo");
    assert_eq!(v["agentId"], "a");

    let event = RuntimeEvent::AgentHandoff {
        from: "a".into(),
        to: "b".into(),
        reason: "needs b".into(),
        context: None,
    };
    let v = serde_json::to_value(&event).unwrap();
    assert_eq!(v["type"], "agent-handoff");
    assert!(v.get("context").is_none());
}

#[test]
fn event_round_trip() {
    let event = RuntimeEvent::ToolCallError {
        tool_call_id: "tc-9".into(),
        error: "no".into(),
        code: ErrorCode::UserRejected,
    };
    let json = serde_json::to_string(&event).unwrap();
    let back: RuntimeEvent = serde_json::from_str(&json).unwrap();
    match back {
        RuntimeEvent::ToolCallError { code, .. } => assert_eq!(code, ErrorCode::UserRejected),
        other => panic!("unexpected event: {:?}", other),
    }
}

#[test]
fn event_terminality() {
    assert!(RuntimeEvent::TextComplete {
        message_id: "m".into(),
        content: "done".into()
    }
    .is_terminal());
    assert!(RuntimeEvent::error("boom", ErrorCode::ProviderError).is_terminal());
    assert!(!RuntimeEvent::AgentHandoff {
        from: "a".into(),
        to: "b".into(),
        reason: "r".into(),
        context: None
    }
    .is_terminal());
    assert!(!RuntimeEvent::TextDelta {
        message_id: "m".into(),
        delta: "x".into()
    }
    .is_terminal());
}

#[test]
fn sse_frame_layout() {
    let event = RuntimeEvent::TextDelta {
        message_id: "m-1".into(),
        delta: "Hel".into(),
    };
    let frame = event.to_sse_frame();
    assert!(frame.starts_with("event: text-delta\ndata: {"));
    assert!(frame.ends_with("\n\n"));
    let data_line = frame.lines().nth(1).unwrap();
    let body: serde_json::Value =
        serde_json::from_str(data_line.strip_prefix("data: ").unwrap()).unwrap();
    assert_eq!(body["type"], "text-delta");
}

#[test]
fn approval_decision_constructors() {
    assert!(ApprovalDecision::approve().approved);
    let rejected = ApprovalDecision::reject("no");
    assert!(!rejected.approved);
    assert_eq!(rejected.reason.as_deref(), Some("no"));
    assert_eq!(rejected.code, Some(ErrorCode::UserRejected));
    assert_eq!(
        ApprovalDecision::denied(ErrorCode::Cancelled).code,
        Some(ErrorCode::Cancelled)
    );
}

// ===========================================================================
// Retry
// ===========================================================================

fn no_jitter(max_attempts: u32) -> RetryOptions {
    RetryOptions {
        max_attempts,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(50),
        multiplier: 2.0,
        jitter: false,
    }
}

#[tokio::test]
async fn retry_invokes_at_most_max_attempts() {
    let calls = AtomicU32::new(0);
    let result: Result<(), String> = retry_with_backoff(&no_jitter(3), |_| true, |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err("always".to_string()) }
    })
    .await;
    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn retry_stops_on_success() {
    let calls = AtomicU32::new(0);
    let result: Result<u32, String> = retry_with_backoff(&no_jitter(5), |_| true, |attempt| {
        calls.fetch_add(1, Ordering::SeqCst);
        async move {
            if attempt < 3 {
                Err("transient".to_string())
            } else {
                Ok(attempt)
            }
        }
    })
    .await;
    assert_eq!(result.unwrap(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn retry_fails_fast_when_not_retryable() {
    let calls = AtomicU32::new(0);
    let result: Result<(), String> = retry_with_backoff(&no_jitter(5), |_| false, |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err("fatal".to_string()) }
    })
    .await;
    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn backoff_delays_monotonic_and_clamped() {
    let opts = RetryOptions {
        max_attempts: 10,
        initial_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(1),
        multiplier: 2.0,
        jitter: false,
    };
    let mut prev = Duration::ZERO;
    for attempt in 1..=8 {
        let delay = opts.delay_for_attempt(attempt);
        assert!(delay >= prev, "delay decreased at attempt {}", attempt);
        assert!(delay <= opts.max_delay);
        prev = delay;
    }
    assert_eq!(opts.delay_for_attempt(1), Duration::from_millis(100));
    assert_eq!(opts.delay_for_attempt(2), Duration::from_millis(200));
    assert_eq!(opts.delay_for_attempt(8), Duration::from_secs(1)); // clamped
}

#[test]
fn transient_classifier_table() {
    assert!(is_transient_status(408));
    assert!(is_transient_status(429));
    assert!(is_transient_status(500));
    assert!(is_transient_status(503));
    assert!(is_transient_status(599));
    assert!(!is_transient_status(400));
    assert!(!is_transient_status(401));
    assert!(!is_transient_status(404));

    assert!(is_transient_io_code("ECONNRESET"));
    assert!(is_transient_io_code("ETIMEDOUT"));
    assert!(is_transient_io_code("EAI_AGAIN"));
    assert!(is_transient_io_code("UND_ERR_CONNECT_TIMEOUT"));
    assert!(!is_transient_io_code("EACCES"));

    assert!(is_transient_message("Request Timed Out"));
    assert!(is_transient_message("rate limit exceeded"));
    assert!(is_transient_message("service temporarily unavailable"));
    assert!(is_transient_message("TypeError: fetch failed"));
    assert!(is_transient_message("network error"));
    assert!(!is_transient_message("invalid api key"));
}

// ===========================================================================
// Timeout wrapper
// ===========================================================================

#[tokio::test]
async fn with_timeout_passes_through_fast_ops() {
    let value = with_timeout(
        async { 7 },
        Duration::from_secs(1),
        "fast op",
        ErrorCode::ToolTimeout,
    )
    .await
    .unwrap();
    assert_eq!(value, 7);
}

#[tokio::test]
async fn with_timeout_fails_with_label_and_code() {
    let result = with_timeout(
        tokio::time::sleep(Duration::from_secs(5)),
        Duration::from_millis(10),
        "tool execution timed out",
        ErrorCode::ToolTimeout,
    )
    .await;
    match result {
        Err(Error::Timeout { label, code }) => {
            assert_eq!(label, "tool execution timed out");
            assert_eq!(code, ErrorCode::ToolTimeout);
        }
        other => panic!("expected timeout, got {:?}", other.map(|_| ())),
    }
}
