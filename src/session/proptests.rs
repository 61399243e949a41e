//! Property-based tests for sessions
//!
//! These tests verify the loop's classification and accumulation invariants
//! across arbitrary inputs.

use super::testing::{
    frame, test_provider, InMemoryStore, MockConnection, PlainPresenter, ScriptedProvider,
};
use super::envelope::EnvelopeError;
use super::turn::excerpt;
use super::*;
use crate::db::Sender;
use proptest::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_text() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        "[a-zA-Z0-9 ,.!?]{1,40}",
        "\\PC{1,20}",
    ]
}

fn arb_deltas() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(prop_oneof![Just(String::new()), "\\PC{1,8}"], 0..12)
}

// ============================================================================
// Classification
// ============================================================================

proptest! {
    #[test]
    fn prop_envelopes_classify_by_text_and_thread(
        thread_id in prop_oneof![Just(String::new()), "[a-z0-9-]{1,16}"],
        text in arb_text(),
    ) {
        let raw = serde_json::json!({ "thread-id-chat": thread_id, "new-message": text }).to_string();
        match next_step(Ok(Some(raw))) {
            Step::Ignore => prop_assert!(text.is_empty()),
            Step::ProcessTurn(envelope) => {
                prop_assert!(!text.is_empty());
                prop_assert!(!thread_id.is_empty());
                prop_assert_eq!(envelope.thread_id, thread_id);
                prop_assert_eq!(envelope.text, text);
            }
            Step::Recover { error, .. } => {
                prop_assert!(!text.is_empty());
                prop_assert!(thread_id.is_empty());
                prop_assert!(matches!(error, EnvelopeError::MissingThreadId));
            }
            Step::Terminate(_) => prop_assert!(false, "frames never terminate"),
        }
    }

    #[test]
    fn prop_non_object_payloads_recover(raw in "[a-z]{1,20}") {
        let step = next_step(Ok(Some(raw)));
        prop_assert!(
            matches!(step, Step::Recover { thread_id: None, .. }),
            "expected recovery without a thread id, got {:?}",
            step
        );
    }
}

// ============================================================================
// Accumulation
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_final_content_is_concatenation_of_deltas(deltas in arb_deltas()) {
        let expected: String = deltas.concat();
        let relayed = deltas.iter().filter(|d| !d.is_empty()).count();

        let (content, chunks, excerpt_text) = runtime().block_on(async {
            let store = Arc::new(
                InMemoryStore::new()
                    .with_thread("t1")
                    .with_provider(test_provider()),
            );
            let script: Vec<&str> = deltas.iter().map(String::as_str).collect();
            let session = SessionLoop::new(
                store.clone(),
                Arc::new(ScriptedProvider::new().reply(&script)),
                Arc::new(PlainPresenter::default()),
                Duration::from_secs(5),
                CancellationToken::new(),
            );
            let hello = frame("t1", "Hello");
            let mut conn = MockConnection::new(vec![hello.as_str()]);
            session.run(&mut conn).await;

            let reply = store
                .messages("t1")
                .into_iter()
                .find(|m| m.sender == Sender::Model)
                .unwrap();
            let chunks = conn.sent().iter().filter(|s| s.starts_with("chunk:")).count();
            let excerpt_text = store.thread("t1").unwrap().last_message;
            (reply.content, chunks, excerpt_text)
        });

        prop_assert_eq!(&content, &expected);
        prop_assert_eq!(chunks, relayed);
        prop_assert_eq!(excerpt_text, excerpt(&expected));
    }

    #[test]
    fn prop_excerpt_is_char_prefix(text in "\\PC{0,40}") {
        let short = excerpt(&text);
        prop_assert!(text.starts_with(&short));
        prop_assert_eq!(short.chars().count(), text.chars().count().min(10));
    }
}
