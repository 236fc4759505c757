//! End-to-end conversation flows over in-process gateways

use async_trait::async_trait;
use confab::config::ConfabConfig;
use confab::gateway::{
    AudioStream, GatewayError, Gateways, GenerationGateway, LoopbackGeneration, LoopbackSynthesis,
    LoopbackTranscription, PromptContext, SynthesisGateway, TextStream,
};
use confab::history::{FailureCause, TurnStatus};
use confab::pipeline::InputPayload;
use confab::profile::{PersonalityProfile, StaticProfileStore};
use confab::session::{SessionEvent, SessionManager, SessionState};
use confab::ConfabError;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::Notify;

fn profiles() -> Arc<StaticProfileStore> {
    let store = StaticProfileStore::new();
    store.register(
        PersonalityProfile::new("default", "You are a concise voice assistant.")
            .with_voice("en-default"),
    );
    Arc::new(store)
}

fn manager_with(config: ConfabConfig, gateways: Gateways) -> SessionManager {
    SessionManager::new(
        config,
        gateways,
        profiles(),
        Arc::new(confab::history::MemoryTurnLog::new()),
    )
    .unwrap()
}

fn slow_gateways(chunk_delay: Duration) -> Gateways {
    Gateways {
        transcription: Arc::new(LoopbackTranscription::new()),
        generation: Arc::new(LoopbackGeneration::new().with_chunk_delay(chunk_delay)),
        synthesis: Arc::new(LoopbackSynthesis::new()),
    }
}

/// Collect events until the session settles back into the given state.
async fn drain_until_rest(
    events: &mut broadcast::Receiver<SessionEvent>,
    rest: SessionState,
) -> Vec<SessionEvent> {
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .expect("timed out waiting for events")
            .expect("event channel closed");
        let done = matches!(event, SessionEvent::StateChanged { to, .. } if to == rest);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

fn states(events: &[SessionEvent]) -> Vec<SessionState> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::StateChanged { to, .. } => Some(*to),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn text_turn_walks_the_state_machine() {
    let mgr = manager_with(ConfabConfig::default(), Gateways::loopback());
    let sid = mgr.start_session("default", false).await.unwrap();
    let mut events = mgr.subscribe(sid).unwrap();

    mgr.submit_input(sid, InputPayload::Text("turn 1 text".into()))
        .await
        .unwrap();
    let seen = drain_until_rest(&mut events, SessionState::Idle).await;

    // Text input skips Transcribing
    let walked = states(&seen);
    assert_eq!(
        walked,
        vec![
            SessionState::Generating,
            SessionState::Synthesizing,
            SessionState::Speaking,
            SessionState::Idle,
        ]
    );

    // Output chunks arrive in non-decreasing sequence order
    let seqs: Vec<u64> = seen
        .iter()
        .filter_map(|e| match e {
            SessionEvent::OutputChunk { seq, .. } => Some(*seq),
            _ => None,
        })
        .collect();
    assert!(!seqs.is_empty());
    assert!(seqs.windows(2).all(|w| w[0] <= w[1]));

    // Exactly one completed turn in history
    let turns = mgr.history().turns(sid);
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].status, TurnStatus::Completed);
    assert_eq!(turns[0].transcript, "turn 1 text");
    assert!(turns[0].audio_ref.is_some());
}

#[tokio::test]
async fn audio_input_is_transcribed_first() {
    let mgr = manager_with(ConfabConfig::default(), Gateways::loopback());
    let sid = mgr.start_session("default", false).await.unwrap();
    let mut events = mgr.subscribe(sid).unwrap();

    mgr.submit_input(sid, InputPayload::Audio(b"hello from audio".to_vec()))
        .await
        .unwrap();
    let seen = drain_until_rest(&mut events, SessionState::Idle).await;

    assert_eq!(states(&seen)[0], SessionState::Transcribing);
    assert!(seen.iter().any(|e| matches!(
        e,
        SessionEvent::Transcript { text, .. } if text == "hello from audio"
    )));

    let turns = mgr.history().turns(sid);
    assert_eq!(turns[0].transcript, "hello from audio");
}

#[tokio::test(start_paused = true)]
async fn submit_while_busy_is_rejected_without_continuous_mode() {
    let mgr = manager_with(
        ConfabConfig::default(),
        slow_gateways(Duration::from_millis(100)),
    );
    let sid = mgr.start_session("default", false).await.unwrap();
    let mut events = mgr.subscribe(sid).unwrap();

    mgr.submit_input(sid, InputPayload::Text("first".into()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = mgr
        .submit_input(sid, InputPayload::Text("second".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, ConfabError::InvalidState(_)));

    // The first turn is unaffected and completes normally
    drain_until_rest(&mut events, SessionState::Idle).await;
    let turns = mgr.history().turns(sid);
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].status, TurnStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn continuous_mode_barge_in_replaces_the_turn() {
    let mgr = manager_with(
        ConfabConfig::default(),
        slow_gateways(Duration::from_millis(100)),
    );
    let sid = mgr.start_session("default", true).await.unwrap();
    let mut events = mgr.subscribe(sid).unwrap();

    let first = mgr
        .submit_input(sid, InputPayload::Text("first".into()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let second = mgr
        .submit_input(sid, InputPayload::Text("second".into()))
        .await
        .unwrap();
    assert_ne!(first, second);
    let seen = drain_until_rest(&mut events, SessionState::Listening).await;

    // The replaced turn resolves through the Interrupted hop
    assert!(states(&seen).contains(&SessionState::Interrupted));
    assert!(seen
        .iter()
        .any(|e| matches!(e, SessionEvent::TurnInterrupted { turn_id } if *turn_id == first)));

    // Wait for the second turn to finish as well
    if !mgr
        .history()
        .turns(sid)
        .iter()
        .any(|t| t.id == second && t.status == TurnStatus::Completed)
    {
        drain_until_rest(&mut events, SessionState::Listening).await;
    }

    let turns = mgr.history().turns(sid);
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].status, TurnStatus::Interrupted);
    assert_eq!(turns[1].status, TurnStatus::Completed);
    assert_eq!(turns[1].transcript, "second");
    // Interrupted turns never carry audio
    assert!(turns[0].audio_ref.is_none());
}

#[tokio::test(start_paused = true)]
async fn slow_synthesis_outlasting_reorder_window_still_delivers() {
    // Synthesis takes far longer than the reorder window; the window
    // expiring must not let the end-of-turn marker cut off chunks that
    // are still being synthesized.
    let gateways = Gateways {
        transcription: Arc::new(LoopbackTranscription::new()),
        generation: Arc::new(LoopbackGeneration::new()),
        synthesis: Arc::new(LoopbackSynthesis::new().with_chunk_delay(Duration::from_millis(400))),
    };
    let mgr = manager_with(
        ConfabConfig::default().with_reorder_window(Duration::from_millis(50)),
        gateways,
    );
    let sid = mgr.start_session("default", false).await.unwrap();
    let mut events = mgr.subscribe(sid).unwrap();

    mgr.submit_input(sid, InputPayload::Text("take your time".into()))
        .await
        .unwrap();
    let seen = drain_until_rest(&mut events, SessionState::Idle).await;

    // Both sentences come through, in order, before the turn completes
    let seqs: Vec<u64> = seen
        .iter()
        .filter_map(|e| match e {
            SessionEvent::OutputChunk { seq, .. } => Some(*seq),
            _ => None,
        })
        .collect();
    assert_eq!(seqs, vec![0, 1]);

    let turns = mgr.history().turns(sid);
    assert_eq!(turns[0].status, TurnStatus::Completed);
    assert!(turns[0].audio_ref.is_some());
}

/// Synthesis gateway that blocks its second call until released,
/// pinning the session in Speaking with a turn still in flight.
struct GatedSynthesis {
    inner: LoopbackSynthesis,
    calls: AtomicU32,
    release: Arc<Notify>,
}

#[async_trait]
impl SynthesisGateway for GatedSynthesis {
    async fn synthesize(
        &self,
        text: &str,
        voice_id: &str,
    ) -> Result<AudioStream, GatewayError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) >= 1 {
            self.release.notified().await;
        }
        self.inner.synthesize(text, voice_id).await
    }
}

#[tokio::test]
async fn interrupt_while_speaking_records_interrupted_turn() {
    let release = Arc::new(Notify::new());
    let gateways = Gateways {
        transcription: Arc::new(LoopbackTranscription::new()),
        generation: Arc::new(LoopbackGeneration::new()),
        synthesis: Arc::new(GatedSynthesis {
            inner: LoopbackSynthesis::new(),
            calls: AtomicU32::new(0),
            release: Arc::clone(&release),
        }),
    };
    let mgr = manager_with(ConfabConfig::default(), gateways);
    let sid = mgr.start_session("default", false).await.unwrap();
    let mut events = mgr.subscribe(sid).unwrap();

    let turn_id = mgr
        .submit_input(sid, InputPayload::Text("hold on".into()))
        .await
        .unwrap();

    // First sentence is delivered, second synthesis call is gated
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .expect("never reached Speaking")
            .unwrap();
        if matches!(
            event,
            SessionEvent::StateChanged {
                to: SessionState::Speaking,
                ..
            }
        ) {
            break;
        }
    }
    assert_eq!(mgr.session_state(sid).unwrap(), SessionState::Speaking);

    mgr.interrupt(sid).await.unwrap();
    release.notify_waiters();

    assert_eq!(mgr.session_state(sid).unwrap(), SessionState::Idle);
    let turns = mgr.history().turns(sid);
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].id, turn_id);
    assert_eq!(turns[0].status, TurnStatus::Interrupted);
}

/// Fails the first generation call terminally, then behaves normally.
struct FlakyGeneration {
    inner: LoopbackGeneration,
    calls: AtomicU32,
}

#[async_trait]
impl GenerationGateway for FlakyGeneration {
    async fn generate(&self, ctx: PromptContext) -> Result<TextStream, GatewayError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(GatewayError::Terminal("model exploded".into()));
        }
        self.inner.generate(ctx).await
    }
}

#[tokio::test]
async fn generation_failure_leaves_session_usable() {
    let gateways = Gateways {
        transcription: Arc::new(LoopbackTranscription::new()),
        generation: Arc::new(FlakyGeneration {
            inner: LoopbackGeneration::new(),
            calls: AtomicU32::new(0),
        }),
        synthesis: Arc::new(LoopbackSynthesis::new()),
    };
    let mgr = manager_with(ConfabConfig::default(), gateways);
    let sid = mgr.start_session("default", true).await.unwrap();
    let mut events = mgr.subscribe(sid).unwrap();

    mgr.submit_input(sid, InputPayload::Text("doomed".into()))
        .await
        .unwrap();
    let seen = drain_until_rest(&mut events, SessionState::Listening).await;

    assert!(seen.iter().any(|e| matches!(
        e,
        SessionEvent::TurnFailed {
            cause: FailureCause::Generation,
            ..
        }
    )));

    let turns = mgr.history().turns(sid);
    assert_eq!(turns.len(), 1);
    assert_eq!(
        turns[0].status,
        TurnStatus::Failed {
            cause: FailureCause::Generation
        }
    );
    // Zero-content audit record
    assert!(turns[0].transcript.is_empty());
    assert!(turns[0].response.is_empty());

    // The session recovered; the next turn works
    mgr.submit_input(sid, InputPayload::Text("retry".into()))
        .await
        .unwrap();
    drain_until_rest(&mut events, SessionState::Listening).await;
    let turns = mgr.history().turns(sid);
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[1].status, TurnStatus::Completed);
    // The failed turn contributed nothing to the prompt context
    let (_, exchanges) = mgr.history().context(sid);
    assert_eq!(exchanges.len(), 1);
}

#[tokio::test]
async fn history_keeps_only_the_configured_budget() {
    let mgr = manager_with(
        ConfabConfig::default().with_history_budget(3, 100_000),
        Gateways::loopback(),
    );
    let sid = mgr.start_session("default", false).await.unwrap();

    for i in 0..5 {
        let mut events = mgr.subscribe(sid).unwrap();
        mgr.submit_input(sid, InputPayload::Text(format!("question {i}")))
            .await
            .unwrap();
        drain_until_rest(&mut events, SessionState::Idle).await;
    }

    let turns = mgr.history().turns(sid);
    assert_eq!(turns.len(), 3);
    let transcripts: Vec<&str> = turns.iter().map(|t| t.transcript.as_str()).collect();
    assert_eq!(transcripts, vec!["question 2", "question 3", "question 4"]);

    // The audit log still has all five
    assert_eq!(mgr.history().load(sid).unwrap().len(), 5);
}

#[tokio::test(start_paused = true)]
async fn close_session_cancels_the_inflight_turn() {
    let mgr = manager_with(
        ConfabConfig::default(),
        slow_gateways(Duration::from_millis(100)),
    );
    let sid = mgr.start_session("default", false).await.unwrap();

    mgr.submit_input(sid, InputPayload::Text("never finishes".into()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    mgr.close_session(sid).await.unwrap();
    assert!(matches!(
        mgr.session_state(sid),
        Err(ConfabError::SessionNotFound(_))
    ));
    assert_eq!(mgr.session_count(), 0);
}

#[tokio::test]
async fn idle_sessions_are_evicted() {
    // Idle tracking is wall-clock, so this test uses real time
    let mgr = manager_with(
        ConfabConfig::default().with_idle_timeout(Duration::from_millis(50)),
        Gateways::loopback(),
    );
    let sid = mgr.start_session("default", false).await.unwrap();

    assert_eq!(mgr.evict_idle().await, 0);
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(mgr.evict_idle().await, 1);
    assert!(mgr.subscribe(sid).is_err());
}
