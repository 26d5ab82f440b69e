mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    FakeAudio, FakeTransport, Recorded, RecordingHandler, agent_audio, init_tracing, wait_until,
};
use duplex_voice::{
    AudioFormat, CaptureStats, ClientMessage, EncodedChunk, ServerEvent, SessionState, ToolCall,
    ToolDeclaration, TranscriptSnapshot, VoiceError, VoiceSession, VoiceSessionBuilder,
};
use serde_json::json;

struct Harness {
    session: VoiceSession,
    net: FakeTransport,
    audio: FakeAudio,
    handler: RecordingHandler,
}

fn harness_with(configure: impl FnOnce(VoiceSessionBuilder) -> VoiceSessionBuilder) -> Harness {
    init_tracing();
    let net = FakeTransport::default();
    let audio = FakeAudio::default();
    let handler = RecordingHandler::default();
    let builder = VoiceSession::builder()
        .transport(Arc::new(net.clone()))
        .audio(Arc::new(audio.clone()))
        .event_handler(handler.clone());
    let session = configure(builder).build().unwrap();
    Harness { session, net, audio, handler }
}

fn harness() -> Harness {
    harness_with(|b| b)
}

#[tokio::test]
async fn test_connect_starts_listening_and_muted() {
    let h = harness();
    assert_eq!(h.session.state(), SessionState::Idle);

    h.session.connect().await.unwrap();

    assert_eq!(h.session.state(), SessionState::Listening);
    assert!(h.session.is_muted());
    assert_eq!(h.net.link_count(), 1);

    wait_until(|| h.handler.events().len() >= 2).await;
    assert_eq!(
        h.handler.events()[..2],
        [Recorded::State(SessionState::Connecting), Recorded::State(SessionState::Listening)]
    );
}

#[tokio::test]
async fn test_connect_twice_is_rejected() {
    let h = harness();
    h.session.connect().await.unwrap();

    let err = h.session.connect().await.unwrap_err();
    assert!(matches!(err, VoiceError::AlreadyConnected));
    assert_eq!(h.net.link_count(), 1);
}

#[tokio::test]
async fn test_fragments_play_back_to_back() {
    let h = harness();
    h.session.connect().await.unwrap();
    let link = h.net.last_link();

    for _ in 0..3 {
        link.push(agent_audio(0.5));
    }
    wait_until(|| h.audio.scheduled().len() == 3).await;

    let starts: Vec<f64> = h.audio.scheduled().iter().map(|s| s.start).collect();
    assert_eq!(starts, vec![0.0, 0.5, 1.0]);
    assert!((h.session.next_playback_time().unwrap() - 1.5).abs() < 1e-9);
    assert!(h.session.is_speaking());

    for entry in h.audio.scheduled() {
        h.audio.finish(entry.id);
    }
    wait_until(|| !h.session.is_speaking()).await;
    assert_eq!(h.session.active_playback(), 0);

    wait_until(|| h.handler.events().contains(&Recorded::Speaking(false))).await;
    let speaking: Vec<Recorded> =
        h.handler.events().into_iter().filter(|e| matches!(e, Recorded::Speaking(_))).collect();
    assert_eq!(speaking, vec![Recorded::Speaking(true), Recorded::Speaking(false)]);
}

#[tokio::test]
async fn test_late_fragment_starts_at_device_clock() {
    let h = harness();
    h.session.connect().await.unwrap();
    let link = h.net.last_link();

    link.push(agent_audio(0.5));
    wait_until(|| h.audio.scheduled().len() == 1).await;

    h.audio.set_time(3.0);
    link.push(agent_audio(0.5));
    wait_until(|| h.audio.scheduled().len() == 2).await;

    assert_eq!(h.audio.scheduled()[1].start, 3.0);
}

#[tokio::test(start_paused = true)]
async fn test_slow_tool_does_not_block_audio() {
    let h = harness_with(|b| {
        b.tool_async(ToolDeclaration::new("draw_scene"), |call: ToolCall| async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok(json!({ "status": "drawn", "prompt": call.arguments["prompt"] }))
        })
    });
    h.session.connect().await.unwrap();
    let link = h.net.last_link();

    link.push(ServerEvent::ToolCall(vec![ToolCall::new(
        "call-1",
        "draw_scene",
        json!({ "prompt": "a red car" }),
    )]));
    link.push(agent_audio(0.5));

    wait_until(|| h.audio.scheduled().len() == 1).await;
    assert!(link.tool_responses().is_empty(), "audio must be scheduled before the tool finishes");
    assert_eq!(h.session.pending_tool_calls(), 1);

    tokio::time::sleep(Duration::from_secs(3)).await;
    let responses = link.tool_responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].call_id, "call-1");
    assert_eq!(responses[0].name, "draw_scene");
    assert_eq!(responses[0].output, json!({ "status": "drawn", "prompt": "a red car" }));
    assert!(h.handler.events().contains(&Recorded::ToolCall("call-1".into())));
}

#[tokio::test]
async fn test_registered_tools_are_declared() {
    let h = harness_with(|b| {
        b.instruction("Draw what the user describes.").tool_fn(
            ToolDeclaration::new("clear_canvas"),
            |_: &ToolCall| Ok(json!({ "cleared": true })),
        )
    });
    h.session.connect().await.unwrap();

    let config = h.net.state.last_config.lock().clone().unwrap();
    assert_eq!(config.tools.len(), 1);
    assert_eq!(config.tools[0].name, "clear_canvas");
    assert_eq!(config.instruction.as_deref(), Some("Draw what the user describes."));
}

#[tokio::test]
async fn test_failing_and_unknown_tools_get_error_responses() {
    let h = harness_with(|b| {
        b.tool_fn(ToolDeclaration::new("draw_scene"), |_: &ToolCall| {
            Err(VoiceError::tool("image service unavailable"))
        })
    });
    h.session.connect().await.unwrap();
    let link = h.net.last_link();

    link.push(ServerEvent::ToolCall(vec![
        ToolCall::new("a", "draw_scene", json!({})),
        ToolCall::new("b", "teleport", json!({})),
    ]));
    wait_until(|| link.tool_responses().len() == 2).await;

    let mut responses = link.tool_responses();
    responses.sort_by(|x, y| x.call_id.cmp(&y.call_id));
    assert!(responses[0].output["error"].as_str().unwrap().contains("image service unavailable"));
    assert_eq!(responses[1].output["error"], "Unknown tool: teleport");
    assert_eq!(h.session.state(), SessionState::Listening);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_tool_call_gets_no_response() {
    let h = harness_with(|b| {
        b.tool_async(ToolDeclaration::new("slow"), |_call: ToolCall| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!("late"))
        })
    });
    h.session.connect().await.unwrap();
    let link = h.net.last_link();

    link.push(ServerEvent::ToolCall(vec![ToolCall::new("gone", "slow", json!({}))]));
    wait_until(|| h.session.pending_tool_calls() == 1).await;
    link.push(ServerEvent::ToolCallCancelled(vec!["gone".into()]));
    wait_until(|| h.session.pending_tool_calls() == 0).await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(link.tool_responses().is_empty());
}

#[tokio::test]
async fn test_transcripts_accumulate_until_turn_complete() {
    let h = harness();
    h.session.connect().await.unwrap();
    let link = h.net.last_link();

    link.push(ServerEvent::InputTranscription("Draw ".into()));
    link.push(ServerEvent::InputTranscription("a car".into()));
    link.push(ServerEvent::OutputTranscription("Okay".into()));
    link.push(ServerEvent::TurnComplete);
    link.push(ServerEvent::OutputTranscription("Next".into()));
    wait_until(|| h.handler.transcripts().len() == 5).await;

    let transcripts = h.handler.transcripts();
    assert_eq!(transcripts[1].input, "Draw a car");
    assert!(!transcripts[2].is_final);
    assert_eq!(
        transcripts[3],
        TranscriptSnapshot { input: "Draw a car".into(), output: "Okay".into(), is_final: true }
    );
    assert_eq!(
        transcripts[4],
        TranscriptSnapshot { input: String::new(), output: "Next".into(), is_final: false }
    );
}

#[tokio::test]
async fn test_malformed_fragment_is_dropped() {
    let h = harness();
    h.session.connect().await.unwrap();
    let link = h.net.last_link();

    link.push(ServerEvent::Audio(EncodedChunk::new(AudioFormat::pcm16_24khz(), "!!not base64!!")));
    // Three bytes decode fine as base64 but are not whole samples.
    link.push(ServerEvent::Audio(EncodedChunk::new(AudioFormat::pcm16_24khz(), "AAAA")));
    link.push(agent_audio(0.1));

    wait_until(|| h.audio.scheduled().len() == 1).await;
    wait_until(|| h.handler.errors().len() == 2).await;
    assert!(h.handler.errors().iter().all(|e| e.contains("Malformed audio chunk")));
    assert_eq!(h.audio.scheduled()[0].start, 0.0);
    assert_eq!(h.session.state(), SessionState::Listening);
}

#[tokio::test]
async fn test_mute_stops_playback_and_capture() {
    let h = harness();
    h.session.connect().await.unwrap();
    let link = h.net.last_link();

    h.session.set_muted(false).unwrap();
    assert_eq!(h.session.state(), SessionState::Active);

    h.audio.capture(&[0.1; 4096]);
    assert_eq!(link.audio_sent(), 1);
    match &link.sent()[0] {
        ClientMessage::RealtimeAudio(chunk) => {
            assert_eq!(chunk.mime_type(), "audio/pcm;rate=16000")
        }
        other => panic!("Expected RealtimeAudio, got {other:?}"),
    }

    link.push(agent_audio(1.0));
    link.push(agent_audio(1.0));
    wait_until(|| h.audio.scheduled().len() == 2).await;

    h.audio.capture(&[0.1; 1000]);
    h.session.set_muted(true).unwrap();

    assert_eq!(h.session.state(), SessionState::Listening);
    assert_eq!(h.session.active_playback(), 0);
    assert_eq!(h.audio.cancelled().len(), 2);
    assert!(!h.session.is_speaking());

    // Muted capture is discarded, not queued.
    h.audio.capture(&[0.1; 8192]);
    assert_eq!(link.audio_sent(), 1);

    // The partial batch from before muting was dropped too.
    h.session.set_muted(false).unwrap();
    h.audio.capture(&[0.1; 3096]);
    assert_eq!(link.audio_sent(), 1);
    h.audio.capture(&[0.1; 1000]);
    assert_eq!(link.audio_sent(), 2);
    assert_eq!(h.session.capture_stats(), Some(CaptureStats { sent: 2, discarded: 0 }));
}

#[tokio::test]
async fn test_toggle_mute_and_stop_playback() {
    let h = harness();
    assert!(matches!(h.session.toggle_mute(), Err(VoiceError::NotConnected)));
    assert!(matches!(h.session.stop_playback(), Err(VoiceError::NotConnected)));
    assert_eq!(h.session.capture_stats(), None);

    h.session.connect().await.unwrap();
    let link = h.net.last_link();

    assert!(!h.session.toggle_mute().unwrap());
    assert_eq!(h.session.state(), SessionState::Active);

    link.push(agent_audio(0.5));
    link.push(agent_audio(0.5));
    wait_until(|| h.audio.scheduled().len() == 2).await;

    // Stopping playback leaves the microphone open.
    assert_eq!(h.session.stop_playback().unwrap(), 2);
    assert_eq!(h.session.active_playback(), 0);
    assert!(!h.session.is_muted());
    assert_eq!(h.session.state(), SessionState::Active);

    assert!(h.session.toggle_mute().unwrap());
    assert_eq!(h.session.state(), SessionState::Listening);
}

#[tokio::test]
async fn test_interruption_stops_playback() {
    let h = harness();
    h.session.connect().await.unwrap();
    let link = h.net.last_link();

    link.push(agent_audio(1.0));
    link.push(agent_audio(1.0));
    wait_until(|| h.audio.scheduled().len() == 2).await;

    h.audio.set_time(0.4);
    link.push(ServerEvent::Interrupted);
    wait_until(|| h.session.active_playback() == 0).await;

    assert_eq!(h.audio.cancelled().len(), 2);
    assert!((h.session.next_playback_time().unwrap() - 0.4).abs() < 1e-9);
    assert_eq!(h.session.state(), SessionState::Listening);
}

#[tokio::test]
async fn test_disconnect_releases_everything_once() {
    let h = harness();
    h.session.connect().await.unwrap();
    let link = h.net.last_link();

    h.session.disconnect().await.unwrap();
    h.session.disconnect().await.unwrap();

    assert_eq!(h.session.state(), SessionState::Closed);
    assert_eq!(h.audio.input_closes(), 1);
    assert_eq!(h.audio.output_closes(), 1);
    assert_eq!(link.close_count(), 1);

    assert!(matches!(h.session.send_text("hello"), Err(VoiceError::NotConnected)));
    assert!(matches!(h.session.set_muted(false), Err(VoiceError::NotConnected)));
}

#[tokio::test]
async fn test_disconnect_without_connect() {
    let h = harness();
    h.session.disconnect().await.unwrap();
    assert_eq!(h.session.state(), SessionState::Closed);
    assert_eq!(h.audio.output_closes(), 0);
}

#[tokio::test]
async fn test_transport_failure_enters_error_state() {
    let h = harness();
    h.net.refuse(true);

    let err = h.session.connect().await.unwrap_err();
    assert!(matches!(err, VoiceError::ConnectionError(_)));
    assert!(matches!(h.session.state(), SessionState::Error(_)));
    assert_eq!(h.audio.output_closes(), 1);
    assert_eq!(h.audio.state.inputs_opened.load(std::sync::atomic::Ordering::SeqCst), 0);

    h.net.refuse(false);
    h.session.connect().await.unwrap();
    assert_eq!(h.session.state(), SessionState::Listening);
}

#[tokio::test]
async fn test_microphone_failure_enters_error_state() {
    let h = harness();
    h.audio.state.deny_microphone.store(true, std::sync::atomic::Ordering::SeqCst);

    let err = h.session.connect().await.unwrap_err();
    assert!(matches!(err, VoiceError::DeviceError(_)));
    assert!(matches!(
        h.session.state(),
        SessionState::Error(ref m) if m.contains("permission denied")
    ));

    let link = h.net.last_link();
    assert_eq!(link.close_count(), 1);
    assert_eq!(h.audio.output_closes(), 1);

    wait_until(|| !h.handler.errors().is_empty()).await;
    assert!(h.handler.errors()[0].contains("Audio device error"));
}

#[tokio::test]
async fn test_remote_hang_up_tears_down_and_allows_reconnect() {
    let h = harness();
    h.session.connect().await.unwrap();
    h.session.set_muted(false).unwrap();
    let first = h.net.last_link();

    first.hang_up();
    wait_until(|| matches!(h.session.state(), SessionState::Error(_))).await;

    assert_eq!(first.close_count(), 1);
    assert_eq!(h.audio.input_closes(), 1);
    assert_eq!(h.audio.output_closes(), 1);
    assert!(h.session.is_muted());

    h.session.connect().await.unwrap();
    assert_eq!(h.net.link_count(), 2);
    assert_eq!(h.session.state(), SessionState::Listening);

    h.session.disconnect().await.unwrap();
    assert_eq!(first.close_count(), 1);
    assert_eq!(h.net.last_link().close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_remote_close_does_not_clobber_reconnect() {
    let h = harness();
    h.net.slow_close(Duration::from_millis(300));
    h.session.connect().await.unwrap();
    let first = h.net.last_link();

    first.hang_up();
    // Teardown of the dead link is now in progress.
    wait_until(|| first.close_count() == 1).await;

    h.session.disconnect().await.unwrap();
    assert_eq!(h.session.state(), SessionState::Closed);
    assert_eq!(h.audio.input_closes(), 1);

    h.session.connect().await.unwrap();
    assert_eq!(h.session.state(), SessionState::Listening);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.session.state(), SessionState::Listening);
    h.session.set_muted(false).unwrap();
    assert!(!h.session.is_muted());

    h.session.disconnect().await.unwrap();
    assert_eq!(h.audio.inputs_opened(), 2);
    assert_eq!(h.audio.input_closes(), 2);
    assert_eq!(h.audio.output_closes(), 2);
    assert_eq!(h.net.last_link().close_count(), 1);

    let states: Vec<_> = h
        .handler
        .events()
        .into_iter()
        .filter_map(|e| match e {
            Recorded::State(state) => Some(state),
            _ => None,
        })
        .collect();
    let error_at = states.iter().position(|s| matches!(s, SessionState::Error(_))).unwrap();
    let closed_at = states.iter().position(|s| *s == SessionState::Closed).unwrap();
    assert!(error_at < closed_at);
}

#[tokio::test]
async fn test_protocol_noise_is_contained() {
    let h = harness();
    h.session.connect().await.unwrap();
    let link = h.net.last_link();

    link.push_error(VoiceError::protocol("unparseable server frame"));
    link.push(ServerEvent::ModelText("still here".into()));
    link.push(ServerEvent::GoAway { time_left: Some("5s".into()) });

    wait_until(|| h.handler.events().contains(&Recorded::GoAway(Some("5s".into())))).await;
    assert!(h.handler.events().contains(&Recorded::Text("still here".into())));
    assert_eq!(h.session.state(), SessionState::Listening);
}

#[tokio::test]
async fn test_send_text_and_image() {
    let h = harness();
    h.session.connect().await.unwrap();
    let link = h.net.last_link();

    h.session.send_text("Make it blue").unwrap();
    h.session.send_image(&[0xff, 0xd8, 0xff], "image/jpeg", Some("What is this?")).unwrap();
    assert!(matches!(
        h.session.send_image(&[1, 2, 3], "text/plain", None),
        Err(VoiceError::ConfigError(_))
    ));

    let sent = link.sent();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[0], ClientMessage::Text { text: "Make it blue".into(), turn_complete: true });
    assert_eq!(
        sent[1],
        ClientMessage::Image { mime_type: "image/jpeg".into(), data: "/9j/".into() }
    );
    assert_eq!(sent[2], ClientMessage::Text { text: "What is this?".into(), turn_complete: true });
}

#[tokio::test]
async fn test_drop_releases_devices() {
    let h = harness();
    h.session.connect().await.unwrap();
    let link = h.net.last_link();
    let audio = h.audio.clone();

    drop(h.session);

    assert_eq!(audio.input_closes(), 1);
    assert_eq!(audio.output_closes(), 1);
    wait_until(|| link.close_count() == 1).await;
}
