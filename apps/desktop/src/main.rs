use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use capture_integration::{SyntheticMicrophone, WavEncoderFactory};
use clap::Parser;
use client_core::{
    capture::format_clock,
    config::load_settings_from,
    load_settings,
    messages::day_label,
    ClientContext, LoopbackBackend, MessageSyncEngine, PresenceTracker, RecordingState,
    SyncEvent, VoiceCapturePipeline,
};
use shared::domain::{ConversationId, UserId};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Runs two participants against an in-process backend: one sends text and a
/// voice note, the other watches the conversation.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "alice")]
    user: String,
    #[arg(long, default_value = "bob")]
    peer: String,
    #[arg(long, default_value = "general")]
    conversation: String,
    /// Text messages to send, in order.
    #[arg(long = "message", default_values_t = vec!["Hello".to_string()])]
    messages: Vec<String>,
    /// Length of the recorded voice note; zero skips recording.
    #[arg(long, default_value_t = 3)]
    record_secs: u64,
    /// Settings file; otherwise `chat_sync.toml` or `CHAT_SYNC_CONFIG`.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let args = Args::parse();

    let settings = match &args.config {
        Some(path) => load_settings_from(path)?,
        None => load_settings(),
    };
    let backend = LoopbackBackend::new(settings.edit_window(), settings.max_attachment_bytes);
    let conversation = ConversationId::new(args.conversation.clone());

    let me = ClientContext::new(UserId::new(args.user.clone()), settings.clone());
    let peer = ClientContext::new(UserId::new(args.peer.clone()), settings);

    let my_presence = PresenceTracker::new(Arc::clone(&me), backend.clone());
    let peer_presence = PresenceTracker::new(Arc::clone(&peer), backend.clone());
    my_presence.start().await?;
    peer_presence.start().await?;

    let my_engine = MessageSyncEngine::new_with_dependencies(
        Arc::clone(&me),
        conversation.clone(),
        backend.clone(),
        backend.clone(),
        backend.clone(),
    );
    let peer_engine = MessageSyncEngine::new_with_dependencies(
        Arc::clone(&peer),
        conversation,
        backend.clone(),
        backend.clone(),
        backend.clone(),
    );
    for engine in [&my_engine, &peer_engine] {
        engine.load_history().await?;
        engine.attach_realtime().await?;
    }

    let mut peer_events = peer_engine.subscribe_events();
    let watcher = tokio::spawn(async move {
        while let Ok(event) = peer_events.recv().await {
            match event {
                SyncEvent::MessageAppended(message) => info!(
                    sender = %message.sender_id,
                    kind = message.kind.label(),
                    content = %message.content,
                    "peer received message"
                ),
                SyncEvent::Notice(text) => warn!(%text, "peer notice"),
                _ => {}
            }
        }
    });

    for text in &args.messages {
        if let Err(err) = my_engine.send_text(text).await {
            warn!(error = %err, "send failed");
        }
    }

    if args.record_secs > 0 {
        let pipeline = VoiceCapturePipeline::new(
            Arc::clone(&me),
            Arc::new(SyntheticMicrophone::default()),
            Arc::new(WavEncoderFactory),
        );
        pipeline.on_state_change("demo", |state| info!(?state, "recording state"));
        pipeline.start().await?;
        tokio::time::sleep(Duration::from_secs(args.record_secs)).await;
        info!(
            elapsed = %format_clock(pipeline.elapsed_seconds()),
            level = pipeline.level_sample().level,
            "stopping recording"
        );
        if pipeline.stop().await? == RecordingState::Reviewing {
            pipeline.send(&*my_engine).await?;
        }
        pipeline.teardown();
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    info!(
        online = peer_presence.online_users_count(),
        me = %peer_presence.get_user_status(me.self_id()),
        "peer presence view"
    );

    let today = me.now().with_timezone(&chrono::Local).date_naive();
    for group in peer_engine.timeline(&chrono::Local).await {
        println!("-- {} --", day_label(group.day, today));
        for message in group.messages {
            println!("{}: {}", message.sender_id, message.content);
        }
    }

    my_engine.detach_realtime().await;
    peer_engine.detach_realtime().await;
    my_presence.stop().await;
    peer_presence.stop().await;
    watcher.abort();
    Ok(())
}
