use std::{sync::Arc, time::Duration};

use client_core::{
    ActivitySignal, ClientContext, LoopbackBackend, PresenceEvent, PresenceTracker, SyncSettings,
};
use shared::domain::{PresenceStatus, UserId};

fn tracker_for(
    user: &str,
    backend: &Arc<LoopbackBackend>,
) -> (Arc<ClientContext>, Arc<PresenceTracker>) {
    let context = ClientContext::new(UserId::new(user), SyncSettings::default());
    let tracker = PresenceTracker::new(Arc::clone(&context), backend.clone());
    (context, tracker)
}

fn backend() -> Arc<LoopbackBackend> {
    let settings = SyncSettings::default();
    LoopbackBackend::new(settings.edit_window(), settings.max_attachment_bytes)
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn idle_user_goes_away_for_everyone() {
    let backend = backend();
    let (_me_ctx, me) = tracker_for("me", &backend);
    let (_them_ctx, them) = tracker_for("them", &backend);
    me.start().await.expect("me online");
    them.start().await.expect("them online");
    settle().await;
    assert_eq!(them.get_user_status(&UserId::new("me")), PresenceStatus::Online);

    tokio::time::sleep(Duration::from_secs(301)).await;

    assert_eq!(me.current_status(), PresenceStatus::Away);
    assert_eq!(them.get_user_status(&UserId::new("me")), PresenceStatus::Away);
    let updates_at_away = backend.calls().presence_updates;

    // The next heartbeat republishes the away status.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(backend.calls().presence_updates > updates_at_away);
    assert_eq!(them.get_user_status(&UserId::new("me")), PresenceStatus::Away);

    me.stop().await;
    them.stop().await;
}

#[tokio::test(start_paused = true)]
async fn host_input_brings_an_away_user_back() {
    let backend = backend();
    let (me_ctx, me) = tracker_for("me", &backend);
    let (_them_ctx, them) = tracker_for("them", &backend);
    me.start().await.expect("me online");
    them.start().await.expect("them online");

    tokio::time::sleep(Duration::from_secs(301)).await;
    assert_eq!(me.current_status(), PresenceStatus::Away);

    assert_eq!(me_ctx.report_activity(ActivitySignal::Pointer), 1);
    settle().await;

    assert_eq!(me.current_status(), PresenceStatus::Online);
    assert_eq!(them.get_user_status(&UserId::new("me")), PresenceStatus::Online);

    // The away timer re-arms from the new input.
    tokio::time::sleep(Duration::from_secs(299)).await;
    assert_eq!(me.current_status(), PresenceStatus::Online);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(me.current_status(), PresenceStatus::Away);
}

#[tokio::test(start_paused = true)]
async fn stopping_publishes_offline_and_keeps_last_seen() {
    let backend = backend();
    let (_me_ctx, me) = tracker_for("me", &backend);
    let (_them_ctx, them) = tracker_for("them", &backend);
    me.start().await.expect("me online");
    them.start().await.expect("them online");
    settle().await;
    let mut their_events = them.subscribe_events();

    me.stop().await;
    settle().await;

    assert_eq!(them.get_user_status(&UserId::new("me")), PresenceStatus::Offline);
    assert!(them.get_user_last_seen(&UserId::new("me")).is_some());
    // Only `them` itself is still online.
    assert_eq!(them.online_users_count(), 1);
    let mut saw_offline = false;
    while let Ok(event) = their_events.try_recv() {
        if event
            == (PresenceEvent::UserStatusChanged {
                user_id: UserId::new("me"),
                status: PresenceStatus::Offline,
            })
        {
            saw_offline = true;
        }
    }
    assert!(saw_offline);
    them.stop().await;
}

#[tokio::test(start_paused = true)]
async fn publish_failures_are_reported_but_not_fatal() {
    let backend = backend();
    let (_me_ctx, me) = tracker_for("me", &backend);
    let mut events = me.subscribe_events();
    backend.fail_next_presence_updates(1);

    me.start().await.expect("start survives a failed publish");

    assert_eq!(me.current_status(), PresenceStatus::Online);
    assert!(me.is_connected());
    let mut saw_error = false;
    while let Ok(event) = events.try_recv() {
        saw_error |= matches!(event, PresenceEvent::Error(_));
    }
    assert!(saw_error);
    me.stop().await;
}
