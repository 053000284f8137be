mod common;

use assert_matches::assert_matches;
use common::{assert_offsets, johannesburg, start_app, SilentLocation, StaticLocation};
use shared::{
    AppError, Capabilities, ContactError, ErrorKind, Identity, LocationError, NewContact,
    SosConfig, SosController, SosState, SosStatus, Stores, UserId,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

#[tokio::test(start_paused = true)]
async fn full_hold_sends_staggered_calls_and_messages() {
    let app = start_app(
        Arc::new(StaticLocation(Ok(johannesburg()))),
        &["+27 82 111 2222", "(083) 333-4444"],
    )
    .await;
    let mut view = app.handle.subscribe();
    view.wait_for(|v| v.state == SosState::Idle && v.contact_count == 2)
        .await
        .unwrap();

    let pressed_at = Instant::now();
    app.handle.press_start();
    view.wait_for(|v| v.state == SosState::Success).await.unwrap();
    let dispatched_at = Instant::now();
    assert_offsets(&[dispatched_at.duration_since(pressed_at).as_millis()], &[3_000]);
    assert_eq!(view.borrow().progress_ratio, 1.0);
    assert_eq!(view.borrow().button_label, "SOS Sent Successfully!");

    sleep(Duration::from_millis(6_500)).await;

    assert_offsets(
        &app.channels.offsets_from(dispatched_at),
        &[0, 2_000, 4_000, 6_000],
    );
    let urls = app.channels.urls();
    assert_eq!(urls[0], "tel:27821112222");
    assert!(urls[1].starts_with("https://wa.me/27821112222?text=%F0%9F%9A%A8%20EMERGENCY%20ALERT"));
    assert!(urls[1].contains("lerato%20needs%20help%20urgently%21"));
    assert!(urls[1].contains("https%3A%2F%2Fwww.google.com%2Fmaps%3Fq%3D-26.2041%2C28.0473"));
    assert_eq!(urls[2], "tel:0833334444");
    assert!(urls[3].starts_with("https://wa.me/0833334444?text="));

    let history = app.handle.history().await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, SosStatus::Active);
    assert_eq!(history[0].owner_name, "lerato");
    assert_eq!(history[0].latitude, -26.2041);

    let progress = app.handle.view().dispatch.unwrap();
    assert_eq!(progress.issued, 4);
    assert_eq!(progress.contacts_reached(), 2);
}

#[tokio::test(start_paused = true)]
async fn success_window_lasts_three_seconds() {
    let app = start_app(Arc::new(StaticLocation(Ok(johannesburg()))), &["+1 555 0100"]).await;
    let mut view = app.handle.subscribe();
    view.wait_for(|v| v.state == SosState::Idle).await.unwrap();

    app.handle.press_start();
    view.wait_for(|v| v.state == SosState::Success).await.unwrap();
    let success_at = Instant::now();

    view.wait_for(|v| v.state == SosState::Idle).await.unwrap();
    assert_offsets(&[success_at.elapsed().as_millis()], &[3_000]);
    assert_eq!(view.borrow().progress_ratio, 0.0);
}

#[tokio::test(start_paused = true)]
async fn early_release_sends_nothing() {
    let app = start_app(Arc::new(StaticLocation(Ok(johannesburg()))), &["+1 555 0100"]).await;
    let mut view = app.handle.subscribe();
    view.wait_for(|v| v.state == SosState::Idle).await.unwrap();

    app.handle.press_start();
    sleep(Duration::from_millis(1_500)).await;
    let holding = app.handle.view();
    assert_eq!(holding.state, SosState::Holding);
    assert!((holding.progress_ratio - 0.5).abs() < 0.05);

    app.handle.press_end();
    view.wait_for(|v| v.state == SosState::Idle).await.unwrap();
    assert_eq!(view.borrow().progress_ratio, 0.0);

    sleep(Duration::from_secs(30)).await;
    assert_eq!(app.channels.len(), 0);
    assert!(app.handle.history().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn slow_location_times_out_after_ten_seconds() {
    let app = start_app(Arc::new(SilentLocation), &["+1 555 0100"]).await;
    let mut view = app.handle.subscribe();
    view.wait_for(|v| v.state == SosState::Idle).await.unwrap();

    let pressed_at = Instant::now();
    app.handle.press_start();
    view.wait_for(|v| v.state == SosState::Dispatching).await.unwrap();
    view.wait_for(|v| v.failure.is_some()).await.unwrap();
    assert_offsets(&[pressed_at.elapsed().as_millis()], &[13_000]);

    let failed = app.handle.view();
    assert_eq!(failed.state, SosState::Idle);
    let failure = failed.failure.unwrap();
    assert_matches!(failure.cause, LocationError::Timeout { timeout_ms: 10_000 });
    assert_eq!(
        failure.message,
        "Failed to send SOS. Please try again or call emergency services directly."
    );
    assert!(failure.error.is_retryable);
    assert!(app.handle.history().await.unwrap().is_empty());
    assert_eq!(app.channels.len(), 0);
}

#[tokio::test(start_paused = true)]
async fn denied_permission_returns_to_idle() {
    let app = start_app(
        Arc::new(StaticLocation(Err(LocationError::Denied))),
        &["+1 555 0100"],
    )
    .await;
    let mut view = app.handle.subscribe();
    view.wait_for(|v| v.state == SosState::Idle).await.unwrap();

    app.handle.press_start();
    view.wait_for(|v| v.failure.is_some()).await.unwrap();
    let failure = app.handle.view().failure.unwrap();
    assert_eq!(failure.cause, LocationError::Denied);
    assert_eq!(failure.error.error_code, "LOCATION_PERMISSION_DENIED");
    assert!(!failure.error.is_retryable);
}

#[tokio::test(start_paused = true)]
async fn sixth_contact_is_rejected_inline() {
    let app = start_app(
        Arc::new(StaticLocation(Ok(johannesburg()))),
        &["+1 1", "+1 2", "+1 3", "+1 4", "+1 5"],
    )
    .await;
    let err = app
        .handle
        .add_contact(NewContact::new("Sixth", "+1 6"))
        .await
        .unwrap_err();
    assert_matches!(err, ContactError::CapacityExceeded { max: 5 });
    assert_eq!(
        AppError::from(err).user_facing_message(),
        "Maximum 5 emergency contacts allowed"
    );
    assert_eq!(app.handle.contacts().await.unwrap().len(), 5);

    let mut view = app.handle.subscribe();
    view.wait_for(|v| v.contact_count == 5).await.unwrap();
    assert_eq!(view.borrow().state, SosState::Idle);
}

#[tokio::test(start_paused = true)]
async fn without_contacts_the_button_is_inert() {
    let app = start_app(Arc::new(StaticLocation(Ok(johannesburg()))), &[]).await;
    assert_eq!(app.handle.view().state, SosState::NoContacts);

    app.handle.press_start();
    sleep(Duration::from_secs(5)).await;
    assert_eq!(app.handle.view().state, SosState::NoContacts);
    assert_eq!(app.channels.len(), 0);

    let contact = app
        .handle
        .add_contact(NewContact::new("Mom", "+1 555 0100"))
        .await
        .unwrap();
    let mut view = app.handle.subscribe();
    view.wait_for(|v| v.state == SosState::Idle).await.unwrap();

    assert!(app.handle.remove_contact(&contact.id).await.unwrap());
    view.wait_for(|v| v.state == SosState::NoContacts).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn cancel_dispatch_stops_what_has_not_been_issued() {
    let app = start_app(
        Arc::new(StaticLocation(Ok(johannesburg()))),
        &["+1 555 0100", "+1 555 0101"],
    )
    .await;
    let mut view = app.handle.subscribe();
    view.wait_for(|v| v.state == SosState::Idle).await.unwrap();

    app.handle.press_start();
    view.wait_for(|v| v.state == SosState::Success).await.unwrap();
    sleep(Duration::from_millis(2_500)).await;
    assert_eq!(app.channels.len(), 2);

    assert_eq!(app.handle.cancel_dispatch().await, 2);
    sleep(Duration::from_secs(10)).await;
    assert_eq!(app.channels.len(), 2);
    assert_eq!(app.handle.view().dispatch.unwrap().cancelled, 2);
}

#[tokio::test(start_paused = true)]
async fn shutdown_does_not_stop_a_started_dispatch() {
    let app = start_app(
        Arc::new(StaticLocation(Ok(johannesburg()))),
        &["+1 555 0100", "+1 555 0101"],
    )
    .await;
    let mut view = app.handle.subscribe();
    view.wait_for(|v| v.state == SosState::Idle).await.unwrap();

    app.handle.press_start();
    view.wait_for(|v| v.state == SosState::Success).await.unwrap();
    app.handle.shutdown();

    sleep(Duration::from_secs(7)).await;
    assert_eq!(app.channels.len(), 4);
    // The loop is gone, so cancelling has nothing to reach.
    assert_eq!(app.handle.cancel_dispatch().await, 0);
}

#[tokio::test]
async fn invalid_config_is_rejected_at_start() {
    let config = SosConfig {
        message_base_url: "http://wa.me".into(),
        ..SosConfig::default()
    };
    let kv = Arc::new(shared::MemoryKvStore::new());
    let caps = Capabilities::new(
        Arc::new(StaticLocation(Ok(johannesburg()))),
        Arc::new(common::ChannelLog::default()),
    );
    let stores = Stores::over_kv(kv, &config);
    let identity = Identity {
        user_id: UserId::new("u"),
        email: None,
    };

    let err = SosController::start(config, caps, stores, &identity)
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind, ErrorKind::Configuration);
}
