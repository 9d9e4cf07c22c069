use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::model::{Message, Role};

use super::*;

#[tokio::test]
async fn registering_same_id_twice_evicts_the_prior_session() {
    let hub = SessionHub::new();
    let (first, mut first_rx) = Session::new("u1", Role::Rider);
    hub.register(Arc::clone(&first)).await;
    assert_eq!(hub.client_count().await, 1);

    let (second, _second_rx) = Session::new("u1", Role::Rider);
    hub.register(Arc::clone(&second)).await;

    assert_eq!(hub.client_count().await, 1);
    assert!(first.is_closed());
    assert!(first_rx.recv().await.is_none());
    assert!(hub.get("u1").await.is_some());
}

#[tokio::test]
async fn unregister_is_idempotent() {
    let hub = SessionHub::new();
    let (session, _rx) = Session::new("u1", Role::Rider);
    hub.register(Arc::clone(&session)).await;

    hub.unregister(&session).await;
    assert_eq!(hub.client_count().await, 0);

    // A second unregister of the same (already-removed) session is a no-op,
    // not a panic or a double-decrement.
    hub.unregister(&session).await;
    assert_eq!(hub.client_count().await, 0);
}

#[tokio::test]
async fn joining_a_new_room_leaves_the_old_one() {
    let hub = SessionHub::new();
    let (session, _rx) = Session::new("u1", Role::Rider);
    hub.register(Arc::clone(&session)).await;

    hub.add_to_room("u1", "ride-a").await;
    assert_eq!(hub.room_members("ride-a").await.len(), 1);

    hub.add_to_room("u1", "ride-b").await;
    assert!(hub.room_members("ride-a").await.is_empty());
    assert_eq!(hub.room_members("ride-b").await.len(), 1);
    assert_eq!(*session.room.read().await, Some("ride-b".to_owned()));
}

#[tokio::test]
async fn room_is_garbage_collected_once_its_last_member_leaves() {
    let hub = SessionHub::new();
    let (session, _rx) = Session::new("u1", Role::Rider);
    hub.register(Arc::clone(&session)).await;
    hub.add_to_room("u1", "ride-a").await;

    hub.remove_from_room("u1", "ride-a").await;

    assert_eq!(hub.room_count().await, 0);
    assert_eq!(*session.room.read().await, None);
}

#[tokio::test]
async fn unregister_removes_session_from_its_room() {
    let hub = SessionHub::new();
    let (session, _rx) = Session::new("u1", Role::Rider);
    hub.register(Arc::clone(&session)).await;
    hub.add_to_room("u1", "ride-a").await;

    hub.unregister(&session).await;

    assert_eq!(hub.room_count().await, 0);
}

#[tokio::test]
async fn send_to_room_excluding_skips_the_named_session() {
    let hub = SessionHub::new();
    let (driver, mut driver_rx) = Session::new("driver-1", Role::Driver);
    let (rider, mut rider_rx) = Session::new("rider-1", Role::Rider);
    hub.register(Arc::clone(&driver)).await;
    hub.register(Arc::clone(&rider)).await;
    hub.add_to_room("driver-1", "ride-a").await;
    hub.add_to_room("rider-1", "ride-a").await;

    hub.send_to_room_excluding("ride-a", Some("rider-1"), Message::new("ping")).await;

    assert!(driver_rx.recv().await.is_some());
    rider_rx.close();
    assert!(rider_rx.try_recv().is_err());
}

#[tokio::test]
async fn slow_consumer_is_evicted_without_affecting_others() {
    let hub = SessionHub::new();
    let (slow, _slow_rx) = Session::new("slow", Role::Rider);
    let (fast, mut fast_rx) = Session::new("fast", Role::Rider);
    hub.register(Arc::clone(&slow)).await;
    hub.register(Arc::clone(&fast)).await;

    for _ in 0..SEND_QUEUE_CAPACITY {
        hub.send_to_user("slow", Message::new("m")).await;
    }
    assert_eq!(hub.client_count().await, 2);

    // One more push overflows the slow session's queue and evicts it.
    hub.send_to_user("slow", Message::new("overflow")).await;
    assert_eq!(hub.client_count().await, 1);
    assert!(hub.get("slow").await.is_none());

    hub.send_to_user("fast", Message::new("still alive")).await;
    assert!(fast_rx.recv().await.is_some());
}

#[tokio::test]
async fn dispatch_invokes_the_registered_handler_for_its_type() {
    let hub = SessionHub::new();
    let (session, _rx) = Session::new("u1", Role::Rider);
    hub.register(Arc::clone(&session)).await;

    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);
    hub.register_handler(
        "ping",
        Arc::new(move |_session, _msg| {
            let counted = Arc::clone(&counted);
            Box::pin(async move {
                counted.fetch_add(1, Ordering::SeqCst);
            })
        }),
    )
    .await;

    hub.dispatch(Arc::clone(&session), Message::new("ping")).await;
    hub.dispatch(Arc::clone(&session), Message::new("unknown_type")).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
