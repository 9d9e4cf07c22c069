use std::sync::Arc;
use std::time::Duration as StdDuration;

use serde_json::json;

use crate::model::{DriverCandidate, Role};
use crate::testing::{FakeGeoCache, FakeRideStore};

use super::*;

fn config(overrides: impl FnOnce(&mut DispatchConfig)) -> Arc<DispatchConfig> {
    let mut cfg = DispatchConfig {
        host: "127.0.0.1".to_owned(),
        port: 0,
        auth_token: None,
        bus_url: "nats://127.0.0.1:4222".to_owned(),
        bus_token: None,
        bus_stream: "RIDES".to_owned(),
        bus_consumer_prefix: "matcher".to_owned(),
        geo_url: "redis://127.0.0.1:6379".to_owned(),
        max_search_radius_km: 5.0,
        max_drivers_to_notify: 20,
        first_batch_size: 3,
        offer_timeout_seconds: 15,
        retry_delay_seconds: 0,
        ack_wait_seconds: 30,
        max_deliver: 5,
        max_ack_pending: 256,
        pong_wait_seconds: 60,
        write_wait_seconds: 10,
        max_frame_bytes: 512 * 1024,
    };
    overrides(&mut cfg);
    Arc::new(cfg)
}

fn ride_requested_event(ride_id: &str, rider_id: &str, pickup_lat: f64, pickup_lng: f64) -> Event {
    let payload = json!({
        "ride_id": ride_id,
        "rider_id": rider_id,
        "rider_name": "Alice",
        "rider_rating": 4.9,
        "pickup": { "lat": pickup_lat, "lng": pickup_lng },
        "dropoff": null,
        "ride_type_id": "standard",
        "ride_type_name": "Standard",
        "estimated_fare": 12.5,
        "estimated_distance_km": 3.0,
        "estimated_duration_min": 10.0,
        "currency": "USD",
        "requested_at": chrono::Utc::now().to_rfc3339(),
    });
    Event::new("evt-1", "rides.requested", "rides-service", serde_json::to_vec(&payload).unwrap())
}

fn ride_accepted_event(ride_id: &str, driver_id: &str) -> Event {
    let payload = json!({
        "ride_id": ride_id,
        "driver_id": driver_id,
        "rider_id": "U1",
        "accepted_at": chrono::Utc::now().to_rfc3339(),
    });
    Event::new("evt-2", "rides.accepted", "rides-service", serde_json::to_vec(&payload).unwrap())
}

fn ride_cancelled_event(ride_id: &str) -> Event {
    let payload = json!({
        "ride_id": ride_id,
        "cancelled_by": "rider",
        "reason": "changed_mind",
        "cancelled_at": chrono::Utc::now().to_rfc3339(),
    });
    Event::new("evt-3", "rides.cancelled", "rides-service", serde_json::to_vec(&payload).unwrap())
}

fn candidate(driver_id: &str, lat: f64, lng: f64, distance_km: f64) -> DriverCandidate {
    DriverCandidate { driver_id: driver_id.to_owned(), latitude: lat, longitude: lng, distance_km }
}

#[tokio::test]
async fn no_drivers_sends_no_drivers_message() {
    let geo = Arc::new(FakeGeoCache::default());
    let hub = SessionHub::new();
    let (rider, mut rider_rx) = crate::hub::Session::new("U1", Role::Rider);
    hub.register(Arc::clone(&rider)).await;
    let matcher = Matcher::new(geo, Arc::clone(&hub), Arc::new(FakeRideStore::default()), config(|_| {}));

    matcher.on_ride_requested(ride_requested_event("R1", "U1", 37.7749, -122.4194)).await.unwrap();

    let msg = rider_rx.recv().await.unwrap();
    assert_eq!(msg.kind, "ride.no_drivers");
    assert_eq!(msg.ride_id.as_deref(), Some("R1"));
}

#[tokio::test]
async fn single_batch_single_driver_offers_and_tracks() {
    let geo = Arc::new(FakeGeoCache::default());
    geo.available.lock().unwrap().push(candidate("D1", 37.78, -122.42, 1.2));
    let hub = SessionHub::new();
    let (driver, mut driver_rx) = crate::hub::Session::new("D1", Role::Driver);
    hub.register(Arc::clone(&driver)).await;
    let matcher = Matcher::new(Arc::clone(&geo) as Arc<dyn GeoCache>, Arc::clone(&hub), Arc::new(FakeRideStore::default()), config(|_| {}));

    matcher.on_ride_requested(ride_requested_event("R1", "U1", 37.7749, -122.4194)).await.unwrap();

    let msg = driver_rx.recv().await.unwrap();
    assert_eq!(msg.kind, "ride.offer");
    assert_eq!(msg.ride_id.as_deref(), Some("R1"));
    assert_eq!(msg.data.get("timeout_seconds").and_then(|v| v.as_i64()), Some(15));

    let drivers = matcher.tracker.list_offered_drivers("R1").await.unwrap();
    assert_eq!(drivers, vec!["D1".to_owned()]);
}

#[tokio::test]
async fn accept_cancels_peers_but_not_the_accepting_driver() {
    let geo = Arc::new(FakeGeoCache::default());
    let hub = SessionHub::new();
    let (d1, mut d1_rx) = crate::hub::Session::new("D1", Role::Driver);
    let (d2, mut d2_rx) = crate::hub::Session::new("D2", Role::Driver);
    hub.register(Arc::clone(&d1)).await;
    hub.register(Arc::clone(&d2)).await;
    let matcher = Matcher::new(Arc::clone(&geo) as Arc<dyn GeoCache>, Arc::clone(&hub), Arc::new(FakeRideStore::default()), config(|_| {}));

    let expires_at = chrono::Utc::now() + chrono::Duration::seconds(15);
    matcher.tracker.track_offer("R1", "D1", expires_at).await.unwrap();
    matcher.tracker.track_offer("R1", "D2", expires_at).await.unwrap();

    matcher.on_ride_accepted(ride_accepted_event("R1", "D1")).await.unwrap();

    let cancel_msg = d2_rx.recv().await.unwrap();
    assert_eq!(cancel_msg.kind, "ride.offer_cancelled");

    d1_rx.close();
    assert!(d1_rx.try_recv().is_err());
    assert!(matcher.tracker.list_offered_drivers("R1").await.unwrap().is_empty());
}

#[tokio::test]
async fn cancel_notifies_all_offered_drivers() {
    let geo = Arc::new(FakeGeoCache::default());
    let hub = SessionHub::new();
    let (d1, mut d1_rx) = crate::hub::Session::new("D1", Role::Driver);
    let (d2, mut d2_rx) = crate::hub::Session::new("D2", Role::Driver);
    hub.register(Arc::clone(&d1)).await;
    hub.register(Arc::clone(&d2)).await;
    let matcher = Matcher::new(Arc::clone(&geo) as Arc<dyn GeoCache>, Arc::clone(&hub), Arc::new(FakeRideStore::default()), config(|_| {}));

    let expires_at = chrono::Utc::now() + chrono::Duration::seconds(15);
    matcher.tracker.track_offer("R1", "D1", expires_at).await.unwrap();
    matcher.tracker.track_offer("R1", "D2", expires_at).await.unwrap();

    matcher.on_ride_cancelled(ride_cancelled_event("R1")).await.unwrap();

    assert_eq!(d1_rx.recv().await.unwrap().kind, "ride.offer_cancelled");
    assert_eq!(d2_rx.recv().await.unwrap().kind, "ride.offer_cancelled");
}

#[tokio::test]
async fn delayed_second_wave_is_skipped_once_ride_is_no_longer_pending() {
    let geo = Arc::new(FakeGeoCache::default());
    geo.available.lock().unwrap().push(candidate("D1", 37.78, -122.42, 1.2));
    geo.available.lock().unwrap().push(candidate("D2", 37.79, -122.43, 2.4));
    let hub = SessionHub::new();
    let (d1, mut d1_rx) = crate::hub::Session::new("D1", Role::Driver);
    let (d2, mut d2_rx) = crate::hub::Session::new("D2", Role::Driver);
    hub.register(Arc::clone(&d1)).await;
    hub.register(Arc::clone(&d2)).await;
    let matcher = Matcher::new(
        Arc::clone(&geo) as Arc<dyn GeoCache>,
        Arc::clone(&hub),
        Arc::new(FakeRideStore::default()),
        config(|cfg| cfg.first_batch_size = 1),
    );

    // The ride is already marked accepted before dispatch so the delayed
    // wave's pending check — whenever it runs — reliably sees it.
    geo.set_ex("ride_status:R1", "accepted", 60).await.unwrap();

    matcher.on_ride_requested(ride_requested_event("R1", "U1", 37.7749, -122.4194)).await.unwrap();
    assert_eq!(d1_rx.recv().await.unwrap().kind, "ride.offer");
    tokio::time::sleep(StdDuration::from_millis(20)).await;

    d2_rx.close();
    assert!(d2_rx.try_recv().is_err());
}

#[tokio::test]
async fn delayed_second_wave_fires_when_still_pending() {
    let geo = Arc::new(FakeGeoCache::default());
    geo.available.lock().unwrap().push(candidate("D1", 37.78, -122.42, 1.2));
    geo.available.lock().unwrap().push(candidate("D2", 37.79, -122.43, 2.4));
    let hub = SessionHub::new();
    let (d1, mut d1_rx) = crate::hub::Session::new("D1", Role::Driver);
    let (d2, mut d2_rx) = crate::hub::Session::new("D2", Role::Driver);
    hub.register(Arc::clone(&d1)).await;
    hub.register(Arc::clone(&d2)).await;
    let matcher = Matcher::new(
        Arc::clone(&geo) as Arc<dyn GeoCache>,
        Arc::clone(&hub),
        Arc::new(FakeRideStore::default()),
        config(|cfg| cfg.first_batch_size = 1),
    );

    geo.set_ex("ride_status:R1", "pending", 60).await.unwrap();

    matcher.on_ride_requested(ride_requested_event("R1", "U1", 37.7749, -122.4194)).await.unwrap();
    assert_eq!(d1_rx.recv().await.unwrap().kind, "ride.offer");

    let msg = tokio::time::timeout(StdDuration::from_millis(200), d2_rx.recv()).await.unwrap().unwrap();
    assert_eq!(msg.kind, "ride.offer");
}
