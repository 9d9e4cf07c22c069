use std::sync::Arc;

use chrono::Utc;

use crate::testing::FakeGeoCache;

use super::*;

#[tokio::test]
async fn track_offer_grows_the_per_ride_set() {
    let cache = Arc::new(FakeGeoCache::default());
    let tracker = OfferTracker::new(cache);

    let expires_at = Utc::now() + chrono::Duration::seconds(15);
    tracker.track_offer("R1", "D1", expires_at).await.unwrap();
    tracker.track_offer("R1", "D2", expires_at).await.unwrap();

    let mut drivers = tracker.list_offered_drivers("R1").await.unwrap();
    drivers.sort();
    assert_eq!(drivers, vec!["D1".to_owned(), "D2".to_owned()]);
}

#[tokio::test]
async fn track_offer_does_not_duplicate_a_driver() {
    let cache = Arc::new(FakeGeoCache::default());
    let tracker = OfferTracker::new(cache);
    let expires_at = Utc::now() + chrono::Duration::seconds(15);

    tracker.track_offer("R1", "D1", expires_at).await.unwrap();
    tracker.track_offer("R1", "D1", expires_at).await.unwrap();

    assert_eq!(tracker.list_offered_drivers("R1").await.unwrap(), vec!["D1".to_owned()]);
}

#[tokio::test]
async fn clear_offer_and_clear_all_are_idempotent() {
    let cache = Arc::new(FakeGeoCache::default());
    let tracker = OfferTracker::new(cache);
    let expires_at = Utc::now() + chrono::Duration::seconds(15);
    tracker.track_offer("R1", "D1", expires_at).await.unwrap();

    tracker.clear_offer("R1", "D1").await.unwrap();
    tracker.clear_offer("R1", "D1").await.unwrap();
    tracker.clear_all("R1").await.unwrap();
    tracker.clear_all("R1").await.unwrap();

    assert!(tracker.list_offered_drivers("R1").await.unwrap().is_empty());
}

#[tokio::test]
async fn list_offered_drivers_is_empty_when_absent() {
    let cache = Arc::new(FakeGeoCache::default());
    let tracker = OfferTracker::new(cache);
    assert!(tracker.list_offered_drivers("no-such-ride").await.unwrap().is_empty());
}
