use crate::model::Event;
use crate::testing::FakeEventBus;

use super::*;

#[tokio::test]
async fn fake_bus_records_published_events() {
    let bus = FakeEventBus::default();
    let event = Event::new("evt-1", "ride.requested", "rides-service", Vec::new());

    bus.publish("rides.requested", &event).await.unwrap();

    let published = bus.published.lock().unwrap();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, "rides.requested");
    assert_eq!(published[0].1.id, "evt-1");
}

#[tokio::test]
async fn handler_error_is_distinguishable_from_success() {
    let ok_handler: EventHandler = Arc::new(|_event| Box::pin(async { Ok(()) }));
    let err_handler: EventHandler =
        Arc::new(|_event| Box::pin(async { Err(anyhow::anyhow!("boom")) }));

    let event = Event::new("evt-2", "ride.cancelled", "rides-service", Vec::new());
    assert!(ok_handler(event.clone()).await.is_ok());
    assert!(err_handler(event).await.is_err());
}
