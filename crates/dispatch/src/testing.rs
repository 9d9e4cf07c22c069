// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory fakes for the Event Bus, Geo Cache, and Ride Store
//! collaborators (spec §4.4/§8): this is the seam the teacher itself
//! doesn't need — it talks to real NATS — but that the spec's testable
//! properties require so the Matcher/Router are exercisable without a live
//! NATS/Redis instance. Built only for `cfg(test)` or the `testing` feature
//! (the black-box tests under `tests/` compile the library as a regular
//! dependency, so they enable the feature rather than relying on `cfg(test)`
//! alone) so the `unwrap()`s below never reach a real build, matching how
//! the crate's other `_tests` modules are test-only too.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::bus::EventBus;
use crate::collaborators::{RideStatus, RideStore};
use crate::geo::GeoCache;
use crate::model::{DriverCandidate, DriverStatus, Event};

#[derive(Default)]
pub struct FakeEventBus {
    pub published: Mutex<Vec<(String, Event)>>,
}

#[async_trait]
impl EventBus for FakeEventBus {
    async fn publish(&self, subject: &str, event: &Event) -> anyhow::Result<()> {
        self.published.lock().unwrap().push((subject.to_owned(), event.clone()));
        Ok(())
    }
}

/// In-memory geo cache. `available` is seeded directly by tests rather than
/// derived from `upsert_driver_location`'s lat/lng, since ordering by
/// distance is the property under test, not GEOSEARCH's radius math.
#[derive(Default)]
pub struct FakeGeoCache {
    pub available: Mutex<Vec<DriverCandidate>>,
    pub statuses: Mutex<HashMap<String, DriverStatus>>,
    strings: Mutex<HashMap<String, String>>,
    lists: Mutex<HashMap<String, Vec<String>>>,
}

#[async_trait]
impl GeoCache for FakeGeoCache {
    async fn upsert_driver_location(
        &self,
        _driver_id: &str,
        _lat: f64,
        _lng: f64,
        _heading: Option<f64>,
        _speed: Option<f64>,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn set_status(&self, driver_id: &str, status: DriverStatus) -> anyhow::Result<()> {
        self.statuses.lock().unwrap().insert(driver_id.to_owned(), status);
        Ok(())
    }

    async fn get_status(&self, driver_id: &str) -> anyhow::Result<DriverStatus> {
        Ok(self.statuses.lock().unwrap().get(driver_id).copied().unwrap_or(DriverStatus::Offline))
    }

    async fn find_available_drivers(
        &self,
        _lat: f64,
        _lng: f64,
        limit: usize,
        _max_radius_km: f64,
    ) -> anyhow::Result<Vec<DriverCandidate>> {
        let mut candidates = self.available.lock().unwrap().clone();
        candidates.sort_by(|a, b| {
            a.distance_km.partial_cmp(&b.distance_km).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.driver_id.cmp(&b.driver_id))
        });
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn set_ex(&self, key: &str, value: &str, _ttl_seconds: i64) -> anyhow::Result<()> {
        self.strings.lock().unwrap().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn get_string(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.strings.lock().unwrap().get(key).cloned())
    }

    async fn delete(&self, keys: &[String]) -> anyhow::Result<()> {
        let mut strings = self.strings.lock().unwrap();
        let mut lists = self.lists.lock().unwrap();
        for key in keys {
            strings.remove(key);
            lists.remove(key);
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.strings.lock().unwrap().contains_key(key) || self.lists.lock().unwrap().contains_key(key))
    }

    async fn expire(&self, _key: &str, _ttl_seconds: i64) -> anyhow::Result<()> {
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.lists.lock().unwrap().entry(key.to_owned()).or_default().push(value.to_owned());
        Ok(())
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> anyhow::Result<Vec<String>> {
        let lists = self.lists.lock().unwrap();
        let Some(values) = lists.get(key) else { return Ok(Vec::new()) };
        let len = values.len() as isize;
        let normalize = |i: isize| if i < 0 { (len + i).max(0) } else { i.min(len) };
        let (start, stop) = (normalize(start), normalize(stop));
        if start > stop || start >= len {
            return Ok(Vec::new());
        }
        Ok(values[start as usize..=(stop as usize).min(values.len().saturating_sub(1))].to_vec())
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// In-memory ride store. Ride participation and status are seeded directly.
#[derive(Default)]
pub struct FakeRideStore {
    pub participants: Mutex<HashMap<String, Vec<String>>>,
    pub statuses: Mutex<HashMap<String, RideStatus>>,
}

#[async_trait]
impl RideStore for FakeRideStore {
    async fn ride_is_participant(&self, ride_id: &str, user_id: &str) -> anyhow::Result<bool> {
        Ok(self.participants.lock().unwrap().get(ride_id).is_some_and(|members| members.iter().any(|m| m == user_id)))
    }

    async fn ride_status(&self, ride_id: &str) -> anyhow::Result<Option<RideStatus>> {
        Ok(self.statuses.lock().unwrap().get(ride_id).cloned())
    }
}
