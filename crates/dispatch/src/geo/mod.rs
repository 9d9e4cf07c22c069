// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Geo Cache Adapter: driver location store, status store, and
//! radius+availability query, backed by Redis (spec §4.5/§6).
//!
//! Grounded on `redis::aio::ConnectionManager` (auto-reconnecting, matching
//! the 2-second health-probe deadline in spec §5) for the generic KV/list
//! surface, and native `GEOADD`/`GEOSEARCH` via the crate's low-level
//! `cmd()` builder for the availability index — the crate ships no typed
//! geo helpers, and `GEOSEARCH` already returns distance-sorted results,
//! so the "sorted by distance" invariant is enforced by Redis itself.
//! `calculate_distance` is the standalone haversine, ported from
//! `sim_core::spatial::distance_km_between_cells_uncached`'s formula
//! generalized from H3-cell-pair input to raw lat/lng.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::config::DispatchConfig;
use crate::model::{DriverCandidate, DriverStatus};

const AVAILABLE_DRIVERS_KEY: &str = "drivers:available";
const HEALTH_PROBE_DEADLINE: std::time::Duration = std::time::Duration::from_secs(2);
const LOCATION_TTL_SECONDS: i64 = 300;
const HARD_CANDIDATE_CAP: usize = 200;

fn location_key(driver_id: &str) -> String {
    format!("driver:location:{driver_id}")
}

fn status_key(driver_id: &str) -> String {
    format!("driver:status:{driver_id}")
}

/// Geo Cache Adapter contract (spec §4.5). A trait so the Matcher/Router can
/// be tested against an in-memory fake instead of a live Redis instance.
#[async_trait]
pub trait GeoCache: Send + Sync {
    async fn upsert_driver_location(
        &self,
        driver_id: &str,
        lat: f64,
        lng: f64,
        heading: Option<f64>,
        speed: Option<f64>,
    ) -> anyhow::Result<()>;

    async fn set_status(&self, driver_id: &str, status: DriverStatus) -> anyhow::Result<()>;
    async fn get_status(&self, driver_id: &str) -> anyhow::Result<DriverStatus>;

    async fn find_available_drivers(
        &self,
        lat: f64,
        lng: f64,
        limit: usize,
        max_radius_km: f64,
    ) -> anyhow::Result<Vec<DriverCandidate>>;

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: i64) -> anyhow::Result<()>;
    async fn get_string(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn delete(&self, keys: &[String]) -> anyhow::Result<()>;
    async fn exists(&self, key: &str) -> anyhow::Result<bool>;
    async fn expire(&self, key: &str, ttl_seconds: i64) -> anyhow::Result<()>;

    async fn rpush(&self, key: &str, value: &str) -> anyhow::Result<()>;
    async fn lrange(&self, key: &str, start: isize, stop: isize) -> anyhow::Result<Vec<String>>;

    async fn health_check(&self) -> anyhow::Result<()>;
}

/// Great-circle distance between two points, in km.
pub fn calculate_distance(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let (lat1, lng1) = (lat1.to_radians(), lng1.to_radians());
    let (lat2, lng2) = (lat2.to_radians(), lng2.to_radians());
    let dlat = lat2 - lat1;
    let dlng = lng2 - lng1;
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlng = (dlng * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlng * sin_dlng;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    6371.0 * c
}

/// Redis-backed implementation.
pub struct RedisGeoCache {
    conn: ConnectionManager,
}

impl RedisGeoCache {
    pub async fn connect(config: &DispatchConfig) -> anyhow::Result<Self> {
        tracing::info!(url = %config.geo_url, "connecting geo cache");
        let client = redis::Client::open(config.geo_url.as_str())?;
        let conn = client.get_connection_manager().await?;
        tracing::info!("geo cache connected");
        Ok(Self { conn })
    }
}

#[async_trait]
impl GeoCache for RedisGeoCache {
    async fn upsert_driver_location(
        &self,
        driver_id: &str,
        lat: f64,
        lng: f64,
        heading: Option<f64>,
        speed: Option<f64>,
    ) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();

        let record = serde_json::json!({
            "driver_id": driver_id,
            "latitude": lat,
            "longitude": lng,
            "heading": heading,
            "speed": speed,
        });
        let _: () = conn
            .set_ex(location_key(driver_id), record.to_string(), LOCATION_TTL_SECONDS as u64)
            .await?;

        // Only an already-`available` driver re-enters the availability
        // index on a location ping; `set_status` owns every other
        // transition in or out of it.
        let raw_status: Option<String> = conn.get(status_key(driver_id)).await?;
        let status = raw_status.and_then(|s| s.parse().ok()).unwrap_or(DriverStatus::Offline);
        if status == DriverStatus::Available {
            // GEOADD member ordering is longitude, latitude.
            let _: () = redis::cmd("GEOADD")
                .arg(AVAILABLE_DRIVERS_KEY)
                .arg(lng)
                .arg(lat)
                .arg(driver_id)
                .query_async(&mut conn)
                .await?;
        }

        Ok(())
    }

    async fn set_status(&self, driver_id: &str, status: DriverStatus) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(status_key(driver_id), status.as_str()).await?;

        // Only `available` entries participate in the radius query.
        if status != DriverStatus::Available {
            let _: () = redis::cmd("ZREM")
                .arg(AVAILABLE_DRIVERS_KEY)
                .arg(driver_id)
                .query_async(&mut conn)
                .await?;
        }
        Ok(())
    }

    async fn get_status(&self, driver_id: &str) -> anyhow::Result<DriverStatus> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(status_key(driver_id)).await?;
        Ok(raw.and_then(|s| s.parse().ok()).unwrap_or(DriverStatus::Offline))
    }

    async fn find_available_drivers(
        &self,
        lat: f64,
        lng: f64,
        limit: usize,
        max_radius_km: f64,
    ) -> anyhow::Result<Vec<DriverCandidate>> {
        let mut conn = self.conn.clone();
        let mut radius_km = max_radius_km;
        let mut candidates = Vec::new();

        // Expand outward until `limit` is met or the hard cap is reached
        // (spec §4.5: "radius query expanding outward until limit... found
        // or a hard cap is reached").
        loop {
            let rows: Vec<(String, (f64, f64))> = redis::cmd("GEOSEARCH")
                .arg(AVAILABLE_DRIVERS_KEY)
                .arg("FROMLONLAT")
                .arg(lng)
                .arg(lat)
                .arg("BYRADIUS")
                .arg(radius_km)
                .arg("km")
                .arg("ASC")
                .arg("COUNT")
                .arg(HARD_CANDIDATE_CAP)
                .arg("WITHCOORD")
                .query_async(&mut conn)
                .await
                .unwrap_or_default();

            candidates = rows
                .into_iter()
                .map(|(driver_id, (member_lng, member_lat))| DriverCandidate {
                    distance_km: calculate_distance(lat, lng, member_lat, member_lng),
                    driver_id,
                    latitude: member_lat,
                    longitude: member_lng,
                })
                .collect();

            if candidates.len() >= limit || radius_km >= 500.0 {
                break;
            }
            radius_km *= 2.0;
        }

        candidates.sort_by(|a, b| {
            a.distance_km.partial_cmp(&b.distance_km).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.driver_id.cmp(&b.driver_id))
        });
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: i64) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let ttl = ttl_seconds.max(1) as u64;
        let _: () = conn.set_ex(key, value, ttl).await?;
        Ok(())
    }

    async fn get_string(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn delete(&self, keys: &[String]) -> anyhow::Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: () = conn.del(keys).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(key).await?)
    }

    async fn expire(&self, key: &str, ttl_seconds: i64) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.expire(key, ttl_seconds.max(1)).await?;
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.rpush(key, value).await?;
        Ok(())
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> anyhow::Result<Vec<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.lrange(key, start, stop).await?)
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let ping = async { redis::cmd("PING").query_async::<String>(&mut conn).await };
        tokio::time::timeout(HEALTH_PROBE_DEADLINE, ping).await??;
        Ok(())
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
