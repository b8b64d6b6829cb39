use axum::extract::{Query, State};
use axum::Json;
use deadpool_sqlite::Pool;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::error::AppResult;
use crate::installs::{self, InstallationFilters, InstallationQueryParams};
use crate::types::Installation;

#[derive(Debug, Serialize)]
pub struct StatisticsResponse {
    pub total_installations: i64,
    pub successful_installations: i64,
    pub failed_installations: i64,
    pub success_rate: f64,
    pub average_time_minutes: f64,
    pub unique_clients: i64,
    pub by_brand: BTreeMap<String, i64>,
    pub top_drivers: BTreeMap<String, i64>,
}

/// Half-away-from-zero to two decimals.
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn compute_statistics(rows: &[Installation]) -> StatisticsResponse {
    let total = rows.len() as i64;
    let successful = rows.iter().filter(|r| r.status == "success").count() as i64;
    let failed = rows.iter().filter(|r| r.status == "failed").count() as i64;

    let success_rate = if total > 0 {
        round2(successful as f64 / total as f64 * 100.0)
    } else {
        0.0
    };

    let timed: Vec<i64> = rows
        .iter()
        .map(|r| r.installation_time_seconds)
        .filter(|&t| t > 0)
        .collect();
    let average_time_minutes = if timed.is_empty() {
        0.0
    } else {
        let avg_secs = timed.iter().sum::<i64>() as f64 / timed.len() as f64;
        round2(avg_secs / 60.0)
    };

    let unique_clients = rows
        .iter()
        .map(|r| r.client_name.trim())
        .filter(|c| !c.is_empty())
        .collect::<HashSet<_>>()
        .len() as i64;

    let mut by_brand: BTreeMap<String, i64> = BTreeMap::new();
    for row in rows {
        let brand = row.driver_brand.trim();
        if !brand.is_empty() {
            *by_brand.entry(brand.to_string()).or_insert(0) += 1;
        }
    }

    let mut top_drivers: BTreeMap<String, i64> = BTreeMap::new();
    for row in rows {
        let key = format!("{} {}", row.driver_brand.trim(), row.driver_version.trim())
            .trim()
            .to_string();
        if !key.is_empty() {
            *top_drivers.entry(key).or_insert(0) += 1;
        }
    }

    StatisticsResponse {
        total_installations: total,
        successful_installations: successful,
        failed_installations: failed,
        success_rate,
        average_time_minutes,
        unique_clients,
        by_brand,
        top_drivers,
    }
}

/// GET /statistics — aggregations over the same filtered view as the
/// installation listing.
pub async fn get_statistics(
    State(pool): State<Arc<Pool>>,
    Query(params): Query<InstallationQueryParams>,
) -> AppResult<Json<StatisticsResponse>> {
    let filters = InstallationFilters::parse(params)?;
    let rows = installs::fetch_all(&pool).await?;
    Ok(Json(compute_statistics(&filters.apply(rows))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(brand: &str, version: &str, status: &str, client: &str, secs: i64) -> Installation {
        Installation {
            id: 0,
            timestamp: "2026-07-10T00:00:00Z".to_string(),
            driver_brand: brand.to_string(),
            driver_version: version.to_string(),
            status: status.to_string(),
            client_name: client.to_string(),
            driver_description: String::new(),
            installation_time_seconds: secs,
            os_info: String::new(),
            notes: String::new(),
        }
    }

    #[test]
    fn empty_input_yields_zeroed_stats() {
        let stats = compute_statistics(&[]);
        assert_eq!(stats.total_installations, 0);
        assert_eq!(stats.success_rate, 0.0);
        assert_eq!(stats.average_time_minutes, 0.0);
        assert_eq!(stats.unique_clients, 0);
        assert!(stats.by_brand.is_empty());
    }

    #[test]
    fn success_rate_rounds_to_two_decimals() {
        let rows = vec![
            row("Zebra", "1.0", "success", "Acme", 0),
            row("Zebra", "1.0", "failed", "Acme", 0),
            row("Zebra", "1.0", "unknown", "Acme", 0),
        ];
        // 1/3 → 33.333…% → 33.33
        assert_eq!(compute_statistics(&rows).success_rate, 33.33);
    }

    #[test]
    fn average_ignores_untimed_rows() {
        let rows = vec![
            row("Zebra", "1.0", "success", "Acme", 90),
            row("Zebra", "1.0", "success", "Acme", 150),
            row("Zebra", "1.0", "success", "Acme", 0),
        ];
        // (90 + 150) / 2 = 120 s = 2 minutes
        assert_eq!(compute_statistics(&rows).average_time_minutes, 2.0);
    }

    #[test]
    fn unique_clients_trims_and_skips_empty() {
        let rows = vec![
            row("Zebra", "1.0", "success", " Acme ", 0),
            row("Zebra", "1.0", "success", "Acme", 0),
            row("Zebra", "1.0", "success", "", 0),
            row("Zebra", "1.0", "success", "   ", 0),
            row("Zebra", "1.0", "success", "Otra", 0),
        ];
        assert_eq!(compute_statistics(&rows).unique_clients, 2);
    }

    #[test]
    fn brand_and_driver_maps_exclude_empty_keys() {
        let rows = vec![
            row("Zebra", "2.0.0", "success", "Acme", 0),
            row("Zebra", "2.0.0", "failed", "Acme", 0),
            row("Magicard", "1.1", "success", "Acme", 0),
            row("", "9.9", "success", "Acme", 0),
        ];
        let stats = compute_statistics(&rows);
        assert_eq!(stats.by_brand.get("Zebra"), Some(&2));
        assert_eq!(stats.by_brand.get("Magicard"), Some(&1));
        assert_eq!(stats.by_brand.len(), 2);
        assert_eq!(stats.top_drivers.get("Zebra 2.0.0"), Some(&2));
        // Brandless row still contributes its version as the key.
        assert_eq!(stats.top_drivers.get("9.9"), Some(&1));
    }
}
