//! Locations and their storage zones.
//!
//! Locations form a hierarchy through `parent_id`; the location owns its
//! zones, and items refer to locations by id only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "location_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LocationKind {
    Roastery,
    Warehouse,
    Cafe,
    Kiosk,
    CommissaryKitchen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "hazard_class", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum HazardClass {
    None,
    Flammable,
    Corrosive,
    Pressurized,
}

/// A physical zone within a location (cold room, dry storage, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageZone {
    pub id: Uuid,
    pub name: String,
    pub temperature_min: Option<f64>,
    pub temperature_max: Option<f64>,
    pub humidity_min: Option<f64>,
    pub humidity_max: Option<f64>,
    pub hazard_class: HazardClass,
}

/// Capacity limits and their current utilization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationCapacity {
    pub max_weight_kg: Option<f64>,
    pub max_volume_m3: Option<f64>,
    pub max_pallets: Option<u32>,
    pub max_sku_count: Option<u32>,
    pub used_weight_kg: f64,
    pub used_volume_m3: f64,
    pub used_pallets: u32,
    pub used_sku_count: u32,
}

impl LocationCapacity {
    /// Highest utilization fraction across the configured limits.
    pub fn utilization(&self) -> f64 {
        let mut highest: f64 = 0.0;
        if let Some(max) = self.max_weight_kg {
            if max > 0.0 {
                highest = highest.max(self.used_weight_kg / max);
            }
        }
        if let Some(max) = self.max_volume_m3 {
            if max > 0.0 {
                highest = highest.max(self.used_volume_m3 / max);
            }
        }
        if let Some(max) = self.max_pallets {
            if max > 0 {
                highest = highest.max(self.used_pallets as f64 / max as f64);
            }
        }
        if let Some(max) = self.max_sku_count {
            if max > 0 {
                highest = highest.max(self.used_sku_count as f64 / max as f64);
            }
        }
        highest
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub kind: LocationKind,
    pub parent_id: Option<Uuid>,
    pub zones: Vec<StorageZone>,
    pub capacity: LocationCapacity,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utilization_takes_the_tightest_limit() {
        let capacity = LocationCapacity {
            max_weight_kg: Some(1000.0),
            max_volume_m3: Some(100.0),
            max_pallets: Some(10),
            max_sku_count: None,
            used_weight_kg: 100.0,
            used_volume_m3: 90.0,
            used_pallets: 5,
            used_sku_count: 300,
        };
        assert!((capacity.utilization() - 0.9).abs() < 1e-9);
    }

    #[test]
    fn unbounded_capacity_reports_zero() {
        assert_eq!(LocationCapacity::default().utilization(), 0.0);
    }
}
