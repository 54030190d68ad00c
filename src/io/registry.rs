//! Vehicle registry lookups
//!
//! The registry is owned by the vehicle CRUD service; this side only reads.
//! `FileVehicleRegistry` reads a JSON array of vehicle records and reloads it
//! whenever the file's modification time changes.

use crate::domain::plate::PlatePattern;
use crate::domain::types::Vehicle;
use anyhow::Context;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info};

#[async_trait]
pub trait VehicleRegistry: Send + Sync {
    /// First registered vehicle whose plate matches the pattern
    async fn find_by_plate(&self, pattern: &PlatePattern) -> anyhow::Result<Option<Vehicle>>;
}

fn lookup(vehicles: &[Vehicle], pattern: &PlatePattern) -> Option<Vehicle> {
    pattern.best_match(vehicles, |v| v.plate_number.as_str()).cloned()
}

/// Fixed in-memory registry
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    vehicles: RwLock<Vec<Vehicle>>,
}

impl MemoryRegistry {
    pub fn new(vehicles: Vec<Vehicle>) -> Self {
        Self { vehicles: RwLock::new(vehicles) }
    }

    pub fn insert(&self, vehicle: Vehicle) {
        self.vehicles.write().push(vehicle);
    }
}

#[async_trait]
impl VehicleRegistry for MemoryRegistry {
    async fn find_by_plate(&self, pattern: &PlatePattern) -> anyhow::Result<Option<Vehicle>> {
        Ok(lookup(&self.vehicles.read(), pattern))
    }
}

struct Snapshot {
    modified: Option<SystemTime>,
    vehicles: Arc<Vec<Vehicle>>,
}

/// JSON-file backed registry with reload on change
pub struct FileVehicleRegistry {
    path: PathBuf,
    snapshot: RwLock<Snapshot>,
}

impl FileVehicleRegistry {
    /// Open the registry file; fails if it cannot be read or parsed
    pub async fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let (modified, vehicles) = Self::read_file(&path).await?;
        info!(path = %path.display(), vehicles = %vehicles.len(), "registry_loaded");
        Ok(Self {
            path,
            snapshot: RwLock::new(Snapshot { modified, vehicles: Arc::new(vehicles) }),
        })
    }

    async fn read_file(path: &Path) -> anyhow::Result<(Option<SystemTime>, Vec<Vehicle>)> {
        let modified = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("Failed to stat registry {}", path.display()))?
            .modified()
            .ok();
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read registry {}", path.display()))?;
        let vehicles: Vec<Vehicle> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse registry {}", path.display()))?;
        Ok((modified, vehicles))
    }

    /// Current vehicle list, reloading first if the file changed
    async fn current(&self) -> anyhow::Result<Arc<Vec<Vehicle>>> {
        let modified = tokio::fs::metadata(&self.path)
            .await
            .with_context(|| format!("Failed to stat registry {}", self.path.display()))?
            .modified()
            .ok();

        {
            let snapshot = self.snapshot.read();
            if modified.is_some() && snapshot.modified == modified {
                return Ok(snapshot.vehicles.clone());
            }
        }

        let (modified, vehicles) = Self::read_file(&self.path).await?;
        let vehicles = Arc::new(vehicles);
        debug!(vehicles = %vehicles.len(), "registry_reloaded");
        *self.snapshot.write() = Snapshot { modified, vehicles: vehicles.clone() };
        Ok(vehicles)
    }
}

#[async_trait]
impl VehicleRegistry for FileVehicleRegistry {
    async fn find_by_plate(&self, pattern: &PlatePattern) -> anyhow::Result<Option<Vehicle>> {
        let vehicles = self.current().await?;
        Ok(lookup(&vehicles, pattern))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::plate::normalize;
    use crate::domain::types::{VehicleId, VehicleStatus};
    use tempfile::tempdir;

    fn vehicle(id: &str, plate: &str) -> Vehicle {
        Vehicle {
            id: VehicleId::from(id),
            plate_number: plate.to_string(),
            owner_id: None,
            owner_name: None,
            owner_phone: None,
            status: VehicleStatus::Active,
        }
    }

    fn pattern(raw: &str) -> PlatePattern {
        PlatePattern::new(&normalize(raw).unwrap())
    }

    #[tokio::test]
    async fn test_memory_registry_lookup() {
        let registry = MemoryRegistry::new(vec![vehicle("v1", "XYZ 999"), vehicle("v2", "A-B-C-1-2-3")]);

        let found = registry.find_by_plate(&pattern("ABC123")).await.unwrap();
        assert_eq!(found.map(|v| v.id), Some(VehicleId::from("v2")));

        let missing = registry.find_by_plate(&pattern("QQQ111")).await.unwrap();
        assert!(missing.is_none());

        registry.insert(vehicle("v3", "QQQ-111"));
        let found = registry.find_by_plate(&pattern("QQQ111")).await.unwrap();
        assert_eq!(found.map(|v| v.id), Some(VehicleId::from("v3")));
    }

    #[tokio::test]
    async fn test_file_registry_loads_and_matches() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vehicles.json");
        std::fs::write(
            &path,
            r#"[
                {"id": "v1", "plate_number": "XYZ 999", "owner_phone": "09171234567", "status": "Active"},
                {"id": "v2", "plate_number": "ABC-123", "status": "pending"}
            ]"#,
        )
        .unwrap();

        let registry = FileVehicleRegistry::open(&path).await.unwrap();
        let found = registry.find_by_plate(&pattern("xyz999")).await.unwrap().unwrap();
        assert_eq!(found.id, VehicleId::from("v1"));
        assert_eq!(found.owner_phone.as_deref(), Some("09171234567"));

        let pending = registry.find_by_plate(&pattern("ABC 123")).await.unwrap().unwrap();
        assert_eq!(pending.status, VehicleStatus::Pending);
    }

    #[tokio::test]
    async fn test_file_registry_missing_file_is_error() {
        let dir = tempdir().unwrap();
        assert!(FileVehicleRegistry::open(dir.path().join("none.json")).await.is_err());
    }

    #[tokio::test]
    async fn test_file_registry_error_after_removal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vehicles.json");
        std::fs::write(&path, "[]").unwrap();

        let registry = FileVehicleRegistry::open(&path).await.unwrap();
        std::fs::remove_file(&path).unwrap();
        assert!(registry.find_by_plate(&pattern("ABC123")).await.is_err());
    }
}
