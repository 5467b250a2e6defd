//! Registry of peripherals seen during the current scan.

use std::collections::HashMap;

use crate::types::{Device, DeviceId};

/// Discovered peripherals keyed by identity.
///
/// Repeated advertisements overwrite the previous sighting; consumers read
/// the RSSI-sorted [`snapshot`](Self::snapshot), never insertion order.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<DeviceId, Device>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry sharing `device.id`.
    pub fn upsert(&mut self, device: Device) {
        self.devices.insert(device.id.clone(), device);
    }

    /// Devices ordered by descending RSSI. Ties are broken by id so the
    /// order is stable between calls.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.devices.values().cloned().collect();
        devices.sort_by(|a, b| b.rssi.cmp(&a.rssi).then_with(|| a.id.cmp(&b.id)));
        devices
    }

    /// Look up a device by id.
    #[must_use]
    pub fn get(&self, id: &DeviceId) -> Option<&Device> {
        self.devices.get(id)
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.devices.clear();
    }

    /// Number of distinct devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether nothing has been seen.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
