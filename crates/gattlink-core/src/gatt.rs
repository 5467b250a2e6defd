//! Service and characteristic cache for the connected peripheral.

use std::collections::HashMap;

use uuid::Uuid;

use crate::types::{Characteristic, Service};

/// Discovered GATT attributes keyed by UUID.
///
/// Lives for one connection. The controller clears it when a new
/// connection is confirmed and whenever the link or the radio goes down,
/// so identifiers never leak from one peripheral to the next.
#[derive(Debug, Default)]
pub struct GattCache {
    services: HashMap<Uuid, Service>,
    characteristics: HashMap<Uuid, Characteristic>,
}

impl GattCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a service, replacing any entry with the same UUID.
    pub fn register_service(&mut self, service: Service) {
        self.services.insert(service.uuid, service);
    }

    /// Insert a characteristic, replacing any entry with the same UUID.
    pub fn register_characteristic(&mut self, characteristic: Characteristic) {
        self.characteristics
            .insert(characteristic.uuid, characteristic);
    }

    /// Look up a service.
    #[must_use]
    pub fn service(&self, uuid: &Uuid) -> Option<&Service> {
        self.services.get(uuid)
    }

    /// Look up a characteristic.
    #[must_use]
    pub fn characteristic(&self, uuid: &Uuid) -> Option<&Characteristic> {
        self.characteristics.get(uuid)
    }

    /// All cached services, unordered.
    pub fn services(&self) -> impl Iterator<Item = &Service> {
        self.services.values()
    }

    /// All cached characteristics, unordered.
    pub fn characteristics(&self) -> impl Iterator<Item = &Characteristic> {
        self.characteristics.values()
    }

    /// Empty both maps.
    pub fn clear(&mut self) {
        self.services.clear();
        self.characteristics.clear();
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty() && self.characteristics.is_empty()
    }
}
