use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use uuid::Uuid;

use crate::service::Service;
use crate::service::ServiceKind;

/// A persisted accessory identity.
///
/// Exactly one record exists per UUID; the UUID is derived deterministically
/// from the component's display name so records survive process restarts.
/// Reachability is a plain flag driven by the owning device connection.
pub struct Accessory {
    uuid: Uuid,
    name: String,
    reachable: AtomicBool,
    services: Mutex<Vec<Arc<Service>>>,
}

impl Accessory {
    pub fn new(name: impl Into<String>, uuid: Uuid) -> Arc<Self> {
        Arc::new(Self {
            uuid,
            name: name.into(),
            reachable: AtomicBool::new(false),
            services: Mutex::new(Vec::new()),
        })
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Get or create a service by kind and name.
    ///
    /// The name disambiguates sibling services of the same kind on one
    /// accessory (effect switches, momentary cover switches).
    pub fn service(&self, kind: ServiceKind, name: &str) -> Arc<Service> {
        let mut services = self.services.lock().unwrap();
        if let Some(existing) = services
            .iter()
            .find(|s| s.kind() == kind && s.name() == name)
        {
            return existing.clone();
        }
        let created = Arc::new(Service::new(kind, name));
        services.push(created.clone());
        created
    }

    /// Look up the first service of a kind, if wired.
    pub fn find_service(&self, kind: ServiceKind) -> Option<Arc<Service>> {
        self.services
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.kind() == kind)
            .cloned()
    }

    /// Snapshot of all wired services.
    pub fn services(&self) -> Vec<Arc<Service>> {
        self.services.lock().unwrap().clone()
    }
}

impl fmt::Debug for Accessory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accessory")
            .field("uuid", &self.uuid)
            .field("name", &self.name)
            .field("reachable", &self.reachable())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::accessory_uuid;

    #[test]
    fn test_service_get_or_create_by_kind_and_name() {
        let accessory = Accessory::new("Living Room", accessory_uuid("Living Room"));
        let open = accessory.service(ServiceKind::Switch, "Living Room Open");
        let close = accessory.service(ServiceKind::Switch, "Living Room Close");
        let open_again = accessory.service(ServiceKind::Switch, "Living Room Open");

        assert!(Arc::ptr_eq(&open, &open_again));
        assert!(!Arc::ptr_eq(&open, &close));
        assert_eq!(accessory.services().len(), 2);
    }

    #[test]
    fn test_reachable_flag() {
        let accessory = Accessory::new("Sensor", accessory_uuid("Sensor"));
        assert!(!accessory.reachable());
        accessory.set_reachable(true);
        assert!(accessory.reachable());
    }
}
