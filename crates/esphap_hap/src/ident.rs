use uuid::Uuid;

/// Derive the stable accessory UUID for a component display name.
///
/// Name-based (version 5) UUIDs make the identity reproducible across
/// process restarts: the same component name always resolves to the same
/// cached accessory record.
pub fn accessory_uuid(name: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_across_calls() {
        assert_eq!(accessory_uuid("Kitchen Light"), accessory_uuid("Kitchen Light"));
    }

    #[test]
    fn test_distinct_names_distinct_uuids() {
        assert_ne!(accessory_uuid("Kitchen Light"), accessory_uuid("Bedroom Light"));
    }
}
