//! Umbrella BLE protocol identifiers.

use anyhow::Result;
use uuid::Uuid;

/// Service UUID advertised by the umbrella firmware.
pub const SERVICE_UUID: &str = "99f54e09-8916-4083-adce-bcd996e9510e";

/// TX characteristic on the umbrella service. Settings writes go here;
/// not exercised by the pairing core, kept for reference.
pub const TX_CHAR_UUID: &str = "f5353f5a-0cf1-4253-bccd-4c06b2bf339d";

/// Parse a 128-bit service UUID from its string form.
pub fn parse_service_uuid(uuid_str: &str) -> Result<Uuid> {
    Uuid::parse_str(uuid_str.trim())
        .map_err(|e| anyhow::anyhow!("Invalid service UUID {uuid_str:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_service_uuid() {
        let uuid = parse_service_uuid(SERVICE_UUID).unwrap();
        assert_eq!(uuid.as_u128() >> 96, 0x99f54e09);

        parse_service_uuid(TX_CHAR_UUID).unwrap();
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_service_uuid("not-a-uuid").is_err());
        assert!(parse_service_uuid("").is_err());
    }
}
