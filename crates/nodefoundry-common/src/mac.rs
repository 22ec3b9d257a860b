//! MAC address handling.
//!
//! Every MAC stored or compared anywhere in NodeFoundry is in canonical
//! form: 12 lowercase hex characters, no separators (`aabbccddeeff`).

/// Normalize a MAC address to canonical form.
///
/// Drops every character that is not a hex digit and lowercases the rest,
/// so `AA:BB:CC:DD:EE:FF`, `aa-bb-cc-dd-ee-ff` and `aabb.ccdd.eeff` all
/// map to `aabbccddeeff`. The result is not validated; see [`is_valid_mac`].
pub fn normalize_mac(mac: &str) -> String {
    mac.chars()
        .filter(|c| c.is_ascii_hexdigit())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Check that a MAC normalizes to exactly 6 octets.
pub fn is_valid_mac(mac: &str) -> bool {
    normalize_mac(mac).len() == 12
}

/// Format a MAC as uppercase colon-separated octets (`AA:BB:CC:DD:EE:FF`).
pub fn format_mac(mac: &str) -> String {
    let normalized = normalize_mac(mac).to_ascii_uppercase();
    normalized
        .as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).into_owned())
        .collect::<Vec<_>>()
        .join(":")
}

/// Render raw hardware address bytes in canonical form.
pub fn mac_from_bytes(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_separators() {
        assert_eq!(normalize_mac("AA:BB:CC:DD:EE:FF"), "aabbccddeeff");
        assert_eq!(normalize_mac("aabb.ccdd.eeff"), "aabbccddeeff");
        assert_eq!(normalize_mac("aa-bb-cc-dd-ee-ff"), "aabbccddeeff");
        assert_eq!(normalize_mac("aabbccddeeff"), "aabbccddeeff");
    }

    #[test]
    fn test_format_round_trip() {
        let canonical = normalize_mac("aabb.ccdd.eeff");
        assert_eq!(format_mac(&canonical), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_is_valid_mac() {
        assert!(is_valid_mac("00:11:22:33:44:55"));
        assert!(!is_valid_mac("00:11:22:33:44"));
        assert!(!is_valid_mac(""));
        assert!(!is_valid_mac("00:11:22:33:44:55:66"));
    }

    #[test]
    fn test_mac_from_bytes() {
        assert_eq!(
            mac_from_bytes(&[0x00, 0x1A, 0x2b, 0x3c, 0x4d, 0xFF]),
            "001a2b3c4dff"
        );
    }
}
