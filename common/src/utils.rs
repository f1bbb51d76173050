use crate::config::{
    ADDRESS_MAX_LEN, ADDRESS_MIN_LEN, ADDRESS_PREFIX, COIN_VALUE, VALIDATOR_KEY_HEX_LEN,
};

/// Format an amount of dust as a decimal token string with 8 fractional
/// digits. Pure integer arithmetic, no floating point involved.
pub fn format_token(dust: u64) -> String {
    format!("{}.{:08}", dust / COIN_VALUE, dust % COIN_VALUE)
}

/// Returns true when the input looks like an ASI address: the `1111`
/// prefix, 53 to 56 alphanumeric characters total.
pub fn is_asi_address(value: &str) -> bool {
    value.starts_with(ADDRESS_PREFIX)
        && (ADDRESS_MIN_LEN..=ADDRESS_MAX_LEN).contains(&value.len())
        && value.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Returns true for a full 130 hex character validator public key.
pub fn is_validator_key(value: &str) -> bool {
    value.len() == VALIDATOR_KEY_HEX_LEN && value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Shorten a key or hash for log lines: `04837a4c...b2df065f`.
pub fn abbreviate(value: &str) -> String {
    if value.len() <= 19 {
        value.to_string()
    } else {
        format!("{}...{}", &value[..8], &value[value.len() - 8..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: &str = "1111gW5kkGxHg7xDg6dRkZx2f7qxTizJzaCH9VEM1oJKWRvSX9Sk5";

    #[test]
    fn test_format_token() {
        assert_eq!(format_token(0), "0.00000000");
        assert_eq!(format_token(1), "0.00000001");
        assert_eq!(format_token(500_000_000), "5.00000000");
        assert_eq!(format_token(123_456_789), "1.23456789");
        assert_eq!(format_token(COIN_VALUE), "1.00000000");
    }

    #[test]
    fn test_is_asi_address() {
        assert!(is_asi_address(ADDR));
        // wrong prefix
        assert!(!is_asi_address("2222gW5kkGxHg7xDg6dRkZx2f7qxTizJzaCH9VEM1oJKWRvSX9Sk5"));
        // too short
        assert!(!is_asi_address("1111abc"));
        // non alphanumeric
        assert!(!is_asi_address("1111gW5kkGxHg7xDg6dRkZx2f7qxTizJzaCH9VEM1oJKWRvSX9S!5"));
    }

    #[test]
    fn test_is_validator_key() {
        let key = "04".repeat(65);
        assert_eq!(key.len(), 130);
        assert!(is_validator_key(&key));
        assert!(!is_validator_key(&key[..128]));
        assert!(!is_validator_key(&"zz".repeat(65)));
    }

    #[test]
    fn test_abbreviate() {
        let key = "04837a4cffffffffffffffffffffffffffffffffffffffffffffffffb2df065f";
        assert_eq!(abbreviate(key), "04837a4c...b2df065f");
        assert_eq!(abbreviate("short"), "short");
    }
}
