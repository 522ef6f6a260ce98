use subtle::ConstantTimeEq;

/// Check a caller-supplied API key against the configured one in constant time.
///
/// With no key configured nothing matches, so admin routes stay closed.
pub fn api_key_matches(configured: Option<&str>, provided: Option<&str>) -> bool {
    match (configured, provided) {
        (Some(expected), Some(given)) if !expected.is_empty() => {
            expected.len() == given.len() && bool::from(expected.as_bytes().ct_eq(given.as_bytes()))
        }
        _ => false,
    }
}
