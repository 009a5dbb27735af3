//! Byte arithmetic on Kubernetes resource quantities.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

const BINARY_SUFFIXES: [(&str, u32); 6] = [("Ki", 1), ("Mi", 2), ("Gi", 3), ("Ti", 4), ("Pi", 5), ("Ei", 6)];
const DECIMAL_SUFFIXES: [(&str, u32); 6] = [("k", 1), ("M", 2), ("G", 3), ("T", 4), ("P", 5), ("E", 6)];

/// Parses a quantity into bytes. Fractional results are truncated.
///
/// Returns `None` for malformed or negative input and for the milli suffix, which has no
/// meaning for sizes.
pub fn to_bytes(quantity: &Quantity) -> Option<u64> {
    let raw = quantity.0.trim();
    if raw.is_empty() {
        return None;
    }

    for (suffix, power) in BINARY_SUFFIXES {
        if let Some(number) = raw.strip_suffix(suffix) {
            return scale(number, 1024u64.checked_pow(power)?);
        }
    }
    for (suffix, power) in DECIMAL_SUFFIXES {
        if let Some(number) = raw.strip_suffix(suffix) {
            return scale(number, 1000u64.checked_pow(power)?);
        }
    }
    if raw.ends_with('m') {
        return None;
    }
    scale(raw, 1)
}

fn scale(number: &str, multiplier: u64) -> Option<u64> {
    if let Ok(n) = number.parse::<u64>() {
        return n.checked_mul(multiplier);
    }
    let n = number.parse::<f64>().ok()?;
    if !n.is_finite() || n < 0.0 {
        return None;
    }
    Some((n * multiplier as f64) as u64)
}

/// Returns `percent`% of the quantity as a byte quantity.
pub fn percent_of(quantity: &Quantity, percent: u64) -> Option<Quantity> {
    let bytes = to_bytes(quantity)?;
    Some(Quantity((bytes / 100 * percent + bytes % 100 * percent / 100).to_string()))
}

/// Renders a quantity in the `<bytes>B` form understood by the service's size parser.
pub fn to_size_string(quantity: &Quantity) -> Option<String> {
    to_bytes(quantity).map(|b| format!("{b}B"))
}
