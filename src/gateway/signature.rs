use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Hex HMAC-SHA256 over `"{timestamp}.{payload}"`, the signed-payload shape
/// the gateway uses. Also used by tests to forge valid deliveries.
pub fn sign(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Authenticates a raw webhook delivery. Accepts either an
/// `x-timestamp`/`x-signature` header pair or a composite
/// `signature: t=...,v1=...` header (the `stripe-signature` spelling works
/// too). Timestamps outside the tolerance window are rejected before any
/// HMAC work happens.
pub fn verify(headers: &HeaderMap, payload: &[u8], secret: &str, tolerance_secs: u64) -> bool {
    if let (Some(ts), Some(sig)) = (headers.get("x-timestamp"), headers.get("x-signature")) {
        if let (Ok(ts), Ok(sig)) = (ts.to_str(), sig.to_str()) {
            return verify_parts(ts, sig, payload, secret, tolerance_secs);
        }
        return false;
    }

    let composite = headers
        .get("signature")
        .or_else(|| headers.get("stripe-signature"))
        .and_then(|h| h.to_str().ok());

    if let Some(value) = composite {
        let mut ts = "";
        let mut v1 = "";
        for part in value.split(',') {
            let mut it = part.trim().splitn(2, '=');
            match (it.next(), it.next()) {
                (Some("t"), Some(val)) => ts = val,
                (Some("v1"), Some(val)) => v1 = val,
                _ => {}
            }
        }
        if !ts.is_empty() && !v1.is_empty() {
            return verify_parts(ts, v1, payload, secret, tolerance_secs);
        }
    }

    false
}

fn verify_parts(
    timestamp: &str,
    signature: &str,
    payload: &[u8],
    secret: &str,
    tolerance_secs: u64,
) -> bool {
    let ts = match timestamp.parse::<i64>() {
        Ok(v) => v,
        Err(_) => return false,
    };

    let now = chrono::Utc::now().timestamp();
    if (now - ts).unsigned_abs() > tolerance_secs {
        return false;
    }

    let expected = sign(secret, ts, payload);
    constant_time_eq(&expected, signature)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}
