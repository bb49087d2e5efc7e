/// 获取当前 UTC 时间戳（毫秒）
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Character set for the random order-number suffix.
const ORDER_NO_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of the random suffix appended to the timestamp.
const ORDER_NO_SUFFIX_LEN: usize = 7;

/// Generate an externally-facing order number.
///
/// Layout (20 characters, fits common payment-gateway
/// merchant-reference ceilings):
///   - 1 char: order type prefix
///   - 12 chars: UTC timestamp `YYMMDDHHMMSS`
///   - 7 chars: random uppercase alphanumeric
///
/// Uniqueness is probabilistic; the engine re-checks against the
/// order store and regenerates on collision.
pub fn generate_order_no(prefix: char) -> String {
    use rand::Rng;

    let ts = chrono::Utc::now().format("%y%m%d%H%M%S");
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ORDER_NO_SUFFIX_LEN)
        .map(|_| ORDER_NO_CHARSET[rng.gen_range(0..ORDER_NO_CHARSET.len())] as char)
        .collect();
    format!("{}{}{}", prefix, ts, suffix)
}
