use once_cell::sync::Lazy;
use prometheus::{register_int_counter, Encoder, IntCounter, TextEncoder};

// Prometheus metrics (default registry)
pub static FLASH_QUEUED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "flash_queued_total",
        "Total flash messages queued"
    )
    .expect("register flash_queued_total")
});

pub static FLASH_READ_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "flash_read_total",
        "Total single-category flash reads"
    )
    .expect("register flash_read_total")
});

pub static FLASH_READ_ALL_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "flash_read_all_total",
        "Total whole-session flash reads"
    )
    .expect("register flash_read_all_total")
});

pub static FLASH_BACKEND_ERRORS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "flash_backend_errors_total",
        "Total flash operations failed by the backend"
    )
    .expect("register flash_backend_errors_total")
});

pub static FLASH_PARTIAL_CONSUMPTION_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "flash_partial_consumption_total",
        "Total flash reads whose clearing step failed"
    )
    .expect("register flash_partial_consumption_total")
});

/// Text exposition of the default registry; `Err` carries the encoder failure.
pub fn encode_metrics() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("metrics encode error: {e}"))?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_show_up_in_exposition() {
        FLASH_QUEUED_TOTAL.inc();
        let text = encode_metrics().unwrap();
        assert!(text.contains("flash_queued_total"));
    }
}
