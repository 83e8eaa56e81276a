use gateway_telemetry::{metrics, record_conversion_failure, record_rpc_request, short_id};

#[test]
fn short_ids_are_five_hex_chars() {
    let id = short_id();
    assert_eq!(id.len(), 5);
    assert!(id.chars().all(|ch| ch.is_ascii_hexdigit()));
}

#[test]
fn counters_only_grow() {
    let before = metrics().snapshot();
    record_rpc_request();
    record_conversion_failure();
    let after = metrics().snapshot();
    assert!(after.rpc_requests > before.rpc_requests);
    assert!(after.conversion_failures > before.conversion_failures);
}
