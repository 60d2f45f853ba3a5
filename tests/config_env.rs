// tests/config_env.rs
//
// AppConfig resolution from process environment. Serialized because the
// environment is process-global.

use serial_test::serial;

use finsights::config::AppConfig;

fn clear_env() {
    for key in [
        "DATABASE_URL",
        "BIND_ADDR",
        "GEMINI_API_KEY",
        "GEMINI_MODEL",
        "APP_UTC_OFFSET",
        "SCHEDULER_POLL_SECS",
        "SCHEDULER_WORKERS",
        "SYMBOL_CACHE_TTL_MIN",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
#[serial]
fn defaults_apply_without_env() {
    clear_env();
    let cfg = AppConfig::from_env();
    assert_eq!(cfg.database_url, "sqlite://data/finsights.db");
    assert_eq!(cfg.bind_addr, "0.0.0.0:8000");
    assert!(cfg.gemini_api_key.is_none());
    assert_eq!(cfg.gemini_model, "gemini-2.5-flash");
    assert_eq!(cfg.poll_secs, 30);
    assert_eq!(cfg.worker_slots, 4);
    assert_eq!(cfg.symbol_ttl_minutes, 30);
    assert_eq!(cfg.utc_offset.local_minus_utc(), 5 * 3600 + 30 * 60);
}

#[test]
#[serial]
fn env_overrides_are_picked_up() {
    clear_env();
    std::env::set_var("GEMINI_API_KEY", "  test-key  ");
    std::env::set_var("APP_UTC_OFFSET", "-04:00");
    std::env::set_var("SCHEDULER_POLL_SECS", "5");
    let cfg = AppConfig::from_env();
    assert_eq!(cfg.gemini_api_key.as_deref(), Some("test-key"));
    assert_eq!(cfg.utc_offset.local_minus_utc(), -4 * 3600);
    assert_eq!(cfg.poll_secs, 5);
    clear_env();
}

#[test]
#[serial]
fn blank_api_key_counts_as_unset() {
    clear_env();
    std::env::set_var("GEMINI_API_KEY", "   ");
    let cfg = AppConfig::from_env();
    assert!(cfg.gemini_api_key.is_none());
    clear_env();
}
