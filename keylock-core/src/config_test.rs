#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::config::LockConfig;
    use crate::retry::RetryStrategy;

    #[test]
    fn defaults_are_valid() {
        let config = LockConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.expiration(), Duration::from_secs(30));
        assert_eq!(config.renew_interval(), Duration::from_secs(10));
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: LockConfig =
            serde_json::from_str(r#"{ "expiration_ms": 9000, "max_retries": 2 }"#).unwrap();

        assert_eq!(config.expiration_ms, 9000);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.retry_interval_ms, LockConfig::default().retry_interval_ms);
        assert_eq!(config.renew_interval(), Duration::from_secs(3));
    }

    #[test]
    fn fixed_retry_follows_config() {
        let config = LockConfig {
            retry_interval_ms: 50,
            max_retries: 2,
            ..LockConfig::default()
        };
        let mut retry = config.fixed_retry();

        assert_eq!(retry.next_interval(), Some(Duration::from_millis(50)));
        assert_eq!(retry.next_interval(), Some(Duration::from_millis(50)));
        assert_eq!(retry.next_interval(), None);
    }

    #[test]
    fn rejects_zero_expiration() {
        let config = LockConfig {
            expiration_ms: 0,
            ..LockConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_renew_interval_not_shorter_than_expiration() {
        let config = LockConfig {
            expiration_ms: 1000,
            renew_interval_ms: Some(1000),
            ..LockConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.contains("renew interval"));
    }
}
