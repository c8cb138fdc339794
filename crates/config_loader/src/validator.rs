//! 配置校验模块
//!
//! 校验规则：
//! - workers / max_consumers / worker_queue_capacity >= 1
//! - dispatch_timeout_ms >= 1 (如果设置)
//! - dedup.window_ms >= 1
//! - source: keys 非空，1e-3 <= rate_hz <= 1e6，burst >= 1
//! - consumer id 非空且唯一，数量不超过 max_consumers
//! - 状态表中的每个事件 key 都有 handler

use std::collections::HashSet;

use contracts::{ContractError, EngineConfig, EventKey, MIN_DEDUP_WINDOW};

/// 演示事件源的发送频率范围
const MIN_SOURCE_RATE_HZ: f64 = 1e-3;
const MAX_SOURCE_RATE_HZ: f64 = 1e6;

/// 校验 EngineConfig 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(config: &EngineConfig) -> Result<(), ContractError> {
    validate_dispatcher(config)?;
    validate_dedup(config)?;
    validate_source(config)?;
    validate_consumer_ids(config)?;
    validate_consumer_handlers(config)?;
    Ok(())
}

/// 校验分发器设置
fn validate_dispatcher(config: &EngineConfig) -> Result<(), ContractError> {
    let dispatcher = &config.dispatcher;

    if dispatcher.workers == Some(0) {
        return Err(ContractError::config_validation(
            "dispatcher.workers",
            "workers must be >= 1 when set",
        ));
    }
    if dispatcher.max_consumers == 0 {
        return Err(ContractError::config_validation(
            "dispatcher.max_consumers",
            "max_consumers must be >= 1",
        ));
    }
    if dispatcher.worker_queue_capacity == 0 {
        return Err(ContractError::config_validation(
            "dispatcher.worker_queue_capacity",
            "worker_queue_capacity must be >= 1",
        ));
    }
    if dispatcher.dispatch_timeout_ms == Some(0) {
        return Err(ContractError::config_validation(
            "dispatcher.dispatch_timeout_ms",
            "dispatch_timeout_ms must be >= 1 when set",
        ));
    }
    Ok(())
}

/// 校验去重窗口
fn validate_dedup(config: &EngineConfig) -> Result<(), ContractError> {
    if config.dedup.window() < MIN_DEDUP_WINDOW {
        return Err(ContractError::config_validation(
            "dedup.window_ms",
            format!(
                "window_ms must be >= {}, got {}",
                MIN_DEDUP_WINDOW.as_millis(),
                config.dedup.window_ms
            ),
        ));
    }
    Ok(())
}

/// 校验演示事件源
fn validate_source(config: &EngineConfig) -> Result<(), ContractError> {
    let source = &config.source;

    if source.keys.is_empty() {
        return Err(ContractError::config_validation(
            "source.keys",
            "at least one event key is required",
        ));
    }
    if !source.rate_hz.is_finite() || source.rate_hz <= 0.0 {
        return Err(ContractError::config_validation(
            "source.rate_hz",
            format!("rate_hz must be > 0, got {}", source.rate_hz),
        ));
    }
    if !(MIN_SOURCE_RATE_HZ..=MAX_SOURCE_RATE_HZ).contains(&source.rate_hz) {
        return Err(ContractError::config_validation(
            "source.rate_hz",
            format!(
                "rate_hz must be within [{MIN_SOURCE_RATE_HZ}, {MAX_SOURCE_RATE_HZ}], got {}",
                source.rate_hz
            ),
        ));
    }
    if source.burst == 0 {
        return Err(ContractError::config_validation(
            "source.burst",
            "burst must be >= 1",
        ));
    }
    if source.channel_capacity == 0 {
        return Err(ContractError::config_validation(
            "source.channel_capacity",
            "channel_capacity must be >= 1",
        ));
    }
    Ok(())
}

/// 校验 consumer id 唯一性和数量
fn validate_consumer_ids(config: &EngineConfig) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (idx, consumer) in config.consumers.iter().enumerate() {
        if consumer.id.is_empty() {
            return Err(ContractError::config_validation(
                format!("consumers[{idx}].id"),
                "consumer id cannot be empty",
            ));
        }
        if !seen.insert(&consumer.id) {
            return Err(ContractError::config_validation(
                format!("consumers[id={}]", consumer.id),
                "duplicate consumer id",
            ));
        }
    }

    if config.consumers.len() > config.dispatcher.max_consumers {
        return Err(ContractError::config_validation(
            "consumers",
            format!(
                "{} consumers configured, max_consumers is {}",
                config.consumers.len(),
                config.dispatcher.max_consumers
            ),
        ));
    }
    Ok(())
}

/// 校验状态表引用的事件 key 都有 handler
fn validate_consumer_handlers(config: &EngineConfig) -> Result<(), ContractError> {
    for consumer in &config.consumers {
        let handlers: HashSet<&str> = consumer.handlers.iter().map(EventKey::as_str).collect();
        for (status, keys) in &consumer.statuses {
            if let Some(missing) = keys.iter().find(|k| !handlers.contains(k.as_str())) {
                return Err(ContractError::config_validation(
                    format!("consumers[{}].statuses.{}", consumer.id, status),
                    format!("event key '{missing}' has no handler"),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{
        ConfigVersion, ConsumerProfile, DedupSettings, DispatcherSettings,
        SourceSettings, StatusTable,
    };

    fn minimal_config() -> EngineConfig {
        let mut statuses = StatusTable::new();
        statuses.insert("idle".into(), vec![]);
        statuses.insert("watching".into(), vec!["order_updated".into()]);

        EngineConfig {
            version: ConfigVersion::V1,
            dispatcher: DispatcherSettings::default(),
            dedup: DedupSettings { window_ms: 500 },
            source: SourceSettings {
                keys: vec![EventKey::from("order_updated")],
                ..Default::default()
            },
            consumers: vec![ConsumerProfile {
                id: "desk-1".into(),
                statuses,
                handlers: vec!["order_updated".into()],
                script: vec!["watching".into()],
            }],
        }
    }

    #[test]
    fn test_valid_config() {
        let config = minimal_config();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_zero_workers() {
        let mut config = minimal_config();
        config.dispatcher.workers = Some(0);
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("workers must be >= 1"), "got: {err}");
    }

    #[test]
    fn test_zero_queue_capacity() {
        let mut config = minimal_config();
        config.dispatcher.worker_queue_capacity = 0;
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("worker_queue_capacity"), "got: {err}");
    }

    #[test]
    fn test_window_too_small() {
        let mut config = minimal_config();
        config.dedup.window_ms = 0;
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("window_ms must be >= 1"), "got: {err}");
    }

    #[test]
    fn test_invalid_rate() {
        let mut config = minimal_config();
        config.source.rate_hz = -5.0;
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("rate_hz must be > 0"), "got: {err}");
    }

    #[test]
    fn test_rate_bounds() {
        let mut config = minimal_config();
        config.source.rate_hz = 1e10;
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("rate_hz must be within"), "got: {err}");

        config.source.rate_hz = 1e-20;
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("rate_hz must be within"), "got: {err}");

        config.source.rate_hz = MAX_SOURCE_RATE_HZ;
        assert!(validate(&config).is_ok());
        config.source.rate_hz = MIN_SOURCE_RATE_HZ;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_empty_source_keys() {
        let mut config = minimal_config();
        config.source.keys.clear();
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("source.keys"), "got: {err}");
    }

    #[test]
    fn test_duplicate_consumer_id() {
        let mut config = minimal_config();
        config.consumers.push(config.consumers[0].clone());
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("duplicate consumer id"), "got: {err}");
    }

    #[test]
    fn test_empty_consumer_id() {
        let mut config = minimal_config();
        config.consumers[0].id = String::new();
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("cannot be empty"), "got: {err}");
    }

    #[test]
    fn test_too_many_consumers() {
        let mut config = minimal_config();
        config.dispatcher.max_consumers = 1;
        let mut second = config.consumers[0].clone();
        second.id = "desk-2".into();
        config.consumers.push(second);
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("max_consumers is 1"), "got: {err}");
    }

    #[test]
    fn test_active_key_without_handler() {
        let mut config = minimal_config();
        config.consumers[0].handlers.clear();
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("'order_updated' has no handler"), "got: {err}");
    }
}
