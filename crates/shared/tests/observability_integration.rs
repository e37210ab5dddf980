//! 可观测性模块集成测试
//!
//! 测试指标记录函数与日志过滤器构建。

mod metrics_tests {
    use order_shared::observability::metrics::{
        record_inventory_deduction, record_message_consumed, record_order_published,
    };

    #[test]
    fn test_record_order_published() {
        record_order_published("order_queue", "success");
        record_order_published("order_queue", "failed");
        record_order_published("orders_v2", "success");
    }

    #[test]
    fn test_record_message_consumed() {
        for status in ["processed", "decode_failed", "failed"] {
            record_message_consumed("order_queue", status);
        }
    }

    #[test]
    fn test_record_inventory_deduction() {
        record_inventory_deduction(2);
        record_inventory_deduction(0);
        // 负数量原样记录
        record_inventory_deduction(-3);
    }
}

mod tracing_tests {
    use order_shared::observability::tracing::env_filter;

    #[test]
    fn test_env_filter_accepts_levels() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            let filter = env_filter(level);
            assert!(!filter.to_string().is_empty());
        }
    }
}

mod guard_tests {
    use order_shared::config::ObservabilityConfig;
    use order_shared::observability::ObservabilityGuard;

    #[test]
    fn test_guard_without_metrics() {
        let guard = ObservabilityGuard::empty();
        assert!(!guard.metrics_enabled());
        drop(guard);
    }

    #[test]
    fn test_default_config_disables_metrics() {
        let config = ObservabilityConfig::default();
        assert!(!config.metrics_enabled);
        assert_eq!(config.metrics_port, 9090);
        assert_eq!(config.log_level, "info");
    }
}
