//! 可观测性与领域事件集成测试
//!
//! 测试指标记录、日志过滤器构建与事件信封解析的公共接口。

// ============================================================================
// 指标记录测试
// ============================================================================

mod metrics_tests {
    use feedback_shared::observability::metrics::{
        get_handle, record_delivery, record_domain_event, record_notification_created,
        record_notification_suppressed, record_sweep,
    };

    #[test]
    fn test_record_notification_lifecycle() {
        record_notification_created("feedback_received", "in_app", "sent");
        record_notification_created("cycle_closing", "email", "scheduled");
        record_notification_created("feedback_requested", "sms", "failed");
        record_notification_suppressed("feedback_requested", "sms", "channel_disabled");
        record_notification_suppressed("cycle_created", "email", "frequency_never");
    }

    #[test]
    fn test_record_delivery_and_sweep() {
        record_delivery("email", true, 0.12);
        record_delivery("sms", false, 1.5);
        record_sweep(0, 0, 0);
        record_sweep(100, 97, 3);
    }

    #[test]
    fn test_record_domain_event() {
        record_domain_event("cycle:activated", true);
        record_domain_event("goal:created", false);
    }

    #[test]
    fn test_edge_cases() {
        // 空标签和极端耗时不应 panic
        record_notification_created("", "", "");
        record_delivery("push", true, 999.99);
        record_delivery("push", true, 0.000001);
    }

    #[test]
    fn test_handle_absent_without_init() {
        assert!(get_handle().is_none());
    }
}

// ============================================================================
// 日志配置测试
// ============================================================================

mod tracing_tests {
    use feedback_shared::observability::ObservabilityConfig;
    use feedback_shared::observability::tracing::build_filter;

    #[test]
    fn test_build_filter_accepts_directives() {
        let config = ObservabilityConfig {
            log_level: "notification_engine=debug,sqlx=warn".to_string(),
            ..Default::default()
        };
        let filter = build_filter(&config);
        assert!(!filter.to_string().is_empty());
    }

    #[test]
    fn test_json_format_switch() {
        let config = ObservabilityConfig {
            log_format: "json".to_string(),
            ..Default::default()
        };
        assert!(config.json_logs());
        assert!(!ObservabilityConfig::default().json_logs());
    }
}

// ============================================================================
// 配置测试
// ============================================================================

mod config_tests {
    use feedback_shared::config::{AppConfig, NotificationConfig};
    use feedback_shared::observability::ObservabilityConfig;

    #[test]
    fn test_default_config() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.service_name, "unknown-service");
        assert_eq!(config.metrics_port, 9090);
        assert_eq!(config.log_level, "info");
        assert!(config.metrics_enabled);
    }

    #[test]
    fn test_notification_defaults() {
        let config = NotificationConfig::default();
        assert_eq!(config.sweep_interval_seconds, 60);
        assert_eq!(config.weekly_digest_weekday, "monday");
        assert_eq!(config.event_buffer, 256);
    }

    #[test]
    fn test_service_name_injection() {
        let config = AppConfig::default();
        let obs = config
            .observability
            .with_service_name("notification-engine");
        assert_eq!(obs.service_name, "notification-engine");
    }
}

// ============================================================================
// Guard 测试
// ============================================================================

mod guard_tests {
    use feedback_shared::observability::ObservabilityGuard;

    #[test]
    fn test_guard_drop() {
        for _ in 0..10 {
            let guard = ObservabilityGuard::empty();
            assert!(!guard.metrics_enabled());
            drop(guard);
        }
    }
}

// ============================================================================
// 领域事件信封测试
// ============================================================================

mod event_tests {
    use feedback_shared::events::{DomainEvent, DomainEventKind};
    use serde_json::json;

    #[test]
    fn test_known_and_unknown_names() {
        let event = DomainEvent::new("cycle:closing", json!({"organizationId": "org-1"}));
        assert_eq!(event.kind(), Some(DomainEventKind::CycleClosing));
        assert_eq!(event.organization_id().as_deref(), Some("org-1"));

        let unknown = DomainEvent::new("goal:created", json!({}));
        assert!(unknown.kind().is_none());
    }

    #[test]
    fn test_organization_from_nested_entity() {
        let event = DomainEvent::new(
            "feedback:submitted",
            json!({"feedback": {"id": "f1", "organizationId": "org-2", "receiverId": "u2"}}),
        );
        assert_eq!(event.organization_id().as_deref(), Some("org-2"));
        assert_eq!(
            event.entity_field("feedback", "receiverId").as_deref(),
            Some("u2")
        );
    }
}
