//! 配置与可观测性集成测试

// ============================================================================
// 配置加载测试
// ============================================================================

mod config_tests {
    use journey_shared::config::AppConfig;
    use std::fs;
    use std::path::PathBuf;

    fn config_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "journey-shared-it-{}-{}",
            name,
            std::process::id()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_paths_and_flags_from_file() {
        let dir = config_dir("paths");
        fs::write(
            dir.join("default.toml"),
            r#"
[observability]
log_level = "debug"

[rule_engine]
trace_conditions = true
rules_path = "data/rules.json"
journeys_path = "data/journeys.json"
"#,
        )
        .unwrap();

        let config = AppConfig::load_from("journey-rule-engine", &dir).unwrap();
        assert_eq!(config.observability.log_level, "debug");
        assert!(config.rule_engine.trace_conditions);
        assert_eq!(
            config.rule_engine.rules_path,
            Some(PathBuf::from("data/rules.json"))
        );
        assert_eq!(
            config.rule_engine.journeys_path,
            Some(PathBuf::from("data/journeys.json"))
        );
    }

    #[test]
    fn test_invalid_value_is_error() {
        let dir = config_dir("invalid");
        fs::write(
            dir.join("default.toml"),
            "[rule_engine]\nreload_interval_seconds = \"soon\"\n",
        )
        .unwrap();

        assert!(AppConfig::load_from("journey-rule-engine", &dir).is_err());
    }
}

// ============================================================================
// 指标记录测试
// ============================================================================

mod metrics_tests {
    use journey_shared::observability::metrics::{
        describe, record_field_warning, record_journey_evaluation, record_rule_skipped,
        record_snapshot_reload,
    };

    #[test]
    fn test_record_journey_evaluation() {
        describe();
        record_journey_evaluation("DONE", 0.002);
        record_journey_evaluation("FAILED", 0.0);
        // 极端持续时间
        record_journey_evaluation("DONE", 999.99);
    }

    #[test]
    fn test_record_skips_and_reloads() {
        for reason in ["field_resolution", "type_mismatch", "reference_not_found", ""] {
            record_rule_skipped(reason);
        }
        record_field_warning();
        record_snapshot_reload("success");
        record_snapshot_reload("failed");
    }
}
