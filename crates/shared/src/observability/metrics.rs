//! 指标模块
//!
//! 基于 metrics crate 门面记录规则引擎指标。

/// 注册指标描述
pub fn describe() {
    metrics::describe_counter!(
        "journey_rule_evaluations_total",
        "Total number of journey evaluations"
    );
    metrics::describe_histogram!(
        "journey_rule_evaluation_duration_seconds",
        "Journey evaluation duration in seconds"
    );
    metrics::describe_counter!(
        "journey_rules_skipped_total",
        "Rules skipped during evaluation, by error kind"
    );
    metrics::describe_counter!(
        "journey_rule_field_warnings_total",
        "Condition fields missing from the evaluation context"
    );
    metrics::describe_counter!(
        "journey_rule_snapshot_reloads_total",
        "Rule snapshot reload attempts"
    );
}

/// 记录一次旅程评估
#[inline]
pub fn record_journey_evaluation(status: &str, duration_secs: f64) {
    metrics::counter!(
        "journey_rule_evaluations_total",
        "status" => status.to_string()
    )
    .increment(1);

    metrics::histogram!("journey_rule_evaluation_duration_seconds").record(duration_secs);
}

/// 记录被跳过的规则
#[inline]
pub fn record_rule_skipped(reason: &str) {
    metrics::counter!(
        "journey_rules_skipped_total",
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// 记录上下文中缺失的条件字段
#[inline]
pub fn record_field_warning() {
    metrics::counter!("journey_rule_field_warnings_total").increment(1);
}

/// 记录快照重载
#[inline]
pub fn record_snapshot_reload(status: &str) {
    metrics::counter!(
        "journey_rule_snapshot_reloads_total",
        "status" => status.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_functions_do_not_panic() {
        // 即使没有安装 recorder，这些函数也不应该 panic
        describe();
        record_journey_evaluation("DONE", 0.01);
        record_journey_evaluation("FAILED", 0.001);
        record_rule_skipped("type_mismatch");
        record_field_warning();
        record_snapshot_reload("success");
    }
}
