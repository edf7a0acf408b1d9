//! 风险评分
//!
//! 每个严重程度占据 [0, 1] 中的一段区间，得分落在已记录变更中最高严重程度的区间内，
//! 区间内的位置由所有变更的饱和组合 `1 - Π(1 - wᵢ)` 决定。
//! 有限数量的低严重程度变更永远达不到更高一档的下界，多个 CRITICAL 变更趋近 1.0。

use crate::journey::ModificationRecord;
use crate::models::Criticality;

/// 每档区间宽度
const BAND_WIDTH: f64 = 0.25;

/// 严重程度所在区间的下界
fn band_floor(criticality: Criticality) -> f64 {
    match criticality {
        Criticality::Low => 0.0,
        Criticality::Medium => 0.25,
        Criticality::High => 0.5,
        Criticality::Critical => 0.75,
    }
}

/// 单条变更在饱和组合中的权重
fn severity_weight(criticality: Criticality) -> f64 {
    match criticality {
        Criticality::Low => 0.10,
        Criticality::Medium => 0.20,
        Criticality::High => 0.35,
        Criticality::Critical => 0.50,
    }
}

/// 根据严重程度序列计算风险分
pub fn score<I>(criticalities: I) -> f64
where
    I: IntoIterator<Item = Criticality>,
{
    let mut top: Option<Criticality> = None;
    let mut remaining = 1.0_f64;

    for criticality in criticalities {
        top = top.max(Some(criticality));
        remaining *= 1.0 - severity_weight(criticality);
    }

    match top {
        None => 0.0,
        Some(top) => (band_floor(top) + BAND_WIDTH * (1.0 - remaining)).clamp(0.0, 1.0),
    }
}

/// 根据变更记录计算风险分（重复抑制的记录同样计入）
pub fn score_modifications(records: &[ModificationRecord]) -> f64 {
    score(records.iter().map(|r| r.criticality))
}

#[cfg(test)]
mod tests {
    use super::*;
    use Criticality::*;

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(score(Vec::new()), 0.0);
    }

    #[test]
    fn test_single_values() {
        assert!((score([Low]) - 0.025).abs() < 1e-9);
        assert!((score([Critical]) - 0.875).abs() < 1e-9);
    }

    #[test]
    fn test_monotonic_in_count() {
        let mut previous = 0.0;
        for n in 1..50 {
            let s = score(std::iter::repeat_n(Medium, n));
            assert!(s > previous);
            previous = s;
        }
    }

    #[test]
    fn test_monotonic_in_severity() {
        let levels = [Low, Medium, High, Critical];
        for pair in levels.windows(2) {
            assert!(score([pair[1]]) > score([pair[0]]));
        }
        // 追加更低的严重程度也不会降低得分
        assert!(score([High, Low]) > score([High]));
    }

    #[test]
    fn test_many_low_below_single_critical() {
        let many_low = score(std::iter::repeat_n(Low, 200));
        assert!(many_low < 0.25);
        assert!(many_low < score([Critical]));
        assert!(score(std::iter::repeat_n(High, 200)) < score([Critical]));
    }

    #[test]
    fn test_many_critical_saturates() {
        let s = score(std::iter::repeat_n(Critical, 100));
        assert!(s <= 1.0);
        assert!(s > 0.99);
    }
}
