//! 旅程仓储接口
//!
//! 引擎只读取旅程，不回写。变更后的旅程只作为评估结果返回给调用方。

use crate::error::{Result, RuleError};
use crate::journey::Journey;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

/// 旅程仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JourneyRepository: Send + Sync {
    async fn get_journey_by_id(&self, journey_id: &str) -> Result<Journey>;
}

/// 内存旅程仓储
#[derive(Clone, Default)]
pub struct InMemoryJourneyRepository {
    journeys: Arc<DashMap<String, Journey>>,
}

impl InMemoryJourneyRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, journey: Journey) {
        self.journeys.insert(journey.id.clone(), journey);
    }

    pub fn len(&self) -> usize {
        self.journeys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.journeys.is_empty()
    }

    /// 从 JSON 数组加载旅程，返回加载数量
    pub fn load_from_json(&self, json: &str) -> Result<usize> {
        let journeys: Vec<Journey> = serde_json::from_str(json)?;
        let count = journeys.len();
        for journey in journeys {
            self.insert(journey);
        }
        info!("已加载 {} 条旅程", count);
        Ok(count)
    }
}

#[async_trait]
impl JourneyRepository for InMemoryJourneyRepository {
    async fn get_journey_by_id(&self, journey_id: &str) -> Result<Journey> {
        self.journeys
            .get(journey_id)
            .map(|j| j.value().clone())
            .ok_or_else(|| RuleError::JourneyNotFound(journey_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journey::Phase;

    #[tokio::test]
    async fn test_get_journey_by_id() {
        let repo = InMemoryJourneyRepository::new();
        repo.insert(
            Journey::new("j-1", "onboarding", vec![Phase::new("a", "A", 1)]).unwrap(),
        );

        let journey = repo.get_journey_by_id("j-1").await.unwrap();
        assert_eq!(journey.phase_ids(), vec!["a"]);

        let err = repo.get_journey_by_id("j-2").await.unwrap_err();
        assert!(matches!(err, RuleError::JourneyNotFound(_)));
    }

    #[test]
    fn test_load_from_json() {
        let repo = InMemoryJourneyRepository::new();
        let count = repo
            .load_from_json(
                r#"[
                    {"id": "j-1", "name": "retail", "phases": [{"id": "a", "name": "A", "target_duration_days": 1}]},
                    {"id": "j-2", "name": "corporate", "phases": []}
                ]"#,
            )
            .unwrap();

        assert_eq!(count, 2);
        assert_eq!(repo.len(), 2);
    }

    #[test]
    fn test_load_rejects_duplicate_phases() {
        let repo = InMemoryJourneyRepository::new();
        let result = repo.load_from_json(
            r#"[{"id": "j-1", "name": "n", "phases": [
                {"id": "a", "name": "A", "target_duration_days": 1},
                {"id": "a", "name": "A", "target_duration_days": 1}
            ]}]"#,
        );
        assert!(result.is_err());
        assert!(repo.is_empty());
    }
}
