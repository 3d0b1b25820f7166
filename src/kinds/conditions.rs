//! Built-in condition kinds backed by the activity ledger.
//!
//! Each kind has one pure predicate over the (trigger, user) activity row.
//! `is_satisfied` evaluates it directly; `filter_users` excludes exactly the
//! users whose row fails it, expressed as a `NOT IN` subquery so users
//! without a row are always kept.

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, Utc};
use sea_orm::sea_query::Query;
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Select};
use serde_json::Value as JsonValue;

use super::{ConditionKind, KindError};
use crate::models::{trigger_activity, user};

pub const ACTION_COUNT: &str = "action_count";
pub const ACTION_FREQUENCY: &str = "action_frequency";

/// True while the user has been counted fewer than `limit` times.
pub fn below_count_limit(activity: Option<&trigger_activity::Model>, limit: i32) -> bool {
    activity.map_or(0, |a| a.action_count) < limit
}

/// True when the last counted batch is at least `limit` old, or absent.
pub fn outside_frequency_window(
    activity: Option<&trigger_activity::Model>,
    limit: Duration,
    now: DateTime<FixedOffset>,
) -> bool {
    match activity.and_then(|a| a.last_action_datetime) {
        Some(last) => now.signed_duration_since(last) >= limit,
        None => true,
    }
}

async fn find_activity(
    db: &DatabaseConnection,
    trigger_id: i32,
    user_id: i32,
) -> Result<Option<trigger_activity::Model>, DbErr> {
    trigger_activity::Entity::find()
        .filter(trigger_activity::Column::TriggerId.eq(trigger_id))
        .filter(trigger_activity::Column::UserId.eq(user_id))
        .one(db)
        .await
}

/// Excludes users whose `action_count` reached `limit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionCountCondition {
    limit: i32,
}

impl ActionCountCondition {
    pub fn new(limit: i32) -> Result<Self, KindError> {
        if limit < 1 {
            return Err(KindError::invalid(
                ACTION_COUNT,
                format!("limit must be a positive integer, got {limit}"),
            ));
        }
        Ok(Self { limit })
    }

    /// Parses `{"limit": <positive integer>}`.
    pub fn from_params(params: &JsonValue) -> Result<Self, KindError> {
        let limit = params
            .get("limit")
            .and_then(JsonValue::as_i64)
            .ok_or_else(|| KindError::invalid(ACTION_COUNT, "missing integer 'limit'"))?;
        let limit = i32::try_from(limit)
            .map_err(|_| KindError::invalid(ACTION_COUNT, "limit out of range"))?;
        Self::new(limit)
    }

    pub fn limit(&self) -> i32 {
        self.limit
    }
}

#[async_trait]
impl ConditionKind for ActionCountCondition {
    fn kind(&self) -> &'static str {
        ACTION_COUNT
    }

    fn filter_users(&self, trigger_id: i32, users: Select<user::Entity>) -> Select<user::Entity> {
        let over_limit = Query::select()
            .column(trigger_activity::Column::UserId)
            .from(trigger_activity::Entity)
            .and_where(trigger_activity::Column::TriggerId.eq(trigger_id))
            .and_where(trigger_activity::Column::ActionCount.gte(self.limit))
            .to_owned();
        users.filter(user::Column::Id.not_in_subquery(over_limit))
    }

    async fn is_satisfied(
        &self,
        db: &DatabaseConnection,
        trigger_id: i32,
        user: &user::Model,
    ) -> Result<bool, DbErr> {
        let activity = find_activity(db, trigger_id, user.id).await?;
        Ok(below_count_limit(activity.as_ref(), self.limit))
    }

    fn admits(&self, activity: &trigger_activity::Model, _now: DateTime<FixedOffset>) -> bool {
        below_count_limit(Some(activity), self.limit)
    }
}

/// Excludes users whose last counted batch is more recent than `limit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionFrequencyCondition {
    limit: Duration,
}

impl ActionFrequencyCondition {
    pub fn new(limit: Duration) -> Result<Self, KindError> {
        if limit < Duration::zero() {
            return Err(KindError::invalid(
                ACTION_FREQUENCY,
                "limit_seconds must not be negative",
            ));
        }
        Ok(Self { limit })
    }

    /// Parses `{"limit_seconds": <non-negative integer>}`.
    pub fn from_params(params: &JsonValue) -> Result<Self, KindError> {
        let seconds = params
            .get("limit_seconds")
            .and_then(JsonValue::as_i64)
            .ok_or_else(|| {
                KindError::invalid(ACTION_FREQUENCY, "missing integer 'limit_seconds'")
            })?;
        let limit = Duration::try_seconds(seconds)
            .ok_or_else(|| KindError::invalid(ACTION_FREQUENCY, "limit_seconds out of range"))?;
        Self::new(limit)
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }
}

#[async_trait]
impl ConditionKind for ActionFrequencyCondition {
    fn kind(&self) -> &'static str {
        ACTION_FREQUENCY
    }

    fn filter_users(&self, trigger_id: i32, users: Select<user::Entity>) -> Select<user::Entity> {
        let cutoff = Utc::now().fixed_offset() - self.limit;
        let too_recent = Query::select()
            .column(trigger_activity::Column::UserId)
            .from(trigger_activity::Entity)
            .and_where(trigger_activity::Column::TriggerId.eq(trigger_id))
            .and_where(trigger_activity::Column::LastActionDatetime.gt(cutoff))
            .to_owned();
        users.filter(user::Column::Id.not_in_subquery(too_recent))
    }

    async fn is_satisfied(
        &self,
        db: &DatabaseConnection,
        trigger_id: i32,
        user: &user::Model,
    ) -> Result<bool, DbErr> {
        let activity = find_activity(db, trigger_id, user.id).await?;
        Ok(outside_frequency_window(
            activity.as_ref(),
            self.limit,
            Utc::now().fixed_offset(),
        ))
    }

    fn admits(&self, activity: &trigger_activity::Model, now: DateTime<FixedOffset>) -> bool {
        outside_frequency_window(Some(activity), self.limit, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn activity(count: i32, last: Option<DateTime<FixedOffset>>) -> trigger_activity::Model {
        trigger_activity::Model {
            id: 1,
            trigger_id: 1,
            user_id: 1,
            last_action_datetime: last,
            action_count: count,
        }
    }

    #[test]
    fn count_limit_params() {
        assert_eq!(
            ActionCountCondition::from_params(&json!({"limit": 2}))
                .unwrap()
                .limit(),
            2
        );
        assert!(ActionCountCondition::from_params(&json!({"limit": 0})).is_err());
        assert!(ActionCountCondition::from_params(&json!({"limit": "2"})).is_err());
        assert!(ActionCountCondition::from_params(&json!({})).is_err());
    }

    #[test]
    fn frequency_limit_params() {
        let condition =
            ActionFrequencyCondition::from_params(&json!({"limit_seconds": 3})).unwrap();
        assert_eq!(condition.limit(), Duration::seconds(3));
        assert!(ActionFrequencyCondition::from_params(&json!({"limit_seconds": -1})).is_err());
        assert!(ActionFrequencyCondition::from_params(&json!({"limit": 3})).is_err());
    }

    #[test]
    fn count_predicate() {
        assert!(below_count_limit(None, 2));
        assert!(below_count_limit(Some(&activity(1, None)), 2));
        assert!(!below_count_limit(Some(&activity(2, None)), 2));
        assert!(!below_count_limit(Some(&activity(3, None)), 2));
    }

    #[test]
    fn locked_row_recheck() {
        let now = Utc::now().fixed_offset();
        let count = ActionCountCondition::new(1).unwrap();
        let frequency = ActionFrequencyCondition::new(Duration::seconds(60)).unwrap();

        assert!(count.admits(&activity(0, None), now));
        assert!(!count.admits(&activity(1, None), now));
        assert!(frequency.admits(&activity(1, None), now));
        assert!(!frequency.admits(&activity(1, Some(now - Duration::seconds(10))), now));

        let conditions: [(i32, &dyn ConditionKind); 2] = [(7, &frequency), (8, &count)];
        assert_eq!(
            crate::kinds::first_refusal(conditions, &activity(1, None), now),
            Some(8)
        );
        assert_eq!(
            crate::kinds::first_refusal(conditions, &activity(0, None), now),
            None
        );
    }

    #[test]
    fn frequency_predicate() {
        let now = Utc::now().fixed_offset();
        let limit = Duration::seconds(3);

        assert!(outside_frequency_window(None, limit, now));
        assert!(outside_frequency_window(
            Some(&activity(0, None)),
            limit,
            now
        ));
        assert!(!outside_frequency_window(
            Some(&activity(1, Some(now - Duration::seconds(1)))),
            limit,
            now
        ));
        assert!(outside_frequency_window(
            Some(&activity(1, Some(now - Duration::seconds(5)))),
            limit,
            now
        ));
    }
}
