//! Entity lookup for audit rows.
//!
//! Log rows store a stable `entity_type` tag instead of a type path. This
//! table maps each tag to the function that loads the referenced row.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::OnceLock;

use sea_orm::{DatabaseConnection, DbErr, EntityTrait};
use tracing::warn;

use super::EntityType;
use crate::models::{trigger, trigger_action, trigger_condition, trigger_event, trigger_log};

/// Entity referenced by a log row.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedEntity {
    Event(trigger_event::Model),
    Trigger(trigger::Model),
    Condition(trigger_condition::Model),
    Action(trigger_action::Model),
}

type LookupFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Option<ResolvedEntity>, DbErr>> + Send + 'a>>;
type LookupFn = for<'a> fn(&'a DatabaseConnection, i32) -> LookupFuture<'a>;

fn lookups() -> &'static HashMap<&'static str, LookupFn> {
    static LOOKUPS: OnceLock<HashMap<&'static str, LookupFn>> = OnceLock::new();
    LOOKUPS.get_or_init(|| {
        let mut table: HashMap<&'static str, LookupFn> = HashMap::new();
        table.insert(EntityType::Event.as_str(), lookup_event);
        table.insert(EntityType::Trigger.as_str(), lookup_trigger);
        table.insert(EntityType::Condition.as_str(), lookup_condition);
        table.insert(EntityType::Action.as_str(), lookup_action);
        table
    })
}

fn lookup_event(db: &DatabaseConnection, id: i32) -> LookupFuture<'_> {
    Box::pin(async move {
        Ok(trigger_event::Entity::find_by_id(id)
            .one(db)
            .await?
            .map(ResolvedEntity::Event))
    })
}

fn lookup_trigger(db: &DatabaseConnection, id: i32) -> LookupFuture<'_> {
    Box::pin(async move {
        Ok(trigger::Entity::find_by_id(id)
            .one(db)
            .await?
            .map(ResolvedEntity::Trigger))
    })
}

fn lookup_condition(db: &DatabaseConnection, id: i32) -> LookupFuture<'_> {
    Box::pin(async move {
        Ok(trigger_condition::Entity::find_by_id(id)
            .one(db)
            .await?
            .map(ResolvedEntity::Condition))
    })
}

fn lookup_action(db: &DatabaseConnection, id: i32) -> LookupFuture<'_> {
    Box::pin(async move {
        Ok(trigger_action::Entity::find_by_id(id)
            .one(db)
            .await?
            .map(ResolvedEntity::Action))
    })
}

/// Loads the entity a log row points at. Unknown tags, deleted rows and
/// lookup errors all yield `None`.
pub async fn resolve_entity(
    db: &DatabaseConnection,
    log: &trigger_log::Model,
) -> Option<ResolvedEntity> {
    let lookup = lookups().get(log.entity_type.as_str())?;
    match lookup(db, log.entity_id).await {
        Ok(entity) => entity,
        Err(err) => {
            warn!(
                log_id = log.id,
                entity_type = %log.entity_type,
                entity_id = log.entity_id,
                error = %err,
                "Audit entity lookup failed"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_entity_type_has_a_lookup() {
        for entity_type in [
            EntityType::Event,
            EntityType::Trigger,
            EntityType::Condition,
            EntityType::Action,
        ] {
            assert!(lookups().contains_key(entity_type.as_str()));
        }
        assert!(!lookups().contains_key("appointment"));
    }
}
