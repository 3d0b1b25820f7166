use std::sync::Arc;

use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use tracing::{debug, instrument};

use super::{FiredEvent, event_entry};
use crate::audit::Stage;
use crate::engine::{EventOutcome, TriggerEngine};
use crate::error::TriggerError;
use crate::models::{trigger_event, user};

/// Result of handling one fired notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    /// The event, its trigger or the user vanished, or the user no longer
    /// passes the trigger's query filter.
    Dropped,
    Handled(EventOutcome),
}

/// Per-user continuation of a fired event.
#[derive(Clone)]
pub struct EventHandler {
    engine: Arc<TriggerEngine>,
}

impl EventHandler {
    pub fn new(engine: Arc<TriggerEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<TriggerEngine> {
        &self.engine
    }

    /// Reloads everything by id, re-applies the query filter for this one
    /// user, enriches the context and runs the trigger.
    #[instrument(skip_all, fields(event_id = fired.event_id, user_id = fired.user_id))]
    pub async fn handle(&self, fired: &FiredEvent) -> Result<HandleOutcome, TriggerError> {
        let db = self.engine.db();

        let Some(event) = trigger_event::Entity::find_by_id(fired.event_id)
            .one(db)
            .await?
        else {
            debug!("Event deleted before handling");
            return Ok(HandleOutcome::Dropped);
        };

        self.engine
            .audit()
            .log(
                event_entry(&event, Stage::HandleStart)
                    .user(fired.user_id)
                    .run(Some(fired.run_id)),
            )
            .await;

        let trigger = match self.engine.load(event.trigger_id).await {
            Ok(trigger) => trigger,
            Err(TriggerError::NotFound { .. }) => {
                debug!(trigger_id = event.trigger_id, "Trigger deleted before handling");
                return Ok(HandleOutcome::Dropped);
            }
            Err(err) => return Err(err),
        };

        let single = user::Entity::find().filter(user::Column::Id.eq(fired.user_id));
        let Some(user) = self
            .engine
            .filter_user_query(&trigger, single, Some(fired.run_id))
            .await?
            .one(db)
            .await?
        else {
            debug!("User filtered out or deleted before handling");
            return Ok(HandleOutcome::Dropped);
        };

        let kind = self.engine.registry().event(&event.kind, &event.params)?;
        let context = kind.get_user_context(db, &user, &fired.context).await?;

        let outcome = self
            .engine
            .on_event(&trigger, &user, &context, Some(fired.run_id))
            .await?;
        Ok(HandleOutcome::Handled(outcome))
    }
}
