//! Built-in action kinds.

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseTransaction, Set};
use serde_json::Value as JsonValue;
use tracing::debug;

use super::{ActionError, ActionKind, Context, KindError, template};
use crate::models::{message, user};

pub const SEND_MESSAGE: &str = "send_message";

/// Renders `params.text` against the user context and stores it as a
/// message row inside the ledger transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendMessageAction {
    text: String,
}

impl SendMessageAction {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Parses `{"text": "<template>"}`.
    pub fn from_params(params: &JsonValue) -> Result<Self, KindError> {
        let text = params
            .get("text")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| KindError::invalid(SEND_MESSAGE, "missing string 'text'"))?;
        Ok(Self::new(text))
    }

    pub fn render(&self, context: &Context) -> String {
        template::render(&self.text, context)
    }
}

#[async_trait]
impl ActionKind for SendMessageAction {
    fn kind(&self) -> &'static str {
        SEND_MESSAGE
    }

    async fn perform(
        &self,
        txn: &DatabaseTransaction,
        user: &user::Model,
        context: &Context,
    ) -> Result<(), ActionError> {
        let text = self.render(context);
        let row = message::ActiveModel {
            user_id: Set(user.id),
            text: Set(text),
            created_at: Set(Utc::now().fixed_offset()),
            ..Default::default()
        }
        .insert(txn)
        .await?;

        debug!(user_id = user.id, message_id = row.id, "Message stored");
        Ok(())
    }
}
