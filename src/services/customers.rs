use crate::{
    db::DbPool,
    entities::customer,
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Customer registry. Identity is asserted by the gateway; this service owns
/// the persisted profile the commerce flows hang off, including the loyalty
/// point balance column.
#[derive(Clone)]
pub struct CustomerService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl CustomerService {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Creates the customer profile for an authenticated identity.
    ///
    /// The id is the gateway-assigned user id, so carts and orders created
    /// under that identity resolve to this row. Registering twice, or with
    /// an email already in use, is a conflict.
    #[instrument(skip(self, input), fields(customer_id = %customer_id))]
    pub async fn register(
        &self,
        customer_id: Uuid,
        input: RegisterCustomerInput,
    ) -> Result<customer::Model, ServiceError> {
        input.validate()?;

        if customer::Entity::find_by_id(customer_id)
            .one(&*self.db)
            .await?
            .is_some()
        {
            return Err(ServiceError::Conflict(format!(
                "Customer {} is already registered",
                customer_id
            )));
        }

        if customer::Entity::find()
            .filter(customer::Column::Email.eq(input.email.as_str()))
            .one(&*self.db)
            .await?
            .is_some()
        {
            return Err(ServiceError::Conflict(format!(
                "Email {} is already registered",
                input.email
            )));
        }

        let now = Utc::now();
        let record = customer::ActiveModel {
            id: Set(customer_id),
            email: Set(input.email),
            name: Set(input.name),
            loyalty_points: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        info!(customer_id = %record.id, "registered customer");
        self.event_sender
            .send_or_log(Event::CustomerRegistered(record.id))
            .await;
        Ok(record)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, customer_id: Uuid) -> Result<customer::Model, ServiceError> {
        customer::Entity::find_by_id(customer_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Customer {} not found", customer_id)))
    }
}

/// Input for registering a customer profile.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RegisterCustomerInput {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 120))]
    pub name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_input_rejects_bad_email() {
        let input = RegisterCustomerInput {
            email: "not-an-email".to_string(),
            name: None,
        };
        assert!(input.validate().is_err());
    }

    #[test]
    fn register_input_accepts_optional_name() {
        let input = RegisterCustomerInput {
            email: "pat@example.com".to_string(),
            name: Some("Pat".to_string()),
        };
        assert!(input.validate().is_ok());
    }
}
