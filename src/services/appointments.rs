use crate::{
    config::AppConfig,
    db::DbPool,
    entities::appointment::{self, AppointmentPackage, AppointmentPaymentStatus},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Grooming and care appointment bookings.
///
/// An appointment is unpaid until its payment is confirmed through the
/// ledger, which also awards the package's loyalty points exactly once.
#[derive(Clone)]
pub struct AppointmentService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
}

impl AppointmentService {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>, config: Arc<AppConfig>) -> Self {
        Self {
            db,
            event_sender,
            config,
        }
    }

    /// Books an appointment at the package's configured price.
    #[instrument(skip(self, input), fields(package = %input.package))]
    pub async fn book(
        &self,
        input: BookAppointmentInput,
    ) -> Result<appointment::Model, ServiceError> {
        input.validate()?;

        let now = Utc::now();
        let record = appointment::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_email: Set(input.customer_email),
            service_name: Set(input.service_name),
            package: Set(input.package),
            amount: Set(self.package_price(input.package)),
            scheduled_for: Set(input.scheduled_for),
            payment_status: Set(AppointmentPaymentStatus::Unpaid),
            points_awarded: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        info!(appointment_id = %record.id, amount = %record.amount, "booked appointment");
        self.event_sender
            .send_or_log(Event::AppointmentBooked(record.id))
            .await;
        Ok(record)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, appointment_id: Uuid) -> Result<appointment::Model, ServiceError> {
        appointment::Entity::find_by_id(appointment_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Appointment {} not found", appointment_id))
            })
    }

    /// Booking history for one customer email, newest first.
    #[instrument(skip(self))]
    pub async fn list_for_email(
        &self,
        customer_email: &str,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<appointment::Model>, u64), ServiceError> {
        let paginator = appointment::Entity::find()
            .filter(appointment::Column::CustomerEmail.eq(customer_email))
            .order_by_desc(appointment::Column::CreatedAt)
            .paginate(&*self.db, per_page.clamp(1, 100));
        let total = paginator.num_items().await?;
        let appointments = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((appointments, total))
    }

    fn package_price(&self, package: AppointmentPackage) -> Decimal {
        let commerce = &self.config.commerce;
        match package {
            AppointmentPackage::Basic => commerce.package_price_basic,
            AppointmentPackage::Premium => commerce.package_price_premium,
            AppointmentPackage::Luxury => commerce.package_price_luxury,
        }
    }
}

/// Input for booking an appointment.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BookAppointmentInput {
    #[validate(email)]
    pub customer_email: String,
    #[validate(length(min = 1, max = 200))]
    pub service_name: String,
    pub package: AppointmentPackage,
    pub scheduled_for: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn package_prices_come_from_config() {
        let config = Arc::new(AppConfig::new("sqlite::memory:"));
        let (sender, _rx) = tokio::sync::mpsc::channel(8);
        let service = AppointmentService::new(
            Arc::new(sea_orm::DatabaseConnection::default()),
            Arc::new(crate::events::EventSender::new(sender)),
            config,
        );
        assert_eq!(service.package_price(AppointmentPackage::Basic), dec!(499));
        assert_eq!(
            service.package_price(AppointmentPackage::Premium),
            dec!(999)
        );
        assert_eq!(
            service.package_price(AppointmentPackage::Luxury),
            dec!(1999)
        );
    }

    #[test]
    fn booking_input_requires_service_name() {
        let input = BookAppointmentInput {
            customer_email: "pat@example.com".to_string(),
            service_name: "".to_string(),
            package: AppointmentPackage::Basic,
            scheduled_for: None,
        };
        assert!(input.validate().is_err());
    }
}
