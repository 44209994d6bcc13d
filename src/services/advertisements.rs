use crate::{
    config::AppConfig,
    db::DbPool,
    entities::advertisement::{self, AdvertisementPaymentStatus, AdvertisementStatus},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Provider advertisement listings.
///
/// A submission is charged the configured flat fee and must clear two gates
/// before it shows on the public board: admin approval and payment of the
/// fee through the ledger.
#[derive(Clone)]
pub struct AdvertisementService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
}

impl AdvertisementService {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>, config: Arc<AppConfig>) -> Self {
        Self {
            db,
            event_sender,
            config,
        }
    }

    #[instrument(skip(self, input), fields(provider_id = %provider_id))]
    pub async fn submit(
        &self,
        provider_id: Uuid,
        input: SubmitAdvertisementInput,
    ) -> Result<advertisement::Model, ServiceError> {
        input.validate()?;

        let now = Utc::now();
        let record = advertisement::ActiveModel {
            id: Set(Uuid::new_v4()),
            provider_id: Set(provider_id),
            title: Set(input.title),
            body: Set(input.body),
            image_url: Set(input.image_url),
            fee: Set(self.config.commerce.advertisement_fee),
            status: Set(AdvertisementStatus::Pending),
            payment_status: Set(AdvertisementPaymentStatus::Pending),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        info!(advertisement_id = %record.id, "submitted advertisement");
        self.event_sender
            .send_or_log(Event::AdvertisementSubmitted(record.id))
            .await;
        Ok(record)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, advertisement_id: Uuid) -> Result<advertisement::Model, ServiceError> {
        advertisement::Entity::find_by_id(advertisement_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Advertisement {} not found", advertisement_id))
            })
    }

    /// The public board: approved listings whose fee has been paid.
    #[instrument(skip(self))]
    pub async fn list_published(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<advertisement::Model>, u64), ServiceError> {
        let paginator = advertisement::Entity::find()
            .filter(advertisement::Column::Status.eq(AdvertisementStatus::Approved))
            .filter(advertisement::Column::PaymentStatus.eq(AdvertisementPaymentStatus::Paid))
            .order_by_desc(advertisement::Column::CreatedAt)
            .paginate(&*self.db, per_page.clamp(1, 100));
        let total = paginator.num_items().await?;
        let ads = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((ads, total))
    }

    /// A provider's own submissions regardless of state, newest first.
    #[instrument(skip(self))]
    pub async fn list_for_provider(
        &self,
        provider_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<advertisement::Model>, u64), ServiceError> {
        let paginator = advertisement::Entity::find()
            .filter(advertisement::Column::ProviderId.eq(provider_id))
            .order_by_desc(advertisement::Column::CreatedAt)
            .paginate(&*self.db, per_page.clamp(1, 100));
        let total = paginator.num_items().await?;
        let ads = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((ads, total))
    }

    #[instrument(skip(self))]
    pub async fn approve(&self, advertisement_id: Uuid) -> Result<advertisement::Model, ServiceError> {
        self.moderate(advertisement_id, AdvertisementStatus::Approved)
            .await
    }

    #[instrument(skip(self))]
    pub async fn reject(&self, advertisement_id: Uuid) -> Result<advertisement::Model, ServiceError> {
        self.moderate(advertisement_id, AdvertisementStatus::Rejected)
            .await
    }

    /// Moderation only moves a listing out of pending once; a second verdict
    /// is a conflict.
    async fn moderate(
        &self,
        advertisement_id: Uuid,
        verdict: AdvertisementStatus,
    ) -> Result<advertisement::Model, ServiceError> {
        let result = advertisement::Entity::update_many()
            .col_expr(advertisement::Column::Status, Expr::value(verdict))
            .col_expr(advertisement::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(advertisement::Column::Id.eq(advertisement_id))
            .filter(advertisement::Column::Status.eq(AdvertisementStatus::Pending))
            .exec(&*self.db)
            .await?;

        let record = self.get(advertisement_id).await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(format!(
                "Advertisement {} has already been moderated as {}",
                advertisement_id, record.status
            )));
        }

        let event = match verdict {
            AdvertisementStatus::Approved => Event::AdvertisementApproved(advertisement_id),
            _ => Event::AdvertisementRejected(advertisement_id),
        };
        self.event_sender.send_or_log(event).await;
        Ok(record)
    }
}

/// Input for submitting an advertisement.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SubmitAdvertisementInput {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(max = 4000))]
    pub body: Option<String>,
    #[validate(url)]
    pub image_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submission_requires_title() {
        let input = SubmitAdvertisementInput {
            title: "".to_string(),
            body: None,
            image_url: None,
        };
        assert!(input.validate().is_err());
    }

    #[test]
    fn submission_accepts_plain_listing() {
        let input = SubmitAdvertisementInput {
            title: "Dog walking in the city center".to_string(),
            body: Some("Weekday mornings, small dogs preferred.".to_string()),
            image_url: None,
        };
        assert!(input.validate().is_ok());
    }
}
