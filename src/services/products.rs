use crate::{
    db::DbPool,
    entities::product,
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use validator::{Validate, ValidationError};

static PRODUCT_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[A-Za-z0-9][A-Za-z0-9_-]{1,31}$").unwrap());

fn validate_product_code(code: &str) -> Result<(), ValidationError> {
    if PRODUCT_CODE_RE.is_match(code) {
        Ok(())
    } else {
        let mut err = ValidationError::new("product_code");
        err.message = Some("Product code must be 2-32 alphanumeric/_/- characters".into());
        Err(err)
    }
}

fn validate_positive_decimal(value: &Decimal) -> Result<(), ValidationError> {
    if *value > Decimal::ZERO {
        Ok(())
    } else {
        let mut err = ValidationError::new("range");
        err.message = Some("Amount must be greater than 0".into());
        Err(err)
    }
}

/// Product catalog management.
///
/// Products are addressed by their merchant-assigned `code` on every public
/// surface; the Uuid primary key stays internal. Removal is a soft delete so
/// existing cart and order snapshots keep resolving.
#[derive(Clone)]
pub struct ProductService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl ProductService {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    #[instrument(skip(self, input), fields(code = %input.code))]
    pub async fn create(&self, input: CreateProductInput) -> Result<product::Model, ServiceError> {
        input.validate()?;

        if product::Entity::find()
            .filter(product::Column::Code.eq(input.code.as_str()))
            .one(&*self.db)
            .await?
            .is_some()
        {
            return Err(ServiceError::Conflict(format!(
                "Product code {} is already in use",
                input.code
            )));
        }

        let now = Utc::now();
        let record = product::ActiveModel {
            id: Set(uuid::Uuid::new_v4()),
            code: Set(input.code),
            name: Set(input.name),
            description: Set(input.description),
            price: Set(input.price),
            available: Set(input.available),
            image_url: Set(input.image_url),
            active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        info!(code = %record.code, "created product");
        self.event_sender
            .send_or_log(Event::ProductCreated(record.id))
            .await;
        Ok(record)
    }

    /// Active catalog page for the storefront, newest first.
    #[instrument(skip(self))]
    pub async fn list_active(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<product::Model>, u64), ServiceError> {
        let paginator = product::Entity::find()
            .filter(product::Column::Active.eq(true))
            .order_by_desc(product::Column::CreatedAt)
            .paginate(&*self.db, per_page.clamp(1, 100));
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((items, total))
    }

    /// Resolves an active product by its public code.
    #[instrument(skip(self))]
    pub async fn get_by_code(&self, code: &str) -> Result<product::Model, ServiceError> {
        product::Entity::find()
            .filter(product::Column::Code.eq(code))
            .filter(product::Column::Active.eq(true))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", code)))
    }

    /// Applies a partial update, including restocks via `available`.
    #[instrument(skip(self, input))]
    pub async fn update(
        &self,
        code: &str,
        input: UpdateProductInput,
    ) -> Result<product::Model, ServiceError> {
        input.validate()?;

        let record = product::Entity::find()
            .filter(product::Column::Code.eq(code))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", code)))?;

        let mut active: product::ActiveModel = record.into();
        if let Some(name) = input.name {
            active.name = Set(name);
        }
        if let Some(description) = input.description {
            active.description = Set(Some(description));
        }
        if let Some(price) = input.price {
            active.price = Set(price);
        }
        if let Some(available) = input.available {
            active.available = Set(available);
        }
        if let Some(image_url) = input.image_url {
            active.image_url = Set(Some(image_url));
        }
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::ProductUpdated(updated.id))
            .await;
        Ok(updated)
    }

    /// Soft-deletes a product. It disappears from the storefront but stays
    /// resolvable for order history.
    #[instrument(skip(self))]
    pub async fn deactivate(&self, code: &str) -> Result<(), ServiceError> {
        let record = product::Entity::find()
            .filter(product::Column::Code.eq(code))
            .filter(product::Column::Active.eq(true))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", code)))?;

        let id = record.id;
        let mut active: product::ActiveModel = record.into();
        active.active = Set(false);
        active.updated_at = Set(Utc::now());
        active.update(&*self.db).await?;

        info!(code, "deactivated product");
        self.event_sender
            .send_or_log(Event::ProductDeactivated(id))
            .await;
        Ok(())
    }
}

/// Input for creating a catalog product.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateProductInput {
    #[validate(custom = "validate_product_code")]
    pub code: String,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(max = 4000))]
    pub description: Option<String>,
    #[validate(custom = "validate_positive_decimal")]
    pub price: Decimal,
    #[validate(range(min = 0))]
    pub available: i32,
    #[validate(url)]
    pub image_url: Option<String>,
}

/// Partial update; absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateProductInput {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[validate(length(max = 4000))]
    pub description: Option<String>,
    #[validate(custom = "validate_positive_decimal")]
    pub price: Option<Decimal>,
    #[validate(range(min = 0))]
    pub available: Option<i32>,
    #[validate(url)]
    pub image_url: Option<String>,
}
