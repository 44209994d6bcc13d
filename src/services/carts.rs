use crate::{
    db::DbPool,
    entities::{cart, cart_item, product},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Shopping cart operations.
///
/// Every customer has at most one cart, created lazily on first access and
/// cleared rather than deleted, so the row id stays stable for its lifetime.
/// Line items snapshot the product's name and price at add time; checkout
/// re-reads live stock but charges the snapshotted price.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl CartService {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Returns the customer's cart, creating an empty one if none exists yet.
    #[instrument(skip(self))]
    pub async fn get_or_create(&self, customer_id: Uuid) -> Result<cart::Model, ServiceError> {
        Self::find_or_create_on(&*self.db, customer_id).await
    }

    /// The cart plus its line items, oldest line first.
    #[instrument(skip(self))]
    pub async fn get_with_items(&self, customer_id: Uuid) -> Result<CartWithItems, ServiceError> {
        let cart = Self::find_or_create_on(&*self.db, customer_id).await?;
        let items = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(CartWithItems { cart, items })
    }

    /// Adds a product to the cart, merging with an existing line for the same
    /// product code by summing quantities.
    #[instrument(skip(self, input), fields(product_code = %input.product_code))]
    pub async fn add_item(
        &self,
        customer_id: Uuid,
        input: AddToCartInput,
    ) -> Result<CartWithItems, ServiceError> {
        input.validate()?;

        let txn = self.db.begin().await?;

        let cart = Self::find_or_create_on(&txn, customer_id).await?;
        let product = product::Entity::find()
            .filter(product::Column::Code.eq(input.product_code.as_str()))
            .filter(product::Column::Active.eq(true))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", input.product_code))
            })?;

        let existing = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductCode.eq(product.code.as_str()))
            .one(&txn)
            .await?;

        match existing {
            Some(item) => {
                let quantity = item.quantity + input.quantity;
                let mut active: cart_item::ActiveModel = item.into();
                active.quantity = Set(quantity);
                active.updated_at = Set(Utc::now());
                active.update(&txn).await?;
            }
            None => {
                let now = Utc::now();
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart.id),
                    product_code: Set(product.code.clone()),
                    name: Set(product.name.clone()),
                    price: Set(product.price),
                    image_url: Set(product.image_url.clone()),
                    quantity: Set(input.quantity),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await?;
            }
        }

        Self::recalculate_subtotal(&txn, cart.id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemAdded {
                cart_id: cart.id,
                product_code: input.product_code,
            })
            .await;

        self.get_with_items(customer_id).await
    }

    /// Sets a line's quantity; zero or below removes the line.
    #[instrument(skip(self))]
    pub async fn update_item(
        &self,
        customer_id: Uuid,
        product_code: &str,
        quantity: i32,
    ) -> Result<CartWithItems, ServiceError> {
        if quantity <= 0 {
            return self.remove_item(customer_id, product_code).await;
        }

        let txn = self.db.begin().await?;

        let cart = Self::find_or_create_on(&txn, customer_id).await?;
        let item = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductCode.eq(product_code))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Cart item {} not found", product_code))
            })?;

        let mut active: cart_item::ActiveModel = item.into();
        active.quantity = Set(quantity);
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;

        Self::recalculate_subtotal(&txn, cart.id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemUpdated {
                cart_id: cart.id,
                product_code: product_code.to_string(),
            })
            .await;

        self.get_with_items(customer_id).await
    }

    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        customer_id: Uuid,
        product_code: &str,
    ) -> Result<CartWithItems, ServiceError> {
        let txn = self.db.begin().await?;

        let cart = Self::find_or_create_on(&txn, customer_id).await?;
        let deleted = cart_item::Entity::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductCode.eq(product_code))
            .exec(&txn)
            .await?;

        if deleted.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Cart item {} not found",
                product_code
            )));
        }

        Self::recalculate_subtotal(&txn, cart.id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemRemoved {
                cart_id: cart.id,
                product_code: product_code.to_string(),
            })
            .await;

        self.get_with_items(customer_id).await
    }

    /// Empties the cart. The cart row itself survives.
    #[instrument(skip(self))]
    pub async fn clear(&self, customer_id: Uuid) -> Result<cart::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let cart = Self::find_or_create_on(&txn, customer_id).await?;
        Self::clear_on(&txn, cart.id).await?;
        txn.commit().await?;

        info!(cart_id = %cart.id, "cleared cart");
        self.event_sender
            .send_or_log(Event::CartCleared(cart.id))
            .await;

        Self::find_or_create_on(&*self.db, customer_id).await
    }

    /// Deletes all items and zeroes the subtotal on the given connection.
    /// Checkout reuses this inside its own transaction.
    pub(crate) async fn clear_on(
        conn: &impl ConnectionTrait,
        cart_id: Uuid,
    ) -> Result<(), ServiceError> {
        cart_item::Entity::delete_many()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .exec(conn)
            .await?;
        cart::ActiveModel {
            id: Set(cart_id),
            subtotal: Set(Decimal::ZERO),
            updated_at: Set(Utc::now()),
            ..Default::default()
        }
        .update(conn)
        .await?;
        Ok(())
    }

    pub(crate) async fn find_or_create_on(
        conn: &impl ConnectionTrait,
        customer_id: Uuid,
    ) -> Result<cart::Model, ServiceError> {
        if let Some(existing) = cart::Entity::find()
            .filter(cart::Column::CustomerId.eq(customer_id))
            .one(conn)
            .await?
        {
            return Ok(existing);
        }

        let now = Utc::now();
        let inserted = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_id: Set(customer_id),
            subtotal: Set(Decimal::ZERO),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(conn)
        .await;

        match inserted {
            Ok(cart) => Ok(cart),
            // The unique index on customer_id means a concurrent first access
            // beat us to the insert; the winner's row is the cart.
            Err(insert_err) => cart::Entity::find()
                .filter(cart::Column::CustomerId.eq(customer_id))
                .one(conn)
                .await?
                .ok_or(ServiceError::DatabaseError(insert_err)),
        }
    }

    /// Recomputes the cart subtotal from its line items.
    pub(crate) async fn recalculate_subtotal(
        conn: &impl ConnectionTrait,
        cart_id: Uuid,
    ) -> Result<Decimal, ServiceError> {
        let items = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .all(conn)
            .await?;

        let subtotal = items
            .iter()
            .map(|item| item.price * Decimal::from(item.quantity))
            .sum::<Decimal>();

        cart::ActiveModel {
            id: Set(cart_id),
            subtotal: Set(subtotal),
            updated_at: Set(Utc::now()),
            ..Default::default()
        }
        .update(conn)
        .await?;

        Ok(subtotal)
    }
}

/// A cart together with its line items.
#[derive(Debug, Clone, Serialize)]
pub struct CartWithItems {
    pub cart: cart::Model,
    pub items: Vec<cart_item::Model>,
}

impl CartWithItems {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Input for adding a product to the cart.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AddToCartInput {
    #[validate(length(min = 1, max = 64))]
    pub product_code: String,
    #[validate(range(min = 1, max = 999))]
    pub quantity: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_input_requires_positive_quantity() {
        let input = AddToCartInput {
            product_code: "TOY-1".to_string(),
            quantity: 0,
        };
        assert!(input.validate().is_err());
    }

    #[test]
    fn add_input_accepts_reasonable_line() {
        let input = AddToCartInput {
            product_code: "TOY-1".to_string(),
            quantity: 3,
        };
        assert!(input.validate().is_ok());
    }
}
