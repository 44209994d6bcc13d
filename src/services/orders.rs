use crate::{
    config::AppConfig,
    db::DbPool,
    entities::{
        cart, cart_item, customer,
        order::{self, FulfillmentStatus, OrderPaymentStatus},
        order_item,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{carts::CartService, inventory::InventoryService},
};
use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Order lifecycle: checkout, queries, and fulfillment progress.
///
/// Checkout is one transaction that turns the customer's cart into an order
/// under finite stock. Lines the stock cannot cover are reduced or dropped
/// rather than failing the whole order; only a cart with nothing fulfillable
/// at all is rejected, and in that case the transaction rolls back so both
/// stock and cart are left exactly as they were.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    inventory: InventoryService,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
}

impl OrderService {
    pub fn new(
        db: Arc<DbPool>,
        inventory: InventoryService,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            inventory,
            event_sender,
            config,
        }
    }

    /// Converts the customer's cart into an order.
    ///
    /// Every monetary figure is recomputed server side from the fulfilled
    /// lines; a client-claimed subtotal is only compared and logged when it
    /// disagrees. Redeemed points are clamped to the customer's balance at
    /// creation time, but the balance itself is not debited here: the debit
    /// happens exactly once, when the order's payment is confirmed.
    #[instrument(skip(self, input), fields(customer_id = %customer_id))]
    pub async fn checkout(
        &self,
        customer_id: Uuid,
        input: CheckoutInput,
    ) -> Result<CheckoutOutcome, ServiceError> {
        input.validate()?;

        let txn = self.db.begin().await?;

        let customer = customer::Entity::find_by_id(customer_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Customer {} not found", customer_id)))?;

        let cart = cart::Entity::find()
            .filter(cart::Column::CustomerId.eq(customer_id))
            .one(&txn)
            .await?
            .ok_or(ServiceError::EmptyCart)?;

        let lines = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(&txn)
            .await?;
        if lines.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        let mut fulfilled: Vec<(cart_item::Model, i32)> = Vec::new();
        let mut out_of_stock: Vec<OutOfStockItem> = Vec::new();

        for line in lines {
            match self
                .inventory
                .reserve(&txn, &line.product_code, line.quantity)
                .await
            {
                Ok(reservation) if reservation.is_empty() => {
                    out_of_stock.push(OutOfStockItem {
                        product_code: line.product_code.clone(),
                        name: line.name.clone(),
                        requested: line.quantity,
                        granted: 0,
                        reason: "out of stock".to_string(),
                    });
                }
                Ok(reservation) => {
                    if !reservation.is_full() {
                        out_of_stock.push(OutOfStockItem {
                            product_code: line.product_code.clone(),
                            name: line.name.clone(),
                            requested: reservation.requested,
                            granted: reservation.granted,
                            reason: format!(
                                "only {} of {} available",
                                reservation.granted, reservation.requested
                            ),
                        });
                    }
                    let granted = reservation.granted;
                    fulfilled.push((line, granted));
                }
                Err(ServiceError::NotFound(_)) => {
                    out_of_stock.push(OutOfStockItem {
                        product_code: line.product_code.clone(),
                        name: line.name.clone(),
                        requested: line.quantity,
                        granted: 0,
                        reason: "no longer available".to_string(),
                    });
                }
                Err(other) => return Err(other),
            }
        }

        if fulfilled.is_empty() {
            // Dropping the transaction rolls the reservations back and
            // leaves the cart untouched for another attempt.
            return Err(ServiceError::NoItemsAvailable);
        }

        let subtotal = fulfilled
            .iter()
            .map(|(line, granted)| line.price * Decimal::from(*granted))
            .sum::<Decimal>();

        if let Some(claimed) = input.claimed_subtotal {
            if claimed != subtotal {
                warn!(
                    %customer_id,
                    %claimed,
                    computed = %subtotal,
                    "client-claimed subtotal differs from server computation"
                );
            }
        }

        let commerce = &self.config.commerce;
        let points_redeemed = clamp_points(input.points_redeemed, customer.loyalty_points);
        let (discount, total) = order_totals(
            subtotal,
            commerce.delivery_fee,
            commerce.point_value,
            points_redeemed,
        );

        let now = Utc::now();
        let order = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_number: Set(generate_order_number()),
            customer_id: Set(customer_id),
            billing_address: Set(input.billing_address),
            shipping_address: Set(input.shipping_address),
            subtotal: Set(subtotal),
            delivery_fee: Set(commerce.delivery_fee),
            points_redeemed: Set(points_redeemed),
            discount: Set(discount),
            total: Set(total),
            payment_method: Set(input.payment_method),
            payment_status: Set(OrderPaymentStatus::Pending),
            fulfillment_status: Set(FulfillmentStatus::Processing),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let mut items = Vec::with_capacity(fulfilled.len());
        for (line, granted) in fulfilled {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                product_code: Set(line.product_code),
                name: Set(line.name),
                price: Set(line.price),
                image_url: Set(line.image_url),
                quantity: Set(granted),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await?;
            items.push(item);
        }

        CartService::clear_on(&txn, cart.id).await?;
        txn.commit().await?;

        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            %total,
            dropped_or_reduced = out_of_stock.len(),
            "created order from cart"
        );
        self.event_sender
            .send_or_log(Event::OrderCreated(order.id))
            .await;
        if !out_of_stock.is_empty() {
            self.event_sender
                .send_or_log(Event::OrderPartiallyFulfilled {
                    order_id: order.id,
                    dropped_or_reduced: out_of_stock.len(),
                })
                .await;
        }

        Ok(CheckoutOutcome {
            order,
            items,
            out_of_stock_items: out_of_stock,
        })
    }

    /// An order with its snapshot lines. Ownership is the caller's concern.
    #[instrument(skip(self))]
    pub async fn get(&self, order_id: Uuid) -> Result<OrderWithItems, ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(OrderWithItems { order, items })
    }

    /// The customer's order history, newest first.
    #[instrument(skip(self))]
    pub async fn list_for_customer(
        &self,
        customer_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<order::Model>, u64), ServiceError> {
        let paginator = order::Entity::find()
            .filter(order::Column::CustomerId.eq(customer_id))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page.clamp(1, 100));
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((orders, total))
    }

    /// Moves an order along the fulfillment pipeline.
    #[instrument(skip(self))]
    pub async fn update_fulfillment(
        &self,
        order_id: Uuid,
        new_status: FulfillmentStatus,
    ) -> Result<order::Model, ServiceError> {
        let record = order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let old_status = record.fulfillment_status;
        if old_status == new_status {
            return Ok(record);
        }

        let mut active: order::ActiveModel = record.into();
        active.fulfillment_status = Set(new_status);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::FulfillmentStatusChanged {
                order_id,
                old_status: old_status.to_string(),
                new_status: new_status.to_string(),
            })
            .await;
        Ok(updated)
    }
}

/// Clamps a requested redemption to what the balance can actually cover.
pub(crate) fn clamp_points(requested: i32, balance: i32) -> i32 {
    requested.max(0).min(balance.max(0))
}

/// Computes `(discount, total)` for an order.
///
/// `total = max(0, subtotal + delivery_fee - points_redeemed * point_value)`;
/// the full discount is recorded even when the total clamps at zero.
pub(crate) fn order_totals(
    subtotal: Decimal,
    delivery_fee: Decimal,
    point_value: Decimal,
    points_redeemed: i32,
) -> (Decimal, Decimal) {
    let discount = Decimal::from(points_redeemed) * point_value;
    let total = (subtotal + delivery_fee - discount).max(Decimal::ZERO);
    (discount, total)
}

fn generate_order_number() -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..10_000);
    format!("PM-{}-{:04}", Utc::now().format("%Y%m%d%H%M%S"), suffix)
}

/// Checkout request, already translated from the wire shape.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CheckoutInput {
    #[validate(length(min = 1, max = 500))]
    pub billing_address: String,
    #[validate(length(min = 1, max = 500))]
    pub shipping_address: String,
    #[validate(length(min = 1, max = 40))]
    pub payment_method: String,
    #[validate(range(min = 0))]
    pub points_redeemed: i32,
    /// Client-side subtotal, compared against the server computation.
    pub claimed_subtotal: Option<Decimal>,
}

/// What checkout produced: the order, its lines, and whatever could not be
/// fulfilled at the requested quantity.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutOutcome {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
    pub out_of_stock_items: Vec<OutOfStockItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutOfStockItem {
    pub product_code: String,
    pub name: String,
    pub requested: i32,
    pub granted: i32,
    pub reason: String,
}

/// An order with its snapshot line items.
#[derive(Debug, Clone, Serialize)]
pub struct OrderWithItems {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn totals_follow_redemption_formula() {
        let (discount, total) = order_totals(dec!(500), dec!(50), dec!(10), 20);
        assert_eq!(discount, dec!(200));
        assert_eq!(total, dec!(350));
    }

    #[test]
    fn total_clamps_at_zero_but_discount_is_recorded() {
        let (discount, total) = order_totals(dec!(100), dec!(50), dec!(10), 40);
        assert_eq!(discount, dec!(400));
        assert_eq!(total, dec!(0));
    }

    #[test]
    fn zero_points_pays_subtotal_plus_delivery() {
        let (discount, total) = order_totals(dec!(499), dec!(50), dec!(10), 0);
        assert_eq!(discount, dec!(0));
        assert_eq!(total, dec!(549));
    }

    #[test]
    fn clamp_points_never_exceeds_balance() {
        assert_eq!(clamp_points(30, 12), 12);
        assert_eq!(clamp_points(5, 12), 5);
        assert_eq!(clamp_points(-3, 12), 0);
        assert_eq!(clamp_points(5, -2), 0);
    }

    proptest! {
        #[test]
        fn total_is_never_negative(
            subtotal_cents in 0i64..5_000_000,
            fee_cents in 0i64..50_000,
            points in 0i32..100_000,
        ) {
            let (_, total) = order_totals(
                Decimal::new(subtotal_cents, 2),
                Decimal::new(fee_cents, 2),
                dec!(10),
                points,
            );
            prop_assert!(total >= Decimal::ZERO);
        }

        #[test]
        fn total_matches_formula_when_not_clamped(
            subtotal_cents in 0i64..5_000_000,
            points in 0i32..1_000,
        ) {
            let subtotal = Decimal::new(subtotal_cents, 2);
            let fee = dec!(50);
            let (discount, total) = order_totals(subtotal, fee, dec!(10), points);
            let raw = subtotal + fee - discount;
            if raw >= Decimal::ZERO {
                prop_assert_eq!(total, raw);
            } else {
                prop_assert_eq!(total, Decimal::ZERO);
            }
        }
    }
}
