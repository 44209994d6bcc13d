use crate::{
    db::DbPool,
    entities::customer,
    errors::ServiceError,
    events::{Event, EventSender},
};
use sea_orm::{
    sea_query::Expr, ColumnTrait, EntityTrait, QueryFilter,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Reconciles loyalty point balances.
///
/// This service is the only writer of `customers.loyalty_points`. Debits are
/// driven by order payment confirmation, credits by appointment payment
/// confirmation; both are single conditional updates so concurrent
/// confirmations cannot double-spend or double-award.
#[derive(Clone)]
pub struct LoyaltyService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl LoyaltyService {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Current point balance for a customer.
    #[instrument(skip(self))]
    pub async fn balance(&self, customer_id: Uuid) -> Result<i32, ServiceError> {
        let record = customer::Entity::find_by_id(customer_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Customer {} not found", customer_id)))?;
        Ok(record.loyalty_points)
    }

    /// Deducts redeemed points from a customer's balance.
    ///
    /// The happy path is a single update guarded by `loyalty_points >= points`.
    /// When the balance has meanwhile dropped below the redeemed amount the
    /// remainder is clamped to zero with a second conditional update keyed on
    /// the exact balance just read, retrying if that read went stale too.
    /// Returns the number of points actually taken.
    #[instrument(skip(self))]
    pub async fn debit(&self, customer_id: Uuid, points: i32) -> Result<i32, ServiceError> {
        if points <= 0 {
            return Ok(0);
        }

        let debited = loop {
            let result = customer::Entity::update_many()
                .col_expr(
                    customer::Column::LoyaltyPoints,
                    Expr::col(customer::Column::LoyaltyPoints).sub(points),
                )
                .col_expr(
                    customer::Column::UpdatedAt,
                    Expr::value(chrono::Utc::now()),
                )
                .filter(customer::Column::Id.eq(customer_id))
                .filter(customer::Column::LoyaltyPoints.gte(points))
                .exec(&*self.db)
                .await?;

            if result.rows_affected > 0 {
                break points;
            }

            let record = customer::Entity::find_by_id(customer_id)
                .one(&*self.db)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Customer {} not found", customer_id))
                })?;

            let remaining = record.loyalty_points;
            if remaining <= 0 {
                break 0;
            }
            if remaining >= points {
                // Balance was refilled between the failed update and the
                // read; take the full amount on the next pass.
                continue;
            }

            let clamped = customer::Entity::update_many()
                .col_expr(customer::Column::LoyaltyPoints, Expr::value(0))
                .col_expr(
                    customer::Column::UpdatedAt,
                    Expr::value(chrono::Utc::now()),
                )
                .filter(customer::Column::Id.eq(customer_id))
                .filter(customer::Column::LoyaltyPoints.eq(remaining))
                .exec(&*self.db)
                .await?;

            if clamped.rows_affected > 0 {
                warn!(
                    %customer_id,
                    requested = points,
                    taken = remaining,
                    "loyalty balance below redeemed amount, clamped to zero"
                );
                break remaining;
            }
        };

        if debited > 0 {
            self.event_sender
                .send_or_log(Event::LoyaltyDebited {
                    customer_id,
                    points: debited,
                })
                .await;
        }
        Ok(debited)
    }

    /// Awards points to the customer owning the given email address.
    ///
    /// Appointments are booked by email and may belong to someone with no
    /// customer record; that case is logged and skipped rather than treated
    /// as a failure. Returns whether a balance was actually credited.
    #[instrument(skip(self))]
    pub async fn credit(&self, customer_email: &str, points: i32) -> Result<bool, ServiceError> {
        if points <= 0 {
            return Ok(false);
        }

        let result = customer::Entity::update_many()
            .col_expr(
                customer::Column::LoyaltyPoints,
                Expr::col(customer::Column::LoyaltyPoints).add(points),
            )
            .col_expr(
                customer::Column::UpdatedAt,
                Expr::value(chrono::Utc::now()),
            )
            .filter(customer::Column::Email.eq(customer_email))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            warn!(
                customer_email,
                points, "no customer record for loyalty credit, skipping award"
            );
            return Ok(false);
        }

        info!(customer_email, points, "credited loyalty points");
        self.event_sender
            .send_or_log(Event::LoyaltyCredited {
                customer_email: customer_email.to_string(),
                points,
            })
            .await;
        Ok(true)
    }
}
