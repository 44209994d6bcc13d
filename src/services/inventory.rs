use crate::{db::DbPool, entities::product, errors::ServiceError};
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Stock ledger over the product catalog.
///
/// All decrements go through [`InventoryService::reserve`], which grants
/// whatever portion of the requested quantity is actually available and
/// never lets `available` go negative, even under concurrent checkouts.
#[derive(Clone)]
pub struct InventoryService {
    db: Arc<DbPool>,
}

impl InventoryService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Current available quantity for an active product.
    #[instrument(skip(self))]
    pub async fn available(&self, product_code: &str) -> Result<i32, ServiceError> {
        let record = product::Entity::find()
            .filter(product::Column::Code.eq(product_code))
            .filter(product::Column::Active.eq(true))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_code)))?;
        Ok(record.available)
    }

    /// Reserves up to `requested` units of a product on the given connection.
    ///
    /// The decrement is a conditional update guarded by the quantity it is
    /// about to subtract; when the guard fails because another reservation
    /// landed first, the loop re-reads and retries with the smaller stock.
    /// A grant of zero means the line cannot be fulfilled at all.
    pub async fn reserve(
        &self,
        conn: &impl ConnectionTrait,
        product_code: &str,
        requested: i32,
    ) -> Result<Reservation, ServiceError> {
        if requested <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "Requested quantity must be positive, got {}",
                requested
            )));
        }

        loop {
            let record = product::Entity::find()
                .filter(product::Column::Code.eq(product_code))
                .filter(product::Column::Active.eq(true))
                .one(conn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Product {} not found", product_code))
                })?;

            let granted = requested.min(record.available);
            if granted <= 0 {
                return Ok(Reservation::new(requested, 0));
            }

            let result = product::Entity::update_many()
                .col_expr(
                    product::Column::Available,
                    Expr::col(product::Column::Available).sub(granted),
                )
                .col_expr(
                    product::Column::UpdatedAt,
                    Expr::value(chrono::Utc::now()),
                )
                .filter(product::Column::Code.eq(product_code))
                .filter(product::Column::Available.gte(granted))
                .exec(conn)
                .await?;

            if result.rows_affected > 0 {
                debug!(
                    product_code,
                    requested, granted, "reserved stock for checkout line"
                );
                return Ok(Reservation::new(requested, granted));
            }
            // Lost the race to a concurrent reservation; the re-read will
            // observe the reduced quantity and shrink the grant.
        }
    }

}

/// Outcome of a single reservation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub requested: i32,
    pub granted: i32,
}

impl Reservation {
    fn new(requested: i32, granted: i32) -> Self {
        Self { requested, granted }
    }

    /// The full requested quantity was granted.
    pub fn is_full(&self) -> bool {
        self.granted == self.requested
    }

    /// Nothing could be granted; the line is dropped.
    pub fn is_empty(&self) -> bool {
        self.granted == 0
    }

    pub fn shortfall(&self) -> i32 {
        self.requested - self.granted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_grant_has_no_shortfall() {
        let r = Reservation::new(5, 5);
        assert!(r.is_full());
        assert!(!r.is_empty());
        assert_eq!(r.shortfall(), 0);
    }

    #[test]
    fn partial_grant_reports_shortfall() {
        let r = Reservation::new(5, 3);
        assert!(!r.is_full());
        assert!(!r.is_empty());
        assert_eq!(r.shortfall(), 2);
    }

    #[test]
    fn empty_grant_is_dropped_line() {
        let r = Reservation::new(4, 0);
        assert!(r.is_empty());
        assert_eq!(r.shortfall(), 4);
    }
}
