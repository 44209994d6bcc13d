use crate::{
    db::DbPool,
    entities::{
        advertisement::{self, AdvertisementPaymentStatus},
        appointment::{self, AppointmentPaymentStatus},
        order::{self, OrderPaymentStatus},
        payment::{self, PaymentReferenceType, PaymentStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::loyalty::LoyaltyService,
};
use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// The payment ledger.
///
/// Every payment row references exactly one order, appointment, or
/// advertisement through a typed `(reference_type, reference_id)` pair.
/// All confirmation paths, whether they started from OTP verification, a
/// direct payment POST, or a status PUT, funnel into [`PaymentService::confirm`],
/// so the settlement side effects exist in exactly one place:
///
/// - orders flip `payment_status` and debit redeemed loyalty points, gated
///   on the order's own pending-to-success transition;
/// - appointments flip `payment_status` and credit package points, gated on
///   the `points_awarded` column still being zero;
/// - advertisements flip `payment_status`.
///
/// A side-effect failure is logged and surfaced as an event, never as a
/// failure of the confirmation itself.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DbPool>,
    loyalty: LoyaltyService,
    event_sender: Arc<EventSender>,
}

impl PaymentService {
    pub fn new(db: Arc<DbPool>, loyalty: LoyaltyService, event_sender: Arc<EventSender>) -> Self {
        Self {
            db,
            loyalty,
            event_sender,
        }
    }

    /// Records a pending payment against a referenced resource.
    ///
    /// When no amount is supplied the referent's canonical amount is charged
    /// (order total, appointment package price, advertisement fee). A
    /// supplied amount that disagrees with the canonical one is accepted but
    /// logged.
    #[instrument(skip(self, input), fields(reference = ?input.reference))]
    pub async fn create(&self, input: CreatePaymentInput) -> Result<payment::Model, ServiceError> {
        input.validate()?;

        let canonical = self.referent_amount(input.reference).await?;
        let amount = match input.amount {
            Some(supplied) => {
                if supplied != canonical {
                    warn!(
                        reference = ?input.reference,
                        %supplied,
                        %canonical,
                        "payment amount differs from referent amount"
                    );
                }
                supplied
            }
            None => canonical,
        };

        let now = Utc::now();
        let record = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            payment_number: Set(generate_payment_number()),
            transaction_ref: Set(generate_transaction_ref()),
            reference_type: Set(input.reference.kind()),
            reference_id: Set(input.reference.id()),
            amount: Set(amount),
            method: Set(input.method),
            status: Set(PaymentStatus::Pending),
            paid_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        info!(payment_id = %record.id, amount = %record.amount, "created payment");
        self.event_sender
            .send_or_log(Event::PaymentCreated(record.id))
            .await;
        Ok(record)
    }

    /// Reuses the reference's open payment if one exists, otherwise creates
    /// one. A payment that already succeeded is returned as-is so callers
    /// can observe that the resource is settled.
    #[instrument(skip(self))]
    pub async fn find_or_create_pending(
        &self,
        reference: PaymentReference,
        method: &str,
    ) -> Result<payment::Model, ServiceError> {
        let existing = payment::Entity::find()
            .filter(payment::Column::ReferenceType.eq(reference.kind()))
            .filter(payment::Column::ReferenceId.eq(reference.id()))
            .filter(payment::Column::Status.ne(PaymentStatus::Failed))
            .order_by_desc(payment::Column::CreatedAt)
            .one(&*self.db)
            .await?;

        if let Some(found) = existing {
            return Ok(found);
        }

        self.create(CreatePaymentInput {
            reference,
            amount: None,
            method: method.to_string(),
        })
        .await
    }

    /// Marks a payment successful and applies the referent's settlement
    /// side effects exactly once.
    ///
    /// The transition itself is a conditional update guarded by
    /// `status <> success`; when that guard fails the payment was already
    /// confirmed and the call returns the settled record without touching
    /// anything else. Side effects run after the transition and their
    /// failures do not fail the confirmation.
    #[instrument(skip(self))]
    pub async fn confirm(&self, payment_id: Uuid) -> Result<payment::Model, ServiceError> {
        let record = self.get(payment_id).await?;

        let result = payment::Entity::update_many()
            .col_expr(
                payment::Column::Status,
                Expr::value(PaymentStatus::Success),
            )
            .col_expr(payment::Column::PaidAt, Expr::value(Utc::now()))
            .col_expr(payment::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(payment::Column::Id.eq(payment_id))
            .filter(payment::Column::Status.ne(PaymentStatus::Success))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return self.get(payment_id).await;
        }

        if let Err(err) = self.apply_settlement(&record).await {
            warn!(
                payment_id = %payment_id,
                error = %err,
                "payment confirmed but settlement side effects incomplete"
            );
            self.event_sender
                .send_or_log(Event::PaymentSettlementIncomplete {
                    payment_id,
                    detail: err.to_string(),
                })
                .await;
        }

        info!(payment_id = %payment_id, "confirmed payment");
        self.event_sender
            .send_or_log(Event::PaymentConfirmed(payment_id))
            .await;
        self.get(payment_id).await
    }

    /// Marks a pending payment failed. Failing an already-failed payment is
    /// a no-op; failing a completed one is a conflict.
    #[instrument(skip(self))]
    pub async fn fail(&self, payment_id: Uuid) -> Result<payment::Model, ServiceError> {
        self.get(payment_id).await?;

        let result = payment::Entity::update_many()
            .col_expr(payment::Column::Status, Expr::value(PaymentStatus::Failed))
            .col_expr(payment::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(payment::Column::Id.eq(payment_id))
            .filter(payment::Column::Status.eq(PaymentStatus::Pending))
            .exec(&*self.db)
            .await?;

        let record = self.get(payment_id).await?;
        if result.rows_affected == 0 {
            return match record.status {
                PaymentStatus::Failed => Ok(record),
                _ => Err(ServiceError::Conflict(format!(
                    "Payment {} has already completed and cannot be failed",
                    payment_id
                ))),
            };
        }

        self.event_sender
            .send_or_log(Event::PaymentFailed(payment_id))
            .await;
        Ok(record)
    }

    /// Routes a requested status transition to [`confirm`](Self::confirm) or
    /// [`fail`](Self::fail).
    pub async fn update_status(
        &self,
        payment_id: Uuid,
        status: PaymentStatus,
    ) -> Result<payment::Model, ServiceError> {
        match status {
            PaymentStatus::Success => self.confirm(payment_id).await,
            PaymentStatus::Failed => self.fail(payment_id).await,
            PaymentStatus::Pending => Err(ServiceError::ValidationError(
                "Payment status can only be set to success or failed".to_string(),
            )),
        }
    }

    /// Confirms a payment after checking it actually references the given
    /// resource, for callers that carry both ids across the wire.
    pub async fn confirm_for_reference(
        &self,
        payment_id: Uuid,
        reference: PaymentReference,
    ) -> Result<payment::Model, ServiceError> {
        let record = self.get(payment_id).await?;
        if record.reference_type != reference.kind() || record.reference_id != reference.id() {
            return Err(ServiceError::ValidationError(format!(
                "Payment {} does not reference {} {}",
                payment_id,
                reference.kind(),
                reference.id()
            )));
        }
        self.confirm(payment_id).await
    }

    /// Settles an order in one step: find or create its payment, then
    /// confirm it. This is the tail of a successful OTP verification for an
    /// order resource.
    #[instrument(skip(self))]
    pub async fn settle_order(&self, order_id: Uuid) -> Result<payment::Model, ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let pending = self
            .find_or_create_pending(PaymentReference::Order(order_id), &order.payment_method)
            .await?;
        self.confirm(pending.id).await
    }

    #[instrument(skip(self))]
    pub async fn get(&self, payment_id: Uuid) -> Result<payment::Model, ServiceError> {
        payment::Entity::find_by_id(payment_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", payment_id)))
    }

    /// Ledger page for back-office review, newest first.
    #[instrument(skip(self))]
    pub async fn list(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<payment::Model>, u64), ServiceError> {
        let paginator = payment::Entity::find()
            .order_by_desc(payment::Column::CreatedAt)
            .paginate(&*self.db, per_page.clamp(1, 100));
        let total = paginator.num_items().await?;
        let payments = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((payments, total))
    }

    async fn apply_settlement(&self, record: &payment::Model) -> Result<(), ServiceError> {
        match record.reference_type {
            PaymentReferenceType::Order => self.settle_order_referent(record.reference_id).await,
            PaymentReferenceType::Appointment => {
                self.settle_appointment_referent(record.reference_id).await
            }
            PaymentReferenceType::Advertisement => {
                self.settle_advertisement_referent(record.reference_id).await
            }
        }
    }

    /// Flips the order to paid and debits redeemed points.
    ///
    /// The debit is gated on this call being the one that actually moved the
    /// order out of pending, so a second payment record for the same order
    /// can never debit the customer twice.
    async fn settle_order_referent(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let record = order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Order {} referenced by payment not found", order_id))
            })?;

        let result = order::Entity::update_many()
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(OrderPaymentStatus::Success),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::PaymentStatus.ne(OrderPaymentStatus::Success))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Ok(());
        }

        if record.points_redeemed > 0 {
            self.loyalty
                .debit(record.customer_id, record.points_redeemed)
                .await?;
        }

        self.event_sender
            .send_or_log(Event::OrderPaymentSucceeded(order_id))
            .await;
        Ok(())
    }

    /// Flips the appointment to paid and credits the package's points.
    ///
    /// The credit is gated on the `points_awarded` column transitioning from
    /// zero, which makes repeated confirmations award at most once.
    async fn settle_appointment_referent(&self, appointment_id: Uuid) -> Result<(), ServiceError> {
        let record = appointment::Entity::find_by_id(appointment_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Appointment {} referenced by payment not found",
                    appointment_id
                ))
            })?;

        let paid = appointment::Entity::update_many()
            .col_expr(
                appointment::Column::PaymentStatus,
                Expr::value(AppointmentPaymentStatus::Paid),
            )
            .col_expr(appointment::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(appointment::Column::Id.eq(appointment_id))
            .filter(appointment::Column::PaymentStatus.ne(AppointmentPaymentStatus::Paid))
            .exec(&*self.db)
            .await?;

        let award = record.package.points_award();
        let awarded = appointment::Entity::update_many()
            .col_expr(appointment::Column::PointsAwarded, Expr::value(award))
            .col_expr(appointment::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(appointment::Column::Id.eq(appointment_id))
            .filter(appointment::Column::PointsAwarded.eq(0))
            .exec(&*self.db)
            .await?;

        if awarded.rows_affected > 0 {
            self.loyalty.credit(&record.customer_email, award).await?;
        }

        if paid.rows_affected > 0 {
            self.event_sender
                .send_or_log(Event::AppointmentPaid(appointment_id))
                .await;
        }
        Ok(())
    }

    async fn settle_advertisement_referent(
        &self,
        advertisement_id: Uuid,
    ) -> Result<(), ServiceError> {
        advertisement::Entity::find_by_id(advertisement_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Advertisement {} referenced by payment not found",
                    advertisement_id
                ))
            })?;

        let result = advertisement::Entity::update_many()
            .col_expr(
                advertisement::Column::PaymentStatus,
                Expr::value(AdvertisementPaymentStatus::Paid),
            )
            .col_expr(advertisement::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(advertisement::Column::Id.eq(advertisement_id))
            .filter(advertisement::Column::PaymentStatus.ne(AdvertisementPaymentStatus::Paid))
            .exec(&*self.db)
            .await?;

        if result.rows_affected > 0 {
            self.event_sender
                .send_or_log(Event::AdvertisementPaid(advertisement_id))
                .await;
        }
        Ok(())
    }

    async fn referent_amount(&self, reference: PaymentReference) -> Result<Decimal, ServiceError> {
        match reference {
            PaymentReference::Order(id) => {
                let record = order::Entity::find_by_id(id)
                    .one(&*self.db)
                    .await?
                    .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", id)))?;
                Ok(record.total)
            }
            PaymentReference::Appointment(id) => {
                let record = appointment::Entity::find_by_id(id)
                    .one(&*self.db)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Appointment {} not found", id))
                    })?;
                Ok(record.amount)
            }
            PaymentReference::Advertisement(id) => {
                let record = advertisement::Entity::find_by_id(id)
                    .one(&*self.db)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Advertisement {} not found", id))
                    })?;
                Ok(record.fee)
            }
        }
    }
}

/// The resource a payment settles. Exactly one of the three, by
/// construction; the mutually-exclusive-ids invariant of the wire shape is
/// enforced in [`PaymentReference::from_ids`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentReference {
    Order(Uuid),
    Appointment(Uuid),
    Advertisement(Uuid),
}

impl PaymentReference {
    /// Builds a reference from a wire payload carrying up to three optional
    /// ids. Zero or more than one supplied id is rejected.
    pub fn from_ids(
        order_id: Option<Uuid>,
        appointment_id: Option<Uuid>,
        advertisement_id: Option<Uuid>,
    ) -> Result<Self, ServiceError> {
        match (order_id, appointment_id, advertisement_id) {
            (Some(id), None, None) => Ok(Self::Order(id)),
            (None, Some(id), None) => Ok(Self::Appointment(id)),
            (None, None, Some(id)) => Ok(Self::Advertisement(id)),
            (None, None, None) => Err(ServiceError::AmbiguousReference(
                "no reference id supplied".to_string(),
            )),
            _ => Err(ServiceError::AmbiguousReference(
                "more than one reference id supplied".to_string(),
            )),
        }
    }

    pub fn kind(&self) -> PaymentReferenceType {
        match self {
            Self::Order(_) => PaymentReferenceType::Order,
            Self::Appointment(_) => PaymentReferenceType::Appointment,
            Self::Advertisement(_) => PaymentReferenceType::Advertisement,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Self::Order(id) | Self::Appointment(id) | Self::Advertisement(id) => *id,
        }
    }
}

fn generate_payment_number() -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..10_000);
    format!("PAY-{}-{:04}", Utc::now().format("%Y%m%d%H%M%S"), suffix)
}

fn generate_transaction_ref() -> String {
    format!("TXN-{}", Uuid::new_v4().simple())
}

fn validate_positive_amount(value: &Decimal) -> Result<(), ValidationError> {
    if *value > Decimal::ZERO {
        Ok(())
    } else {
        let mut err = ValidationError::new("range");
        err.message = Some("Amount must be greater than 0".into());
        Err(err)
    }
}

/// Input for recording a payment.
#[derive(Debug, Clone, Validate)]
pub struct CreatePaymentInput {
    pub reference: PaymentReference,
    /// Charged amount; defaults to the referent's canonical amount.
    #[validate(custom = "validate_positive_amount")]
    pub amount: Option<Decimal>,
    #[validate(length(min = 1, max = 40))]
    pub method: String,
}
