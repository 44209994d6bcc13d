use crate::{
    config::AppConfig,
    db::DbPool,
    entities::{
        advertisement, appointment, order,
        payment::{self, PaymentReferenceType},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    notifications::{EmailMessage, EmailSink},
    otp::{OtpKey, OtpStore, StoredOtp},
    services::payments::{PaymentReference, PaymentService},
};
use rand::Rng;
use sea_orm::EntityTrait;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// One-time-password gateway in front of payment settlement.
///
/// Codes are keyed by the `(resource_type, resource_id)` pair they protect
/// and live in an injected [`OtpStore`], so restarts and horizontal scaling
/// do not lose or duplicate them. A code verifies successfully at most once:
/// consumption is a compare-and-delete inside the store.
///
/// Verification is also where payment settlement begins. For orders the
/// verified code settles the payment immediately; for appointments and
/// advertisements it creates the pending payment record the provider-side
/// payment endpoints later confirm.
#[derive(Clone)]
pub struct OtpService {
    db: Arc<DbPool>,
    store: Arc<dyn OtpStore>,
    email: Arc<dyn EmailSink>,
    payments: PaymentService,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
}

impl OtpService {
    pub fn new(
        db: Arc<DbPool>,
        store: Arc<dyn OtpStore>,
        email: Arc<dyn EmailSink>,
        payments: PaymentService,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            store,
            email,
            payments,
            event_sender,
            config,
        }
    }

    /// Issues a fresh code for a resource and emails it to the customer.
    ///
    /// Reissuing replaces whatever code was stored before. Delivery failures
    /// are logged and swallowed; the code is live either way and the caller
    /// sees success.
    #[instrument(skip(self, input), fields(resource_type = %input.resource_type, resource_id = %input.resource_id))]
    pub async fn send(&self, input: SendOtpInput) -> Result<(), ServiceError> {
        input.validate()?;
        self.referent_must_exist(input.resource_type, input.resource_id)
            .await?;
        self.issue(input.resource_type, input.resource_id, &input.email)
            .await
    }

    /// Reissues a code, but only once the previous one has expired.
    #[instrument(skip(self, input), fields(resource_type = %input.resource_type, resource_id = %input.resource_id))]
    pub async fn resend(&self, input: SendOtpInput) -> Result<(), ServiceError> {
        input.validate()?;
        self.referent_must_exist(input.resource_type, input.resource_id)
            .await?;

        let key = OtpKey::new(input.resource_type, input.resource_id);
        if let Some(stored) = self.store.get(&key).await? {
            if !stored.is_expired() {
                return Err(ServiceError::OtpStillValid);
            }
        }

        self.issue(input.resource_type, input.resource_id, &input.email)
            .await
    }

    /// Verifies and consumes a code, then kicks off payment settlement for
    /// the resource it protected.
    ///
    /// Outcomes map onto the error taxonomy: no stored code is `OtpNotFound`
    /// (including a code that was already consumed), a stale one is
    /// `OtpExpired`, a wrong guess is `OtpInvalid`. Only the caller whose
    /// compare-and-delete actually removed the entry proceeds to settlement,
    /// so two racing verifies cannot both succeed.
    #[instrument(skip(self, input), fields(resource_type = %input.resource_type, resource_id = %input.resource_id))]
    pub async fn verify(&self, input: VerifyOtpInput) -> Result<VerifiedOtp, ServiceError> {
        input.validate()?;

        let key = OtpKey::new(input.resource_type, input.resource_id);
        let stored = self
            .store
            .get(&key)
            .await?
            .ok_or(ServiceError::OtpNotFound)?;

        if stored.is_expired() {
            self.store.remove(&key).await?;
            return Err(ServiceError::OtpExpired);
        }
        if stored.code != input.code {
            return Err(ServiceError::OtpInvalid);
        }
        if !self.store.remove_if_match(&key, &input.code).await? {
            return Err(ServiceError::OtpNotFound);
        }

        let payment = self
            .settle_after_verification(input.resource_type, input.resource_id)
            .await?;

        info!(
            resource_type = %input.resource_type,
            resource_id = %input.resource_id,
            "verified one-time password"
        );
        self.event_sender
            .send_or_log(Event::OtpVerified {
                resource_type: input.resource_type.to_string(),
                resource_id: input.resource_id,
            })
            .await;

        Ok(VerifiedOtp {
            resource_id: input.resource_id,
            payment,
        })
    }

    async fn issue(
        &self,
        resource_type: PaymentReferenceType,
        resource_id: Uuid,
        email: &str,
    ) -> Result<(), ServiceError> {
        let code = generate_code();
        let ttl = Duration::from_secs(self.config.commerce.otp_ttl_secs);
        let key = OtpKey::new(resource_type, resource_id);
        self.store.put(&key, StoredOtp::new(code.clone(), ttl)).await?;

        let message = EmailMessage::otp_code(email, &resource_type.to_string(), &code);
        if let Err(err) = self.email.deliver(message).await {
            warn!(
                %resource_type,
                %resource_id,
                error = %err,
                "verification code issued but email delivery failed"
            );
        }

        self.event_sender
            .send_or_log(Event::OtpIssued {
                resource_type: resource_type.to_string(),
                resource_id,
            })
            .await;
        Ok(())
    }

    /// Orders settle on the spot; appointments and advertisements get a
    /// pending payment record for the follow-up confirmation call.
    async fn settle_after_verification(
        &self,
        resource_type: PaymentReferenceType,
        resource_id: Uuid,
    ) -> Result<Option<payment::Model>, ServiceError> {
        let payment = match resource_type {
            PaymentReferenceType::Order => self.payments.settle_order(resource_id).await?,
            PaymentReferenceType::Appointment => {
                self.payments
                    .find_or_create_pending(PaymentReference::Appointment(resource_id), "card")
                    .await?
            }
            PaymentReferenceType::Advertisement => {
                self.payments
                    .find_or_create_pending(PaymentReference::Advertisement(resource_id), "card")
                    .await?
            }
        };
        Ok(Some(payment))
    }

    async fn referent_must_exist(
        &self,
        resource_type: PaymentReferenceType,
        resource_id: Uuid,
    ) -> Result<(), ServiceError> {
        let exists = match resource_type {
            PaymentReferenceType::Order => order::Entity::find_by_id(resource_id)
                .one(&*self.db)
                .await?
                .is_some(),
            PaymentReferenceType::Appointment => appointment::Entity::find_by_id(resource_id)
                .one(&*self.db)
                .await?
                .is_some(),
            PaymentReferenceType::Advertisement => advertisement::Entity::find_by_id(resource_id)
                .one(&*self.db)
                .await?
                .is_some(),
        };
        if exists {
            Ok(())
        } else {
            Err(ServiceError::NotFound(format!(
                "{} {} not found",
                resource_type, resource_id
            )))
        }
    }
}

fn generate_code() -> String {
    rand::thread_rng().gen_range(100_000..=999_999).to_string()
}

/// Input for issuing or reissuing a code.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SendOtpInput {
    pub resource_type: PaymentReferenceType,
    pub resource_id: Uuid,
    #[validate(email)]
    pub email: String,
}

/// Input for verifying a code.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct VerifyOtpInput {
    pub resource_type: PaymentReferenceType,
    pub resource_id: Uuid,
    #[validate(length(equal = 6))]
    pub code: String,
}

/// A consumed verification plus the payment it set in motion.
#[derive(Debug, Clone)]
pub struct VerifiedOtp {
    pub resource_id: Uuid,
    pub payment: Option<payment::Model>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_are_six_digits() {
        for _ in 0..200 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
            assert_ne!(code.chars().next(), Some('0'));
        }
    }

    #[test]
    fn verify_input_requires_six_digit_code() {
        let input = VerifyOtpInput {
            resource_type: PaymentReferenceType::Order,
            resource_id: Uuid::new_v4(),
            code: "12345".to_string(),
        };
        assert!(input.validate().is_err());
    }

    #[test]
    fn send_input_requires_valid_email() {
        let input = SendOtpInput {
            resource_type: PaymentReferenceType::Order,
            resource_id: Uuid::new_v4(),
            email: "nope".to_string(),
        };
        assert!(input.validate().is_err());
    }
}
