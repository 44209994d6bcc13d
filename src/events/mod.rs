use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

// Define the various events that can occur in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Customer events
    CustomerRegistered(Uuid),

    // Product events
    ProductCreated(Uuid),
    ProductUpdated(Uuid),
    ProductDeactivated(Uuid),

    // Cart events
    CartItemAdded {
        cart_id: Uuid,
        product_code: String,
    },
    CartItemUpdated {
        cart_id: Uuid,
        product_code: String,
    },
    CartItemRemoved {
        cart_id: Uuid,
        product_code: String,
    },
    CartCleared(Uuid),

    // Order events
    OrderCreated(Uuid),
    OrderPartiallyFulfilled {
        order_id: Uuid,
        dropped_or_reduced: usize,
    },
    OrderPaymentSucceeded(Uuid),
    FulfillmentStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },

    // OTP events
    OtpIssued {
        resource_type: String,
        resource_id: Uuid,
    },
    OtpVerified {
        resource_type: String,
        resource_id: Uuid,
    },

    // Payment events
    PaymentCreated(Uuid),
    PaymentConfirmed(Uuid),
    PaymentFailed(Uuid),
    /// Confirmation landed but a referent/loyalty side effect did not
    PaymentSettlementIncomplete {
        payment_id: Uuid,
        detail: String,
    },

    // Loyalty events
    LoyaltyDebited {
        customer_id: Uuid,
        points: i32,
    },
    LoyaltyCredited {
        customer_email: String,
        points: i32,
    },

    // Appointment events
    AppointmentBooked(Uuid),
    AppointmentPaid(Uuid),

    // Advertisement events
    AdvertisementSubmitted(Uuid),
    AdvertisementApproved(Uuid),
    AdvertisementRejected(Uuid),
    AdvertisementPaid(Uuid),
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed
    ///
    /// Event delivery must never fail a caller's transaction.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Dropping event: {}", e);
        }
    }
}

// Consume events off the channel and log them. Runs until every sender is
// dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::PaymentFailed(payment_id) => {
                warn!("Payment failed: {}", payment_id);
            }
            Event::PaymentSettlementIncomplete { payment_id, detail } => {
                warn!(
                    "Payment {} confirmed but settlement incomplete: {}",
                    payment_id, detail
                );
            }
            Event::OrderPartiallyFulfilled {
                order_id,
                dropped_or_reduced,
            } => {
                warn!(
                    "Order {} created with {} unfulfilled or reduced line(s)",
                    order_id, dropped_or_reduced
                );
            }
            other => {
                info!("Received event: {:?}", other);
            }
        }
    }

    warn!("Event processing loop has ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_delivers_to_receiver() {
        let (tx, mut rx) = mpsc::channel(8);
        let sender = EventSender::new(tx);

        let id = Uuid::new_v4();
        sender.send(Event::OrderCreated(id)).await.unwrap();

        match rx.recv().await {
            Some(Event::OrderCreated(got)) => assert_eq!(got, id),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn send_or_log_swallows_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);

        // Must not panic or error out
        sender.send_or_log(Event::CartCleared(Uuid::new_v4())).await;
    }
}
