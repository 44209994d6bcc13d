pub mod common;

// Pipeline surfaces (legacy wire contract)
pub mod orders;
pub mod otp;
pub mod payments;

// Supplementary surfaces
pub mod advertisements;
pub mod appointments;
pub mod carts;
pub mod customers;
pub mod products;

use crate::{
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    notifications::EmailSink,
    otp::OtpStore,
    services::{
        AdvertisementService, AppointmentService, CartService, CustomerService, InventoryService,
        LoyaltyService, OrderService, OtpService, PaymentService, ProductService,
    },
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Business-logic layer the HTTP handlers call into.
///
/// Construction wires the cross-service dependencies: orders reserve stock
/// through the inventory service, payments debit and credit through the
/// loyalty service, and the OTP gateway settles through the payment service.
#[derive(Clone)]
pub struct AppServices {
    pub inventory: InventoryService,
    pub products: ProductService,
    pub carts: CartService,
    pub customers: CustomerService,
    pub orders: OrderService,
    pub loyalty: LoyaltyService,
    pub payments: PaymentService,
    pub otp: OtpService,
    pub appointments: AppointmentService,
    pub advertisements: AdvertisementService,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        otp_store: Arc<dyn OtpStore>,
        email_sink: Arc<dyn EmailSink>,
        config: Arc<AppConfig>,
    ) -> Self {
        let inventory = InventoryService::new(db_pool.clone());
        let products = ProductService::new(db_pool.clone(), event_sender.clone());
        let carts = CartService::new(db_pool.clone(), event_sender.clone());
        let customers = CustomerService::new(db_pool.clone(), event_sender.clone());
        let loyalty = LoyaltyService::new(db_pool.clone(), event_sender.clone());
        let orders = OrderService::new(
            db_pool.clone(),
            inventory.clone(),
            event_sender.clone(),
            config.clone(),
        );
        let payments =
            PaymentService::new(db_pool.clone(), loyalty.clone(), event_sender.clone());
        let otp = OtpService::new(
            db_pool.clone(),
            otp_store,
            email_sink,
            payments.clone(),
            event_sender.clone(),
            config.clone(),
        );
        let appointments =
            AppointmentService::new(db_pool.clone(), event_sender.clone(), config.clone());
        let advertisements = AdvertisementService::new(db_pool, event_sender, config);

        Self {
            inventory,
            products,
            carts,
            customers,
            orders,
            loyalty,
            payments,
            otp,
            appointments,
            advertisements,
        }
    }
}
