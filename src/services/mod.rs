// Catalog and stock
pub mod inventory;
pub mod products;

// Customer-facing commerce
pub mod carts;
pub mod customers;
pub mod orders;

// Payment pipeline
pub mod otp;
pub mod payments;

// Loyalty reconciliation
pub mod loyalty;

// Provider services
pub mod advertisements;
pub mod appointments;

pub use advertisements::AdvertisementService;
pub use appointments::AppointmentService;
pub use carts::CartService;
pub use customers::CustomerService;
pub use inventory::InventoryService;
pub use loyalty::LoyaltyService;
pub use orders::OrderService;
pub use otp::OtpService;
pub use payments::PaymentService;
pub use products::ProductService;
