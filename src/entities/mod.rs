pub mod advertisement;
pub mod appointment;
pub mod cart;
pub mod cart_item;
pub mod customer;
pub mod order;
pub mod order_item;
pub mod payment;
pub mod product;
