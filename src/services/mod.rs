pub mod carts;
pub mod checkout;
pub mod fulfillment;
pub mod orders;
pub mod pricing;
