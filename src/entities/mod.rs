pub mod order;
pub mod payment_attempt;

pub use order::Entity as Order;
pub use payment_attempt::Entity as PaymentAttempt;
