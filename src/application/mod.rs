//! Application layer: the payment use cases.
//!
//! Each service owns handles to the ports it needs and is safe to share
//! between concurrent requests. State transitions themselves live on
//! [`crate::domain::order::Order`]; these services decide when to apply them
//! and persist the result.

pub mod callback;
pub mod checkout;
pub mod sweeper;
