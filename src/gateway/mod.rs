//! Payment gateway integration: message signing, typed messages, and the
//! outbound client.

pub mod client;
pub mod mac;
pub mod messages;

pub use client::{GatewayClient, ReturnUrls};
pub use messages::{CallbackPayload, CheckoutParams, FormFields, TradeStatusReport};
