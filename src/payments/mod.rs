//! Card gateway integration: request/response types, card validation,
//! 3-D Secure challenge shapes, webhook parsing and signature checks.

pub mod card;
pub mod challenge;
pub mod error;
pub mod provider;
pub mod providers;
pub mod signature;
pub mod types;
pub mod utils;
pub mod webhook;

pub use error::{PaymentError, PaymentResult};
pub use provider::PaymentGateway;
