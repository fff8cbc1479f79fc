pub mod acquirer;

pub use acquirer::{AcquirerConfig, AcquirerGateway};
