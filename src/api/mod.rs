//! Live exchange client for order submission and cancellation.
//!
//! External collaborator boundary: the simulation core never calls this.
//! A deployment that wants live execution dispatches orders created
//! through the same [`crate::models`] vocabulary to this client.

mod exchange;

pub use exchange::{ExchangeClient, ExchangeConfig, FillReport};
