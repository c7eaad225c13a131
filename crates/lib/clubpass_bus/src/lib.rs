//! # clubpass_bus
//!
//! Bus surface for Clubpass: the authorization callout and magic-link
//! requests.

pub mod callout;
pub mod magic_link;
pub mod server;
pub mod subjects;

use thiserror::Error;

/// Bus transport errors.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus connect failed: {0}")]
    Connect(#[from] async_nats::ConnectError),

    #[error("bus subscribe failed: {0}")]
    Subscribe(#[from] async_nats::SubscribeError),

    #[error("bus publish failed: {0}")]
    Publish(#[from] async_nats::PublishError),

    #[error("payload encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}
