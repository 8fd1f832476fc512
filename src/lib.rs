pub use vertocore::protocol;

pub mod types {
    pub use vertocore::types::*;
    pub mod events;
}

pub mod calls;
pub mod client;
pub mod config;
pub mod connectivity;
pub mod login;
pub mod push;
pub mod socket;
pub mod transport;

pub use client::{Client, ClientError};
