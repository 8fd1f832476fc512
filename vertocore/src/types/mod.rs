pub mod call;
pub mod config;
pub mod events;
pub mod push;
