#![allow(clippy::too_many_arguments)]

pub mod config;
pub mod encoding;
pub mod events;
pub mod ids;
pub mod receipts;
pub mod retry;
pub mod signing;
pub mod time;
