/// HTTP and websocket surface of the marketplace
///
/// This module provides:
/// - the websocket endpoint and the registry of live sessions
/// - REST endpoints for orders and chat messages
/// - JSON error bodies mapped from repository errors
pub mod connections;
pub mod handlers;
pub mod models;
pub mod server;
pub mod ws;

pub use connections::{
    session_channel, ConnectionId, ConnectionRegistry, Delivery, InboundEvent, OutboundEvent, SessionSender,
};
pub use models::ErrorResponse;
pub use server::{ApiConfig, ApiServer};
