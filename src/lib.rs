//! Phosphor relay: real-time terminal sharing.
//!
//! A producer CLI streams terminal output to the relay over a binary framed
//! WebSocket; the relay fans it out to browser viewers owned by the same
//! identity. Producers may drop and reconnect within a grace period without
//! losing their session, and a browser-mediated OIDC flow lets headless
//! clients obtain identity tokens.

pub mod api;
pub mod auth;
pub mod config;
pub mod middleware;
pub mod protocol;
pub mod relay;
pub mod server;
pub mod websocket;
