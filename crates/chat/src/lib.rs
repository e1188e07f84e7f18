#![deny(unsafe_code)]

/// Streaming chat surface: session binding, reconciliation, hydration and follow-scroll.
pub mod chat;
/// Layered settings and small persisted preferences.
pub mod settings;
/// Agent backends that stream message sequences.
pub mod transport;
