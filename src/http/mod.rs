/// HTTP client abstraction and protocol adapters.
pub mod client;
pub mod protocols;
