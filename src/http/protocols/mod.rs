pub mod chat;
pub mod disagg;
