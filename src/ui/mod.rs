//! The single-page browser front-end served at `/`.
//!
//! Settings are kept in the browser's `localStorage` under
//! `bigmodel-chat-settings`; the server holds no per-user state.

/// The page, embedded at compile time.
pub const INDEX_HTML: &str = include_str!("index.html");
