//! Chat rendering: the chat client seam, Markdown conversion, message
//! splitting, and the adaptive renderer.

pub mod chat;
pub mod format;
pub mod renderer;
pub mod split;
