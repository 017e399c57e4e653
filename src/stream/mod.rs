//! Agent output stream: line framing, record parsing, and the reader task.

pub mod codec;
pub mod parser;
pub mod reader;
