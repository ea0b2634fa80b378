//! Interning catalog shared by all persisted rows

pub mod dictionary;

pub use dictionary::{Dictionary, InternTable, InternTableSnapshot, StringId, UrlId};
