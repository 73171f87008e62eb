//! Types shared between the storage core and the HTTP surface.

pub mod api;
pub mod models;
