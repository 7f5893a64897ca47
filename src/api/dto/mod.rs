//! Data Transfer Objects for REST request/response serialization.

pub mod notify_dto;

pub use notify_dto::*;
