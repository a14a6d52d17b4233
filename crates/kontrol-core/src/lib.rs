//! Kontrol Core - Entity model and model facade
//!
//! This crate defines the types shared by every Kontrol component:
//! - Identifiers and change-source tags
//! - Parameter values
//! - Rack / Module / Page / Parameter entities
//! - The `KontrolModel` facade and its listener trait
//! - Error types

pub mod callback;
pub mod entity;
pub mod error;
pub mod id;
pub mod model;
pub mod source;
pub mod value;

pub use callback::*;
pub use entity::*;
pub use error::*;
pub use id::*;
pub use model::*;
pub use source::*;
pub use value::*;
