//! Tessera Core - Object Model
//!
//! Pure data structures with no I/O. The storage crate depends on this for
//! identity types, the stored-object contract, errors and configuration.

pub mod config;
pub mod entities;
pub mod error;
pub mod identity;

pub use config::*;
pub use entities::*;
pub use error::*;
pub use identity::*;
