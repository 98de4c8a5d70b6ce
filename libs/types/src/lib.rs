//! Types library for the market feature pipeline
//!
//! Shared kernel used by every pipeline crate: identifiers, the time
//! oracle and the error taxonomy.
//!
//! # Modules
//! - `ids`: Instrument identifiers
//! - `time`: `Timestamped` capability and the `Clock` oracle
//! - `errors`: Error taxonomy

pub mod errors;
pub mod ids;
pub mod time;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::errors::*;
    pub use crate::ids::*;
    pub use crate::time::*;
}
