//! SplitFx Common Types
//!
//! Shared types used across the SplitFx workspace: currency codes and money,
//! provider identifiers, exchange rate sets, and the default request
//! validation collaborators consumed by the rate service.

pub mod identifiers;
pub mod monetary;
pub mod rates;
pub mod error;
pub mod time;
pub mod validation;

pub use identifiers::*;
pub use monetary::*;
pub use rates::*;
pub use error::*;
pub use time::*;
pub use validation::*;
