//! Workspace root crate.
//!
//! Re-exports the bus, detector, controller, safety and simulation crates so
//! integration tests can depend on a single crate.

pub use bus::*;
pub use controller::*;
pub use detector::*;
pub use safety::*;
pub use sim::*;
