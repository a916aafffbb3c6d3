//! # Adaptive Error Backoff
//!
//! Slows down clients that keep sending the same bad write, without touching
//! the fast path.
//!
//! - [`ErrorClassifier`] maps a failure to a stable [`ErrorClass`]
//! - [`BackoffLedger`] keeps one [`CounterRecord`] per class, reset after idleness
//! - [`DelayPolicy`] turns a record into a delay
//! - [`BackoffController`] ties them together around a [`RequestExecutor`]
//!
//! Each class moves between two states: quiet (no live record) and active
//! (escalating delay on each error). It returns to quiet once no error of the
//! class has been seen for the reset window; there is no terminal state.

pub mod classifier;
pub mod controller;
pub mod error;
pub mod ledger;
pub mod policy;

pub use classifier::{ClassScope, ErrorClass, ErrorClassifier};
pub use controller::{BackoffController, Delivered, RequestExecutor};
pub use error::{BackoffFault, ConfigError, ValidationError, ViolationKind};
pub use ledger::{BackoffLedger, CounterRecord};
pub use policy::DelayPolicy;
