// SPDX-FileCopyrightText: © 2025 Beacon Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! # beacon-core
//!
//! The data layer shared by every Beacon crate: a JSON [`Value`] model
//! with byte-exact canonical serialization, the [`delta`] codec that
//! expresses the difference between two values as a bounded-size edit
//! script, and [`apply`] to replay such a script.
//!
//! ```
//! use beacon_core::{apply, delta, Value};
//!
//! let old = Value::from_json("[1,2,3,4]").unwrap();
//! let new = Value::from_json("[1,3,4]").unwrap();
//!
//! let (ok, script) = delta(&old, &new, 64);
//! assert!(ok);
//! assert_eq!(apply(&old, &script).unwrap(), new);
//! ```

pub mod delta;
pub mod ops;
pub mod value;

pub use delta::delta;
pub use ops::{apply, ApplyError, Opcode};
pub use value::{ObjectBuilder, Value};
