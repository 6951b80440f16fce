//! Stencil Bridge
//!
//! Marshalling and lifecycle layer between a dynamically-typed host runtime
//! and native Rust state, spoken over the C function table in `stencil_abi`.
//!
//! ## Architecture
//!
//! - **arena:** laundered tokens that carry native values through `void*`
//! - **trampoline:** the single callback/finalizer entry points the host calls
//! - **wrap:** type-tagged attachment of native payloads to host objects
//! - **association:** refcounted state shared by linked wrapped objects
//! - **convert:** recursive host <-> native value conversion
//! - **env_stack:** the environment active for reentrant host calls
//!
//! Errors that reach the host become exceptions; invariant violations panic,
//! and a panic reaching an `extern "C"` frame aborts the process.

pub mod arena;
pub mod args;
pub mod association;
pub mod convert;
pub mod env;
pub mod env_stack;
pub mod error;
pub mod module;
pub mod trampoline;
pub mod wrap;

pub use args::CallArgs;
pub use association::{Association, AssociationSlot};
pub use convert::{to_host, to_native, NativeKey, NativeValue};
pub use env::{Env, Reference, Value};
pub use env_stack::{EnvScope, EnvStack};
pub use error::{BridgeError, Result};
pub use wrap::Wrapper;

pub use num_bigint;
pub use stencil_abi as sys;
