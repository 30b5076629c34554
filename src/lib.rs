//! An embedded DSL for generating OpenCL-C compute kernels from host code,
//! plus a layered runtime that ties generated kernels to buffers, devices and
//! an asynchronous build pipeline.
//!
//! The crate is organized bottom-up:
//! - [`types`]: the kernel-side type system (packed ids, promotion rules).
//! - [`value`]: host-side literal values and their kernel-source syntax.
//! - [`expr`]: the shared expression DAG and its emission/binding protocol.
//! - [`dsl`] / [`intrinsics`]: the host-facing construction surface.
//! - [`driver`]: the opaque driver capability the runtime dispatches through.
//! - [`layer`]: reusable computation units with version tracking, cache
//!   invalidation and asynchronous kernel compilation.
//!
//! A kernel is built by composing expression nodes and calling
//! [`expr::Expr::build`]; the resulting source is handed to a
//! [`driver::Program`], and [`expr::Expr::bind_values`] pushes the current
//! host values into the compiled kernel's argument slots in the same order
//! the builder assigned them.

pub mod driver;
pub mod dsl;
pub mod error;
pub mod expr;
pub mod intrinsics;
pub mod layer;
pub mod types;
pub mod value;

pub use error::{Error, Result};
pub use expr::Expr;
pub use types::Type;
pub use value::{ConstValue, Scalar};
