//! # fleetsync-id
//!
//! Typed identifiers for the fleet inventory service.
//!
//! Every identifier has the form `{prefix}_{ulid}`:
//!
//! - `mach_01HV4Z2WQXKJNM8GPQY6VBKC3D` for a reporting machine
//! - `tnt_01HV4Z3MXNKPQR9HSTZ7WCLD4E` for the tenant owning it
//! - `cmp_01HV4Z4NYPLTRS0JTUA8XDME5F` for a stored component row
//!
//! The prefix keeps a machine id from being passed where a tenant id is
//! expected, both at compile time and when parsing untrusted input.

mod error;
mod macros;
mod types;

pub use error::IdError;
#[doc(hidden)]
pub use macros::parse_prefixed;
pub use types::*;
pub use ulid::Ulid;
