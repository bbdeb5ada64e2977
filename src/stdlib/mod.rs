//! Standard-library definition consumed at context creation.

pub mod builder;
pub mod stdlib_def;

pub use builder::{StdlibBuilder, StdlibTable, StdlibValue};
pub use stdlib_def::StdLibraryDef;
