mod access;
mod bootstrap;
mod context;
mod error;
mod payment;
mod registry;
mod reporting;

pub use access::*;
pub use bootstrap::*;
pub use context::*;
pub use error::*;
pub use payment::*;
pub use registry::*;
pub use reporting::*;
