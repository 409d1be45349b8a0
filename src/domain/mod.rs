mod access;
mod event;
mod ledger;
mod money;
mod service;

pub use access::*;
pub use event::*;
pub use ledger::*;
pub use money::*;
pub use service::*;
