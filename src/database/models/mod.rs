mod operation;
mod tenant;
mod token;

pub use operation::Operation;
pub use tenant::{Backend, InvalidBackend, Tenant};
pub use token::Token;
