//! Session authentication: signed tokens, role cookies, and request guards.

pub mod guards;
pub mod session;
pub mod token;

pub use guards::{RequireAdmin, RequireViewer, ADMIN_PIN_HEADER};
pub use token::Role;
