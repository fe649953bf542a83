mod premium;
mod session_auth;

pub use premium::*;
pub use session_auth::*;
