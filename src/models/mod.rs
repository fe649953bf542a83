mod product;
mod subscription;
mod user;
mod webhook_event;

pub use product::*;
pub use subscription::*;
pub use user::*;
pub use webhook_event::*;
