//! Data models for AlertWatch

mod alert;
mod notification;
mod rule;

pub use alert::*;
pub use notification::*;
pub use rule::*;
