mod api;
mod messages;
mod models;

pub mod permissions;
pub mod schedule;
pub mod visibility;

pub use api::*;
pub use messages::*;
pub use models::*;
pub use permissions::{PermissionMap, Permissions};
