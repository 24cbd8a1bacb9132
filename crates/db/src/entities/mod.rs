//! Database entities.

pub mod user;
pub mod user_device;

pub use user::Entity as User;
pub use user_device::Entity as UserDevice;
