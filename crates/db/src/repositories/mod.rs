//! Repositories.

mod user;
mod user_device;

pub use user::UserRepository;
pub use user_device::{DeviceMetadata, UserDeviceRepository};
