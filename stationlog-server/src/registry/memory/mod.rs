mod device;
mod reading;
mod session;

pub use device::InMemoryDeviceRegistry;
pub use reading::InMemoryReadingRegistry;
pub use session::InMemorySessionRegistry;

#[derive(Debug, thiserror::Error)]
pub enum InMemoryError {
    #[error("not found")]
    NotFound,
    #[error("duplicate id: {0}")]
    Duplicate(String),
    #[error("serial already registered: {0}")]
    SerialTaken(String),
}
