mod client;
mod error;
pub mod quota;
pub mod sign;

pub use client::{DEVICE_LIST_PATH, DEVICE_QUOTA_PATH, VendorApi, VendorClient, VendorDevice};
pub use error::VendorError;
pub use quota::{QuotaMap, derive_status, transform_quota_to_reading, transform_quota_to_reading_at};
pub use sign::Credentials;
