pub mod catalog;
pub mod conversion;
pub mod download;
pub mod session;
