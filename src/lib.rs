pub mod capture;
pub mod config;
pub mod curl;
pub mod dispatch;
pub mod error;
pub mod interpret;
pub mod logger;
pub mod models;
pub mod request;
pub mod router;
pub mod storage;
pub mod store;
pub mod transport;

#[cfg(test)]
mod test_support;
