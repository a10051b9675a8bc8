pub mod rest;
pub mod types;
pub mod ws;

pub use rest::UpstoxRestClient;
pub use ws::UpstoxWsClient;
