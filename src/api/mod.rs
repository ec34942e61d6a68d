pub mod client;
pub mod error;
pub mod middleware;
pub mod reqwest_client;
