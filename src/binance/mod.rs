pub mod auth;
pub mod connector;
pub mod errors;
pub mod ws;

pub use auth::BinanceAuthenticator;
pub use connector::BinanceConnector;
