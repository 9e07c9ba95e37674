pub mod client;
pub mod config;
pub mod error;
pub mod normalize;
pub mod observability;
pub mod protocol;
pub mod stream;
pub mod transport;

mod util;
