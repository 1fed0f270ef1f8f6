pub mod btle;
pub mod codec;
pub mod constants;
pub mod dispatcher;
pub mod lifecycle;
pub mod mock;
pub mod scan;
pub mod session;
pub mod transport;
pub mod types;
