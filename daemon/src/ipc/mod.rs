//! Panel socket for driving and watching the device

mod protocol;
mod server;

pub use server::Server;
