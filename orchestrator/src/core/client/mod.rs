// Network clients used while rolling actions out to targets

pub mod rpc;

pub use rpc::{ConnectionPool, RpcConnection, RpcError};
