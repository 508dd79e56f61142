//! Tool adapters: CLI processes, stdio JSON-RPC servers, HTTP endpoints

mod cli;
mod http;
mod rpc;

pub use cli::CliAdapter;
pub use http::{HttpAdapter, HttpEndpoint, HttpToolConfig};
pub use rpc::{RpcAdapter, RpcServerConfig};
