//! Adapters for the external payment gateway.

pub mod client;
pub mod signer;
pub mod simulated;
pub mod token;
pub mod transport;

pub use client::{GatewayClientConfig, HttpGatewayClient};
pub use signer::RequestSigner;
pub use simulated::SimulatedGateway;
pub use token::{GatewayCredential, TokenCache};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportError};
