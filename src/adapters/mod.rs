//! Protocol adapters
//!
//! Consumers perform outbound calls for a resolved rule; the provider serves
//! this system's services.

pub mod consumer;
pub mod http;
pub mod provider;
pub mod ws;

pub use consumer::{ConsumeRequest, Consumer, ConsumerRegistry, Response, bearer_header};
pub use http::HttpConsumer;
pub use provider::{AxumProvider, PeerCertificate, Provider, ServerTls, Shutdown};
pub use ws::WsConsumer;
