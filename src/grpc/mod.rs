//! gRPC surface: generated types, service implementation, server bootstrap

pub mod server;
pub mod service;

/// Types and stubs generated from `proto/pubsub.proto`
pub mod proto {
    tonic::include_proto!("pubsub.v1");
}

pub use server::{bind, serve};
pub use service::PubSubService;
