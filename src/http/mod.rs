//! HTTP adapters: axum middleware and the forward-auth server.

mod client_ip;
mod middleware;
mod response;
mod server;

pub use client_ip::client_address;
pub use middleware::{admission_middleware, matched_route_endpoint, AdmissionState, EndpointResolver};
pub use response::{rejection_response, wants_json, FLASH_COOKIE};
pub use server::{forwarded_descriptor, router, GuardServer};
