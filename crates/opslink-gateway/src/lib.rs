pub mod connection;
pub mod error;
pub mod notify;
pub mod registry;
pub mod verifier;

pub use connection::SessionDeps;
pub use error::GatewayError;
pub use notify::Notifier;
pub use registry::RoomRegistry;
pub use verifier::IdentityVerifier;
