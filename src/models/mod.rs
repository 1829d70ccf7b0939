pub mod proxy;
pub mod status;
pub mod subscriber;

// Re-exports for convenience
pub use proxy::*;
pub use status::*;
pub use subscriber::*;
