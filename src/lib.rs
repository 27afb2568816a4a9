// Public modules
pub mod chat;
pub mod client;
pub mod client_logger;
pub mod device;
pub mod error;
pub mod observability;
pub mod reconcile;
pub mod render;
pub mod retry;
pub mod sse;
pub mod types;
pub mod utils;

// Re-exports
pub use client::{CaseBreaker, ChatBackend, ClientConfig, DEFAULT_API_URL};
pub use client_logger::ClientLogger;
pub use device::{DEVICE_ID_KEY, DeviceIdentity, DeviceStore, FileDeviceStore, MemoryDeviceStore};
pub use error::{Error, Result};
pub use observability::register_biometrics;
pub use reconcile::{EntryId, MessageLog, Turn};
pub use render::{PlainTextRenderer, Renderer};
pub use retry::RetryPolicy;
pub use sse::{EventStream, SseDecoder, process_sse};
pub use types::*;
