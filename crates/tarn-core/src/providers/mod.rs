//! Model backends and the router that picks between them.

pub mod local;
pub mod remote;
pub mod router;
pub mod shared;

pub use local::LocalBackend;
pub use remote::RemoteBackend;
pub use router::{Router, resolve};
pub use shared::{
    BackendRequest, BackendResponse, ChatMessage, ChunkSink, ProviderError, ProviderErrorKind,
    ProviderResult, StreamChunk,
};
