pub mod client;
pub mod grants;
pub mod http;
pub mod transfer;

pub use client::{CachePolicy, CallOptions, RequestClient, TokenSupplier};
pub use http::{HttpApiTransport, HttpBlobSink};
pub use transfer::{ProgressFn, TransferManager, UploadOptions};
