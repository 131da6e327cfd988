//! Backend fetch subsystem.
//!
//! # Data Flow
//! ```text
//! FetchContext (bereq + timeout overrides)
//!     → director acquires a Transport (connection + backend lease)
//!     → Fetcher::fetch_header_block  (write request, read head)
//!     → Fetcher::fetch_body          (length / chunked / EOF)
//!     → director releases the Transport (recycle or close)
//! ```

pub mod context;
pub mod http1;
pub mod protocol;

pub use context::{CloseReason, FetchContext, RequestHead, Transport};
pub use http1::Http1Fetcher;
pub use protocol::{BodyFraming, FetchError, Fetcher, HeaderFetch, ResponseHead};
