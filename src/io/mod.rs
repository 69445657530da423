//! I/O collaborators: remote image fetching and thumbnail storage.

mod fetch;
mod store;

pub use fetch::{FetchClient, FetchResponse, ReqwestFetchClient};
pub use store::{create_output_store, get_output_prefix, BlobStore, ObjectBlobStore};
