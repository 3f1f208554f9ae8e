//! Cloud request abstraction for filerelay.
//!
//! This module provides the values exchanged with a cloud provider
//! (requests, responses), the transport traits that execute them, and two
//! transports: the HTTP cloud API and an in-memory stand-in.
//!
//! # Design Principles
//! - Transport errors never escape `execute`: they travel inside the response
//! - A response that carries an auth URL means "authenticate, then retry"
//! - Request identity is an id, never field equality

pub mod http;
pub mod memory;
pub mod request;
pub mod response;
pub mod service;

pub use http::{Endpoints, HttpCloudService};
pub use memory::MemoryCloudService;
pub use request::{
    Access, CallbackBase, CloudRequest, PrefetchRequest, RequestKind, StorageLocation, StoreOptions,
    UploadRequest,
};
pub use response::{CloudItem, CloudResponse, FolderListing, Payload, PrefetchResponse, StoredFile};
pub use service::{CloudService, Progress, ProgressSink, ServiceReply, Uploader};
