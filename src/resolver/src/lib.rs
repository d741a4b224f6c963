//! Resolution of logical service names into live endpoint sets.
//!
//! A [`Discover`] hands out one [`Service`] per name. Each service reads the
//! subtree `/<prefix>/service/<name>` from a hierarchical coordination store
//! once, then follows a recursive watch on it so that [`Service::list`] and
//! [`Service::uri`] always answer from current, in-memory membership.
//!
//! ```rust,ignore
//! use resolver::{Discover, backend::memory::InMemoryStore};
//!
//! let discover = Discover::new(&config.discovery, Arc::new(InMemoryStore::new(64)))?;
//! let api = discover.resolve("proxy-api")?;
//! api.settled().await;
//! if let Some(uri) = api.uri() {
//!     connect(&uri).await?;
//! }
//! ```

pub mod backend;
pub mod cache;
pub mod client;
pub mod error;
pub mod factory;
pub mod lifecycle;
pub mod membership;
pub mod service;
pub mod tree;
pub mod watch;

pub use cache::Discover;
pub use client::{StoreClient, WatchEvent, WatchStream};
pub use common::config::MergePolicy;
pub use error::{DiscoverError, StoreError};
pub use factory::{ServiceFactory, service_path};
pub use lifecycle::{Lifecycle, ServiceEvent};
pub use service::{Service, ServiceOptions};
pub use tree::{MembershipMap, TreeNode};
