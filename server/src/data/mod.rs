//! Data storage layer
//!
//! Provides persistence services for the application:
//! - `postgres` - relational store (campaigns, matches, catalog, events)
//! - `replica` - primary/read-replica query routing
//! - `timescale` - time-series store (listener metrics, attribution events)
//! - `cache` - in-memory and Redis soft caching
//! - `error` - unified error type for all backends

pub mod cache;
pub mod error;
pub mod postgres;
pub mod replica;
pub mod timescale;

pub use error::DataError;
pub use postgres::PostgresService;
pub use replica::ReadReplicaRouter;
pub use timescale::TimescaleService;
