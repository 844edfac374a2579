//! This crate keeps a local tree of tasks in sync with the VTODO resources of a CalDAV server.
//!
//! It provides a CalDAV client in the [`client`] module, that can be used as a stand-alone module.
//! The server's calendars are [`RemoteCalendar`](calendar::remote_calendar::RemoteCalendar)s,
//! that list, fetch, create, update and delete [`Todo`](todo::Todo) resources.
//!
//! Local tasks live in any [`TaskStore`](traits::TaskStore). This crate provides an in-memory one, [`MemoryStore`](store::MemoryStore). \
//! The [`fields`] module translates the fields of a local [`Task`] to iCal properties and back.
//!
//! A [`Provider`](provider::Provider) imports the server's tasks into the local store, and pushes local changes to the server. \
//! A [`SyncScheduler`](provider::scheduler::SyncScheduler) runs it periodically.

pub mod traits;
pub mod error;
pub use error::DavError;

pub mod calendar;
pub mod todo;
pub use todo::Todo;
pub mod ical;
pub mod task;
pub use task::Task;
pub mod date;
pub mod store;
pub use store::MemoryStore;

pub mod fields;
pub mod ordering;
pub mod registry;
pub mod provider;
pub use provider::Provider;

pub mod client;
pub mod multistatus;
pub mod resource;

pub mod mock;
pub mod mock_behaviour;

pub mod config;
pub mod utils;
