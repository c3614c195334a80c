//! coursync - Mirror lecture videos from the courses you are enrolled in
//!
//! coursync signs into a course-hosting platform once, enumerates the courses
//! you are enrolled in, discovers each active course's lecture videos and
//! downloads the ones not already on disk, a bounded number at a time.
//!
//! ## Modules
//!
//! - [`config`]: Configuration management and parsing
//! - [`session`]: Sign-in, session expiry and paced authenticated requests
//! - [`catalog`]: Enrolled topics, courses and video discovery
//! - [`plan`]: Expanding active courses into work items
//! - [`sync`]: The bounded, idempotent download engine
//! - [`prompt`]: Credential input

pub mod catalog;
pub mod config;
pub mod error;
pub mod plan;
pub mod prompt;
pub mod session;
pub mod sync;

pub use catalog::{Catalog, Course, PlatformCatalog, Topic};
pub use config::Config;
pub use error::CoursyncError;
pub use plan::{plan_work_items, WorkPlan};
pub use session::{Session, SessionSettings, User};
pub use sync::{SyncEngine, SyncOptions, SyncResult, SyncSummary, VideoFetcher, WorkItem};
