//! # gitdeploy-engine
//!
//! The job lifecycle engine: a single event-loop task that turns git push
//! notifications into debounced, serialized deploy subprocesses and tracks
//! their state through `Pending` → `Active` → `Recent`.
//!
//! ## Pipeline
//!
//! 1. [`backlog`] persists each incoming ref atomically to disk so a crash
//!    mid-debounce doesn't lose the latest push.
//! 2. [`debounce`] coalesces rapid pushes to the same ref into one deploy.
//! 3. [`registry`] holds the three-map state (`Pending`/`Active`/`Recent`)
//!    behind a single lock, written only by the engine task.
//! 4. [`runner`] builds the subprocess environment, spawns `deploy.sh`, and
//!    supervises it to completion.
//! 5. [`promote`] runs `promote.sh`, occupying two `RefId` slots at once.
//! 6. [`report`] lets the admin HTTP layer attach a test report to a
//!    running job.
//! 7. [`expiry`] sweeps `Recent` on a timer and recovers jobs from leftover
//!    log files on startup.
//! 8. [`engine`] wires all of the above into the `select!` loop and exposes
//!    [`engine::EngineHandle`] as the only way callers touch the above.
//!
//! ## Modules
//!
//! - [`backlog`] — atomic on-disk persistence of the latest push per ref
//! - [`debounce`] — per-ref debounce timers
//! - [`registry`] — the `Pending`/`Active`/`Recent` state map
//! - [`runner`] — subprocess environment, spawn, and supervision
//! - [`promote`] — promotion across two `RefId` slots
//! - [`report`] — attaching a `Report` to an active job
//! - [`expiry`] — periodic sweep and startup log recovery
//! - [`engine`] — the event loop and its handle

pub mod backlog;
pub mod debounce;
pub mod engine;
pub mod expiry;
pub mod promote;
pub mod registry;
pub mod report;
pub mod runner;

pub use engine::{spawn, EngineHandle, PromotionRequest};
pub use gitdeploy_config::Config;
pub use gitdeploy_types::{EngineError, GitRef, Job, RefId, Report, RevId};
