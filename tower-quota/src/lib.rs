//! # Tower Quota
//!
//! `tower-quota` enforces per-task submission quotas for the
//! [Tower](https://github.com/tower-rs/tower) ecosystem, on top of the stores and
//! key locks of [`quota_limit`].
//!
//! ## The Submission Path
//! A [`Submission`] passes through the [`QuotaEnforcer`]:
//!
//! 1. **Lookup**: unknown tasks end as [`Outcome::NotFound`] without taking a lock.
//! 2. **Key Lock**: submissions for the same task queue up in arrival order; other
//!    tasks are never held back.
//! 3. **Check-and-Increment**: the store re-reads the counter inside one transaction
//!    and ends in [`Outcome::Accepted`] or [`Outcome::Rejected`].
//! 4. **Notification**: an accepted submission is handed to the
//!    [`NotificationDispatcher`] on a detached task. Its failures are logged, never
//!    returned.
//!
//! [`QuotaService`] exposes the same path as a `tower::Service`, mapping store
//! failures into a cloneable [`QuotaError`].
//!
//! ## Feature Flags
//!
//! - `axum` (default): Enables `IntoResponse` for [`QuotaError`] (404, 409, 400, 500)
//!   and the HTTP router in [`http`].

mod enforcer;
mod error;
pub mod logging;
mod notify;
mod service;
mod settings;

#[cfg(feature = "axum")]
pub mod http;


pub use enforcer::Outcome;
pub use enforcer::QuotaEnforcer;
pub use enforcer::Submission;
pub use error::NotifyError;
pub use error::QuotaError;
pub use notify::HttpNotifier;
pub use notify::Notification;
pub use notify::NotificationDispatcher;
pub use notify::Notify;
pub use service::QuotaService;
pub use settings::Settings;
pub use settings::SettingsError;
