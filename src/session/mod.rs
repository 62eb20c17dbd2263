//! Session core: cookie factory, lifecycle state machine, and XSRF guard
//!
//! The lifecycle is a three-state machine. A request starts *provisional*
//! (cookie present or absent, no backing record), becomes *active* once a
//! login creates a storage record, and ends *expired* when the record is
//! destroyed or idles out. [`cookie`] owns all cookie construction,
//! [`lifecycle`] owns the state machine, and [`xsrf`] owns the
//! double-submit token protecting unsafe methods.

pub mod cookie;
pub mod lifecycle;
pub mod xsrf;

pub use cookie::CookieFactory;
pub use lifecycle::{SessionService, StartedSession};
pub use xsrf::{XsrfCheck, XsrfGuard};
