//! The launcher calls [`lookup`] once the application is known, then
//! [`inject`] with whatever it got back, right before exec. A missing context
//! is not an error the launch has to stop for; the caller decides.
//!
//! ```no_run
//! use snap_context::{inject, lookup, ProcessEnvironment};
//!
//! let token = lookup("foo");
//! if let Err(err) = &token {
//!     eprintln!("{err}");
//! }
//! inject(&mut ProcessEnvironment, token.as_ref().ok());
//! ```

pub mod context;
pub mod env;

pub use context::{
    context_path, lookup, lookup_in, ContextToken, LookupError, PathTooLong, CONTEXT_DIR,
    CONTEXT_FILE_PREFIX, TOKEN_CAPACITY, TOKEN_MAX_LEN,
};
pub use env::{inject, Environment, ProcessEnvironment, CONTEXT_ENV_VAR};
