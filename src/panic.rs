//! Formatting of panic payloads caught at task and decoder boundaries.

use std::{any::Any, fmt};

/// Display wrapper for a caught panic payload.
///
/// `String` and `&'static str` payloads print as-is; anything else falls
/// back to its `Debug` form.
///
/// ```
/// use peerwire::panic::format_panic;
/// assert_eq!(format_panic(Box::new("bad length")).to_string(), "bad length");
/// assert!(format_panic(Box::new(5_u32)).to_string().contains("Any"));
/// ```
#[derive(Debug)]
#[must_use]
pub struct PanicMessage(Box<dyn Any + Send>);

impl fmt::Display for PanicMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(s) = self.0.downcast_ref::<String>() {
            f.write_str(s)
        } else if let Some(s) = self.0.downcast_ref::<&'static str>() {
            f.write_str(s)
        } else {
            write!(f, "{:?}", self.0)
        }
    }
}

/// Wrap a payload returned by `catch_unwind` for logging.
pub fn format_panic(panic: Box<dyn Any + Send>) -> PanicMessage { PanicMessage(panic) }
