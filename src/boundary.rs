//! Fault barrier around rendering.
//!
//! A render that errors or panics trips the boundary. From then on every
//! render shows a neutral fallback view until [`ErrorBoundary::reset`].

use log::error;
use std::any::Any;
use std::io::{ self, Write };
use std::panic::{ self, AssertUnwindSafe };

pub const FALLBACK_VIEW: &str = "Something went wrong. Type /retry to try again.";

#[derive(Debug, Default)]
pub struct ErrorBoundary {
    tripped: bool,
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

impl ErrorBoundary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_error(&self) -> bool {
        self.tripped
    }

    pub fn reset(&mut self) {
        self.tripped = false;
    }

    /// Runs `view` against `out`, or the fallback view if already tripped.
    pub fn render<W, F>(&mut self, out: &mut W, view: F)
        where W: Write, F: FnOnce(&mut W) -> io::Result<()>
    {
        if !self.tripped {
            let result = panic::catch_unwind(AssertUnwindSafe(|| view(&mut *out)));
            match result {
                Ok(Ok(())) => {
                    return;
                }
                Ok(Err(e)) => error!("Error caught by boundary: {}", e),
                Err(payload) => error!("Panic caught by boundary: {}", panic_message(&*payload)),
            }
            self.tripped = true;
        }
        if let Err(e) = writeln!(out, "{}", FALLBACK_VIEW) {
            error!("Failed to render fallback view: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(buf: &[u8]) -> String {
        String::from_utf8_lossy(buf).into_owned()
    }

    #[test]
    fn healthy_render_passes_through() {
        let mut boundary = ErrorBoundary::new();
        let mut out = Vec::new();
        boundary.render(&mut out, |w| writeln!(w, "hello"));
        assert_eq!(rendered(&out), "hello\n");
        assert!(!boundary.has_error());
    }

    #[test]
    fn render_error_trips_until_reset() {
        let mut boundary = ErrorBoundary::new();
        let mut out = Vec::new();
        boundary.render(&mut out, |_| Err(io::Error::new(io::ErrorKind::Other, "boom")));
        assert!(boundary.has_error());
        assert!(rendered(&out).contains(FALLBACK_VIEW));

        let mut out = Vec::new();
        boundary.render(&mut out, |w| writeln!(w, "hidden"));
        assert_eq!(rendered(&out).trim(), FALLBACK_VIEW);

        boundary.reset();
        let mut out = Vec::new();
        boundary.render(&mut out, |w| writeln!(w, "back"));
        assert_eq!(rendered(&out), "back\n");
    }

    #[test]
    fn panic_is_contained() {
        let mut boundary = ErrorBoundary::new();
        let mut out = Vec::new();
        boundary.render(&mut out, |_| -> io::Result<()> { panic!("render exploded") });
        assert!(boundary.has_error());
        assert!(rendered(&out).contains(FALLBACK_VIEW));
    }
}
