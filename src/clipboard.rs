//! Clipboard access with a single auto-clear deadline.
//!
//! The deadline is plain state polled by the event loop through
//! [`SecureClipboard::tick`]; no timer thread owns the clipboard.

use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use arboard::Clipboard;
use tracing::{debug, warn};

pub const DEFAULT_CLEAR_SECS: u64 = 30;
/// Delay before a failed timed clear is attempted again.
pub const CLEAR_RETRY: Duration = Duration::from_secs(1);

pub trait ClipboardBackend {
    fn set_text(&mut self, text: &str) -> Result<()>;
    fn clear(&mut self) -> Result<()>;
}

pub struct SystemClipboard {
    inner: Clipboard,
}

impl SystemClipboard {
    pub fn new() -> Result<Self> {
        let inner = Clipboard::new().map_err(|e| anyhow!("Clipboard unavailable: {e}"))?;
        Ok(Self { inner })
    }
}

impl ClipboardBackend for SystemClipboard {
    fn set_text(&mut self, text: &str) -> Result<()> {
        self.inner
            .set_text(text.to_string())
            .map_err(|e| anyhow!("Failed to set clipboard: {e}"))
    }

    fn clear(&mut self) -> Result<()> {
        self.inner
            .clear()
            .map_err(|e| anyhow!("Failed to clear clipboard: {e}"))
    }
}

/// At most one pending clear. Re-arming replaces the previous deadline.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ClearTimer {
    deadline: Option<Instant>,
}

impl ClearTimer {
    pub fn arm(&mut self, now: Instant, delay: Duration) {
        self.deadline = Some(now + delay);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(now))
    }

    /// True exactly once, on the first call at or past the deadline.
    pub fn due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

pub struct SecureClipboard {
    backend: Box<dyn ClipboardBackend>,
    delay: Duration,
    timer: ClearTimer,
}

impl SecureClipboard {
    pub fn new(backend: Box<dyn ClipboardBackend>, delay: Duration) -> Self {
        Self {
            backend,
            delay,
            timer: ClearTimer::default(),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.timer.remaining(now)
    }

    pub fn set_text(&mut self, text: &str, now: Instant) -> Result<()> {
        self.backend.set_text(text)?;
        self.timer.arm(now, self.delay);
        debug!(delay_secs = self.delay.as_secs(), "clipboard set, clear scheduled");
        Ok(())
    }

    pub fn clear(&mut self) -> Result<()> {
        self.timer.cancel();
        self.backend.clear()
    }

    /// Clears the clipboard once the deadline has passed. Returns whether a
    /// clear happened on this call. A failed clear stays scheduled and is
    /// retried after [`CLEAR_RETRY`].
    pub fn tick(&mut self, now: Instant) -> Result<bool> {
        if !self.timer.due(now) {
            return Ok(false);
        }
        if let Err(e) = self.backend.clear() {
            self.timer.arm(now, CLEAR_RETRY);
            return Err(e);
        }
        debug!("clipboard cleared after timeout");
        Ok(true)
    }
}

impl Drop for SecureClipboard {
    fn drop(&mut self) {
        if self.timer.is_armed() {
            if let Err(e) = self.backend.clear() {
                warn!(error = %e, "could not clear clipboard on shutdown");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Records every clipboard write; an empty string marks a clear.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingClipboard {
        pub(crate) writes: Rc<RefCell<Vec<String>>>,
    }

    impl ClipboardBackend for RecordingClipboard {
        fn set_text(&mut self, text: &str) -> Result<()> {
            self.writes.borrow_mut().push(text.to_string());
            Ok(())
        }

        fn clear(&mut self) -> Result<()> {
            self.writes.borrow_mut().push(String::new());
            Ok(())
        }
    }

    fn guard(delay: u64) -> (SecureClipboard, RecordingClipboard) {
        let backend = RecordingClipboard::default();
        let clip = SecureClipboard::new(Box::new(backend.clone()), Duration::from_secs(delay));
        (clip, backend)
    }

    #[test]
    fn timer_fires_once_after_deadline() {
        let mut timer = ClearTimer::default();
        let start = Instant::now();
        timer.arm(start, Duration::from_secs(30));
        assert!(!timer.due(start + Duration::from_secs(29)));
        assert!(timer.due(start + Duration::from_secs(30)));
        assert!(!timer.due(start + Duration::from_secs(31)));
        assert!(!timer.is_armed());
    }

    #[test]
    fn second_copy_reschedules_the_clear() {
        let (mut clip, backend) = guard(30);
        let start = Instant::now();
        clip.set_text("first", start).unwrap();
        clip.set_text("second", start + Duration::from_secs(10)).unwrap();

        assert!(!clip.tick(start + Duration::from_secs(30)).unwrap());
        assert!(clip.tick(start + Duration::from_secs(40)).unwrap());
        assert!(!clip.tick(start + Duration::from_secs(80)).unwrap());
        assert_eq!(
            *backend.writes.borrow(),
            vec!["first".to_string(), "second".to_string(), String::new()]
        );
    }

    #[test]
    fn manual_clear_cancels_deadline() {
        let (mut clip, backend) = guard(30);
        let start = Instant::now();
        clip.set_text("secret", start).unwrap();
        clip.clear().unwrap();
        assert_eq!(clip.remaining(start), None);
        assert!(!clip.tick(start + Duration::from_secs(60)).unwrap());
        assert_eq!(backend.writes.borrow().len(), 2);
    }

    /// Fails the first `failures` clears, then records like the inner backend.
    struct FlakyClipboard {
        failures: usize,
        inner: RecordingClipboard,
    }

    impl ClipboardBackend for FlakyClipboard {
        fn set_text(&mut self, text: &str) -> Result<()> {
            self.inner.set_text(text)
        }

        fn clear(&mut self) -> Result<()> {
            if self.failures > 0 {
                self.failures -= 1;
                return Err(anyhow!("clipboard busy"));
            }
            self.inner.clear()
        }
    }

    #[test]
    fn failed_timed_clear_is_retried() {
        let inner = RecordingClipboard::default();
        let backend = FlakyClipboard {
            failures: 1,
            inner: inner.clone(),
        };
        let mut clip = SecureClipboard::new(Box::new(backend), Duration::from_secs(30));
        let start = Instant::now();
        clip.set_text("secret", start).unwrap();

        let deadline = start + Duration::from_secs(30);
        assert!(clip.tick(deadline).is_err());
        assert_eq!(clip.remaining(deadline), Some(CLEAR_RETRY));
        assert!(!clip.tick(deadline + CLEAR_RETRY / 2).unwrap());
        assert!(clip.tick(deadline + CLEAR_RETRY).unwrap());
        assert_eq!(
            *inner.writes.borrow(),
            vec!["secret".to_string(), String::new()]
        );
        assert_eq!(clip.remaining(deadline + CLEAR_RETRY), None);
    }

    #[test]
    fn failed_timed_clear_is_retried_on_drop() {
        let inner = RecordingClipboard::default();
        let backend = FlakyClipboard {
            failures: 1,
            inner: inner.clone(),
        };
        let mut clip = SecureClipboard::new(Box::new(backend), Duration::from_secs(30));
        let start = Instant::now();
        clip.set_text("secret", start).unwrap();
        assert!(clip.tick(start + Duration::from_secs(30)).is_err());
        drop(clip);
        assert_eq!(inner.writes.borrow().last().map(String::as_str), Some(""));
    }

    #[test]
    fn dropping_armed_guard_clears() {
        let (mut clip, backend) = guard(30);
        clip.set_text("secret", Instant::now()).unwrap();
        drop(clip);
        assert_eq!(backend.writes.borrow().last().map(String::as_str), Some(""));
    }
}
