//! Cooperative cancellation.
//!
//! A [`StopToken`] is a broadcast flag shared by every worker in a scan or
//! fix run. Workers check it at task boundaries only; nothing is interrupted
//! mid-syscall. A worker observing the flag abandons its current machine and
//! returns [`Error::Stopped`](crate::Error::Stopped); database rows already
//! committed stay valid.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable broadcast stop flag.
#[derive(Clone, Debug, Default)]
pub struct StopToken {
	flag: Arc<AtomicBool>,
}

impl StopToken {
	/// A fresh, unsignalled token.
	pub fn new() -> Self {
		Self::default()
	}

	/// Signal every holder of this token to stop.
	pub fn stop(&self) {
		self.flag.store(true, Ordering::Relaxed);
	}

	/// Has the token been signalled?
	pub fn is_stopped(&self) -> bool {
		self.flag.load(Ordering::Relaxed)
	}

	/// Return [`Error::Stopped`](crate::Error::Stopped) if signalled.
	pub fn check(&self) -> crate::Result<()> {
		if self.is_stopped() {
			Err(crate::Error::Stopped)
		} else {
			Ok(())
		}
	}
}
