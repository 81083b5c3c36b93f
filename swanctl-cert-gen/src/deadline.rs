//! Bounded execution of engine and packager calls, with cooperative
//! cancellation.

use std::{
	panic,
	sync::{
		atomic::{AtomicBool, Ordering},
		mpsc::{self, RecvTimeoutError},
		Arc,
	},
	thread,
	time::{Duration, Instant},
};

use tracing::warn;

use crate::{workflow::Step, Error, Result};

const POLL: Duration = Duration::from_millis(50);

/// Shared flag raised when the operator interrupts the run.
#[derive(Clone, Debug, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
	/// A token that is not cancelled.
	pub fn new() -> Self {
		Self::default()
	}
	/// Request cancellation; observed by every clone.
	pub fn cancel(&self) {
		self.0.store(true, Ordering::SeqCst);
	}
	/// Whether [`cancel`](Self::cancel) was called.
	pub fn is_cancelled(&self) -> bool {
		self.0.load(Ordering::SeqCst)
	}
	/// Fail with [`Error::Interrupted`] if cancellation was requested.
	pub fn check(&self, step: Step) -> Result<()> {
		if self.is_cancelled() {
			return Err(Error::Interrupted { step });
		}
		Ok(())
	}
}

/// Run `f` on a worker thread and wait at most `timeout` for its result.
///
/// A call that overruns is abandoned: its thread is detached and the result,
/// if any, discarded. A panic in `f` is resumed on the calling thread.
pub(crate) fn bounded<T, F>(step: Step, timeout: Duration, cancel: &Cancellation, f: F) -> Result<T>
where
	T: Send + 'static,
	F: FnOnce() -> Result<T> + Send + 'static,
{
	cancel.check(step)?;
	let (tx, rx) = mpsc::channel();
	let worker = thread::Builder::new()
		.name(step.to_string())
		.spawn(move || {
			// receiver may be gone after a timeout
			let _ = tx.send(f());
		})
		.map_err(|source| Error::Io {
			path: Default::default(),
			source,
		})?;

	let deadline = Instant::now() + timeout;
	loop {
		cancel.check(step)?;
		let left = deadline.saturating_duration_since(Instant::now());
		if left.is_zero() {
			warn!(%step, ?timeout, "abandoning overdue call");
			return Err(Error::ExternalToolTimeout { step, timeout });
		}
		match rx.recv_timeout(left.min(POLL)) {
			Ok(result) => return result,
			Err(RecvTimeoutError::Timeout) => continue,
			Err(RecvTimeoutError::Disconnected) => match worker.join() {
				Err(payload) => panic::resume_unwind(payload),
				Ok(()) => unreachable!("{step} worker exited without a result"),
			},
		}
	}
}
