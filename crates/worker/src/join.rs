use std::future::Future;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::TaskClass;

/// Join coordination state for one owned task.
///
/// Concurrent shutdown callers do not race: the first becomes the leader that
/// awaits the join handle, the others wait on the notify until `Done`.
enum JoinState {
	Handle(JoinHandle<()>),
	Joining,
	Done,
}

/// Outcome of [`ScopedTask::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
	pub completed: bool,
	pub timed_out: bool,
}

/// Owned background task with deterministic teardown.
///
/// The task receives a [`CancellationToken`]; dropping the `ScopedTask`
/// cancels it, and [`ScopedTask::shutdown`] additionally waits for it to exit.
pub struct ScopedTask {
	name: &'static str,
	cancel: CancellationToken,
	state: Mutex<JoinState>,
	done: Notify,
}

impl std::fmt::Debug for ScopedTask {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ScopedTask")
			.field("name", &self.name)
			.field("cancelled", &self.cancel.is_cancelled())
			.finish()
	}
}

impl Drop for ScopedTask {
	fn drop(&mut self) {
		self.cancel.cancel();
	}
}

impl ScopedTask {
	/// Spawns `body` with a fresh cancellation token.
	pub fn spawn<F, Fut>(class: TaskClass, name: &'static str, body: F) -> Self
	where
		F: FnOnce(CancellationToken) -> Fut,
		Fut: Future<Output = ()> + Send + 'static,
	{
		let cancel = CancellationToken::new();
		let handle = crate::spawn(class, name, body(cancel.clone()));
		Self {
			name,
			cancel,
			state: Mutex::new(JoinState::Handle(handle)),
			done: Notify::new(),
		}
	}

	pub fn name(&self) -> &'static str {
		self.name
	}

	/// Requests cancellation without waiting.
	pub fn cancel(&self) {
		self.cancel.cancel();
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancel.is_cancelled()
	}

	/// Cancels and waits up to `timeout` for the task to exit.
	///
	/// The handle is retained on timeout, so a later call can finish the join.
	pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport {
		self.cancel.cancel();
		let completed = self.join_with_timeout(timeout).await;
		if !completed {
			tracing::warn!(task = self.name, "worker.task.shutdown_timeout");
		}
		ShutdownReport {
			completed,
			timed_out: !completed,
		}
	}

	async fn join_with_timeout(&self, timeout: Duration) -> bool {
		let deadline = tokio::time::Instant::now() + timeout;
		loop {
			let maybe_handle = {
				let mut st = self.state.lock().await;
				match &*st {
					JoinState::Done => return true,
					JoinState::Joining => {
						// Register while the lock is held so the leader's notify is not lost.
						let notified = self.done.notified();
						drop(st);
						tokio::select! {
							_ = notified => continue,
							_ = tokio::time::sleep_until(deadline) => return false,
						}
					}
					JoinState::Handle(_) => {
						let JoinState::Handle(h) = std::mem::replace(&mut *st, JoinState::Joining) else {
							unreachable!()
						};
						h
					}
				}
			};
			let mut h = maybe_handle;
			tokio::select! {
				res = &mut h => {
					if let Err(err) = res
						&& err.is_panic()
					{
						tracing::error!(task = self.name, "worker.task.panicked");
					}
					*self.state.lock().await = JoinState::Done;
					self.done.notify_waiters();
					return true;
				}
				_ = tokio::time::sleep_until(deadline) => {
					*self.state.lock().await = JoinState::Handle(h);
					self.done.notify_waiters();
					return false;
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;
	use std::sync::atomic::{AtomicBool, Ordering};

	use super::*;

	#[tokio::test]
	async fn shutdown_cancels_and_joins() {
		let exited = Arc::new(AtomicBool::new(false));
		let flag = Arc::clone(&exited);
		let task = ScopedTask::spawn(TaskClass::Background, "test.wait", move |cancel| async move {
			cancel.cancelled().await;
			flag.store(true, Ordering::SeqCst);
		});

		let report = task.shutdown(Duration::from_secs(1)).await;
		assert!(report.completed);
		assert!(exited.load(Ordering::SeqCst));

		// Idempotent once done.
		assert!(task.shutdown(Duration::from_millis(1)).await.completed);
	}

	#[tokio::test]
	async fn shutdown_times_out_for_uncooperative_task_and_can_retry() {
		let task = ScopedTask::spawn(TaskClass::Background, "test.stubborn", |_cancel| async move {
			tokio::time::sleep(Duration::from_millis(100)).await;
		});

		let report = task.shutdown(Duration::from_millis(5)).await;
		assert!(report.timed_out);

		let report = task.shutdown(Duration::from_secs(2)).await;
		assert!(report.completed);
	}

	#[tokio::test]
	async fn drop_cancels_task() {
		let (tx, rx) = tokio::sync::oneshot::channel();
		let task = ScopedTask::spawn(TaskClass::Background, "test.drop", move |cancel| async move {
			cancel.cancelled().await;
			let _ = tx.send(());
		});
		drop(task);
		assert!(tokio::time::timeout(Duration::from_secs(1), rx).await.is_ok());
	}
}
