//! Per-peer FIFO that serializes SDO transfers.

use std::future::Future;

/// A FIFO queue that allows at most one active transfer towards a given peer at a time.
///
/// `run` is the moral equivalent of the `push`/`pop` pair described for the
/// protocol's queue: callers `push` a thunk (here, an async closure) and get
/// back a future that resolves once the thunk has actually run to
/// completion. Concurrent callers are served in submission order and never
/// run concurrently with each other, which is exactly "at most one active
/// transfer per peer, FIFO". [`tokio::sync::Mutex`] already provides
/// first-in-first-out wake order, so it is used as the underlying primitive
/// rather than hand-rolling one.
#[derive(Debug, Default)]
pub struct Queue {
	lock: tokio::sync::Mutex<()>,
}

impl Queue {
	/// Create a new, empty queue.
	pub fn new() -> Self {
		Self::default()
	}

	/// Run `thunk` once this queue admits it, i.e. once every transfer submitted
	/// before it has completed (successfully, rejected, or aborted).
	pub async fn run<F, Fut, T>(&self, thunk: F) -> T
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = T>,
	{
		let _guard = self.lock.lock().await;
		thunk().await
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use assert2::assert;
	use std::sync::Arc;
	use std::sync::atomic::{AtomicUsize, Ordering};

	#[tokio::test]
	async fn runs_are_serialized_in_submission_order() {
		let queue = Arc::new(Queue::new());
		let order = Arc::new(std::sync::Mutex::new(Vec::new()));
		let counter = Arc::new(AtomicUsize::new(0));

		let mut handles = Vec::new();
		for i in 0..5 {
			let queue = queue.clone();
			let order = order.clone();
			let counter = counter.clone();
			handles.push(tokio::spawn(async move {
				queue.run(|| async move {
					// Yield so that, without serialization, tasks could interleave.
					tokio::task::yield_now().await;
					let seen = counter.fetch_add(1, Ordering::SeqCst);
					order.lock().unwrap().push((i, seen));
				}).await;
			}));
			// Give each task a chance to enqueue before spawning the next one.
			tokio::task::yield_now().await;
		}
		for handle in handles {
			handle.await.unwrap();
		}

		let order = order.lock().unwrap();
		let submission_order: Vec<_> = order.iter().map(|(i, _)| *i).collect();
		assert!(submission_order == vec![0, 1, 2, 3, 4]);
	}
}
