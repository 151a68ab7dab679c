//! The CAN transport adapter contract consumed by the SDO engine.

use can_socket::tokio::CanSocket;
use can_socket::CanFrame;
use tokio::sync::broadcast;

/// The narrow transport interface the SDO engine needs: fire-and-forget send,
/// and a subscription mechanism that delivers every inbound frame to every
/// subscriber exactly once, so that a client and a server can share one bus.
// Implementations and callers both live within this crate's single-threaded,
// cooperative execution model; a `Send`-bounded desugared future buys nothing here.
#[allow(async_fn_in_trait)]
pub trait Transport {
	/// Send a frame. Fire-and-forget: callers do not wait for bus arbitration.
	async fn send(&self, frame: CanFrame) -> std::io::Result<()>;

	/// Subscribe to inbound frames. Each subscription receives every frame
	/// delivered to the transport after the subscription was created.
	fn subscribe(&self) -> Subscription;
}

/// A handle to a [`Transport`]'s inbound frame stream.
#[derive(Debug)]
pub struct Subscription(broadcast::Receiver<CanFrame>);

impl Subscription {
	/// Wait for the next inbound frame.
	///
	/// Returns [`None`] if the transport has been dropped. Lagging (missing
	/// frames due to a slow consumer) is logged and otherwise transparent to
	/// the caller; the loop resumes from the oldest frame still buffered.
	pub async fn recv(&mut self) -> Option<CanFrame> {
		loop {
			match self.0.recv().await {
				Ok(frame) => return Some(frame),
				Err(broadcast::error::RecvError::Lagged(skipped)) => {
					log::warn!("SDO transport subscriber lagged, skipped {skipped} frames");
				},
				Err(broadcast::error::RecvError::Closed) => return None,
			}
		}
	}
}

/// A [`Transport`] backed by a real SocketCAN interface.
///
/// Runs a background task that reads frames off the socket and fans them out
/// to every live [`Subscription`].
pub struct CanBusTransport {
	socket: std::sync::Arc<CanSocket>,
	inbound: broadcast::Sender<CanFrame>,
	_reader: tokio::task::JoinHandle<()>,
}

impl CanBusTransport {
	/// Wrap a bound [`CanSocket`], spawning the background fan-out task.
	pub fn new(socket: CanSocket) -> Self {
		let socket = std::sync::Arc::new(socket);
		let (inbound, _) = broadcast::channel(64);
		let reader_socket = socket.clone();
		let reader_tx = inbound.clone();
		let reader = tokio::spawn(async move {
			loop {
				match reader_socket.recv().await {
					Ok(frame) => {
						// No receivers is not an error: nobody has subscribed (yet).
						let _ = reader_tx.send(frame);
					},
					Err(error) => {
						log::error!("CAN socket read failed, stopping transport: {error}");
						break;
					},
				}
			}
		});
		Self { socket, inbound, _reader: reader }
	}
}

impl std::fmt::Debug for CanBusTransport {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CanBusTransport").finish_non_exhaustive()
	}
}

impl Transport for CanBusTransport {
	async fn send(&self, frame: CanFrame) -> std::io::Result<()> {
		self.socket.send(&frame).await
	}

	fn subscribe(&self) -> Subscription {
		Subscription(self.inbound.subscribe())
	}
}

/// An in-memory, loop-back pair of [`Transport`]s, used to exercise client and
/// server FSMs against each other without a real CAN interface.
#[derive(Debug, Clone)]
pub struct MemoryBus {
	outbound: broadcast::Sender<CanFrame>,
	inbound: broadcast::Sender<CanFrame>,
}

impl MemoryBus {
	/// Create a connected pair of memory busses: frames sent on one side are
	/// delivered to subscribers of the other.
	pub fn pair() -> (Self, Self) {
		let (a_to_b, _) = broadcast::channel(64);
		let (b_to_a, _) = broadcast::channel(64);
		let a = Self { outbound: a_to_b.clone(), inbound: b_to_a.clone() };
		let b = Self { outbound: b_to_a, inbound: a_to_b };
		(a, b)
	}
}

impl Transport for MemoryBus {
	async fn send(&self, frame: CanFrame) -> std::io::Result<()> {
		// No receivers is not an error: nobody has subscribed (yet).
		let _ = self.outbound.send(frame);
		Ok(())
	}

	fn subscribe(&self) -> Subscription {
		Subscription(self.inbound.subscribe())
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use assert2::{assert, let_assert};
	use can_socket::CanId;

	#[tokio::test]
	async fn memory_bus_delivers_loopback_frames() {
		let (a, b) = MemoryBus::pair();
		let mut sub = b.subscribe();
		let frame = CanFrame::new(CanId::new_standard(0x123).unwrap(), &[1, 2, 3], None).unwrap();
		a.send(frame).await.unwrap();
		let_assert!(Some(received) = sub.recv().await);
		assert!(received.data() == [1, 2, 3]);
	}
}
