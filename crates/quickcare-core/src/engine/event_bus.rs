//! In-process broadcast of committed changes.

use quickcare_types::ChangeEvent;
use tokio::sync::broadcast;

/// Fan-out channel for [`ChangeEvent`]s.
///
/// Every subscriber sees every event published after it subscribed. A
/// subscriber that falls more than `capacity` events behind loses the oldest
/// ones and is told how many it missed.
#[derive(Clone)]
pub struct EventBus {
	sender: broadcast::Sender<ChangeEvent>,
}

impl EventBus {
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	/// Publishes an event. Fails only when nobody is listening.
	pub fn publish(
		&self,
		event: ChangeEvent,
	) -> Result<usize, broadcast::error::SendError<ChangeEvent>> {
		self.sender.send(event)
	}

	pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
		self.sender.subscribe()
	}

	pub fn subscriber_count(&self) -> usize {
		self.sender.receiver_count()
	}
}
