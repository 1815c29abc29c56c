use tokio::sync::broadcast::{self, Sender};

use crate::cache::observer::TokenEvent;

const BUFFER_SIZE: usize = 50;

/// Broadcast channel carrying observer events; subscribe before sending.
pub fn run() -> Sender<TokenEvent> {
    let (event_sender, _) = broadcast::channel(BUFFER_SIZE);
    event_sender
}
