//! A simulated CAN bus for exercising the master without hardware
//!
//! Every endpoint gets its own unbounded channel. A sender delivers each frame to every endpoint
//! except its own paired receiver, which mirrors how a shared socketcan socket does not read back
//! its own frames. A monitor endpoint has no sender and therefore sees all traffic.

use std::sync::{Arc, Mutex};

use canmotion_common::messages::CanMessage;
use canmotion_common::traits::{AsyncCanReceiver, AsyncCanSender};

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

#[derive(Clone, Default)]
pub struct SimBus {
    endpoints: Arc<Mutex<Vec<UnboundedSender<CanMessage>>>>,
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sender/receiver pair attached to the bus
    ///
    /// The receiver sees every frame on the bus except those sent by its paired sender.
    pub fn endpoint(&self) -> (SimBusSender, SimBusReceiver) {
        let (tx, rx) = unbounded_channel();
        let mut endpoints = self.endpoints.lock().unwrap();
        let index = endpoints.len();
        endpoints.push(tx);
        (
            SimBusSender {
                index,
                endpoints: self.endpoints.clone(),
            },
            SimBusReceiver { channel_rx: rx },
        )
    }

    /// Create a receive-only endpoint which sees all traffic on the bus
    pub fn monitor(&self) -> SimBusReceiver {
        let (tx, rx) = unbounded_channel();
        self.endpoints.lock().unwrap().push(tx);
        SimBusReceiver { channel_rx: rx }
    }
}

pub struct SimBusSender {
    index: usize,
    endpoints: Arc<Mutex<Vec<UnboundedSender<CanMessage>>>>,
}

impl AsyncCanSender for SimBusSender {
    type Error = CanMessage;

    async fn send(&mut self, msg: CanMessage) -> Result<(), CanMessage> {
        for (i, endpoint) in self.endpoints.lock().unwrap().iter().enumerate() {
            // Deliver to everyone except the sender's own receiver; a dropped receiver is just
            // an endpoint that left the bus
            if i != self.index {
                endpoint.send(msg).ok();
            }
        }
        Ok(())
    }
}

pub struct SimBusReceiver {
    channel_rx: UnboundedReceiver<CanMessage>,
}

impl AsyncCanReceiver for SimBusReceiver {
    type Error = ();

    async fn recv(&mut self) -> Result<CanMessage, Self::Error> {
        self.channel_rx.recv().await.ok_or(())
    }

    fn try_recv(&mut self) -> Option<CanMessage> {
        self.channel_rx.try_recv().ok()
    }
}
