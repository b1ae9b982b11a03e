use std::sync::Arc;

use crate::{
    messages::{CanId, CanMessage},
    traits::{AsyncCanReceiver, AsyncCanSender},
};
use snafu::{ResultExt, Snafu};
use socketcan::{CanFrame, CanSocket, EmbeddedFrame, Frame, ShouldRetry, Socket};
use tokio::io::{unix::AsyncFd, Interest};

/// Error returned by [`SocketCanReceiver::recv`]
#[derive(Debug, Snafu)]
#[snafu(display("Failed to read from CAN socket: {source}"))]
pub struct ReceiveError {
    source: std::io::Error,
}

fn socketcan_id_to_can_id(id: socketcan::CanId) -> CanId {
    match id {
        socketcan::CanId::Standard(id) => CanId::std(id.as_raw()),
        socketcan::CanId::Extended(id) => CanId::extended(id.as_raw()),
    }
}

fn can_id_to_socketcan_id(id: CanId) -> socketcan::CanId {
    match id {
        CanId::Extended(id) => socketcan::ExtendedId::new(id).unwrap().into(),
        CanId::Std(id) => socketcan::StandardId::new(id).unwrap().into(),
    }
}

fn socketcan_frame_to_message(frame: socketcan::CanFrame) -> Option<CanMessage> {
    let id = socketcan_id_to_can_id(frame.can_id());

    match frame {
        CanFrame::Data(frame) => Some(CanMessage::new(id, frame.data())),
        CanFrame::Remote(_) => Some(CanMessage::new_rtr(id)),
        // Error frames carry no protocol payload; drop them here and let the caller keep reading
        CanFrame::Error(_) => None,
    }
}

fn message_to_socketcan_frame(msg: CanMessage) -> socketcan::CanFrame {
    let id = can_id_to_socketcan_id(msg.id());

    if msg.is_rtr() {
        socketcan::CanFrame::new_remote(id, 0).unwrap()
    } else {
        socketcan::CanFrame::new(id, msg.data()).unwrap()
    }
}

/// An async wrapper around a socketcan CanSocket
///
/// This reimplements the tokio socket from the `socketcan` crate, with support for non-blocking
/// `try_read_frame` added.
#[derive(Debug)]
struct AsyncCanSocket(AsyncFd<CanSocket>);

impl AsyncCanSocket {
    pub fn open(ifname: &str) -> Result<Self, std::io::Error> {
        let socket = CanSocket::open(ifname)?;
        socket.set_nonblocking(true)?;
        Ok(Self(AsyncFd::new(socket)?))
    }

    /// Attempt to read a CAN frame from the socket without blocking
    pub fn try_read_frame(&self) -> Result<CanFrame, std::io::Error> {
        self.0.get_ref().read_frame()
    }

    /// Read a CAN frame from the socket asynchronously
    pub async fn read_frame(&self) -> Result<CanFrame, std::io::Error> {
        self.0
            .async_io(Interest::READABLE, |inner| inner.read_frame())
            .await
    }

    pub async fn write_frame(&self, frame: &CanFrame) -> Result<(), std::io::Error> {
        self.0
            .async_io(Interest::WRITABLE, |inner| inner.write_frame(frame))
            .await
    }
}

/// The receiving half of a socketcan interface
#[derive(Debug, Clone)]
pub struct SocketCanReceiver {
    socket: Arc<AsyncCanSocket>,
}

impl AsyncCanReceiver for SocketCanReceiver {
    type Error = ReceiveError;

    fn try_recv(&mut self) -> Option<CanMessage> {
        match self.socket.try_read_frame() {
            Ok(frame) => socketcan_frame_to_message(frame),
            _ => None,
        }
    }

    async fn recv(&mut self) -> Result<CanMessage, Self::Error> {
        loop {
            match self.socket.read_frame().await {
                Ok(frame) => {
                    if let Some(msg) = socketcan_frame_to_message(frame) {
                        return Ok(msg);
                    }
                }
                Err(e) => {
                    if !e.should_retry() {
                        return Err(e).context(ReceiveSnafu);
                    }
                }
            }
        }
    }
}

/// The sending half of a socketcan interface
#[derive(Debug, Clone)]
pub struct SocketCanSender {
    socket: Arc<AsyncCanSocket>,
}

impl AsyncCanSender for SocketCanSender {
    type Error = CanMessage;

    async fn send(&mut self, msg: CanMessage) -> Result<(), CanMessage> {
        let frame = message_to_socketcan_frame(msg);

        let result = self.socket.write_frame(&frame).await;
        if result.is_err() {
            Err(msg)
        } else {
            Ok(())
        }
    }
}

/// Open a socketcan device and split it into a sender and receiver object
///
/// # Arguments
/// * `device` - The name of the socketcan device to open, e.g. "vcan0", or "can0"
///
/// A key benefit of this is that by creating both sender and receiver objects from a shared
/// socket, the receiver will not receive messages sent by the sender.
pub fn open_socketcan<S: AsRef<str>>(
    device: S,
) -> Result<(SocketCanSender, SocketCanReceiver), std::io::Error> {
    let socket = Arc::new(AsyncCanSocket::open(device.as_ref())?);
    let receiver = SocketCanReceiver {
        socket: socket.clone(),
    };
    let sender = SocketCanSender { socket };
    Ok((sender, receiver))
}
