//! Client for issuing SDO requests
//!
//! Requests are fire-and-forget: the client puts the frame on the bus and returns. Responses come
//! back through the dispatcher and are routed to whatever handler is registered for the echoed
//! object key, so a "read" here is really a request for the drive to publish a value.

use std::sync::Arc;

use canmotion_common::sdo::{self, DownloadValue};
use canmotion_common::traits::AsyncCanSender;
use canmotion_common::{NodeId, ObjectKey};

use crate::master::{MasterContext, MasterError};

/// Handle for issuing SDO requests through a [`Master`](crate::master::Master)
///
/// Cheap to clone; all clones share the master's serialized sender.
pub struct SdoClient<S: AsyncCanSender> {
    ctx: Arc<MasterContext<S>>,
}

impl<S: AsyncCanSender> Clone for SdoClient<S> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
        }
    }
}

impl<S: AsyncCanSender> SdoClient<S> {
    pub(crate) fn new(ctx: Arc<MasterContext<S>>) -> Self {
        Self { ctx }
    }

    /// Request an upload (read) of an object from a node
    ///
    /// The response arrives asynchronously via the registered SDO handler for `key`.
    pub async fn read(&self, node: NodeId, key: ObjectKey) -> Result<(), MasterError> {
        self.ctx.send(sdo::upload_request(node, key)).await
    }

    /// Write a value to an object on a node via an expedited download
    pub async fn write(
        &self,
        node: NodeId,
        key: ObjectKey,
        value: impl Into<DownloadValue>,
    ) -> Result<(), MasterError> {
        self.ctx
            .send(sdo::download_request(node, key, value.into()))
            .await
    }
}

impl<S: AsyncCanSender> std::fmt::Debug for SdoClient<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SdoClient").finish_non_exhaustive()
    }
}
