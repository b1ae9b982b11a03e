//! The master object: lifecycle, initialization, and bus-facing operations

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use log::{info, warn};
use snafu::{ensure, OptionExt, Snafu};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use canmotion_common::constants::{object_keys, values};
use canmotion_common::nmt::{self, NmtCommandSpecifier, NmtState};
use canmotion_common::traits::{AsyncCanReceiver, AsyncCanSender, CanSendError};
use canmotion_common::{pdo, CanMessage, NodeId, ObjectKey};

use crate::config::MasterConfig;
use crate::device::{Device, DeviceRegistry, RxStamp};
use crate::dispatch;
use crate::handlers::{self, HandlerRegistry, PdoHandler, SdoHandler};
use crate::motor::{self, DriveOutcome, MotorState};
use crate::sdo_client::SdoClient;
use crate::sync_loop;
use crate::trajectory::{HoldPosition, Trajectory};

/// Errors returned by master operations
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum MasterError {
    /// Opening the CAN interface failed
    #[snafu(display("Failed to open CAN interface {interface}: {source}"))]
    TransportOpen {
        /// Interface name
        interface: String,
        /// Underlying error
        source: std::io::Error,
    },
    /// Putting a frame on the bus failed
    #[snafu(display("Failed to send CAN frame: {message}"))]
    SendFailed {
        /// Description from the transport
        message: String,
    },
    /// The addressed node is not a managed device
    #[snafu(display("Node {node} is not a managed device"))]
    UnknownNode {
        /// The offending node ID
        node: u8,
    },
    /// Two devices were configured with the same node ID
    #[snafu(display("Duplicate device with node ID {node}"))]
    DuplicateDevice {
        /// The duplicated node ID
        node: u8,
    },
    /// An SDO handler is already registered for this object
    #[snafu(display("A handler is already registered for object {index:#06x} sub {sub}"))]
    DuplicateSdoHandler {
        /// Object index
        index: u16,
        /// Object sub-index
        sub: u8,
    },
    /// A PDO handler is already registered for this COB-ID
    #[snafu(display("A handler is already registered for COB-ID {cob:#x}"))]
    DuplicatePdoHandler {
        /// The COB-ID
        cob: u16,
    },
    /// A bounded drive gave up before reaching the target state
    #[snafu(display("Node {node} stuck in {last} while driving to {target}"))]
    DriveTimeout {
        /// The node being driven
        node: u8,
        /// The state that was requested
        target: MotorState,
        /// The last state observed
        last: MotorState,
    },
    /// The requested NMT state cannot be commanded
    #[snafu(display("{state} is not a commandable NMT state"))]
    InvalidNmtTarget {
        /// The requested state
        state: NmtState,
    },
    /// The master is shutting down
    #[snafu(display("The master is shutting down"))]
    ShuttingDown,
    /// The config document failed to parse
    #[snafu(display("Failed to parse config: {source}"))]
    ConfigParse {
        /// Underlying TOML error
        source: toml::de::Error,
    },
}

/// Shared state behind every master task and handle
pub(crate) struct MasterContext<S> {
    pub(crate) registry: DeviceRegistry,
    pub(crate) handlers: HandlerRegistry,
    pub(crate) trajectory: Arc<dyn Trajectory>,
    pub(crate) config: MasterConfig,
    sender: Mutex<S>,
    epoch: Instant,
}

impl<S: AsyncCanSender> MasterContext<S> {
    /// Send a frame, serializing access to the transport
    ///
    /// The synchronizer, the state machine walks, and application calls all send through here, so
    /// frames never interleave at the transport.
    pub(crate) async fn send(&self, msg: CanMessage) -> Result<(), MasterError> {
        let mut sender = self.sender.lock().await;
        match sender.send(msg).await {
            Ok(()) => Ok(()),
            Err(e) => SendFailedSnafu { message: e.message() }.fail(),
        }
    }

    /// Stamp for a frame received now
    pub(crate) fn stamp(&self) -> RxStamp {
        RxStamp::from_elapsed(self.epoch.elapsed())
    }
}

/// Builder for a [`Master`]
///
/// Collects devices, groups, handlers, and the trajectory, then binds to a transport with
/// [`connect`](MasterBuilder::connect) or [`attach`](MasterBuilder::attach).
pub struct MasterBuilder {
    config: MasterConfig,
    devices: Vec<NodeId>,
    groups: HashMap<String, Vec<NodeId>>,
    trajectory: Arc<dyn Trajectory>,
    handlers: HandlerRegistry,
}

impl MasterBuilder {
    /// Create a builder with the given timing config
    pub fn new(config: MasterConfig) -> Self {
        Self {
            config,
            devices: Vec::new(),
            groups: HashMap::new(),
            trajectory: Arc::new(HoldPosition),
            handlers: HandlerRegistry::new(),
        }
    }

    /// Add a drive to manage
    pub fn add_device(mut self, node: NodeId) -> Self {
        self.devices.push(node);
        self
    }

    /// Define a named group of devices
    ///
    /// Members must also be added as devices; this is checked when the transport is bound.
    pub fn add_group(mut self, name: impl Into<String>, members: Vec<NodeId>) -> Self {
        self.groups.insert(name.into(), members);
        self
    }

    /// Replace the default hold-position trajectory
    pub fn trajectory(mut self, trajectory: impl Trajectory + 'static) -> Self {
        self.trajectory = Arc::new(trajectory);
        self
    }

    /// Register an application handler for SDO responses echoing `key`
    ///
    /// The statusword object is reserved for the built-in handler.
    pub fn sdo_handler(mut self, key: ObjectKey, handler: SdoHandler) -> Result<Self, MasterError> {
        self.handlers.register_sdo(key, handler)?;
        Ok(self)
    }

    /// Register an application handler for PDOs on `cob`
    ///
    /// Each device's feedback COB-ID is reserved for the built-in position handler.
    pub fn pdo_handler(mut self, cob: u16, handler: PdoHandler) -> Result<Self, MasterError> {
        self.handlers.register_pdo(cob, handler)?;
        Ok(self)
    }

    /// Open a socketcan interface and bind to it
    #[cfg(all(feature = "socketcan", target_os = "linux"))]
    pub fn connect(
        self,
        interface: &str,
    ) -> Result<
        Master<canmotion_common::SocketCanSender, canmotion_common::SocketCanReceiver>,
        MasterError,
    > {
        use snafu::ResultExt;

        let (sender, receiver) =
            canmotion_common::open_socketcan(interface).context(TransportOpenSnafu { interface })?;
        self.attach(sender, receiver)
    }

    /// Bind to an already-open transport
    pub fn attach<S, R>(mut self, sender: S, receiver: R) -> Result<Master<S, R>, MasterError>
    where
        S: AsyncCanSender + 'static,
        R: AsyncCanReceiver + 'static,
    {
        for member in self.groups.values().flatten() {
            ensure!(
                self.devices.contains(member),
                UnknownNodeSnafu { node: member.raw() }
            );
        }
        let registry = DeviceRegistry::new(&self.devices, self.groups)?;

        self.handlers.register_sdo(
            object_keys::STATUSWORD,
            handlers::statusword_handler(registry.clone()),
        )?;
        for device in registry.iter() {
            let cob = pdo::FEEDBACK_COB_BASE + device.id().raw() as u16;
            self.handlers
                .register_pdo(cob, handlers::position_pdo_handler(device.clone()))?;
        }

        let ctx = Arc::new(MasterContext {
            registry,
            handlers: self.handlers,
            trajectory: self.trajectory,
            config: self.config,
            sender: Mutex::new(sender),
            epoch: Instant::now(),
        });
        Ok(Master {
            ctx,
            cancel: CancellationToken::new(),
            first_init: AtomicBool::new(true),
            receiver: StdMutex::new(Some(receiver)),
            dispatcher: StdMutex::new(None),
            synchronizer: StdMutex::new(None),
        })
    }
}

impl std::fmt::Debug for MasterBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterBuilder")
            .field("devices", &self.devices)
            .field("groups", &self.groups)
            .finish_non_exhaustive()
    }
}

/// A CANopen master managing a set of motor drives
///
/// Created via [`MasterBuilder`]. Call [`initialize`](Master::initialize) to configure the drives
/// and, on the first call, start the dispatcher and synchronizer tasks; call
/// [`shutdown`](Master::shutdown) to stop them.
pub struct Master<S: AsyncCanSender, R: AsyncCanReceiver> {
    ctx: Arc<MasterContext<S>>,
    cancel: CancellationToken,
    first_init: AtomicBool,
    receiver: StdMutex<Option<R>>,
    dispatcher: StdMutex<Option<JoinHandle<()>>>,
    synchronizer: StdMutex<Option<JoinHandle<()>>>,
}

impl<S: AsyncCanSender, R: AsyncCanReceiver> std::fmt::Debug for Master<S, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Master").finish_non_exhaustive()
    }
}

impl<S, R> Master<S, R>
where
    S: AsyncCanSender + 'static,
    R: AsyncCanReceiver + 'static,
{
    /// A handle for issuing SDO requests
    pub fn sdo(&self) -> SdoClient<S> {
        SdoClient::new(self.ctx.clone())
    }

    /// Look up a managed device
    pub fn device(&self, node: NodeId) -> Option<Arc<Device>> {
        self.ctx.registry.get(node)
    }

    /// The device registry
    pub fn registry(&self) -> &DeviceRegistry {
        &self.ctx.registry
    }

    /// The timing config the master was built with
    pub fn config(&self) -> &MasterConfig {
        &self.ctx.config
    }

    /// Configure every drive and bring it to OperationEnabled
    ///
    /// Writes the interpolation period and index and disables SYNC supervision on every drive,
    /// with a settle delay after each write. On the first call only, this additionally starts the
    /// dispatcher task up front, configures the heartbeat producer, resets and starts each node
    /// via NMT, and starts the synchronizer task. Finally every drive is driven to
    /// OperationEnabled, bounded by the configured drive timeout.
    ///
    /// Safe to call again to re-configure drives after a power cycle.
    pub async fn initialize(&self) -> Result<(), MasterError> {
        let first = self.first_init.swap(false, Ordering::SeqCst);
        if first {
            let receiver = self.receiver.lock().unwrap().take();
            if let Some(receiver) = receiver {
                let handle =
                    tokio::spawn(dispatch::run(self.ctx.clone(), receiver, self.cancel.clone()));
                *self.dispatcher.lock().unwrap() = Some(handle);
            }
        }

        let settle = self.ctx.config.settle_delay();
        let sdo = self.sdo();
        // Also written as the drives' interpolation time period, which is a single byte
        let ip_period_ms = self.ctx.config.sync_period_ms.min(u8::MAX as u64) as u8;

        for device in self.ctx.registry.iter() {
            let node = device.id();
            log_write_err(sdo.write(node, object_keys::IP_TIME_UNITS, ip_period_ms).await);
            tokio::time::sleep(settle).await;
            log_write_err(
                sdo.write(
                    node,
                    object_keys::IP_TIME_INDEX,
                    values::IP_TIME_INDEX_MILLISECONDS,
                )
                .await,
            );
            tokio::time::sleep(settle).await;
            log_write_err(
                sdo.write(
                    node,
                    object_keys::SYNC_TIMEOUT_FACTOR,
                    values::SYNC_TIMEOUT_FACTOR_DISABLE,
                )
                .await,
            );
            tokio::time::sleep(settle).await;

            if first {
                log_write_err(
                    sdo.write(node, object_keys::HEARTBEAT, self.ctx.config.heartbeat_ms)
                        .await,
                );
                tokio::time::sleep(settle).await;
                log_write_err(self.reset_node(node.raw()).await);
                tokio::time::sleep(settle).await;
                log_write_err(self.send_nmt(NmtCommandSpecifier::Start, node.raw()).await);
                tokio::time::sleep(settle).await;
            }
        }

        if first {
            let handle = tokio::spawn(sync_loop::run(self.ctx.clone(), self.cancel.clone()));
            *self.synchronizer.lock().unwrap() = Some(handle);
            info!("Dispatcher and synchronizer tasks started");
        }

        for device in self.ctx.registry.iter() {
            let outcome = motor::drive_to_target(
                &self.ctx,
                device,
                MotorState::OperationEnabled,
                self.ctx.config.drive_bound(),
                &self.cancel,
            )
            .await;
            match outcome {
                DriveOutcome::Reached => info!("Node {} reached OperationEnabled", device.id()),
                DriveOutcome::TimedOut { last } => {
                    return DriveTimeoutSnafu {
                        node: device.id().raw(),
                        target: MotorState::OperationEnabled,
                        last,
                    }
                    .fail()
                }
                DriveOutcome::Cancelled => return ShuttingDownSnafu.fail(),
            }
        }
        Ok(())
    }

    /// Drive a device to a target profile state, bounded by the configured drive timeout
    pub async fn set_motor_state(
        &self,
        node: NodeId,
        target: MotorState,
    ) -> Result<DriveOutcome, MasterError> {
        self.drive_motor_state(node, target, self.ctx.config.drive_bound())
            .await
    }

    /// Drive a device to a target profile state with an explicit bound
    ///
    /// A bound of None drives forever. The walk itself never fails; the outcome says whether the
    /// target was reached before the bound elapsed.
    pub async fn drive_motor_state(
        &self,
        node: NodeId,
        target: MotorState,
        bound: Option<Duration>,
    ) -> Result<DriveOutcome, MasterError> {
        let device = self
            .ctx
            .registry
            .get(node)
            .context(UnknownNodeSnafu { node: node.raw() })?;
        Ok(motor::drive_to_target(&self.ctx, &device, target, bound, &self.cancel).await)
    }

    /// Send a raw NMT command, where node 0 addresses every node on the bus
    pub async fn send_nmt(
        &self,
        specifier: NmtCommandSpecifier,
        node: u8,
    ) -> Result<(), MasterError> {
        ensure!(node <= 127, UnknownNodeSnafu { node });
        self.ctx.send(nmt::command_frame(specifier, node)).await
    }

    /// Reset a node's application, where node 0 resets every node on the bus
    pub async fn reset_node(&self, node: u8) -> Result<(), MasterError> {
        self.send_nmt(NmtCommandSpecifier::ResetNode, node).await
    }

    /// Reset a node's communication parameters
    pub async fn reset_comms(&self, node: u8) -> Result<(), MasterError> {
        self.send_nmt(NmtCommandSpecifier::ResetComm, node).await
    }

    /// Command a node into an NMT state
    ///
    /// Bootup is not commandable; nodes enter it on their own after a reset.
    pub async fn set_nmt_state(&self, node: u8, target: NmtState) -> Result<(), MasterError> {
        let specifier = match target {
            NmtState::Operational => NmtCommandSpecifier::Start,
            NmtState::Stopped => NmtCommandSpecifier::Stop,
            NmtState::PreOperational => NmtCommandSpecifier::EnterPreOperational,
            NmtState::Bootup => return InvalidNmtTargetSnafu { state: target }.fail(),
        };
        self.send_nmt(specifier, node).await
    }

    /// Stop the background tasks and wait for them to exit
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let dispatcher = self.dispatcher.lock().unwrap().take();
        if let Some(handle) = dispatcher {
            let _ = handle.await;
        }
        let synchronizer = self.synchronizer.lock().unwrap().take();
        if let Some(handle) = synchronizer {
            let _ = handle.await;
        }
        info!("Master shut down");
    }
}

fn log_write_err(result: Result<(), MasterError>) {
    if let Err(e) = result {
        warn!("Initialization send failed: {e}");
    }
}
