use std::sync::{Arc, Mutex};
use std::time::Duration;

use assertables::{assert_gt, assert_in_delta};
use canmotion_common::constants::object_keys;
use canmotion_common::nmt::NmtState;
use canmotion_common::ObjectKey;
use integration_tests::prelude::*;

fn node(id: u8) -> NodeId {
    NodeId::new(id).unwrap()
}

fn test_config() -> MasterConfig {
    MasterConfig {
        sync_period_ms: 10,
        settle_delay_ms: 1,
        heartbeat_ms: 1601,
        drive_timeout_ms: Some(3000),
    }
}

async fn setup(bus: &SimBus, builder: MasterBuilder) -> Master<SimBusSender, SimBusReceiver> {
    let _ = env_logger::builder().is_test(true).try_init();
    spawn_sim_drive(bus, node(6), statuswords::SWITCHED_ON_DISABLED);
    let (sender, receiver) = bus.endpoint();
    let master = builder.add_device(node(6)).attach(sender, receiver).unwrap();
    master.initialize().await.unwrap();
    master
}

#[tokio::test]
async fn test_feedback_updates_device() {
    let bus = SimBus::new();
    let master = setup(&bus, MasterBuilder::new(test_config())).await;
    let (mut sender, _rx) = bus.endpoint();
    let device = master.device(node(6)).unwrap();

    sender.send(feedback_frame(node(6), 57296)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(device.initialized());
    assert_in_delta!(device.motion().position, 1.0, 1e-4);
    // First sample seeds the commanded position
    assert_in_delta!(device.desired_pos(), 1.0, 1e-4);

    sender.send(feedback_frame(node(6), 114592)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let motion = device.motion();
    assert_in_delta!(motion.position, 2.0, 1e-4);
    assert_gt!(motion.velocity, 0.0);
    // Later samples must not re-seed the commanded position
    assert_in_delta!(device.desired_pos(), 1.0, 1e-4);
}

#[tokio::test]
async fn test_application_handlers() {
    let pdo_log = Arc::new(Mutex::new(Vec::new()));
    let sdo_log = Arc::new(Mutex::new(Vec::new()));

    let builder = {
        let pdo_log = pdo_log.clone();
        let sdo_log = sdo_log.clone();
        MasterBuilder::new(test_config())
            .pdo_handler(
                0x300,
                Box::new(move |msg, _stamp| {
                    pdo_log.lock().unwrap().push(msg.data().to_vec());
                }),
            )
            .unwrap()
            .sdo_handler(
                ObjectKey::new(0x6064, 0),
                Box::new(move |node, data| {
                    sdo_log.lock().unwrap().push((node.raw(), data.to_vec()));
                }),
            )
            .unwrap()
    };

    let bus = SimBus::new();
    let _master = setup(&bus, builder).await;
    let (mut sender, _rx) = bus.endpoint();

    sender
        .send(CanMessage::new(CanId::std(0x300), &[1, 2, 3]))
        .await
        .unwrap();
    // An SDO upload response from node 6 echoing object 0x6064
    let response = [0x43, 0x64, 0x60, 0x00, 0x10, 0x00, 0x00, 0x00];
    sender
        .send(CanMessage::new(CanId::std(0x586), &response))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(vec![vec![1, 2, 3]], *pdo_log.lock().unwrap());
    assert_eq!(vec![(6, response.to_vec())], *sdo_log.lock().unwrap());
}

#[tokio::test]
async fn test_reserved_handlers_rejected() {
    let bus = SimBus::new();

    // The feedback COB of a managed device belongs to the built-in position handler
    let (sender, receiver) = bus.endpoint();
    let err = MasterBuilder::new(test_config())
        .add_device(node(6))
        .pdo_handler(0x186, Box::new(|_, _| ()))
        .unwrap()
        .attach(sender, receiver)
        .unwrap_err();
    assert!(matches!(err, MasterError::DuplicatePdoHandler { cob: 0x186 }));

    // The statusword belongs to the built-in motor state handler
    let (sender, receiver) = bus.endpoint();
    let err = MasterBuilder::new(test_config())
        .add_device(node(6))
        .sdo_handler(object_keys::STATUSWORD, Box::new(|_, _| ()))
        .unwrap()
        .attach(sender, receiver)
        .unwrap_err();
    assert!(matches!(
        err,
        MasterError::DuplicateSdoHandler {
            index: 0x6041,
            sub: 0
        }
    ));
}

#[tokio::test]
async fn test_heartbeat_tracking() {
    let bus = SimBus::new();
    let master = setup(&bus, MasterBuilder::new(test_config())).await;
    let (mut sender, _rx) = bus.endpoint();
    let device = master.device(node(6)).unwrap();

    sender
        .send(CanMessage::new(CanId::std(0x706), &[0x7F]))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(Some(NmtState::PreOperational), device.nmt_state());

    // Toggle bit set
    sender
        .send(CanMessage::new(CanId::std(0x706), &[0x85]))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(Some(NmtState::Operational), device.nmt_state());
}

#[tokio::test]
async fn test_dispatcher_survives_junk() {
    let bus = SimBus::new();
    let master = setup(&bus, MasterBuilder::new(test_config())).await;
    let (mut sender, _rx) = bus.endpoint();
    let device = master.device(node(6)).unwrap();

    let junk = [
        CanMessage::new(CanId::extended(0x1234_5678), &[1, 2, 3]),
        CanMessage::new(CanId::std(0x086), &[0xFF; 8]),
        CanMessage::new(CanId::std(0x500), &[]),
        // SDO response too short to carry an object key
        CanMessage::new(CanId::std(0x586), &[0x80]),
        // Heartbeat with a nonsense state byte
        CanMessage::new(CanId::std(0x706), &[0x22]),
        // PDO band with no handler registered
        CanMessage::new(CanId::std(0x350), &[0; 8]),
    ];
    for msg in junk {
        sender.send(msg).await.unwrap();
    }
    // A valid frame afterwards is still dispatched
    sender
        .send(CanMessage::new(CanId::std(0x706), &[0x05]))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(Some(NmtState::Operational), device.nmt_state());
}
