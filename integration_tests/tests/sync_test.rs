use std::time::Duration;

use integration_tests::prelude::*;
use tokio::time::timeout;

fn node(id: u8) -> NodeId {
    NodeId::new(id).unwrap()
}

fn test_config() -> MasterConfig {
    MasterConfig {
        sync_period_ms: 20,
        settle_delay_ms: 1,
        heartbeat_ms: 1601,
        drive_timeout_ms: Some(3000),
    }
}

fn drain(receiver: &mut SimBusReceiver) -> Vec<CanMessage> {
    let mut frames = Vec::new();
    while let Some(msg) = receiver.try_recv() {
        frames.push(msg);
    }
    frames
}

async fn setup(bus: &SimBus) -> Master<SimBusSender, SimBusReceiver> {
    let _ = env_logger::builder().is_test(true).try_init();
    spawn_sim_drive(bus, node(2), statuswords::SWITCHED_ON_DISABLED);
    spawn_sim_drive(bus, node(5), statuswords::SWITCHED_ON_DISABLED);
    let (sender, receiver) = bus.endpoint();
    let master = MasterBuilder::new(test_config())
        .add_device(node(2))
        .add_device(node(5))
        .attach(sender, receiver)
        .unwrap();
    master.initialize().await.unwrap();
    master
}

#[tokio::test]
async fn test_no_setpoints_before_feedback() {
    let bus = SimBus::new();
    let _master = setup(&bus).await;
    let mut monitor = bus.monitor();

    // Neither device has published a position yet, so cycles carry only the SYNC
    let frames = timeout(Duration::from_secs(2), collect_until_syncs(&mut monitor, 3))
        .await
        .unwrap();
    assert!(frames
        .iter()
        .all(|m| m.id() != CanId::Std(0x202) && m.id() != CanId::Std(0x205)));
}

#[tokio::test]
async fn test_setpoints_precede_sync() {
    let bus = SimBus::new();
    let master = setup(&bus).await;
    let mut monitor = bus.monitor();
    let (mut sender, _receiver) = bus.endpoint();

    // Publish positions: 1.0 rad for node 2, -1.0 rad for node 5
    sender.send(feedback_frame(node(2), 57296)).await.unwrap();
    sender.send(feedback_frame(node(5), -57296)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(master.device(node(2)).unwrap().initialized());
    assert!(master.device(node(5)).unwrap().initialized());
    drain(&mut monitor);

    let frames = timeout(Duration::from_secs(2), collect_until_syncs(&mut monitor, 2))
        .await
        .unwrap();
    // The segment between two SYNCs is one complete cycle: a setpoint per device in node ID
    // order, then the SYNC that latches them
    let first_sync = frames
        .iter()
        .position(|m| m.id() == CanId::Std(0x080))
        .unwrap();
    let cycle: Vec<CanId> = frames[first_sync + 1..].iter().map(|m| m.id()).collect();
    assert_eq!(
        vec![CanId::Std(0x202), CanId::Std(0x205), CanId::Std(0x080)],
        cycle
    );

    // Hold-position trajectory commands the drive to stay where it reported
    let setpoint = &frames[first_sync + 1];
    let data = setpoint.data();
    assert_eq!([0x1F, 0x00], data[0..2]);
    assert_eq!(57296i32.to_le_bytes(), data[4..8]);
    assert!((master.device(node(2)).unwrap().desired_pos() - 1.0).abs() < 1e-4);
}
