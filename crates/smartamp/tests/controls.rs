//! Generated controls through the device: enumeration, validation, timing.

#![allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::arithmetic_side_effects)]

mod common;

use common::*;
use smartamp::kcontrol::{ApplyTiming, ControlKind};
use smartamp::{DeviceError, PowerState, PutOutcome, RangeError};

#[tokio::test]
async fn controls_are_enumerated_in_declaration_order() {
    let (device, _bus, _firmware) = loaded_device().await;
    let infos = device.controls().await.unwrap();

    let names: Vec<_> = infos.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, ["Ch0 Volume", "Ch1 Boost", "Ch0 EQ"]);
    assert_eq!(infos[0].kind, ControlKind::Integer { min: 0, max: 3, step: 1 });
    assert_eq!(infos[1].timing, ApplyTiming::PostPowerUp);
    assert_eq!(infos[2].kind, ControlKind::Enumerated);
    assert_eq!(infos[2].labels, ["flat", "bass"]);
}

#[tokio::test]
async fn anytime_control_round_trips_and_writes_immediately() {
    let (device, bus, _firmware) = loaded_device().await;

    assert_eq!(device.put_control(0, 3).await.unwrap(), PutOutcome::Applied);
    assert_eq!(device.get_control(0).await.unwrap(), 3);
    assert_eq!(bus.register(0, VOLUME_REG), 0x40);
}

#[tokio::test]
async fn invalid_value_is_rejected_without_side_effects() {
    let (device, bus, _firmware) = loaded_device().await;

    let err = device.put_control(0, 9).await.unwrap_err();
    assert!(matches!(err, DeviceError::Range(RangeError::ControlValue { value: 9, .. })));
    assert_eq!(device.get_control(0).await.unwrap(), 0);
    assert!(bus.ops().is_empty());

    assert_eq!(
        device.put_control(42, 0).await,
        Err(DeviceError::Range(RangeError::UnknownControl(42)))
    );
    assert!(matches!(
        device.put_control_by_name("Nope", 0).await,
        Err(DeviceError::Range(RangeError::UnknownControlName(_)))
    ));
}

#[tokio::test]
async fn timed_control_is_stored_until_its_transition() {
    let (device, bus, _firmware) = loaded_device().await;

    assert_eq!(device.put_control_by_name("Ch1 Boost", 2).await.unwrap(), PutOutcome::Deferred);
    assert_eq!(bus.writes_to(1, BOOST_REG), 0);

    device.request_power(0b10, PowerState::Active).await.unwrap();
    assert_eq!(bus.writes_to(1, BOOST_REG), 0, "replayed after power-up, not before");
    device.run_due_deferred().await;
    assert_eq!(bus.register(1, BOOST_REG), 0x03);

    // While the channel is active the write goes straight through.
    assert_eq!(device.put_control(1, 0).await.unwrap(), PutOutcome::Applied);
    assert_eq!(bus.register(1, BOOST_REG), 0x01);
}

#[tokio::test]
async fn pre_power_up_control_replays_on_every_power_up() {
    let (device, bus, _firmware) = loaded_device().await;

    device.put_control_by_name("Ch0 EQ", 1).await.unwrap();
    assert_eq!(bus.writes_to(0, EQ_REG), 0);

    device.request_power(0b01, PowerState::Active).await.unwrap();
    assert_eq!(bus.register(0, EQ_REG), 0x01);
    device.request_power(0b01, PowerState::Shutdown).await.unwrap();
    device.request_power(0b01, PowerState::Active).await.unwrap();
    assert_eq!(bus.writes_to(0, EQ_REG), 2);
}
