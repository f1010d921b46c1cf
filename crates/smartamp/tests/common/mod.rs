//! Shared fixtures: a two-channel blob with interrupts, controls and two
//! profiles, plus a device wired to mocks.

#![allow(dead_code, clippy::unwrap_used, clippy::indexing_slicing, clippy::arithmetic_side_effects)]

use platform::mocks::{MockBus, MockFirmware};
use platform::RegAddr;
use smartamp::blob::builder::{write_block, BlobBuilder, ProfileSpec};
use smartamp::cmdblock::CommandBlock;
use smartamp::config::DriverConfig;
use smartamp::interrupt::{
    InterruptDescriptor, InterruptTable, ACTION_FORCE_POWER_ON, ACTION_HW_RESET, ACTION_SW_RESET,
};
use smartamp::kcontrol::{ApplyTiming, ElementKind, EnumControl, IntegerControl, KControl, WriteMode};
use smartamp::Device;

pub const STATUS_REG: RegAddr = RegAddr::new(0, 0, 0x10);
pub const IRQ_MASK_REG: RegAddr = RegAddr::new(0, 0, 0x11);
pub const VOLUME_REG: RegAddr = RegAddr::new(0, 1, 0x20);
pub const BOOST_REG: RegAddr = RegAddr::new(0, 1, 0x21);
pub const EQ_REG: RegAddr = RegAddr::new(0, 1, 0x22);

pub const IRQ_CLOCK: u32 = 0x01;
pub const IRQ_OVERCURRENT: u32 = 0x02;
pub const IRQ_BROWNOUT: u32 = 0x04;
pub const IRQ_PLL_LOST: u32 = 0x08;
pub const IRQ_POWERED_OFF: u32 = 0x10;

/// Unmask writes `0xFF`, mask writes `0x00`, clear zeroes the status.
pub fn interrupt_table() -> InterruptTable {
    let source = |name: &str, mask: u32, actions: u32, clock_based: bool| InterruptDescriptor {
        name: name.into(),
        reg: STATUS_REG,
        mask,
        actions,
        clock_based,
    };
    InterruptTable {
        descriptors: vec![
            source("clock_halt", IRQ_CLOCK, 0, true),
            source("overcurrent", IRQ_OVERCURRENT, 0, false),
            source("brownout", IRQ_BROWNOUT, ACTION_SW_RESET, false),
            source("pll_lost", IRQ_PLL_LOST, ACTION_HW_RESET, false),
            source("powered_off", IRQ_POWERED_OFF, ACTION_FORCE_POWER_ON, false),
        ],
        enable: write_block(IRQ_MASK_REG, 0xFF),
        disable: write_block(IRQ_MASK_REG, 0x00),
        clear: write_block(STATUS_REG, 0x00),
        processing_delay_ms: 0,
        dump_registers: vec![STATUS_REG, IRQ_MASK_REG],
    }
}

/// `"Ch0 Volume"` (any time), `"Ch1 Boost"` (post-power-up, masked) and
/// `"Ch0 EQ"` (pre-power-up, enumerated).
pub fn controls() -> Vec<KControl> {
    vec![
        KControl::Integer(IntegerControl {
            name: "Ch0 Volume".into(),
            channel: 0,
            timing: ApplyTiming::Anytime,
            reg: VOLUME_REG,
            mode: WriteMode::Single,
            mask: 0,
            min: 0,
            max: 3,
            step: 1,
            default: 0,
            element: ElementKind::Bytes,
            values: vec![0x10, 0x20, 0x30, 0x40],
        }),
        KControl::Integer(IntegerControl {
            name: "Ch1 Boost".into(),
            channel: 1,
            timing: ApplyTiming::PostPowerUp,
            reg: BOOST_REG,
            mode: WriteMode::Masked,
            mask: 0x0F,
            min: 0,
            max: 2,
            step: 1,
            default: 0,
            element: ElementKind::Bytes,
            values: vec![0x01, 0x02, 0x03],
        }),
        KControl::Enumerated(EnumControl {
            name: "Ch0 EQ".into(),
            channel: 0,
            timing: ApplyTiming::PrePowerUp,
            default: 0,
            items: vec![
                ("flat".into(), write_block(EQ_REG, 0x00)),
                ("bass".into(), write_block(EQ_REG, 0x01)),
            ],
        }),
    ]
}

/// Two channels, profiles `"music"` (all channels) and `"left"` (channel 0).
pub fn fixture_builder() -> BlobBuilder {
    let mut builder = BlobBuilder::new(2)
        .profile(ProfileSpec::marked("music", 0, 0x10))
        .profile(ProfileSpec::marked("left", 0x01, 0x20))
        .interrupts(0, interrupt_table())
        .interrupts(1, interrupt_table())
        .algo_param(7, 0xBEEF);
    for control in controls() {
        builder = builder.control(control);
    }
    builder
}

pub fn fixture_blob() -> Vec<u8> {
    fixture_builder().build()
}

/// No waiting in tests: zero delays, one retry.
pub fn fast_config() -> DriverConfig {
    DriverConfig {
        load_tries: 2,
        load_retry_delay_ms: 1,
        post_power_up_delay_ms: 0,
        irq_debounce_delay_ms: 0,
        ..DriverConfig::default()
    }
}

pub type TestDevice = Device<MockBus, MockFirmware>;

/// Device over fresh mocks; the returned handles share state with it.
pub fn device_with(image: Option<Vec<u8>>, config: DriverConfig) -> (TestDevice, MockBus, MockFirmware) {
    let bus = MockBus::new();
    let firmware = image.map_or_else(MockFirmware::new, MockFirmware::with_image);
    let device = Device::new(bus.clone(), firmware.clone(), config).unwrap();
    (device, bus, firmware)
}

/// Loaded fixture device.
pub async fn loaded_device() -> (TestDevice, MockBus, MockFirmware) {
    let (device, bus, firmware) = device_with(Some(fixture_blob()), fast_config());
    device.probe().await.unwrap();
    bus.clear_log();
    (device, bus, firmware)
}

pub fn empty_block() -> CommandBlock {
    CommandBlock::default()
}
