//! xtask sample-blob — write a small two-channel tuning image.
//!
//! The image exercises every section the parser knows: per-channel init,
//! sample-rate and IV/VBat slot tables, interrupts, two profiles, three
//! controls and one algorithm parameter. Useful as a starting point for
//! `xtask inspect` and for bring-up on a mock bus.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use platform::RegAddr;
use smartamp::blob::builder::{write_block, BlobBuilder, ProfileSpec};
use smartamp::blob::container::wrap_revisions;
use smartamp::blob::BlobParser;
use smartamp::hw_params::{slot_config_key, DaiMode, HardwareParamSet, IvSlotConfig, ParamTable};
use smartamp::interrupt::{InterruptDescriptor, InterruptTable, ACTION_HW_RESET, ACTION_SW_RESET};
use smartamp::kcontrol::{ApplyTiming, ElementKind, EnumControl, IntegerControl, KControl, WriteMode};
use smartamp::profile::CAP_REARM_IV_SENSE;

const STATUS_REG: RegAddr = RegAddr::new(0, 0, 0x10);
const IRQ_MASK_REG: RegAddr = RegAddr::new(0, 0, 0x11);
const RATE_REG: RegAddr = RegAddr::new(0, 2, 0x08);
const SLOT_REG: RegAddr = RegAddr::new(0, 2, 0x0C);
const GAIN_REG: RegAddr = RegAddr::new(0, 1, 0x20);
const LIMITER_REG: RegAddr = RegAddr::new(0, 1, 0x24);

pub fn run(out: &Path, revision: Option<u32>) -> Result<()> {
    let payload = build();

    // Never write something the driver would refuse.
    let blob = BlobParser::new()
        .parse(&payload)
        .context("sample payload does not parse")?;

    let image = match revision {
        Some(id) => wrap_revisions(&[(id, payload)]),
        None => payload,
    };
    std::fs::write(out, &image).with_context(|| format!("writing {}", out.display()))?;

    println!(
        "{}",
        format!(
            "✓ Wrote {} bytes ({} channels, {} profiles, {} controls) to {}",
            image.len(),
            blob.channel_count(),
            blob.profile_names().len(),
            blob.controls.controls.len(),
            out.display()
        )
        .green()
    );
    Ok(())
}

pub(crate) fn build() -> Vec<u8> {
    let mut builder = BlobBuilder::new(2)
        .profile(ProfileSpec::marked("music", 0, 0x10))
        .profile(ProfileSpec::marked("voice", CAP_REARM_IV_SENSE, 0x20));
    for ch in 0..2 {
        builder = builder.hw_params(ch, hw_params()).interrupts(ch, interrupts());
    }
    for control in controls() {
        builder = builder.control(control);
    }
    builder.algo_param(1, 0x0001_0000).build()
}

fn hw_params() -> HardwareParamSet {
    let mut tables: [ParamTable; 8] = Default::default();
    tables[0] = ParamTable {
        default_index: 0,
        entries: vec![
            (48_000, write_block(RATE_REG, 0x01)),
            (96_000, write_block(RATE_REG, 0x02)),
        ],
    };
    let slot_configs = [(16, 0x10), (12, 0x0C)]
        .into_iter()
        .filter_map(|(iv, value)| {
            Some(IvSlotConfig {
                key: slot_config_key(32, DaiMode::Tdm, 2, iv, true)?,
                block: write_block(SLOT_REG, value),
            })
        })
        .collect();
    HardwareParamSet::new(tables, slot_configs)
}

fn interrupts() -> InterruptTable {
    let source = |name: &str, mask: u32, actions: u32, clock_based: bool| InterruptDescriptor {
        name: name.into(),
        reg: STATUS_REG,
        mask,
        actions,
        clock_based,
    };
    InterruptTable {
        descriptors: vec![
            source("clock_halt", 0x01, 0, true),
            source("overtemp", 0x02, 0, false),
            source("brownout", 0x04, ACTION_SW_RESET, false),
            source("pll_unlock", 0x08, ACTION_HW_RESET, false),
        ],
        enable: write_block(IRQ_MASK_REG, 0xFF),
        disable: write_block(IRQ_MASK_REG, 0x00),
        clear: write_block(STATUS_REG, 0x00),
        processing_delay_ms: 2,
        dump_registers: vec![STATUS_REG, IRQ_MASK_REG],
    }
}

fn controls() -> Vec<KControl> {
    let gain = |ch: u8| {
        KControl::Integer(IntegerControl {
            name: format!("Ch{ch} Gain"),
            channel: ch,
            timing: ApplyTiming::Anytime,
            reg: GAIN_REG,
            mode: WriteMode::Single,
            mask: 0,
            min: 0,
            max: 3,
            step: 1,
            default: 2,
            element: ElementKind::Bytes,
            values: vec![0x00, 0x20, 0x40, 0x60],
        })
    };
    vec![
        gain(0),
        gain(1),
        KControl::Enumerated(EnumControl {
            name: "Ch0 Limiter".into(),
            channel: 0,
            timing: ApplyTiming::PostPowerUp,
            default: 0,
            items: vec![
                ("off".into(), write_block(LIMITER_REG, 0x00)),
                ("on".into(), write_block(LIMITER_REG, 0x01)),
            ],
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use smartamp::hw_params::{HwField, Variant};

    #[test]
    fn sample_round_trips_through_the_parser() {
        let blob = BlobParser::new().parse(&build()).unwrap();
        assert_eq!(blob.channel_count(), 2);
        assert_eq!(blob.profile_names(), ["music", "voice"]);
        assert_eq!(blob.controls.find("Ch0 Limiter"), Some(2));
        let hw = blob.channel(1).unwrap().hw_params.as_ref().unwrap();
        assert!(hw.select(HwField::SampleRate, Variant::Value(96_000)).is_ok());
    }

    #[test]
    fn run_writes_a_wrapped_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("amp.bin");
        run(&path, Some(3)).unwrap();

        let image = std::fs::read(&path).unwrap();
        let blob = BlobParser::new().parse_image(&image, 3).unwrap();
        assert_eq!(blob.algo_params.len(), 1);
    }
}
