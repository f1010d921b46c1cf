//! xtask inspect — decode a tuning image on the host.
//!
//! Walks the section framing first so a broken image still shows everything
//! up to the fault, then runs the full parser and prints the typed tables.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use serde_json::{json, Value};
use smartamp::blob::container::{is_container, revisions, select_revision};
use smartamp::blob::{walk_sections, BlobParser, ParsedBlob};
use smartamp::kcontrol::ControlKind;

pub fn run(path: &Path, revision: u32, as_json: bool) -> Result<()> {
    let image = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    tracing::debug!(bytes = image.len(), "read image");

    if !as_json && is_container(&image) {
        print_revisions(&image)?;
    }

    let payload = select_revision(&image, revision).context("selecting revision")?;
    if !as_json {
        print_sections(&payload);
    }

    let mut parser = BlobParser::new();
    let blob = match parser.parse(&payload) {
        Ok(blob) => blob,
        Err(e) => {
            eprintln!(
                "{}",
                format!("✗ Parse failed after {} sections: {e}", parser.sections_parsed())
                    .red()
                    .bold()
            );
            anyhow::bail!("invalid tuning image");
        }
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&summary(&blob))?);
    } else {
        print_blob(&blob);
    }
    Ok(())
}

fn print_revisions(image: &[u8]) -> Result<()> {
    println!("{}", "Revisions".cyan().bold());
    for record in revisions(image)? {
        println!("  rev {:>4}  {:>8} bytes", record.revision_id, record.payload_size);
    }
    println!();
    Ok(())
}

fn print_sections(payload: &[u8]) {
    println!("{}", "Sections".cyan().bold());
    for section in walk_sections(payload) {
        match section {
            Ok(s) => {
                let channel = s.channel.map_or_else(|| "-".to_string(), |c| c.to_string());
                println!(
                    "  {:#08x}  {}  ch {:>2}  {:>6} bytes",
                    s.offset,
                    s.tag,
                    channel,
                    s.payload.len()
                );
            }
            Err(e) => println!("  {}", format!("⚠ framing stops: {e}").yellow()),
        }
    }
    println!();
}

fn print_blob(blob: &ParsedBlob) {
    let header = &blob.header;
    println!("{}", "Header".cyan().bold());
    println!("  name        {}", header.name);
    println!("  version     {}", header.version);
    println!("  timestamp   {}", header.timestamp);
    println!("  iv width    {} bits, vbat {}", header.iv_width, header.vbat_enabled);
    println!("  interrupts  {}", header.interrupts_supported());
    for (ch, info) in header.channels.iter().enumerate() {
        println!(
            "  ch {ch}        device {:#06x} @ {:#04x}",
            info.device_id, info.bus_address
        );
    }
    println!();

    println!("{}", "Profiles".cyan().bold());
    if let Some(tables) = blob.channel(0) {
        for (i, p) in tables.profiles.profiles.iter().enumerate() {
            println!(
                "  {i:>2}  {:<24} caps {:#010x}  mask {:#04x}",
                p.name,
                p.capabilities,
                p.channel_mask(blob.channel_count())
            );
        }
    }
    println!();

    println!("{}", "Controls".cyan().bold());
    for info in blob.controls.infos() {
        let range = match info.kind {
            ControlKind::Integer { min, max, step } => format!("{min}..={max} step {step}"),
            ControlKind::Enumerated => info.labels.join(" | "),
        };
        println!(
            "  {:>2}  {:<24} ch {}  {:<12} {}",
            info.id,
            info.name,
            info.channel,
            format!("{:?}", info.timing),
            range
        );
    }
    println!();

    for (ch, tables) in blob.channels.iter().enumerate() {
        let irqs = tables.interrupts.as_ref().map_or(0, |t| t.descriptors.len());
        let slots = tables.hw_params.as_ref().map_or(0, |h| h.slot_configs.len());
        println!(
            "  ch {ch}: init {} ops, {irqs} interrupt sources, {slots} IV/VBat slot configs",
            tables.init.len()
        );
    }
    if !blob.algo_params.is_empty() {
        println!();
        println!("{}", "Algorithm parameters".cyan().bold());
        for p in &blob.algo_params {
            println!("  {:>6}  {:#010x}", p.id, p.value);
        }
    }
}

fn summary(blob: &ParsedBlob) -> Value {
    let header = &blob.header;
    json!({
        "name": header.name,
        "version": header.version,
        "channels": header.channels.iter().map(|c| json!({
            "device_id": c.device_id,
            "bus_address": c.bus_address,
        })).collect::<Vec<_>>(),
        "iv_width": header.iv_width,
        "vbat": header.vbat_enabled,
        "interrupts": header.interrupts_supported(),
        "profiles": blob.profile_names(),
        "controls": blob.controls.infos().iter().map(|i| json!({
            "name": i.name,
            "channel": i.channel,
            "timing": format!("{:?}", i.timing),
            "labels": i.labels,
        })).collect::<Vec<_>>(),
        "algo_params": blob.algo_params.iter().map(|p| json!([p.id, p.value])).collect::<Vec<_>>(),
    })
}
