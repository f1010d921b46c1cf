//! Blob parsing: section lookup, table decoding, revision selection and
//! robustness against malformed input.

#![allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::arithmetic_side_effects)]

mod common;

use common::{controls, fixture_blob, fixture_builder, interrupt_table};
use proptest::prelude::*;
use smartamp::blob::builder::{push_section, BlobBuilder, HeaderSpec, ProfileSpec};
use smartamp::blob::container::wrap_revisions;
use smartamp::blob::section::SectionTag;
use smartamp::blob::{find_section, AlgoParam, BlobParser, ChannelSelector};
use smartamp::config::MAX_SUPPORTED_VERSION;
use smartamp::{BlobError, ContainerError, ParseError};

#[test]
fn fixture_parses_into_typed_tables() {
    let blob = BlobParser::new().parse(&fixture_blob()).unwrap();

    assert_eq!(blob.channel_count(), 2);
    assert_eq!(blob.profile_names(), ["music", "left"]);
    assert_eq!(blob.controls.controls, controls());
    assert_eq!(blob.interrupts(0), Some(&interrupt_table()));
    assert_eq!(blob.interrupts(1), Some(&interrupt_table()));
    assert_eq!(blob.algo_params, [AlgoParam { id: 7, value: 0xBEEF }]);
}

#[test]
fn section_lookup_is_stable_and_per_channel() {
    let raw = fixture_blob();
    let first = find_section(&raw, SectionTag::Profiles, ChannelSelector::Channel(1)).unwrap();
    let again = find_section(&raw, SectionTag::Profiles, ChannelSelector::Channel(1)).unwrap();
    assert_eq!(first, again);
    assert_eq!(first.channel, Some(1));

    let ch0 = find_section(&raw, SectionTag::Profiles, ChannelSelector::Channel(0)).unwrap();
    assert!(ch0.offset < first.offset);
    // Both channels carry the same profile table.
    assert_eq!(ch0.payload, first.payload);

    let any = find_section(&raw, SectionTag::Profiles, ChannelSelector::Any).unwrap();
    assert_eq!(any, ch0);
}

#[test]
fn section_lookup_rejects_absent_tags_and_channels() {
    let raw = BlobBuilder::new(1).build();
    assert!(find_section(&raw, SectionTag::Interrupts, ChannelSelector::Any).is_none());
    assert!(find_section(&raw, SectionTag::Init, ChannelSelector::Channel(1)).is_none());
    assert!(find_section(&[], SectionTag::Header, ChannelSelector::Any).is_none());
}

#[test]
fn parse_is_idempotent() {
    let raw = fixture_blob();
    let a = BlobParser::new().parse(&raw).unwrap();
    let b = BlobParser::new().parse(&raw).unwrap();
    assert_eq!(a, b);
}

#[test]
fn newer_version_is_rejected() {
    let header = HeaderSpec {
        version: MAX_SUPPORTED_VERSION + 1,
        ..HeaderSpec::new(1)
    };
    let raw = BlobBuilder::new(1).header(header).build();
    let mut parser = BlobParser::new();
    assert_eq!(
        parser.parse(&raw),
        Err(ParseError::UnsupportedVersion {
            found: MAX_SUPPORTED_VERSION + 1,
            supported: MAX_SUPPORTED_VERSION,
        })
    );
    assert_eq!(parser.sections_parsed(), 0);
}

#[test]
fn reserved_header_tail_is_ignored() {
    let header = HeaderSpec {
        reserved: 32,
        ..HeaderSpec::new(2)
    };
    let blob = BlobParser::new()
        .parse(&BlobBuilder::new(2).header(header).build())
        .unwrap();
    assert_eq!(blob.channel_count(), 2);
}

#[test]
fn missing_mandatory_section_is_reported() {
    let mut raw = Vec::new();
    push_section(&mut raw, SectionTag::Header.as_bytes(), &HeaderSpec::new(1).encode());
    push_section(&mut raw, SectionTag::Init.as_bytes(), &[0, 0, 0, 0]);
    let err = BlobParser::new().parse(&raw).unwrap_err();
    assert!(matches!(err, ParseError::MissingSection { channel: 0, .. }), "{err:?}");
}

#[test]
fn payload_without_header_is_rejected() {
    let mut raw = Vec::new();
    push_section(&mut raw, SectionTag::Init.as_bytes(), &[0, 0, 0, 0]);
    assert_eq!(BlobParser::new().parse(&raw), Err(ParseError::MissingHeader));
}

#[test]
fn unknown_tag_is_rejected() {
    let raw = fixture_builder().raw_section(*b"XXXXX", vec![1, 2, 3]).build();
    let err = BlobParser::new().parse(&raw).unwrap_err();
    assert!(matches!(err, ParseError::UnknownTag(tag, _) if &tag == b"XXXXX"), "{err:?}");
}

#[test]
fn revision_selection_picks_the_matching_payload() {
    let one = BlobBuilder::new(1)
        .profile(ProfileSpec::empty("rev1", 0))
        .build();
    let two = fixture_blob();
    let image = wrap_revisions(&[(1, one), (2, two)]);

    let mut parser = BlobParser::new();
    let blob = parser.parse_image(&image, 2).unwrap();
    assert_eq!(blob.channel_count(), 2);
    let blob = parser.parse_image(&image, 1).unwrap();
    assert_eq!(blob.profile_names(), ["rev1"]);

    assert_eq!(
        parser.parse_image(&image, 9),
        Err(BlobError::Container(ContainerError::RevisionNotFound(9)))
    );
}

#[test]
fn container_errors_are_retryable_parse_errors_are_not() {
    let mut parser = BlobParser::new();
    let container = parser.parse_image(&[], 0).unwrap_err();
    assert!(container.is_retryable());

    let bad = BlobBuilder::new(1)
        .header(HeaderSpec {
            version: MAX_SUPPORTED_VERSION + 1,
            ..HeaderSpec::new(1)
        })
        .build();
    let parse = parser.parse_image(&bad, 0).unwrap_err();
    assert!(!parse.is_retryable());
}

proptest! {
    #[test]
    fn truncated_blobs_never_panic(cut in 0usize..2048) {
        let raw = fixture_blob();
        let cut = cut.min(raw.len());
        if let Ok(blob) = BlobParser::new().parse(&raw[..cut]) {
            // A cut on a section boundary after the last channel still parses.
            prop_assert_eq!(blob.channel_count(), 2);
        }
        let _ = find_section(&raw[..cut], SectionTag::BlockOps, ChannelSelector::Channel(1));
    }

    #[test]
    fn corrupted_bytes_never_panic(index in 0usize..4096, value in any::<u8>()) {
        let mut raw = fixture_blob();
        let index = index % raw.len();
        raw[index] = value;
        let _ = BlobParser::new().parse(&raw);
    }
}
