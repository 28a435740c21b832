//! Opening images of every auto-detectable size and checking the
//! geometry and chdir behavior each format reports.
use pretty_assertions::assert_eq;

use cbmimage::cbm::block_address::BlockAddress;
use cbmimage::cbm::directory::{DirectoryEntry, DirectoryEntryKind};
use cbmimage::cbm::geometry::Format;
use cbmimage::cbm::image::Image;
use cbmimage::config::{Config, Configuration};

fn test_config() -> Config {
    Config::load(config::Config::builder().build().unwrap()).unwrap()
}

#[test]
fn opens_every_standard_size_with_the_expected_format_and_block_count() {
    let cases = [
        (174848usize, Format::D64, 683u32),
        (175531, Format::D64, 683), // with trailing error map
        (176640, Format::D40, 690),
        (349696, Format::D71, 1366),
        (533248, Format::D80, 2083),
        (1066496, Format::D82, 4166),
        (819200, Format::D81, 3200),
    ];

    for (size, expected_format, expected_max_lba) in cases {
        let data = vec![0u8; size];
        let image = Image::open(data, None, None, &test_config()).unwrap();
        assert_eq!(image.active().format, expected_format, "size {}", size);
        assert_eq!(image.active().geometry.max_lba, expected_max_lba, "size {}", size);
    }
}

#[test]
fn cbmdos_family_refuses_chdir() {
    let data = vec![0u8; 174848];
    let mut image = Image::open(data, None, None, &test_config()).unwrap();
    let fake_entry = DirectoryEntry {
        name: "NOPE".to_string(),
        suffix: String::new(),
        type_code: 2,
        kind: DirectoryEntryKind::Regular,
        start_block: BlockAddress::unused(),
        block_count: 0,
        locked: false,
        closed: true,
        datetime: None,
    };
    assert!(image.chdir(&fake_entry).is_err());
    assert_eq!(image.depth(), 1);
}

#[test]
fn unrecognized_size_is_rejected_by_default() {
    let data = vec![0u8; 99999];
    let err = Image::open(data, None, None, &test_config());
    assert!(err.is_err());
}
