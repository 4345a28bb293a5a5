use kvconnect_types::{pack, unpack, Key, KeyPart, Versionstamp};
use proptest::prelude::*;

fn key_part() -> impl Strategy<Value = KeyPart> {
    prop_oneof![
        // Bias towards zero bytes so escaping is exercised.
        prop::collection::vec(prop_oneof![Just(0u8), Just(0xFFu8), any::<u8>()], 0..8)
            .prop_map(KeyPart::Bytes),
        "[a\\x00\u{e9}]{0,6}".prop_map(KeyPart::String),
        any::<f64>().prop_map(KeyPart::Float),
        prop_oneof![any::<i128>(), -3i128..3].prop_map(KeyPart::Int),
        any::<bool>().prop_map(KeyPart::Bool),
    ]
}

fn key() -> impl Strategy<Value = Key> {
    prop::collection::vec(key_part(), 0..5).prop_map(Key::new)
}

// Property: unpacking a packed key yields the same key
proptest! {
    #[test]
    fn prop_pack_unpack_roundtrip(k in key()) {
        let packed = pack(&k);
        prop_assert_eq!(unpack(&packed).unwrap(), k);
    }
}

// Property: byte order of packed keys equals key order
proptest! {
    #[test]
    fn prop_packed_order_matches_key_order(a in key(), b in key()) {
        prop_assert_eq!(pack(&a).cmp(&pack(&b)), a.cmp(&b));
    }
}

// Property: a prefix always sorts before its extensions
proptest! {
    #[test]
    fn prop_prefix_sorts_first(prefix in key(), extra in key_part()) {
        let extended = prefix.clone().with(extra);
        prop_assert!(pack(&prefix) < pack(&extended));
    }
}

// Property: versionstamps round-trip through 24 lowercase hex characters
proptest! {
    #[test]
    fn prop_versionstamp_hex_roundtrip(bytes in any::<[u8; 12]>()) {
        let vs = Versionstamp::new(bytes);
        let hex = vs.to_hex();
        prop_assert_eq!(hex.len(), 24);
        prop_assert!(hex.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        prop_assert_eq!(Versionstamp::from_hex(&hex).unwrap(), vs);
    }
}
