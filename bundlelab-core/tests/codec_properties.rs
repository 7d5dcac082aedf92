//! Property tests for the directory codec.
//!
//! 1. Round trip: `decode(encode(t)) == t` over years 0000..=9999
//! 2. Order: `t1 < t2` implies `encode(t1) < encode(t2)`
//! 3. Bijection: any name `decode` accepts re-encodes to itself

use bundlelab_core::codec::{decode, encode, DIRNAME_LEN};
use bundlelab_core::Timestamp;
use proptest::prelude::*;

/// 0000-01-01T00:00:00Z in microseconds since the epoch.
const MIN_MICROS: i64 = -62_167_219_200_000_000;
/// 9999-12-31T23:59:59.999999Z in microseconds since the epoch.
const MAX_MICROS: i64 = 253_402_300_799_999_999;

fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
    (MIN_MICROS..=MAX_MICROS).prop_map(|us| Timestamp::from_unix_micros(us).unwrap())
}

proptest! {
    #[test]
    fn decode_inverts_encode(ts in arb_timestamp()) {
        let name = encode(ts);
        prop_assert_eq!(name.len(), DIRNAME_LEN);
        prop_assert_eq!(decode(&name).unwrap(), ts);
    }

    #[test]
    fn encoding_preserves_order(a in arb_timestamp(), b in arb_timestamp()) {
        prop_assert_eq!(a.cmp(&b), encode(a).cmp(&encode(b)));
    }

    #[test]
    fn accepted_names_reencode_exactly(name in "[0-9]{4}-[0-9]{2}-[0-9]{2}T[0-9]{2};[0-9]{2};[0-9]{2}\\.[0-9]{6}") {
        if let Ok(ts) = decode(&name) {
            prop_assert_eq!(encode(ts), name);
        }
    }

    #[test]
    fn arbitrary_strings_never_panic(name in ".{0,40}") {
        let _ = decode(&name);
    }
}

#[test]
fn range_boundaries_roundtrip() {
    for us in [MIN_MICROS, 0, MAX_MICROS] {
        let ts = Timestamp::from_unix_micros(us).unwrap();
        assert_eq!(decode(&encode(ts)).unwrap(), ts);
    }
    assert_eq!(
        encode(Timestamp::from_unix_micros(MAX_MICROS).unwrap()),
        "9999-12-31T23;59;59.999999"
    );
    assert!(Timestamp::from_unix_micros(MAX_MICROS + 1).is_err());
    assert!(Timestamp::from_unix_micros(MIN_MICROS - 1).is_err());
}
