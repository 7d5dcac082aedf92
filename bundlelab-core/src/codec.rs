//! Directory codec: [`Timestamp`] <-> ingestion directory name.
//!
//! Names look like `2017-08-21T15;30;00.000000`. The format is fixed-width
//! (four-digit year, six fractional digits), so plain string comparison of two
//! names orders them exactly like their timestamps. `;` stands in for `:` so
//! the name is valid on every common filesystem.

use chrono::NaiveDateTime;

use crate::error::BundleError;
use crate::timestamp::Timestamp;

const DIRNAME_FORMAT: &str = "%Y-%m-%dT%H;%M;%S%.6f";

/// Length in bytes of every encoded name.
pub const DIRNAME_LEN: usize = 26;

/// Encode a timestamp as an ingestion directory name.
pub fn encode(ts: Timestamp) -> String {
    ts.as_datetime()
        .naive_utc()
        .format(DIRNAME_FORMAT)
        .to_string()
}

/// Decode an ingestion directory name.
///
/// Only names that [`encode`] could have produced are accepted: the parsed
/// value is re-encoded and must reproduce the input byte for byte.
pub fn decode(name: &str) -> Result<Timestamp, BundleError> {
    let invalid = || BundleError::InvalidDirname(name.to_string());

    if name.len() != DIRNAME_LEN {
        return Err(invalid());
    }
    let naive = NaiveDateTime::parse_from_str(name, DIRNAME_FORMAT).map_err(|_| invalid())?;
    let ts = Timestamp::new(naive.and_utc()).map_err(|_| invalid())?;
    if encode(ts) != name {
        return Err(invalid());
    }
    Ok(ts)
}

/// Whether `name` is a valid ingestion directory name.
pub fn is_ingestion_dirname(name: &str) -> bool {
    decode(name).is_ok()
}
