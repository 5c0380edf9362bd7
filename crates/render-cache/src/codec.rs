//! Gzip helpers for stored page content.

use crate::error::CodecError;
use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

pub fn gzip(data: &[u8]) -> Result<Bytes, CodecError> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 4), Compression::default());
    encoder
        .write_all(data)
        .map_err(|source| CodecError { op: "encode", source })?;
    let packed = encoder
        .finish()
        .map_err(|source| CodecError { op: "encode", source })?;
    Ok(Bytes::from(packed))
}

pub fn gunzip(data: &[u8]) -> Result<Bytes, CodecError> {
    let mut out = Vec::with_capacity(data.len() * 4);
    GzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|source| CodecError { op: "decode", source })?;
    Ok(Bytes::from(out))
}
