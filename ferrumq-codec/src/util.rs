//! Bounds-checked read helpers over frame payloads
//!
//! Frames arrive length-prefixed, so every decode walks a `Bytes` holding
//! exactly one payload. `bytes::Buf` panics on underflow; these helpers turn
//! underflow into a syntax error instead.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::Error;

pub(crate) fn ensure(src: &Bytes, n: usize, what: &str) -> Result<(), Error> {
    if src.remaining() < n {
        return Err(Error::syntax(format!(
            "truncated {what}: need {n} bytes, have {}",
            src.remaining()
        )));
    }
    Ok(())
}

pub(crate) fn get_u8(src: &mut Bytes, what: &str) -> Result<u8, Error> {
    ensure(src, 1, what)?;
    Ok(src.get_u8())
}

pub(crate) fn get_i8(src: &mut Bytes, what: &str) -> Result<i8, Error> {
    ensure(src, 1, what)?;
    Ok(src.get_i8())
}

pub(crate) fn get_u16(src: &mut Bytes, what: &str) -> Result<u16, Error> {
    ensure(src, 2, what)?;
    Ok(src.get_u16())
}

pub(crate) fn get_i16(src: &mut Bytes, what: &str) -> Result<i16, Error> {
    ensure(src, 2, what)?;
    Ok(src.get_i16())
}

pub(crate) fn get_u32(src: &mut Bytes, what: &str) -> Result<u32, Error> {
    ensure(src, 4, what)?;
    Ok(src.get_u32())
}

pub(crate) fn get_i32(src: &mut Bytes, what: &str) -> Result<i32, Error> {
    ensure(src, 4, what)?;
    Ok(src.get_i32())
}

pub(crate) fn get_u64(src: &mut Bytes, what: &str) -> Result<u64, Error> {
    ensure(src, 8, what)?;
    Ok(src.get_u64())
}

pub(crate) fn get_i64(src: &mut Bytes, what: &str) -> Result<i64, Error> {
    ensure(src, 8, what)?;
    Ok(src.get_i64())
}

pub(crate) fn get_f32(src: &mut Bytes, what: &str) -> Result<f32, Error> {
    ensure(src, 4, what)?;
    Ok(src.get_f32())
}

pub(crate) fn get_f64(src: &mut Bytes, what: &str) -> Result<f64, Error> {
    ensure(src, 8, what)?;
    Ok(src.get_f64())
}

pub(crate) fn get_bytes(src: &mut Bytes, n: usize, what: &str) -> Result<Bytes, Error> {
    ensure(src, n, what)?;
    Ok(src.split_to(n))
}

/// Short string: u8 length + UTF-8 bytes, at most 255 bytes
pub(crate) fn get_short_str(src: &mut Bytes, what: &str) -> Result<String, Error> {
    let len = get_u8(src, what)? as usize;
    let raw = get_bytes(src, len, what)?;
    String::from_utf8(raw.to_vec())
        .map_err(|_| Error::syntax(format!("{what} is not valid utf-8")))
}

/// Long string: u32 length + UTF-8 bytes
pub(crate) fn get_long_str(src: &mut Bytes, what: &str) -> Result<String, Error> {
    let len = get_u32(src, what)? as usize;
    let raw = get_bytes(src, len, what)?;
    String::from_utf8(raw.to_vec())
        .map_err(|_| Error::syntax(format!("{what} is not valid utf-8")))
}

/// Long string taken as raw bytes (SASL responses need not be UTF-8)
pub(crate) fn get_long_bytes(src: &mut Bytes, what: &str) -> Result<Bytes, Error> {
    let len = get_u32(src, what)? as usize;
    get_bytes(src, len, what)
}

pub(crate) fn put_short_str(dst: &mut BytesMut, s: &str) {
    debug_assert!(s.len() <= u8::MAX as usize, "short string over 255 bytes");
    dst.put_u8(s.len() as u8);
    dst.put_slice(s.as_bytes());
}

pub(crate) fn put_long_str(dst: &mut BytesMut, s: &str) {
    dst.put_u32(s.len() as u32);
    dst.put_slice(s.as_bytes());
}

pub(crate) fn put_long_bytes(dst: &mut BytesMut, b: &[u8]) {
    dst.put_u32(b.len() as u32);
    dst.put_slice(b);
}
