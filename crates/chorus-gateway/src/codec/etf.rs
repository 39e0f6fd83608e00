//! Erlang External Term Format
//!
//! Only the subset of terms the gateway produces is supported. Maps are encoded with binary
//! keys, `null` as the atom `nil`, and integers wider than 32 bits as `SMALL_BIG_EXT`.

use super::Codec;
use crate::error::{GatewayError, GatewayResult};
use crate::protocol::Envelope;
use bytes::{Buf, BufMut};
use chorus_common::Encoding;
use serde_json::{Map, Number, Value};

const FORMAT_VERSION: u8 = 131;

const NEW_FLOAT_EXT: u8 = 70;
const SMALL_INTEGER_EXT: u8 = 97;
const INTEGER_EXT: u8 = 98;
const ATOM_EXT: u8 = 100;
const SMALL_TUPLE_EXT: u8 = 104;
const LARGE_TUPLE_EXT: u8 = 105;
const NIL_EXT: u8 = 106;
const STRING_EXT: u8 = 107;
const LIST_EXT: u8 = 108;
const BINARY_EXT: u8 = 109;
const SMALL_BIG_EXT: u8 = 110;
const LARGE_BIG_EXT: u8 = 111;
const SMALL_ATOM_EXT: u8 = 115;
const MAP_EXT: u8 = 116;
const ATOM_UTF8_EXT: u8 = 118;
const SMALL_ATOM_UTF8_EXT: u8 = 119;

const MAX_DEPTH: usize = 256;

/// Compact binary encoding
#[derive(Debug, Clone, Copy, Default)]
pub struct EtfCodec;

impl Codec for EtfCodec {
    fn encoding(&self) -> Encoding {
        Encoding::Etf
    }

    fn is_text(&self) -> bool {
        false
    }

    fn encode(&self, envelope: &Envelope) -> GatewayResult<Vec<u8>> {
        let value = serde_json::to_value(envelope)?;
        let mut out = Vec::with_capacity(64);
        out.put_u8(FORMAT_VERSION);
        encode_term(&value, &mut out)?;
        Ok(out)
    }

    fn decode(&self, data: &[u8]) -> GatewayResult<Envelope> {
        let mut buf = data;
        let version = take_u8(&mut buf)?;
        if version != FORMAT_VERSION {
            return Err(invalid(format!("unsupported format version {version}")));
        }
        let value = decode_term(&mut buf, 0)?;
        if buf.has_remaining() {
            return Err(invalid(format!("{} trailing bytes", buf.remaining())));
        }
        Ok(serde_json::from_value(value)?)
    }
}

fn invalid(message: impl Into<String>) -> GatewayError {
    GatewayError::Serialization(format!("etf: {}", message.into()))
}

fn encode_term(value: &Value, out: &mut Vec<u8>) -> GatewayResult<()> {
    match value {
        Value::Null => encode_atom("nil", out),
        Value::Bool(true) => encode_atom("true", out),
        Value::Bool(false) => encode_atom("false", out),
        Value::Number(n) => encode_number(n, out)?,
        Value::String(s) => encode_binary(s.as_bytes(), out)?,
        Value::Array(items) => {
            if items.is_empty() {
                out.put_u8(NIL_EXT);
            } else {
                out.put_u8(LIST_EXT);
                out.put_u32(length(items.len())?);
                for item in items {
                    encode_term(item, out)?;
                }
                out.put_u8(NIL_EXT);
            }
        }
        Value::Object(map) => {
            out.put_u8(MAP_EXT);
            out.put_u32(length(map.len())?);
            for (key, item) in map {
                encode_binary(key.as_bytes(), out)?;
                encode_term(item, out)?;
            }
        }
    }
    Ok(())
}

fn length(len: usize) -> GatewayResult<u32> {
    u32::try_from(len).map_err(|_| invalid("term too large"))
}

fn encode_atom(name: &str, out: &mut Vec<u8>) {
    out.put_u8(SMALL_ATOM_UTF8_EXT);
    out.put_u8(name.len() as u8);
    out.put_slice(name.as_bytes());
}

fn encode_binary(bytes: &[u8], out: &mut Vec<u8>) -> GatewayResult<()> {
    out.put_u8(BINARY_EXT);
    out.put_u32(length(bytes.len())?);
    out.put_slice(bytes);
    Ok(())
}

fn encode_number(n: &Number, out: &mut Vec<u8>) -> GatewayResult<()> {
    if let Some(v) = n.as_u64() {
        if let Ok(small) = u8::try_from(v) {
            out.put_u8(SMALL_INTEGER_EXT);
            out.put_u8(small);
        } else if let Ok(int) = i32::try_from(v) {
            out.put_u8(INTEGER_EXT);
            out.put_i32(int);
        } else {
            encode_big(v, false, out);
        }
    } else if let Some(v) = n.as_i64() {
        if let Ok(int) = i32::try_from(v) {
            out.put_u8(INTEGER_EXT);
            out.put_i32(int);
        } else {
            encode_big(v.unsigned_abs(), true, out);
        }
    } else if let Some(v) = n.as_f64() {
        out.put_u8(NEW_FLOAT_EXT);
        out.put_f64(v);
    } else {
        return Err(invalid(format!("unrepresentable number {n}")));
    }
    Ok(())
}

fn encode_big(magnitude: u64, negative: bool, out: &mut Vec<u8>) {
    let digits = magnitude.to_le_bytes();
    let len = digits.iter().rposition(|&b| b != 0).map_or(1, |i| i + 1);
    out.put_u8(SMALL_BIG_EXT);
    out.put_u8(len as u8);
    out.put_u8(u8::from(negative));
    out.put_slice(&digits[..len]);
}

fn ensure(buf: &[u8], needed: usize) -> GatewayResult<()> {
    if buf.remaining() < needed {
        Err(invalid("unexpected end of input"))
    } else {
        Ok(())
    }
}

fn take_u8(buf: &mut &[u8]) -> GatewayResult<u8> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

fn take_u16(buf: &mut &[u8]) -> GatewayResult<u16> {
    ensure(buf, 2)?;
    Ok(buf.get_u16())
}

fn take_u32(buf: &mut &[u8]) -> GatewayResult<u32> {
    ensure(buf, 4)?;
    Ok(buf.get_u32())
}

fn take_bytes<'a>(buf: &mut &'a [u8], len: usize) -> GatewayResult<&'a [u8]> {
    ensure(buf, len)?;
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

fn take_string(buf: &mut &[u8], len: usize) -> GatewayResult<String> {
    let bytes = take_bytes(buf, len)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| invalid("binary is not valid UTF-8"))
}

fn decode_term(buf: &mut &[u8], depth: usize) -> GatewayResult<Value> {
    if depth > MAX_DEPTH {
        return Err(invalid("nesting too deep"));
    }

    let tag = take_u8(buf)?;
    match tag {
        SMALL_INTEGER_EXT => Ok(Value::from(take_u8(buf)?)),
        INTEGER_EXT => {
            ensure(buf, 4)?;
            Ok(Value::from(buf.get_i32()))
        }
        NEW_FLOAT_EXT => {
            ensure(buf, 8)?;
            let v = buf.get_f64();
            Number::from_f64(v)
                .map(Value::Number)
                .ok_or_else(|| invalid("non-finite float"))
        }
        SMALL_BIG_EXT => {
            let len = take_u8(buf)? as usize;
            decode_big(buf, len)
        }
        LARGE_BIG_EXT => {
            let len = take_u32(buf)? as usize;
            decode_big(buf, len)
        }
        ATOM_EXT | ATOM_UTF8_EXT => {
            let len = take_u16(buf)? as usize;
            Ok(atom(take_string(buf, len)?))
        }
        SMALL_ATOM_EXT | SMALL_ATOM_UTF8_EXT => {
            let len = take_u8(buf)? as usize;
            Ok(atom(take_string(buf, len)?))
        }
        BINARY_EXT => {
            let len = take_u32(buf)? as usize;
            Ok(Value::String(take_string(buf, len)?))
        }
        STRING_EXT => {
            let len = take_u16(buf)? as usize;
            Ok(Value::String(take_string(buf, len)?))
        }
        NIL_EXT => Ok(Value::Array(Vec::new())),
        LIST_EXT => {
            let len = take_u32(buf)? as usize;
            let items = decode_items(buf, len, depth)?;
            // Proper lists end in NIL_EXT; anything else is an improper tail
            let tail = decode_term(buf, depth + 1)?;
            if tail != Value::Array(Vec::new()) {
                return Err(invalid("improper list"));
            }
            Ok(Value::Array(items))
        }
        SMALL_TUPLE_EXT => {
            let len = take_u8(buf)? as usize;
            Ok(Value::Array(decode_items(buf, len, depth)?))
        }
        LARGE_TUPLE_EXT => {
            let len = take_u32(buf)? as usize;
            Ok(Value::Array(decode_items(buf, len, depth)?))
        }
        MAP_EXT => {
            let arity = take_u32(buf)? as usize;
            let mut map = Map::new();
            for _ in 0..arity {
                let key = match decode_term(buf, depth + 1)? {
                    Value::String(s) => s,
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    other => return Err(invalid(format!("unsupported map key {other}"))),
                };
                let value = decode_term(buf, depth + 1)?;
                map.insert(key, value);
            }
            Ok(Value::Object(map))
        }
        other => Err(invalid(format!("unsupported tag {other}"))),
    }
}

fn decode_items(buf: &mut &[u8], len: usize, depth: usize) -> GatewayResult<Vec<Value>> {
    // Every term is at least one byte, which bounds the allocation by the input size
    ensure(buf, len)?;
    let mut items = Vec::with_capacity(len);
    for _ in 0..len {
        items.push(decode_term(buf, depth + 1)?);
    }
    Ok(items)
}

fn decode_big(buf: &mut &[u8], len: usize) -> GatewayResult<Value> {
    let sign = take_u8(buf)?;
    let digits = take_bytes(buf, len)?;
    if digits[len.min(8)..].iter().any(|&b| b != 0) {
        return Err(invalid("integer wider than 64 bits"));
    }

    let mut le = [0_u8; 8];
    le[..len.min(8)].copy_from_slice(&digits[..len.min(8)]);
    let magnitude = u64::from_le_bytes(le);

    if sign == 0 {
        Ok(Value::from(magnitude))
    } else {
        0_i64
            .checked_sub_unsigned(magnitude)
            .map(Value::from)
            .ok_or_else(|| invalid("negative integer out of range"))
    }
}

fn atom(name: String) -> Value {
    match name.as_str() {
        "nil" | "null" => Value::Null,
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(name),
    }
}
