//! Bit-level wire primitives
//!
//! The replication protocol and the disk format share one encoding layer:
//! a bit-granular writer/reader pair, LEB128 variable-length integers with
//! ZigZag for signed values, and the cell payload codec.
//!
//! The reader carries a sticky error flag instead of returning `Result`
//! from every primitive: a corrupt stream flips the flag, every subsequent
//! read returns a zero value, and the caller checks the flag once at the
//! end. That keeps decode loops flat and makes truncated input safe.

use crate::id::NodeId;
use crate::name::Name;
use crate::types::{
    ClassPath, Color, DateTime, Int64Vec2, Int64Vec3, IntVec2, IntVec3, ObjectPath, Rotator, Vec2,
    Vec3,
};
use crate::value::{ListData, MapData, NodeKind, NodeValue};
use uuid::Uuid;

const MAX_PACKED32_BYTES: u32 = 5;
const MAX_PACKED64_BYTES: u32 = 10;

pub fn zigzag_encode32(v: i32) -> u32 {
    ((v << 1) ^ (v >> 31)) as u32
}

pub fn zigzag_decode32(z: u32) -> i32 {
    ((z >> 1) as i32) ^ -((z & 1) as i32)
}

pub fn zigzag_encode64(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

pub fn zigzag_decode64(z: u64) -> i64 {
    ((z >> 1) as i64) ^ -((z & 1) as i64)
}

/// Append-only bit sink. Bits fill each byte LSB-first.
#[derive(Debug, Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    bit_len: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        BitWriter::default()
    }

    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bit_len == 0
    }

    /// Finish and take the backing bytes; the final partial byte is
    /// zero-padded.
    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn write_bit(&mut self, bit: bool) {
        if self.bit_len % 8 == 0 {
            self.bytes.push(0);
        }
        if bit {
            let idx = self.bit_len / 8;
            self.bytes[idx] |= 1 << (self.bit_len % 8);
        }
        self.bit_len += 1;
    }

    pub fn write_u8(&mut self, value: u8) {
        let shift = self.bit_len % 8;
        if shift == 0 {
            self.bytes.push(value);
        } else {
            let idx = self.bytes.len() - 1;
            self.bytes[idx] |= value << shift;
            self.bytes.push(value >> (8 - shift));
        }
        self.bit_len += 8;
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.write_u8(b);
        }
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(value as u8);
    }

    pub fn write_u16_le(&mut self, value: u16) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_u32_le(&mut self, value: u32) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_i32_le(&mut self, value: i32) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_f32_le(&mut self, value: f32) {
        self.write_bytes(&value.to_bits().to_le_bytes());
    }

    pub fn write_f64_le(&mut self, value: f64) {
        self.write_bytes(&value.to_bits().to_le_bytes());
    }

    /// LEB128: 7 value bits per byte, high bit is the continuation flag.
    pub fn write_packed_u32(&mut self, mut value: u32) {
        loop {
            let byte = (value & 0x7F) as u8;
            value >>= 7;
            self.write_u8(if value != 0 { byte | 0x80 } else { byte });
            if value == 0 {
                break;
            }
        }
    }

    pub fn write_packed_u64(&mut self, mut value: u64) {
        loop {
            let byte = (value & 0x7F) as u8;
            value >>= 7;
            self.write_u8(if value != 0 { byte | 0x80 } else { byte });
            if value == 0 {
                break;
            }
        }
    }

    pub fn write_zigzag_i32(&mut self, value: i32) {
        self.write_packed_u32(zigzag_encode32(value));
    }

    pub fn write_zigzag_i64(&mut self, value: i64) {
        self.write_packed_u64(zigzag_encode64(value));
    }

    pub fn write_string(&mut self, value: &str) {
        self.write_packed_u32(value.len() as u32);
        self.write_bytes(value.as_bytes());
    }

    pub fn write_name(&mut self, name: &Name) {
        self.write_string(name.as_str());
    }

    pub fn write_node_id(&mut self, id: NodeId) {
        self.write_zigzag_i32(id.index as i32);
        self.write_zigzag_i32(id.generation as i32);
    }
}

/// Bit source over a received byte buffer.
///
/// Reads past the end or malformed content set the sticky error flag and
/// yield zero values from then on.
#[derive(Debug)]
pub struct BitReader<'a> {
    bytes: &'a [u8],
    bit_pos: usize,
    error: bool,
}

impl<'a> BitReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        BitReader {
            bytes,
            bit_pos: 0,
            error: false,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error
    }

    pub fn set_error(&mut self) {
        self.error = true;
    }

    pub fn bit_len(&self) -> usize {
        self.bytes.len() * 8
    }

    pub fn remaining_bits(&self) -> usize {
        self.bit_len().saturating_sub(self.bit_pos)
    }

    pub fn at_end(&self) -> bool {
        self.bit_pos >= self.bit_len()
    }

    pub fn read_bit(&mut self) -> bool {
        if self.error || self.remaining_bits() < 1 {
            self.error = true;
            return false;
        }
        let bit = (self.bytes[self.bit_pos / 8] >> (self.bit_pos % 8)) & 1;
        self.bit_pos += 1;
        bit != 0
    }

    pub fn read_u8(&mut self) -> u8 {
        if self.error || self.remaining_bits() < 8 {
            self.error = true;
            return 0;
        }
        let shift = self.bit_pos % 8;
        let idx = self.bit_pos / 8;
        let value = if shift == 0 {
            self.bytes[idx]
        } else {
            (self.bytes[idx] >> shift) | (self.bytes[idx + 1] << (8 - shift))
        };
        self.bit_pos += 8;
        value
    }

    pub fn read_bytes(&mut self, len: usize, out: &mut Vec<u8>) {
        out.reserve(len);
        for _ in 0..len {
            out.push(self.read_u8());
        }
    }

    pub fn read_bool(&mut self) -> bool {
        self.read_u8() != 0
    }

    pub fn read_u16_le(&mut self) -> u16 {
        let mut buf = [0u8; 2];
        for b in &mut buf {
            *b = self.read_u8();
        }
        u16::from_le_bytes(buf)
    }

    pub fn read_u32_le(&mut self) -> u32 {
        let mut buf = [0u8; 4];
        for b in &mut buf {
            *b = self.read_u8();
        }
        u32::from_le_bytes(buf)
    }

    pub fn read_i32_le(&mut self) -> i32 {
        self.read_u32_le() as i32
    }

    pub fn read_f32_le(&mut self) -> f32 {
        f32::from_bits(self.read_u32_le())
    }

    pub fn read_f64_le(&mut self) -> f64 {
        let mut buf = [0u8; 8];
        for b in &mut buf {
            *b = self.read_u8();
        }
        f64::from_bits(u64::from_le_bytes(buf))
    }

    pub fn read_packed_u32(&mut self) -> u32 {
        let mut value = 0u32;
        for i in 0..MAX_PACKED32_BYTES {
            let byte = self.read_u8();
            value |= ((byte & 0x7F) as u32) << (7 * i);
            if byte & 0x80 == 0 {
                return value;
            }
        }
        self.error = true;
        0
    }

    pub fn read_packed_u64(&mut self) -> u64 {
        let mut value = 0u64;
        for i in 0..MAX_PACKED64_BYTES {
            let byte = self.read_u8();
            value |= ((byte & 0x7F) as u64) << (7 * i);
            if byte & 0x80 == 0 {
                return value;
            }
        }
        self.error = true;
        0
    }

    pub fn read_zigzag_i32(&mut self) -> i32 {
        zigzag_decode32(self.read_packed_u32())
    }

    pub fn read_zigzag_i64(&mut self) -> i64 {
        zigzag_decode64(self.read_packed_u64())
    }

    pub fn read_string(&mut self) -> String {
        let len = self.read_packed_u32() as usize;
        if self.error || len * 8 > self.remaining_bits() {
            self.error = true;
            return String::new();
        }
        let mut buf = Vec::new();
        self.read_bytes(len, &mut buf);
        match String::from_utf8(buf) {
            Ok(s) => s,
            Err(_) => {
                tracing::warn!("wire: non-utf8 string payload");
                self.error = true;
                String::new()
            }
        }
    }

    pub fn read_name(&mut self) -> Name {
        Name::new(&self.read_string())
    }

    pub fn read_node_id(&mut self) -> NodeId {
        let index = self.read_zigzag_i32();
        let generation = self.read_zigzag_i32();
        if !(0..=u16::MAX as i32).contains(&index) || !(0..=u16::MAX as i32).contains(&generation) {
            self.error = true;
            return NodeId::INVALID;
        }
        NodeId::new(index as u16, generation as u16)
    }
}

/// Encode one cell payload: leading kind tag, then the kind's natural
/// encoding. Child handles of compounds go on the wire as handles; the
/// receiver reconstructs the cells behind them from their own ops.
pub fn write_value(w: &mut BitWriter, value: &NodeValue) {
    w.write_u8(value.kind() as u8);
    match value {
        NodeValue::Empty => {}
        NodeValue::Bool(v) => w.write_bool(*v),
        NodeValue::Int8(v) => w.write_zigzag_i32(*v as i32),
        NodeValue::Int16(v) => w.write_zigzag_i32(*v as i32),
        NodeValue::Int32(v) => w.write_zigzag_i32(*v),
        NodeValue::Int64(v) => w.write_zigzag_i64(*v),
        NodeValue::Float32(v) => w.write_f32_le(*v),
        NodeValue::Float64(v) => w.write_f64_le(*v),
        NodeValue::Name(v) => w.write_name(v),
        NodeValue::String(v) => w.write_string(v),
        NodeValue::Color(v) => w.write_bytes(&[v.r, v.g, v.b, v.a]),
        NodeValue::Guid(v) => w.write_bytes(v.as_bytes()),
        NodeValue::ClassPath(v) => w.write_string(&v.0),
        NodeValue::ObjectPath(v) => w.write_string(&v.0),
        NodeValue::DateTime(v) => w.write_zigzag_i64(v.ticks),
        NodeValue::Rotator(v) => {
            w.write_f64_le(v.pitch);
            w.write_f64_le(v.yaw);
            w.write_f64_le(v.roll);
        }
        NodeValue::Vec2(v) => {
            w.write_f64_le(v.x);
            w.write_f64_le(v.y);
        }
        NodeValue::Vec3(v) => {
            w.write_f64_le(v.x);
            w.write_f64_le(v.y);
            w.write_f64_le(v.z);
        }
        NodeValue::IntVec2(v) => {
            w.write_zigzag_i32(v.x);
            w.write_zigzag_i32(v.y);
        }
        NodeValue::IntVec3(v) => {
            w.write_zigzag_i32(v.x);
            w.write_zigzag_i32(v.y);
            w.write_zigzag_i32(v.z);
        }
        NodeValue::Int64Vec2(v) => {
            w.write_zigzag_i64(v.x);
            w.write_zigzag_i64(v.y);
        }
        NodeValue::Int64Vec3(v) => {
            w.write_zigzag_i64(v.x);
            w.write_zigzag_i64(v.y);
            w.write_zigzag_i64(v.z);
        }
        NodeValue::ArrayInt8(v) => {
            w.write_packed_u32(v.len() as u32);
            for x in v {
                w.write_u8(*x as u8);
            }
        }
        NodeValue::ArrayInt16(v) => {
            w.write_packed_u32(v.len() as u32);
            for x in v {
                w.write_bytes(&x.to_le_bytes());
            }
        }
        NodeValue::ArrayInt32(v) => {
            w.write_packed_u32(v.len() as u32);
            for x in v {
                w.write_bytes(&x.to_le_bytes());
            }
        }
        NodeValue::ArrayInt64(v) => {
            w.write_packed_u32(v.len() as u32);
            for x in v {
                w.write_bytes(&x.to_le_bytes());
            }
        }
        NodeValue::ArrayFloat32(v) => {
            w.write_packed_u32(v.len() as u32);
            for x in v {
                w.write_f32_le(*x);
            }
        }
        NodeValue::ArrayFloat64(v) => {
            w.write_packed_u32(v.len() as u32);
            for x in v {
                w.write_f64_le(*x);
            }
        }
        NodeValue::Map(map) => {
            w.write_u16_le(map.len() as u16);
            for (key, child) in map.iter() {
                w.write_name(key);
                w.write_node_id(*child);
            }
        }
        NodeValue::List(list) => {
            w.write_u16_le(list.children.len() as u16);
            for child in &list.children {
                w.write_node_id(*child);
            }
        }
    }
}

fn read_array_len(r: &mut BitReader, elem_bytes: usize) -> usize {
    let len = r.read_packed_u32() as usize;
    if len * elem_bytes * 8 > r.remaining_bits() {
        r.set_error();
        return 0;
    }
    len
}

/// Decode one cell payload. On malformed input the reader error flag is set
/// and an `Empty` cell comes back.
pub fn read_value(r: &mut BitReader) -> NodeValue {
    let tag = r.read_u8();
    let kind = match NodeKind::from_u8(tag) {
        Some(kind) => kind,
        None => {
            tracing::warn!(tag, "wire: unknown value kind tag");
            r.set_error();
            return NodeValue::Empty;
        }
    };
    match kind {
        NodeKind::Empty => NodeValue::Empty,
        NodeKind::Bool => NodeValue::Bool(r.read_bool()),
        NodeKind::Int8 => NodeValue::Int8(r.read_zigzag_i32() as i8),
        NodeKind::Int16 => NodeValue::Int16(r.read_zigzag_i32() as i16),
        NodeKind::Int32 => NodeValue::Int32(r.read_zigzag_i32()),
        NodeKind::Int64 => NodeValue::Int64(r.read_zigzag_i64()),
        NodeKind::Float32 => NodeValue::Float32(r.read_f32_le()),
        NodeKind::Float64 => NodeValue::Float64(r.read_f64_le()),
        NodeKind::Name => NodeValue::Name(r.read_name()),
        NodeKind::String => NodeValue::String(r.read_string()),
        NodeKind::Color => {
            let (red, green, blue, alpha) = (r.read_u8(), r.read_u8(), r.read_u8(), r.read_u8());
            NodeValue::Color(Color::new(red, green, blue, alpha))
        }
        NodeKind::Guid => {
            let mut bytes = [0u8; 16];
            for b in &mut bytes {
                *b = r.read_u8();
            }
            NodeValue::Guid(Uuid::from_bytes(bytes))
        }
        NodeKind::ClassPath => NodeValue::ClassPath(ClassPath(r.read_string())),
        NodeKind::ObjectPath => NodeValue::ObjectPath(ObjectPath(r.read_string())),
        NodeKind::DateTime => NodeValue::DateTime(DateTime::from_ticks(r.read_zigzag_i64())),
        NodeKind::Rotator => NodeValue::Rotator(Rotator::new(
            r.read_f64_le(),
            r.read_f64_le(),
            r.read_f64_le(),
        )),
        NodeKind::Vec2 => NodeValue::Vec2(Vec2::new(r.read_f64_le(), r.read_f64_le())),
        NodeKind::Vec3 => NodeValue::Vec3(Vec3::new(
            r.read_f64_le(),
            r.read_f64_le(),
            r.read_f64_le(),
        )),
        NodeKind::IntVec2 => NodeValue::IntVec2(IntVec2::new(r.read_zigzag_i32(), r.read_zigzag_i32())),
        NodeKind::IntVec3 => NodeValue::IntVec3(IntVec3::new(
            r.read_zigzag_i32(),
            r.read_zigzag_i32(),
            r.read_zigzag_i32(),
        )),
        NodeKind::Int64Vec2 => {
            NodeValue::Int64Vec2(Int64Vec2::new(r.read_zigzag_i64(), r.read_zigzag_i64()))
        }
        NodeKind::Int64Vec3 => NodeValue::Int64Vec3(Int64Vec3::new(
            r.read_zigzag_i64(),
            r.read_zigzag_i64(),
            r.read_zigzag_i64(),
        )),
        NodeKind::ArrayInt8 => {
            let len = read_array_len(r, 1);
            NodeValue::ArrayInt8((0..len).map(|_| r.read_u8() as i8).collect())
        }
        NodeKind::ArrayInt16 => {
            let len = read_array_len(r, 2);
            NodeValue::ArrayInt16((0..len).map(|_| r.read_u16_le() as i16).collect())
        }
        NodeKind::ArrayInt32 => {
            let len = read_array_len(r, 4);
            NodeValue::ArrayInt32((0..len).map(|_| r.read_i32_le()).collect())
        }
        NodeKind::ArrayInt64 => {
            let len = read_array_len(r, 8);
            NodeValue::ArrayInt64(
                (0..len)
                    .map(|_| {
                        let mut buf = [0u8; 8];
                        for b in &mut buf {
                            *b = r.read_u8();
                        }
                        i64::from_le_bytes(buf)
                    })
                    .collect(),
            )
        }
        NodeKind::ArrayFloat32 => {
            let len = read_array_len(r, 4);
            NodeValue::ArrayFloat32((0..len).map(|_| r.read_f32_le()).collect())
        }
        NodeKind::ArrayFloat64 => {
            let len = read_array_len(r, 8);
            NodeValue::ArrayFloat64((0..len).map(|_| r.read_f64_le()).collect())
        }
        NodeKind::Map => {
            let count = r.read_u16_le();
            let mut map = MapData::default();
            for _ in 0..count {
                let key = r.read_name();
                let child = r.read_node_id();
                if r.is_error() {
                    break;
                }
                map.insert(key, child);
            }
            NodeValue::Map(map)
        }
        NodeKind::List => {
            let count = r.read_u16_le();
            let mut list = ListData::default();
            for _ in 0..count {
                let child = r.read_node_id();
                if r.is_error() {
                    break;
                }
                list.children.push(child);
            }
            NodeValue::List(list)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: &NodeValue) -> NodeValue {
        let mut w = BitWriter::new();
        write_value(&mut w, value);
        let bytes = w.finish();
        let mut r = BitReader::new(&bytes);
        let back = read_value(&mut r);
        assert!(!r.is_error());
        back
    }

    #[test]
    fn packed_round_trip_boundaries() {
        for v in [0u32, 1, 127, 128, 16383, 16384, u32::MAX] {
            let mut w = BitWriter::new();
            w.write_packed_u32(v);
            let bytes = w.finish();
            let mut r = BitReader::new(&bytes);
            assert_eq!(r.read_packed_u32(), v);
            assert!(!r.is_error());
        }
        let mut w = BitWriter::new();
        w.write_packed_u64(u64::MAX);
        let bytes = w.finish();
        let mut r = BitReader::new(&bytes);
        assert_eq!(r.read_packed_u64(), u64::MAX);
    }

    #[test]
    fn zigzag_small_negatives_stay_small() {
        assert_eq!(zigzag_encode32(0), 0);
        assert_eq!(zigzag_encode32(-1), 1);
        assert_eq!(zigzag_encode32(1), 2);
        assert_eq!(zigzag_decode32(zigzag_encode32(i32::MIN)), i32::MIN);
        assert_eq!(zigzag_decode64(zigzag_encode64(i64::MIN)), i64::MIN);
        for v in [-300i64, -1, 0, 1, 300, i64::MAX] {
            let mut w = BitWriter::new();
            w.write_zigzag_i64(v);
            let bytes = w.finish();
            assert_eq!(BitReader::new(&bytes).read_zigzag_i64(), v);
        }
    }

    #[test]
    fn bits_and_bytes_interleave() {
        let mut w = BitWriter::new();
        w.write_bit(true);
        w.write_u8(0xAB);
        w.write_bit(false);
        w.write_bit(true);
        w.write_u16_le(0x1234);
        let bytes = w.finish();
        let mut r = BitReader::new(&bytes);
        assert!(r.read_bit());
        assert_eq!(r.read_u8(), 0xAB);
        assert!(!r.read_bit());
        assert!(r.read_bit());
        assert_eq!(r.read_u16_le(), 0x1234);
        assert!(!r.is_error());
    }

    #[test]
    fn value_payload_round_trips() {
        use crate::types::*;
        let mut map = MapData::default();
        map.insert(Name::new("hp"), NodeId::new(4, 2));
        map.insert(Name::new("mp"), NodeId::new(5, 1));

        let samples = vec![
            NodeValue::Empty,
            NodeValue::Bool(true),
            NodeValue::Int8(-5),
            NodeValue::Int32(-123456),
            NodeValue::Int64(i64::MIN / 3),
            NodeValue::Float32(3.5),
            NodeValue::Float64(-0.25),
            NodeValue::Name(Name::new("player")),
            NodeValue::String("hello world".into()),
            NodeValue::Color(Color::new(1, 2, 3, 255)),
            NodeValue::Guid(Uuid::from_bytes([7; 16])),
            NodeValue::ClassPath(ClassPath("/Game/Items/Potion".into())),
            NodeValue::DateTime(DateTime::from_ticks(-99)),
            NodeValue::Rotator(Rotator::new(0.0, 90.0, -45.0)),
            NodeValue::Vec3(Vec3::new(1.0, 2.0, 3.0)),
            NodeValue::IntVec2(IntVec2::new(-1, 7)),
            NodeValue::Int64Vec3(Int64Vec3::new(1, -2, 3)),
            NodeValue::ArrayInt8(vec![-1, 0, 1]),
            NodeValue::ArrayInt32(vec![10, -20, 30]),
            NodeValue::ArrayFloat64(vec![0.5, -1.5]),
            NodeValue::Map(map),
            NodeValue::List(ListData {
                children: vec![NodeId::new(1, 1), NodeId::new(2, 3)],
            }),
        ];

        for sample in &samples {
            let back = round_trip(sample);
            assert!(
                back.equals_values(sample)
                    || (sample.is_compound() && format!("{back:?}") == format!("{sample:?}")),
                "round trip mismatch for {sample:?} -> {back:?}"
            );
        }
    }

    #[test]
    fn truncated_stream_sets_error() {
        let mut w = BitWriter::new();
        write_value(&mut w, &NodeValue::String("something long enough".into()));
        let bytes = w.finish();
        let mut r = BitReader::new(&bytes[..3]);
        let _ = read_value(&mut r);
        assert!(r.is_error());
    }

    #[test]
    fn unknown_kind_tag_sets_error() {
        let mut r = BitReader::new(&[0xFF]);
        let value = read_value(&mut r);
        assert!(r.is_error());
        assert!(value.is_empty_kind());
    }

    #[test]
    fn bogus_array_length_sets_error() {
        // ArrayInt64 claiming u32::MAX elements with no payload behind it.
        let mut w = BitWriter::new();
        w.write_u8(NodeKind::ArrayInt64 as u8);
        w.write_packed_u32(u32::MAX);
        let bytes = w.finish();
        let mut r = BitReader::new(&bytes);
        let _ = read_value(&mut r);
        assert!(r.is_error());
    }
}
