//! # Canonical Binary Codec
//!
//! Deterministic, schema-driven encoding for every consensus-critical
//! entity: block headers, transactions, accounts, state diffs, and module
//! assets. The wire format is protobuf-shaped but the rules are stricter,
//! because two honest nodes must produce byte-identical encodings.
//!
//! ## Wire Format
//!
//! Each field is written as `varint(field_number << 3 | wire_type)`
//! followed by the field body:
//!
//! | dataType                  | wire type | body                        |
//! |---------------------------|-----------|-----------------------------|
//! | uint32 / uint64 / boolean | 0         | varint                      |
//! | sint32 / sint64           | 0         | zigzag varint               |
//! | bytes / string            | 2         | varint length + raw bytes   |
//! | object / array of object  | 2         | varint length + nested enc. |
//!
//! Repeated fields repeat the same key once per element, in element order.
//!
//! ## Canonical Form
//!
//! - Fields are serialized in strictly ascending field-number order.
//!   [`Writer`] enforces this at encode time; [`Reader`] enforces it at
//!   decode time.
//! - Required fields are always written, even when zero-valued. Optional
//!   fields are written exactly when present.
//! - Decoding is strict: an unrecognized or out-of-order field number
//!   fails with [`CodecError::UnknownField`] instead of being skipped.
//!
//! Together these rules give the round-trip law both ways:
//! `decode(encode(x)) == x` and `encode(decode(bytes)) == bytes`.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors produced while decoding canonical bytes.
///
/// Encoding is infallible: the [`Writer`] API makes invalid field order a
/// programming error (debug assertion), not a runtime result.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// A field number appeared that the schema does not declare, or a
    /// declared field appeared out of ascending order.
    #[error("unknown field number {0}")]
    UnknownField(u32),

    /// A declared field carried the wrong wire type.
    #[error("wrong wire type for field {field}: expected {expected}")]
    WrongType {
        field: u32,
        expected: &'static str,
    },

    /// A required field was absent from the input.
    #[error("missing required field {0}")]
    MissingField(u32),

    /// The input ended in the middle of a varint, length, or field body.
    #[error("truncated input")]
    Truncated,

    /// A varint exceeded the range of the declared integer type.
    #[error("integer overflow")]
    Overflow,
}

// Wire types. Only two are legal in canonical form.
const WIRE_VARINT: u64 = 0;
const WIRE_BYTES: u64 = 2;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// A type with a canonical binary encoding.
pub trait Encode {
    /// Append this value's fields to the writer.
    fn encode(&self, writer: &mut Writer);

    /// Encode into a fresh byte vector.
    fn encode_to_bytes(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        self.encode(&mut writer);
        writer.into_bytes()
    }
}

/// A type decodable from its canonical binary encoding.
pub trait Decode: Sized {
    /// Read this value's fields from the reader.
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError>;

    /// Decode a complete value from bytes, rejecting trailing data.
    fn decode_from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut reader = Reader::new(bytes);
        let value = Self::decode(&mut reader)?;
        reader.finish()?;
        Ok(value)
    }
}

// ---------------------------------------------------------------------------
// Varint primitives
// ---------------------------------------------------------------------------

fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

fn zigzag32(value: i32) -> u64 {
    ((value.wrapping_shl(1) ^ (value >> 31)) as u32) as u64
}

fn unzigzag32(value: u64) -> Result<i32, CodecError> {
    let value: u32 = value.try_into().map_err(|_| CodecError::Overflow)?;
    Ok(((value >> 1) as i32) ^ -((value & 1) as i32))
}

fn zigzag64(value: i64) -> u64 {
    (value.wrapping_shl(1) ^ (value >> 63)) as u64
}

fn unzigzag64(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Canonical encoder.
///
/// Fields must be written in strictly ascending field-number order;
/// repeated fields re-use the previous field number. Violations are a bug
/// in the calling `Encode` impl and trip a debug assertion.
#[derive(Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
    last_field: u32,
}

impl Writer {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume the writer, returning the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn write_key(&mut self, field_number: u32, wire_type: u64) {
        debug_assert!(
            field_number >= self.last_field,
            "fields must be encoded in ascending order ({} after {})",
            field_number,
            self.last_field
        );
        self.last_field = field_number;
        write_varint(&mut self.buf, ((field_number as u64) << 3) | wire_type);
    }

    /// Write a `uint32` field.
    pub fn write_u32(&mut self, field_number: u32, value: u32) {
        self.write_key(field_number, WIRE_VARINT);
        write_varint(&mut self.buf, value as u64);
    }

    /// Write a `uint64` field.
    pub fn write_u64(&mut self, field_number: u32, value: u64) {
        self.write_key(field_number, WIRE_VARINT);
        write_varint(&mut self.buf, value);
    }

    /// Write a zigzag-encoded `sint32` field.
    pub fn write_i32(&mut self, field_number: u32, value: i32) {
        self.write_key(field_number, WIRE_VARINT);
        write_varint(&mut self.buf, zigzag32(value));
    }

    /// Write a zigzag-encoded `sint64` field.
    pub fn write_i64(&mut self, field_number: u32, value: i64) {
        self.write_key(field_number, WIRE_VARINT);
        write_varint(&mut self.buf, zigzag64(value));
    }

    /// Write a `boolean` field.
    pub fn write_bool(&mut self, field_number: u32, value: bool) {
        self.write_key(field_number, WIRE_VARINT);
        write_varint(&mut self.buf, value as u64);
    }

    /// Write a `bytes` field.
    pub fn write_bytes(&mut self, field_number: u32, value: &[u8]) {
        self.write_key(field_number, WIRE_BYTES);
        write_varint(&mut self.buf, value.len() as u64);
        self.buf.extend_from_slice(value);
    }

    /// Write a `string` field.
    pub fn write_string(&mut self, field_number: u32, value: &str) {
        self.write_bytes(field_number, value.as_bytes());
    }

    /// Write a nested `object` field.
    pub fn write_object<T: Encode>(&mut self, field_number: u32, value: &T) {
        self.write_bytes(field_number, &value.encode_to_bytes());
    }

    /// Write a repeated `bytes` field, one key per element.
    pub fn write_repeated_bytes<B: AsRef<[u8]>>(&mut self, field_number: u32, values: &[B]) {
        for value in values {
            self.write_key(field_number, WIRE_BYTES);
            write_varint(&mut self.buf, value.as_ref().len() as u64);
            self.buf.extend_from_slice(value.as_ref());
        }
    }

    /// Write a repeated `uint32` field, one key per element.
    pub fn write_repeated_u32(&mut self, field_number: u32, values: &[u32]) {
        for &value in values {
            self.write_key(field_number, WIRE_VARINT);
            write_varint(&mut self.buf, value as u64);
        }
    }

    /// Write a repeated `object` field, one key per element.
    pub fn write_repeated_objects<T: Encode>(&mut self, field_number: u32, values: &[T]) {
        for value in values {
            self.write_object(field_number, value);
        }
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Strict canonical decoder.
///
/// The caller pulls fields in schema order. Required accessors fail with
/// [`CodecError::MissingField`] when the expected field is absent and
/// [`CodecError::UnknownField`] when the input carries a field the schema
/// does not declare at that position.
#[derive(Debug)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Create a reader over encoded bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Assert that the entire input has been consumed.
    ///
    /// Trailing data means the input carries fields beyond the schema,
    /// which strict decoding rejects.
    pub fn finish(mut self) -> Result<(), CodecError> {
        if self.pos == self.data.len() {
            return Ok(());
        }
        let (field_number, _) = self.read_key()?;
        Err(CodecError::UnknownField(field_number))
    }

    fn read_varint(&mut self) -> Result<u64, CodecError> {
        let mut value: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = *self.data.get(self.pos).ok_or(CodecError::Truncated)?;
            self.pos += 1;
            if shift == 63 && byte > 1 {
                return Err(CodecError::Overflow);
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift > 63 {
                return Err(CodecError::Overflow);
            }
        }
    }

    fn read_key(&mut self) -> Result<(u32, u64), CodecError> {
        let key = self.read_varint()?;
        let field_number = u32::try_from(key >> 3).map_err(|_| CodecError::Overflow)?;
        Ok((field_number, key & 0x7))
    }

    /// Peek the next field number without consuming it. `None` at end of
    /// input.
    fn peek_field(&mut self) -> Result<Option<u32>, CodecError> {
        if self.pos == self.data.len() {
            return Ok(None);
        }
        let saved = self.pos;
        let (field_number, _) = self.read_key()?;
        self.pos = saved;
        Ok(Some(field_number))
    }

    /// Consume the key for `field_number`, enforcing presence, identity,
    /// and wire type.
    fn expect_key(
        &mut self,
        field_number: u32,
        wire_type: u64,
        expected: &'static str,
    ) -> Result<(), CodecError> {
        match self.peek_field()? {
            None => Err(CodecError::MissingField(field_number)),
            Some(actual) if actual < field_number => Err(CodecError::UnknownField(actual)),
            Some(actual) if actual > field_number => Err(CodecError::MissingField(field_number)),
            Some(_) => {
                let (_, actual_wire) = self.read_key()?;
                if actual_wire != wire_type {
                    return Err(CodecError::WrongType {
                        field: field_number,
                        expected,
                    });
                }
                Ok(())
            }
        }
    }

    /// True when the next field in the input is `field_number`. Used for
    /// optional and repeated fields.
    fn next_is(&mut self, field_number: u32) -> Result<bool, CodecError> {
        Ok(self.peek_field()? == Some(field_number))
    }

    fn read_length_body(&mut self) -> Result<&'a [u8], CodecError> {
        let len = usize::try_from(self.read_varint()?).map_err(|_| CodecError::Overflow)?;
        let end = self.pos.checked_add(len).ok_or(CodecError::Overflow)?;
        if end > self.data.len() {
            return Err(CodecError::Truncated);
        }
        let body = &self.data[self.pos..end];
        self.pos = end;
        Ok(body)
    }

    /// Read a required `uint32` field.
    pub fn read_u32(&mut self, field_number: u32) -> Result<u32, CodecError> {
        self.expect_key(field_number, WIRE_VARINT, "uint32")?;
        u32::try_from(self.read_varint()?).map_err(|_| CodecError::Overflow)
    }

    /// Read a required `uint64` field.
    pub fn read_u64(&mut self, field_number: u32) -> Result<u64, CodecError> {
        self.expect_key(field_number, WIRE_VARINT, "uint64")?;
        self.read_varint()
    }

    /// Read a required zigzag `sint32` field.
    pub fn read_i32(&mut self, field_number: u32) -> Result<i32, CodecError> {
        self.expect_key(field_number, WIRE_VARINT, "sint32")?;
        let raw = self.read_varint()?;
        unzigzag32(raw)
    }

    /// Read a required zigzag `sint64` field.
    pub fn read_i64(&mut self, field_number: u32) -> Result<i64, CodecError> {
        self.expect_key(field_number, WIRE_VARINT, "sint64")?;
        Ok(unzigzag64(self.read_varint()?))
    }

    /// Read a required `boolean` field. Canonical booleans are 0 or 1.
    pub fn read_bool(&mut self, field_number: u32) -> Result<bool, CodecError> {
        self.expect_key(field_number, WIRE_VARINT, "boolean")?;
        match self.read_varint()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(CodecError::WrongType {
                field: field_number,
                expected: "boolean",
            }),
        }
    }

    /// Read a required `bytes` field.
    pub fn read_bytes(&mut self, field_number: u32) -> Result<Vec<u8>, CodecError> {
        self.expect_key(field_number, WIRE_BYTES, "bytes")?;
        Ok(self.read_length_body()?.to_vec())
    }

    /// Read a required `string` field.
    pub fn read_string(&mut self, field_number: u32) -> Result<String, CodecError> {
        self.expect_key(field_number, WIRE_BYTES, "string")?;
        let body = self.read_length_body()?;
        String::from_utf8(body.to_vec()).map_err(|_| CodecError::WrongType {
            field: field_number,
            expected: "string",
        })
    }

    /// Read a required nested `object` field.
    pub fn read_object<T: Decode>(&mut self, field_number: u32) -> Result<T, CodecError> {
        self.expect_key(field_number, WIRE_BYTES, "object")?;
        let body = self.read_length_body()?;
        T::decode_from_bytes(body)
    }

    /// Read all consecutive elements of a repeated `bytes` field.
    pub fn read_repeated_bytes(&mut self, field_number: u32) -> Result<Vec<Vec<u8>>, CodecError> {
        let mut values = Vec::new();
        while self.next_is(field_number)? {
            let (_, wire) = self.read_key()?;
            if wire != WIRE_BYTES {
                return Err(CodecError::WrongType {
                    field: field_number,
                    expected: "bytes",
                });
            }
            values.push(self.read_length_body()?.to_vec());
        }
        Ok(values)
    }

    /// Read all consecutive elements of a repeated `uint32` field.
    pub fn read_repeated_u32(&mut self, field_number: u32) -> Result<Vec<u32>, CodecError> {
        let mut values = Vec::new();
        while self.next_is(field_number)? {
            let (_, wire) = self.read_key()?;
            if wire != WIRE_VARINT {
                return Err(CodecError::WrongType {
                    field: field_number,
                    expected: "uint32",
                });
            }
            values.push(u32::try_from(self.read_varint()?).map_err(|_| CodecError::Overflow)?);
        }
        Ok(values)
    }

    /// Read all consecutive elements of a repeated `object` field.
    pub fn read_repeated_objects<T: Decode>(
        &mut self,
        field_number: u32,
    ) -> Result<Vec<T>, CodecError> {
        let mut values = Vec::new();
        while self.next_is(field_number)? {
            values.push(self.read_object(field_number)?);
        }
        Ok(values)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Schema: { 1: uint32, 2: uint64, 3: sint64, 4: bytes,
    ///           5: string, 6: boolean, 7: repeated bytes }
    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Sample {
        version: u32,
        amount: u64,
        delta: i64,
        payload: Vec<u8>,
        label: String,
        active: bool,
        keys: Vec<Vec<u8>>,
    }

    impl Encode for Sample {
        fn encode(&self, writer: &mut Writer) {
            writer.write_u32(1, self.version);
            writer.write_u64(2, self.amount);
            writer.write_i64(3, self.delta);
            writer.write_bytes(4, &self.payload);
            writer.write_string(5, &self.label);
            writer.write_bool(6, self.active);
            writer.write_repeated_bytes(7, &self.keys);
        }
    }

    impl Decode for Sample {
        fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
            Ok(Self {
                version: reader.read_u32(1)?,
                amount: reader.read_u64(2)?,
                delta: reader.read_i64(3)?,
                payload: reader.read_bytes(4)?,
                label: reader.read_string(5)?,
                active: reader.read_bool(6)?,
                keys: reader.read_repeated_bytes(7)?,
            })
        }
    }

    fn sample() -> Sample {
        Sample {
            version: 2,
            amount: u64::MAX,
            delta: -42,
            payload: vec![0xde, 0xad, 0xbe, 0xef],
            label: "delegate".to_string(),
            active: true,
            keys: vec![vec![1; 32], vec![2; 32]],
        }
    }

    // -- Round trip ---------------------------------------------------------

    #[test]
    fn decode_of_encode_is_identity() {
        let value = sample();
        let bytes = value.encode_to_bytes();
        let decoded = Sample::decode_from_bytes(&bytes).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn encode_of_decode_is_byte_identical() {
        let bytes = sample().encode_to_bytes();
        let decoded = Sample::decode_from_bytes(&bytes).unwrap();
        assert_eq!(decoded.encode_to_bytes(), bytes);
    }

    #[test]
    fn zero_values_are_still_written() {
        let zeroed = Sample {
            version: 0,
            amount: 0,
            delta: 0,
            payload: vec![],
            label: String::new(),
            active: false,
            keys: vec![],
        };
        let bytes = zeroed.encode_to_bytes();
        // Six required fields, each one key byte + one body byte (or
        // zero-length body). Never elided.
        assert_eq!(Sample::decode_from_bytes(&bytes).unwrap(), zeroed);
        assert_eq!(zeroed.encode_to_bytes(), bytes);
    }

    // -- Zigzag -------------------------------------------------------------

    #[test]
    fn zigzag_maps_small_magnitudes_to_small_varints() {
        assert_eq!(zigzag64(0), 0);
        assert_eq!(zigzag64(-1), 1);
        assert_eq!(zigzag64(1), 2);
        assert_eq!(zigzag64(-2), 3);
        assert_eq!(unzigzag64(zigzag64(i64::MIN)), i64::MIN);
        assert_eq!(unzigzag64(zigzag64(i64::MAX)), i64::MAX);
        assert_eq!(unzigzag32(zigzag32(i32::MIN)).unwrap(), i32::MIN);
    }

    // -- Strictness ---------------------------------------------------------

    #[test]
    fn unknown_trailing_field_rejected() {
        let mut writer = Writer::new();
        sample().encode(&mut writer);
        writer.write_u32(9, 7); // field 9 is not in the schema
        let bytes = writer.into_bytes();

        assert_eq!(
            Sample::decode_from_bytes(&bytes),
            Err(CodecError::UnknownField(9))
        );
    }

    #[test]
    fn missing_required_field_rejected() {
        let mut writer = Writer::new();
        writer.write_u32(1, 2);
        // Field 2 skipped entirely; field 3 present.
        writer.write_i64(3, -1);
        let bytes = writer.into_bytes();

        assert_eq!(
            Sample::decode_from_bytes(&bytes),
            Err(CodecError::MissingField(2))
        );
    }

    #[test]
    fn wrong_wire_type_rejected() {
        let mut writer = Writer::new();
        writer.write_bytes(1, b"not a varint");
        let bytes = writer.into_bytes();

        assert_eq!(
            Sample::decode_from_bytes(&bytes),
            Err(CodecError::WrongType {
                field: 1,
                expected: "uint32"
            })
        );
    }

    #[test]
    fn truncated_input_rejected() {
        let bytes = sample().encode_to_bytes();
        for cut in [1, bytes.len() / 2, bytes.len() - 1] {
            let err = Sample::decode_from_bytes(&bytes[..cut]).unwrap_err();
            assert!(
                matches!(err, CodecError::Truncated | CodecError::MissingField(_)),
                "cut at {cut} produced {err:?}"
            );
        }
    }

    #[test]
    fn u32_overflow_rejected() {
        let mut writer = Writer::new();
        writer.write_u64(1, u64::from(u32::MAX) + 1);
        let bytes = writer.into_bytes();

        let mut reader = Reader::new(&bytes);
        assert_eq!(reader.read_u32(1), Err(CodecError::Overflow));
    }

    #[test]
    fn varint_overflow_rejected() {
        // Eleven continuation bytes cannot fit in a u64.
        let bytes = [0xffu8; 11];
        let mut reader = Reader::new(&bytes);
        assert_eq!(reader.read_varint(), Err(CodecError::Overflow));
    }

    #[test]
    fn non_canonical_boolean_rejected() {
        let mut writer = Writer::new();
        writer.write_u32(6, 2);
        let bytes = writer.into_bytes();
        let mut reader = Reader::new(&bytes);
        assert!(matches!(
            reader.read_bool(6),
            Err(CodecError::WrongType { field: 6, .. })
        ));
    }

    // -- Nested objects -----------------------------------------------------

    #[derive(Debug, PartialEq, Eq)]
    struct Outer {
        id: u32,
        inner: Sample,
        items: Vec<Sample>,
    }

    impl Encode for Outer {
        fn encode(&self, writer: &mut Writer) {
            writer.write_u32(1, self.id);
            writer.write_object(2, &self.inner);
            writer.write_repeated_objects(3, &self.items);
        }
    }

    impl Decode for Outer {
        fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
            Ok(Self {
                id: reader.read_u32(1)?,
                inner: reader.read_object(2)?,
                items: reader.read_repeated_objects(3)?,
            })
        }
    }

    #[test]
    fn nested_objects_roundtrip() {
        let outer = Outer {
            id: 5,
            inner: sample(),
            items: vec![sample(), sample()],
        };
        let bytes = outer.encode_to_bytes();
        let decoded = Outer::decode_from_bytes(&bytes).unwrap();
        assert_eq!(decoded, outer);
        assert_eq!(decoded.encode_to_bytes(), bytes);
    }

    #[test]
    fn empty_repeated_object_field_roundtrips() {
        let outer = Outer {
            id: 1,
            inner: sample(),
            items: vec![],
        };
        let bytes = outer.encode_to_bytes();
        assert_eq!(Outer::decode_from_bytes(&bytes).unwrap(), outer);
    }
}
