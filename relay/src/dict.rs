//! The Dict codec: a deterministic, self-delimiting binary dictionary format.
//! Backed by bencode, since its wire properties already match the contract
//! exactly - lexicographic key ordering, binary-safe byte strings, no
//! external schema required to decode.

use std::collections::BTreeMap;

use bendy::decoding::{Decoder, FromBencode, Object, ResultExt};
use bendy::encoding::{AsString, Error as EncError, SingleItemEncoder, ToBencode};

/// A dictionary value: integers, binary-safe byte strings, lists, and
/// nested dictionaries. Keys are always strings, sorted lexicographically
/// on encode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
	Int(i64),
	Bytes(Vec<u8>),
	List(Vec<Value>),
	Dict(Dict),
}

impl Value {
	pub fn as_int(&self) -> Option<i64> {
		match self {
			Value::Int(n) => Some(*n),
			_ => None,
		}
	}

	pub fn as_bytes(&self) -> Option<&[u8]> {
		match self {
			Value::Bytes(b) => Some(b),
			_ => None,
		}
	}

	pub fn as_str(&self) -> Option<&str> {
		self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
	}

	pub fn as_list(&self) -> Option<&[Value]> {
		match self {
			Value::List(l) => Some(l),
			_ => None,
		}
	}

	pub fn as_dict(&self) -> Option<&Dict> {
		match self {
			Value::Dict(d) => Some(d),
			_ => None,
		}
	}
}

impl From<i64> for Value {
	fn from(n: i64) -> Self {
		Value::Int(n)
	}
}

impl From<u64> for Value {
	fn from(n: u64) -> Self {
		Value::Int(n as i64)
	}
}

impl From<Vec<u8>> for Value {
	fn from(b: Vec<u8>) -> Self {
		Value::Bytes(b)
	}
}

impl From<&str> for Value {
	fn from(s: &str) -> Self {
		Value::Bytes(s.as_bytes().to_vec())
	}
}

impl From<String> for Value {
	fn from(s: String) -> Self {
		Value::Bytes(s.into_bytes())
	}
}

impl From<Dict> for Value {
	fn from(d: Dict) -> Self {
		Value::Dict(d)
	}
}

/// A dictionary, keyed by string, sorted by key bytes on the wire.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Dict(BTreeMap<String, Value>);

impl Dict {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
		self.0.insert(key.into(), value.into());
		self
	}

	pub fn get(&self, key: &str) -> Option<&Value> {
		self.0.get(key)
	}
}

impl ToBencode for Value {
	const MAX_DEPTH: usize = 16;

	fn encode(&self, encoder: SingleItemEncoder) -> Result<(), EncError> {
		match self {
			Value::Int(n) => encoder.emit_int(*n),
			Value::Bytes(b) => encoder.emit_bytes(b),
			Value::List(items) => encoder.emit_list(|e| {
				for item in items {
					e.emit(item)?;
				}
				Ok(())
			}),
			Value::Dict(d) => d.encode(encoder),
		}
	}
}

impl ToBencode for Dict {
	const MAX_DEPTH: usize = 16;

	fn encode(&self, encoder: SingleItemEncoder) -> Result<(), EncError> {
		encoder.emit_dict(|mut e| {
			for (key, value) in &self.0 {
				e.emit_pair(key.as_bytes(), value)?;
			}
			Ok(())
		})
	}
}

impl FromBencode for Value {
	fn decode_bencode_object(object: Object) -> Result<Self, bendy::decoding::Error>
	where
		Self: Sized,
	{
		match object {
			Object::Integer(s) => Ok(Value::Int(s.parse().context("integer value")?)),
			Object::Bytes(b) => Ok(Value::Bytes(b.to_vec())),
			Object::List(mut list) => {
				let mut out = Vec::new();
				while let Some(item) = list.next_object()? {
					out.push(Value::decode_bencode_object(item)?);
				}
				Ok(Value::List(out))
			}
			Object::Dict(mut dict) => {
				let mut map = BTreeMap::new();
				while let Some((key, value)) = dict.next_pair()? {
					let key = String::from_utf8(key.to_vec()).context("dict key")?;
					map.insert(key, Value::decode_bencode_object(value)?);
				}
				Ok(Value::Dict(Dict(map)))
			}
		}
	}
}

impl FromBencode for Dict {
	fn decode_bencode_object(object: Object) -> Result<Self, bendy::decoding::Error>
	where
		Self: Sized,
	{
		match Value::decode_bencode_object(object)? {
			Value::Dict(d) => Ok(d),
			_ => Err(bendy::decoding::Error::unexpected_field("expected a dictionary at top level")),
		}
	}
}

/// Encode a [`Dict`] to its wire bytes.
pub fn encode(dict: &Dict) -> Vec<u8> {
	dict.to_bencode().expect("Dict encoding cannot fail for in-memory values")
}

/// Find the end of one self-delimiting bencode value at the front of `buf`,
/// without building it. Used to find message boundaries in a TCP stream that
/// may hold several concatenated dictionaries in a single read.
fn scan_value_end(buf: &[u8], pos: usize) -> Option<usize> {
	match *buf.get(pos)? {
		b'i' => {
			let end = buf[pos..].iter().position(|&b| b == b'e')?;
			Some(pos + end + 1)
		}
		b'l' | b'd' => {
			let mut cur = pos + 1;
			while buf.get(cur)? != &b'e' {
				cur = scan_value_end(buf, cur)?;
			}
			Some(cur + 1)
		}
		b'0'..=b'9' => {
			let colon = buf[pos..].iter().position(|&b| b == b':')?;
			let len: usize = std::str::from_utf8(&buf[pos..pos + colon]).ok()?.parse().ok()?;
			Some(pos + colon + 1 + len)
		}
		_ => None,
	}
}

/// Decode one [`Dict`] from the front of `buf`, returning it along with the
/// number of bytes consumed. Supports streaming: additional messages may
/// follow in `buf` and are left untouched.
pub fn decode_one(buf: &[u8]) -> Result<(Dict, usize), bendy::decoding::Error> {
	let end = scan_value_end(buf, 0).ok_or_else(|| bendy::decoding::Error::unexpected_field("incomplete message"))?;

	let mut decoder = Decoder::new(&buf[..end]);
	let object = decoder.next_object()?.ok_or_else(|| bendy::decoding::Error::unexpected_field("empty input"))?;
	let dict = Dict::decode_bencode_object(object)?;

	Ok((dict, end))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trips_nested_values() {
		let dict = Dict::new()
			.insert("t", "q")
			.insert("q", "login")
			.insert("s", 42i64)
			.insert("bd", Dict::new().insert("usr", "alice").insert("pw", "hunter2"));

		let bytes = encode(&dict);
		let (decoded, consumed) = decode_one(&bytes).expect("decodes");

		assert_eq!(consumed, bytes.len());
		assert_eq!(decoded.get("t").and_then(Value::as_str), Some("q"));
		assert_eq!(decoded.get("s").and_then(Value::as_int), Some(42));

		let body = decoded.get("bd").and_then(Value::as_dict).expect("bd is a dict");
		assert_eq!(body.get("usr").and_then(Value::as_str), Some("alice"));
	}

	#[test]
	fn decode_one_leaves_trailing_bytes_untouched() {
		let first = encode(&Dict::new().insert("t", "q"));
		let second = encode(&Dict::new().insert("t", "r"));

		let mut combined = first.clone();
		combined.extend_from_slice(&second);

		let (decoded, consumed) = decode_one(&combined).expect("decodes first message");
		assert_eq!(consumed, first.len());
		assert_eq!(decoded.get("t").and_then(Value::as_str), Some("q"));

		let (decoded2, _) = decode_one(&combined[consumed..]).expect("decodes second message");
		assert_eq!(decoded2.get("t").and_then(Value::as_str), Some("r"));
	}
}
