use std::collections::BTreeMap;

use bytes::Bytes;

use super::error::BencodeError;
use super::value::Value;

const MAX_DEPTH: usize = 32;

/// Decodes exactly one bencode value; trailing bytes are an error.
pub fn decode(data: &[u8]) -> Result<Value, BencodeError> {
    let mut cursor = Cursor { data, pos: 0 };
    let value = cursor.value(0)?;
    if cursor.pos != data.len() {
        return Err(BencodeError::TrailingData);
    }
    Ok(value)
}

/// Encodes a value to its canonical bencode form.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(value, &mut out);
    out
}

fn encode_into(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Integer(n) => {
            out.push(b'i');
            out.extend_from_slice(n.to_string().as_bytes());
            out.push(b'e');
        }
        Value::Bytes(bytes) => {
            out.extend_from_slice(bytes.len().to_string().as_bytes());
            out.push(b':');
            out.extend_from_slice(bytes);
        }
        Value::List(items) => {
            out.push(b'l');
            for item in items {
                encode_into(item, out);
            }
            out.push(b'e');
        }
        Value::Dict(entries) => {
            out.push(b'd');
            for (key, entry) in entries {
                out.extend_from_slice(key.len().to_string().as_bytes());
                out.push(b':');
                out.extend_from_slice(key);
                encode_into(entry, out);
            }
            out.push(b'e');
        }
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn value(&mut self, depth: usize) -> Result<Value, BencodeError> {
        if depth > MAX_DEPTH {
            return Err(BencodeError::NestingTooDeep);
        }
        match self.peek()? {
            b'i' => self.integer(),
            b'l' => self.list(depth),
            b'd' => self.dict(depth),
            b'0'..=b'9' => Ok(Value::Bytes(self.byte_string()?)),
            other => Err(BencodeError::UnexpectedByte(other)),
        }
    }

    fn peek(&self) -> Result<u8, BencodeError> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or(BencodeError::UnexpectedEof)
    }

    fn find(&self, byte: u8) -> Result<usize, BencodeError> {
        self.data[self.pos..]
            .iter()
            .position(|&b| b == byte)
            .map(|i| self.pos + i)
            .ok_or(BencodeError::UnexpectedEof)
    }

    fn integer(&mut self) -> Result<Value, BencodeError> {
        self.pos += 1;
        let end = self.find(b'e')?;
        let text = std::str::from_utf8(&self.data[self.pos..end])
            .map_err(|_| BencodeError::InvalidInteger)?;
        // No empty bodies, no signs beyond '-', no leading zeros.
        if text.is_empty()
            || text.starts_with('+')
            || (text.len() > 1 && text.starts_with('0'))
            || text.starts_with("-0")
        {
            return Err(BencodeError::InvalidInteger);
        }
        let n = text.parse().map_err(|_| BencodeError::InvalidInteger)?;
        self.pos = end + 1;
        Ok(Value::Integer(n))
    }

    fn byte_string(&mut self) -> Result<Bytes, BencodeError> {
        let colon = self.find(b':')?;
        let len: usize = std::str::from_utf8(&self.data[self.pos..colon])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(BencodeError::InvalidLength)?;
        let start = colon + 1;
        let end = start.checked_add(len).ok_or(BencodeError::InvalidLength)?;
        if end > self.data.len() {
            return Err(BencodeError::UnexpectedEof);
        }
        self.pos = end;
        Ok(Bytes::copy_from_slice(&self.data[start..end]))
    }

    fn list(&mut self, depth: usize) -> Result<Value, BencodeError> {
        self.pos += 1;
        let mut items = Vec::new();
        while self.peek()? != b'e' {
            items.push(self.value(depth + 1)?);
        }
        self.pos += 1;
        Ok(Value::List(items))
    }

    fn dict(&mut self, depth: usize) -> Result<Value, BencodeError> {
        self.pos += 1;
        let mut entries = BTreeMap::new();
        while self.peek()? != b'e' {
            let key = self.byte_string()?;
            let value = self.value(depth + 1)?;
            entries.insert(key, value);
        }
        self.pos += 1;
        Ok(Value::Dict(entries))
    }
}
