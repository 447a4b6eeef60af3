//! Func-eval request buffer
//!
//! Layout, every integer a varint:
//!
//! ```text
//! overall length      (consumed, not checked)
//! parameter count
//!   byte length, then that many single-byte-value varints   (per parameter)
//! type-reference count
//!   wide varint                                             (per reference)
//! signature blob      (rest of the buffer)
//! ```

use super::varint::{WireReader, WireWriter};
use crate::error::{FuncEvalError, FuncEvalResult};
use funceval_config::LimitsConfig;
use serde::Serialize;

/// Decoded unit of work, immutable once built
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FuncEvalRequest {
    parameters: Vec<Vec<u8>>,
    type_references: Vec<u64>,
    signature: Vec<u8>,
}

impl FuncEvalRequest {
    /// Decode a debugger-filled parameter buffer
    pub fn decode(buffer: &[u8], limits: &LimitsConfig) -> FuncEvalResult<Self> {
        let mut reader = WireReader::new(buffer);

        // Length of the whole sequence; the buffer size already bounds it.
        reader.read_unsigned()?;

        let parameter_count = read_count(&mut reader, limits.max_parameters, "parameter")?;
        let mut parameters = Vec::with_capacity(parameter_count.min(reader.remaining()));
        for _ in 0..parameter_count {
            let size = read_count(&mut reader, limits.max_parameter_size, "parameter byte")?;
            let mut value = Vec::with_capacity(size.min(reader.remaining()));
            for _ in 0..size {
                value.push(reader.read_byte_value()?);
            }
            parameters.push(value);
        }

        let reference_count =
            read_count(&mut reader, limits.max_type_references, "type reference")?;
        let mut type_references = Vec::with_capacity(reference_count.min(reader.remaining()));
        for _ in 0..reference_count {
            type_references.push(reader.read_unsigned_long()?);
        }

        let signature = reader.take_rest().to_vec();

        Ok(Self {
            parameters,
            type_references,
            signature,
        })
    }

    /// Argument byte blobs in call order
    pub fn parameters(&self) -> &[Vec<u8>] {
        &self.parameters
    }

    /// Raw type references the signature may point at by index
    pub fn type_references(&self) -> &[u64] {
        &self.type_references
    }

    /// Opaque signature blob handed to the resolver
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Give up ownership of the argument blobs
    pub fn into_parameters(self) -> Vec<Vec<u8>> {
        self.parameters
    }
}

fn read_count(reader: &mut WireReader<'_>, limit: usize, what: &str) -> FuncEvalResult<usize> {
    let offset = reader.offset();
    let count = reader.read_unsigned()? as usize;
    if count > limit {
        return Err(FuncEvalError::malformed(
            offset,
            format!("{} count {} exceeds limit {}", what, count, limit),
        ));
    }
    Ok(count)
}

/// Builds request buffers the way the debugger does
#[derive(Debug, Clone, Default)]
pub struct RequestEncoder {
    parameters: Vec<Vec<u8>>,
    type_references: Vec<u64>,
    signature: Vec<u8>,
}

impl RequestEncoder {
    /// Start an empty request
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an argument blob
    pub fn parameter(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.parameters.push(bytes.into());
        self
    }

    /// Append a raw type reference
    pub fn type_reference(mut self, reference: u64) -> Self {
        self.type_references.push(reference);
        self
    }

    /// Set the signature blob
    pub fn signature(mut self, blob: impl Into<Vec<u8>>) -> Self {
        self.signature = blob.into();
        self
    }

    /// Produce the wire bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut body = WireWriter::new();

        body.write_unsigned(self.parameters.len() as u32);
        for parameter in &self.parameters {
            body.write_unsigned(parameter.len() as u32);
            for byte in parameter {
                body.write_unsigned(u32::from(*byte));
            }
        }

        body.write_unsigned(self.type_references.len() as u32);
        for reference in &self.type_references {
            body.write_unsigned_long(*reference);
        }

        body.write_raw(&self.signature);

        let body = body.into_bytes();
        let mut out = WireWriter::new();
        out.write_unsigned(body.len() as u32);
        out.write_raw(&body);
        out.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn limits() -> LimitsConfig {
        LimitsConfig::default()
    }

    #[test]
    fn test_empty_request() {
        let bytes = RequestEncoder::new().encode();
        let request = FuncEvalRequest::decode(&bytes, &limits()).unwrap();

        assert!(request.parameters().is_empty());
        assert!(request.type_references().is_empty());
        assert!(request.signature().is_empty());
    }

    #[test]
    fn test_parameters_and_references() {
        let bytes = RequestEncoder::new()
            .parameter(vec![1, 0, 0, 0])
            .parameter(vec![0xff, 0x80])
            .type_reference(7)
            .type_reference(u64::MAX)
            .signature(vec![0x00, 0x02])
            .encode();

        let request = FuncEvalRequest::decode(&bytes, &limits()).unwrap();
        assert_eq!(request.parameters(), &[vec![1, 0, 0, 0], vec![0xff, 0x80]]);
        assert_eq!(request.type_references(), &[7, u64::MAX]);
        assert_eq!(request.signature(), &[0x00, 0x02]);
    }

    #[test]
    fn test_zero_length_blob() {
        let bytes = RequestEncoder::new().parameter(Vec::new()).encode();
        let request = FuncEvalRequest::decode(&bytes, &limits()).unwrap();
        assert_eq!(request.parameters(), &[Vec::<u8>::new()]);
    }

    #[test]
    fn test_declared_count_beyond_buffer() {
        let mut writer = WireWriter::new();
        writer.write_unsigned(0);
        writer.write_unsigned(3);
        writer.write_unsigned(1);
        writer.write_unsigned(9);
        let bytes = writer.into_bytes();

        assert!(matches!(
            FuncEvalRequest::decode(&bytes, &limits()),
            Err(FuncEvalError::MalformedRequest { .. })
        ));
    }

    #[test]
    fn test_parameter_limit() {
        let bytes = RequestEncoder::new()
            .parameter(vec![1])
            .parameter(vec![2])
            .encode();
        let tight = LimitsConfig {
            max_parameters: 1,
            ..LimitsConfig::default()
        };

        let err = FuncEvalRequest::decode(&bytes, &tight).unwrap_err();
        assert!(err.to_string().contains("parameter count 2 exceeds limit 1"));
    }

    #[test]
    fn test_byte_out_of_range() {
        let mut writer = WireWriter::new();
        writer.write_unsigned(0);
        writer.write_unsigned(1);
        writer.write_unsigned(1);
        writer.write_unsigned(300);
        writer.write_unsigned(0);
        let bytes = writer.into_bytes();

        assert!(FuncEvalRequest::decode(&bytes, &limits()).is_err());
    }
}
