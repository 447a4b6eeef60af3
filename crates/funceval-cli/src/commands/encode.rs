//! Encode command - build a request buffer from a TOML description

use crate::{hex, type_syntax};
use anyhow::{Context, Result};
use funceval_runtime::{RequestEncoder, SignatureBuilder, SignatureShape};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Request description as written by hand
///
/// ```toml
/// returns = "i32"
/// type_references = [0x1000]
///
/// [[parameters]]
/// type = "i32"
/// value = "28000000"
/// ```
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestSpec {
    #[serde(default = "default_return")]
    pub returns: String,
    #[serde(default)]
    pub receiver: Option<ArgumentSpec>,
    #[serde(default)]
    pub parameters: Vec<ArgumentSpec>,
    #[serde(default)]
    pub type_references: Vec<u64>,
}

/// One argument: its type and its bytes as hex
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArgumentSpec {
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub value: String,
}

fn default_return() -> String {
    "void".to_string()
}

impl RequestSpec {
    /// Produce the wire bytes for this description
    pub fn encode(&self) -> Result<Vec<u8>> {
        let refs = &self.type_references;
        let return_type = type_syntax::parse_type(&self.returns, refs)
            .with_context(|| format!("return type '{}'", self.returns))?;
        let receiver = self
            .receiver
            .as_ref()
            .map(|r| {
                type_syntax::parse_type(&r.ty, refs).with_context(|| format!("receiver '{}'", r.ty))
            })
            .transpose()?;
        let parameters = self
            .parameters
            .iter()
            .enumerate()
            .map(|(i, p)| {
                type_syntax::parse_type(&p.ty, refs)
                    .with_context(|| format!("parameter {} type '{}'", i, p.ty))
            })
            .collect::<Result<Vec<_>>>()?;

        let shape = SignatureShape {
            return_type,
            receiver,
            parameters,
        };
        let (signature, type_references) =
            SignatureBuilder::encode_with_references(&shape, refs.clone());

        let mut encoder = RequestEncoder::new().signature(signature);
        for (i, argument) in self.receiver.iter().chain(&self.parameters).enumerate() {
            let bytes = hex::decode(&argument.value)
                .with_context(|| format!("value of argument {}", i))?;
            encoder = encoder.parameter(bytes);
        }
        for reference in type_references {
            encoder = encoder.type_reference(reference);
        }

        debug!(
            param_count = shape.argument_count(),
            signature = %shape_summary(&shape),
            "encoded request"
        );
        Ok(encoder.encode())
    }
}

fn shape_summary(shape: &SignatureShape) -> String {
    let parameters: Vec<String> = shape.parameters.iter().map(|p| p.to_string()).collect();
    format!("{} ({})", shape.return_type, parameters.join(", "))
}

/// Encode `file` and print or write the hex
pub fn run(file: &Path, out: Option<&Path>) -> Result<()> {
    let source = fs::read_to_string(file)
        .with_context(|| format!("Failed to read request description: {}", file.display()))?;
    let spec: RequestSpec = toml::from_str(&source)
        .with_context(|| format!("Invalid request description: {}", file.display()))?;

    let text = hex::encode(&spec.encode()?);
    match out {
        Some(path) => fs::write(path, format!("{}\n", text))
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => println!("{}", text),
    }
    Ok(())
}
