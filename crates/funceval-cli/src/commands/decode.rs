//! Decode command - show what a request buffer asks for

use crate::hex;
use anyhow::{Context, Result};
use funceval_config::LimitsConfig;
use funceval_runtime::{FuncEvalRequest, SignatureShape};
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Decoded request with its parsed, unresolved signature
#[derive(Debug, Serialize)]
pub struct DecodedRequest {
    pub parameters: Vec<String>,
    pub type_references: Vec<u64>,
    pub signature: SignatureShape,
}

impl DecodedRequest {
    /// Decode raw buffer bytes
    pub fn from_bytes(bytes: &[u8], limits: &LimitsConfig) -> Result<Self> {
        let request = FuncEvalRequest::decode(bytes, limits)?;
        let signature = SignatureShape::parse(request.signature(), request.type_references())?;
        Ok(Self {
            parameters: request.parameters().iter().map(|p| hex::encode(p)).collect(),
            type_references: request.type_references().to_vec(),
            signature,
        })
    }

    fn print(&self) {
        let parameters: Vec<String> = self
            .signature
            .parameters
            .iter()
            .map(|p| p.to_string())
            .collect();
        println!(
            "signature: {} ({})",
            self.signature.return_type,
            parameters.join(", ")
        );
        if let Some(receiver) = &self.signature.receiver {
            println!("receiver: {}", receiver);
        }

        println!("arguments: {}", self.parameters.len());
        for (i, value) in self.parameters.iter().enumerate() {
            println!("  [{}] {}", i, value);
        }

        println!("type references: {}", self.type_references.len());
        for (i, reference) in self.type_references.iter().enumerate() {
            println!("  ${} = {:#x}", i, reference);
        }
    }
}

/// Decode the hex buffer in `file`
pub fn run(file: &Path, json: bool, limits: &LimitsConfig) -> Result<()> {
    let text = fs::read_to_string(file)
        .with_context(|| format!("Failed to read request buffer: {}", file.display()))?;
    let bytes = hex::decode(&text).with_context(|| format!("{} is not hex", file.display()))?;
    let decoded = DecodedRequest::from_bytes(&bytes, limits)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&decoded)?);
    } else {
        decoded.print();
    }
    Ok(())
}
