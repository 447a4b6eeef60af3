//! Type expressions used in request descriptions
//!
//! ```text
//! type  := '&' type | '*' type | atom ('[]')*
//! atom  := name | '$' N ('<' type (',' type)* '>')? | '!' N | '!!' N
//! ```
//!
//! `name` is a built-in such as `i32` or `string`. `$N` names entry `N` of
//! the request's type references; `!N` and `!!N` are type and method
//! generic variables.

use anyhow::{anyhow, bail, Result};
use funceval_runtime::types::TypeDesc;
use funceval_runtime::{ElementType, TypeHandle};

/// Parse one complete type expression
pub fn parse_type(text: &str, type_references: &[u64]) -> Result<TypeDesc> {
    let mut parser = TypeParser {
        input: text.as_bytes(),
        pos: 0,
        type_references,
    };
    let desc = parser.ty()?;
    parser.skip_space();
    if parser.pos != parser.input.len() {
        bail!("unexpected '{}' in type '{}'", &text[parser.pos..], text);
    }
    Ok(desc)
}

struct TypeParser<'a> {
    input: &'a [u8],
    pos: usize,
    type_references: &'a [u64],
}

impl TypeParser<'_> {
    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn skip_space(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, c: u8) -> bool {
        self.skip_space();
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn ty(&mut self) -> Result<TypeDesc> {
        if self.eat(b'&') {
            return Ok(TypeDesc::ByRef(Box::new(self.ty()?)));
        }
        if self.eat(b'*') {
            return Ok(TypeDesc::Pointer(Box::new(self.ty()?)));
        }

        let mut desc = self.atom()?;
        while self.eat(b'[') {
            if !self.eat(b']') {
                bail!("expected ']' at offset {}", self.pos);
            }
            desc = TypeDesc::Array(Box::new(desc));
        }
        Ok(desc)
    }

    fn atom(&mut self) -> Result<TypeDesc> {
        if self.eat(b'$') {
            let index = self.number()?;
            let raw = self
                .type_references
                .get(index as usize)
                .copied()
                .ok_or_else(|| {
                    anyhow!(
                        "${} out of range: {} type references declared",
                        index,
                        self.type_references.len()
                    )
                })?;
            let handle = TypeDesc::Handle(TypeHandle::from_raw(raw));
            if !self.eat(b'<') {
                return Ok(handle);
            }

            let mut arguments = vec![self.ty()?];
            while self.eat(b',') {
                arguments.push(self.ty()?);
            }
            if !self.eat(b'>') {
                bail!("expected '>' at offset {}", self.pos);
            }
            return Ok(TypeDesc::Instantiation {
                definition: Box::new(handle),
                arguments,
            });
        }

        if self.eat(b'!') {
            let method = self.eat(b'!');
            let index = self.number()?;
            return Ok(TypeDesc::Variable { index, method });
        }

        self.skip_space();
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_alphanumeric()) {
            self.pos += 1;
        }
        let name = std::str::from_utf8(&self.input[start..self.pos])?;
        if name.is_empty() {
            bail!("expected a type at offset {}", start);
        }
        ElementType::from_name(name)
            .map(TypeDesc::Primitive)
            .ok_or_else(|| anyhow!("unknown type '{}'", name))
    }

    fn number(&mut self) -> Result<u32> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        let digits = std::str::from_utf8(&self.input[start..self.pos])?;
        digits
            .parse()
            .map_err(|_| anyhow!("expected a number at offset {}", start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn prim(e: ElementType) -> TypeDesc {
        TypeDesc::Primitive(e)
    }

    #[rstest]
    #[case("i32", prim(ElementType::I4))]
    #[case(" string ", prim(ElementType::String))]
    #[case("&i64", TypeDesc::ByRef(Box::new(prim(ElementType::I8))))]
    #[case("*u8", TypeDesc::Pointer(Box::new(prim(ElementType::U1))))]
    #[case("f64[][]", TypeDesc::Array(Box::new(TypeDesc::Array(Box::new(prim(ElementType::R8))))))]
    #[case("!1", TypeDesc::Variable { index: 1, method: false })]
    #[case("!!0", TypeDesc::Variable { index: 0, method: true })]
    fn test_parse(#[case] text: &str, #[case] expected: TypeDesc) {
        assert_eq!(parse_type(text, &[]).unwrap(), expected);
    }

    #[test]
    fn test_references_and_instantiation() {
        let refs = [0x1000, 0x2000];
        assert_eq!(
            parse_type("$1", &refs).unwrap(),
            TypeDesc::Handle(TypeHandle::from_raw(0x2000))
        );
        assert_eq!(
            parse_type("$0<i32, $1[]>", &refs).unwrap(),
            TypeDesc::Instantiation {
                definition: Box::new(TypeDesc::Handle(TypeHandle::from_raw(0x1000))),
                arguments: vec![
                    prim(ElementType::I4),
                    TypeDesc::Array(Box::new(TypeDesc::Handle(TypeHandle::from_raw(0x2000)))),
                ],
            }
        );
    }

    #[rstest]
    #[case("")]
    #[case("int")]
    #[case("$2")]
    #[case("$0<i32")]
    #[case("i32[")]
    #[case("i32 u8")]
    #[case("!x")]
    fn test_parse_errors(#[case] text: &str) {
        assert!(parse_type(text, &[0x1000]).is_err());
    }
}
