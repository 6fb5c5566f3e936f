// src/koji/xmlrpc.rs

//! Minimal XML-RPC codec for the Koji hub
//!
//! Supports the value types Koji actually sends, including the `nil` and
//! `i8` extensions, plus `system.multicall` result unpacking.

use crate::error::{Error, Result};
use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::Event;
use std::collections::BTreeMap;

/// An XML-RPC value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Boolean(bool),
    String(String),
    Double(f64),
    DateTime(String),
    Base64(String),
    Nil,
    Array(Vec<Value>),
    Struct(BTreeMap<String, Value>),
}

impl Value {
    /// Struct from `(name, value)` pairs
    pub fn structure<K: Into<String>>(members: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Struct(members.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Struct(members) => Some(members),
            _ => None,
        }
    }

    /// Struct member lookup
    pub fn get(&self, member: &str) -> Option<&Value> {
        self.as_struct().and_then(|m| m.get(member))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Int(v as i64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

/// A fault returned by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub code: i64,
    pub message: String,
}

impl Fault {
    fn from_value(value: &Value) -> Self {
        Self {
            code: value.get("faultCode").and_then(Value::as_i64).unwrap_or(-1),
            message: value
                .get("faultString")
                .and_then(Value::as_str)
                .unwrap_or("unknown fault")
                .to_string(),
        }
    }
}

impl From<Fault> for Error {
    fn from(fault: Fault) -> Self {
        Error::Fault {
            code: fault.code,
            message: fault.message,
        }
    }
}

/// Serialize a method call
pub fn encode_call(method: &str, params: &[Value]) -> String {
    let mut out = String::with_capacity(256);
    out.push_str("<?xml version=\"1.0\"?>\n<methodCall><methodName>");
    out.push_str(&escape(method));
    out.push_str("</methodName><params>");
    for param in params {
        out.push_str("<param>");
        write_value(&mut out, param);
        out.push_str("</param>");
    }
    out.push_str("</params></methodCall>\n");
    out
}

fn write_value(out: &mut String, value: &Value) {
    out.push_str("<value>");
    match value {
        Value::Int(i) => {
            // Koji accepts i8 for IDs past the i4 range
            let tag = if i32::try_from(*i).is_ok() { "int" } else { "i8" };
            out.push_str(&format!("<{tag}>{i}</{tag}>"));
        }
        Value::Boolean(b) => {
            out.push_str(if *b { "<boolean>1</boolean>" } else { "<boolean>0</boolean>" });
        }
        Value::String(s) => {
            out.push_str("<string>");
            out.push_str(&escape(s.as_str()));
            out.push_str("</string>");
        }
        Value::Double(d) => out.push_str(&format!("<double>{}</double>", d)),
        Value::DateTime(s) => {
            out.push_str("<dateTime.iso8601>");
            out.push_str(&escape(s.as_str()));
            out.push_str("</dateTime.iso8601>");
        }
        Value::Base64(s) => {
            out.push_str("<base64>");
            out.push_str(s);
            out.push_str("</base64>");
        }
        Value::Nil => out.push_str("<nil/>"),
        Value::Array(items) => {
            out.push_str("<array><data>");
            for item in items {
                write_value(out, item);
            }
            out.push_str("</data></array>");
        }
        Value::Struct(members) => {
            out.push_str("<struct>");
            for (name, member) in members {
                out.push_str("<member><name>");
                out.push_str(&escape(name.as_str()));
                out.push_str("</name>");
                write_value(out, member);
                out.push_str("</member>");
            }
            out.push_str("</struct>");
        }
    }
    out.push_str("</value>");
}

/// Parse a method response into its single return value
///
/// A `<fault>` response is returned as [`Error::Fault`].
pub fn decode_response(xml: &str) -> Result<Value> {
    let mut parser = Parser::new(xml);
    parser.expect_open("methodResponse")?;

    match parser.next_structural()? {
        Token::Open(name) if name == "params" => {
            parser.expect_open("param")?;
            parser.expect_open("value")?;
            let value = parser.value_body()?;
            parser.expect_close("param")?;
            parser.expect_close("params")?;
            Ok(value)
        }
        Token::Open(name) if name == "fault" => {
            parser.expect_open("value")?;
            let value = parser.value_body()?;
            Err(Fault::from_value(&value).into())
        }
        other => Err(unexpected("<params> or <fault>", &other)),
    }
}

/// Split a `system.multicall` result into per-call outcomes
///
/// Each successful call is wrapped in a one-element array; failed calls are
/// fault structs.
pub fn unpack_multicall(value: Value) -> Result<Vec<std::result::Result<Value, Fault>>> {
    let Value::Array(items) = value else {
        return Err(Error::XmlRpc("multicall result is not an array".to_string()));
    };

    items
        .into_iter()
        .map(|item| match item {
            Value::Array(mut inner) if inner.len() == 1 => Ok(Ok(inner.remove(0))),
            fault @ Value::Struct(_) => Ok(Err(Fault::from_value(&fault))),
            other => Err(Error::XmlRpc(format!(
                "unexpected multicall entry: {:?}",
                other
            ))),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open(String),
    Close(String),
    Empty(String),
    Text(String),
    Eof,
}

fn unexpected(wanted: &str, got: &Token) -> Error {
    Error::XmlRpc(format!("expected {}, found {:?}", wanted, got))
}

struct Parser<'a> {
    reader: Reader<&'a [u8]>,
}

impl<'a> Parser<'a> {
    fn new(xml: &'a str) -> Self {
        Self {
            reader: Reader::from_str(xml),
        }
    }

    fn next(&mut self) -> Result<Token> {
        loop {
            let event = self
                .reader
                .read_event()
                .map_err(|e| Error::XmlRpc(format!("malformed XML: {}", e)))?;

            return Ok(match event {
                Event::Start(e) => Token::Open(String::from_utf8_lossy(e.name().as_ref()).into_owned()),
                Event::End(e) => Token::Close(String::from_utf8_lossy(e.name().as_ref()).into_owned()),
                Event::Empty(e) => Token::Empty(String::from_utf8_lossy(e.name().as_ref()).into_owned()),
                Event::Text(t) => Token::Text(
                    t.unescape()
                        .map_err(|e| Error::XmlRpc(format!("bad text: {}", e)))?
                        .into_owned(),
                ),
                Event::CData(c) => Token::Text(String::from_utf8_lossy(&c.into_inner()).into_owned()),
                Event::Eof => Token::Eof,
                _ => continue,
            });
        }
    }

    /// Next token that is not inter-element whitespace
    fn next_structural(&mut self) -> Result<Token> {
        loop {
            match self.next()? {
                Token::Text(t) if t.trim().is_empty() => continue,
                token => return Ok(token),
            }
        }
    }

    fn expect_open(&mut self, name: &str) -> Result<()> {
        match self.next_structural()? {
            Token::Open(n) if n == name => Ok(()),
            other => Err(unexpected(&format!("<{}>", name), &other)),
        }
    }

    fn expect_close(&mut self, name: &str) -> Result<()> {
        match self.next_structural()? {
            Token::Close(n) if n == name => Ok(()),
            other => Err(unexpected(&format!("</{}>", name), &other)),
        }
    }

    /// Text content up to the closing tag
    fn text_until_close(&mut self, name: &str) -> Result<String> {
        let mut text = String::new();
        loop {
            match self.next()? {
                Token::Text(t) => text.push_str(&t),
                Token::Close(n) if n == name => return Ok(text),
                other => return Err(unexpected(&format!("text or </{}>", name), &other)),
            }
        }
    }

    /// Parse what follows an opening `<value>`, consuming `</value>`
    fn value_body(&mut self) -> Result<Value> {
        let mut bare = String::new();
        loop {
            match self.next()? {
                Token::Text(t) => bare.push_str(&t),
                // Untyped values are strings
                Token::Close(n) if n == "value" => return Ok(Value::String(bare)),
                Token::Empty(kind) => {
                    let value = empty_value(&kind)?;
                    self.expect_close("value")?;
                    return Ok(value);
                }
                Token::Open(kind) => {
                    let value = self.typed_value(&kind)?;
                    self.expect_close("value")?;
                    return Ok(value);
                }
                other => return Err(unexpected("value content", &other)),
            }
        }
    }

    fn typed_value(&mut self, kind: &str) -> Result<Value> {
        match kind {
            "int" | "i4" | "i8" => {
                let text = self.text_until_close(kind)?;
                text.trim()
                    .parse()
                    .map(Value::Int)
                    .map_err(|_| Error::XmlRpc(format!("bad integer: {}", text)))
            }
            "boolean" => match self.text_until_close(kind)?.trim() {
                "1" => Ok(Value::Boolean(true)),
                "0" => Ok(Value::Boolean(false)),
                other => Err(Error::XmlRpc(format!("bad boolean: {}", other))),
            },
            "double" => {
                let text = self.text_until_close(kind)?;
                text.trim()
                    .parse()
                    .map(Value::Double)
                    .map_err(|_| Error::XmlRpc(format!("bad double: {}", text)))
            }
            "string" => Ok(Value::String(self.text_until_close(kind)?)),
            "dateTime.iso8601" => Ok(Value::DateTime(self.text_until_close(kind)?.trim().to_string())),
            "base64" => Ok(Value::Base64(self.text_until_close(kind)?.trim().to_string())),
            "nil" => {
                self.expect_close("nil")?;
                Ok(Value::Nil)
            }
            "array" => self.array(),
            "struct" => self.structure(),
            other => Err(Error::XmlRpc(format!("unsupported value type: {}", other))),
        }
    }

    fn array(&mut self) -> Result<Value> {
        let mut items = Vec::new();
        match self.next_structural()? {
            Token::Empty(n) if n == "data" => {}
            Token::Open(n) if n == "data" => loop {
                match self.next_structural()? {
                    Token::Open(n) if n == "value" => items.push(self.value_body()?),
                    Token::Empty(n) if n == "value" => items.push(Value::String(String::new())),
                    Token::Close(n) if n == "data" => break,
                    other => return Err(unexpected("<value> or </data>", &other)),
                }
            },
            other => return Err(unexpected("<data>", &other)),
        }
        self.expect_close("array")?;
        Ok(Value::Array(items))
    }

    fn structure(&mut self) -> Result<Value> {
        let mut members = BTreeMap::new();
        loop {
            match self.next_structural()? {
                Token::Open(n) if n == "member" => {
                    self.expect_open("name")?;
                    let name = self.text_until_close("name")?;
                    let value = match self.next_structural()? {
                        Token::Open(n) if n == "value" => self.value_body()?,
                        Token::Empty(n) if n == "value" => Value::String(String::new()),
                        other => return Err(unexpected("<value>", &other)),
                    };
                    self.expect_close("member")?;
                    members.insert(name, value);
                }
                Token::Close(n) if n == "struct" => return Ok(Value::Struct(members)),
                other => return Err(unexpected("<member> or </struct>", &other)),
            }
        }
    }
}

fn empty_value(kind: &str) -> Result<Value> {
    match kind {
        "nil" => Ok(Value::Nil),
        "string" => Ok(Value::String(String::new())),
        "array" => Ok(Value::Array(Vec::new())),
        "struct" => Ok(Value::Struct(BTreeMap::new())),
        other => Err(Error::XmlRpc(format!("empty <{}/> has no value", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_call() {
        let xml = encode_call(
            "queryRPMSigs",
            &[Value::from(42i64), Value::from("95a43f54")],
        );
        assert!(xml.contains("<methodName>queryRPMSigs</methodName>"));
        assert!(xml.contains("<param><value><int>42</int></value></param>"));
        assert!(xml.contains("<param><value><string>95a43f54</string></value></param>"));
    }

    #[test]
    fn test_encode_escapes_and_large_ints() {
        let xml = encode_call(
            "getBuild",
            &[Value::from("a<b&c"), Value::Int(5_000_000_000), Value::Nil],
        );
        assert!(xml.contains("<string>a&lt;b&amp;c</string>"));
        assert!(xml.contains("<i8>5000000000</i8>"));
        assert!(xml.contains("<value><nil/></value>"));
    }

    #[test]
    fn test_decode_struct_array_response() {
        let xml = r#"<?xml version='1.0'?>
<methodResponse>
<params>
<param>
<value><array><data>
<value><struct>
<member>
<name>id</name>
<value><int>1001</int></value>
</member>
<member>
<name>nvr</name>
<value><string>foo-1.0-1.fc22</string></value>
</member>
<member>
<name>arch</name>
<value>x86_64</value>
</member>
<member>
<name>external_repo_id</name>
<value><nil/></value>
</member>
</struct></value>
</data></array></value>
</param>
</params>
</methodResponse>"#;

        let value = decode_response(xml).unwrap();
        let items = value.as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].get("id").and_then(Value::as_i64), Some(1001));
        assert_eq!(items[0].get("nvr").and_then(Value::as_str), Some("foo-1.0-1.fc22"));
        assert_eq!(items[0].get("arch").and_then(Value::as_str), Some("x86_64"));
        assert!(items[0].get("external_repo_id").unwrap().is_nil());
    }

    #[test]
    fn test_decode_fault() {
        let xml = r#"<?xml version='1.0'?>
<methodResponse><fault><value><struct>
<member><name>faultCode</name><value><int>1000</int></value></member>
<member><name>faultString</name><value><string>No such build: &apos;x&apos;</string></value></member>
</struct></value></fault></methodResponse>"#;

        match decode_response(xml) {
            Err(Error::Fault { code, message }) => {
                assert_eq!(code, 1000);
                assert_eq!(message, "No such build: 'x'");
            }
            other => panic!("expected fault, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_nil_and_empty_values() {
        let xml = "<methodResponse><params><param><value><nil/></value></param></params></methodResponse>";
        assert_eq!(decode_response(xml).unwrap(), Value::Nil);

        let xml = "<methodResponse><params><param><value></value></param></params></methodResponse>";
        assert_eq!(decode_response(xml).unwrap(), Value::String(String::new()));

        let xml = "<methodResponse><params><param><value><array><data/></array></value></param></params></methodResponse>";
        assert_eq!(decode_response(xml).unwrap(), Value::Array(Vec::new()));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_response("<html><body>502 Bad Gateway</body></html>"),
            Err(Error::XmlRpc(_))
        ));
    }

    #[test]
    fn test_unpack_multicall() {
        let value = Value::Array(vec![
            Value::Array(vec![Value::Array(Vec::new())]),
            Value::structure([
                ("faultCode", Value::Int(1)),
                ("faultString", Value::from("ActionNotAllowed")),
            ]),
        ]);

        let results = unpack_multicall(value).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], Ok(Value::Array(Vec::new())));
        assert_eq!(
            results[1],
            Err(Fault {
                code: 1,
                message: "ActionNotAllowed".to_string()
            })
        );
    }
}
