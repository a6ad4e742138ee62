//! SOAP envelope writing and response decoding.
//!
//! Responses are read with quick-xml, which never expands entities; DOCTYPE
//! and ENTITY declarations are refused outright before parsing.

use crate::auth::SecurityHeader;
use crate::config::SoapVersion;
use crate::error::TransportError;
use crate::record::{Record, TEXT_KEY};
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::Value;

/// SOAP namespace URIs.
pub const SOAP_11_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const SOAP_12_NS: &str = "http://www.w3.org/2003/05/soap-envelope";
/// ONVIF common schema namespace, bound to the `tt` prefix in requests.
pub const ONVIF_SCHEMA_NS: &str = "http://www.onvif.org/ver10/schema";

/// Render a request envelope.
///
/// The operation element declares `namespace` as its default namespace, so
/// unprefixed fields are qualified by it. Keys prefixed with `tt:` are bound
/// to the ONVIF schema namespace, keys starting with `@` become attributes
/// and `$value` holds text content.
pub fn write_request(
    version: SoapVersion,
    security: &SecurityHeader,
    namespace: &str,
    operation: &str,
    params: &Record,
) -> Result<String, TransportError> {
    check_name(operation)?;

    let mut body = String::new();
    for (name, value) in params {
        write_value(&mut body, name, value)?;
    }

    let op = if body.is_empty() {
        format!("<{} xmlns=\"{}\"/>", operation, escape(namespace))
    } else {
        format!(
            "<{op} xmlns=\"{ns}\">{body}</{op}>",
            op = operation,
            ns = escape(namespace),
            body = body
        )
    };

    Ok(format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="{soap}" xmlns:tt="{tt}"><s:Header>{security}</s:Header><s:Body>{op}</s:Body></s:Envelope>"#,
        soap = version.namespace(),
        tt = ONVIF_SCHEMA_NS,
        security = security.to_xml(),
        op = op
    ))
}

fn write_value(out: &mut String, name: &str, value: &Value) -> Result<(), TransportError> {
    check_name(name)?;
    match value {
        Value::Null => {}
        Value::Array(items) => {
            for item in items {
                write_value(out, name, item)?;
            }
        }
        Value::Object(map) => {
            out.push('<');
            out.push_str(name);
            let mut children = String::new();
            let mut text = None;
            for (key, child) in map {
                if let Some(attr) = key.strip_prefix('@') {
                    check_name(attr)?;
                    if let Some(v) = scalar_text(child) {
                        out.push_str(&format!(" {}=\"{}\"", attr, escape(v.as_str())));
                    }
                } else if key == TEXT_KEY {
                    text = scalar_text(child);
                } else {
                    write_value(&mut children, key, child)?;
                }
            }
            match (text, children.is_empty()) {
                (None, true) => out.push_str("/>"),
                (text, _) => {
                    out.push('>');
                    if let Some(t) = text {
                        out.push_str(&escape(t.as_str()));
                    }
                    out.push_str(&children);
                    out.push_str(&format!("</{}>", name));
                }
            }
        }
        scalar => {
            let text = scalar_text(scalar).unwrap_or_default();
            out.push_str(&format!("<{n}>{t}</{n}>", n = name, t = escape(text.as_str())));
        }
    }
    Ok(())
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Reject names that would break the envelope.
fn check_name(name: &str) -> Result<(), TransportError> {
    let valid = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit() || c == '-' || c == '.')
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'));
    if valid {
        Ok(())
    } else {
        Err(TransportError::InvalidParameters(format!(
            "'{}' is not a valid element name",
            name
        )))
    }
}

/// Element under construction while decoding.
#[derive(Default)]
struct Frame {
    name: String,
    attributes: Record,
    children: Vec<(String, Value)>,
    text: String,
}

impl Frame {
    fn open(e: &BytesStart) -> Self {
        let mut attributes = Record::new();
        for attr in e.attributes().flatten() {
            let key = std::str::from_utf8(attr.key.as_ref()).unwrap_or("");
            if key == "xmlns" || key.starts_with("xmlns:") {
                continue;
            }
            let local = std::str::from_utf8(attr.key.local_name().as_ref())
                .unwrap_or("")
                .to_string();
            let value = attr
                .unescape_value()
                .map(|v| v.into_owned())
                .unwrap_or_default();
            attributes.insert(format!("@{}", local), Value::String(value));
        }
        Self {
            name: local_name_str(e),
            attributes,
            ..Default::default()
        }
    }

    fn into_value(self) -> Value {
        let text = self.text.trim();
        if self.children.is_empty() && self.attributes.is_empty() {
            return if text.is_empty() {
                Value::Null
            } else {
                Value::String(text.to_string())
            };
        }

        let mut map = self.attributes;
        for (name, value) in self.children {
            match map.get_mut(&name) {
                Some(Value::Array(items)) => items.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
                None => {
                    map.insert(name, value);
                }
            }
        }
        if !text.is_empty() {
            map.insert(TEXT_KEY.to_string(), Value::String(text.to_string()));
        }
        Value::Object(map)
    }
}

/// Decode a response envelope into the value of its body.
///
/// A SOAP Fault becomes [`TransportError::Fault`]. A response element with a
/// single child is unwrapped to that child's value, so `GetHostnameResponse`
/// yields the `HostnameInformation` record directly.
///
/// No schema is consulted, so the shape of a list follows the element count:
/// `GetProfilesResponse` with one `Profiles` element decodes to that profile
/// record, with two it decodes to an array of records. Read list-typed
/// results through [`crate::record::items`].
pub fn read_response(data: &[u8]) -> Result<Value, TransportError> {
    let xml_str = std::str::from_utf8(data)
        .map_err(|e| TransportError::Xml(format!("Invalid UTF-8: {}", e)))?;

    check_xxe_patterns(xml_str)?;

    let mut reader = Reader::from_str(xml_str);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Frame> = Vec::new();
    let mut envelope: Option<Value> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => stack.push(Frame::open(e)),

            Ok(Event::Empty(ref e)) => {
                let frame = Frame::open(e);
                close(&mut stack, &mut envelope, frame);
            }

            Ok(Event::End(_)) => {
                if let Some(frame) = stack.pop() {
                    close(&mut stack, &mut envelope, frame);
                }
            }

            Ok(Event::Text(ref e)) => {
                if let Some(frame) = stack.last_mut() {
                    let text = e
                        .unescape()
                        .map_err(|e| TransportError::Xml(e.to_string()))?;
                    frame.text.push_str(&text);
                }
            }

            Ok(Event::CData(e)) => {
                if let Some(frame) = stack.last_mut() {
                    frame
                        .text
                        .push_str(std::str::from_utf8(&e.into_inner()).unwrap_or(""));
                }
            }

            Ok(Event::Eof) => break,

            Err(e) => {
                return Err(TransportError::Xml(format!("XML parse error: {}", e)));
            }

            _ => {}
        }

        buf.clear();
    }

    let envelope = envelope.ok_or_else(|| TransportError::Xml("No SOAP Envelope found".to_string()))?;
    let body = crate::record::field(&envelope, "Body")
        .ok_or_else(|| TransportError::Xml("SOAP Envelope has no Body".to_string()))?;

    let (name, content) = match body {
        Value::Object(map) => match map.iter().find(|(k, _)| !k.starts_with('@')) {
            Some((name, content)) => (name.as_str(), content),
            None => return Ok(Value::Null),
        },
        _ => return Ok(Value::Null),
    };

    if name == "Fault" {
        return Err(fault(content));
    }

    Ok(unwrap_single(content.clone()))
}

fn close(stack: &mut Vec<Frame>, envelope: &mut Option<Value>, frame: Frame) {
    let name = frame.name.clone();
    let value = frame.into_value();
    match stack.last_mut() {
        Some(parent) => parent.children.push((name, value)),
        None if name == "Envelope" => *envelope = Some(value),
        None => {}
    }
}

fn unwrap_single(value: Value) -> Value {
    match value {
        Value::Object(map) if map.len() == 1 && !map.keys().any(|k| k.starts_with('@') || k == TEXT_KEY) => {
            map.into_iter()
                .next()
                .map(|(_, v)| v)
                .unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Extract code and reason from a SOAP 1.1 or 1.2 fault.
fn fault(content: &Value) -> TransportError {
    use crate::record::{get_path, items, text};

    let code = get_path(content, &["Code", "Subcode", "Value"])
        .or_else(|| get_path(content, &["Code", "Value"]))
        .or_else(|| get_path(content, &["faultcode"]))
        .and_then(text)
        .unwrap_or_else(|| "unknown".to_string());

    let reason = get_path(content, &["Reason", "Text"])
        .and_then(|v| items(v).first().and_then(|t| text(t)))
        .or_else(|| get_path(content, &["faultstring"]).and_then(text))
        .unwrap_or_default();

    TransportError::Fault { code, reason }
}

/// Check for XXE attack patterns.
fn check_xxe_patterns(xml: &str) -> Result<(), TransportError> {
    if xml.contains("<!DOCTYPE") || xml.contains("<!doctype") {
        return Err(TransportError::Xml(
            "DOCTYPE declarations are not allowed".to_string(),
        ));
    }

    if xml.contains("<!ENTITY") || xml.contains("<!entity") {
        return Err(TransportError::Xml(
            "Entity declarations are not allowed".to_string(),
        ));
    }

    Ok(())
}

/// Extract local name from element.
pub(crate) fn local_name_str(e: &BytesStart) -> String {
    let name = e.local_name();
    std::str::from_utf8(name.as_ref())
        .unwrap_or("")
        .to_string()
}

/// Value of an attribute, matched by local name.
pub(crate) fn attribute(e: &BytesStart, local: &str) -> Option<String> {
    e.attributes().flatten().find_map(|attr| {
        if attr.key.local_name().as_ref() == local.as_bytes() {
            std::str::from_utf8(&attr.value).ok().map(String::from)
        } else {
            None
        }
    })
}
