//! Lightweight WSDL catalogue.
//!
//! Not a schema compiler: the scan only records what the client needs to
//! dispatch by name. That is the operations of each binding (with their
//! SOAP action) and the direct sequence children of each top-level schema
//! element, which is enough to build zero-valued request records. Request
//! elements are assumed to carry the operation's name, as in every ONVIF
//! definition.

use crate::envelope::{attribute, local_name_str};
use crate::error::TransportError;
use crate::record::Record;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

/// One operation of a binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationInfo {
    pub name: String,
    pub soap_action: Option<String>,
}

/// Operations and request shapes read from one definition file.
#[derive(Debug, Clone, Default)]
pub struct WsdlDocument {
    pub target_namespace: Option<String>,
    bindings: HashMap<String, Vec<OperationInfo>>,
    elements: HashMap<String, Vec<String>>,
}

impl WsdlDocument {
    pub fn load(path: &Path) -> Result<Self, TransportError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TransportError::Definition(format!("{}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    pub fn parse(xml: &str) -> Result<Self, TransportError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut doc = WsdlDocument::default();
        // Local names of the open elements
        let mut stack: Vec<String> = Vec::new();
        let mut current_binding: Option<String> = None;
        let mut current_element: Option<String> = None;
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) => {
                    doc.visit(e, &stack, &mut current_binding, &mut current_element);
                    stack.push(local_name_str(e));
                }

                Ok(Event::Empty(ref e)) => {
                    doc.visit(e, &stack, &mut current_binding, &mut current_element);
                }

                Ok(Event::End(_)) => {
                    if let Some(name) = stack.pop() {
                        let parent = stack.last().map(String::as_str);
                        if name == "binding" && parent == Some("definitions") {
                            current_binding = None;
                        }
                        if name == "element" && parent == Some("schema") {
                            current_element = None;
                        }
                    }
                }

                Ok(Event::Eof) => break,

                Err(e) => {
                    return Err(TransportError::Definition(format!(
                        "WSDL parse error: {}",
                        e
                    )));
                }

                _ => {}
            }

            buf.clear();
        }

        Ok(doc)
    }

    fn visit(
        &mut self,
        e: &BytesStart,
        stack: &[String],
        current_binding: &mut Option<String>,
        current_element: &mut Option<String>,
    ) {
        let local_name = local_name_str(e);
        let parent = stack.last().map(String::as_str);

        match (local_name.as_str(), parent) {
            ("schema", _) => {
                if self.target_namespace.is_none() {
                    self.target_namespace = attribute(e, "targetNamespace");
                }
            }
            ("binding", Some("definitions")) => {
                if let Some(name) = attribute(e, "name") {
                    self.bindings.entry(name.clone()).or_default();
                    *current_binding = Some(name);
                }
            }
            ("operation", Some("binding")) => {
                if let (Some(binding), Some(name)) = (current_binding.as_ref(), attribute(e, "name")) {
                    if let Some(ops) = self.bindings.get_mut(binding) {
                        ops.push(OperationInfo {
                            name,
                            soap_action: None,
                        });
                    }
                }
            }
            ("operation", Some("operation")) => {
                // soap:operation inside wsdl:operation
                if let Some(binding) = current_binding.as_ref() {
                    let action = attribute(e, "soapAction");
                    if let Some(op) = self.bindings.get_mut(binding).and_then(|ops| ops.last_mut()) {
                        op.soap_action = action.filter(|a| !a.is_empty());
                    }
                }
            }
            ("element", Some("schema")) => {
                if let Some(name) = attribute(e, "name") {
                    self.elements.entry(name.clone()).or_default();
                    *current_element = Some(name);
                }
            }
            ("element", Some("sequence")) => {
                let nested = stack.iter().filter(|n| n.as_str() == "element").count();
                if let (Some(owner), 1) = (current_element.as_ref(), nested) {
                    let field = attribute(e, "name").or_else(|| {
                        attribute(e, "ref").map(|r| match r.split_once(':') {
                            Some((_, local)) => local.to_string(),
                            None => r,
                        })
                    });
                    if let (Some(field), Some(fields)) = (field, self.elements.get_mut(owner)) {
                        fields.push(field);
                    }
                }
            }
            _ => {}
        }
    }

    /// Operations of a binding, `None` if the binding is not declared.
    pub fn binding(&self, binding_id: &str) -> Option<&[OperationInfo]> {
        self.bindings.get(binding_id).map(Vec::as_slice)
    }

    pub fn binding_names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    /// Direct child element names of a top-level schema element.
    pub fn fields(&self, element: &str) -> Option<&[String]> {
        self.elements.get(element).map(Vec::as_slice)
    }

    /// Record with every field of `element` set to null.
    pub fn empty_element(&self, element: &str) -> Option<Record> {
        self.fields(element)
            .map(|fields| fields.iter().map(|f| (f.clone(), Value::Null)).collect())
    }
}
