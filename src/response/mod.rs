//! Generic tree view of the remote compiler's reply
//!
//! The pipeline only needs `{tag, value, attributes}` nodes, so parsing sits
//! behind `ResponseTreeParser`. `XmlTreeParser` is the shipped implementation.

use std::collections::BTreeMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

/// Errors from parsing a response body
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed response body: {0}")]
    Malformed(String),

    #[error("response body has no root element")]
    Empty,
}

/// Node value: either text content or nested nodes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeValue {
    Text(String),
    Children(Vec<ResponseNode>),
}

/// One element of the response tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseNode {
    pub tag: String,
    pub value: NodeValue,
    pub attributes: BTreeMap<String, String>,
}

impl ResponseNode {
    pub fn text(tag: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            value: NodeValue::Text(value.into()),
            attributes: BTreeMap::new(),
        }
    }

    pub fn parent(tag: impl Into<String>, children: Vec<ResponseNode>) -> Self {
        Self {
            tag: tag.into(),
            value: NodeValue::Children(children),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Text content, or `None` for a node with children
    pub fn text_value(&self) -> Option<&str> {
        match &self.value {
            NodeValue::Text(text) => Some(text),
            NodeValue::Children(_) => None,
        }
    }

    /// Child nodes; empty for a text node
    pub fn children(&self) -> &[ResponseNode] {
        match &self.value {
            NodeValue::Children(children) => children,
            NodeValue::Text(_) => &[],
        }
    }

    /// First child with `tag`
    pub fn child(&self, tag: &str) -> Option<&ResponseNode> {
        self.children().iter().find(|c| c.tag == tag)
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// Turns a response body into the children of its root node
pub trait ResponseTreeParser: Send + Sync {
    fn parse(&self, body: &[u8]) -> Result<Vec<ResponseNode>, ParseError>;
}

/// XML implementation of `ResponseTreeParser`
///
/// An element with child elements becomes `Children` (interleaved text is
/// dropped); any other element becomes `Text` with its unescaped content.
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlTreeParser;

struct OpenElement {
    tag: String,
    attributes: BTreeMap<String, String>,
    children: Vec<ResponseNode>,
    text: String,
}

impl OpenElement {
    fn from_start(start: &BytesStart<'_>) -> Result<Self, ParseError> {
        let tag = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut attributes = BTreeMap::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| ParseError::Malformed(e.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| ParseError::Malformed(e.to_string()))?;
            attributes.insert(key, value.into_owned());
        }

        Ok(Self {
            tag,
            attributes,
            children: Vec::new(),
            text: String::new(),
        })
    }

    fn close(self) -> ResponseNode {
        let value = if self.children.is_empty() {
            NodeValue::Text(self.text)
        } else {
            NodeValue::Children(self.children)
        };
        ResponseNode {
            tag: self.tag,
            value,
            attributes: self.attributes,
        }
    }
}

impl ResponseTreeParser for XmlTreeParser {
    fn parse(&self, body: &[u8]) -> Result<Vec<ResponseNode>, ParseError> {
        let mut reader = Reader::from_reader(body);
        let mut buf = Vec::new();
        let mut stack: Vec<OpenElement> = Vec::new();
        let mut root: Option<ResponseNode> = None;

        loop {
            let event = reader
                .read_event_into(&mut buf)
                .map_err(|e| ParseError::Malformed(e.to_string()))?;

            match event {
                Event::Start(start) => {
                    if root.is_some() {
                        return Err(ParseError::Malformed(
                            "content after root element".to_string(),
                        ));
                    }
                    stack.push(OpenElement::from_start(&start)?);
                }
                Event::Empty(start) => {
                    let node = OpenElement::from_start(&start)?.close();
                    attach(&mut stack, &mut root, node)?;
                }
                Event::End(_) => {
                    let open = stack.pop().ok_or_else(|| {
                        ParseError::Malformed("unbalanced closing tag".to_string())
                    })?;
                    attach(&mut stack, &mut root, open.close())?;
                }
                Event::Text(text) => {
                    let text = text
                        .unescape()
                        .map_err(|e| ParseError::Malformed(e.to_string()))?;
                    if let Some(open) = stack.last_mut() {
                        open.text.push_str(&text);
                    } else if !text.trim().is_empty() {
                        return Err(ParseError::Malformed(
                            "text outside root element".to_string(),
                        ));
                    }
                }
                Event::CData(data) => {
                    if let Some(open) = stack.last_mut() {
                        open.text.push_str(&String::from_utf8_lossy(&data));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        if !stack.is_empty() {
            return Err(ParseError::Malformed("unclosed element".to_string()));
        }

        match root {
            Some(node) => Ok(match node.value {
                NodeValue::Children(children) => children,
                NodeValue::Text(_) => Vec::new(),
            }),
            None => Err(ParseError::Empty),
        }
    }
}

fn attach(
    stack: &mut [OpenElement],
    root: &mut Option<ResponseNode>,
    node: ResponseNode,
) -> Result<(), ParseError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
        return Ok(());
    }
    if root.is_some() {
        return Err(ParseError::Malformed("multiple root elements".to_string()));
    }
    *root = Some(node);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPLY: &str = r#"<?xml version="1.0"?>
<compilationResult>
  <compiledCode>var a=1&lt;2;</compiledCode>
  <warnings>
    <warning type="JSC_UNUSED" file="Input_0" lineno="3" charno="4" line="var x = 1;">unused variable</warning>
  </warnings>
  <errors/>
  <statistics>
    <originalSize>120</originalSize>
    <compileTime>0</compileTime>
  </statistics>
</compilationResult>"#;

    #[test]
    fn test_parse_returns_root_children() {
        let nodes = XmlTreeParser.parse(REPLY.as_bytes()).unwrap();
        let tags: Vec<_> = nodes.iter().map(|n| n.tag.as_str()).collect();
        assert_eq!(tags, vec!["compiledCode", "warnings", "errors", "statistics"]);
    }

    #[test]
    fn test_parse_unescapes_text() {
        let nodes = XmlTreeParser.parse(REPLY.as_bytes()).unwrap();
        assert_eq!(nodes[0].text_value(), Some("var a=1<2;"));
    }

    #[test]
    fn test_parse_attributes_and_nesting() {
        let nodes = XmlTreeParser.parse(REPLY.as_bytes()).unwrap();
        let warning = &nodes[1].children()[0];
        assert_eq!(warning.tag, "warning");
        assert_eq!(warning.attribute("type"), Some("JSC_UNUSED"));
        assert_eq!(warning.attribute("lineno"), Some("3"));
        assert_eq!(warning.attribute("line"), Some("var x = 1;"));
        assert_eq!(warning.text_value(), Some("unused variable"));

        let stats = &nodes[3];
        assert_eq!(
            stats.child("originalSize").and_then(|n| n.text_value()),
            Some("120")
        );
    }

    #[test]
    fn test_empty_element_has_no_children() {
        let nodes = XmlTreeParser.parse(REPLY.as_bytes()).unwrap();
        assert!(nodes[2].children().is_empty());
        assert_eq!(nodes[2].text_value(), Some(""));
    }

    #[test]
    fn test_cdata_is_text() {
        let body = b"<r><compiledCode><![CDATA[if(a<b){}]]></compiledCode></r>";
        let nodes = XmlTreeParser.parse(body).unwrap();
        assert_eq!(nodes[0].text_value(), Some("if(a<b){}"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(XmlTreeParser.parse(b""), Err(ParseError::Empty)));
        assert!(XmlTreeParser.parse(b"<a><b></a>").is_err());
        assert!(XmlTreeParser.parse(b"<a>").is_err());
        assert!(XmlTreeParser.parse(b"<a/><b/>").is_err());
    }
}
