//! A small owned XML tree over the `quick-xml` tokenizer.
//!
//! `quick-xml` deliberately ships events, not a DOM; the deposit builder
//! needs to descend, count, and rewrite elements, so we build the minimum
//! tree that supports that. Namespaces are resolved at parse time through an
//! xmlns-binding stack; attributes keep their raw qualified names so
//! serialization round-trips declarations unchanged.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

/// XML declaration fields, kept verbatim for validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prolog {
    pub version: String,
    pub encoding: Option<String>,
    pub standalone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub prolog: Option<Prolog>,
    pub root: Element,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub prefix: Option<String>,
    pub local: String,
    /// Namespace URI resolved from the xmlns bindings in scope.
    pub ns: Option<String>,
    /// Raw qualified attribute names to unescaped values, in document order.
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    /// A namespaced element with no attributes or children.
    pub fn new(local: &str, ns: &str) -> Element {
        Element {
            prefix: None,
            local: local.to_owned(),
            ns: Some(ns.to_owned()),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn qname(&self) -> String {
        match &self.prefix {
            Some(p) => format!("{p}:{}", self.local),
            None => self.local.clone(),
        }
    }

    /// Local-name and namespace match. `ns: None` matches any namespace.
    pub fn is(&self, local: &str, ns: Option<&str>) -> bool {
        self.local == local && ns.map_or(true, |u| self.ns.as_deref() == Some(u))
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Replace an attribute in place, or append it.
    pub fn set_attr(&mut self, key: &str, value: &str) {
        match self.attrs.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value.to_owned(),
            None => self.attrs.push((key.to_owned(), value.to_owned())),
        }
    }

    pub fn remove_attr(&mut self, key: &str) {
        self.attrs.retain(|(k, _)| k != key);
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            _ => None,
        })
    }

    pub fn find_child(&self, local: &str, ns: Option<&str>) -> Option<&Element> {
        self.child_elements().find(|e| e.is(local, ns))
    }

    /// Concatenated direct text content.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for node in &self.children {
            if let Node::Text(t) = node {
                out.push_str(t);
            }
        }
        out
    }

    /// Replace all children with a single text node.
    pub fn set_text(&mut self, text: &str) {
        self.children = vec![Node::Text(text.to_owned())];
    }
}

// ── tree traversal ────────────────────────────────────────────────────

/// Preorder visit of `el` and every descendant element.
pub fn walk<'a>(el: &'a Element, f: &mut impl FnMut(&'a Element)) {
    f(el);
    for node in &el.children {
        if let Node::Element(e) = node {
            walk(e, f);
        }
    }
}

/// Preorder visit with mutation.
pub fn walk_mut(el: &mut Element, f: &mut impl FnMut(&mut Element)) {
    f(el);
    for node in el.children.iter_mut() {
        if let Node::Element(e) = node {
            walk_mut(e, f);
        }
    }
}

/// Number of descendant elements (excluding `el` itself) matching.
pub fn count_descendants(el: &Element, local: &str, ns: Option<&str>) -> usize {
    let mut count = 0;
    walk(el, &mut |e| {
        if !std::ptr::eq(e, el) && e.is(local, ns) {
            count += 1;
        }
    });
    count
}

/// First matching element in preorder, `el` itself included.
pub fn find_descendant_mut<'a>(
    el: &'a mut Element,
    local: &str,
    ns: Option<&str>,
) -> Option<&'a mut Element> {
    if el.is(local, ns) {
        return Some(el);
    }
    for node in el.children.iter_mut() {
        if let Node::Element(e) = node {
            if let Some(found) = find_descendant_mut(e, local, ns) {
                return Some(found);
            }
        }
    }
    None
}

/// Remove every descendant element matching (at any depth below `el`).
pub fn remove_descendants(el: &mut Element, local: &str, ns: Option<&str>) {
    el.children.retain(|n| match n {
        Node::Element(e) => !e.is(local, ns),
        _ => true,
    });
    for node in el.children.iter_mut() {
        if let Node::Element(e) = node {
            remove_descendants(e, local, ns);
        }
    }
}

// ── parsing ───────────────────────────────────────────────────────────

/// Parse a UTF-8 XML document into a tree. Comments, processing
/// instructions, and doctypes are dropped; text (including whitespace
/// between elements) is preserved.
pub fn parse(input: &str) -> Result<Document, String> {
    let mut reader = Reader::from_str(input);
    let mut prolog: Option<Prolog> = None;
    let mut root: Option<Element> = None;
    let mut stack: Vec<Element> = Vec::new();
    let mut ns_stack: Vec<Vec<(Option<String>, String)>> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Decl(d)) => {
                let version = decode_decl_field(d.version().map(Some))?;
                let encoding = match d.encoding() {
                    Some(v) => Some(decode_decl_field(v.map(Some))?),
                    None => None,
                };
                let standalone = match d.standalone() {
                    Some(v) => Some(decode_decl_field(v.map(Some))?),
                    None => None,
                };
                prolog = Some(Prolog {
                    version,
                    encoding,
                    standalone,
                });
            }
            Ok(Event::Start(e)) => {
                let el = open_element(&e, &mut ns_stack)?;
                stack.push(el);
            }
            Ok(Event::Empty(e)) => {
                let el = open_element(&e, &mut ns_stack)?;
                ns_stack.pop();
                attach(el, &mut stack, &mut root)?;
            }
            Ok(Event::End(_)) => {
                let el = stack.pop().ok_or_else(|| "unbalanced end tag".to_owned())?;
                ns_stack.pop();
                attach(el, &mut stack, &mut root)?;
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().map_err(|e| e.to_string())?.into_owned();
                match stack.last_mut() {
                    Some(top) => top.children.push(Node::Text(text)),
                    None if text.trim().is_empty() => {}
                    None => return Err("text outside the root element".to_owned()),
                }
            }
            Ok(Event::CData(c)) => {
                let text = String::from_utf8_lossy(c.as_ref()).into_owned();
                if let Some(top) = stack.last_mut() {
                    top.children.push(Node::Text(text));
                }
            }
            Ok(Event::Comment(_)) | Ok(Event::PI(_)) | Ok(Event::DocType(_)) => {}
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("XML not well-formed: {e}")),
        }
    }

    if !stack.is_empty() {
        return Err("unclosed element".to_owned());
    }
    let root = root.ok_or_else(|| "document has no root element".to_owned())?;
    Ok(Document { prolog, root })
}

fn decode_decl_field<E: std::fmt::Display>(
    field: Result<Option<std::borrow::Cow<'_, [u8]>>, E>,
) -> Result<String, String> {
    match field.map_err(|e| e.to_string())? {
        Some(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        None => Err("malformed XML declaration".to_owned()),
    }
}

fn attach(el: Element, stack: &mut Vec<Element>, root: &mut Option<Element>) -> Result<(), String> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(Node::Element(el));
            Ok(())
        }
        None if root.is_some() => Err("multiple root elements".to_owned()),
        None => {
            *root = Some(el);
            Ok(())
        }
    }
}

fn open_element(
    start: &BytesStart<'_>,
    ns_stack: &mut Vec<Vec<(Option<String>, String)>>,
) -> Result<Element, String> {
    let mut attrs = Vec::new();
    let mut scope: Vec<(Option<String>, String)> = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| e.to_string())?
            .into_owned();
        if key == "xmlns" {
            scope.push((None, value.clone()));
        } else if let Some(p) = key.strip_prefix("xmlns:") {
            scope.push((Some(p.to_owned()), value.clone()));
        }
        attrs.push((key, value));
    }
    ns_stack.push(scope);

    let raw = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let (prefix, local) = match raw.split_once(':') {
        Some((p, l)) => (Some(p.to_owned()), l.to_owned()),
        None => (None, raw),
    };
    let ns = resolve_ns(prefix.as_deref(), ns_stack);
    Ok(Element {
        prefix,
        local,
        ns,
        attrs,
        children: Vec::new(),
    })
}

fn resolve_ns(prefix: Option<&str>, ns_stack: &[Vec<(Option<String>, String)>]) -> Option<String> {
    for scope in ns_stack.iter().rev() {
        for (p, uri) in scope.iter().rev() {
            if p.as_deref() == prefix {
                if uri.is_empty() {
                    return None;
                }
                return Some(uri.clone());
            }
        }
    }
    None
}

// ── serialization ─────────────────────────────────────────────────────

/// Serialize an element subtree (no XML declaration).
pub fn serialize(root: &Element) -> Result<String, String> {
    let mut writer = Writer::new(Vec::new());
    write_element(&mut writer, root)?;
    String::from_utf8(writer.into_inner()).map_err(|e| e.to_string())
}

fn write_element(writer: &mut Writer<Vec<u8>>, el: &Element) -> Result<(), String> {
    let name = el.qname();
    let mut start = BytesStart::new(name.clone());
    for (k, v) in &el.attrs {
        start.push_attribute((k.as_str(), v.as_str()));
    }
    if el.children.is_empty() {
        writer
            .write_event(Event::Empty(start))
            .map_err(|e| e.to_string())
    } else {
        writer
            .write_event(Event::Start(start))
            .map_err(|e| e.to_string())?;
        for node in &el.children {
            match node {
                Node::Element(e) => write_element(writer, e)?,
                Node::Text(t) => writer
                    .write_event(Event::Text(BytesText::new(t)))
                    .map_err(|e| e.to_string())?,
            }
        }
        writer
            .write_event(Event::End(BytesEnd::new(name)))
            .map_err(|e| e.to_string())
    }
}
