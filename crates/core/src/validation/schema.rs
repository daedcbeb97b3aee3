//! Compiled XML Schema.
//!
//! A schema set is loaded from one root XSD file, following `xs:include` and
//! `xs:import` through the local filesystem. Remote schema locations are never
//! fetched; declarations they would have contributed resolve to `anyType`.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const XS_NS: &str = "http://www.w3.org/2001/XMLSchema";
pub const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read schema {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse schema {path}: {message}")]
    Xml { path: PathBuf, message: String },

    #[error("{path} is not an XML Schema document (root element is <{root}>)")]
    NotASchema { path: PathBuf, root: String },

    #[error("invalid schema {path}: {message}")]
    Invalid { path: PathBuf, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QName {
    pub ns: Option<String>,
    pub local: String,
}

impl QName {
    pub fn new(ns: Option<&str>, local: &str) -> Self {
        Self {
            ns: ns.filter(|s| !s.is_empty()).map(str::to_string),
            local: local.to_string(),
        }
    }

    pub fn is_xs(&self) -> bool {
        self.ns.as_deref() == Some(XS_NS)
    }

    pub fn of(node: roxmltree::Node) -> Self {
        let tag = node.tag_name();
        Self::new(tag.namespace(), tag.name())
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ns {
            Some(ns) => write!(f, "{{{}}}{}", ns, self.local),
            None => write!(f, "{}", self.local),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxOccurs {
    Bounded(u32),
    Unbounded,
}

impl MaxOccurs {
    pub fn allows(&self, count: u32) -> bool {
        match self {
            MaxOccurs::Bounded(max) => count < *max,
            MaxOccurs::Unbounded => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Particle {
    pub min: u32,
    pub max: MaxOccurs,
    pub term: Term,
}

impl Particle {
    pub fn is_single(&self) -> bool {
        self.min == 1 && self.max == MaxOccurs::Bounded(1)
    }
}

#[derive(Debug, Clone)]
pub enum Term {
    Element(ElementRef),
    Sequence(Vec<Particle>),
    Choice(Vec<Particle>),
    All(Vec<Particle>),
    Group(QName),
    Any,
}

#[derive(Debug, Clone)]
pub enum ElementRef {
    Global(QName),
    Local(Box<ElementDecl>),
}

#[derive(Debug, Clone)]
pub struct ElementDecl {
    pub name: QName,
    pub type_ref: TypeRef,
    pub is_abstract: bool,
    pub nillable: bool,
    pub substitution_group: Option<QName>,
}

#[derive(Debug, Clone)]
pub enum TypeRef {
    Named(QName),
    Inline(Box<TypeDef>),
    AnyType,
}

#[derive(Debug, Clone)]
pub enum TypeDef {
    Simple(SimpleType),
    Complex(ComplexType),
}

#[derive(Debug, Clone)]
pub enum SimpleVariety {
    Restriction(TypeRef),
    List(TypeRef),
    Union(Vec<TypeRef>),
}

#[derive(Debug, Clone, Default)]
pub struct Facets {
    pub enumeration: Vec<String>,
    pub length: Option<usize>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub min_inclusive: Option<f64>,
    pub max_inclusive: Option<f64>,
    pub min_exclusive: Option<f64>,
    pub max_exclusive: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct SimpleType {
    pub variety: SimpleVariety,
    pub facets: Facets,
}

#[derive(Debug, Clone)]
pub enum Derivation {
    None,
    Extension(QName),
    Restriction(QName),
}

#[derive(Debug, Clone)]
pub enum ContentModel {
    Empty,
    Elements(Particle),
    /// Text content; `None` means the value type comes from the base type.
    Simple(Option<TypeRef>),
}

#[derive(Debug, Clone)]
pub struct ComplexType {
    pub derivation: Derivation,
    pub content: ContentModel,
    pub attributes: Vec<AttributeUse>,
    pub attribute_groups: Vec<QName>,
    pub mixed: bool,
}

#[derive(Debug, Clone)]
pub struct AttributeUse {
    pub name: QName,
    pub type_ref: TypeRef,
    pub required: bool,
    /// Declared with `ref`; the type lives on the global declaration.
    pub by_ref: bool,
}

#[derive(Debug, Clone, Default)]
pub struct AttributeGroup {
    pub attributes: Vec<AttributeUse>,
    pub groups: Vec<QName>,
}

#[derive(Debug, Default)]
pub struct Schema {
    pub(crate) elements: HashMap<QName, ElementDecl>,
    pub(crate) types: HashMap<QName, TypeDef>,
    pub(crate) groups: HashMap<QName, Particle>,
    pub(crate) attribute_groups: HashMap<QName, AttributeGroup>,
    pub(crate) attributes: HashMap<QName, AttributeUse>,
    pub(crate) substitutions: HashMap<QName, Vec<QName>>,
    documents: Vec<PathBuf>,
}

impl Schema {
    /// Loads a schema set rooted at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let mut loader = Loader::default();
        loader.load_file(path.as_ref(), None)?;
        let schema = loader.schema;
        tracing::info!(
            documents = schema.documents.len(),
            elements = schema.elements.len(),
            types = schema.types.len(),
            "schema loaded"
        );
        Ok(schema)
    }

    /// Compiles a single in-memory schema document. Includes and imports are
    /// skipped since there is no base location to resolve them against.
    pub fn parse_str(xsd: &str) -> Result<Self, SchemaError> {
        let mut loader = Loader::default();
        let path = PathBuf::from("<inline>");
        loader.compile_text(xsd, &path, None, None)?;
        Ok(loader.schema)
    }

    pub fn documents(&self) -> &[PathBuf] {
        &self.documents
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    pub fn global_element(&self, name: &QName) -> Option<&ElementDecl> {
        self.elements.get(name)
    }
}

#[derive(Default)]
struct Loader {
    schema: Schema,
    visited: HashSet<PathBuf>,
}

struct DocCtx<'p> {
    path: &'p Path,
    target_ns: Option<String>,
    /// No `targetNamespace` of its own: unprefixed references take the
    /// including document's namespace.
    chameleon: bool,
    elements_qualified: bool,
    attributes_qualified: bool,
}

impl DocCtx<'_> {
    fn invalid(&self, message: impl Into<String>) -> SchemaError {
        SchemaError::Invalid {
            path: self.path.to_path_buf(),
            message: message.into(),
        }
    }
}

fn xs_children<'a, 'input: 'a>(
    node: roxmltree::Node<'a, 'input>,
) -> impl Iterator<Item = roxmltree::Node<'a, 'input>> {
    node.children()
        .filter(|c| c.is_element() && c.tag_name().namespace() == Some(XS_NS))
}

fn is_true(value: Option<&str>) -> bool {
    matches!(value, Some("true") | Some("1"))
}

impl Loader {
    fn load_file(&mut self, path: &Path, inherited_ns: Option<&str>) -> Result<(), SchemaError> {
        let canonical = std::fs::canonicalize(path).map_err(|source| SchemaError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if !self.visited.insert(canonical.clone()) {
            return Ok(());
        }
        let text = std::fs::read_to_string(&canonical).map_err(|source| SchemaError::Io {
            path: canonical.clone(),
            source,
        })?;
        let base = canonical.parent().map(Path::to_path_buf);
        self.compile_text(&text, &canonical, base.as_deref(), inherited_ns)
    }

    fn compile_text(
        &mut self,
        text: &str,
        path: &Path,
        base: Option<&Path>,
        inherited_ns: Option<&str>,
    ) -> Result<(), SchemaError> {
        let doc = roxmltree::Document::parse(text).map_err(|e| SchemaError::Xml {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let root = doc.root_element();
        if root.tag_name().namespace() != Some(XS_NS) || root.tag_name().name() != "schema" {
            return Err(SchemaError::NotASchema {
                path: path.to_path_buf(),
                root: root.tag_name().name().to_string(),
            });
        }

        let own_ns = root.attribute("targetNamespace").filter(|s| !s.is_empty());
        let ctx = DocCtx {
            path,
            target_ns: own_ns
                .or(inherited_ns.filter(|s| !s.is_empty()))
                .map(str::to_string),
            chameleon: own_ns.is_none() && inherited_ns.map_or(false, |s| !s.is_empty()),
            elements_qualified: root.attribute("elementFormDefault") == Some("qualified"),
            attributes_qualified: root.attribute("attributeFormDefault") == Some("qualified"),
        };
        self.schema.documents.push(path.to_path_buf());

        let mut pending: Vec<(PathBuf, Option<String>)> = Vec::new();
        for child in xs_children(root) {
            match child.tag_name().name() {
                kind @ ("include" | "import" | "redefine") => {
                    let Some(location) = child.attribute("schemaLocation") else {
                        continue;
                    };
                    if location.starts_with("http://") || location.starts_with("https://") {
                        tracing::warn!(schema = %path.display(), location, "skipping remote schema location");
                        continue;
                    }
                    let Some(base) = base else {
                        tracing::warn!(location, "no base directory to resolve schema location");
                        continue;
                    };
                    let inherit = if kind == "import" { None } else { ctx.target_ns.clone() };
                    pending.push((base.join(location), inherit));
                }
                "element" => {
                    let decl = self.element_decl(child, &ctx, true)?;
                    if let Some(head) = &decl.substitution_group {
                        self.schema
                            .substitutions
                            .entry(head.clone())
                            .or_default()
                            .push(decl.name.clone());
                    }
                    self.schema.elements.insert(decl.name.clone(), decl);
                }
                "complexType" => {
                    let name = self.global_name(child, &ctx)?;
                    let ct = self.complex_type(child, &ctx)?;
                    self.schema.types.insert(name, TypeDef::Complex(ct));
                }
                "simpleType" => {
                    let name = self.global_name(child, &ctx)?;
                    let st = self.simple_type(child, &ctx)?;
                    self.schema.types.insert(name, TypeDef::Simple(st));
                }
                "group" => {
                    let name = self.global_name(child, &ctx)?;
                    let particle = xs_children(child)
                        .find_map(|c| self.particle(c, &ctx).transpose())
                        .transpose()?;
                    if let Some(particle) = particle {
                        self.schema.groups.insert(name, particle);
                    }
                }
                "attributeGroup" => {
                    let name = self.global_name(child, &ctx)?;
                    let mut group = AttributeGroup::default();
                    for c in xs_children(child) {
                        match c.tag_name().name() {
                            "attribute" => group.attributes.push(self.attribute_use(c, &ctx, false)?),
                            "attributeGroup" => group.groups.push(self.reference(c, &ctx)?),
                            _ => {}
                        }
                    }
                    self.schema.attribute_groups.insert(name, group);
                }
                "attribute" => {
                    let attr = self.attribute_use(child, &ctx, true)?;
                    self.schema.attributes.insert(attr.name.clone(), attr);
                }
                _ => {}
            }
        }

        for (location, inherit) in pending {
            self.load_file(&location, inherit.as_deref())?;
        }
        Ok(())
    }

    fn global_name(&self, node: roxmltree::Node, ctx: &DocCtx) -> Result<QName, SchemaError> {
        let name = node
            .attribute("name")
            .ok_or_else(|| ctx.invalid(format!("global <{}> without a name", node.tag_name().name())))?;
        Ok(QName::new(ctx.target_ns.as_deref(), name))
    }

    fn resolve_qname(
        &self,
        node: roxmltree::Node,
        value: &str,
        ctx: &DocCtx,
    ) -> Result<QName, SchemaError> {
        let (prefix, local) = match value.split_once(':') {
            Some((p, l)) => (Some(p), l),
            None => (None, value),
        };
        let ns = node.lookup_namespace_uri(prefix);
        if prefix.is_some() && ns.is_none() {
            return Err(ctx.invalid(format!("unbound namespace prefix in '{value}'")));
        }
        let ns = match ns {
            None if ctx.chameleon => ctx.target_ns.as_deref(),
            ns => ns,
        };
        Ok(QName::new(ns, local))
    }

    fn reference(&self, node: roxmltree::Node, ctx: &DocCtx) -> Result<QName, SchemaError> {
        let value = node
            .attribute("ref")
            .ok_or_else(|| ctx.invalid(format!("<{}> without ref", node.tag_name().name())))?;
        self.resolve_qname(node, value, ctx)
    }

    fn element_decl(
        &self,
        node: roxmltree::Node,
        ctx: &DocCtx,
        global: bool,
    ) -> Result<ElementDecl, SchemaError> {
        let name = node
            .attribute("name")
            .ok_or_else(|| ctx.invalid("element declaration without a name"))?;
        let qualified = global
            || match node.attribute("form") {
                Some(form) => form == "qualified",
                None => ctx.elements_qualified,
            };
        let ns = if qualified { ctx.target_ns.as_deref() } else { None };

        let type_ref = match node.attribute("type") {
            Some(t) => TypeRef::Named(self.resolve_qname(node, t, ctx)?),
            None => self.inline_type(node, ctx)?,
        };
        let substitution_group = match node.attribute("substitutionGroup") {
            Some(head) if global => Some(self.resolve_qname(node, head, ctx)?),
            _ => None,
        };

        Ok(ElementDecl {
            name: QName::new(ns, name),
            type_ref,
            is_abstract: is_true(node.attribute("abstract")),
            nillable: is_true(node.attribute("nillable")),
            substitution_group,
        })
    }

    fn inline_type(&self, node: roxmltree::Node, ctx: &DocCtx) -> Result<TypeRef, SchemaError> {
        for c in xs_children(node) {
            match c.tag_name().name() {
                "complexType" => {
                    return Ok(TypeRef::Inline(Box::new(TypeDef::Complex(
                        self.complex_type(c, ctx)?,
                    ))))
                }
                "simpleType" => {
                    return Ok(TypeRef::Inline(Box::new(TypeDef::Simple(
                        self.simple_type(c, ctx)?,
                    ))))
                }
                _ => {}
            }
        }
        Ok(TypeRef::AnyType)
    }

    fn occurs(&self, node: roxmltree::Node, ctx: &DocCtx) -> Result<(u32, MaxOccurs), SchemaError> {
        let min = match node.attribute("minOccurs") {
            Some(v) => v
                .trim()
                .parse()
                .map_err(|_| ctx.invalid(format!("bad minOccurs '{v}'")))?,
            None => 1,
        };
        let max = match node.attribute("maxOccurs") {
            Some("unbounded") => MaxOccurs::Unbounded,
            Some(v) => MaxOccurs::Bounded(
                v.trim()
                    .parse()
                    .map_err(|_| ctx.invalid(format!("bad maxOccurs '{v}'")))?,
            ),
            None => MaxOccurs::Bounded(1),
        };
        Ok((min, max))
    }

    /// Compiles a particle node; `None` for nodes that are not particles.
    fn particle(&self, node: roxmltree::Node, ctx: &DocCtx) -> Result<Option<Particle>, SchemaError> {
        let term = match node.tag_name().name() {
            "element" => {
                if node.attribute("ref").is_some() {
                    Term::Element(ElementRef::Global(self.reference(node, ctx)?))
                } else {
                    Term::Element(ElementRef::Local(Box::new(self.element_decl(node, ctx, false)?)))
                }
            }
            kind @ ("sequence" | "choice" | "all") => {
                let mut items = Vec::new();
                for c in xs_children(node) {
                    if let Some(p) = self.particle(c, ctx)? {
                        items.push(p);
                    }
                }
                match kind {
                    "sequence" => Term::Sequence(items),
                    "choice" => Term::Choice(items),
                    _ => Term::All(items),
                }
            }
            "group" => Term::Group(self.reference(node, ctx)?),
            "any" => Term::Any,
            _ => return Ok(None),
        };
        let (min, max) = self.occurs(node, ctx)?;
        Ok(Some(Particle { min, max, term }))
    }

    fn attribute_use(
        &self,
        node: roxmltree::Node,
        ctx: &DocCtx,
        global: bool,
    ) -> Result<AttributeUse, SchemaError> {
        let required = node.attribute("use") == Some("required");
        if node.attribute("ref").is_some() {
            return Ok(AttributeUse {
                name: self.reference(node, ctx)?,
                type_ref: TypeRef::AnyType,
                required,
                by_ref: true,
            });
        }
        let name = node
            .attribute("name")
            .ok_or_else(|| ctx.invalid("attribute declaration without a name"))?;
        let qualified = global
            || match node.attribute("form") {
                Some(form) => form == "qualified",
                None => ctx.attributes_qualified,
            };
        let ns = if qualified { ctx.target_ns.as_deref() } else { None };
        let type_ref = match node.attribute("type") {
            Some(t) => TypeRef::Named(self.resolve_qname(node, t, ctx)?),
            None => self.inline_type(node, ctx)?,
        };
        Ok(AttributeUse {
            name: QName::new(ns, name),
            type_ref,
            required,
            by_ref: false,
        })
    }

    /// Particles, attributes and attribute groups declared directly in `node`.
    fn complex_body(
        &self,
        node: roxmltree::Node,
        ctx: &DocCtx,
        ct: &mut ComplexType,
    ) -> Result<(), SchemaError> {
        for c in xs_children(node) {
            match c.tag_name().name() {
                "sequence" | "choice" | "all" | "group" => {
                    if let Some(p) = self.particle(c, ctx)? {
                        ct.content = ContentModel::Elements(p);
                    }
                }
                "attribute" => ct.attributes.push(self.attribute_use(c, ctx, false)?),
                "attributeGroup" => ct.attribute_groups.push(self.reference(c, ctx)?),
                _ => {}
            }
        }
        Ok(())
    }

    fn complex_type(&self, node: roxmltree::Node, ctx: &DocCtx) -> Result<ComplexType, SchemaError> {
        let mut ct = ComplexType {
            derivation: Derivation::None,
            content: ContentModel::Empty,
            attributes: Vec::new(),
            attribute_groups: Vec::new(),
            mixed: is_true(node.attribute("mixed")),
        };
        self.complex_body(node, ctx, &mut ct)?;

        for c in xs_children(node) {
            let kind = c.tag_name().name();
            if kind != "complexContent" && kind != "simpleContent" {
                continue;
            }
            ct.mixed |= is_true(c.attribute("mixed"));
            let Some(derived) = xs_children(c)
                .find(|d| matches!(d.tag_name().name(), "extension" | "restriction"))
            else {
                continue;
            };
            let base_attr = derived
                .attribute("base")
                .ok_or_else(|| ctx.invalid(format!("<{}> without a base", derived.tag_name().name())))?;
            let base = self.resolve_qname(derived, base_attr, ctx)?;
            ct.derivation = if derived.tag_name().name() == "extension" {
                Derivation::Extension(base)
            } else {
                Derivation::Restriction(base)
            };
            if kind == "simpleContent" {
                ct.content = ContentModel::Simple(None);
            }
            self.complex_body(derived, ctx, &mut ct)?;
        }
        Ok(ct)
    }

    fn simple_type(&self, node: roxmltree::Node, ctx: &DocCtx) -> Result<SimpleType, SchemaError> {
        let mut facets = Facets::default();
        for c in xs_children(node) {
            match c.tag_name().name() {
                "restriction" => {
                    let base = match c.attribute("base") {
                        Some(b) => TypeRef::Named(self.resolve_qname(c, b, ctx)?),
                        None => self.inline_type(c, ctx)?,
                    };
                    for f in xs_children(c) {
                        let value = f.attribute("value").unwrap_or_default();
                        match f.tag_name().name() {
                            "enumeration" => facets.enumeration.push(value.to_string()),
                            "length" => facets.length = value.trim().parse().ok(),
                            "minLength" => facets.min_length = value.trim().parse().ok(),
                            "maxLength" => facets.max_length = value.trim().parse().ok(),
                            "minInclusive" => facets.min_inclusive = value.trim().parse().ok(),
                            "maxInclusive" => facets.max_inclusive = value.trim().parse().ok(),
                            "minExclusive" => facets.min_exclusive = value.trim().parse().ok(),
                            "maxExclusive" => facets.max_exclusive = value.trim().parse().ok(),
                            _ => {}
                        }
                    }
                    return Ok(SimpleType {
                        variety: SimpleVariety::Restriction(base),
                        facets,
                    });
                }
                "list" => {
                    let item = match c.attribute("itemType") {
                        Some(t) => TypeRef::Named(self.resolve_qname(c, t, ctx)?),
                        None => self.inline_type(c, ctx)?,
                    };
                    return Ok(SimpleType {
                        variety: SimpleVariety::List(item),
                        facets,
                    });
                }
                "union" => {
                    let mut members = Vec::new();
                    if let Some(list) = c.attribute("memberTypes") {
                        for member in list.split_whitespace() {
                            members.push(TypeRef::Named(self.resolve_qname(c, member, ctx)?));
                        }
                    }
                    for inline in xs_children(c).filter(|m| m.tag_name().name() == "simpleType") {
                        members.push(TypeRef::Inline(Box::new(TypeDef::Simple(
                            self.simple_type(inline, ctx)?,
                        ))));
                    }
                    return Ok(SimpleType {
                        variety: SimpleVariety::Union(members),
                        facets,
                    });
                }
                _ => {}
            }
        }
        Ok(SimpleType {
            variety: SimpleVariety::Restriction(TypeRef::AnyType),
            facets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const BOOKS_XSD: &str = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"
            xmlns:b="urn:books" targetNamespace="urn:books" elementFormDefault="qualified">
        <xs:element name="library" type="b:LibraryType"/>
        <xs:complexType name="LibraryType">
            <xs:sequence>
                <xs:element name="book" type="xs:string" minOccurs="0" maxOccurs="unbounded"/>
            </xs:sequence>
            <xs:attribute name="owner" type="xs:string" use="required"/>
        </xs:complexType>
    </xs:schema>"#;

    #[test]
    fn compiles_inline_schema() {
        let schema = Schema::parse_str(BOOKS_XSD).unwrap();
        let library = QName::new(Some("urn:books"), "library");
        let decl = schema.global_element(&library).unwrap();
        assert!(matches!(&decl.type_ref, TypeRef::Named(q) if q.local == "LibraryType"));

        let Some(TypeDef::Complex(ct)) = schema.types.get(&QName::new(Some("urn:books"), "LibraryType"))
        else {
            panic!("LibraryType missing");
        };
        assert_eq!(ct.attributes.len(), 1);
        assert!(ct.attributes[0].required);
        let ContentModel::Elements(p) = &ct.content else {
            panic!("expected element content");
        };
        let Term::Sequence(items) = &p.term else {
            panic!("expected sequence");
        };
        assert_eq!(items[0].min, 0);
        assert_eq!(items[0].max, MaxOccurs::Unbounded);
        let Term::Element(ElementRef::Local(book)) = &items[0].term else {
            panic!("expected local element");
        };
        assert_eq!(book.name, QName::new(Some("urn:books"), "book"));
    }

    #[test]
    fn rejects_non_schema_document() {
        let err = Schema::parse_str("<notaschema/>").unwrap_err();
        assert!(matches!(err, SchemaError::NotASchema { .. }));
    }

    #[test]
    fn rejects_unbound_prefix() {
        let xsd = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
            <xs:element name="a" type="nope:T"/>
        </xs:schema>"#;
        assert!(matches!(Schema::parse_str(xsd), Err(SchemaError::Invalid { .. })));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = Schema::load("/definitely/not/here/gmd.xsd").unwrap_err();
        assert!(matches!(err, SchemaError::Io { .. }));
    }

    #[test]
    fn follows_local_includes_and_skips_remote_imports() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("root.xsd"),
            r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema" targetNamespace="urn:t"
                    xmlns:t="urn:t" elementFormDefault="qualified">
                <xs:include schemaLocation="types.xsd"/>
                <xs:import namespace="http://www.w3.org/1999/xlink"
                    schemaLocation="http://schemas.opengis.net/xlink/1.0.0/xlinks.xsd"/>
                <xs:element name="root" type="t:RootType"/>
            </xs:schema>"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("types.xsd"),
            r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema" xmlns:t="urn:t">
                <xs:complexType name="RootType"><xs:sequence/></xs:complexType>
            </xs:schema>"#,
        )
        .unwrap();

        let schema = Schema::load(dir.path().join("root.xsd")).unwrap();
        assert_eq!(schema.documents().len(), 2);
        // chameleon include takes the including namespace
        assert!(schema.types.contains_key(&QName::new(Some("urn:t"), "RootType")));
    }

    #[test]
    fn chameleon_include_resolves_unprefixed_references() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("root.xsd"),
            r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema" targetNamespace="urn:t"
                    xmlns:t="urn:t" elementFormDefault="qualified">
                <xs:include schemaLocation="types.xsd"/>
                <xs:element name="root" type="t:RootType"/>
            </xs:schema>"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("types.xsd"),
            r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema" elementFormDefault="qualified">
                <xs:complexType name="RootType">
                    <xs:sequence><xs:element name="n" type="IntType"/></xs:sequence>
                </xs:complexType>
                <xs:simpleType name="IntType">
                    <xs:restriction base="xs:integer"/>
                </xs:simpleType>
            </xs:schema>"#,
        )
        .unwrap();

        let schema = Schema::load(dir.path().join("root.xsd")).unwrap();
        let Some(TypeDef::Complex(ct)) = schema.types.get(&QName::new(Some("urn:t"), "RootType"))
        else {
            panic!("RootType missing");
        };
        let ContentModel::Elements(particle) = &ct.content else {
            panic!("RootType has no element content");
        };
        let Term::Sequence(items) = &particle.term else {
            panic!("RootType content is not a sequence");
        };
        let Term::Element(ElementRef::Local(n)) = &items[0].term else {
            panic!("n is not a local element");
        };
        assert!(
            matches!(&n.type_ref, TypeRef::Named(q) if *q == QName::new(Some("urn:t"), "IntType"))
        );

        let violations = crate::validation::validate(
            &schema,
            r#"<root xmlns="urn:t"><n>not-a-number</n></root>"#,
        )
        .unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].location, "/root/n");
    }

    #[test]
    fn substitution_groups_are_indexed() {
        let xsd = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
            <xs:element name="AbstractThing" abstract="true"/>
            <xs:element name="Concrete" substitutionGroup="AbstractThing" type="xs:string"/>
        </xs:schema>"#;
        let schema = Schema::parse_str(xsd).unwrap();
        let head = QName::new(None, "AbstractThing");
        assert_eq!(schema.substitutions[&head], vec![QName::new(None, "Concrete")]);
        assert!(schema.global_element(&head).unwrap().is_abstract);
    }
}
