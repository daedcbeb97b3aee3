use super::builtins::Builtin;
use super::schema::{
    AttributeUse, ComplexType, ContentModel, Derivation, ElementDecl, ElementRef, Facets, MaxOccurs, Particle,
    QName, Schema, SimpleType, SimpleVariety, Term, TypeDef, TypeRef, XSI_NS,
};
use crate::models::Violation;
use roxmltree::Node;
use std::collections::HashSet;

const MAX_DEPTH: usize = 64;

#[derive(Clone, Copy)]
enum Resolved<'s> {
    Any,
    Builtin(Builtin),
    Simple(&'s SimpleType),
    Complex(&'s ComplexType),
}

/// How a child element was matched by a content model.
#[derive(Clone, Copy)]
enum Hit<'s> {
    Declared(&'s ElementDecl),
    /// Wildcard or a reference to a declaration outside the loaded schema set.
    Lax,
}

#[derive(Default)]
struct Effective<'s> {
    parts: Vec<&'s Particle>,
    attributes: Vec<&'s AttributeUse>,
    groups: Vec<&'s QName>,
    simple: Option<Resolved<'s>>,
    simple_content: bool,
    mixed: bool,
    /// Extends a base outside the loaded schema set, so children the known
    /// content does not account for are taken as the base's.
    open: bool,
}

fn display_qname(scope: Node, name: &QName) -> String {
    match name.ns.as_deref().and_then(|ns| scope.lookup_prefix(ns)) {
        Some(prefix) if !prefix.is_empty() => format!("{}:{}", prefix, name.local),
        _ => name.local.clone(),
    }
}

fn display_name(node: Node) -> String {
    display_qname(node, &QName::of(node))
}

fn child_path(parent_path: &str, child: Node) -> String {
    let name = display_name(child);
    let tag = child.tag_name();
    let Some(parent) = child.parent() else {
        return format!("{parent_path}/{name}");
    };
    let same: Vec<Node> = parent
        .children()
        .filter(|c| {
            c.is_element()
                && c.tag_name().name() == tag.name()
                && c.tag_name().namespace() == tag.namespace()
        })
        .collect();
    if same.len() > 1 {
        let index = same.iter().position(|c| *c == child).unwrap_or(0) + 1;
        format!("{parent_path}/{name}[{index}]")
    } else {
        format!("{parent_path}/{name}")
    }
}

fn text_content(node: Node) -> String {
    node.children()
        .filter(|c| c.is_text())
        .filter_map(|c| c.text())
        .collect()
}

fn has_character_data(node: Node) -> bool {
    node.children()
        .any(|c| c.is_text() && c.text().map_or(false, |t| !t.trim().is_empty()))
}

fn check_facets(facets: &Facets, value: &str, list_len: Option<usize>) -> Result<(), String> {
    let v = value.trim();
    if !facets.enumeration.is_empty() && !facets.enumeration.iter().any(|e| e.trim() == v) {
        return Err(format!(
            "'{}' is not one of the allowed values: {}",
            v,
            facets.enumeration.join(", ")
        ));
    }

    let len = list_len.unwrap_or_else(|| v.chars().count());
    if let Some(n) = facets.length {
        if len != n {
            return Err(format!("'{v}' has length {len}, expected exactly {n}"));
        }
    }
    if let Some(n) = facets.min_length {
        if len < n {
            return Err(format!("'{v}' has length {len}, expected at least {n}"));
        }
    }
    if let Some(n) = facets.max_length {
        if len > n {
            return Err(format!("'{v}' has length {len}, expected at most {n}"));
        }
    }

    if let Ok(num) = v.parse::<f64>() {
        if let Some(m) = facets.min_inclusive {
            if num < m {
                return Err(format!("{v} is below the minimum {m}"));
            }
        }
        if let Some(m) = facets.max_inclusive {
            if num > m {
                return Err(format!("{v} is above the maximum {m}"));
            }
        }
        if let Some(m) = facets.min_exclusive {
            if num <= m {
                return Err(format!("{v} must be greater than {m}"));
            }
        }
        if let Some(m) = facets.max_exclusive {
            if num >= m {
                return Err(format!("{v} must be less than {m}"));
            }
        }
    }
    Ok(())
}

/// Walks one document against a compiled schema, collecting every violation.
pub(crate) struct InstanceValidator<'s> {
    schema: &'s Schema,
    violations: Vec<Violation>,
}

impl<'s> InstanceValidator<'s> {
    pub(crate) fn new(schema: &'s Schema) -> Self {
        Self {
            schema,
            violations: Vec::new(),
        }
    }

    pub(crate) fn validate_document(mut self, doc: &roxmltree::Document) -> Vec<Violation> {
        let root = doc.root_element();
        let path = format!("/{}", display_name(root));
        match self.schema.elements.get(&QName::of(root)) {
            Some(decl) => self.validate_element(root, decl, &path, 0),
            None => self.report(
                &path,
                format!("no global declaration for root element '{}'", display_name(root)),
            ),
        }
        self.violations
    }

    fn report(&mut self, location: &str, message: impl Into<String>) {
        self.violations.push(Violation::new(location, message));
    }

    fn resolve(&self, type_ref: &'s TypeRef) -> Resolved<'s> {
        match type_ref {
            TypeRef::AnyType => Resolved::Any,
            TypeRef::Named(name) => self.resolve_named(name),
            TypeRef::Inline(def) => match def.as_ref() {
                TypeDef::Simple(st) => Resolved::Simple(st),
                TypeDef::Complex(ct) => Resolved::Complex(ct),
            },
        }
    }

    fn resolve_named(&self, name: &QName) -> Resolved<'s> {
        if name.is_xs() {
            return match name.local.as_str() {
                "anyType" => Resolved::Any,
                other => Resolved::Builtin(Builtin::from_local(other)),
            };
        }
        match self.schema.types.get(name) {
            Some(TypeDef::Simple(st)) => Resolved::Simple(st),
            Some(TypeDef::Complex(ct)) => Resolved::Complex(ct),
            None => Resolved::Any,
        }
    }

    fn xsi_type(&self, node: Node, value: &str) -> Option<Resolved<'s>> {
        let (prefix, local) = match value.trim().split_once(':') {
            Some((p, l)) => (Some(p), l),
            None => (None, value.trim()),
        };
        let name = QName::new(node.lookup_namespace_uri(prefix), local);
        if name.is_xs() || self.schema.types.contains_key(&name) {
            Some(self.resolve_named(&name))
        } else {
            None
        }
    }

    fn validate_element(&mut self, node: Node, decl: &'s ElementDecl, path: &str, depth: usize) {
        if depth > MAX_DEPTH {
            return;
        }
        if decl.is_abstract {
            self.report(
                path,
                format!("element '{}' is abstract and cannot appear in a document", display_name(node)),
            );
        }

        if matches!(node.attribute((XSI_NS, "nil")), Some("true") | Some("1")) {
            if !decl.nillable {
                self.report(path, format!("element '{}' is not nillable", display_name(node)));
            } else if node.children().any(|c| c.is_element()) || has_character_data(node) {
                self.report(path, format!("nil element '{}' must be empty", display_name(node)));
            }
            return;
        }

        let resolved = match node.attribute((XSI_NS, "type")) {
            Some(value) => match self.xsi_type(node, value) {
                Some(resolved) => resolved,
                None => {
                    self.report(path, format!("unknown xsi:type '{value}'"));
                    return;
                }
            },
            None => self.resolve(&decl.type_ref),
        };

        match resolved {
            Resolved::Any => {}
            Resolved::Builtin(_) | Resolved::Simple(_) => {
                if let Some(child) = node.children().find(|c| c.is_element()) {
                    let location = child_path(path, child);
                    self.report(
                        &location,
                        format!(
                            "element '{}' is not allowed: '{}' has a simple type",
                            display_name(child),
                            display_name(node)
                        ),
                    );
                } else if let Err(message) = self.check_value(resolved, &text_content(node), 0) {
                    self.report(path, message);
                }
            }
            Resolved::Complex(ct) => self.validate_complex(node, ct, path, depth),
        }
    }

    fn check_value(&self, resolved: Resolved<'s>, value: &str, depth: usize) -> Result<(), String> {
        if depth > MAX_DEPTH {
            return Ok(());
        }
        match resolved {
            Resolved::Any => Ok(()),
            Resolved::Builtin(b) => b.check(value),
            Resolved::Complex(ct) => match self.effective(ct).simple {
                Some(inner) => self.check_value(inner, value, depth + 1),
                None => Ok(()),
            },
            Resolved::Simple(st) => match &st.variety {
                SimpleVariety::Restriction(base) => {
                    self.check_value(self.resolve(base), value, depth + 1)?;
                    check_facets(&st.facets, value, None)
                }
                SimpleVariety::List(item) => {
                    let item = self.resolve(item);
                    let mut count = 0;
                    for token in value.split_whitespace() {
                        self.check_value(item, token, depth + 1)?;
                        count += 1;
                    }
                    check_facets(&st.facets, value, Some(count))
                }
                SimpleVariety::Union(members) => {
                    let matched = members.is_empty()
                        || members
                            .iter()
                            .any(|m| self.check_value(self.resolve(m), value, depth + 1).is_ok());
                    if !matched {
                        return Err(format!(
                            "'{}' does not match any member of the union type",
                            value.trim()
                        ));
                    }
                    check_facets(&st.facets, value, None)
                }
            },
        }
    }

    fn effective(&self, ct: &'s ComplexType) -> Effective<'s> {
        let mut eff = Effective::default();
        self.collect(ct, &mut eff, 0);
        eff
    }

    /// Folds a type's derivation chain, base first.
    fn collect(&self, ct: &'s ComplexType, eff: &mut Effective<'s>, depth: usize) {
        if depth > MAX_DEPTH {
            return;
        }
        match &ct.derivation {
            Derivation::None => {}
            Derivation::Extension(base) => match self.resolve_named(base) {
                Resolved::Complex(base_ct) => self.collect(base_ct, eff, depth + 1),
                Resolved::Any => {
                    eff.open = true;
                    eff.mixed = true;
                }
                simple => {
                    eff.simple = Some(simple);
                    eff.simple_content = true;
                }
            },
            Derivation::Restriction(base) => match self.resolve_named(base) {
                Resolved::Complex(base_ct) => {
                    let mut inherited = Effective::default();
                    self.collect(base_ct, &mut inherited, depth + 1);
                    eff.attributes.extend(inherited.attributes);
                    eff.groups.extend(inherited.groups);
                    if matches!(ct.content, ContentModel::Simple(_)) {
                        eff.simple = inherited.simple;
                    }
                }
                Resolved::Any => {}
                simple => {
                    eff.simple = Some(simple);
                    eff.simple_content = true;
                }
            },
        }

        match &ct.content {
            ContentModel::Elements(particle) => eff.parts.push(particle),
            ContentModel::Simple(Some(t)) => {
                eff.simple = Some(self.resolve(t));
                eff.simple_content = true;
            }
            ContentModel::Simple(None) => eff.simple_content = true,
            ContentModel::Empty => {}
        }
        eff.mixed |= ct.mixed;
        eff.attributes.extend(ct.attributes.iter());
        eff.groups.extend(ct.attribute_groups.iter());
    }

    fn check_attributes(&mut self, node: Node, eff: &Effective<'s>, path: &str) {
        let mut uses = eff.attributes.clone();
        let mut seen_groups = HashSet::new();
        let mut stack = eff.groups.clone();
        while let Some(name) = stack.pop() {
            if !seen_groups.insert(name) {
                continue;
            }
            if let Some(group) = self.schema.attribute_groups.get(name) {
                uses.extend(group.attributes.iter());
                stack.extend(group.groups.iter());
            }
        }

        let mut checked = HashSet::new();
        for attr in uses {
            if !checked.insert(&attr.name) {
                continue;
            }
            let shown = display_qname(node, &attr.name);
            let location = format!("{path}/@{shown}");
            let value = node
                .attributes()
                .find(|a| a.namespace() == attr.name.ns.as_deref() && a.name() == attr.name.local)
                .map(|a| a.value());
            match value {
                None if attr.required => {
                    self.report(&location, format!("missing required attribute '{shown}'"));
                }
                None => {}
                Some(value) => {
                    let type_ref = if attr.by_ref {
                        self.schema.attributes.get(&attr.name).map(|a| &a.type_ref)
                    } else {
                        Some(&attr.type_ref)
                    };
                    if let Some(type_ref) = type_ref {
                        if let Err(message) = self.check_value(self.resolve(type_ref), value, 0) {
                            self.report(&location, message);
                        }
                    }
                }
            }
        }
    }

    fn validate_complex(&mut self, node: Node, ct: &'s ComplexType, path: &str, depth: usize) {
        let eff = self.effective(ct);
        self.check_attributes(node, &eff, path);
        let children: Vec<Node> = node.children().filter(|c| c.is_element()).collect();

        if eff.parts.is_empty() && !eff.open {
            if eff.simple_content {
                if let Some(child) = children.first() {
                    let location = child_path(path, *child);
                    self.report(
                        &location,
                        format!(
                            "element '{}' is not allowed in simple content",
                            display_name(*child)
                        ),
                    );
                } else if let Some(simple) = eff.simple {
                    if let Err(message) = self.check_value(simple, &text_content(node), 0) {
                        self.report(path, message);
                    }
                }
            } else {
                for child in &children {
                    let location = child_path(path, *child);
                    self.report(
                        &location,
                        format!(
                            "unexpected element '{}': '{}' must be empty",
                            display_name(*child),
                            display_name(node)
                        ),
                    );
                }
                if !eff.mixed && has_character_data(node) {
                    self.report(
                        path,
                        format!("character data is not allowed in '{}'", display_name(node)),
                    );
                }
            }
            return;
        }

        if !eff.mixed && has_character_data(node) {
            self.report(
                path,
                format!("character data is not allowed in element-only content of '{}'", display_name(node)),
            );
        }

        let mut matcher = Matcher {
            schema: self.schema,
            children: &children,
            matched: Vec::new(),
            open: eff.open,
        };
        let problems = matcher.match_content(&eff.parts, node, path);
        let matched = matcher.matched;
        self.violations.extend(problems);

        for (idx, hit) in matched {
            let child = children[idx];
            let location = child_path(path, child);
            match hit {
                Hit::Declared(decl) => self.validate_element(child, decl, &location, depth + 1),
                Hit::Lax => {
                    if let Some(decl) = self.schema.elements.get(&QName::of(child)) {
                        self.validate_element(child, decl, &location, depth + 1);
                    }
                }
            }
        }
    }
}

/// Greedy content-model matcher over one element's children.
struct Matcher<'s, 'c, 'a, 'input: 'a> {
    schema: &'s Schema,
    children: &'c [Node<'a, 'input>],
    matched: Vec<(usize, Hit<'s>)>,
    open: bool,
}

impl<'s> Matcher<'s, '_, '_, '_> {
    fn element_match(&self, element: &'s ElementRef, child: Node) -> Option<Hit<'s>> {
        let name = QName::of(child);
        match element {
            ElementRef::Local(decl) => (decl.name == name).then_some(Hit::Declared(decl.as_ref())),
            ElementRef::Global(head) => {
                if *head == name {
                    return Some(match self.schema.elements.get(head) {
                        Some(decl) => Hit::Declared(decl),
                        None => Hit::Lax,
                    });
                }
                self.substitute(head, &name, 0).map(Hit::Declared)
            }
        }
    }

    fn substitute(&self, head: &QName, name: &QName, depth: usize) -> Option<&'s ElementDecl> {
        if depth > 16 {
            return None;
        }
        let members = self.schema.substitutions.get(head)?;
        for member in members {
            if member == name {
                return self.schema.elements.get(member);
            }
            if let Some(decl) = self.substitute(member, name, depth + 1) {
                return Some(decl);
            }
        }
        None
    }

    fn nullable(&self, particle: &'s Particle, depth: usize) -> bool {
        if particle.min == 0 || depth > MAX_DEPTH {
            return true;
        }
        match &particle.term {
            Term::Element(_) | Term::Any => false,
            Term::Sequence(items) | Term::All(items) => {
                items.iter().all(|i| self.nullable(i, depth + 1))
            }
            Term::Choice(items) => items.iter().any(|i| self.nullable(i, depth + 1)),
            Term::Group(name) => self
                .schema
                .groups
                .get(name)
                .map_or(true, |g| self.nullable(g, depth + 1)),
        }
    }

    /// Whether `child` can be the first element matched by `term`.
    fn starts(&self, term: &'s Term, child: Node, depth: usize) -> bool {
        if depth > MAX_DEPTH {
            return false;
        }
        match term {
            Term::Element(element) => self.element_match(element, child).is_some(),
            Term::Any => true,
            Term::Sequence(items) => {
                for item in items {
                    if self.starts(&item.term, child, depth + 1) {
                        return true;
                    }
                    if !self.nullable(item, depth + 1) {
                        return false;
                    }
                }
                false
            }
            Term::Choice(items) | Term::All(items) => {
                items.iter().any(|i| self.starts(&i.term, child, depth + 1))
            }
            Term::Group(name) => self
                .schema
                .groups
                .get(name)
                .map_or(false, |g| self.starts(&g.term, child, depth + 1)),
        }
    }

    fn repeat(&mut self, particle: &'s Particle, max: MaxOccurs, start: usize, depth: usize) -> (u32, usize) {
        let mut count = 0;
        let mut pos = start;
        while max.allows(count) {
            let saved = self.matched.len();
            match self.match_term(&particle.term, pos, depth) {
                Some(next) if next > pos => {
                    count += 1;
                    pos = next;
                }
                Some(_) => {
                    count = count.max(particle.min);
                    break;
                }
                None => {
                    self.matched.truncate(saved);
                    break;
                }
            }
        }
        (count, pos)
    }

    fn match_term(&mut self, term: &'s Term, pos: usize, depth: usize) -> Option<usize> {
        if depth > MAX_DEPTH {
            return None;
        }
        match term {
            Term::Element(element) => {
                let child = *self.children.get(pos)?;
                let hit = self.element_match(element, child)?;
                self.matched.push((pos, hit));
                Some(pos + 1)
            }
            Term::Any => {
                self.children.get(pos)?;
                self.matched.push((pos, Hit::Lax));
                Some(pos + 1)
            }
            Term::Sequence(items) => {
                let mut at = pos;
                for item in items {
                    let (count, next) = self.repeat(item, item.max, at, depth + 1);
                    if count < item.min {
                        return None;
                    }
                    at = next;
                }
                Some(at)
            }
            Term::Choice(items) => {
                if let Some(child) = self.children.get(pos).copied() {
                    for item in items {
                        if !self.starts(&item.term, child, depth + 1) {
                            continue;
                        }
                        let saved = self.matched.len();
                        let (count, next) = self.repeat(item, item.max, pos, depth + 1);
                        if count >= item.min && next > pos {
                            return Some(next);
                        }
                        self.matched.truncate(saved);
                    }
                }
                items.iter().any(|i| self.nullable(i, depth + 1)).then_some(pos)
            }
            Term::All(items) => {
                let mut used = vec![false; items.len()];
                let mut at = pos;
                'outer: while let Some(child) = self.children.get(at).copied() {
                    for (i, item) in items.iter().enumerate() {
                        if used[i] || !self.starts(&item.term, child, depth + 1) {
                            continue;
                        }
                        let saved = self.matched.len();
                        match self.match_term(&item.term, at, depth + 1) {
                            Some(next) if next > at => {
                                used[i] = true;
                                at = next;
                                continue 'outer;
                            }
                            _ => self.matched.truncate(saved),
                        }
                    }
                    break;
                }
                let complete = items
                    .iter()
                    .zip(&used)
                    .all(|(item, used)| *used || self.nullable(item, depth + 1));
                complete.then_some(at)
            }
            Term::Group(name) => {
                let group = self.schema.groups.get(name)?;
                self.match_term(&group.term, pos, depth + 1)
            }
        }
    }

    /// Splices single-occurrence sequences so recovery works element by element.
    fn flatten(&self, particle: &'s Particle, out: &mut Vec<&'s Particle>, depth: usize) {
        if depth < MAX_DEPTH && particle.is_single() {
            match &particle.term {
                Term::Sequence(items) => {
                    for item in items {
                        self.flatten(item, out, depth + 1);
                    }
                    return;
                }
                Term::Group(name) => {
                    if let Some(group) = self.schema.groups.get(name) {
                        if group.is_single() && matches!(group.term, Term::Sequence(_)) {
                            self.flatten(group, out, depth + 1);
                            return;
                        }
                    }
                }
                _ => {}
            }
        }
        out.push(particle);
    }

    fn expected_names(&self, term: &'s Term, scope: Node, out: &mut Vec<String>, depth: usize) {
        if depth > MAX_DEPTH {
            return;
        }
        match term {
            Term::Element(ElementRef::Global(name)) => out.push(display_qname(scope, name)),
            Term::Element(ElementRef::Local(decl)) => out.push(display_qname(scope, &decl.name)),
            Term::Any => out.push("any element".to_string()),
            Term::Sequence(items) => {
                for item in items {
                    self.expected_names(&item.term, scope, out, depth + 1);
                    if !self.nullable(item, depth + 1) {
                        break;
                    }
                }
            }
            Term::Choice(items) | Term::All(items) => {
                for item in items {
                    self.expected_names(&item.term, scope, out, depth + 1);
                }
            }
            Term::Group(name) => {
                if let Some(group) = self.schema.groups.get(name) {
                    self.expected_names(&group.term, scope, out, depth + 1);
                }
            }
        }
    }

    /// Steps over a child no particle accounts for. Open content keeps it
    /// for lax checking instead of reporting it.
    fn skip(&mut self, pos: usize, parent_path: &str, violations: &mut Vec<Violation>) {
        let child = self.children[pos];
        if self.open {
            self.matched.push((pos, Hit::Lax));
        } else {
            violations.push(Violation::new(
                child_path(parent_path, child),
                format!("unexpected element '{}'", display_name(child)),
            ));
        }
    }

    fn missing(&self, item: &'s Particle, count: u32, parent: Node, parent_path: &str) -> Violation {
        let name = match &item.term {
            Term::Element(ElementRef::Global(name)) => Some(name),
            Term::Element(ElementRef::Local(decl)) => Some(&decl.name),
            _ => None,
        };
        match name {
            Some(name) => {
                let shown = display_qname(parent, name);
                let message = if count == 0 {
                    format!("missing required element '{shown}'")
                } else {
                    format!(
                        "expected at least {} '{}' elements, found {}",
                        item.min, shown, count
                    )
                };
                Violation::new(format!("{parent_path}/{shown}"), message)
            }
            None => {
                let mut names = Vec::new();
                self.expected_names(&item.term, parent, &mut names, 0);
                let expected = match names.as_slice() {
                    [] => "more content".to_string(),
                    [one] => format!("'{one}'"),
                    many => format!(
                        "one of {}",
                        many.iter().map(|n| format!("'{n}'")).collect::<Vec<_>>().join(", ")
                    ),
                };
                Violation::new(parent_path, format!("missing required content: expected {expected}"))
            }
        }
    }

    /// Matches the top-level content model, reporting violations instead of
    /// failing: stray children are skipped and missing particles reported.
    fn match_content(&mut self, parts: &[&'s Particle], parent: Node, parent_path: &str) -> Vec<Violation> {
        let mut flat = Vec::new();
        for &part in parts {
            self.flatten(part, &mut flat, 0);
        }

        let mut violations = Vec::new();
        let mut pos = 0;
        for (i, &item) in flat.iter().enumerate() {
            let rest = &flat[i..];
            while let Some(child) = self.children.get(pos).copied() {
                if rest.iter().any(|p| self.starts(&p.term, child, 0)) {
                    break;
                }
                self.skip(pos, parent_path, &mut violations);
                pos += 1;
            }

            let mut count = 0;
            loop {
                let remaining = match item.max {
                    MaxOccurs::Bounded(max) => MaxOccurs::Bounded(max.saturating_sub(count)),
                    MaxOccurs::Unbounded => MaxOccurs::Unbounded,
                };
                let (n, next) = self.repeat(item, remaining, pos, 0);
                count += n;
                pos = next;
                if count >= item.min {
                    break;
                }
                match self.children.get(pos).copied() {
                    Some(child) if !rest.iter().any(|p| self.starts(&p.term, child, 0)) => {
                        self.skip(pos, parent_path, &mut violations);
                        pos += 1;
                    }
                    _ => {
                        violations.push(self.missing(item, count, parent, parent_path));
                        break;
                    }
                }
            }
        }

        while pos < self.children.len() {
            self.skip(pos, parent_path, &mut violations);
            pos += 1;
        }
        violations
    }
}
