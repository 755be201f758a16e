//! Compilation of flat, externally supplied parameters into store filter documents.
//!
//! A [`QuerySpecSet`] maps each external parameter key to a rule:
//!
//! - a [`FieldSpec`] binds the key to one or more target fields with an operator and an
//!   optional string converter;
//! - a [`DynamicSpec`] turns the key's value into a whole sub-filter that is merged into the
//!   result.
//!
//! [`compile`] applies the rules to a parameter map. Several keys may target the same field
//! with different operators, in which case their conditions are combined into one operator
//! map (`{ age: { $gte: 10, $lte: 20 } }`). In non-strict mode, keys without a rule pass
//! through as equality conditions. [`compile_with_logic`] additionally folds the flat result
//! through a [`LogicNode`] tree into `$and`/`$or` groups.
//!
//! # Example
//!
//! ```ignore
//! use docshift::query::{compile, FieldSpec, QuerySpecSet};
//! use docshift::convert;
//! use bson::doc;
//!
//! let specs = QuerySpecSet::new()
//!     .with("name", FieldSpec::field("name", "$eq"))
//!     .with("minAge", FieldSpec::field("age", "$gte").convert(convert::int));
//!
//! let compiled = compile(doc! { "name": "Bob", "minAge": "18" }, &specs, true)?;
//! assert_eq!(compiled.filter, Some(doc! { "age": { "$gte": 18_i64 }, "name": { "$eq": "Bob" } }));
//! ```

use bson::{Bson, Document, doc};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt,
    sync::Arc,
};
use tracing::trace;

use crate::{
    bson_ext::pretty_document,
    error::{BoxError, DocumentStoreError, DocumentStoreResult},
};

/// Externally supplied query parameters.
pub type ParamMap = Document;

/// Converts a raw string parameter into a filter value.
pub type ScalarConvert = Arc<dyn Fn(&str) -> Result<Bson, BoxError> + Send + Sync>;

/// Converts a raw string parameter into a whole sub-filter.
pub type SubFilterConvert = Arc<dyn Fn(&str) -> Result<Document, BoxError> + Send + Sync>;

pub const OP_REGEX: &str = "$regex";
pub const OP_OPTIONS: &str = "$options";
pub const OP_IN: &str = "$in";
pub const OP_NIN: &str = "$nin";
pub const OP_EQ: &str = "$eq";
pub const OP_AND: &str = "$and";
pub const OP_OR: &str = "$or";

/// Binds an external key to one or more target fields.
#[derive(Clone)]
pub struct FieldSpec {
    targets: Vec<String>,
    operator: String,
    convert: Option<ScalarConvert>,
}

impl FieldSpec {
    /// Targets a single field.
    pub fn field(field: impl Into<String>, operator: impl Into<String>) -> Self {
        Self {
            targets: vec![field.into()],
            operator: operator.into(),
            convert: None,
        }
    }

    /// Targets several fields with the same operator, e.g. a keyword matched against
    /// both `title` and `body`.
    pub fn fields<I, S>(fields: I, operator: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            targets: fields.into_iter().map(Into::into).collect(),
            operator: operator.into(),
            convert: None,
        }
    }

    /// Converts the raw string value before it is used.
    pub fn convert<F>(mut self, convert: F) -> Self
    where
        F: Fn(&str) -> Result<Bson, BoxError> + Send + Sync + 'static,
    {
        self.convert = Some(Arc::new(convert));
        self
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    pub fn operator(&self) -> &str {
        &self.operator
    }
}

impl fmt::Debug for FieldSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSpec")
            .field("targets", &self.targets)
            .field("operator", &self.operator)
            .field("convert", &self.convert.is_some())
            .finish()
    }
}

/// Turns an external key into a sub-filter merged into the compiled result.
#[derive(Clone)]
pub struct DynamicSpec {
    convert: SubFilterConvert,
}

impl DynamicSpec {
    pub fn new<F>(convert: F) -> Self
    where
        F: Fn(&str) -> Result<Document, BoxError> + Send + Sync + 'static,
    {
        Self { convert: Arc::new(convert) }
    }
}

impl fmt::Debug for DynamicSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicSpec").finish_non_exhaustive()
    }
}

/// The rule attached to one external key.
#[derive(Debug, Clone)]
pub enum QuerySpec {
    Field(FieldSpec),
    Dynamic(DynamicSpec),
}

impl From<FieldSpec> for QuerySpec {
    fn from(spec: FieldSpec) -> Self {
        QuerySpec::Field(spec)
    }
}

impl From<DynamicSpec> for QuerySpec {
    fn from(spec: DynamicSpec) -> Self {
        QuerySpec::Dynamic(spec)
    }
}

/// External key → rule. Keys are kept in sorted order so compilation is deterministic.
#[derive(Debug, Clone, Default)]
pub struct QuerySpecSet {
    specs: BTreeMap<String, QuerySpec>,
}

impl QuerySpecSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) the rule for `key`.
    pub fn with(mut self, key: impl Into<String>, spec: impl Into<QuerySpec>) -> Self {
        self.specs.insert(key.into(), spec.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&QuerySpec> {
        self.specs.get(key)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Checks that every field rule names at least one field and an operator.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Config`] naming the first malformed key.
    pub fn validate(&self) -> DocumentStoreResult<()> {
        for (key, spec) in &self.specs {
            if let QuerySpec::Field(field) = spec {
                if field.targets.is_empty() || field.targets.iter().any(|t| t.is_empty()) {
                    return Err(DocumentStoreError::Config(format!(
                        "query spec [{}] must target at least one non-empty field",
                        key
                    )));
                }
                if field.operator.is_empty() {
                    return Err(DocumentStoreError::Config(format!(
                        "query spec [{}] has no operator",
                        key
                    )));
                }
            }
        }

        Ok(())
    }
}

/// A node of the logical composition applied by [`compile_with_logic`].
#[derive(Debug, Clone, PartialEq)]
pub enum LogicNode {
    /// Projects one field of the flat result.
    Leaf(String),
    /// All children must match.
    And(Vec<LogicNode>),
    /// Any child must match.
    Or(Vec<LogicNode>),
}

impl LogicNode {
    pub fn leaf(field: impl Into<String>) -> Self {
        LogicNode::Leaf(field.into())
    }

    pub fn and(children: impl IntoIterator<Item = LogicNode>) -> Self {
        LogicNode::And(children.into_iter().collect())
    }

    pub fn or(children: impl IntoIterator<Item = LogicNode>) -> Self {
        LogicNode::Or(children.into_iter().collect())
    }

    /// Rejects `And`/`Or` nodes without children, anywhere in the tree.
    pub fn validate(&self) -> DocumentStoreResult<()> {
        match self {
            LogicNode::Leaf(_) => Ok(()),
            LogicNode::And(children) | LogicNode::Or(children) => {
                if children.is_empty() {
                    return Err(DocumentStoreError::Config(
                        "logical query node must have at least one child".to_string(),
                    ));
                }
                children.iter().try_for_each(LogicNode::validate)
            }
        }
    }

    /// Folds `flat` through this node. Leaves naming absent fields are dropped, as are
    /// groups left without children.
    fn fold(&self, flat: &Document) -> Option<Document> {
        let (operator, children) = match self {
            LogicNode::Leaf(field) => {
                return flat
                    .get(field)
                    .map(|condition| doc! { field.clone(): condition.clone() });
            }
            LogicNode::And(children) => (OP_AND, children),
            LogicNode::Or(children) => (OP_OR, children),
        };

        let parts = children
            .iter()
            .filter_map(|child| child.fold(flat))
            .map(Bson::Document)
            .collect::<Vec<_>>();

        if parts.is_empty() {
            None
        } else {
            Some(doc! { operator: parts })
        }
    }
}

/// The outcome of a compilation.
#[derive(Debug, Clone, PartialEq)]
pub struct Compiled {
    /// The compiled filter, or `None` when no condition applies.
    pub filter: Option<Document>,
    /// The input parameters minus the dynamic keys that were consumed.
    pub remaining: ParamMap,
}

impl Compiled {
    /// The filter, or an empty (match-all) document.
    pub fn filter_or_all(&self) -> Document {
        self.filter.clone().unwrap_or_default()
    }
}

struct Contribution<'a> {
    key: &'a str,
    operator: &'a str,
    convert: Option<&'a ScalarConvert>,
}

/// Ordinary rules grouped by target field, in first-seen order.
type FieldGroups<'a> = Vec<(&'a str, Vec<Contribution<'a>>)>;

fn remap(specs: &QuerySpecSet) -> DocumentStoreResult<(FieldGroups<'_>, Vec<(&str, &SubFilterConvert)>)> {
    specs.validate()?;

    let mut ordinary: FieldGroups<'_> = Vec::new();
    let mut positions: HashMap<&str, usize> = HashMap::new();
    let mut dynamic = Vec::new();

    for (key, spec) in &specs.specs {
        match spec {
            QuerySpec::Dynamic(spec) => dynamic.push((key.as_str(), &spec.convert)),
            QuerySpec::Field(spec) => {
                for target in &spec.targets {
                    let position = *positions
                        .entry(target.as_str())
                        .or_insert_with(|| {
                            ordinary.push((target.as_str(), Vec::with_capacity(2)));
                            ordinary.len() - 1
                        });

                    ordinary[position].1.push(Contribution {
                        key: key.as_str(),
                        operator: spec.operator.as_str(),
                        convert: spec.convert.as_ref(),
                    });
                }
            }
        }
    }

    Ok((ordinary, dynamic))
}

fn conversion_error(key: &str, raw: &Bson, reason: impl Into<String>) -> DocumentStoreError {
    DocumentStoreError::Conversion {
        key: key.to_string(),
        value: raw.to_string(),
        type_name: format!("{:?}", raw.element_type()),
        reason: reason.into(),
    }
}

fn raw_str<'a>(key: &str, raw: &'a Bson) -> DocumentStoreResult<&'a str> {
    match raw {
        Bson::String(s) => Ok(s),
        other => Err(conversion_error(key, other, "converter input must be a string")),
    }
}

fn convert_value(key: &str, raw: &Bson, convert: Option<&ScalarConvert>) -> DocumentStoreResult<Bson> {
    match convert {
        None => Ok(raw.clone()),
        Some(convert) => convert(raw_str(key, raw)?).map_err(|e| conversion_error(key, raw, e.to_string())),
    }
}

fn append_and(result: &mut Document, members: impl IntoIterator<Item = Bson>) {
    let mut combined = match result.remove(OP_AND) {
        Some(Bson::Array(existing)) => existing,
        Some(other) => vec![other],
        None => Vec::new(),
    };
    combined.extend(members);
    result.insert(OP_AND, combined);
}

fn merge_dynamic(result: &mut Document, key: String, condition: Bson) {
    match key.as_str() {
        OP_AND => match condition {
            Bson::Array(members) => append_and(result, members),
            other => append_and(result, [other]),
        },
        OP_OR => match result.remove(OP_OR) {
            None => {
                result.insert(OP_OR, condition);
            }
            // Two $or groups must both hold, so they are combined under $and.
            Some(previous) => append_and(
                result,
                [
                    Bson::Document(doc! { OP_OR: previous }),
                    Bson::Document(doc! { OP_OR: condition }),
                ],
            ),
        },
        _ => {
            let mut merged = match result.get(&key) {
                Some(Bson::Document(existing)) => existing.clone(),
                Some(scalar) => doc! { OP_EQ: scalar.clone() },
                None => Document::new(),
            };

            match condition {
                Bson::Document(operators) => {
                    for (operator, value) in operators {
                        merged.insert(operator, value);
                    }
                }
                scalar => {
                    merged.insert(OP_EQ, scalar);
                }
            }

            result.insert(key, merged);
        }
    }
}

/// Compiles `input` into a filter document following `specs`.
///
/// With `strict` set, keys without a rule are ignored; otherwise they are kept as equality
/// conditions on the key of the same name.
///
/// # Errors
///
/// - [`DocumentStoreError::Config`] for malformed specs,
/// - [`DocumentStoreError::Conversion`] when a converter rejects its input,
/// - [`DocumentStoreError::Validation`] when `$in`/`$nin` receives a non-array value.
pub fn compile(mut input: ParamMap, specs: &QuerySpecSet, strict: bool) -> DocumentStoreResult<Compiled> {
    let (ordinary, dynamic) = remap(specs)?;
    let mut result = Document::new();
    let mut used: HashSet<&str> = HashSet::new();

    for (field, contributions) in &ordinary {
        let grouped = contributions.len() > 1;
        let mut condition: Option<Document> = None;

        for contribution in contributions {
            let Some(raw) = input.get(contribution.key) else {
                continue;
            };
            let value = convert_value(contribution.key, raw, contribution.convert)?;
            let operator = contribution.operator;
            let entry = condition.get_or_insert_with(Document::new);

            if grouped {
                entry.insert(operator, value);
                if operator == OP_REGEX {
                    entry.insert(OP_OPTIONS, "i");
                }
            } else {
                match operator {
                    OP_REGEX => *entry = doc! { OP_REGEX: value, OP_OPTIONS: "i" },
                    OP_IN | OP_NIN => match value {
                        Bson::Null => {}
                        Bson::Array(_) => *entry = doc! { operator: value },
                        other => {
                            return Err(DocumentStoreError::Validation(format!(
                                "{} value for key [{}] must be an array, got {:?}",
                                operator,
                                contribution.key,
                                other.element_type()
                            )));
                        }
                    },
                    _ => *entry = doc! { operator: value },
                }
            }

            used.insert(contribution.key);
        }

        if let Some(condition) = condition {
            result.insert(*field, condition);
        }
    }

    for (key, convert) in dynamic {
        let Some(raw) = input.remove(key) else {
            continue;
        };
        let sub_filter = convert(raw_str(key, &raw)?).map_err(|e| conversion_error(key, &raw, e.to_string()))?;

        for (name, condition) in sub_filter {
            merge_dynamic(&mut result, name, condition);
        }
    }

    if !strict {
        for (key, value) in &input {
            if !used.contains(key.as_str()) {
                result.insert(key.clone(), value.clone());
            }
        }
    }

    let result = result
        .into_iter()
        .filter(|(_, condition)| !matches!(condition, Bson::Document(d) if d.is_empty()))
        .collect::<Document>();

    let filter = if result.is_empty() { None } else { Some(result) };
    if let Some(filter) = &filter {
        trace!(filter = %pretty_document(filter), "compiled query");
    }

    Ok(Compiled { filter, remaining: input })
}

/// Compiles `input` as [`compile`] does, then folds the flat result through `logic`.
///
/// Only fields reached by a leaf of `logic` appear in the final filter.
///
/// # Errors
///
/// Everything [`compile`] returns, plus [`DocumentStoreError::Config`] for a logic tree
/// with an empty `And`/`Or` node.
pub fn compile_with_logic(
    input: ParamMap,
    specs: &QuerySpecSet,
    strict: bool,
    logic: &LogicNode,
) -> DocumentStoreResult<Compiled> {
    logic.validate()?;

    let Compiled { filter, remaining } = compile(input, specs, strict)?;

    Ok(Compiled {
        filter: filter.and_then(|flat| logic.fold(&flat)),
        remaining,
    })
}
