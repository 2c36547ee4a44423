/*!
Column descriptors and the registry that owns them.

A [`ColumnDescriptor`] says which column a value lands in, how to coerce it,
and where to look for it at runtime. Descriptors are parsed once from a
[`PropertySet`] and never mutated afterwards; per-cycle values live in
[`ResolvedValues`](crate::resolver::ResolvedValues), keyed by [`DescriptorId`].

A registry holds two ordered lists: the column descriptors that feed the
INSERT projection or the UPDATE `SET` list, and the nameless WHERE
descriptors whose values fill the `?` slots of a configured WHERE template.
The template's placeholder count is checked against the WHERE list when the
registry is built, so a mismatch never reaches a database.
*/

use crate::date_format::{DateFormat, ZoneShift};
use crate::error::{ColmapError, Result};
use crate::properties::{self, indexed, PropertySet};
use crate::value::ColumnValue;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// Type tag driving binder coercion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SqlTypeTag {
    /// Bind the resolved value as-is
    #[default]
    Default,
    Date,
    TextBlob,
    BinaryBlob,
}

impl SqlTypeTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SqlTypeTag::Default => "",
            SqlTypeTag::Date => "DATE",
            SqlTypeTag::TextBlob => "TEXT_BLOB",
            SqlTypeTag::BinaryBlob => "BINARY_BLOB",
        }
    }
}

impl FromStr for SqlTypeTag {
    type Err = ColmapError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "" | "DEFAULT" => Ok(SqlTypeTag::Default),
            "DATE" => Ok(SqlTypeTag::Date),
            "TEXT_BLOB" => Ok(SqlTypeTag::TextBlob),
            "BINARY_BLOB" => Ok(SqlTypeTag::BinaryBlob),
            other => Err(ColmapError::configuration(format!(
                "invalid column-type property value [{}]",
                other
            ))),
        }
    }
}

impl fmt::Display for SqlTypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable handle of a descriptor inside its registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DescriptorId {
    Column(usize),
    Where(usize),
}

impl fmt::Display for DescriptorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptorId::Column(ix) => write!(f, "column #{}", ix),
            DescriptorId::Where(ix) => write!(f, "where #{}", ix),
        }
    }
}

/// Configuration of one column (or one WHERE parameter when `name` is `None`)
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescriptor {
    pub name: Option<String>,
    pub tag: SqlTypeTag,
    pub date_format: Option<DateFormat>,
    pub location_chain: Vec<String>,
    pub default_value: Option<ColumnValue>,
    pub optional: bool,
    pub zone_shift: Option<ZoneShift>,
}

impl ColumnDescriptor {
    /// A named column, required unless marked otherwise
    pub fn column(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            tag: SqlTypeTag::Default,
            date_format: None,
            location_chain: Vec::new(),
            default_value: None,
            optional: false,
            zone_shift: None,
        }
    }

    /// A nameless WHERE parameter; always required
    pub fn where_param() -> Self {
        Self {
            name: None,
            ..Self::column("")
        }
    }

    pub fn located_at<I, S>(mut self, chain: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.location_chain = chain.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_default(mut self, value: impl Into<ColumnValue>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    pub fn tagged(mut self, tag: SqlTypeTag) -> Self {
        self.tag = tag;
        self
    }

    pub fn date(mut self, pattern: &str) -> Result<Self> {
        self.tag = SqlTypeTag::Date;
        self.date_format = Some(DateFormat::new(pattern)?);
        Ok(self)
    }

    pub fn with_zone_shift(mut self, input: &str, output: &str) -> Result<Self> {
        self.zone_shift = Some(ZoneShift::new(input, output)?);
        Ok(self)
    }

    pub fn is_where_param(&self) -> bool {
        self.name.is_none()
    }

    /// Name used in log lines and errors
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("WHERE[{}]", self.location_chain.join("|")),
        }
    }

    /// One-line summary used in diagnostics
    pub fn describe(&self) -> String {
        let mut out = String::new();
        if let Some(name) = &self.name {
            out.push_str(&format!("Column-name [{}], ", name));
        }
        if self.tag != SqlTypeTag::Default {
            out.push_str(&format!("column-type [{}], ", self.tag));
        }
        if let Some(fmt) = &self.date_format {
            out.push_str(&format!("date-format [{}], ", fmt));
        }
        out.push_str(&format!("location [{}], ", self.location_chain.join("|")));
        if let Some(default) = &self.default_value {
            out.push_str(&format!("default [{}], ", default));
        }
        out.push_str(&format!("optional [{}]", self.optional));
        out
    }
}

impl fmt::Display for ColumnDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Property names making up one index-suffixed descriptor family
#[derive(Debug, Clone, Copy)]
pub struct FamilyKeys {
    /// `None` for nameless (WHERE) families
    pub name: Option<&'static str>,
    pub tag: &'static str,
    pub date_format: &'static str,
    /// `None` when the descriptor is looked up by its own name
    pub location: Option<&'static str>,
    pub default: Option<&'static str>,
    /// `None` when optionality is fixed for the family
    pub optional: Option<&'static str>,
    pub fixed_optional: bool,
    pub input_timezone: Option<&'static str>,
    pub output_timezone: Option<&'static str>,
}

/// `COLUMN_#`, `COLUMN_TYPE_#`, `LOCATION_#`, ...
pub const COLUMN_FAMILY: FamilyKeys = FamilyKeys {
    name: Some(properties::COLUMN),
    tag: properties::COLUMN_TYPE,
    date_format: properties::DATE_FORMAT,
    location: Some(properties::LOCATION),
    default: Some(properties::DEFAULT),
    optional: Some(properties::OPTIONAL),
    fixed_optional: false,
    input_timezone: Some(properties::INPUT_TIMEZONE),
    output_timezone: Some(properties::OUTPUT_TIMEZONE),
};

/// `WHERE_LOCATION_#`, `WHERE_COLUMN_TYPE_#`, ...
pub const WHERE_FAMILY: FamilyKeys = FamilyKeys {
    name: None,
    tag: properties::WHERE_COLUMN_TYPE,
    date_format: properties::WHERE_DATE_FORMAT,
    location: Some(properties::WHERE_LOCATION),
    default: Some(properties::WHERE_DEFAULT),
    optional: None,
    fixed_optional: false,
    input_timezone: None,
    output_timezone: None,
};

/// `STAGING_COLUMN_#`, `STAGING_COLUMN_TYPE_#`, `STAGING_DATE_FORMAT_#`
pub const STAGING_FAMILY: FamilyKeys = FamilyKeys {
    name: Some(properties::STAGING_COLUMN),
    tag: properties::STAGING_COLUMN_TYPE,
    date_format: properties::STAGING_DATE_FORMAT,
    location: None,
    default: None,
    optional: None,
    fixed_optional: true,
    input_timezone: None,
    output_timezone: None,
};

/// Split a configured location into its chain of tokens
pub fn split_chain(raw: &str, separator: &str) -> Vec<String> {
    raw.split(separator)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Read every member of a family, starting at index 0 and stopping at the first gap.
/// Named families are anchored on the name key; nameless ones on the location
/// or default key, so a WHERE value given only as a default still counts.
pub fn load_family(
    props: &PropertySet,
    keys: &FamilyKeys,
    separator: &str,
) -> Result<Vec<ColumnDescriptor>> {
    let anchors: Vec<&str> = match keys.name {
        Some(name) => vec![name],
        None => keys.location.into_iter().chain(keys.default).collect(),
    };
    if anchors.is_empty() {
        return Err(ColmapError::configuration(
            "descriptor family has neither name nor location keys",
        ));
    }

    let mut descriptors = Vec::new();
    for ix in 0.. {
        if !anchors.iter().any(|anchor| props.contains(&indexed(anchor, ix))) {
            break;
        }

        let descriptor = load_one(props, keys, separator, ix)?;
        debug!("Loaded descriptor {}: {}", ix, descriptor.describe());
        descriptors.push(descriptor);
    }

    Ok(descriptors)
}

fn load_one(
    props: &PropertySet,
    keys: &FamilyKeys,
    separator: &str,
    ix: usize,
) -> Result<ColumnDescriptor> {
    let name = keys
        .name
        .map(|k| props.required(&indexed(k, ix)).map(|v| v.trim().to_string()))
        .transpose()?;

    let tag: SqlTypeTag = props.get_or(&indexed(keys.tag, ix), "").parse()?;

    let date_format = props
        .get(&indexed(keys.date_format, ix))
        .map(DateFormat::new)
        .transpose()?;

    let location_chain = match (keys.location, &name) {
        (Some(k), _) => props
            .get(&indexed(k, ix))
            .map(|raw| split_chain(raw, separator))
            .unwrap_or_default(),
        (None, Some(name)) => vec![name.clone()],
        (None, None) => Vec::new(),
    };

    let default_value = keys
        .default
        .and_then(|k| props.get(&indexed(k, ix)))
        .map(ColumnValue::from);

    let optional = match keys.optional {
        Some(k) => {
            let key = indexed(k, ix);
            let raw = props.required(&key)?;
            properties::parse_bool(raw).ok_or_else(|| {
                ColmapError::configuration(format!("property {} has non-boolean value [{}]", key, raw))
            })?
        }
        None => keys.fixed_optional,
    };

    let zone_shift = match (
        keys.input_timezone.and_then(|k| props.get(&indexed(k, ix))),
        keys.output_timezone.and_then(|k| props.get(&indexed(k, ix))),
    ) {
        (Some(input), Some(output)) => Some(ZoneShift::new(input, output)?),
        _ => None,
    };

    if location_chain.is_empty() && default_value.is_none() {
        return Err(ColmapError::configuration(format!(
            "descriptor {} has neither a location nor a default value",
            ix
        )));
    }

    if tag != SqlTypeTag::Date && zone_shift.is_some() {
        return Err(ColmapError::configuration(format!(
            "descriptor {} configures time zones but is not a DATE column",
            ix
        )));
    }

    Ok(ColumnDescriptor {
        name,
        tag,
        date_format,
        location_chain,
        default_value,
        optional,
        zone_shift,
    })
}

/// Count `?` placeholders outside single-quoted literals
pub fn count_placeholders(template: &str) -> usize {
    let mut in_literal = false;
    let mut count = 0;
    for c in template.chars() {
        match c {
            '\'' => in_literal = !in_literal,
            '?' if !in_literal => count += 1,
            _ => {}
        }
    }
    count
}

/// Configured WHERE text plus the descriptors filling its placeholders
#[derive(Debug, Clone, PartialEq)]
pub struct WhereClause {
    template: String,
    descriptors: Vec<ColumnDescriptor>,
}

impl WhereClause {
    pub fn new(template: impl Into<String>, descriptors: Vec<ColumnDescriptor>) -> Result<Self> {
        let template = template.into();
        let placeholders = count_placeholders(&template);
        if placeholders != descriptors.len() {
            return Err(ColmapError::configuration(format!(
                "WHERE template has {} placeholders but {} WHERE descriptors are configured",
                placeholders,
                descriptors.len()
            )));
        }
        if let Some(named) = descriptors.iter().find(|d| !d.is_where_param() || d.optional) {
            return Err(ColmapError::configuration(format!(
                "WHERE descriptor {} must be nameless and required",
                named.label()
            )));
        }
        Ok(Self {
            template,
            descriptors,
        })
    }

    /// Load `SQL_WHERE_STATEMENT` and the `WHERE_*` family, if a template is configured
    pub fn load(props: &PropertySet, separator: &str) -> Result<Option<Self>> {
        let descriptors = load_family(props, &WHERE_FAMILY, separator)?;
        match props.get(properties::WHERE_STATEMENT) {
            Some(template) => Self::new(template.trim(), descriptors).map(Some),
            None if descriptors.is_empty() => Ok(None),
            None => Err(ColmapError::configuration(format!(
                "{} WHERE descriptors configured without {}",
                descriptors.len(),
                properties::WHERE_STATEMENT
            ))),
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn descriptors(&self) -> &[ColumnDescriptor] {
        &self.descriptors
    }
}

/// Immutable, ordered descriptors for one processor instance
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DescriptorRegistry {
    columns: Vec<ColumnDescriptor>,
    where_clause: Option<WhereClause>,
}

impl DescriptorRegistry {
    pub fn new(columns: Vec<ColumnDescriptor>, where_clause: Option<WhereClause>) -> Result<Self> {
        if let Some(nameless) = columns.iter().position(ColumnDescriptor::is_where_param) {
            return Err(ColmapError::configuration(format!(
                "column descriptor {} has no column name",
                nameless
            )));
        }
        Ok(Self {
            columns,
            where_clause,
        })
    }

    /// Load the column family and, when present, the WHERE clause
    pub fn from_properties(props: &PropertySet, separator: &str) -> Result<Self> {
        let columns = load_family(props, &COLUMN_FAMILY, separator)?;
        let where_clause = WhereClause::load(props, separator)?;
        info!(
            "Loaded {} column descriptors and {} WHERE descriptors",
            columns.len(),
            where_clause.as_ref().map_or(0, |w| w.descriptors().len())
        );
        Self::new(columns, where_clause)
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn where_clause(&self) -> Option<&WhereClause> {
        self.where_clause.as_ref()
    }

    pub fn where_descriptors(&self) -> &[ColumnDescriptor] {
        self.where_clause
            .as_ref()
            .map(WhereClause::descriptors)
            .unwrap_or(&[])
    }

    pub fn get(&self, id: DescriptorId) -> Option<&ColumnDescriptor> {
        match id {
            DescriptorId::Column(ix) => self.columns.get(ix),
            DescriptorId::Where(ix) => self.where_descriptors().get(ix),
        }
    }

    /// Every descriptor in declared order: columns first, then WHERE parameters
    pub fn iter(&self) -> impl Iterator<Item = (DescriptorId, &ColumnDescriptor)> {
        let columns = self
            .columns
            .iter()
            .enumerate()
            .map(|(ix, d)| (DescriptorId::Column(ix), d));
        let wheres = self
            .where_descriptors()
            .iter()
            .enumerate()
            .map(|(ix, d)| (DescriptorId::Where(ix), d));
        columns.chain(wheres)
    }

    pub fn len(&self) -> usize {
        self.columns.len() + self.where_descriptors().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn describe(&self) -> String {
        let mut out = String::new();
        for (id, descriptor) in self.iter() {
            out.push_str(&format!("{}: {}\n", id, descriptor.describe()));
        }
        if let Some(clause) = &self.where_clause {
            out.push_str(&format!("where-template: {}\n", clause.template()));
        }
        out
    }
}
