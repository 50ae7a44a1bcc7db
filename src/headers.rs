//! Header rows and the column selection DSL.
//!
//! A selection is a comma-separated list of terms, optionally prefixed by `!`
//! to select the complement instead:
//!
//! | term              | meaning                                            |
//! |-------------------|----------------------------------------------------|
//! | `name`, `"a,b"`   | first column with that name (`\"` escapes quotes)   |
//! | `name[2]`         | third column sharing that name                     |
//! | `3`               | third column (positions are 1-based in the DSL)    |
//! | `A-B`, `A-`       | inclusive range, `A-` runs to the last column      |
//!
//! Parsed selectors always hold 0-based positions. Resolving a selection
//! against [`Headers`] yields column indices in selector order (duplicates
//! kept), or the sorted de-duplicated complement when inverted.

use std::{
    borrow::Cow,
    collections::{BTreeSet, HashMap},
    fmt,
    ops::Index,
    str::FromStr,
};

use crate::error::{CsvError, Result};

/// Reference to a single column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnKey {
    Name(String),
    /// The n-th (0-based) column sharing a name.
    Nth(String, usize),
    /// 0-based position.
    Index(usize),
}

impl From<&str> for ColumnKey {
    fn from(name: &str) -> Self {
        ColumnKey::Name(name.to_string())
    }
}

impl From<String> for ColumnKey {
    fn from(name: String) -> Self {
        ColumnKey::Name(name)
    }
}

impl From<&String> for ColumnKey {
    fn from(name: &String) -> Self {
        ColumnKey::Name(name.clone())
    }
}

impl From<usize> for ColumnKey {
    fn from(index: usize) -> Self {
        ColumnKey::Index(index)
    }
}

impl From<(&str, usize)> for ColumnKey {
    fn from((name, occurrence): (&str, usize)) -> Self {
        ColumnKey::Nth(name.to_string(), occurrence)
    }
}

impl From<&ColumnKey> for ColumnKey {
    fn from(key: &ColumnKey) -> Self {
        key.clone()
    }
}

impl fmt::Display for ColumnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnKey::Name(name) => write!(f, "{name}"),
            ColumnKey::Nth(name, occurrence) => write!(f, "{name}[{occurrence}]"),
            ColumnKey::Index(index) => write!(f, "#{index}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Single(ColumnKey),
    Indexed { name: String, occurrence: usize },
    Range {
        start: ColumnKey,
        end: Option<ColumnKey>,
    },
}

impl Selector {
    fn is_positional(&self) -> bool {
        match self {
            Selector::Single(key) => matches!(key, ColumnKey::Index(_)),
            Selector::Indexed { .. } => false,
            Selector::Range { start, end } => {
                matches!(start, ColumnKey::Index(_))
                    && end.as_ref().is_none_or(|e| matches!(e, ColumnKey::Index(_)))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    selectors: Vec<Selector>,
    inverted: bool,
}

impl Selection {
    pub fn parse(source: &str) -> Result<Self> {
        SelectionParser::parse(source)
    }

    pub fn selectors(&self) -> &[Selector] {
        &self.selectors
    }

    pub fn is_inverted(&self) -> bool {
        self.inverted
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Selector> {
        self.selectors.iter()
    }

    /// True when the selection only uses positions, so it can be resolved
    /// without a header row.
    pub fn is_suitable_without_headers(&self) -> bool {
        self.selectors.iter().all(Selector::is_positional)
    }
}

impl FromStr for Selection {
    type Err = CsvError;

    fn from_str(s: &str) -> Result<Self> {
        Selection::parse(s)
    }
}

impl<'a> IntoIterator for &'a Selection {
    type Item = &'a Selector;
    type IntoIter = std::slice::Iter<'a, Selector>;

    fn into_iter(self) -> Self::IntoIter {
        self.selectors.iter()
    }
}

struct Endpoint {
    text: String,
    quoted: bool,
}

struct SelectionParser<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> SelectionParser<'a> {
    fn parse(source: &'a str) -> Result<Selection> {
        let trimmed = source.trim_start();
        let (inverted, body) = match trimmed.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        if body.trim().is_empty() {
            return Err(CsvError::syntax(source, body, "empty selection"));
        }
        let mut parser = SelectionParser {
            source,
            chars: body.chars().collect(),
            pos: 0,
        };
        let mut selectors = Vec::new();
        loop {
            selectors.push(parser.term()?);
            parser.skip_whitespace();
            match parser.bump() {
                None => break,
                Some(',') => continue,
                Some(_) => {
                    parser.pos -= 1;
                    return Err(parser.error("unexpected character"));
                }
            }
        }
        Ok(Selection {
            selectors,
            inverted,
        })
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn rest_from(&self, start: usize) -> String {
        self.chars[start.min(self.chars.len())..].iter().collect()
    }

    fn error(&self, message: &str) -> CsvError {
        CsvError::syntax(self.source, &self.rest_from(self.pos), message)
    }

    fn term(&mut self) -> Result<Selector> {
        self.skip_whitespace();
        let start = self.pos;
        let first = self.endpoint()?;
        if first.text.is_empty() && !first.quoted {
            return Err(CsvError::syntax(
                self.source,
                &self.rest_from(start),
                "expected a column",
            ));
        }

        if self.peek() == Some('[') {
            self.pos += 1;
            let occurrence = self.occurrence(start)?;
            self.skip_whitespace();
            if self.peek() == Some('-') {
                return Err(CsvError::syntax(
                    self.source,
                    &self.rest_from(start),
                    "ranges cannot use occurrence indices",
                ));
            }
            return Ok(Selector::Indexed {
                name: first.text,
                occurrence,
            });
        }

        if self.peek() == Some('-') {
            self.pos += 1;
            let start_key = self.key(first, start)?;
            self.skip_whitespace();
            let end = match self.peek() {
                None | Some(',') => None,
                Some(_) => {
                    let end_start = self.pos;
                    let endpoint = self.endpoint()?;
                    if self.peek() == Some('[') {
                        return Err(CsvError::syntax(
                            self.source,
                            &self.rest_from(end_start),
                            "ranges cannot use occurrence indices",
                        ));
                    }
                    Some(self.key(endpoint, end_start)?)
                }
            };
            return Ok(Selector::Range {
                start: start_key,
                end,
            });
        }

        Ok(Selector::Single(self.key(first, start)?))
    }

    fn endpoint(&mut self) -> Result<Endpoint> {
        self.skip_whitespace();
        let mut text = String::new();
        if self.peek() == Some('"') {
            let start = self.pos;
            self.pos += 1;
            loop {
                match self.bump() {
                    None => {
                        return Err(CsvError::syntax(
                            self.source,
                            &self.rest_from(start),
                            "unterminated quoted column",
                        ));
                    }
                    Some('\\') => match self.bump() {
                        Some(c) => text.push(c),
                        None => return Err(self.error("dangling escape")),
                    },
                    Some('"') => break,
                    Some(c) => text.push(c),
                }
            }
            self.skip_whitespace();
            return Ok(Endpoint { text, quoted: true });
        }

        while let Some(c) = self.peek() {
            match c {
                ',' | '-' | '[' => break,
                '\\' => {
                    self.pos += 1;
                    match self.bump() {
                        Some(escaped) => text.push(escaped),
                        None => return Err(self.error("dangling escape")),
                    }
                }
                _ => {
                    text.push(c);
                    self.pos += 1;
                }
            }
        }
        Ok(Endpoint {
            text: text.trim().to_string(),
            quoted: false,
        })
    }

    fn occurrence(&mut self, start: usize) -> Result<usize> {
        let mut digits = String::new();
        loop {
            match self.bump() {
                Some(']') => break,
                Some(c) if c.is_ascii_digit() => digits.push(c),
                _ => {
                    return Err(CsvError::syntax(
                        self.source,
                        &self.rest_from(start),
                        "malformed occurrence index",
                    ));
                }
            }
        }
        digits.parse::<usize>().map_err(|_| {
            CsvError::syntax(
                self.source,
                &self.rest_from(start),
                "malformed occurrence index",
            )
        })
    }

    fn key(&self, endpoint: Endpoint, start: usize) -> Result<ColumnKey> {
        if endpoint.quoted {
            return Ok(ColumnKey::Name(endpoint.text));
        }
        if endpoint.text.is_empty() {
            return Err(CsvError::syntax(
                self.source,
                &self.rest_from(start),
                "expected a column",
            ));
        }
        if endpoint.text.chars().all(|c| c.is_ascii_digit()) {
            let position = endpoint.text.parse::<usize>().map_err(|_| {
                CsvError::syntax(self.source, &endpoint.text, "position is too large")
            })?;
            if position == 0 {
                return Err(CsvError::syntax(
                    self.source,
                    &endpoint.text,
                    "positions start at 1",
                ));
            }
            return Ok(ColumnKey::Index(position - 1));
        }
        Ok(ColumnKey::Name(endpoint.text))
    }
}

/// Ordered column names with a name → positions lookup table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Headers {
    fieldnames: Vec<String>,
    mapping: HashMap<String, Vec<usize>>,
}

impl Headers {
    pub fn new<I, S>(fieldnames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fieldnames: Vec<String> = fieldnames.into_iter().map(Into::into).collect();
        let mut mapping: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, name) in fieldnames.iter().enumerate() {
            mapping.entry(name.clone()).or_default().push(idx);
        }
        Headers {
            fieldnames,
            mapping,
        }
    }

    pub fn len(&self) -> usize {
        self.fieldnames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fieldnames.is_empty()
    }

    pub fn fieldnames(&self) -> &[String] {
        &self.fieldnames
    }

    /// `(name, position)` pairs in header order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> + '_ {
        self.fieldnames
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.as_str(), idx))
    }

    /// Positions of every column carrying `name`, in ascending order.
    pub fn positions(&self, name: &str) -> &[usize] {
        self.mapping.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Name → first position.
    pub fn as_map(&self) -> HashMap<&str, usize> {
        self.mapping
            .iter()
            .map(|(name, positions)| (name.as_str(), positions[0]))
            .collect()
    }

    pub fn contains<K: Into<ColumnKey>>(&self, key: K) -> bool {
        self.get(key).is_some()
    }

    pub fn get<K: Into<ColumnKey>>(&self, key: K) -> Option<usize> {
        self.resolve_key(&key.into()).ok()
    }

    pub fn index_of<K: Into<ColumnKey>>(&self, key: K) -> Result<usize> {
        self.resolve_key(&key.into())
    }

    pub fn resolve_key(&self, key: &ColumnKey) -> Result<usize> {
        match key {
            ColumnKey::Name(name) => self.nth_occurrence(name, 0),
            ColumnKey::Nth(name, occurrence) => self.nth_occurrence(name, *occurrence),
            ColumnKey::Index(index) => {
                if *index < self.len() {
                    Ok(*index)
                } else {
                    Err(CsvError::ColumnOutOfRange {
                        index: *index,
                        len: self.len(),
                    })
                }
            }
        }
    }

    fn nth_occurrence(&self, name: &str, occurrence: usize) -> Result<usize> {
        let positions = self
            .mapping
            .get(name)
            .ok_or_else(|| CsvError::UnknownColumn {
                name: name.to_string(),
            })?;
        positions
            .get(occurrence)
            .copied()
            .ok_or(CsvError::OccurrenceOutOfRange {
                name: name.to_string(),
                occurrence,
                available: positions.len(),
            })
    }

    pub fn nth(&self, index: usize) -> Result<&str> {
        self.fieldnames
            .get(index)
            .map(String::as_str)
            .ok_or(CsvError::ColumnOutOfRange {
                index,
                len: self.len(),
            })
    }

    /// New headers where every column called `old` is called `new`.
    pub fn rename(&self, old: &str, new: &str) -> Headers {
        Headers::new(self.fieldnames.iter().map(|name| {
            if name == old {
                new.to_string()
            } else {
                name.clone()
            }
        }))
    }

    pub fn select(&self, selection: &str) -> Result<Vec<usize>> {
        self.select_parsed(&Selection::parse(selection)?)
    }

    pub fn select_parsed(&self, selection: &Selection) -> Result<Vec<usize>> {
        resolve_selection(selection, self.len(), Some(self))
    }

    /// Resolves a purely positional selection against rows of `row_len`
    /// cells.
    pub fn select_no_headers(row_len: usize, selection: &str) -> Result<Vec<usize>> {
        let parsed = Selection::parse(selection)?;
        if !parsed.is_suitable_without_headers() {
            return Err(CsvError::HeadersRequired(format!(
                "selection '{selection}' refers to columns by name"
            )));
        }
        resolve_selection(&parsed, row_len, None)
    }

    pub fn project(&self, template: &Template) -> Result<Projection> {
        Ok(Projection {
            plan: plan_nested(self, template)?,
        })
    }

    /// Like [`Headers::project`], but leaf names go through the selection DSL
    /// and tuples are flattened into a single positional tuple.
    pub fn flat_project(&self, template: &Template) -> Result<Projection> {
        Ok(Projection {
            plan: plan_flat(self, template)?,
        })
    }

    pub fn wrap<'a>(&'a self, row: &'a [String]) -> RowView<'a> {
        RowView {
            headers: self,
            cells: Cow::Borrowed(row),
        }
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fieldnames.join(","))
    }
}

pub(crate) fn resolve_selection(
    selection: &Selection,
    len: usize,
    headers: Option<&Headers>,
) -> Result<Vec<usize>> {
    let resolve = |key: &ColumnKey| -> Result<usize> {
        match (key, headers) {
            (_, Some(headers)) => headers.resolve_key(key),
            (ColumnKey::Index(index), None) => {
                if *index < len {
                    Ok(*index)
                } else {
                    Err(CsvError::ColumnOutOfRange { index: *index, len })
                }
            }
            (other, None) => Err(CsvError::HeadersRequired(format!(
                "cannot resolve column '{other}' without headers"
            ))),
        }
    };

    let mut indices = Vec::new();
    for selector in selection.iter() {
        match selector {
            Selector::Single(key) => indices.push(resolve(key)?),
            Selector::Indexed { name, occurrence } => {
                indices.push(resolve(&ColumnKey::Nth(name.clone(), *occurrence))?)
            }
            Selector::Range { start, end } => {
                let first = resolve(start)?;
                let last = match end {
                    Some(end) => resolve(end)?,
                    None if len == 0 => {
                        return Err(CsvError::ColumnOutOfRange { index: 0, len });
                    }
                    None => len - 1,
                };
                if first <= last {
                    indices.extend(first..=last);
                } else {
                    indices.extend((last..=first).rev());
                }
            }
        }
    }

    if selection.is_inverted() {
        let excluded: BTreeSet<usize> = indices.into_iter().collect();
        return Ok((0..len).filter(|idx| !excluded.contains(idx)).collect());
    }
    Ok(indices)
}

/// Shape of a projection: leaves are column references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Template {
    Column(ColumnKey),
    Tuple(Vec<Template>),
    Record(Vec<(String, Template)>),
}

impl Template {
    pub fn column<K: Into<ColumnKey>>(key: K) -> Self {
        Template::Column(key.into())
    }

    pub fn tuple<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Template>,
    {
        Template::Tuple(items.into_iter().map(Into::into).collect())
    }

    pub fn record<I, S, T>(fields: I) -> Self
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
        T: Into<Template>,
    {
        Template::Record(
            fields
                .into_iter()
                .map(|(name, template)| (name.into(), template.into()))
                .collect(),
        )
    }
}

impl From<&str> for Template {
    fn from(name: &str) -> Self {
        Template::Column(name.into())
    }
}

impl From<usize> for Template {
    fn from(index: usize) -> Self {
        Template::Column(index.into())
    }
}

impl From<ColumnKey> for Template {
    fn from(key: ColumnKey) -> Self {
        Template::Column(key)
    }
}

/// Value produced by a [`Projection`], mirroring its [`Template`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projected {
    Cell(String),
    Tuple(Vec<Projected>),
    Record(Vec<(String, Projected)>),
}

impl Projected {
    pub fn as_cell(&self) -> Option<&str> {
        match self {
            Projected::Cell(value) => Some(value),
            _ => None,
        }
    }

    /// Leaf cells in order, whatever the shape.
    pub fn flatten(&self) -> Vec<&str> {
        match self {
            Projected::Cell(value) => vec![value.as_str()],
            Projected::Tuple(items) => items.iter().flat_map(Projected::flatten).collect(),
            Projected::Record(fields) => fields.iter().flat_map(|(_, v)| v.flatten()).collect(),
        }
    }
}

impl From<&str> for Projected {
    fn from(value: &str) -> Self {
        Projected::Cell(value.to_string())
    }
}

#[derive(Debug, Clone)]
enum Plan {
    Cell(usize),
    Cells(Vec<usize>),
    Tuple(Vec<Plan>),
    Record(Vec<(String, Plan)>),
}

/// Compiled projection: column lookups are resolved once.
#[derive(Debug, Clone)]
pub struct Projection {
    plan: Plan,
}

impl Projection {
    pub fn apply(&self, row: &[String]) -> Projected {
        apply_plan(&self.plan, row)
    }
}

fn cell(row: &[String], idx: usize) -> String {
    row.get(idx).cloned().unwrap_or_default()
}

fn apply_plan(plan: &Plan, row: &[String]) -> Projected {
    match plan {
        Plan::Cell(idx) => Projected::Cell(cell(row, *idx)),
        Plan::Cells(indices) => Projected::Tuple(
            indices
                .iter()
                .map(|idx| Projected::Cell(cell(row, *idx)))
                .collect(),
        ),
        Plan::Tuple(items) => Projected::Tuple(items.iter().map(|p| apply_plan(p, row)).collect()),
        Plan::Record(fields) => Projected::Record(
            fields
                .iter()
                .map(|(name, p)| (name.clone(), apply_plan(p, row)))
                .collect(),
        ),
    }
}

fn plan_nested(headers: &Headers, template: &Template) -> Result<Plan> {
    match template {
        Template::Column(key) => Ok(Plan::Cell(headers.resolve_key(key)?)),
        Template::Tuple(items) => Ok(Plan::Tuple(
            items
                .iter()
                .map(|item| plan_nested(headers, item))
                .collect::<Result<_>>()?,
        )),
        Template::Record(fields) => Ok(Plan::Record(
            fields
                .iter()
                .map(|(name, item)| Ok((name.clone(), plan_nested(headers, item)?)))
                .collect::<Result<_>>()?,
        )),
    }
}

fn flat_leaf(headers: &Headers, key: &ColumnKey) -> Result<Vec<usize>> {
    match key {
        ColumnKey::Name(expr) => headers.select(expr),
        other => Ok(vec![headers.resolve_key(other)?]),
    }
}

fn collect_flat(headers: &Headers, template: &Template, out: &mut Vec<usize>) -> Result<()> {
    match template {
        Template::Column(key) => out.extend(flat_leaf(headers, key)?),
        Template::Tuple(items) => {
            for item in items {
                collect_flat(headers, item, out)?;
            }
        }
        Template::Record(_) => {
            return Err(CsvError::InvalidConfiguration(
                "flat projections cannot nest records inside tuples".to_string(),
            ));
        }
    }
    Ok(())
}

fn plan_flat(headers: &Headers, template: &Template) -> Result<Plan> {
    match template {
        Template::Column(key) => {
            let indices = flat_leaf(headers, key)?;
            Ok(match indices.as_slice() {
                [single] => Plan::Cell(*single),
                _ => Plan::Cells(indices),
            })
        }
        Template::Tuple(_) => {
            let mut indices = Vec::new();
            collect_flat(headers, template, &mut indices)?;
            Ok(Plan::Cells(indices))
        }
        Template::Record(fields) => Ok(Plan::Record(
            fields
                .iter()
                .map(|(name, item)| Ok((name.clone(), plan_flat(headers, item)?)))
                .collect::<Result<_>>()?,
        )),
    }
}

/// Read-only view pairing a row with its headers. The cells are borrowed
/// until [`RowView::replace`] swaps in an owned row.
#[derive(Debug, Clone)]
pub struct RowView<'a> {
    headers: &'a Headers,
    cells: Cow<'a, [String]>,
}

impl<'a> RowView<'a> {
    pub fn headers(&self) -> &Headers {
        self.headers
    }

    pub fn get<K: Into<ColumnKey>>(&self, key: K) -> Option<&str> {
        let idx = self.headers.get(key)?;
        self.cells.get(idx).map(String::as_str)
    }

    pub fn contains<K: Into<ColumnKey>>(&self, key: K) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.cells.iter()
    }

    /// `(column name, cell)` pairs.
    pub fn cells(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.headers
            .fieldnames()
            .iter()
            .zip(self.cells.iter())
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn as_slice(&self) -> &[String] {
        &self.cells
    }

    pub fn replace(&mut self, cells: Vec<String>) -> Result<()> {
        if cells.len() != self.headers.len() {
            return Err(CsvError::RowLengthMismatch {
                expected: self.headers.len(),
                actual: cells.len(),
            });
        }
        self.cells = Cow::Owned(cells);
        Ok(())
    }

    pub fn into_owned(self) -> Vec<String> {
        self.cells.into_owned()
    }
}

impl Index<usize> for RowView<'_> {
    type Output = str;

    fn index(&self, index: usize) -> &str {
        &self.cells[index]
    }
}

impl Index<&str> for RowView<'_> {
    type Output = str;

    fn index(&self, name: &str) -> &str {
        self.get(name)
            .unwrap_or_else(|| panic!("no column named '{name}'"))
    }
}

impl Index<(&str, usize)> for RowView<'_> {
    type Output = str;

    fn index(&self, key: (&str, usize)) -> &str {
        self.get(key)
            .unwrap_or_else(|| panic!("no occurrence {} of column '{}'", key.1, key.0))
    }
}

impl<'b> IntoIterator for &'b RowView<'_> {
    type Item = &'b String;
    type IntoIter = std::slice::Iter<'b, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.cells.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dsl_headers() -> Headers {
        Headers::new([
            "Header1",
            "Header2",
            "Header3",
            "Header4",
            "Foo",
            "Foo",
            "Header5",
            "Foo",
            "Date - Opening",
            "Date - Actual Closing",
            "Header, Whatever",
        ])
    }

    fn name(n: &str) -> ColumnKey {
        ColumnKey::Name(n.to_string())
    }

    #[test]
    fn lookup_errors_are_specific() {
        let headers = Headers::new(["Foo"]);
        assert!(matches!(
            headers.index_of("Bar"),
            Err(CsvError::UnknownColumn { .. })
        ));
        assert!(matches!(
            headers.index_of(("Foo", 1usize)),
            Err(CsvError::OccurrenceOutOfRange { available: 1, .. })
        ));
        assert!(matches!(
            headers.index_of(1usize),
            Err(CsvError::ColumnOutOfRange { index: 1, len: 1 })
        ));
        assert!(headers.nth(4).is_err());
    }

    #[test]
    fn duplicate_names_resolve_by_occurrence() {
        let headers = Headers::new(["Foo", "Foo", "Nope", "Foo"]);
        assert_eq!(headers.get("Foo"), Some(0));
        assert_eq!(headers.get(("Foo", 2usize)), Some(3));
        assert_eq!(headers.positions("Foo"), &[0, 1, 3]);
        assert_eq!(headers.get("Coco"), None);
    }

    #[test]
    fn parse_selection_handles_every_term_kind() {
        let selection = Selection::parse(
            r#""Date - Opening","Date - Actual Closing",Header1-Header2,Foo[3],"Header, Whatever",1-4,3-,2,9-5"#,
        )
        .unwrap();

        assert_eq!(
            selection.selectors(),
            &[
                Selector::Single(name("Date - Opening")),
                Selector::Single(name("Date - Actual Closing")),
                Selector::Range {
                    start: name("Header1"),
                    end: Some(name("Header2")),
                },
                Selector::Indexed {
                    name: "Foo".to_string(),
                    occurrence: 3,
                },
                Selector::Single(name("Header, Whatever")),
                Selector::Range {
                    start: ColumnKey::Index(0),
                    end: Some(ColumnKey::Index(3)),
                },
                Selector::Range {
                    start: ColumnKey::Index(2),
                    end: None,
                },
                Selector::Single(ColumnKey::Index(1)),
                Selector::Range {
                    start: ColumnKey::Index(8),
                    end: Some(ColumnKey::Index(4)),
                },
            ]
        );

        let inverted = Selection::parse("!1-4").unwrap();
        assert!(inverted.is_inverted());
        assert_eq!(
            inverted.selectors(),
            &[Selector::Range {
                start: ColumnKey::Index(0),
                end: Some(ColumnKey::Index(3)),
            }]
        );
    }

    #[test]
    fn parse_selection_unescapes_quotes() {
        let bare = Selection::parse(r#"\"Hey\""#).unwrap();
        assert_eq!(bare.selectors(), &[Selector::Single(name("\"Hey\""))]);

        let quoted = Selection::parse(r#""Date - \"Opening""#).unwrap();
        assert_eq!(
            quoted.selectors(),
            &[Selector::Single(name("Date - \"Opening"))]
        );
    }

    #[test]
    fn parse_selection_rejects_malformed_input() {
        for bad in ["", "!", "-3", "a,,b", "\"open", "Foo[x]", "0", "Foo[1]-3", "\"a\"b"] {
            let err = Selection::parse(bad);
            assert!(
                matches!(err, Err(CsvError::SelectionSyntax { .. })),
                "expected syntax error for {bad:?}, got {err:?}"
            );
        }
    }

    #[test]
    fn select_resolves_ranges_and_duplicates() {
        let headers = dsl_headers();
        assert_eq!(headers.select("1-4").unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(
            headers
                .select(r#"Header2,1-4,6-4,"Date - Opening",1-1,10-"#)
                .unwrap(),
            vec![1, 0, 1, 2, 3, 5, 4, 3, 8, 0, 9, 10]
        );
        assert_eq!(headers.select("Foo[1]").unwrap(), vec![5]);
        assert_eq!(headers.select("2-6").unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn inverted_selection_is_sorted_complement() {
        let headers = dsl_headers();
        assert_eq!(
            headers.select("!Header2").unwrap(),
            vec![0, 2, 3, 4, 5, 6, 7, 8, 9, 10]
        );
        assert_eq!(
            headers.select("!Foo[1]").unwrap(),
            vec![0, 1, 2, 3, 4, 6, 7, 8, 9, 10]
        );
        assert_eq!(headers.select("!2-6").unwrap(), vec![0, 6, 7, 8, 9, 10]);
        assert_eq!(headers.select("!3,1,3").unwrap().len(), 9);
    }

    #[test]
    fn select_reports_resolution_errors() {
        let headers = dsl_headers();
        assert!(matches!(
            headers.select("Missing"),
            Err(CsvError::UnknownColumn { .. })
        ));
        assert!(matches!(
            headers.select("Foo[3]"),
            Err(CsvError::OccurrenceOutOfRange { .. })
        ));
        assert!(matches!(
            headers.select("12"),
            Err(CsvError::ColumnOutOfRange { .. })
        ));
    }

    #[test]
    fn selection_without_headers_must_be_positional() {
        assert!(Selection::parse("3").unwrap().is_suitable_without_headers());
        assert!(Selection::parse("2-").unwrap().is_suitable_without_headers());
        assert!(!Selection::parse("Header1").unwrap().is_suitable_without_headers());
        assert!(!Selection::parse("1-Header1").unwrap().is_suitable_without_headers());

        assert!(matches!(
            Headers::select_no_headers(3, "Header1"),
            Err(CsvError::HeadersRequired(_))
        ));
        assert!(matches!(
            Headers::select_no_headers(2, "6"),
            Err(CsvError::ColumnOutOfRange { .. })
        ));
        assert_eq!(Headers::select_no_headers(5, "1-4").unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn projection_reproduces_template_shape() {
        let headers = Headers::new(["name", "surname", "age", "height"]);
        let row: Vec<String> = ["John", "Williams", "45", "190"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let p = headers
            .project(&Template::record([
                ("name", Template::from("name")),
                ("surname", Template::from(1usize)),
                ("numbers", Template::tuple(["age", "height"])),
            ]))
            .unwrap();
        assert_eq!(
            p.apply(&row),
            Projected::Record(vec![
                ("name".to_string(), "John".into()),
                ("surname".to_string(), "Williams".into()),
                (
                    "numbers".to_string(),
                    Projected::Tuple(vec!["45".into(), "190".into()])
                ),
            ])
        );

        let p = headers
            .project(&Template::tuple([
                Template::from("age"),
                Template::tuple(["name", "surname"]),
            ]))
            .unwrap();
        assert_eq!(
            p.apply(&row),
            Projected::Tuple(vec![
                "45".into(),
                Projected::Tuple(vec!["John".into(), "Williams".into()]),
            ])
        );

        let p = headers.project(&"age".into()).unwrap();
        assert_eq!(p.apply(&row).as_cell(), Some("45"));
        assert!(headers.project(&"weight".into()).is_err());
    }

    #[test]
    fn flat_projection_splices_selections() {
        let headers = Headers::new(["name", "surname", "age", "height", "surname"]);
        let row: Vec<String> = ["John", "Williams", "45", "190", "Garou"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let p = headers
            .flat_project(&Template::tuple(["name", "surname[1]"]))
            .unwrap();
        assert_eq!(
            p.apply(&row),
            Projected::Tuple(vec!["John".into(), "Garou".into()])
        );

        let p = headers.flat_project(&"age".into()).unwrap();
        assert_eq!(p.apply(&row).as_cell(), Some("45"));

        let p = headers.flat_project(&"name-surname".into()).unwrap();
        assert_eq!(p.apply(&row).flatten(), vec!["John", "Williams"]);

        let p = headers
            .flat_project(&Template::record([
                ("NOM", Template::from("name")),
                ("AGE", Template::from(2usize)),
            ]))
            .unwrap();
        assert_eq!(
            p.apply(&row),
            Projected::Record(vec![
                ("NOM".to_string(), "John".into()),
                ("AGE".to_string(), "45".into()),
            ])
        );
    }

    #[test]
    fn rename_returns_new_headers() {
        let headers = Headers::new(["Foo", "Bar", "Foo", "Test"]);
        let renamed = headers.rename("Foo", "Truc");
        assert_eq!(renamed.fieldnames(), &["Truc", "Bar", "Truc", "Test"]);
        assert_eq!(headers.fieldnames()[0], "Foo");
        assert_eq!(renamed.positions("Truc"), &[0, 2]);
    }

    #[test]
    fn wrapped_rows_support_named_access() {
        let headers = Headers::new(["Foo", "Bar", "Foo", "Test"]);
        let cells: Vec<String> = ["One", "Two", "Three", "Four"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut row = headers.wrap(&cells);

        assert_eq!(&row[1], "Two");
        assert_eq!(&row["Foo"], "One");
        assert_eq!(&row["Test"], "Four");
        assert_eq!(&row[("Foo", 1)], "Three");
        assert_eq!(row.get(1usize), Some("Two"));
        assert_eq!(row.get(("Foo", 1usize)), Some("Three"));
        assert_eq!(row.get(6usize), None);
        assert_eq!(row.get("Coco").unwrap_or("NA"), "NA");
        assert!(row.contains(1usize));
        assert!(row.contains("Foo"));
        assert!(row.contains(("Foo", 1usize)));
        assert!(!row.contains(("Foo", 2usize)));
        assert!(!row.contains(("Coco", 1usize)));
        assert!(!row.contains(6usize));
        assert_eq!(row.len(), 4);
        assert_eq!(
            row.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["One", "Two", "Three", "Four"]
        );
        assert_eq!(
            row.cells().collect::<Vec<_>>(),
            vec![("Foo", "One"), ("Bar", "Two"), ("Foo", "Three"), ("Test", "Four")]
        );

        row.replace(vec!["1".into(), "2".into(), "3".into(), "4".into()])
            .unwrap();
        assert_eq!(
            row.cells().collect::<Vec<_>>(),
            vec![("Foo", "1"), ("Bar", "2"), ("Foo", "3"), ("Test", "4")]
        );
        assert!(row.replace(vec!["short".into()]).is_err());
    }
}
