//! Seed streams: the externally supplied items a run starts from.

use super::Flavor;
use crate::core::{Item, PortType, Shape, StreamValue};
use crate::errors::{ContractErrorInfo, EmptySeedError, StagewireError, ValidationError};
use crate::glob::Pattern;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::debug;

/// An external stream feeding the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seed {
    /// Node name; the stream is addressed as `name` or `name.out`.
    pub name: String,
    /// Item kind, checked against consumer port types.
    pub kind: String,
    /// Multi (one item per element) or broadcast (one value).
    #[serde(default)]
    pub flavor: Flavor,
    /// Broadcast seeds may hold a list instead of a single item.
    #[serde(default)]
    pub shape: Shape,
    /// Fail with `EmptySeed` when no items were supplied.
    #[serde(default)]
    pub required: bool,
    /// The items.
    #[serde(default)]
    pub items: Vec<Item>,
}

impl Seed {
    /// A multi seed.
    #[must_use]
    pub fn multi(name: impl Into<String>, kind: impl Into<String>, items: Vec<Item>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            flavor: Flavor::Multi,
            shape: Shape::Item,
            required: false,
            items,
        }
    }

    /// A broadcast seed holding one item.
    #[must_use]
    pub fn broadcast(name: impl Into<String>, kind: impl Into<String>, item: Item) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            flavor: Flavor::Broadcast,
            shape: Shape::Item,
            required: true,
            items: vec![item],
        }
    }

    /// A broadcast seed holding a list.
    #[must_use]
    pub fn broadcast_list(
        name: impl Into<String>,
        kind: impl Into<String>,
        items: Vec<Item>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            flavor: Flavor::Broadcast,
            shape: Shape::List,
            required: false,
            items,
        }
    }

    /// Marks the seed as required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// The type of the seed's stream.
    #[must_use]
    pub fn port_type(&self) -> PortType {
        PortType {
            kind: self.kind.clone(),
            shape: self.shape,
        }
    }

    /// The broadcast value, `None` for multi seeds and empty single-item seeds.
    #[must_use]
    pub fn broadcast_value(&self) -> Option<StreamValue> {
        match (self.flavor, self.shape) {
            (Flavor::Multi, _) => None,
            (Flavor::Broadcast, Shape::List) => Some(StreamValue::List(self.items.clone())),
            (Flavor::Broadcast, Shape::Item) => self.items.first().cloned().map(StreamValue::Item),
        }
    }

    /// Checks emptiness, key uniqueness and broadcast arity.
    ///
    /// # Errors
    ///
    /// `EmptySeed` for an empty required seed, `ValidationError` for
    /// duplicate keys or a single-item broadcast seed with several items.
    pub fn check(&self) -> Result<(), StagewireError> {
        if self.required && self.items.is_empty() {
            return Err(EmptySeedError::new(&self.name).into());
        }

        if self.flavor == Flavor::Multi && self.shape == Shape::List {
            return Err(seed_error(
                &self.name,
                "SEED-SHAPE",
                format!("Multi seed '{}' must carry items, not lists", self.name),
            )
            .into());
        }

        if self.flavor == Flavor::Broadcast && self.shape == Shape::Item && self.items.len() > 1 {
            return Err(seed_error(
                &self.name,
                "SEED-BROADCAST-ARITY",
                format!(
                    "Broadcast seed '{}' holds {} items; declare it as a list",
                    self.name,
                    self.items.len()
                ),
            )
            .into());
        }

        let mut seen = HashSet::new();
        for item in &self.items {
            if !seen.insert(item.key.as_str()) {
                return Err(seed_error(
                    &self.name,
                    "SEED-DUPLICATE-KEY",
                    format!("Seed '{}' contains key '{}' more than once", self.name, item.key),
                )
                .into());
            }
        }

        Ok(())
    }
}

/// Wraps items as a multi seed, failing early on an empty required seed.
///
/// # Errors
///
/// See [`Seed::check`].
pub fn from_seed(
    name: impl Into<String>,
    kind: impl Into<String>,
    items: Vec<Item>,
    required: bool,
) -> Result<Seed, StagewireError> {
    let mut seed = Seed::multi(name, kind, items);
    seed.required = required;
    seed.check()?;
    Ok(seed)
}

fn seed_error(seed: &str, code: &str, message: String) -> ValidationError {
    ValidationError::new(message.clone())
        .with_subjects(vec![seed.to_string()])
        .with_error_info(ContractErrorInfo::new(code, message))
}

/// Discovers files in `dir` whose names match `pattern`.
///
/// The text captured by the first `*` becomes the item key (the whole file
/// name when the pattern has no `*`). A pattern with brace alternatives such
/// as `*_R{1,2}.fq.gz` groups files per key, ordered by alternative; every
/// group must be complete. Items come back sorted by key.
///
/// # Errors
///
/// `ValidationError` if the directory can't be read, a key is empty, a file
/// lands in an occupied slot, or a group is incomplete.
pub fn discover(dir: &Path, pattern: &str) -> Result<Vec<Item>, StagewireError> {
    let glob = Pattern::new(pattern);
    let slots = glob.alternative_count();

    let entries = std::fs::read_dir(dir).map_err(|err| {
        ValidationError::new(format!("Cannot read seed directory {}: {err}", dir.display()))
            .with_subjects(vec![dir.display().to_string()])
            .with_error_info(ContractErrorInfo::new("SEED-DIR", err.to_string()))
    })?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.path().is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();

    let mut groups: BTreeMap<String, Vec<Option<PathBuf>>> = BTreeMap::new();
    for name in names {
        let m = match glob.try_captures(&name) {
            Ok(Some(m)) => m,
            Ok(None) => continue,
            Err(err) => {
                return Err(seed_error(pattern, "SEED-PATTERN", err.to_string()).into());
            }
        };
        let key = m.stars.first().cloned().unwrap_or_else(|| name.clone());
        if key.is_empty() {
            return Err(seed_error(
                pattern,
                "SEED-EMPTY-KEY",
                format!("File '{name}' yields an empty key for pattern '{pattern}'"),
            )
            .into());
        }

        let group = groups.entry(key.clone()).or_insert_with(|| vec![None; slots]);
        if group[m.alternative].is_some() {
            return Err(seed_error(
                pattern,
                "SEED-DUPLICATE-KEY",
                format!("Key '{key}' matches more than one file for the same slot ('{name}')"),
            )
            .into());
        }
        group[m.alternative] = Some(dir.join(&name));
    }

    let mut items = Vec::with_capacity(groups.len());
    for (key, group) in groups {
        let filled = group.iter().filter(|slot| slot.is_some()).count();
        if filled != slots {
            return Err(seed_error(
                pattern,
                "SEED-INCOMPLETE-GROUP",
                format!("Key '{key}' has {filled} of {slots} files for pattern '{pattern}'"),
            )
            .into());
        }
        items.push(Item::new(key).with_files(group.into_iter().flatten()));
    }

    debug!(dir = %dir.display(), pattern, count = items.len(), "Discovered seed items");
    Ok(items)
}

/// Column layout of a record file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordLayout {
    /// Field names in column order.
    pub fields: Vec<String>,
    /// The field used as item key.
    pub key: String,
    /// Fields holding file paths; the rest become tags.
    #[serde(default)]
    pub files: Vec<String>,
}

impl RecordLayout {
    /// Creates a layout with no file fields.
    #[must_use]
    pub fn new<I, S>(fields: I, key: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            key: key.into(),
            files: Vec::new(),
        }
    }

    /// Declares a field as holding a file path.
    #[must_use]
    pub fn with_file_field(mut self, field: impl Into<String>) -> Self {
        self.files.push(field.into());
        self
    }

    fn check(&self) -> Result<(), ValidationError> {
        let declared = |name: &String| self.fields.contains(name);
        if !declared(&self.key) {
            return Err(ValidationError::new(format!(
                "Record key '{}' is not a declared field",
                self.key
            ))
            .with_error_info(ContractErrorInfo::new(
                "SEED-RECORD-LAYOUT",
                "key field must be declared",
            )));
        }
        if let Some(missing) = self.files.iter().find(|f| !declared(f)) {
            return Err(ValidationError::new(format!(
                "Record file field '{missing}' is not a declared field"
            ))
            .with_error_info(ContractErrorInfo::new(
                "SEED-RECORD-LAYOUT",
                "file fields must be declared",
            )));
        }
        Ok(())
    }
}

/// Parses comma-separated records.
///
/// Blank lines and lines starting with `#` are ignored. Relative file fields
/// are resolved against `base_dir` when given.
///
/// # Errors
///
/// `ValidationError` naming the line for a wrong field count or blank key.
pub fn parse_records(
    text: &str,
    layout: &RecordLayout,
    base_dir: Option<&Path>,
) -> Result<Vec<Item>, ValidationError> {
    layout.check()?;

    let mut items = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let values: Vec<&str> = line.split(',').map(str::trim).collect();
        if values.len() != layout.fields.len() {
            return Err(ValidationError::new(format!(
                "Line {line_no}: expected {} fields, found {}",
                layout.fields.len(),
                values.len()
            ))
            .with_error_info(
                ContractErrorInfo::new("SEED-RECORD-FIELDS", "wrong field count")
                    .with_context_entry("line", line_no.to_string()),
            ));
        }

        let mut key = None;
        let mut item = Item::new(String::new());
        for (field, value) in layout.fields.iter().zip(values) {
            if *field == layout.key {
                key = Some(value);
            }
            if layout.files.contains(field) {
                if !value.is_empty() {
                    let path = Path::new(value);
                    let path = match base_dir {
                        Some(base) if path.is_relative() => base.join(path),
                        _ => path.to_path_buf(),
                    };
                    item.files.push(path);
                }
            } else {
                item.tags.insert(field.clone(), value.to_string());
            }
        }

        match key {
            Some(key) if !key.is_empty() => item.key = key.to_string(),
            _ => {
                return Err(ValidationError::new(format!(
                    "Line {line_no}: key field '{}' is blank",
                    layout.key
                ))
                .with_error_info(
                    ContractErrorInfo::new("SEED-RECORD-KEY", "blank key")
                        .with_context_entry("line", line_no.to_string()),
                ));
            }
        }
        items.push(item);
    }

    Ok(items)
}

/// Reads and parses a record file; relative paths resolve against its directory.
///
/// # Errors
///
/// `Io` if the file can't be read, otherwise see [`parse_records`].
pub fn read_records(path: &Path, layout: &RecordLayout) -> Result<Vec<Item>, StagewireError> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_records(&text, layout, path.parent())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), name).unwrap();
    }

    #[test]
    fn test_discover_pairs() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["S2_R2.fq", "S1_R1.fq", "S1_R2.fq", "S2_R1.fq", "notes.txt"] {
            touch(dir.path(), name);
        }

        let items = discover(dir.path(), "*_R{1,2}.fq").unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].key, "S1");
        assert_eq!(items[0].file_names(), vec!["S1_R1.fq", "S1_R2.fq"]);
        assert_eq!(items[1].key, "S2");
    }

    #[test]
    fn test_discover_incomplete_pair() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "S1_R1.fq");
        touch(dir.path(), "S1_R2.fq");
        touch(dir.path(), "S2_R1.fq");

        let err = discover(dir.path(), "*_R{1,2}.fq").unwrap_err();
        match err {
            StagewireError::Validation(v) => assert_eq!(v.code(), Some("SEED-INCOMPLETE-GROUP")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_discover_singles() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.bam");
        touch(dir.path(), "b.bam");

        let keys: Vec<String> = discover(dir.path(), "*.bam")
            .unwrap()
            .into_iter()
            .map(|i| i.key)
            .collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_discover_missing_dir() {
        let err = discover(Path::new("/definitely/not/here"), "*.bam").unwrap_err();
        assert!(matches!(err, StagewireError::Validation(_)));
    }

    #[test]
    fn test_parse_records() {
        let text = "# sample,control,id\nA,B,X\n\nC,,Y\nD,E,Z\n";
        let layout = RecordLayout::new(["sample", "control", "id"], "id");

        let items = parse_records(text, &layout, None).unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].key, "X");
        assert_eq!(items[0].tag("sample"), Some("A"));
        assert_eq!(items[1].tag("control"), Some(""));
        assert!(items[2].files.is_empty());
    }

    #[test]
    fn test_parse_records_wrong_field_count() {
        let layout = RecordLayout::new(["sample", "control", "id"], "id");
        let err = parse_records("A,B,X\nC,Y\n", &layout, None).unwrap_err();

        assert_eq!(err.code(), Some("SEED-RECORD-FIELDS"));
        assert!(err.message.starts_with("Line 2"));
    }

    #[test]
    fn test_parse_records_file_fields() {
        let layout = RecordLayout::new(["id", "bam"], "id").with_file_field("bam");
        let items = parse_records("s1,s1.bam\ns2,/abs/s2.bam", &layout, Some(Path::new("/data")))
            .unwrap();

        assert_eq!(items[0].files, vec![PathBuf::from("/data/s1.bam")]);
        assert_eq!(items[1].files, vec![PathBuf::from("/abs/s2.bam")]);
        assert!(items[0].tag("bam").is_none());
    }

    #[test]
    fn test_seed_check() {
        assert!(matches!(
            from_seed("reads", "fastq", Vec::new(), true),
            Err(StagewireError::EmptySeed(_))
        ));
        assert!(from_seed("reads", "fastq", Vec::new(), false).is_ok());

        let dup = Seed::multi("reads", "fastq", vec![Item::new("a"), Item::new("a")]);
        assert!(matches!(dup.check(), Err(StagewireError::Validation(_))));
    }

    #[test]
    fn test_broadcast_value() {
        let seed = Seed::broadcast("genome", "fasta", Item::new("hg38"));
        assert_eq!(seed.broadcast_value(), Some(StreamValue::Item(Item::new("hg38"))));

        let list = Seed::broadcast_list("controls", "bam", vec![Item::new("c1")]);
        assert_eq!(list.port_type(), PortType::list("bam"));
        assert_eq!(list.broadcast_value().map(|v| v.len()), Some(1));
    }
}
