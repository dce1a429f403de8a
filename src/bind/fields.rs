//! Field descriptors: what a destination struct accepts and how raw text is
//! coerced into each of its fields.
//!
//! Descriptor tables are declared with [`bind_options!`](crate::bind_options)
//! and built once per type. Each field carries a tag in the canonical,
//! command-qualified form:
//!
//! ```text
//! tag   := set (';' set)*
//! set   := cmds '=' spec
//! cmds  := '*' | name ('|' name)*
//! spec  := item (',' item)*
//! item  := alias ('|' alias)* | '#' N | 'opt' | 'count' | 'undoc'
//! ```
//!
//! `*` applies to every command without a more specific set. A set may name
//! both aliases and a position (`*=n|name,#1`).

use std::fmt;
use std::path::PathBuf;

use crate::error::CoerceError;

/// How a field consumes values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Resolved from the option token alone.
    Flag,
    /// Takes exactly one value.
    Scalar,
    /// Accumulates every value given.
    List,
}

/// A destination slot that can receive coerced values.
pub trait FieldValue {
    fn shape(&self) -> Shape;

    /// Name of the value type, for diagnostics.
    fn type_name(&self) -> &'static str;

    fn assign(&mut self, raw: &str) -> Result<(), CoerceError>;

    fn set_flag(&mut self) -> Result<(), CoerceError> {
        Err(CoerceError::NotCountable(self.type_name()))
    }

    fn increment(&mut self) -> Result<(), CoerceError> {
        Err(CoerceError::NotCountable(self.type_name()))
    }
}

/// Types that can be parsed from one assembled argument.
pub trait Scalar: Sized {
    const TYPE_NAME: &'static str;

    fn parse_value(raw: &str) -> Result<Self, CoerceError>;
}

impl Scalar for String {
    const TYPE_NAME: &'static str = "string";

    fn parse_value(raw: &str) -> Result<Self, CoerceError> {
        Ok(raw.to_string())
    }
}

impl Scalar for PathBuf {
    const TYPE_NAME: &'static str = "path";

    fn parse_value(raw: &str) -> Result<Self, CoerceError> {
        Ok(PathBuf::from(raw))
    }
}

impl Scalar for bool {
    const TYPE_NAME: &'static str = "bool";

    fn parse_value(raw: &str) -> Result<Self, CoerceError> {
        match raw.to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(true),
            "false" | "no" | "off" | "0" => Ok(false),
            _ => Err(CoerceError::Syntax(Self::TYPE_NAME)),
        }
    }
}

impl Scalar for f64 {
    const TYPE_NAME: &'static str = "f64";

    fn parse_value(raw: &str) -> Result<Self, CoerceError> {
        raw.parse().map_err(|_| CoerceError::Syntax(Self::TYPE_NAME))
    }
}

impl Scalar for f32 {
    const TYPE_NAME: &'static str = "f32";

    fn parse_value(raw: &str) -> Result<Self, CoerceError> {
        let wide: f64 = raw.parse().map_err(|_| CoerceError::Syntax(Self::TYPE_NAME))?;
        if wide.is_finite() && wide.abs() > f32::MAX as f64 {
            return Err(CoerceError::Range(Self::TYPE_NAME));
        }
        Ok(wide as f32)
    }
}

/// Parse an integer literal with an optional sign and `0x`/`0o`/`0b` prefix.
fn parse_integer(raw: &str, type_name: &'static str) -> Result<i128, CoerceError> {
    let (negative, body) = match raw.as_bytes().first() {
        Some(b'-') => (true, &raw[1..]),
        Some(b'+') => (false, &raw[1..]),
        _ => (false, raw),
    };
    let lower = body.get(..2).map(str::to_ascii_lowercase);
    let (radix, digits) = match lower.as_deref() {
        Some("0x") => (16, &body[2..]),
        Some("0o") => (8, &body[2..]),
        Some("0b") => (2, &body[2..]),
        _ => (10, body),
    };
    if digits.is_empty() || digits.starts_with(['+', '-']) {
        return Err(CoerceError::Syntax(type_name));
    }
    let value = i128::from_str_radix(digits, radix).map_err(|e| match e.kind() {
        std::num::IntErrorKind::PosOverflow | std::num::IntErrorKind::NegOverflow => {
            CoerceError::Range(type_name)
        }
        _ => CoerceError::Syntax(type_name),
    })?;
    Ok(if negative { -value } else { value })
}

macro_rules! integer_scalars {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Scalar for $ty {
                const TYPE_NAME: &'static str = stringify!($ty);

                fn parse_value(raw: &str) -> Result<Self, CoerceError> {
                    let wide = parse_integer(raw, Self::TYPE_NAME)?;
                    <$ty>::try_from(wide).map_err(|_| CoerceError::Range(Self::TYPE_NAME))
                }
            }

            impl FieldValue for $ty {
                fn shape(&self) -> Shape {
                    Shape::Scalar
                }

                fn type_name(&self) -> &'static str {
                    <$ty as Scalar>::TYPE_NAME
                }

                fn assign(&mut self, raw: &str) -> Result<(), CoerceError> {
                    *self = <$ty>::parse_value(raw)?;
                    Ok(())
                }

                fn increment(&mut self) -> Result<(), CoerceError> {
                    *self = self
                        .checked_add(1)
                        .ok_or(CoerceError::Range(<$ty as Scalar>::TYPE_NAME))?;
                    Ok(())
                }
            }
        )*
    };
}

integer_scalars!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

macro_rules! plain_scalars {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FieldValue for $ty {
                fn shape(&self) -> Shape {
                    Shape::Scalar
                }

                fn type_name(&self) -> &'static str {
                    <$ty as Scalar>::TYPE_NAME
                }

                fn assign(&mut self, raw: &str) -> Result<(), CoerceError> {
                    *self = <$ty>::parse_value(raw)?;
                    Ok(())
                }
            }
        )*
    };
}

plain_scalars!(String, PathBuf, f32, f64);

impl FieldValue for bool {
    fn shape(&self) -> Shape {
        Shape::Flag
    }

    fn type_name(&self) -> &'static str {
        <bool as Scalar>::TYPE_NAME
    }

    fn assign(&mut self, raw: &str) -> Result<(), CoerceError> {
        *self = bool::parse_value(raw)?;
        Ok(())
    }

    fn set_flag(&mut self) -> Result<(), CoerceError> {
        *self = true;
        Ok(())
    }
}

impl<T: Scalar> FieldValue for Option<T> {
    fn shape(&self) -> Shape {
        Shape::Scalar
    }

    fn type_name(&self) -> &'static str {
        T::TYPE_NAME
    }

    fn assign(&mut self, raw: &str) -> Result<(), CoerceError> {
        *self = Some(T::parse_value(raw)?);
        Ok(())
    }
}

impl<T: Scalar> FieldValue for Vec<T> {
    fn shape(&self) -> Shape {
        Shape::List
    }

    fn type_name(&self) -> &'static str {
        T::TYPE_NAME
    }

    fn assign(&mut self, raw: &str) -> Result<(), CoerceError> {
        self.push(T::parse_value(raw)?);
        Ok(())
    }
}

/// One `cmds=spec` section of a field tag.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FlagSet {
    /// Command names this set applies to; `["*"]` for the wildcard.
    pub commands: Vec<String>,
    pub aliases: Vec<String>,
    pub position: Option<usize>,
    pub optional: bool,
    pub counting: bool,
    pub undocumented: bool,
}

impl FlagSet {
    fn matches(&self, command: &str) -> bool {
        self.commands.iter().any(|c| c == command)
    }

    fn is_wildcard(&self) -> bool {
        self.commands.iter().any(|c| c == "*")
    }

    /// `-x|--name` for options, `#N` for pure positionals.
    pub fn display(&self) -> String {
        if self.aliases.is_empty() {
            return self.position.map_or_else(String::new, |p| format!("#{p}"));
        }
        self.aliases
            .iter()
            .map(|a| display_alias(a))
            .collect::<Vec<_>>()
            .join("|")
    }
}

/// `-x` for single-character aliases, `--name` otherwise.
pub fn display_alias(alias: &str) -> String {
    if alias.chars().count() == 1 {
        format!("-{alias}")
    } else {
        format!("--{alias}")
    }
}

/// Malformed field tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagError {
    pub field: String,
    pub message: String,
}

impl fmt::Display for TagError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "field {}: {}", self.field, self.message)
    }
}

impl std::error::Error for TagError {}

/// Parse a canonical field tag into its flag sets.
pub fn parse_tag(tag: &str) -> Result<Vec<FlagSet>, String> {
    let mut sets = Vec::new();
    for section in tag.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        let Some((cmds, spec)) = section.split_once('=') else {
            return Err(format!("section {section:?} lacks a command qualifier"));
        };
        let commands: Vec<String> = cmds
            .split('|')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(String::from)
            .collect();
        if commands.is_empty() {
            return Err(format!("section {section:?} names no command"));
        }

        let mut set = FlagSet {
            commands,
            ..FlagSet::default()
        };
        for (i, item) in spec.split(',').map(str::trim).enumerate() {
            match item {
                "" if i == 0 => {}
                "opt" if i > 0 => set.optional = true,
                "count" if i > 0 => set.counting = true,
                "undoc" if i > 0 => set.undocumented = true,
                _ if item.starts_with('#') => {
                    let position: usize = item[1..]
                        .parse()
                        .map_err(|_| format!("invalid position {item:?}"))?;
                    if position == 0 {
                        return Err("positions start at #1".to_string());
                    }
                    set.position = Some(position);
                }
                _ if i == 0 => {
                    set.aliases = item
                        .split('|')
                        .map(|a| a.trim().trim_start_matches('-').to_string())
                        .filter(|a| !a.is_empty())
                        .collect();
                }
                _ => return Err(format!("unknown flag {item:?}")),
            }
        }
        if set.aliases.is_empty() && set.position.is_none() {
            return Err(format!("section {section:?} declares neither alias nor position"));
        }
        sets.push(set);
    }
    if sets.is_empty() {
        return Err("empty tag".to_string());
    }
    Ok(sets)
}

/// Accessor from a destination struct to one of its fields.
pub type Accessor<T> = fn(&mut T) -> &mut dyn FieldValue;

/// Declaration of one field, as written in [`bind_options!`](crate::bind_options).
pub struct FieldEntry<T> {
    pub name: &'static str,
    pub tag: &'static str,
    pub access: Accessor<T>,
}

impl<T> FieldEntry<T> {
    pub fn new(name: &'static str, tag: &'static str, access: Accessor<T>) -> Self {
        Self { name, tag, access }
    }
}

pub struct FieldDescriptor<T> {
    pub name: &'static str,
    pub shape: Shape,
    pub type_name: &'static str,
    pub sets: Vec<FlagSet>,
    access: Accessor<T>,
}

impl<T> FieldDescriptor<T> {
    /// The flag set governing `command`: an exact name beats the wildcard.
    pub fn flags_for(&self, command: &str) -> Option<&FlagSet> {
        self.sets
            .iter()
            .find(|s| s.matches(command))
            .or_else(|| self.sets.iter().find(|s| s.is_wildcard()))
    }

    pub fn slot<'a>(&self, target: &'a mut T) -> &'a mut dyn FieldValue {
        (self.access)(target)
    }
}

impl<T> fmt::Debug for FieldDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("shape", &self.shape)
            .field("type_name", &self.type_name)
            .field("sets", &self.sets)
            .finish()
    }
}

/// Descriptor table of a destination type, built once and cached.
#[derive(Debug)]
pub struct FieldTable<T> {
    fields: Vec<FieldDescriptor<T>>,
}

impl<T: Default> FieldTable<T> {
    pub fn build(entries: Vec<FieldEntry<T>>) -> Result<Self, TagError> {
        let mut scratch = T::default();
        let mut fields = Vec::with_capacity(entries.len());
        for entry in entries {
            let error = |message: String| TagError {
                field: entry.name.to_string(),
                message,
            };
            let sets = parse_tag(entry.tag).map_err(error)?;
            let slot = (entry.access)(&mut scratch);
            let (shape, type_name) = (slot.shape(), slot.type_name());
            // Positional booleans take a value like any scalar.
            if shape == Shape::Flag
                && sets.iter().any(|s| s.position.is_some() && !s.aliases.is_empty())
            {
                return Err(error("boolean fields cannot mix aliases and a position".into()));
            }
            fields.push(FieldDescriptor {
                name: entry.name,
                shape,
                type_name,
                sets,
                access: entry.access,
            });
        }

        let table = Self { fields };
        table.check_conflicts()?;
        Ok(table)
    }
}

impl<T> FieldTable<T> {
    pub fn fields(&self) -> &[FieldDescriptor<T>] {
        &self.fields
    }

    /// Duplicate aliases or positions under the same command name.
    fn check_conflicts(&self) -> Result<(), TagError> {
        let mut claimed: Vec<(&str, String, &str)> = Vec::new();
        for field in &self.fields {
            for set in &field.sets {
                for command in &set.commands {
                    let keys = set
                        .aliases
                        .iter()
                        .map(|a| display_alias(a))
                        .chain(set.position.map(|p| format!("#{p}")));
                    for key in keys {
                        if let Some((_, _, other)) = claimed
                            .iter()
                            .find(|(c, k, _)| *c == command.as_str() && *k == key)
                        {
                            return Err(TagError {
                                field: field.name.to_string(),
                                message: format!("{key} already used by {other} for {command}"),
                            });
                        }
                        claimed.push((command.as_str(), key, field.name));
                    }
                }
            }
        }
        Ok(())
    }

    /// Fields visible to `command` with their governing flag set.
    pub fn active<'a>(
        &'a self,
        command: &'a str,
    ) -> impl Iterator<Item = (usize, &'a FieldDescriptor<T>, &'a FlagSet)> + 'a {
        self.fields
            .iter()
            .enumerate()
            .filter_map(move |(i, f)| f.flags_for(command).map(|s| (i, f, s)))
    }

    /// Field answering to the option alias `alias` (dashes stripped).
    pub fn by_alias<'a>(
        &'a self,
        command: &'a str,
        alias: &str,
    ) -> Option<(usize, &'a FieldDescriptor<T>, &'a FlagSet)> {
        self.active(command)
            .find(|(_, _, s)| s.aliases.iter().any(|a| a == alias))
    }

    /// Field receiving positional argument `index` (1-based). A list field
    /// absorbs every position from its own onwards.
    pub fn by_position<'a>(
        &'a self,
        command: &'a str,
        index: usize,
    ) -> Option<(usize, &'a FieldDescriptor<T>, &'a FlagSet)> {
        let mut vararg = None;
        for (i, field, set) in self.active(command) {
            match set.position {
                Some(p) if p == index => return Some((i, field, set)),
                Some(p) if p < index && field.shape == Shape::List => {
                    vararg = Some((i, field, set));
                }
                _ => {}
            }
        }
        vararg
    }

    /// One-line synopsis of the options and arguments `command` accepts.
    pub fn usage(&self, command: &str) -> String {
        let mut options = Vec::new();
        let mut positionals: Vec<(usize, String)> = Vec::new();
        for (_, field, set) in self.active(command) {
            if set.undocumented {
                continue;
            }
            let optional = is_optional(field, set);
            if let Some(position) = set.position {
                let mut text = field.name.to_string();
                if field.shape == Shape::List {
                    text.push_str("...");
                }
                let text = if optional { format!("[{text}]") } else { format!("<{text}>") };
                positionals.push((position, text));
                continue;
            }
            let mut text = set.display();
            if field.shape != Shape::Flag && !set.counting {
                text.push_str(&format!(" <{}>", field.type_name));
            }
            options.push(if optional { format!("[{text}]") } else { text });
        }
        positionals.sort_by_key(|(p, _)| *p);
        let mut parts = vec![command.to_string()];
        parts.extend(options);
        parts.extend(positionals.into_iter().map(|(_, t)| t));
        parts.join(" ")
    }
}

/// Flags and counters never have to be given.
pub fn is_optional<T>(field: &FieldDescriptor<T>, set: &FlagSet) -> bool {
    set.optional || set.counting || (field.shape == Shape::Flag && set.position.is_none())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multi_command_tag() {
        let sets = parse_tag("create=x|y,opt;add=z").unwrap();
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0].commands, vec!["create"]);
        assert_eq!(sets[0].aliases, vec!["x", "y"]);
        assert!(sets[0].optional);
        assert_eq!(sets[1].aliases, vec!["z"]);
        assert!(!sets[1].optional);
    }

    #[test]
    fn parses_position_and_flags() {
        let sets = parse_tag("*=n|name,#1,undoc").unwrap();
        assert_eq!(sets[0].position, Some(1));
        assert_eq!(sets[0].aliases, vec!["n", "name"]);
        assert!(sets[0].undocumented);

        let sets = parse_tag("a|b=#2,opt").unwrap();
        assert_eq!(sets[0].commands, vec!["a", "b"]);
        assert!(sets[0].aliases.is_empty());
        assert_eq!(sets[0].position, Some(2));
    }

    #[test]
    fn rejects_unqualified_and_unknown() {
        assert!(parse_tag("x,opt").is_err());
        assert!(parse_tag("*=x,bogus").is_err());
        assert!(parse_tag("*=#0").is_err());
        assert!(parse_tag("*=,opt").is_err());
        assert!(parse_tag("").is_err());
    }

    #[test]
    fn integer_coercion() {
        assert_eq!(i16::parse_value("-32768"), Ok(-32768));
        assert_eq!(u8::parse_value("0xff"), Ok(255));
        assert_eq!(u8::parse_value("0b101"), Ok(5));
        assert_eq!(i32::parse_value("-0o17"), Ok(-15));
        assert_eq!(
            i16::parse_value("12345678901234567890"),
            Err(CoerceError::Range("i16"))
        );
        assert_eq!(u32::parse_value("-1"), Err(CoerceError::Range("u32")));
        assert_eq!(i64::parse_value("12a"), Err(CoerceError::Syntax("i64")));
        assert_eq!(i64::parse_value("--1"), Err(CoerceError::Syntax("i64")));
        assert_eq!(
            u64::parse_value("999999999999999999999999999999999999999999"),
            Err(CoerceError::Range("u64"))
        );
    }

    #[test]
    fn float_and_bool_coercion() {
        assert_eq!(f64::parse_value("1.5"), Ok(1.5));
        assert_eq!(f32::parse_value("1e100"), Err(CoerceError::Range("f32")));
        assert_eq!(bool::parse_value("Yes"), Ok(true));
        assert_eq!(bool::parse_value("maybe"), Err(CoerceError::Syntax("bool")));
    }

    #[test]
    fn containers() {
        let mut list: Vec<u8> = Vec::new();
        list.assign("1").unwrap();
        list.assign("2").unwrap();
        assert_eq!(list, vec![1, 2]);
        assert_eq!(list.shape(), Shape::List);

        let mut maybe: Option<String> = None;
        maybe.assign("x").unwrap();
        assert_eq!(maybe.as_deref(), Some("x"));

        let mut count: u8 = 254;
        count.increment().unwrap();
        assert_eq!(count.increment(), Err(CoerceError::Range("u8")));

        let mut text = String::new();
        assert_eq!(text.increment(), Err(CoerceError::NotCountable("string")));
    }

    #[test]
    fn aliases_display_with_dashes() {
        let set = FlagSet {
            aliases: vec!["f".into(), "force".into()],
            ..FlagSet::default()
        };
        assert_eq!(set.display(), "-f|--force");
    }
}
