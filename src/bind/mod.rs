//! Declarative argument binding.
//!
//! A command's argument tokens are bound onto a typed option struct whose
//! [`FieldTable`] is declared with [`bind_options!`](crate::bind_options).
//! Options may interleave with scalar positionals (`foo -f` and `-f foo`
//! bind the same); once a list positional starts collecting values, further
//! options are rejected.

pub mod fields;

use std::any::Any;

use log::trace;

pub use fields::{
    Accessor, FieldDescriptor, FieldEntry, FieldTable, FieldValue, FlagSet, Scalar, Shape,
    TagError, display_alias, parse_tag,
};

use crate::error::{BindError, BindErrorKind};
use crate::parse::{Args, Token, TokenType};

/// Expansion hook applied to raw and double-quoted argument pieces.
pub trait Interpolate {
    fn interpolate(&self, text: &str) -> Result<String, String>;
}

/// Interpolation that leaves text untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct Literal;

impl Interpolate for Literal {
    fn interpolate(&self, text: &str) -> Result<String, String> {
        Ok(text.to_string())
    }
}

/// A destination type with a cached descriptor table.
pub trait Options: Default + Send + 'static {
    fn fields() -> &'static FieldTable<Self>;
}

/// Object-safe view of an option struct, as stored on a request.
pub trait DynOptions: Any + Send {
    fn bind_args(
        &mut self,
        command: &str,
        args: Args<'_>,
        interp: &dyn Interpolate,
    ) -> Result<(), BindError>;

    fn usage(&self, command: &str) -> String;

    /// Every alias `command` accepts, rendered with dashes.
    fn option_names(&self, command: &str) -> Vec<String>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Options> DynOptions for T {
    fn bind_args(
        &mut self,
        command: &str,
        args: Args<'_>,
        interp: &dyn Interpolate,
    ) -> Result<(), BindError> {
        bind(command, self, args, interp)
    }

    fn usage(&self, command: &str) -> String {
        T::fields().usage(command)
    }

    fn option_names(&self, command: &str) -> Vec<String> {
        T::fields()
            .active(command)
            .filter(|(_, _, set)| !set.undocumented)
            .flat_map(|(_, _, set)| set.aliases.iter().map(|a| display_alias(a)))
            .collect()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Option struct for handlers that take no arguments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoOptions;

crate::bind_options! {
    NoOptions {}
}

/// Declare the option fields of one or more structs.
///
/// ```
/// #[derive(Default)]
/// struct Grep {
///     pattern: String,
///     ignore_case: bool,
/// }
///
/// opsh::bind_options! {
///     Grep {
///         pattern: "*=#1",
///         ignore_case: "*=i|ignore-case",
///     }
/// }
/// ```
///
/// Malformed tags are a programming error and panic on first use.
#[macro_export]
macro_rules! bind_options {
    ($($ty:ident { $($field:ident : $tag:expr),* $(,)? })*) => {
        $(
            impl $crate::bind::Options for $ty {
                fn fields() -> &'static $crate::bind::FieldTable<Self> {
                    static TABLE: ::std::sync::OnceLock<$crate::bind::FieldTable<$ty>> =
                        ::std::sync::OnceLock::new();
                    TABLE.get_or_init(|| {
                        #[allow(unused_mut)]
                        let mut entries: ::std::vec::Vec<$crate::bind::FieldEntry<$ty>> =
                            ::std::vec::Vec::new();
                        $(
                            entries.push($crate::bind::FieldEntry::new(
                                stringify!($field),
                                $tag,
                                {
                                    fn access(o: &mut $ty) -> &mut dyn $crate::bind::FieldValue {
                                        &mut o.$field
                                    }
                                    access
                                },
                            ));
                        )*
                        match $crate::bind::FieldTable::build(entries) {
                            Ok(table) => table,
                            Err(e) => panic!("invalid option tags on {}: {e}", stringify!($ty)),
                        }
                    })
                }
            }
        )*
    };
}

/// Bind `args` onto `target` for `command`, then check required fields.
pub fn bind<T: Options>(
    command: &str,
    target: &mut T,
    args: Args<'_>,
    interp: &dyn Interpolate,
) -> Result<(), BindError> {
    let mut binder = Binder::new(command, T::fields(), args, interp);
    binder.run(target)?;
    binder.validate()
}

struct Binder<'a, T: 'static> {
    command: &'a str,
    table: &'static FieldTable<T>,
    tokens: &'a [Token],
    /// Absolute script index of `tokens[0]`.
    first: usize,
    pos: usize,
    opt_mode: bool,
    base_arg_index: usize,
    seen: Vec<bool>,
    interp: &'a dyn Interpolate,
}

impl<'a, T: 'static> Binder<'a, T> {
    fn new(
        command: &'a str,
        table: &'static FieldTable<T>,
        args: Args<'a>,
        interp: &'a dyn Interpolate,
    ) -> Self {
        let tokens = args.tokens();
        Self {
            command,
            table,
            tokens,
            first: args.first_index(),
            pos: 0,
            opt_mode: true,
            base_arg_index: tokens.first().map_or(0, |t| t.arg_index.saturating_sub(1)),
            seen: vec![false; table.fields().len()],
            interp,
        }
    }

    fn at(&self, kind: BindErrorKind, pos: usize) -> BindError {
        BindError::at(kind, self.first + pos)
    }

    fn run(&mut self, target: &mut T) -> Result<(), BindError> {
        while let Some(token) = self.tokens.get(self.pos) {
            if token.kind == TokenType::Option {
                self.bind_option(target)?;
            } else {
                self.bind_positional(target)?;
            }
        }
        Ok(())
    }

    fn bind_option(&mut self, target: &mut T) -> Result<(), BindError> {
        let (tokens, table, command) = (self.tokens, self.table, self.command);
        let at = self.pos;
        let token = &tokens[at];
        if !self.opt_mode {
            return Err(self.at(BindErrorKind::OptionAfterArguments(token.text.clone()), at));
        }
        let alias = token.text.trim_start_matches('-');
        let Some((index, field, set)) = table.by_alias(command, alias) else {
            return Err(self.at(BindErrorKind::UnknownOption(token.text.clone()), at));
        };
        self.pos += 1;
        self.base_arg_index += 1;

        if set.counting || field.shape == Shape::Flag {
            let slot = field.slot(target);
            let result = if set.counting {
                slot.increment()
            } else {
                slot.set_flag()
            };
            self.seen[index] = true;
            return result.map_err(|reason| {
                self.at(
                    BindErrorKind::InvalidValue {
                        field: set.display(),
                        value: token.text.clone(),
                        reason,
                    },
                    at,
                )
            });
        }

        let value = self.assemble(&token.text)?;
        self.base_arg_index += 1;
        self.store(index, field, &set.display(), value, target)
    }

    fn bind_positional(&mut self, target: &mut T) -> Result<(), BindError> {
        let (table, command) = (self.table, self.command);
        let at = self.pos;
        let position = self.tokens[at].arg_index.saturating_sub(self.base_arg_index);
        let Some((index, field, set)) = table.by_position(command, position) else {
            return Err(self.at(BindErrorKind::UnexpectedArgument(position), at));
        };
        let value = self.assemble("")?;
        if field.shape == Shape::List {
            self.opt_mode = false;
        }
        let name = if set.aliases.is_empty() {
            format!("argument #{position}")
        } else {
            set.display()
        };
        self.store(index, field, &name, value, target)
    }

    /// Assign an assembled value, rejecting a second value for scalars.
    fn store(
        &mut self,
        index: usize,
        field: &FieldDescriptor<T>,
        name: &str,
        (value, at): (String, usize),
        target: &mut T,
    ) -> Result<(), BindError> {
        if self.seen[index] && field.shape == Shape::Scalar {
            return Err(self.at(BindErrorKind::AlreadySpecified(name.to_string()), at));
        }
        trace!("{}: {} = {value:?}", self.command, field.name);
        field.slot(target).assign(&value).map_err(|reason| {
            self.at(
                BindErrorKind::InvalidValue {
                    field: name.to_string(),
                    value: value.clone(),
                    reason,
                },
                at,
            )
        })?;
        self.seen[index] = true;
        Ok(())
    }

    /// Concatenate the pieces of the argument group at `pos`. `option` names
    /// the option waiting for the value (empty for positionals).
    fn assemble(&mut self, option: &str) -> Result<(String, usize), BindError> {
        let tokens = self.tokens;
        let start = self.pos;
        let Some(head) = tokens.get(start) else {
            // The option token sits just before the end of the slice.
            return Err(self.at(
                BindErrorKind::MissingValue(option.to_string()),
                start.saturating_sub(1),
            ));
        };
        if !head.kind.is_argument() {
            return Err(self.at(BindErrorKind::EmptyValue(option.to_string()), start));
        }

        let group = head.arg_index;
        let mut value = String::new();
        while let Some(token) = tokens.get(self.pos) {
            if !token.kind.is_argument() || token.arg_index != group {
                break;
            }
            match token.kind {
                TokenType::SingleQuotedArgument => value.push_str(&token.text),
                _ => {
                    let expanded = self
                        .interp
                        .interpolate(&token.text)
                        .map_err(|e| self.at(BindErrorKind::Interpolation(e), self.pos))?;
                    value.push_str(&expanded);
                }
            }
            self.pos += 1;
        }
        Ok((value, start))
    }

    /// Required options first, then positionals in order.
    fn validate(&self) -> Result<(), BindError> {
        let mut missing_args: Vec<usize> = Vec::new();
        for (index, field, set) in self.table.active(self.command) {
            if self.seen[index] || fields::is_optional(field, set) {
                continue;
            }
            match set.position {
                None => {
                    return Err(BindError::missing(BindErrorKind::MissingOption(
                        set.display(),
                    )));
                }
                Some(position) => missing_args.push(position),
            }
        }
        match missing_args.into_iter().min() {
            Some(position) => Err(BindError::missing(BindErrorKind::MissingArgument(position))),
            None => Ok(()),
        }
    }
}

/// Downcast helper for request option structs.
pub fn downcast<T: Options>(options: &dyn DynOptions) -> Option<&T> {
    options.as_any().downcast_ref::<T>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoerceError;
    use crate::parse::{Script, Tokenizer};

    fn script(line: &str) -> Script {
        let mut tokenizer = Tokenizer::arguments();
        tokenizer.feed(line).unwrap();
        tokenizer.finish().unwrap()
    }

    fn bind_line<T: Options>(command: &str, line: &str) -> Result<T, BindError> {
        let script = script(line);
        let head = script.walk().next_command().unwrap();
        let mut target = T::default();
        bind(command, &mut target, head.args(), &Literal)?;
        Ok(target)
    }

    #[derive(Debug, Default, PartialEq)]
    struct Remove {
        name: String,
        force: bool,
    }

    #[derive(Debug, Default, PartialEq)]
    struct Narrow {
        value: i16,
    }

    #[derive(Debug, Default, PartialEq)]
    struct CopyFiles {
        verbose: u8,
        limit: Option<u32>,
        source: String,
        targets: Vec<String>,
    }

    #[derive(Debug, Default, PartialEq)]
    struct Named {
        name: String,
    }

    #[derive(Debug, Default, PartialEq)]
    struct Login {
        user: String,
        host: Option<String>,
        quiet: bool,
    }

    crate::bind_options! {
        Remove {
            name: "*=#1",
            force: "*=f|force",
        }
        Narrow {
            value: "*=#1",
        }
        CopyFiles {
            verbose: "*=v,count",
            limit: "*=n|limit,opt",
            source: "*=#1",
            targets: "*=#2,opt",
        }
        Named {
            name: "*=n|name,#1",
        }
        Login {
            user: "create=u|user;add=u|user,opt",
            host: "create=h|host,opt",
            quiet: "*=q,undoc",
        }
    }

    #[test]
    fn option_and_argument_order_is_irrelevant() {
        let a: Remove = bind_line("rm", "foo -f").unwrap();
        let b: Remove = bind_line("rm", "-f foo").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.name, "foo");
        assert!(a.force);
    }

    #[test]
    fn missing_positional() {
        let err = bind_line::<Remove>("rm", "-f").unwrap_err();
        assert_eq!(err.kind, BindErrorKind::MissingArgument(1));
        assert_eq!(err.token, None);
        assert_eq!(err.to_string(), "missing argument #1");
    }

    #[test]
    fn repeated_flag_is_idempotent() {
        let bound: Remove = bind_line("rm", "-f --force -f foo").unwrap();
        assert!(bound.force);
    }

    #[test]
    fn second_value_for_scalar_positional() {
        let err = bind_line::<Remove>("rm", "foo bar").unwrap_err();
        assert_eq!(err.kind, BindErrorKind::UnexpectedArgument(2));
        assert_eq!(err.token, Some(2));

        let err = bind_line::<Named>("x", "foo -n bar").unwrap_err();
        assert_eq!(err.kind, BindErrorKind::AlreadySpecified("-n|--name".into()));
        assert_eq!(err.token, Some(3));
    }

    #[test]
    fn integer_overflow_is_reported_at_token() {
        let err = bind_line::<Narrow>("n", "12345678901234567890").unwrap_err();
        assert_eq!(err.token, Some(1));
        assert!(matches!(
            err.kind,
            BindErrorKind::InvalidValue {
                reason: CoerceError::Range("i16"),
                ..
            }
        ));
    }

    #[test]
    fn counting_value_and_vararg() {
        let bound: CopyFiles = bind_line("cp", "-v -n 0x10 -v src a 'b c'").unwrap();
        assert_eq!(bound.verbose, 2);
        assert_eq!(bound.limit, Some(16));
        assert_eq!(bound.source, "src");
        assert_eq!(bound.targets, vec!["a", "b c"]);
    }

    #[test]
    fn option_after_vararg_values() {
        let err = bind_line::<CopyFiles>("cp", "src a -v").unwrap_err();
        assert_eq!(err.kind, BindErrorKind::OptionAfterArguments("-v".into()));
        assert_eq!(err.token, Some(3));
    }

    #[test]
    fn option_value_errors() {
        let err = bind_line::<CopyFiles>("cp", "src -n").unwrap_err();
        assert_eq!(err.kind, BindErrorKind::MissingValue("-n".into()));
        assert_eq!(err.token, Some(2));

        let err = bind_line::<CopyFiles>("cp", "src -n -v").unwrap_err();
        assert_eq!(err.kind, BindErrorKind::EmptyValue("-n".into()));
        assert_eq!(err.token, Some(3));

        let err = bind_line::<CopyFiles>("cp", "src --limit ten").unwrap_err();
        assert!(matches!(
            err.kind,
            BindErrorKind::InvalidValue {
                reason: CoerceError::Syntax("u32"),
                ..
            }
        ));

        let err = bind_line::<CopyFiles>("cp", "src -x").unwrap_err();
        assert_eq!(err.kind, BindErrorKind::UnknownOption("-x".into()));
    }

    #[test]
    fn empty_string_is_a_value() {
        let bound: Named = bind_line("x", "-n ''").unwrap();
        assert_eq!(bound.name, "");
    }

    #[test]
    fn adjacent_pieces_are_concatenated() {
        struct Upper;
        impl Interpolate for Upper {
            fn interpolate(&self, text: &str) -> Result<String, String> {
                Ok(text.to_uppercase())
            }
        }
        let script = script("a'b'\"c\"");
        let head = script.walk().next_command().unwrap();
        let mut target = Named::default();
        bind("x", &mut target, head.args(), &Upper).unwrap();
        assert_eq!(target.name, "AbC");
    }

    #[test]
    fn flag_sets_per_command() {
        let err = bind_line::<Login>("create", "-h db").unwrap_err();
        assert_eq!(err.kind, BindErrorKind::MissingOption("-u|--user".into()));
        assert_eq!(err.to_string(), "missing one of the options: -u|--user");

        let bound: Login = bind_line("add", "").unwrap();
        assert_eq!(bound, Login::default());

        let err = bind_line::<Login>("add", "-h db").unwrap_err();
        assert_eq!(err.kind, BindErrorKind::UnknownOption("-h".into()));
    }

    #[test]
    fn missing_options_before_arguments() {
        #[derive(Debug, Default)]
        struct Both {
            key: String,
            path: String,
        }
        crate::bind_options! {
            Both {
                path: "*=#1",
                key: "*=k",
            }
        }
        let err = bind_line::<Both>("b", "").unwrap_err();
        assert_eq!(err.kind, BindErrorKind::MissingOption("-k".into()));
    }

    #[test]
    fn usage_hides_undocumented_fields() {
        let table = <Login as Options>::fields();
        assert_eq!(table.usage("create"), "create -u|--user <string> [-h|--host <string>]");
        assert_eq!(
            <CopyFiles as Options>::fields().usage("cp"),
            "cp [-v] [-n|--limit <u32>] <source> [targets...]"
        );
        let names = Login::default().option_names("create");
        assert_eq!(names, vec!["-u", "--user", "-h", "--host"]);
    }

    #[test]
    #[should_panic(expected = "invalid option tags")]
    fn conflicting_aliases_panic() {
        #[derive(Debug, Default)]
        struct Clash {
            a: bool,
            b: bool,
        }
        crate::bind_options! {
            Clash {
                a: "*=x",
                b: "*=x",
            }
        }
        let _ = <Clash as Options>::fields();
    }
}
