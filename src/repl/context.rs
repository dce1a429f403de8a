//! Context state: the current path and session variables.
//!
//! Mutated only by the dispatch loop between requests; requests get a
//! snapshot.

use std::collections::BTreeMap;
use std::env::VarError;
use std::fmt;

use crate::bind::Interpolate;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Context {
    path: Vec<String>,
    vars: BTreeMap<String, String>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Path segments from the root.
    pub fn segments(&self) -> &[String] {
        &self.path
    }

    /// `/`-joined path, `/` at the root.
    pub fn path(&self) -> String {
        format!("/{}", self.path.join("/"))
    }

    /// Change path: absolute with a leading `/`, `..` pops, `.` stays.
    pub fn cd(&mut self, target: &str) {
        if target.starts_with('/') {
            self.path.clear();
        }
        for segment in target.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    self.path.pop();
                }
                name => self.path.push(name.to_string()),
            }
        }
    }

    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    pub fn set_var(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn unset_var(&mut self, name: &str) -> Option<String> {
        self.vars.remove(name)
    }

    fn lookup(&self, name: &str) -> Result<Option<String>, VarError> {
        if let Some(value) = self.vars.get(name) {
            return Ok(Some(value.clone()));
        }
        match std::env::var(name) {
            Ok(value) => Ok(Some(value)),
            Err(VarError::NotPresent) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// `$VAR` and `${VAR}` from session variables, then the environment, plus a
/// leading `~`. Unknown variables are left as written.
impl Interpolate for Context {
    fn interpolate(&self, text: &str) -> Result<String, String> {
        if !text.contains(['$', '~']) {
            return Ok(text.to_string());
        }
        shellexpand::full_with_context(
            text,
            || std::env::var("HOME").ok(),
            |name| self.lookup(name),
        )
        .map(|expanded| expanded.into_owned())
        .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cd_resolves_relative_and_absolute() {
        let mut ctx = Context::new();
        assert_eq!(ctx.path(), "/");
        ctx.cd("hosts/db");
        assert_eq!(ctx.path(), "/hosts/db");
        ctx.cd("..");
        assert_eq!(ctx.path(), "/hosts");
        ctx.cd("./web/../api");
        assert_eq!(ctx.path(), "/hosts/api");
        ctx.cd("/incidents");
        assert_eq!(ctx.segments(), ["incidents"]);
        ctx.cd("/");
        assert_eq!(ctx.path(), "/");
        ctx.cd("..");
        assert_eq!(ctx.path(), "/");
    }

    #[test]
    fn interpolation_prefers_session_variables() {
        let mut ctx = Context::new();
        ctx.set_var("target", "db1");
        assert_eq!(ctx.interpolate("host-$target").unwrap(), "host-db1");
        assert_eq!(ctx.interpolate("${target}:5432").unwrap(), "db1:5432");
        assert_eq!(ctx.interpolate("plain").unwrap(), "plain");
    }

    #[test]
    fn unknown_variables_are_kept() {
        let ctx = Context::new();
        let out = ctx
            .interpolate("$OPSH_SURELY_UNDEFINED_VARIABLE_42")
            .unwrap();
        assert_eq!(out, "$OPSH_SURELY_UNDEFINED_VARIABLE_42");
    }
}
