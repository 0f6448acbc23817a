//! Script execution state
//!
//! Per-script state: the session factory, the lazily created session, the
//! attributes it will be created with, and script variables.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::log::Logger;
use crate::runner::SessionFactory;
use crate::session::{Session, SessionAttributes};

/// Mutable state for a single script execution
pub struct State {
    factory: SessionFactory,
    session: Option<Session>,
    /// Attributes for the session, settable until it exists
    pub attrs: SessionAttributes,
    /// Working directory (archive files extracted here)
    pub workdir: PathBuf,
    vars: HashMap<String, String>,
}

impl State {
    /// `name` is the session name until a script sets another
    pub fn new(factory: SessionFactory, name: impl Into<String>, workdir: PathBuf) -> Self {
        let mut vars = HashMap::new();
        vars.insert("WORK".to_string(), workdir.to_string_lossy().into_owned());
        vars.insert("CLI".to_string(), factory.command().to_string());
        Self {
            factory,
            session: None,
            attrs: SessionAttributes::new(name),
            workdir,
            vars,
        }
    }

    /// The session, created from the current attributes on first use
    pub fn session(&mut self) -> &mut Session {
        let factory = &self.factory;
        let attrs = &self.attrs;
        self.session.get_or_insert_with(|| factory.create(attrs.clone()))
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn dir(&self) -> &Path {
        &self.workdir
    }

    /// Set a script variable
    pub fn setvar(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Script variables shadow the process environment
    pub fn getvar(&self, key: &str) -> Option<String> {
        self.vars
            .get(key)
            .cloned()
            .or_else(|| std::env::var(key).ok())
    }

    /// Expand variables in a string
    pub fn expand_env(&self, s: &str, in_regexp: bool) -> String {
        crate::parser::expand_env(s, &|key| self.getvar(key), in_regexp)
    }

    /// Write a log entry
    pub fn logf(&self, msg: &str) {
        self.factory.logger().log(msg);
    }

    /// Write an error entry to the log
    pub fn errorf(&self, msg: &str) {
        self.factory.logger().error(msg);
    }
}
