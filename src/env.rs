use crate::context::ContextToken;
use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};

pub const CONTEXT_ENV_VAR: &str = "SNAP_CONTEXT";

/// Something that holds the environment a launched program will inherit.
pub trait Environment {
    fn set_var(&mut self, key: &OsStr, value: &OsStr);
}

/// Mutating it is only sound while the process is single-threaded, which is
/// the case for a launcher right before it execs.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnvironment;

impl Environment for ProcessEnvironment {
    fn set_var(&mut self, key: &OsStr, value: &OsStr) {
        std::env::set_var(key, value);
    }
}

impl Environment for BTreeMap<OsString, OsString> {
    fn set_var(&mut self, key: &OsStr, value: &OsStr) {
        self.insert(key.to_os_string(), value.to_os_string());
    }
}

/// Exports `token` as `SNAP_CONTEXT`. Without a token the environment is left
/// exactly as it was.
pub fn inject<E: Environment + ?Sized>(env: &mut E, token: Option<&ContextToken>) {
    if let Some(token) = token {
        env.set_var(OsStr::new(CONTEXT_ENV_VAR), token.as_os_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::lookup_in;
    use std::fs;
    use tempfile::tempdir;

    fn token(content: &str) -> ContextToken {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("snap.foo"), content).unwrap();
        lookup_in(dir.path(), "foo").unwrap()
    }

    #[test]
    fn inject_sets_variable() {
        let mut env: BTreeMap<OsString, OsString> = BTreeMap::new();
        let token = token("Y2F0LXBpY3R1cmUtb2YtYS1jYXQ=");
        inject(&mut env, Some(&token));
        assert_eq!(
            env.get(OsStr::new(CONTEXT_ENV_VAR)),
            Some(&OsString::from("Y2F0LXBpY3R1cmUtb2YtYS1jYXQ="))
        );
        assert_eq!(env.len(), 1);
    }

    #[test]
    fn inject_overwrites_previous_value() {
        let mut env = BTreeMap::new();
        env.insert(OsString::from(CONTEXT_ENV_VAR), OsString::from("stale"));
        inject(&mut env, Some(&token("fresh")));
        assert_eq!(env[OsStr::new(CONTEXT_ENV_VAR)], OsString::from("fresh"));
    }

    #[test]
    fn inject_without_token_is_noop() {
        let mut empty: BTreeMap<OsString, OsString> = BTreeMap::new();
        inject(&mut empty, None);
        assert!(empty.is_empty());

        let mut set = BTreeMap::new();
        set.insert(OsString::from(CONTEXT_ENV_VAR), OsString::from("prior"));
        inject(&mut set, None);
        assert_eq!(set[OsStr::new(CONTEXT_ENV_VAR)], OsString::from("prior"));
    }

    #[test]
    fn inject_into_process_environment() {
        // Only test in this binary that touches SNAP_CONTEXT.
        std::env::remove_var(CONTEXT_ENV_VAR);
        inject(&mut ProcessEnvironment, None);
        assert!(std::env::var_os(CONTEXT_ENV_VAR).is_none());

        inject(&mut ProcessEnvironment, Some(&token("process-token")));
        assert_eq!(std::env::var(CONTEXT_ENV_VAR).unwrap(), "process-token");

        inject(&mut ProcessEnvironment, None);
        assert_eq!(std::env::var(CONTEXT_ENV_VAR).unwrap(), "process-token");
        std::env::remove_var(CONTEXT_ENV_VAR);
    }
}
