//! §4.1 Validator — rejects unknown scripts or out-of-policy arguments.
//!
//! Regexes are compiled once, at construction time, and cached alongside
//! each registry entry rather than recompiled per call.

use std::collections::HashMap;

use regex::Regex;

use crate::schema::{ErrorCode, ScriptEntry};

pub struct CompiledScript {
    pub entry: ScriptEntry,
    pattern: Regex,
}

pub struct Validator {
    scripts: HashMap<String, CompiledScript>,
}

pub struct ValidationError {
    pub code: ErrorCode,
    pub message: String,
}

impl Validator {
    pub fn new(scripts: Vec<ScriptEntry>) -> Self {
        let mut map = HashMap::with_capacity(scripts.len());
        for entry in scripts {
            // Config load already validated the pattern compiles; this
            // constructor is infallible given that invariant.
            let pattern = Regex::new(&entry.args.item_pattern)
                .expect("script registry entry carries a pre-validated regex");
            map.insert(
                entry.id.clone(),
                CompiledScript {
                    entry,
                    pattern,
                },
            );
        }
        Validator { scripts: map }
    }

    pub fn get(&self, script_id: &str) -> Option<&ScriptEntry> {
        self.scripts.get(script_id).map(|c| &c.entry)
    }

    /// Validate `(scriptId, args)` against the registry, in the exact
    /// check order spec §4.1 prescribes.
    pub fn validate<'a>(
        &'a self,
        script_id: &str,
        args: &[String],
    ) -> Result<&'a ScriptEntry, ValidationError> {
        let compiled = self.scripts.get(script_id).ok_or_else(|| ValidationError {
            code: ErrorCode::ScriptNotFound,
            message: format!("unknown scriptId: {script_id}"),
        })?;

        let policy = &compiled.entry.args;

        if args.len() > policy.max_items {
            return Err(ValidationError {
                code: ErrorCode::InvalidArgs,
                message: format!(
                    "args length {} exceeds maxItems {}",
                    args.len(),
                    policy.max_items
                ),
            });
        }

        for (i, arg) in args.iter().enumerate() {
            if arg.len() > policy.item_max_length {
                return Err(ValidationError {
                    code: ErrorCode::InvalidArgs,
                    message: format!(
                        "args[{i}] length {} exceeds itemMaxLength {}",
                        arg.len(),
                        policy.item_max_length
                    ),
                });
            }
            if !compiled.pattern.is_match(arg) {
                return Err(ValidationError {
                    code: ErrorCode::InvalidArgs,
                    message: format!("args[{i}] does not match itemPattern"),
                });
            }
        }

        Ok(&compiled.entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ScriptArgsPolicy;

    fn script(id: &str) -> ScriptEntry {
        ScriptEntry {
            id: id.to_string(),
            path: "/bin/true".to_string(),
            mode: None,
            timeout_sec: 0,
            args: ScriptArgsPolicy {
                max_items: 2,
                item_pattern: "^[a-zA-Z0-9._-]+$".to_string(),
                item_max_length: 32,
            },
        }
    }

    #[test]
    fn unknown_script_is_rejected() {
        let v = Validator::new(vec![script("ok")]);
        let err = v.validate("missing", &[]).unwrap_err();
        assert_eq!(err.code, ErrorCode::ScriptNotFound);
    }

    #[test]
    fn too_many_args_is_rejected() {
        let v = Validator::new(vec![script("ok")]);
        let err = v
            .validate("ok", &["a".into(), "b".into(), "c".into()])
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArgs);
    }

    #[test]
    fn pattern_is_applied_per_argument() {
        let v = Validator::new(vec![script("ok")]);
        let err = v.validate("ok", &["bad/slash".into()]).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArgs);

        assert!(v.validate("ok", &["hello".into(), "world".into()]).is_ok());
    }

    #[test]
    fn item_too_long_is_rejected() {
        let v = Validator::new(vec![script("ok")]);
        let long = "a".repeat(64);
        let err = v.validate("ok", &[long]).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArgs);
    }
}
