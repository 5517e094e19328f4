//! Resolution of `env("NAME")` / `env("NAME", "default")` function-call
//! expressions. Resolved at load time so the kernel-facing renderer never
//! sees an unresolved expression.

use crate::error::Error;

pub fn resolve(name: &str, default: Option<&str>) -> Result<String, Error> {
    match std::env::var(name) {
        Ok(value) => Ok(value),
        Err(_) => match default {
            Some(default) => Ok(default.to_string()),
            None => Err(Error::ConfigMissingEnv(name.to_string())),
        },
    }
}
