//! Configuration read from environment variables.

/// Interpret a string value such as "1" or "no" as a boolean.
pub fn str_as_bool(s: &str) -> Option<bool> {
    match s {
        "1" | "true" | "t" | "yes" | "y" => Some(true),
        "0" | "false" | "f" | "no" | "n" => Some(false),
        _ => None,
    }
}

/// Read and parse the environment variable `name`.
///
/// Returns `default` if the variable is unset or its value is not recognized
/// by `parse`.
pub fn env_value<T>(name: &str, default: T, parse: impl FnOnce(&str) -> Option<T>) -> T {
    let Ok(value) = std::env::var(name) else {
        return default;
    };
    match parse(&value) {
        Some(parsed) => parsed,
        None => {
            eprintln!("Unrecognized value \"{}\" for {}", value, name);
            default
        }
    }
}

/// Return whether a feature flag controlled by an environment variable is
/// enabled.
pub fn env_flag(name: &str, default: bool) -> bool {
    env_value(name, default, str_as_bool)
}
