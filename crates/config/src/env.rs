//! `${VAR}` expansion in raw config text.

/// Expand `${NAME}` placeholders from the process environment.
///
/// Placeholders that do not resolve — unset variable, empty name, missing
/// closing brace — are kept exactly as written, so a config referencing an
/// optional variable still parses.
pub fn expand_env(input: &str) -> String {
    expand_with(input, |name| std::env::var(name).ok())
}

/// Placeholder expansion against an injectable resolver, so tests never have
/// to mutate the process environment.
fn expand_with(input: &str, resolve: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(open) = rest.find("${") {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        match after_open.find('}') {
            Some(close) if close > 0 => {
                let name = &after_open[..close];
                match resolve(name) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push_str("${");
                        out.push_str(name);
                        out.push('}');
                    },
                }
                rest = &after_open[close + 1..];
            },
            // "${}" or an opener with no closing brace: emit literally and
            // keep scanning after the opener.
            _ => {
                out.push_str("${");
                rest = after_open;
            },
        }
    }

    out.push_str(rest);
    out
}
