//! Injected text generation for human-readable action descriptions.
//!
//! Nothing in this crate reaches for a global message catalogue. Callers
//! that present text hand in a [`Translator`]; [`English`] is the built-in
//! fallback.

/// Turns a message key plus positional arguments into display text.
///
/// Keys are `act_N`, `act_I`, ... one per action type. Arguments are
/// substituted for `$1`, `$2`, ... in the template.
pub trait Translator {
    fn translate(&self, key: &str, args: &[&str]) -> String;
}

impl<F> Translator for F
where
    F: Fn(&str, &[&str]) -> String,
{
    fn translate(&self, key: &str, args: &[&str]) -> String {
        self(key, args)
    }
}

/// Built-in English templates.
#[derive(Debug, Clone, Copy, Default)]
pub struct English;

impl English {
    fn template(key: &str) -> Option<&'static str> {
        Some(match key {
            "act_N" => "Created '$1'",
            "act_I" => "Inserted '$1'",
            "act_A" => "Set reminder on '$1' due $2, repeating every $3 days",
            "act_C" => "Cancelled reminder on '$1'",
            "act_D" => "Deleted '$1'",
            "act_E" => "Changed value of '$1'",
            "act_M" => "Moved '$1' to '$2'",
            "act_R" => "Renamed '$1' to '$2'",
            "act_X" => "Constrained '$1' to $2 characters from '$3'",
            _ => return None,
        })
    }
}

impl Translator for English {
    fn translate(&self, key: &str, args: &[&str]) -> String {
        match Self::template(key) {
            Some(template) => substitute(template, args),
            None => format!("{key} {}", args.join(" ")),
        }
    }
}

/// Replace `$1`..`$9` with the matching argument. Missing arguments become
/// empty strings.
pub fn substitute(template: &str, args: &[&str]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '$' {
            if let Some(digit) = chars.peek().and_then(|d| d.to_digit(10)) {
                chars.next();
                if digit > 0 {
                    out.push_str(args.get(digit as usize - 1).copied().unwrap_or(""));
                }
                continue;
            }
        }
        out.push(c);
    }
    out
}
