//! Argument redaction: the policy is plain data, applied only at log-format
//! time. It never touches the argv handed to the subprocess.

use std::collections::HashSet;

const REDACTED: &str = "<redacted>";

#[derive(Debug, Clone, Default)]
pub struct RedactionPolicy {
    flag_names: HashSet<String>,
    positional_indices: HashSet<usize>,
}

impl RedactionPolicy {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(flag_names: impl IntoIterator<Item = impl Into<String>>, positional_indices: impl IntoIterator<Item = usize>) -> Self {
        Self {
            flag_names: flag_names.into_iter().map(Into::into).collect(),
            positional_indices: positional_indices.into_iter().collect(),
        }
    }

    /// Render `args` for logging: the value following a listed flag name
    /// and any value at a listed positional index are replaced.
    pub fn redact(&self, args: &[String]) -> Vec<String> {
        let mut out = Vec::with_capacity(args.len());
        let mut redact_next = false;
        for (idx, arg) in args.iter().enumerate() {
            if redact_next {
                out.push(REDACTED.to_string());
                redact_next = false;
                continue;
            }
            if self.positional_indices.contains(&idx) {
                out.push(REDACTED.to_string());
                continue;
            }
            out.push(arg.clone());
            if self.flag_names.contains(arg) {
                redact_next = true;
            }
        }
        out
    }

    pub fn format_for_log(&self, name: &str, args: &[String]) -> String {
        let redacted = self.redact(args);
        format!("{name} {}", redacted.join(" "))
    }
}
