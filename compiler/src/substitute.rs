// substitute.rs — `@key@` substitution for file names and build commands
//
// Independent of the macro processor: only `@key@` tokens whose key is in
// the map are replaced; everything else, unknown keys included, is kept.

use std::collections::HashMap;
use std::path::Path;

use crate::diag::{CgError, Result};

pub fn substitute(text: &str, map: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('@') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('@') {
            Some(close) => {
                let key = &after[..close];
                match map.get(key) {
                    Some(value) => {
                        out.push_str(value);
                        rest = &after[close + 1..];
                    }
                    None => {
                        // Keep the '@' and rescan from the second one, which
                        // may open a known key.
                        out.push('@');
                        rest = after;
                    }
                }
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Substitute `template`'s contents into `output`.
pub fn substitute_file(template: &Path, map: &HashMap<String, String>, output: &Path) -> Result<()> {
    let text = std::fs::read_to_string(template).map_err(|e| CgError::io("read", template, e))?;
    std::fs::write(output, substitute(&text, map)).map_err(|e| CgError::io("write", output, e))?;
    log::debug!("substituted {} into {}", template.display(), output.display());
    Ok(())
}
