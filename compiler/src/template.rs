// template.rs — Code block templates
//
// Parses template files made of `/*** name($a, $b) [port] ***/ ... /**/`
// blocks into `CodeStream`s, locates the streams that apply to an adapter
// (embedded code first, then the class chain crossed with the package
// truncation chain), and appends blocks with their parameters bound.
//
// Preconditions: template roots exist or are simply empty.
// Postconditions: block bodies are trimmed of surrounding blank space, with
//   one newline kept when the body ended in one.
// Failure modes: malformed headers (E0304), duplicate signatures (E0305),
//   missing mandatory blocks (E0306), unreadable files (E0500).
// Side effects: reads template files; loaded streams are cached.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::diag::{codes, CgError, ErrorKind, Result};
use crate::macros::parse_list;

const HEADER_OPEN: &str = "/***";
const HEADER_CLOSE: &str = "***/";
const BLOCK_END: &str = "/**/";

// ── Code blocks ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    pub name: String,
    /// Formal parameters, each starting with `$`.
    pub params: Vec<String>,
    /// Port whose width drives per-channel instantiation, from `[port]`.
    pub width_port: Option<String>,
    pub body: String,
}

impl CodeBlock {
    /// Body with every formal parameter replaced by its argument.
    pub fn instantiate(&self, args: &[String]) -> Result<String> {
        if args.len() != self.params.len() {
            return Err(template_error(
                codes::E0302,
                format!(
                    "code block {} takes {} argument(s), got {}",
                    self.signature(),
                    self.params.len(),
                    args.len()
                ),
            ));
        }
        // Longest names first so `$chan` never eats part of `$channel`.
        let mut order: Vec<usize> = (0..self.params.len()).collect();
        order.sort_by_key(|i| std::cmp::Reverse(self.params[*i].len()));
        let mut body = self.body.clone();
        for i in order {
            body = substitute_parameter(&body, &self.params[i], &args[i]);
        }
        Ok(body)
    }

    pub fn signature(&self) -> String {
        format!("{}({})", self.name, self.params.join(", "))
    }
}

/// Replace `param` (e.g. `$channel`) where it is not followed by another
/// identifier character.
fn substitute_parameter(body: &str, param: &str, arg: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut rest = body;
    while let Some(idx) = rest.find(param) {
        let after = &rest[idx + param.len()..];
        let boundary = !after.starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_');
        out.push_str(&rest[..idx]);
        out.push_str(if boundary { arg } else { param });
        rest = after;
    }
    out.push_str(rest);
    out
}

fn template_error(code: crate::diag::DiagCode, message: impl Into<String>) -> CgError {
    CgError::new(ErrorKind::Macro, message).with_code(code)
}

// ── CodeStream ──────────────────────────────────────────────────────────────

/// The blocks of one template file, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeStream {
    blocks: Vec<CodeBlock>,
}

impl CodeStream {
    pub fn parse(text: &str) -> Result<CodeStream> {
        let mut blocks: Vec<CodeBlock> = Vec::new();
        let mut pos = 0;

        while let Some(rel) = text[pos..].find(HEADER_OPEN) {
            let header_start = pos + rel;
            let header_end = find_at(text, HEADER_CLOSE, header_start + HEADER_OPEN.len())
                .ok_or_else(|| {
                    template_error(
                        codes::E0304,
                        format!("unterminated code block header at byte {}", header_start),
                    )
                })?;
            let header = &text[header_start + HEADER_OPEN.len()..header_end];
            let body_start = header_end + HEADER_CLOSE.len();
            let body_end = find_block_end(text, body_start).ok_or_else(|| {
                template_error(
                    codes::E0304,
                    format!("code block '{}' has no closing /**/", header.trim()),
                )
            })?;

            let (name, params, width_port) = parse_header(header)?;
            let block = CodeBlock {
                name,
                params,
                width_port,
                body: trim_body(&text[body_start..body_end]),
            };
            if blocks
                .iter()
                .any(|b| b.name == block.name && b.params.len() == block.params.len())
            {
                return Err(template_error(
                    codes::E0305,
                    format!("duplicate code block signature {}", block.signature()),
                ));
            }
            blocks.push(block);
            pos = body_end + BLOCK_END.len();
        }

        Ok(CodeStream { blocks })
    }

    pub fn blocks(&self) -> &[CodeBlock] {
        &self.blocks
    }

    pub fn get(&self, name: &str, arity: usize) -> Option<&CodeBlock> {
        self.blocks
            .iter()
            .find(|b| b.name == name && b.params.len() == arity && b.width_port.is_none())
    }

    pub fn width_block(&self, name: &str) -> Option<&CodeBlock> {
        self.blocks
            .iter()
            .find(|b| b.name == name && b.width_port.is_some())
    }
}

fn find_at(text: &str, needle: &str, from: usize) -> Option<usize> {
    text.get(from..)?.find(needle).map(|i| i + from)
}

/// End of the block body starting at `from`, skipping nested blocks.
fn find_block_end(text: &str, from: usize) -> Option<usize> {
    let mut depth = 1usize;
    let mut pos = from;
    loop {
        let close = find_at(text, BLOCK_END, pos)?;
        match find_at(text, HEADER_OPEN, pos) {
            Some(open) if open < close => {
                depth += 1;
                pos = open + HEADER_OPEN.len();
            }
            _ => {
                depth -= 1;
                if depth == 0 {
                    return Some(close);
                }
                pos = close + BLOCK_END.len();
            }
        }
    }
}

fn parse_header(header: &str) -> Result<(String, Vec<String>, Option<String>)> {
    let header = header.trim();
    let (signature, width_port) = match header.find('[') {
        Some(open) => {
            let close = header[open..].find(']').map(|i| i + open).ok_or_else(|| {
                template_error(codes::E0304, format!("unclosed '[' in header '{}'", header))
            })?;
            let port = header[open + 1..close].trim();
            if port.is_empty() {
                return Err(template_error(
                    codes::E0304,
                    format!("empty port name in header '{}'", header),
                ));
            }
            (header[..open].trim(), Some(port.to_string()))
        }
        None => (header, None),
    };

    let (name, params) = match signature.find('(') {
        Some(open) => {
            let close = signature.rfind(')').filter(|c| *c > open).ok_or_else(|| {
                template_error(codes::E0304, format!("unclosed '(' in header '{}'", header))
            })?;
            let params = parse_list(&signature[open + 1..close]);
            (signature[..open].trim(), params)
        }
        None => (signature, Vec::new()),
    };

    if name.is_empty() || name.contains(char::is_whitespace) {
        return Err(template_error(
            codes::E0304,
            format!("bad code block name in header '{}'", header),
        ));
    }
    if let Some(bad) = params.iter().find(|p| !p.starts_with('$')) {
        return Err(template_error(
            codes::E0304,
            format!("parameter '{}' of code block '{}' must start with '$'", bad, name),
        )
        .with_hint(format!("write ${}", bad)));
    }

    Ok((name.to_string(), params, width_port))
}

fn trim_body(body: &str) -> String {
    let blank = |c: char| c == ' ' || c == '\t' || c == '\n' || c == '\r';
    let trimmed = body.trim_matches(blank);
    if trimmed.is_empty() {
        return String::new();
    }
    let tail = &body[body.trim_end_matches(blank).len()..];
    if tail.contains('\n') {
        format!("{}\n", trimmed)
    } else {
        trimmed.to_string()
    }
}

// ── Block lookup over scopes ────────────────────────────────────────────────

/// The ordered template streams visible to one adapter.
#[derive(Debug, Clone, Default)]
pub struct BlockSet {
    streams: Vec<Rc<CodeStream>>,
}

impl BlockSet {
    pub fn new(streams: Vec<Rc<CodeStream>>) -> Self {
        BlockSet { streams }
    }

    pub fn is_empty(&self) -> bool {
        self.streams.iter().all(|s| s.blocks().is_empty())
    }

    pub fn lookup(&self, name: &str, arity: usize) -> Option<&CodeBlock> {
        self.streams.iter().find_map(|s| s.get(name, arity))
    }

    pub fn lookup_width_block(&self, name: &str) -> Option<&CodeBlock> {
        self.streams.iter().find_map(|s| s.width_block(name))
    }

    /// Append block `name` instantiated with `args`. A missing block is
    /// ignored unless `mandatory`.
    pub fn append_code_block(
        &self,
        out: &mut String,
        name: &str,
        args: &[String],
        mandatory: bool,
    ) -> Result<()> {
        match self.lookup(name, args.len()) {
            Some(block) => {
                out.push_str(&block.instantiate(args)?);
                Ok(())
            }
            None if mandatory => Err(template_error(
                codes::E0306,
                format!("no code block {}/{} found", name, args.len()),
            )),
            None => Ok(()),
        }
    }

    /// Append every zero-arity block whose name matches `pattern`, the most
    /// specific scope first and each name once. Returns the names appended.
    pub fn append_code_blocks(&self, out: &mut String, pattern: &str) -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        for stream in &self.streams {
            for block in stream.blocks() {
                if block.params.is_empty()
                    && block.width_port.is_none()
                    && wildcard_match(pattern, &block.name)
                    && !seen.contains(&block.name)
                {
                    out.push_str(&block.body);
                    seen.push(block.name.clone());
                }
            }
        }
        seen
    }

    /// Instantiate the `[port]` form of block `name` once per channel.
    /// `width` maps the declared port name to its width.
    pub fn append_width_blocks(
        &self,
        out: &mut String,
        name: &str,
        width: impl Fn(&str) -> Option<usize>,
    ) -> Result<()> {
        let Some(block) = self.lookup_width_block(name) else {
            return Ok(());
        };
        let port = block.width_port.as_deref().unwrap_or_default();
        let channels = width(port).ok_or_else(|| {
            template_error(
                codes::E0304,
                format!("code block {} names unknown port '{}'", block.signature(), port),
            )
        })?;
        for channel in 0..channels {
            // `$channel` is the first parameter; any others are left empty.
            let args: Vec<String> = (0..block.params.len())
                .map(|i| if i == 0 { channel.to_string() } else { String::new() })
                .collect();
            out.push_str(&block.instantiate(&args)?);
        }
        Ok(())
    }
}

/// Glob-style match where `*` (or `.*`) stands for any run of characters.
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    let pattern = pattern.replace(".*", "*");
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == name;
    }
    let mut rest = name;
    for (i, part) in parts.iter().enumerate() {
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(idx) => rest = &rest[idx + part.len()..],
                None => return false,
            }
        }
    }
    true
}

// ── Template store ──────────────────────────────────────────────────────────

/// Package names from most to least specific: `a.b.c`, `a.b`, `a`.
pub fn package_truncations(package: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = package.to_string();
    loop {
        out.push(current.clone());
        match current.rfind('.') {
            Some(idx) => current.truncate(idx),
            None => break,
        }
    }
    out
}

fn parse_named(package: &str, class: &str, text: &str) -> Result<Rc<CodeStream>> {
    let stream = CodeStream::parse(text).map_err(|e| {
        CgError::new(
            ErrorKind::Macro,
            format!("failed to parse templates for {} in {}", class, package),
        )
        .with_code(codes::E0304)
        .caused_by(e)
    })?;
    Ok(Rc::new(stream))
}

/// Template files under one or more roots, in-memory overrides, and
/// fallbacks for classes no root covers.
pub struct TemplateStore {
    roots: Vec<PathBuf>,
    extension: String,
    memory: HashMap<(String, String), Rc<CodeStream>>,
    fallback: HashMap<(String, String), Rc<CodeStream>>,
    loaded: RefCell<HashMap<(String, String), Option<Rc<CodeStream>>>>,
}

impl TemplateStore {
    pub fn new(extension: impl Into<String>) -> Self {
        TemplateStore {
            roots: Vec::new(),
            extension: extension.into(),
            memory: HashMap::new(),
            fallback: HashMap::new(),
            loaded: RefCell::new(HashMap::new()),
        }
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.roots.push(root.into());
        self
    }

    pub fn add_root(&mut self, root: impl Into<PathBuf>) {
        self.roots.push(root.into());
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Register template text for `class` under `package` without a file.
    /// Takes precedence over template roots.
    pub fn insert(&mut self, package: &str, class: &str, text: &str) -> Result<()> {
        let stream = parse_named(package, class, text)?;
        self.memory
            .insert((package.to_string(), class.to_string()), stream);
        Ok(())
    }

    /// Register template text consulted only when no root has a file for
    /// (package, class).
    pub fn insert_fallback(&mut self, package: &str, class: &str, text: &str) -> Result<()> {
        let stream = parse_named(package, class, text)?;
        self.fallback
            .insert((package.to_string(), class.to_string()), stream);
        Ok(())
    }

    /// Path of the template file for `class` under `package` in `root`.
    pub fn template_path(&self, root: &Path, package: &str, class: &str) -> PathBuf {
        let mut path = root.to_path_buf();
        for seg in package.split('.') {
            path.push(seg);
        }
        path.push("adapters");
        for seg in class.split('.') {
            path.push(seg);
        }
        path.set_extension(&self.extension);
        path
    }

    /// The stream for (package, class), or `None` if no template exists.
    pub fn stream(&self, package: &str, class: &str) -> Result<Option<Rc<CodeStream>>> {
        let key = (package.to_string(), class.to_string());
        if let Some(stream) = self.memory.get(&key) {
            return Ok(Some(Rc::clone(stream)));
        }
        if let Some(cached) = self.loaded.borrow().get(&key) {
            return Ok(cached.clone());
        }

        let mut found = None;
        for root in &self.roots {
            let path = self.template_path(root, package, class);
            if !path.is_file() {
                continue;
            }
            let text = std::fs::read_to_string(&path)
                .map_err(|e| CgError::io("read template", &path, e))?;
            let stream = CodeStream::parse(&text).map_err(|e| {
                CgError::new(
                    ErrorKind::Macro,
                    format!("failed to parse template {}", path.display()),
                )
                .with_code(codes::E0304)
                .caused_by(e)
            })?;
            log::trace!("loaded template {}", path.display());
            found = Some(Rc::new(stream));
            break;
        }
        if found.is_none() {
            found = self.fallback.get(&key).cloned();
        }
        self.loaded.borrow_mut().insert(key, found.clone());
        Ok(found)
    }

    /// Streams for an adapter: `embedded` first, then for each class of
    /// `class_chain` the package truncation chain of every package.
    pub fn block_set(
        &self,
        class_chain: &[String],
        packages: &[String],
        embedded: Option<Rc<CodeStream>>,
    ) -> Result<BlockSet> {
        let mut scopes: Vec<String> = Vec::new();
        for package in packages {
            for p in package_truncations(package) {
                if !scopes.contains(&p) {
                    scopes.push(p);
                }
            }
        }

        let mut streams: Vec<Rc<CodeStream>> = embedded.into_iter().collect();
        for class in class_chain {
            for package in &scopes {
                if let Some(stream) = self.stream(package, class)? {
                    streams.push(stream);
                }
            }
        }
        Ok(BlockSet::new(streams))
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const RAMP: &str = "\
/***preinitBlock***/
static $targetType(output) $actorSymbol(state);
/**/

/*** initBlock($init) ***/
$actorSymbol(state) = $init;
/**/

/*** fireBlock ***/
$ref(output) = $actorSymbol(state);
/**/

/*** fireBlock($channel) [input] ***/
sum += $ref(input#$channel);
/**/

/*** sharedBlock ***/
int shared_counter;
/**/
";

    #[test]
    fn parses_blocks() {
        let s = CodeStream::parse(RAMP).unwrap();
        assert_eq!(s.blocks().len(), 5);
        let init = s.get("initBlock", 1).unwrap();
        assert_eq!(init.params, vec!["$init"]);
        assert_eq!(init.body, "$actorSymbol(state) = $init;\n");
        assert!(s.get("initBlock", 0).is_none());
        let width = s.width_block("fireBlock").unwrap();
        assert_eq!(width.width_port.as_deref(), Some("input"));
        assert_eq!(s.get("fireBlock", 0).unwrap().body, "$ref(output) = $actorSymbol(state);\n");
    }

    #[test]
    fn body_trimming() {
        let s = CodeStream::parse("/*** a ***/   x  /**/\n/*** b ***/\n\n\ty;\n\n/**/").unwrap();
        assert_eq!(s.get("a", 0).unwrap().body, "x");
        assert_eq!(s.get("b", 0).unwrap().body, "y;\n");
    }

    #[test]
    fn nested_headers_belong_to_outer_block() {
        let text = "/*** outer ***/\na\n/*** inner ***/\nb\n/**/\nc\n/**/";
        let s = CodeStream::parse(text).unwrap();
        assert_eq!(s.blocks().len(), 1);
        assert!(s.get("outer", 0).unwrap().body.contains("/*** inner ***/"));
    }

    #[test]
    fn duplicate_signature_rejected() {
        let err = CodeStream::parse("/*** a ***/x/**/ /*** a ***/y/**/").unwrap_err();
        assert_eq!(err.code, Some(codes::E0305));
        // Same name, different arity is fine.
        assert!(CodeStream::parse("/*** a ***/x/**/ /*** a($p) ***/y/**/").is_ok());
    }

    #[test]
    fn parameter_without_dollar_rejected() {
        let err = CodeStream::parse("/*** a(p) ***/x/**/").unwrap_err();
        assert_eq!(err.code, Some(codes::E0304));
        assert!(err.hint.is_some());
    }

    #[test]
    fn instantiate_respects_identifier_boundary() {
        let block = CodeBlock {
            name: "b".into(),
            params: vec!["$a".into(), "$ab".into()],
            width_port: None,
            body: "$a + $ab + $actorSymbol(x)".into(),
        };
        assert_eq!(
            block.instantiate(&["1".into(), "2".into()]).unwrap(),
            "1 + 2 + $actorSymbol(x)"
        );
        assert!(block.instantiate(&[]).is_err());
    }

    #[test]
    fn append_blocks() {
        let set = BlockSet::new(vec![Rc::new(CodeStream::parse(RAMP).unwrap())]);
        let mut out = String::new();
        set.append_code_block(&mut out, "initBlock", &["0".into()], true).unwrap();
        assert_eq!(out, "$actorSymbol(state) = 0;\n");

        set.append_code_block(&mut out, "wrapupBlock", &[], false).unwrap();
        let err = set.append_code_block(&mut out, "wrapupBlock", &[], true).unwrap_err();
        assert_eq!(err.code, Some(codes::E0306));

        let mut shared = String::new();
        let names = set.append_code_blocks(&mut shared, ".*shared.*");
        assert_eq!(names, vec!["sharedBlock"]);
        assert_eq!(shared, "int shared_counter;\n");
    }

    #[test]
    fn width_blocks_per_channel() {
        let set = BlockSet::new(vec![Rc::new(CodeStream::parse(RAMP).unwrap())]);
        let mut out = String::new();
        set.append_width_blocks(&mut out, "fireBlock", |p| (p == "input").then_some(3))
            .unwrap();
        assert_eq!(
            out,
            "sum += $ref(input#0);\nsum += $ref(input#1);\nsum += $ref(input#2);\n"
        );
        assert!(set
            .append_width_blocks(&mut out, "fireBlock", |_| None)
            .is_err());
    }

    #[test]
    fn wildcards() {
        assert!(wildcard_match(".*shared.*", "sharedBlock"));
        assert!(!wildcard_match("*shared*", "mySharedBlock"));
        assert!(wildcard_match("*Block", "fireBlock"));
        assert!(wildcard_match("fire*", "fireBlock"));
        assert!(!wildcard_match("fire", "fireBlock"));
    }

    #[test]
    fn truncations() {
        assert_eq!(
            package_truncations("generic.program.procedural.c"),
            vec![
                "generic.program.procedural.c",
                "generic.program.procedural",
                "generic.program",
                "generic"
            ]
        );
    }

    #[test]
    fn block_set_order_and_memory_streams() {
        let mut store = TemplateStore::new("c");
        store
            .insert("generic.program.procedural", "a.Base", "/*** fireBlock ***/base/**/ /*** initBlock ***/init/**/")
            .unwrap();
        store
            .insert("generic.program.procedural.c", "a.Derived", "/*** fireBlock ***/derived/**/")
            .unwrap();
        let chain = vec!["a.Derived".to_string(), "a.Base".to_string()];
        let set = store
            .block_set(&chain, &["generic.program.procedural.c".to_string()], None)
            .unwrap();
        assert_eq!(set.lookup("fireBlock", 0).unwrap().body, "derived");
        assert_eq!(set.lookup("initBlock", 0).unwrap().body, "init");

        let embedded = Rc::new(CodeStream::parse("/*** fireBlock ***/embedded/**/").unwrap());
        let set = store
            .block_set(&chain, &["generic.program.procedural.c".to_string()], Some(embedded))
            .unwrap();
        assert_eq!(set.lookup("fireBlock", 0).unwrap().body, "embedded");
    }

    #[test]
    fn roots_shadow_fallbacks() {
        let root = std::env::temp_dir().join(format!("ptcg_tpl_{}", std::process::id()));
        let mut store = TemplateStore::new("c").with_root(&root);
        store.insert_fallback("p", "x.A", "/*** fireBlock ***/fallback/**/").unwrap();
        store.insert_fallback("p", "x.B", "/*** fireBlock ***/fallback/**/").unwrap();
        let path = store.template_path(&root, "p", "x.A");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "/*** fireBlock ***/from file/**/").unwrap();

        let a = store.stream("p", "x.A").unwrap().unwrap();
        assert_eq!(a.get("fireBlock", 0).unwrap().body, "from file");
        let b = store.stream("p", "x.B").unwrap().unwrap();
        assert_eq!(b.get("fireBlock", 0).unwrap().body, "fallback");
        assert!(store.stream("p", "x.C").unwrap().is_none());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn template_path_layout() {
        let store = TemplateStore::new("c");
        let p = store.template_path(
            Path::new("/t"),
            "generic.program.procedural.c",
            "ptolemy.actor.lib.Ramp",
        );
        assert_eq!(
            p,
            PathBuf::from("/t/generic/program/procedural/c/adapters/ptolemy/actor/lib/Ramp.c")
        );
    }
}
