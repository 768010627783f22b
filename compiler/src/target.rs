// target.rs — Target language descriptions
//
// What the generator needs to know about an output language: comment
// syntax, the mapping from port types to target types, literals, buffer
// declarations, function framing and the bodies of the primitive
// conversion helpers (`InttoDouble` and friends).

use crate::expr::{format_double, Value};
use crate::types::PtType;

/// Name of the helper converting `from` into `to`, e.g. `InttoDouble`.
pub fn conversion_name(from: &PtType, to: &PtType) -> String {
    format!("{}to{}", from.cg_type(), to.cg_type())
}

pub trait Target {
    /// Display name, e.g. `C`.
    fn name(&self) -> &'static str;

    /// File extension of generated programs and templates.
    fn extension(&self) -> &'static str;

    fn comment(&self, text: &str) -> String {
        format!("/* {} */\n", text)
    }

    fn target_type(&self, ty: &PtType) -> String;

    /// Types the target represents natively (no boxed token).
    fn is_primitive(&self, ty: &PtType) -> bool {
        matches!(
            ty,
            PtType::Boolean
                | PtType::UnsignedByte
                | PtType::Int
                | PtType::Long
                | PtType::Double
                | PtType::String
        )
    }

    fn literal(&self, value: &Value) -> String;

    /// A static buffer declaration; `dims` empty for a scalar.
    fn declare_buffer(&self, ty: &PtType, name: &str, dims: &[usize]) -> String;

    /// Opening line of a parameterless procedure.
    fn function_open(&self, name: &str) -> String;

    fn function_close(&self) -> &'static str {
        "}\n"
    }

    /// Full definition of the conversion helper, or `None` when the pair
    /// has no primitive conversion.
    fn conversion_function(&self, from: &PtType, to: &PtType) -> Option<String>;
}

fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

fn is_number(ty: &PtType) -> bool {
    matches!(
        ty,
        PtType::UnsignedByte | PtType::Int | PtType::Long | PtType::Double
    )
}

// ── C ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct CTarget;

impl CTarget {
    fn conversion_expr(&self, from: &PtType, to: &PtType) -> Option<String> {
        let expr = match (from, to) {
            (f, t) if is_number(f) && is_number(t) => format!("({}) a", self.target_type(t)),
            (PtType::Boolean, t) if is_number(t) => "a ? 1 : 0".to_string(),
            (f, PtType::Boolean) if is_number(f) => "a != 0".to_string(),
            (PtType::Boolean, PtType::String) => "a ? \"true\" : \"false\"".to_string(),
            (f, PtType::String) if is_number(f) => {
                let format = match f {
                    PtType::Long => "%lld",
                    PtType::Double => "%g",
                    _ => "%d",
                };
                return Some(format!(
                    "char* s = malloc(32);\n    sprintf(s, \"{}\", a);\n    return s;",
                    format
                ));
            }
            (PtType::String, PtType::Int) => "atoi(a)".to_string(),
            (PtType::String, PtType::Long) => "atoll(a)".to_string(),
            (PtType::String, PtType::Double) => "atof(a)".to_string(),
            (PtType::String, PtType::Boolean) => "strcmp(a, \"true\") == 0".to_string(),
            _ => return None,
        };
        Some(format!("return {};", expr))
    }
}

impl Target for CTarget {
    fn name(&self) -> &'static str {
        "C"
    }

    fn extension(&self) -> &'static str {
        "c"
    }

    fn target_type(&self, ty: &PtType) -> String {
        match ty {
            PtType::Boolean => "boolean",
            PtType::UnsignedByte => "unsigned char",
            PtType::Int => "int",
            PtType::Long => "long long",
            PtType::Double => "double",
            PtType::String => "char*",
            _ => "Token",
        }
        .to_string()
    }

    fn literal(&self, value: &Value) -> String {
        match value {
            Value::Boolean(b) => b.to_string(),
            Value::Int(v) => v.to_string(),
            Value::Long(v) => format!("{}LL", v),
            Value::Double(v) => format_double(*v),
            Value::Str(s) => escape_string(s),
            Value::Array(items) => {
                let inner: Vec<String> = items.iter().map(|v| self.literal(v)).collect();
                format!("{{{}}}", inner.join(", "))
            }
        }
    }

    fn declare_buffer(&self, ty: &PtType, name: &str, dims: &[usize]) -> String {
        let mut decl = format!("static {} {}", self.target_type(ty), name);
        for d in dims {
            decl.push_str(&format!("[{}]", d));
        }
        decl.push_str(";\n");
        decl
    }

    fn function_open(&self, name: &str) -> String {
        format!("void {}(void) {{\n", name)
    }

    fn conversion_function(&self, from: &PtType, to: &PtType) -> Option<String> {
        let body = self.conversion_expr(from, to)?;
        Some(format!(
            "{} {}({} a) {{\n    {}\n}}\n",
            self.target_type(to),
            conversion_name(from, to),
            self.target_type(from),
            body
        ))
    }
}

// ── Java ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct JavaTarget;

impl JavaTarget {
    fn conversion_expr(&self, from: &PtType, to: &PtType) -> Option<String> {
        let expr = match (from, to) {
            (f, t) if is_number(f) && is_number(t) => format!("({}) a", self.target_type(t)),
            (PtType::Boolean, t) if is_number(t) => {
                format!("({}) (a ? 1 : 0)", self.target_type(t))
            }
            (f, PtType::Boolean) if is_number(f) => "a != 0".to_string(),
            (_, PtType::String) if self.is_primitive(from) => "String.valueOf(a)".to_string(),
            (PtType::String, PtType::Int) => "Integer.parseInt(a)".to_string(),
            (PtType::String, PtType::Long) => "Long.parseLong(a)".to_string(),
            (PtType::String, PtType::Double) => "Double.parseDouble(a)".to_string(),
            (PtType::String, PtType::Boolean) => "Boolean.parseBoolean(a)".to_string(),
            (PtType::String, PtType::UnsignedByte) => "(byte) Integer.parseInt(a)".to_string(),
            _ => return None,
        };
        Some(expr)
    }
}

impl Target for JavaTarget {
    fn name(&self) -> &'static str {
        "Java"
    }

    fn extension(&self) -> &'static str {
        "java"
    }

    fn target_type(&self, ty: &PtType) -> String {
        match ty {
            PtType::Boolean => "boolean",
            PtType::UnsignedByte => "byte",
            PtType::Int => "int",
            PtType::Long => "long",
            PtType::Double => "double",
            PtType::String => "String",
            _ => "Token",
        }
        .to_string()
    }

    fn literal(&self, value: &Value) -> String {
        match value {
            Value::Boolean(b) => b.to_string(),
            Value::Int(v) => v.to_string(),
            Value::Long(v) => format!("{}L", v),
            Value::Double(v) => format_double(*v),
            Value::Str(s) => escape_string(s),
            Value::Array(items) => {
                let elem = match value.pt_type() {
                    PtType::Array(e) => self.target_type(&e),
                    _ => "Object".to_string(),
                };
                let inner: Vec<String> = items.iter().map(|v| self.literal(v)).collect();
                format!("new {}[] {{{}}}", elem, inner.join(", "))
            }
        }
    }

    fn declare_buffer(&self, ty: &PtType, name: &str, dims: &[usize]) -> String {
        let base = self.target_type(ty);
        if dims.is_empty() {
            return format!("static {} {};\n", base, name);
        }
        let brackets = "[]".repeat(dims.len());
        let sizes: String = dims.iter().map(|d| format!("[{}]", d)).collect();
        format!("static {}{} {} = new {}{};\n", base, brackets, name, base, sizes)
    }

    fn function_open(&self, name: &str) -> String {
        format!("static void {}() {{\n", name)
    }

    fn conversion_function(&self, from: &PtType, to: &PtType) -> Option<String> {
        let expr = self.conversion_expr(from, to)?;
        Some(format!(
            "static {} {}({} a) {{\n    return {};\n}}\n",
            self.target_type(to),
            conversion_name(from, to),
            self.target_type(from),
            expr
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn c_types_and_literals() {
        let c = CTarget;
        assert_eq!(c.target_type(&PtType::Long), "long long");
        assert_eq!(c.target_type(&PtType::Array(Box::new(PtType::Int))), "Token");
        assert_eq!(c.literal(&Value::Double(2.0)), "2.0");
        assert_eq!(c.literal(&Value::Str("a\"b".into())), "\"a\\\"b\"");
        assert_eq!(
            c.literal(&Value::Array(vec![Value::Int(1), Value::Int(2)])),
            "{1, 2}"
        );
    }

    #[test]
    fn c_declarations() {
        let c = CTarget;
        assert_eq!(c.declare_buffer(&PtType::Int, "x", &[]), "static int x;\n");
        assert_eq!(
            c.declare_buffer(&PtType::Double, "y", &[2, 3]),
            "static double y[2][3];\n"
        );
    }

    #[test]
    fn c_conversion_helpers() {
        let c = CTarget;
        assert_eq!(
            c.conversion_function(&PtType::Int, &PtType::Double).unwrap(),
            "double InttoDouble(int a) {\n    return (double) a;\n}\n"
        );
        assert!(c
            .conversion_function(&PtType::Double, &PtType::String)
            .unwrap()
            .contains("%g"));
        assert!(c
            .conversion_function(&PtType::Int, &PtType::Array(Box::new(PtType::Int)))
            .is_none());
    }

    #[test]
    fn java_forms() {
        let j = JavaTarget;
        assert_eq!(
            j.declare_buffer(&PtType::Int, "x", &[2]),
            "static int[] x = new int[2];\n"
        );
        assert_eq!(j.literal(&Value::Long(5)), "5L");
        assert_eq!(
            j.literal(&Value::Array(vec![Value::Double(1.5)])),
            "new double[] {1.5}"
        );
        assert_eq!(
            j.conversion_function(&PtType::Int, &PtType::String).unwrap(),
            "static String InttoString(int a) {\n    return String.valueOf(a);\n}\n"
        );
        assert_eq!(j.function_open("Model"), "static void Model() {\n");
    }

    #[test]
    fn primitive_set() {
        let c = CTarget;
        assert!(c.is_primitive(&PtType::String));
        assert!(!c.is_primitive(&PtType::General));
        assert!(!c.is_primitive(&PtType::Array(Box::new(PtType::Int))));
        assert_eq!(conversion_name(&PtType::Int, &PtType::Double), "InttoDouble");
    }
}
