// types.rs — Port and parameter types
//
// The slice of the type lattice the generator needs: a handful of
// primitive types, the Scalar/General supertypes, arrays, and the Unknown
// sentinel for ports whose type has not been resolved.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PtType {
    Unknown,
    Boolean,
    UnsignedByte,
    Int,
    Long,
    Double,
    String,
    Complex,
    Scalar,
    General,
    Array(Box<PtType>),
}

impl PtType {
    /// The name used in generated identifiers: `Int`, `Double`, `Array`, ...
    pub fn cg_type(&self) -> &'static str {
        match self {
            PtType::Unknown => "Unknown",
            PtType::Boolean => "Boolean",
            PtType::UnsignedByte => "UnsignedByte",
            PtType::Int => "Int",
            PtType::Long => "Long",
            PtType::Double => "Double",
            PtType::String => "String",
            PtType::Complex => "Complex",
            PtType::Scalar => "Scalar",
            PtType::General => "General",
            PtType::Array(_) => "Array",
        }
    }

    /// Inverse of `cg_type` for the scalar names; `Array` maps to an array
    /// of `General`.
    pub fn from_cg_type(name: &str) -> Option<PtType> {
        Some(match name {
            "Unknown" => PtType::Unknown,
            "Boolean" => PtType::Boolean,
            "UnsignedByte" => PtType::UnsignedByte,
            "Int" => PtType::Int,
            "Long" => PtType::Long,
            "Double" => PtType::Double,
            "String" => PtType::String,
            "Complex" => PtType::Complex,
            "Scalar" => PtType::Scalar,
            "General" => PtType::General,
            "Array" => PtType::Array(Box::new(PtType::General)),
            _ => return None,
        })
    }

    pub fn is_array(&self) -> bool {
        matches!(self, PtType::Array(_))
    }

    /// Innermost element type of a (possibly nested) array type.
    pub fn deep_element_type(&self) -> &PtType {
        match self {
            PtType::Array(elem) => elem.deep_element_type(),
            other => other,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, PtType::Unknown)
    }
}

impl fmt::Display for PtType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PtType::Unknown => f.write_str("unknown"),
            PtType::Boolean => f.write_str("boolean"),
            PtType::UnsignedByte => f.write_str("unsignedByte"),
            PtType::Int => f.write_str("int"),
            PtType::Long => f.write_str("long"),
            PtType::Double => f.write_str("double"),
            PtType::String => f.write_str("string"),
            PtType::Complex => f.write_str("complex"),
            PtType::Scalar => f.write_str("scalar"),
            PtType::General => f.write_str("general"),
            PtType::Array(elem) => write!(f, "{{{}}}", elem),
        }
    }
}

impl FromStr for PtType {
    type Err = String;

    /// Accepts the lower-case expression-language names and `{elem}` for arrays.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(inner) = s.strip_prefix('{').and_then(|r| r.strip_suffix('}')) {
            return Ok(PtType::Array(Box::new(inner.parse()?)));
        }
        match s {
            "unknown" => Ok(PtType::Unknown),
            "boolean" => Ok(PtType::Boolean),
            "unsignedByte" => Ok(PtType::UnsignedByte),
            "int" => Ok(PtType::Int),
            "long" => Ok(PtType::Long),
            "double" => Ok(PtType::Double),
            "string" => Ok(PtType::String),
            "complex" => Ok(PtType::Complex),
            "scalar" => Ok(PtType::Scalar),
            "general" => Ok(PtType::General),
            other => Err(format!("unknown type '{}'", other)),
        }
    }
}

impl TryFrom<String> for PtType {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<PtType> for String {
    fn from(t: PtType) -> String {
        t.to_string()
    }
}
