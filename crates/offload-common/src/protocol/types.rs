use serde_json::Value;

/// Canonical names for the built-in parameter and return types. Everything
/// else is resolved through the loaded code module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveType {
    Int,
    Long,
    Boolean,
    Double,
    String,
    /// Return-only: the method produces no value.
    Void,
}

impl PrimitiveType {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "int" => Some(PrimitiveType::Int),
            "long" => Some(PrimitiveType::Long),
            "boolean" => Some(PrimitiveType::Boolean),
            "double" => Some(PrimitiveType::Double),
            "String" => Some(PrimitiveType::String),
            "void" => Some(PrimitiveType::Void),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PrimitiveType::Int => "int",
            PrimitiveType::Long => "long",
            PrimitiveType::Boolean => "boolean",
            PrimitiveType::Double => "double",
            PrimitiveType::String => "String",
            PrimitiveType::Void => "void",
        }
    }

    /// Checks that `value` decodes as this type and returns its canonical form.
    ///
    /// Integral doubles such as `5.0` are accepted for `int` and `long` so that
    /// values produced by number-only runtimes still match their declaration.
    pub fn materialize(self, value: &Value) -> std::result::Result<Value, String> {
        match self {
            PrimitiveType::Int => {
                let n = integral(value).ok_or_else(|| mismatch(self, value))?;
                i32::try_from(n)
                    .map(Value::from)
                    .map_err(|_| format!("{} does not fit in int", n))
            }
            PrimitiveType::Long => integral(value)
                .map(Value::from)
                .ok_or_else(|| mismatch(self, value)),
            PrimitiveType::Boolean => value
                .as_bool()
                .map(Value::Bool)
                .ok_or_else(|| mismatch(self, value)),
            PrimitiveType::Double => value
                .as_f64()
                .map(Value::from)
                .ok_or_else(|| mismatch(self, value)),
            PrimitiveType::String => value
                .as_str()
                .map(|s| Value::String(s.to_string()))
                .ok_or_else(|| mismatch(self, value)),
            PrimitiveType::Void => Ok(Value::Null),
        }
    }
}

fn integral(value: &Value) -> Option<i64> {
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    let f = value.as_f64()?;
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

fn mismatch(expected: PrimitiveType, value: &Value) -> String {
    format!("expected {}, got {}", expected.name(), value)
}
