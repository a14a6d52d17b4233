//! Typed OSC arguments

use kontrol_core::ParamValue;

/// A single typed OSC argument.
#[derive(Clone, Debug, PartialEq)]
pub enum OscArg {
    Int(i32),
    Float(f32),
    Str(String),
}

impl OscArg {
    /// OSC type tag character for this argument.
    pub fn type_tag(&self) -> u8 {
        match self {
            OscArg::Int(_) => b'i',
            OscArg::Float(_) => b'f',
            OscArg::Str(_) => b's',
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            OscArg::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            OscArg::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OscArg::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Converts a float or string argument to a parameter value.
    ///
    /// Int arguments are not parameter values; the type tag alone
    /// distinguishes the two parameter kinds on the wire.
    pub fn to_param_value(&self) -> Option<ParamValue> {
        match self {
            OscArg::Float(v) => Some(ParamValue::Float(*v)),
            OscArg::Str(s) => Some(ParamValue::Str(s.clone())),
            OscArg::Int(_) => None,
        }
    }
}

impl From<ParamValue> for OscArg {
    fn from(v: ParamValue) -> Self {
        match v {
            ParamValue::Float(f) => OscArg::Float(f),
            ParamValue::Str(s) => OscArg::Str(s),
        }
    }
}

impl From<&ParamValue> for OscArg {
    fn from(v: &ParamValue) -> Self {
        OscArg::from(v.clone())
    }
}

impl From<i32> for OscArg {
    fn from(v: i32) -> Self {
        OscArg::Int(v)
    }
}

impl From<f32> for OscArg {
    fn from(v: f32) -> Self {
        OscArg::Float(v)
    }
}

impl From<&str> for OscArg {
    fn from(s: &str) -> Self {
        OscArg::Str(s.to_string())
    }
}

impl From<String> for OscArg {
    fn from(s: String) -> Self {
        OscArg::Str(s)
    }
}
