#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    /// Text form usable as a SQL string literal when comparing against text
    /// key columns. Only text and integer values have one.
    pub(crate) fn as_key_text(&self) -> Option<String> {
        match self {
            Self::Text(value) => Some(value.clone()),
            Self::Integer(value) => Some(value.to_string()),
            Self::Null | Self::Real(_) | Self::Blob(_) => None,
        }
    }
}
