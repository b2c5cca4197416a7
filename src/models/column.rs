use serde::Deserialize;

/// A result column as described by the coordinator.
#[derive(Debug, Clone, Deserialize)]
pub struct Column {
    /// Column name
    pub name: String,

    /// Raw type string, e.g. `array(varchar(10))`
    #[serde(rename = "type")]
    pub type_name: String,

    /// Recursive type descriptor
    #[serde(rename = "typeSignature")]
    pub type_signature: TypeSignature,
}

/// A node in the recursive type descriptor tree.
#[derive(Debug, Clone, Deserialize)]
pub struct TypeSignature {
    #[serde(rename = "rawType")]
    pub raw_type: String,

    #[serde(default)]
    pub arguments: Vec<TypeArgument>,
}

/// One argument of a type signature.
///
/// Decoding resolves the whole tree in a single pass, so every `TYPE` and
/// `NAMED_TYPE` argument holds a fully decoded signature by the time a
/// converter is built from it.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum TypeArgument {
    /// A nested type signature (element type of `array`, key/value of `map`)
    #[serde(rename = "TYPE")]
    Type(TypeSignature),

    /// A named nested signature, used by `row` fields
    #[serde(rename = "NAMED_TYPE")]
    NamedType(NamedTypeSignature),

    /// An integer type parameter: precision, scale, or length
    #[serde(rename = "LONG")]
    Long(i64),

    /// A variable type parameter
    #[serde(rename = "VARIABLE")]
    Variable(serde_json::Value),
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedTypeSignature {
    #[serde(rename = "fieldName", default)]
    pub field_name: Option<RowFieldName>,

    #[serde(rename = "typeSignature")]
    pub type_signature: TypeSignature,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RowFieldName {
    pub name: String,
}
