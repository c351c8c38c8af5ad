//! Column metadata: a name, a type tag and (for variable-width types) the
//! declared maximum length — character count for VARCHAR, dimension for
//! VECTOR.

use super::TypeId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    name: String,
    type_id: TypeId,
    /// VARCHAR(n) character budget or VECTOR(d) dimension; 0 for fixed types.
    length: u32,
}

impl Column {
    /// A fixed-width column. Panics in debug builds if handed a
    /// variable-width tag, which needs a declared length.
    pub fn new(name: impl Into<String>, type_id: TypeId) -> Self {
        debug_assert!(!type_id.is_variable(), "variable-width column needs a length");
        Self { name: name.into(), type_id, length: 0 }
    }

    pub fn new_varchar(name: impl Into<String>, max_len: u32) -> Self {
        Self { name: name.into(), type_id: TypeId::Varchar, length: max_len }
    }

    pub fn new_vector(name: impl Into<String>, dimension: u32) -> Self {
        Self { name: name.into(), type_id: TypeId::Vector, length: dimension }
    }

    /// Same layout, different name. Used when projections rename columns.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self { name: name.into(), type_id: self.type_id, length: self.length }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn inline_size(&self) -> usize {
        self.type_id.inline_size()
    }
}

impl std::fmt::Display for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.type_id {
            TypeId::Varchar => write!(f, "{} VARCHAR({})", self.name, self.length),
            TypeId::Vector => write!(f, "{} VECTOR({})", self.name, self.length),
            ty => write!(f, "{} {}", self.name, ty),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_column_has_no_length() {
        let col = Column::new("a", TypeId::Integer);
        assert_eq!(col.length(), 0);
        assert_eq!(col.inline_size(), 4);
    }

    #[test]
    fn vector_column_records_dimension() {
        let col = Column::new_vector("v", 8);
        assert_eq!(col.length(), 8);
        assert_eq!(col.inline_size(), 2);
        assert_eq!(col.to_string(), "v VECTOR(8)");
    }

    #[test]
    fn renamed_preserves_layout() {
        let col = Column::new_varchar("name", 32).renamed("alias");
        assert_eq!(col.name(), "alias");
        assert_eq!(col.type_id(), TypeId::Varchar);
        assert_eq!(col.length(), 32);
    }
}
