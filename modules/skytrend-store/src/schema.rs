//! Explicit index declarations registered with the stores at startup.

use anyhow::{bail, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Cosine,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexedField {
    Vector {
        name: &'static str,
        dimensions: usize,
        metric: Metric,
    },
    Tag {
        name: &'static str,
    },
    Numeric {
        name: &'static str,
    },
    Text {
        name: &'static str,
    },
}

impl IndexedField {
    pub fn name(&self) -> &'static str {
        match self {
            IndexedField::Vector { name, .. }
            | IndexedField::Tag { name }
            | IndexedField::Numeric { name }
            | IndexedField::Text { name } => name,
        }
    }
}

/// A named index: which table/collection it covers and which fields are indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSchema {
    pub name: &'static str,
    pub table: &'static str,
    pub fields: Vec<IndexedField>,
}

impl IndexSchema {
    pub fn filtered_documents(dimensions: usize) -> Self {
        Self {
            name: "filtered-documents-idx",
            table: "filtered_documents",
            fields: vec![
                IndexedField::Text { name: "text" },
                IndexedField::Tag { name: "langs" },
                IndexedField::Tag { name: "topics" },
                IndexedField::Numeric { name: "time_us" },
                IndexedField::Vector {
                    name: "text_embedding",
                    dimensions,
                    metric: Metric::Cosine,
                },
            ],
        }
    }

    pub fn routing(dimensions: usize) -> Self {
        Self {
            name: "routing-idx",
            table: "routing_references",
            fields: vec![
                IndexedField::Tag { name: "route" },
                IndexedField::Vector {
                    name: "text_embedding",
                    dimensions,
                    metric: Metric::Cosine,
                },
            ],
        }
    }

    pub fn semantic_cache(dimensions: usize) -> Self {
        Self {
            name: "semantic-cache-idx",
            table: "semantic_cache",
            fields: vec![IndexedField::Vector {
                name: "post_embedding",
                dimensions,
                metric: Metric::Cosine,
            }],
        }
    }

    /// The single vector field of this index, if declared.
    pub fn vector_field(&self) -> Option<(&'static str, usize)> {
        self.fields.iter().find_map(|f| match f {
            IndexedField::Vector { name, dimensions, .. } => Some((*name, *dimensions)),
            _ => None,
        })
    }

    pub fn vector_dimensions(&self) -> Option<usize> {
        self.vector_field().map(|(_, d)| d)
    }

    /// Reject vectors that do not match the declared dimension.
    pub fn check_vector(&self, vector: &[f32]) -> Result<()> {
        if let Some((field, dims)) = self.vector_field() {
            if vector.len() != dims {
                bail!(
                    "{}: {} expects {} dimensions, got {}",
                    self.name,
                    field,
                    dims,
                    vector.len()
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_schema_declares_all_indexes() {
        let schema = IndexSchema::filtered_documents(384);
        let names: Vec<_> = schema.fields.iter().map(IndexedField::name).collect();
        assert_eq!(names, vec!["text", "langs", "topics", "time_us", "text_embedding"]);
        assert_eq!(schema.vector_dimensions(), Some(384));
    }

    #[test]
    fn vector_dimension_is_enforced() {
        let schema = IndexSchema::routing(3);
        assert!(schema.check_vector(&[0.0, 1.0, 0.0]).is_ok());
        assert!(schema.check_vector(&[0.0, 1.0]).is_err());
    }
}
