use crate::error::SchemaError;
use chrono::NaiveDate;
use polars::prelude::*;

/// One declared output column.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaField {
    pub name: String,
    pub dtype: DataType,
    pub nullable: bool,
}

impl SchemaField {
    pub fn new(name: impl Into<String>, dtype: DataType) -> Self {
        Self {
            name: name.into(),
            dtype,
            nullable: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// Ordered (name, type) pairs a normalized table must match exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    fields: Vec<SchemaField>,
}

impl TableSchema {
    pub fn new(fields: Vec<SchemaField>) -> Self {
        Self { fields }
    }

    /// `date` followed by non-nullable Float64 factor columns.
    pub fn factor_table(factors: &[&str]) -> Self {
        let mut fields = vec![SchemaField::new("date", DataType::Date)];
        fields.extend(factors.iter().map(|f| SchemaField::new(*f, DataType::Float64)));
        Self { fields }
    }

    pub fn with_field(mut self, field: SchemaField) -> Self {
        self.fields.push(field);
        self
    }

    /// Mark every column except `date` nullable.
    pub fn allow_nulls(mut self) -> Self {
        for field in self.fields.iter_mut().filter(|f| f.name != "date") {
            field.nullable = true;
        }
        self
    }

    pub fn fields(&self) -> &[SchemaField] {
        &self.fields
    }

    pub fn names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Names other than `date`.
    pub fn factor_names(&self) -> Vec<&str> {
        self.names().into_iter().filter(|n| *n != "date").collect()
    }

    pub fn field(&self, name: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The equivalent polars schema.
    pub fn to_polars(&self) -> Schema {
        Schema::from_iter(
            self.fields
                .iter()
                .map(|f| Field::new(f.name.as_str().into(), f.dtype.clone())),
        )
    }

    /// Validate a DataFrame against this schema.
    ///
    /// Column order, names and types must match exactly. Non-nullable columns
    /// may not hold nulls, and `date` must be strictly ascending and unique.
    pub fn validate(&self, df: &DataFrame) -> Result<(), SchemaError> {
        let columns = df.get_columns();

        if let Some(first) = columns.first() {
            if first.name().as_str() != "date" {
                return Err(SchemaError::DateNotFirst(first.name().to_string()));
            }
        }

        for field in &self.fields {
            if !columns.iter().any(|c| c.name().as_str() == field.name) {
                return Err(SchemaError::MissingColumn(field.name.clone()));
            }
        }
        for column in columns {
            if self.field(column.name().as_str()).is_none() {
                return Err(SchemaError::UnexpectedColumn(column.name().to_string()));
            }
        }
        if columns.len() != self.fields.len() {
            return Err(SchemaError::ColumnCount {
                expected: self.fields.len(),
                actual: columns.len(),
            });
        }

        for (field, column) in self.fields.iter().zip(columns) {
            if column.name().as_str() != field.name {
                return Err(SchemaError::UnexpectedColumn(format!(
                    "{} (expected '{}' at this position)",
                    column.name(),
                    field.name
                )));
            }
            if column.dtype() != &field.dtype {
                return Err(SchemaError::TypeMismatch {
                    column: field.name.clone(),
                    expected: field.dtype.clone(),
                    actual: column.dtype().clone(),
                });
            }
            let nulls = column.null_count();
            if nulls > 0 && !field.nullable {
                return Err(SchemaError::UnexpectedNulls {
                    column: field.name.clone(),
                    count: nulls,
                });
            }
        }

        validate_date_key(df)
    }
}

/// `date` must be a non-null Date column, strictly ascending.
pub fn validate_date_key(df: &DataFrame) -> Result<(), SchemaError> {
    let Ok(column) = df.column("date") else {
        return Err(SchemaError::MissingColumn("date".into()));
    };
    let Ok(dates) = column.date() else {
        return Err(SchemaError::TypeMismatch {
            column: "date".into(),
            expected: DataType::Date,
            actual: column.dtype().clone(),
        });
    };

    let mut previous: Option<i32> = None;
    for (row, day) in dates.iter().enumerate() {
        let Some(day) = day else {
            return Err(SchemaError::UnexpectedNulls {
                column: "date".into(),
                count: column.null_count(),
            });
        };
        if let Some(prev) = previous {
            if day == prev {
                return Err(SchemaError::DuplicateDate(days_to_date(day)));
            }
            if day < prev {
                return Err(SchemaError::UnorderedDates { row });
            }
        }
        previous = Some(day);
    }
    Ok(())
}

/// Days since the Unix epoch to a calendar date.
pub fn days_to_date(days: i32) -> NaiveDate {
    NaiveDate::default() + chrono::Duration::days(i64::from(days))
}

/// Calendar date to days since the Unix epoch.
pub fn date_to_days(date: NaiveDate) -> i32 {
    (date - NaiveDate::default()).num_days() as i32
}
