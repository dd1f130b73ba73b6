use chrono::Datelike;

use crate::{
    data::{RecordSet, Value},
    error::{CleanError, Result},
    rules::Rule,
    schema::{FieldType, Schema},
};

pub const MIN_YEAR: i32 = 1900;
pub const MAX_YEAR: i32 = 2100;

/// Flags rows whose date is missing or outside `MIN_YEAR..=MAX_YEAR`.
#[derive(Debug, Clone)]
pub struct DateRange {
    index: usize,
}

impl DateRange {
    pub fn new(schema: &Schema, date_field: Option<&str>) -> Result<Self> {
        let index = match date_field {
            Some(name) => {
                let idx = schema.index_of(name).ok_or_else(|| {
                    CleanError::precondition(
                        "date_format",
                        format!("date field '{name}' is not in the schema"),
                    )
                })?;
                let field_type = schema.fields()[idx].field_type;
                if field_type != FieldType::Date {
                    return Err(CleanError::precondition(
                        "date_format",
                        format!("field '{name}' is {field_type}, not DATE"),
                    ));
                }
                idx
            }
            None => match schema.indices_of_type(FieldType::Date).as_slice() {
                [single] => *single,
                [] => {
                    return Err(CleanError::precondition(
                        "date_format",
                        "the schema has no DATE field",
                    ));
                }
                several => {
                    let names = several
                        .iter()
                        .map(|idx| schema.fields()[*idx].name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ");
                    return Err(CleanError::precondition(
                        "date_format",
                        format!("the schema has several DATE fields ({names}); set date_field"),
                    ));
                }
            },
        };
        Ok(Self { index })
    }
}

impl Rule for DateRange {
    fn name(&self) -> &'static str {
        "date_format"
    }

    fn reason(&self) -> &'static str {
        "wrong_date"
    }

    fn violations(&self, records: &RecordSet) -> Vec<usize> {
        records
            .iter()
            .enumerate()
            .filter(|(_, record)| match record.get(self.index) {
                Some(Value::Date(date)) => !(MIN_YEAR..=MAX_YEAR).contains(&date.year()),
                _ => true,
            })
            .map(|(idx, _)| idx)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{data::Record, schema::Field};
    use chrono::NaiveDate;

    fn dated_schema() -> Schema {
        Schema::new(vec![
            Field::string("barcode"),
            Field::new("creation_date", FieldType::Date),
        ])
        .unwrap()
    }

    fn row(date: Option<(i32, u32, u32)>) -> Record {
        Record::new(vec![
            Some(Value::from("12345678")),
            date.map(|(y, m, d)| Value::Date(NaiveDate::from_ymd_opt(y, m, d).unwrap())),
        ])
    }

    #[test]
    fn null_and_out_of_range_dates_are_flagged() {
        let schema = dated_schema();
        let records = RecordSet::new(
            schema.clone(),
            vec![
                row(Some((1, 1, 1))),
                row(None),
                row(Some((2020, 5, 1))),
                row(Some((1900, 1, 1))),
                row(Some((2101, 1, 1))),
            ],
        )
        .unwrap();
        let rule = DateRange::new(&schema, None).unwrap();
        assert_eq!(rule.violations(&records), vec![0, 1, 4]);
    }

    #[test]
    fn schema_without_date_field_fails_fast() {
        let schema = Schema::new(vec![Field::string("barcode")]).unwrap();
        let err = DateRange::new(&schema, None).expect_err("no DATE field");
        assert!(err.to_string().contains("no DATE field"));
    }

    #[test]
    fn several_date_fields_need_an_explicit_choice() {
        let schema = Schema::new(vec![
            Field::new("created", FieldType::Date),
            Field::new("updated", FieldType::Date),
        ])
        .unwrap();
        assert!(DateRange::new(&schema, None).is_err());
        assert!(DateRange::new(&schema, Some("updated")).is_ok());
        assert!(DateRange::new(&schema, Some("missing")).is_err());
    }
}
