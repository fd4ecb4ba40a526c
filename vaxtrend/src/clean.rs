//! Cleaning of the raw vaccination registry.
//!
//! One pass over the registry export: identifying columns are dropped,
//! free-text categoricals are normalized, the vaccination date is parsed
//! non-strictly, calendar fields and the dose label are derived and rows are
//! deduplicated on the record identifier. The cleaned file is what every
//! downstream step consumes.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};
use log::info;
use polars::prelude::*;

use crate::COL;

/// Columns holding identifying data. Dropped whenever present, tolerated
/// when absent.
const SENSITIVE_COLUMNS: [&str; 2] = [COL::CPF, COL::NOME];

/// Free-text categorical columns normalized during cleaning.
const TEXT_COLUMNS: [&str; 5] = [
    COL::SEXO,
    COL::GRUPO,
    COL::VACINA,
    COL::LOTE,
    COL::LOCAL_VACINACAO,
];

/// Closed dose-code table, keyed by the stringified raw value so that both
/// integer and text registry exports hit the same labels. Codes outside the
/// table fall back to the raw value rendered as a string.
const DOSE_LABELS: [(&str, &str); 4] = [
    ("1", "1ª DOSE"),
    ("2", "2ª DOSE"),
    ("3", "REFORÇO"),
    ("4", "4ª DOSE"),
];

/// Spreadsheet tools used by the registry's consumers expect the signature.
const UTF8_BOM: &[u8] = b"\xef\xbb\xbf";

/// Row counts observed while cleaning, reported for logging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanReport {
    pub rows_read: usize,
    pub rows_written: usize,
}

/// Read a registry CSV into a `DataFrame`, failing fast when the file is
/// missing.
pub fn read_registry<P: AsRef<Path>>(path: P) -> Result<DataFrame> {
    let path = path.as_ref();
    if !path.exists() {
        bail!("registry file not found: {}", path.display());
    }
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(1024))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;
    Ok(df)
}

/// Write a registry `DataFrame` as a UTF-8-with-signature CSV.
pub fn write_registry<P: AsRef<Path>>(df: &mut DataFrame, path: P) -> Result<()> {
    let path = path.as_ref();
    let mut file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    file.write_all(UTF8_BOM)?;
    CsvWriter::new(&mut file).include_header(true).finish(df)?;
    Ok(())
}

pub(crate) fn has_column(df: &DataFrame, name: &str) -> bool {
    df.get_column_names().iter().any(|column| *column == name)
}

/// Expression yielding the vaccination date as a `Date` column. String
/// columns are parsed non-strictly, so unparsable values become null rather
/// than errors; a frame that already carries a `Date` column (a re-cleaned
/// file) passes through untouched.
pub(crate) fn parsed_date_expr(df: &DataFrame) -> Result<Expr> {
    if !has_column(df, COL::DATA_VACINACAO) {
        bail!("column '{}' not found in the registry", COL::DATA_VACINACAO);
    }
    let expr = match df.column(COL::DATA_VACINACAO)?.dtype() {
        DataType::Date => col(COL::DATA_VACINACAO),
        _ => col(COL::DATA_VACINACAO)
            .cast(DataType::String)
            .str()
            .to_date(StrptimeOptions {
                strict: false,
                ..Default::default()
            }),
    };
    Ok(expr)
}

/// Trim, uppercase and collapse internal whitespace runs of a text column.
fn normalize_text_expr(name: &str) -> Expr {
    col(name)
        .cast(DataType::String)
        .str()
        .strip_chars(lit(NULL))
        .str()
        .to_uppercase()
        .str()
        .replace_all(lit(r"\s+"), lit(" "), false)
}

/// Build the `dose_tipo` expression from the closed dose-code table, with
/// the stringified raw value as the fallback arm.
fn dose_label_expr() -> Expr {
    let raw = col(COL::DOSE).cast(DataType::String);
    let mut expr = raw.clone();
    for (code, label) in DOSE_LABELS.iter().rev() {
        expr = when(raw.clone().eq(lit(*code)))
            .then(lit(*label))
            .otherwise(expr);
    }
    expr.alias(COL::DOSE_TIPO)
}

/// Clean a raw registry frame. Pure over its input; see the module docs for
/// the steps applied.
pub fn clean_frame(mut df: DataFrame) -> Result<DataFrame> {
    if has_column(&df, COL::LOCAL_VACINACAO_ACCENTED) {
        df.rename(COL::LOCAL_VACINACAO_ACCENTED, COL::LOCAL_VACINACAO)?;
    }
    for column in SENSITIVE_COLUMNS {
        if has_column(&df, column) {
            df = df.drop(column)?;
        }
    }
    for required in [COL::ID, COL::DOSE] {
        if !has_column(&df, required) {
            bail!("column '{required}' not found in the registry");
        }
    }
    let date_expr = parsed_date_expr(&df)?;
    let text_exprs: Vec<Expr> = TEXT_COLUMNS
        .iter()
        .filter(|column| has_column(&df, column))
        .map(|column| normalize_text_expr(column))
        .collect();

    let cleaned = df
        .lazy()
        .with_columns(text_exprs)
        .with_column(date_expr.alias(COL::DATA_VACINACAO))
        .with_columns([
            col(COL::DATA_VACINACAO)
                .dt()
                .year()
                .cast(DataType::Int32)
                .alias(COL::ANO),
            col(COL::DATA_VACINACAO)
                .dt()
                .month()
                .cast(DataType::Int32)
                .alias(COL::MES),
            col(COL::DATA_VACINACAO)
                .dt()
                .day()
                .cast(DataType::Int32)
                .alias(COL::DIA),
        ])
        .with_column(dose_label_expr())
        .unique_stable(Some(vec![COL::ID.to_string()]), UniqueKeepStrategy::First)
        .collect()?;
    Ok(cleaned)
}

/// Clean the registry at `input` and write the result to `output`.
pub fn clean_registry<P: AsRef<Path>, Q: AsRef<Path>>(input: P, output: Q) -> Result<CleanReport> {
    let df = read_registry(&input)?;
    let rows_read = df.height();
    info!("registry loaded: {} rows, {} columns", rows_read, df.width());

    let mut cleaned = clean_frame(df)?;
    let rows_written = cleaned.height();
    write_registry(&mut cleaned, &output)?;
    info!(
        "cleaned registry written to {}: {} rows in, {} rows out",
        output.as_ref().display(),
        rows_read,
        rows_written
    );
    Ok(CleanReport {
        rows_read,
        rows_written,
    })
}

#[cfg(test)]
mod tests {
    use polars::df;

    use super::*;

    fn raw_df() -> DataFrame {
        df!(
            COL::ID => &[1i64, 2, 3, 2, 4],
            COL::CPF => &["111", "222", "333", "222", "444"],
            COL::NOME => &["A", "B", "C", "B", "D"],
            COL::SEXO => &["  masculino ", "FEMININO", "feminino", "FEMININO", "M"],
            COL::GRUPO => &["idoso", "trabalhador   de saude", "idoso", "x", "idoso"],
            COL::VACINA => &[" coronavac ", "corona   vac", "PFIZER", "x", "CORONAVAC"],
            COL::LOTE => &["l1", "l2", "l3", "x", "l4"],
            COL::LOCAL_VACINACAO_ACCENTED => &["usf 1", "USF  2", "usf 1", "x", "USF 3"],
            COL::DOSE => &[1i64, 2, 9, 2, 3],
            COL::DATA_VACINACAO => &["2021-01-15", "2021-01-20", "not a date", "2021-01-20", "2021-02-01"],
        )
        .unwrap()
    }

    #[test]
    fn test_sensitive_columns_dropped() {
        let cleaned = clean_frame(raw_df()).unwrap();
        assert!(!has_column(&cleaned, COL::CPF));
        assert!(!has_column(&cleaned, COL::NOME));
    }

    #[test]
    fn test_missing_sensitive_columns_tolerated() {
        let df = raw_df().drop(COL::CPF).unwrap().drop(COL::NOME).unwrap();
        assert!(clean_frame(df).is_ok());
    }

    #[test]
    fn test_accented_location_header_renamed() {
        let cleaned = clean_frame(raw_df()).unwrap();
        assert!(has_column(&cleaned, COL::LOCAL_VACINACAO));
        assert!(!has_column(&cleaned, COL::LOCAL_VACINACAO_ACCENTED));
    }

    #[test]
    fn test_text_normalization() {
        let cleaned = clean_frame(raw_df()).unwrap();
        let vacinas: Vec<&str> = cleaned
            .column(COL::VACINA)
            .unwrap()
            .str()
            .unwrap()
            .into_no_null_iter()
            .collect();
        assert_eq!(vacinas, &["CORONAVAC", "CORONA VAC", "PFIZER", "CORONAVAC"]);
    }

    #[test]
    fn test_dose_labels_and_fallback() {
        let cleaned = clean_frame(raw_df()).unwrap();
        let labels: Vec<&str> = cleaned
            .column(COL::DOSE_TIPO)
            .unwrap()
            .str()
            .unwrap()
            .into_no_null_iter()
            .collect();
        // Dose 9 has no entry in the table and passes through as "9".
        assert_eq!(labels, &["1ª DOSE", "2ª DOSE", "9", "REFORÇO"]);
    }

    #[test]
    fn test_unparsable_date_becomes_null() {
        let cleaned = clean_frame(raw_df()).unwrap();
        assert_eq!(cleaned.column(COL::DATA_VACINACAO).unwrap().null_count(), 1);
        assert_eq!(cleaned.column(COL::ANO).unwrap().null_count(), 1);
    }

    #[test]
    fn test_derived_calendar_fields() {
        let cleaned = clean_frame(raw_df()).unwrap();
        let anos: Vec<i32> = cleaned
            .column(COL::ANO)
            .unwrap()
            .i32()
            .unwrap()
            .into_iter()
            .flatten()
            .collect();
        let meses: Vec<i32> = cleaned
            .column(COL::MES)
            .unwrap()
            .i32()
            .unwrap()
            .into_iter()
            .flatten()
            .collect();
        assert_eq!(anos, &[2021, 2021, 2021]);
        assert_eq!(meses, &[1, 1, 2]);
    }

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        let cleaned = clean_frame(raw_df()).unwrap();
        assert_eq!(cleaned.height(), 4);
        let lotes: Vec<&str> = cleaned
            .column(COL::LOTE)
            .unwrap()
            .str()
            .unwrap()
            .into_no_null_iter()
            .collect();
        // The second _id=2 row (lote "x") is gone, the first (lote "L2") stays.
        assert_eq!(lotes, &["L1", "L2", "L3", "L4"]);
    }

    #[test]
    fn test_cleaning_is_idempotent() {
        let once = clean_frame(raw_df()).unwrap();
        let twice = clean_frame(once.clone()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_missing_date_column_is_an_error() {
        let df = raw_df().drop(COL::DATA_VACINACAO).unwrap();
        let err = clean_frame(df).unwrap_err();
        assert!(err.to_string().contains(COL::DATA_VACINACAO));
    }

    #[test]
    fn test_missing_id_column_is_an_error() {
        let df = raw_df().drop(COL::ID).unwrap();
        let err = clean_frame(df).unwrap_err();
        assert!(err.to_string().contains(COL::ID));
    }

    #[test]
    fn test_missing_input_file_is_an_error() {
        let err = clean_registry("no/such/registry.csv", "out.csv").unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_file_round_trip_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw.csv");
        let first = dir.path().join("first.csv");
        let second = dir.path().join("second.csv");

        write_registry(&mut raw_df(), &raw).unwrap();
        let report = clean_registry(&raw, &first).unwrap();
        assert_eq!(report.rows_read, 5);
        assert_eq!(report.rows_written, 4);

        let report = clean_registry(&first, &second).unwrap();
        assert_eq!(report.rows_read, 4);
        assert_eq!(report.rows_written, 4);

        let first_bytes = std::fs::read(&first).unwrap();
        let second_bytes = std::fs::read(&second).unwrap();
        assert_eq!(first_bytes, second_bytes);
        assert!(first_bytes.starts_with(UTF8_BOM));
    }
}
