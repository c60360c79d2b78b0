//! Bulk order spreadsheets.
//!
//! Layout of the first sheet:
//! - row 1: courier, class type, signature (`yes`/`no`)
//! - row 2: column titles, ignored
//! - rows 3..: one shipment per row, 23 columns: sender (country, name, phone, street,
//!   suite, city, zip, state), recipient (same eight), then length, height, width,
//!   weight, description, reference 1, reference 2.

use calamine::{Data, Reader, Xlsx, open_workbook_from_rs};
use rust_decimal::Decimal;
use std::{io::Cursor, str::FromStr};

use super::{Address, Courier, Package, collect_references};

/// Number of columns in a data row
pub const COLUMNS: usize = 23;

/// Header row plus the ignored title row
const LEADING_ROWS: usize = 2;

const COLUMN_NAMES: [&str; COLUMNS] = [
    "sender country",
    "sender name",
    "sender phone",
    "sender street",
    "sender suite",
    "sender city",
    "sender zip",
    "sender state",
    "recipient country",
    "recipient name",
    "recipient phone",
    "recipient street",
    "recipient suite",
    "recipient city",
    "recipient zip",
    "recipient state",
    "length",
    "height",
    "width",
    "weight",
    "description",
    "reference 1",
    "reference 2",
];

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SpreadsheetError {
    #[error("could not read spreadsheet: {0}")]
    Unreadable(String),

    #[error("spreadsheet needs a header row, a title row and at least one order row (found {rows} rows)")]
    TooFewRows { rows: usize },

    #[error("spreadsheet has {rows} order rows, the maximum is {max}")]
    TooManyRows { rows: usize, max: usize },

    #[error("header row is missing the {0}")]
    MissingHeader(&'static str),

    #[error("unknown courier {0:?}")]
    InvalidCourier(String),

    #[error("signature must be \"yes\" or \"no\", got {0:?}")]
    InvalidSignature(String),

    #[error("row {row} is missing the {column}")]
    MissingCell { row: usize, column: &'static str },

    #[error("row {row} has an invalid {column}: {value:?}")]
    InvalidNumber { row: usize, column: &'static str, value: String },
}

/// A parsed bulk order: one courier and class for every row.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkOrder {
    pub courier: Courier,
    pub class_type: String,
    pub signature: bool,
    pub rows: Vec<BulkRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BulkRow {
    pub sender: Address,
    pub recipient: Address,
    pub package: Package,
    pub references: Vec<String>,
}

/// Parse an uploaded `.xlsx` workbook.
pub fn parse_workbook(bytes: &[u8], max_rows: usize) -> Result<BulkOrder, SpreadsheetError> {
    let rows = read_first_sheet(bytes)?;
    parse_rows(&rows, max_rows)
}

/// Read the first sheet into a grid of trimmed strings, anchored at cell A1.
fn read_first_sheet(bytes: &[u8]) -> Result<Vec<Vec<String>>, SpreadsheetError> {
    let mut workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(bytes))
        .map_err(|e: calamine::XlsxError| SpreadsheetError::Unreadable(e.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| SpreadsheetError::Unreadable("workbook has no sheets".to_string()))?
        .map_err(|e| SpreadsheetError::Unreadable(e.to_string()))?;

    // Ranges start at the first used cell, not at A1
    let (start_row, start_col) = range.start().unwrap_or((0, 0));
    let mut grid: Vec<Vec<String>> = vec![Vec::new(); start_row as usize];
    for row in range.rows() {
        let mut cells = vec![String::new(); start_col as usize];
        cells.extend(row.iter().map(cell_to_string));
        grid.push(cells);
    }
    Ok(grid)
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        // Zip codes and phone numbers typed as numbers come back as floats
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Int(i) => i.to_string(),
        other => other.to_string().trim().to_string(),
    }
}

/// Parse a grid of cells laid out as described in the module docs.
pub fn parse_rows(rows: &[Vec<String>], max_rows: usize) -> Result<BulkOrder, SpreadsheetError> {
    // Blank rows at the bottom of a sheet are formatting, not orders
    let used = rows
        .iter()
        .rposition(|row| row.iter().any(|c| !c.trim().is_empty()))
        .map_or(0, |last| last + 1);
    let rows = &rows[..used];

    if rows.len() <= LEADING_ROWS {
        return Err(SpreadsheetError::TooFewRows { rows: rows.len() });
    }
    let data_rows = &rows[LEADING_ROWS..];
    if data_rows.len() > max_rows {
        return Err(SpreadsheetError::TooManyRows {
            rows: data_rows.len(),
            max: max_rows,
        });
    }

    let header = &rows[0];
    let courier_cell = cell(header, 0).ok_or(SpreadsheetError::MissingHeader("courier"))?;
    let courier = Courier::from_str(courier_cell).map_err(|e| SpreadsheetError::InvalidCourier(e.0))?;
    let class_type = cell(header, 1).ok_or(SpreadsheetError::MissingHeader("class type"))?.to_string();
    let signature = match cell(header, 2).map(str::to_ascii_lowercase).as_deref() {
        Some("yes") => true,
        Some("no") | None => false,
        Some(other) => return Err(SpreadsheetError::InvalidSignature(other.to_string())),
    };

    let rows = data_rows
        .iter()
        .enumerate()
        .map(|(i, row)| parse_row(row, i + LEADING_ROWS + 1))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(BulkOrder {
        courier,
        class_type,
        signature,
        rows,
    })
}

/// Non-empty trimmed cell value
fn cell(row: &[String], index: usize) -> Option<&str> {
    row.get(index).map(|c| c.trim()).filter(|c| !c.is_empty())
}

fn parse_row(row: &[String], row_number: usize) -> Result<BulkRow, SpreadsheetError> {
    let required = |index: usize| -> Result<String, SpreadsheetError> {
        cell(row, index).map(str::to_string).ok_or(SpreadsheetError::MissingCell {
            row: row_number,
            column: COLUMN_NAMES[index],
        })
    };
    let optional = |index: usize| cell(row, index).map(str::to_string);
    let number = |index: usize| -> Result<Decimal, SpreadsheetError> {
        let value = required(index)?;
        Decimal::from_str(&value).map_err(|_| SpreadsheetError::InvalidNumber {
            row: row_number,
            column: COLUMN_NAMES[index],
            value,
        })
    };
    let address = |offset: usize| -> Result<Address, SpreadsheetError> {
        Ok(Address {
            country: required(offset)?,
            name: required(offset + 1)?,
            phone: required(offset + 2)?,
            street: required(offset + 3)?,
            suite: optional(offset + 4),
            city: required(offset + 5)?,
            zip: required(offset + 6)?,
            state: required(offset + 7)?,
        })
    };

    Ok(BulkRow {
        sender: address(0)?,
        recipient: address(8)?,
        package: Package {
            length: number(16)?,
            height: number(17)?,
            width: number(18)?,
            weight: number(19)?,
            description: optional(20).unwrap_or_default(),
        },
        references: collect_references([cell(row, 21), cell(row, 22)]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(courier: &str, signature: &str) -> Vec<String> {
        vec![courier.to_string(), "Priority: 1-3 days".to_string(), signature.to_string()]
    }

    fn titles() -> Vec<String> {
        COLUMN_NAMES.iter().map(|s| s.to_string()).collect()
    }

    fn data_row(n: usize) -> Vec<String> {
        let mut row: Vec<String> = [
            "US", "Jane Sender", "5551234567", "1 Main St", "", "Springfield", "62701", "IL", "US",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        row.extend(
            [format!("Recipient {n}"), "5559876543".to_string(), "2 Elm St".to_string(), "Apt 4".to_string()],
        );
        row.extend(["Portland", "97201", "OR", "12", "6", "8", "2.5", "Books", "PO-1", ""].iter().map(|s| s.to_string()));
        assert_eq!(row.len(), COLUMNS);
        row
    }

    fn sheet(rows: usize) -> Vec<Vec<String>> {
        let mut grid = vec![header("USPS", "no"), titles()];
        grid.extend((0..rows).map(data_row));
        grid
    }

    #[test]
    fn test_parse_valid_sheet() {
        let order = parse_rows(&sheet(3), 100).unwrap();
        assert_eq!(order.courier, Courier::Usps);
        assert_eq!(order.class_type, "Priority: 1-3 days");
        assert!(!order.signature);
        assert_eq!(order.rows.len(), 3);

        let first = &order.rows[0];
        assert_eq!(first.sender.name, "Jane Sender");
        assert_eq!(first.sender.suite, None);
        assert_eq!(first.recipient.name, "Recipient 0");
        assert_eq!(first.recipient.suite.as_deref(), Some("Apt 4"));
        assert_eq!(first.recipient.zip, "97201");
        assert_eq!(first.package.length, Decimal::from(12));
        assert_eq!(first.package.height, Decimal::from(6));
        assert_eq!(first.package.width, Decimal::from(8));
        assert_eq!(first.package.weight, Decimal::new(25, 1));
        assert_eq!(first.references, vec!["PO-1"]);
    }

    #[test]
    fn test_signature_header() {
        let mut grid = sheet(1);
        grid[0] = header("UPS-US", "Yes");
        let order = parse_rows(&grid, 100).unwrap();
        assert!(order.signature);
        assert_eq!(order.courier, Courier::UpsUs);

        grid[0] = header("UPS-US", "maybe");
        assert_eq!(
            parse_rows(&grid, 100).unwrap_err(),
            SpreadsheetError::InvalidSignature("maybe".to_string())
        );
    }

    #[test]
    fn test_too_few_rows() {
        let grid = vec![header("USPS", "no"), titles()];
        assert_eq!(parse_rows(&grid, 100).unwrap_err(), SpreadsheetError::TooFewRows { rows: 2 });
    }

    #[test]
    fn test_trailing_blank_rows_do_not_count() {
        let mut grid = sheet(2);
        grid.push(vec![String::new(); COLUMNS]);
        grid.push(vec!["  ".to_string()]);
        assert_eq!(parse_rows(&grid, 2).unwrap().rows.len(), 2);
    }

    #[test]
    fn test_row_limit() {
        assert_eq!(parse_rows(&sheet(100), 100).unwrap().rows.len(), 100);
        assert_eq!(
            parse_rows(&sheet(101), 100).unwrap_err(),
            SpreadsheetError::TooManyRows { rows: 101, max: 100 }
        );
    }

    #[test]
    fn test_row_limit_checked_before_cells() {
        // A malformed row beyond the limit still reports the limit
        let mut grid = sheet(3);
        grid[3][1] = String::new();
        assert_eq!(
            parse_rows(&grid, 2).unwrap_err(),
            SpreadsheetError::TooManyRows { rows: 3, max: 2 }
        );
    }

    #[test]
    fn test_invalid_courier() {
        let mut grid = sheet(1);
        grid[0] = header("DHL", "no");
        assert_eq!(parse_rows(&grid, 100).unwrap_err(), SpreadsheetError::InvalidCourier("DHL".to_string()));
    }

    #[test]
    fn test_missing_required_cell_names_row_and_column() {
        let mut grid = sheet(2);
        grid[3][14] = String::new(); // recipient zip of second data row
        assert_eq!(
            parse_rows(&grid, 100).unwrap_err(),
            SpreadsheetError::MissingCell {
                row: 4,
                column: "recipient zip"
            }
        );
    }

    #[test]
    fn test_short_row_is_missing_cells() {
        let mut grid = sheet(1);
        grid[2].truncate(18);
        assert_eq!(
            parse_rows(&grid, 100).unwrap_err(),
            SpreadsheetError::MissingCell { row: 3, column: "width" }
        );
    }

    #[test]
    fn test_invalid_number() {
        let mut grid = sheet(1);
        grid[2][19] = "heavy".to_string();
        assert_eq!(
            parse_rows(&grid, 100).unwrap_err(),
            SpreadsheetError::InvalidNumber {
                row: 3,
                column: "weight",
                value: "heavy".to_string()
            }
        );
    }

    #[test]
    fn test_parse_xlsx_workbook() {
        let mut workbook = rust_xlsxwriter::Workbook::new();
        {
            let worksheet = workbook.add_worksheet();
            for (r, row) in sheet(2).iter().enumerate() {
                for (c, value) in row.iter().enumerate() {
                    if value.is_empty() {
                        continue;
                    }
                    // Numeric zips in the data rows exercise the float-to-integer formatting
                    if c == 6 && r >= 2 {
                        worksheet.write_number(r as u32, c as u16, value.parse::<f64>().unwrap()).unwrap();
                    } else {
                        worksheet.write_string(r as u32, c as u16, value).unwrap();
                    }
                }
            }
        }
        let bytes = workbook.save_to_buffer().unwrap();

        let order = parse_workbook(&bytes, 100).unwrap();
        assert_eq!(order.rows.len(), 2);
        assert_eq!(order.rows[1].sender.zip, "62701");
        assert_eq!(order.rows[1].recipient.name, "Recipient 1");
    }

    #[test]
    fn test_garbage_bytes_are_unreadable() {
        assert!(matches!(
            parse_workbook(b"definitely not a zip archive", 100),
            Err(SpreadsheetError::Unreadable(_))
        ));
    }
}
