//! ZIP archives of bulk order labels.

use std::io::{Cursor, Write};
use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

use super::provider::IssuedLabel;

/// Pack every label PDF into one archive, in order.
///
/// Entries are named `label_<tracking>.pdf`. A name already in the archive gets
/// the label's position appended, and the suffix grows until the name is unused.
pub fn zip_labels(labels: &[IssuedLabel]) -> zip::result::ZipResult<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut seen = std::collections::HashSet::new();

    for (index, label) in labels.iter().enumerate() {
        let tracking = sanitize_component(&label.tracking_number);
        let mut name = format!("label_{tracking}.pdf");
        let mut suffix = index + 1;
        while !seen.insert(name.clone()) {
            name = format!("label_{tracking}_{suffix}.pdf");
            suffix += 1;
        }
        writer.start_file(name, options)?;
        writer.write_all(&label.label_pdf)?;
    }

    Ok(writer.finish()?.into_inner())
}

/// Restrict a value to characters that are safe in a file name.
pub fn sanitize_component(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@') { c } else { '_' })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}
