//! Listing of the effective expected-header revisions.

use anyhow::Result;
use log::info;

use crate::{
    layouts::{FileType, Layouts},
    table::TextTable,
};

pub fn render(layouts: &Layouts, file_type: Option<FileType>) -> String {
    let selected = match file_type {
        Some(file_type) => vec![file_type],
        None => FileType::ALL.to_vec(),
    };
    let mut sections = Vec::with_capacity(selected.len());
    for file_type in selected {
        let target = file_type.target();
        for revision in layouts.revisions(file_type) {
            let mut table = TextTable::new(["#", "header", "column", "type"]);
            for (idx, (header, column)) in revision.headers.iter().zip(target.columns).enumerate() {
                table.push_row(vec![
                    (idx + 1).to_string(),
                    header.clone(),
                    column.name.to_string(),
                    column.datatype.to_string(),
                ]);
            }
            sections.push(format!(
                "{file_type} / {} -> {}\n{}",
                revision.revision,
                target.name,
                table.render()
            ));
        }
    }
    sections.join("\n")
}

pub fn execute(layouts: &Layouts, file_type: Option<FileType>) -> Result<()> {
    print!("{}", render(layouts, file_type));
    info!("Layout configuration version {}", layouts.version);
    Ok(())
}
