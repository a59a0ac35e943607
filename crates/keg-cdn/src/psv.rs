//! Pipe-separated tables as served by the patch service (`versions`, `cdns`, `bgdl`, ...).
//!
//! ```text
//! Region!STRING:0|BuildConfig!HEX:16|BuildId!DEC:4
//! ## seqn = 2241282
//! us|6f5a3ef7b6c9df3b51e7d2bd5fd1ef4e|40906
//! ```

use std::sync::Arc;

use crate::error::{CdnError, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PsvField {
    pub name: String,
    /// Declared type, e.g. `STRING`, `HEX`, `DEC`. Empty when the header omits it.
    pub kind: String,
    pub size: u32,
}

impl PsvField {
    fn parse(column: &str, line: usize) -> Result<Self> {
        let Some((name, ty)) = column.split_once('!') else {
            return Ok(Self {
                name: column.trim().to_string(),
                kind: String::new(),
                size: 0,
            });
        };
        let (kind, size) = match ty.split_once(':') {
            Some((kind, size)) => {
                let size = size.trim().parse::<u32>().map_err(|_| {
                    CdnError::decode(format!("line {line}: invalid field size in {column:?}"))
                })?;
                (kind, size)
            }
            None => (ty, 0),
        };
        Ok(Self {
            name: name.trim().to_string(),
            kind: kind.trim().to_ascii_uppercase(),
            size,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PsvRow {
    fields: Arc<[PsvField]>,
    cells: Vec<String>,
}

impl PsvRow {
    /// Cell under the column named `name` (ASCII case-insensitive).
    pub fn get(&self, name: &str) -> Option<&str> {
        let idx = self
            .fields
            .iter()
            .position(|field| field.name.eq_ignore_ascii_case(name))?;
        self.cells.get(idx).map(String::as_str)
    }

    pub fn cells(&self) -> &[String] {
        &self.cells
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PsvFile {
    fields: Vec<PsvField>,
    rows: Vec<PsvRow>,
    seqn: Option<u64>,
}

impl PsvFile {
    pub fn fields(&self) -> &[PsvField] {
        &self.fields
    }

    pub fn rows(&self) -> &[PsvRow] {
        &self.rows
    }

    /// Sequence number from a `## seqn = N` comment, if present.
    pub fn seqn(&self) -> Option<u64> {
        self.seqn
    }
}

pub fn loads(text: &str) -> Result<PsvFile> {
    let mut fields: Option<Arc<[PsvField]>> = None;
    let mut rows = Vec::new();
    let mut seqn = None;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(comment) = line.strip_prefix("##") {
            if let Some((key, value)) = comment.split_once('=') {
                if key.trim().eq_ignore_ascii_case("seqn") {
                    let value = value.trim().parse::<u64>().map_err(|_| {
                        CdnError::decode(format!("line {line_no}: invalid seqn {:?}", value.trim()))
                    })?;
                    seqn = Some(value);
                }
            }
            continue;
        }
        if line.starts_with('#') {
            continue;
        }

        let Some(header) = fields.as_ref() else {
            let parsed = line
                .split('|')
                .map(|column| PsvField::parse(column, line_no))
                .collect::<Result<Vec<_>>>()?;
            fields = Some(parsed.into());
            continue;
        };

        let cells: Vec<String> = line.split('|').map(str::to_string).collect();
        if cells.len() != header.len() {
            return Err(CdnError::decode(format!(
                "line {line_no}: expected {} cells, found {}",
                header.len(),
                cells.len()
            )));
        }
        rows.push(PsvRow {
            fields: Arc::clone(header),
            cells,
        });
    }

    Ok(PsvFile {
        fields: fields.map(|fields| fields.to_vec()).unwrap_or_default(),
        rows,
        seqn,
    })
}
