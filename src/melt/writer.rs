use crate::types::{Flattened, FlattenedRows, Row};
use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Writes rows to multiple JSON Lines files, one per entity
pub struct EntityWriter<W: Write> {
    output_dir: PathBuf,
    writers: HashMap<String, W>,
    stems: HashMap<String, String>,
    used_stems: HashSet<String>,
}

impl EntityWriter<BufWriter<File>> {
    /// Create a new EntityWriter that writes to files in a directory
    ///
    /// Files are created on first use and truncated.
    pub fn new_file_writer<P: AsRef<Path>>(output_dir: P) -> Result<Self> {
        std::fs::create_dir_all(&output_dir)
            .context("Failed to create output directory")?;

        Ok(EntityWriter {
            output_dir: output_dir.as_ref().to_path_buf(),
            writers: HashMap::new(),
            stems: HashMap::new(),
            used_stems: HashSet::new(),
        })
    }

    /// Path of the file holding the rows of an entity
    ///
    /// Entities whose sanitized names collide get a numeric suffix, assigned
    /// in the order the entities are first seen by this writer.
    pub fn entity_path(&mut self, entity: &str) -> PathBuf {
        let stem = match self.stems.get(entity) {
            Some(stem) => stem.clone(),
            None => {
                let base = file_stem(entity);
                let mut stem = base.clone();
                let mut suffix = 2;
                while self.used_stems.contains(&stem) {
                    stem = format!("{}_{}", base, suffix);
                    suffix += 1;
                }
                self.used_stems.insert(stem.clone());
                self.stems.insert(entity.to_string(), stem.clone());
                stem
            }
        };
        self.output_dir.join(format!("{}.jsonl", stem))
    }

    /// Write rows to their respective entity files
    pub fn write_rows(&mut self, rows: &FlattenedRows) -> Result<()> {
        for (entity, entity_rows) in rows {
            self.write_entity_rows(entity, entity_rows)?;
        }
        Ok(())
    }

    /// Write the rows of a stream chunk, dropping any metadata wrapping
    pub fn write_chunk(&mut self, chunk: &Flattened) -> Result<()> {
        for (entity, flattened) in chunk {
            self.write_entity_rows(entity, flattened.rows())?;
        }
        Ok(())
    }

    fn write_entity_rows(&mut self, entity: &str, rows: &[Row]) -> Result<()> {
        if !self.writers.contains_key(entity) {
            let path = self.entity_path(entity);
            let file = File::create(&path)
                .with_context(|| format!("Failed to open file: {}", path.display()))?;
            self.writers.insert(entity.to_string(), BufWriter::new(file));
        }
        let Some(writer) = self.writers.get_mut(entity) else {
            return Ok(());
        };

        for row in rows {
            let json = serde_json::to_string(row)
                .context("Failed to serialize row")?;
            writeln!(writer, "{}", json)
                .with_context(|| format!("Failed to write row of '{}'", entity))?;
        }
        Ok(())
    }

    /// Flush all writers
    pub fn flush(&mut self) -> Result<()> {
        for writer in self.writers.values_mut() {
            writer.flush().context("Failed to flush writer")?;
        }
        Ok(())
    }
}

/// A simpler writer that writes all rows to a single output
pub struct SingleWriter<W: Write> {
    writer: W,
}

impl<W: Write> SingleWriter<W> {
    pub fn new(writer: W) -> Self {
        SingleWriter { writer }
    }

    /// Write every row tagged with its entity name in `_entity`
    pub fn write_rows(&mut self, rows: &FlattenedRows) -> Result<()> {
        for (entity, entity_rows) in rows {
            for row in entity_rows {
                let mut data = row.clone();
                data.insert("_entity".to_string(), Value::String(entity.clone()));

                let json = serde_json::to_string(&data)
                    .context("Failed to serialize row")?;
                writeln!(self.writer, "{}", json)
                    .context("Failed to write row")?;
            }
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().context("Failed to flush writer")
    }
}

/// File name for an entity, with path and pointer syntax replaced by `_`
fn file_stem(entity: &str) -> String {
    entity
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
