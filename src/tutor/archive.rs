use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::error::ArchiveError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    TransformedQuestions,
    TaxonomyBloomStructured,
    StudentScore,
    GeneratedTaxonomy,
    MetacognitiveRecommendations,
}

impl Purpose {
    pub fn prefix(&self) -> &'static str {
        match self {
            Purpose::TransformedQuestions => "transformed_questions",
            Purpose::TaxonomyBloomStructured => "taxonomy_bloom_structured",
            Purpose::StudentScore => "student_score",
            Purpose::GeneratedTaxonomy => "generated_taxonomy",
            Purpose::MetacognitiveRecommendations => "metacognitive_recommendations",
        }
    }
}

/// Writes pipeline results as `<purpose>_<YYYYMMDD_HHMMSS>.<ext>` files.
#[derive(Debug, Clone)]
pub struct Archive {
    dir: PathBuf,
}

impl Archive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn save_json<T: Serialize + ?Sized>(
        &self,
        purpose: Purpose,
        value: &T,
    ) -> Result<PathBuf, ArchiveError> {
        let (path, file) = self.create(purpose, "json", Local::now())?;
        let mut writer = io::BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.flush()?;
        log::info!("Saved {}", path.display());
        Ok(path)
    }

    pub fn save_text(&self, purpose: Purpose, text: &str) -> Result<PathBuf, ArchiveError> {
        let (path, mut file) = self.create(purpose, "txt", Local::now())?;
        file.write_all(text.as_bytes())?;
        log::info!("Saved {}", path.display());
        Ok(path)
    }

    /// Opens a new file; a name already taken within the same second gets a
    /// numeric suffix rather than being overwritten.
    fn create(
        &self,
        purpose: Purpose,
        extension: &str,
        at: DateTime<Local>,
    ) -> Result<(PathBuf, File), ArchiveError> {
        fs::create_dir_all(&self.dir)?;
        let stem = format!("{}_{}", purpose.prefix(), at.format("%Y%m%d_%H%M%S"));
        let mut attempt = 0;
        loop {
            let name = if attempt == 0 {
                format!("{}.{}", stem, extension)
            } else {
                format!("{}_{}.{}", stem, attempt, extension)
            };
            let path = self.dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }
}
