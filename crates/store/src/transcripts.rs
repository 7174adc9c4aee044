//! Filesystem transcript store.
//!
//! Each dialogue gets one JSON document under the dialogues directory, named
//! `<YYYY-MM-DD>-<dialogue_id>.json`. Written once, read-only afterwards.

use std::path::{Path, PathBuf};

use tb_domain::dialogue::DialogueTranscript;
use tb_domain::trace::TraceEvent;
use tb_domain::{Error, Result};

pub struct TranscriptStore {
    base_dir: PathBuf,
}

impl TranscriptStore {
    pub fn new(base_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(base_dir)?;
        Ok(Self {
            base_dir: base_dir.to_path_buf(),
        })
    }

    fn path_for(&self, transcript: &DialogueTranscript) -> PathBuf {
        self.base_dir.join(format!(
            "{}-{}.json",
            transcript.created_at.format("%Y-%m-%d"),
            transcript.dialogue_id
        ))
    }

    /// Write a transcript. Goes through a temp file + rename so a crash
    /// never leaves a half-written document behind.
    pub fn write(&self, transcript: &DialogueTranscript) -> Result<PathBuf> {
        let path = self.path_for(transcript);
        let json = serde_json::to_string_pretty(transcript)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json.as_bytes())?;
        std::fs::rename(&tmp, &path)?;

        TraceEvent::TranscriptWritten {
            dialogue_id: transcript.dialogue_id.clone(),
            entries: transcript.entries.len(),
        }
        .emit();
        Ok(path)
    }

    /// Look a transcript up by dialogue id (the filename's date prefix is
    /// not required to be known).
    pub fn read(&self, dialogue_id: &str) -> Result<DialogueTranscript> {
        let suffix = format!("-{dialogue_id}.json");
        for entry in std::fs::read_dir(&self.base_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.ends_with(&suffix) {
                let raw = std::fs::read_to_string(entry.path())?;
                return Ok(serde_json::from_str(&raw)?);
            }
        }
        Err(Error::Store(format!("no transcript for dialogue '{dialogue_id}'")))
    }
}
